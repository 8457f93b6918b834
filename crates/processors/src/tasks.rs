// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Each relay task carries `[event_name, payload_json]` as its arguments.

/// A new child chain header, from the child chain listener.
pub const SEND_CHECKPOINT: &str = "sendCheckpointToHeimdall";
/// `NewHeaderBlock` on the root chain.
pub const SEND_CHECKPOINT_ACK: &str = "sendCheckpointAckToHeimdall";
/// A checkpoint transaction on the consensus chain.
pub const SEND_CHECKPOINT_TO_ROOT_CHAIN: &str = "sendCheckpointToRootchain";
/// `StateSynced` on the root chain.
pub const SEND_STATE_SYNCED: &str = "sendStateSyncedToHeimdall";
/// `Staked` on the root chain.
pub const SEND_VALIDATOR_JOIN: &str = "sendValidatorJoinToHeimdall";
/// `StakeUpdate` on the root chain.
pub const SEND_STAKE_UPDATE: &str = "sendStakeUpdateToHeimdall";
/// `SignerChange` on the root chain.
pub const SEND_SIGNER_CHANGE: &str = "sendSignerChangeToHeimdall";
/// `UnstakeInit` on the root chain.
pub const SEND_UNSTAKE_INIT: &str = "sendUnstakeInitToHeimdall";
/// `TopUpFee` on the root chain.
pub const SEND_TOP_UP_FEE: &str = "sendTopUpFeeToHeimdall";
/// `Slashed` on the root chain.
pub const SEND_TICK_ACK: &str = "sendTickAckToHeimdall";
/// `UnJailed` on the root chain.
pub const SEND_UNJAIL: &str = "sendUnjailToHeimdall";

/// Every relay task name.
pub const ALL: &[&str] = &[
    SEND_CHECKPOINT,
    SEND_CHECKPOINT_ACK,
    SEND_CHECKPOINT_TO_ROOT_CHAIN,
    SEND_STATE_SYNCED,
    SEND_VALIDATOR_JOIN,
    SEND_STAKE_UPDATE,
    SEND_SIGNER_CHANGE,
    SEND_UNSTAKE_INIT,
    SEND_TOP_UP_FEE,
    SEND_TICK_ACK,
    SEND_UNJAIL,
];

/// Retries of a task dispatched by a listener.
pub const DEFAULT_RETRY_COUNT: u32 = 3;
