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

#![warn(missing_docs)]
//! # Transaction Broadcaster 📡
//!
//! One serialising lane per destination chain.
//!
//! The consensus lane signs every message with the validator key using the
//! cached account number and sequence, and keeps that cache in step with the
//! chain: the sequence is bumped after an accepted transaction and fetched
//! again after any failure. The root chain lane only serialises checkpoint
//! submissions, the provider takes care of the nonce.

mod consensus;
mod root_chain;

pub use consensus::{AccountState, ConsensusBroadcaster};
pub use root_chain::RootChainBroadcaster;

/// Both broadcaster lanes.
#[derive(Debug)]
pub struct TxBroadcaster {
    /// Consensus chain lane.
    pub consensus: ConsensusBroadcaster,
    /// Root chain lane.
    pub root_chain: RootChainBroadcaster,
}
