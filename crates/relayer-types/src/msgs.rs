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

//! Consensus chain messages the relayer submits, and the signed transaction
//! envelope that carries exactly one of them.

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

/// A single domain message for the consensus chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ConsensusMsg {
    /// Propose a new checkpoint of child chain blocks.
    #[serde(rename = "checkpoint/MsgCheckpoint")]
    Checkpoint {
        proposer: Address,
        start_block: u64,
        end_block: u64,
        root_hash: H256,
        account_root_hash: H256,
        bor_chain_id: String,
    },
    /// Acknowledge a checkpoint committed on the root chain.
    #[serde(rename = "checkpoint/MsgCheckpointACK")]
    CheckpointAck {
        from: Address,
        number: u64,
        proposer: Address,
        start_block: u64,
        end_block: u64,
        root_hash: H256,
        tx_hash: H256,
        log_index: u64,
    },
    /// Tell the chain that no checkpoint was acknowledged in time.
    #[serde(rename = "checkpoint/MsgCheckpointNoACK")]
    CheckpointNoAck { from: Address },
    /// A state-sync record from the root chain.
    #[serde(rename = "clerk/MsgEventRecord")]
    EventRecord {
        from: Address,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
        contract_address: Address,
        data: Bytes,
        id: u64,
        chain_id: String,
    },
    /// A new validator staked on the root chain.
    #[serde(rename = "staking/MsgValidatorJoin")]
    ValidatorJoin {
        from: Address,
        id: u64,
        activation_epoch: u64,
        amount: U256,
        signer_pub_key: Bytes,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
        nonce: u64,
    },
    /// A validator's stake changed.
    #[serde(rename = "staking/MsgStakeUpdate")]
    StakeUpdate {
        from: Address,
        id: u64,
        new_amount: U256,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
        nonce: u64,
    },
    /// A validator rotated its signer key.
    #[serde(rename = "staking/MsgSignerUpdate")]
    SignerChange {
        from: Address,
        id: u64,
        new_signer_pub_key: Bytes,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
        nonce: u64,
    },
    /// A validator started unbonding.
    #[serde(rename = "staking/MsgValidatorExit")]
    UnstakeInit {
        from: Address,
        id: u64,
        deactivation_epoch: u64,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
        nonce: u64,
    },
    /// A validator topped up its fee balance.
    #[serde(rename = "topup/MsgTopup")]
    TopUpFee {
        from: Address,
        user: Address,
        fee: U256,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
    },
    /// Propose to push slashing info to the root chain.
    #[serde(rename = "slashing/MsgTick")]
    Tick {
        from: Address,
        id: u64,
        proposer: Address,
        slashing_info_bytes: Bytes,
    },
    /// Acknowledge a slashing tick committed on the root chain.
    #[serde(rename = "slashing/MsgTickAck")]
    TickAck {
        from: Address,
        id: u64,
        amount: U256,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
    },
    /// A jailed validator was unjailed on the root chain.
    #[serde(rename = "slashing/MsgUnjail")]
    Unjail {
        from: Address,
        id: u64,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
    },
    /// Propose the next producer span.
    #[serde(rename = "bor/MsgProposeSpan")]
    ProposeSpan {
        span_id: u64,
        proposer: Address,
        start_block: u64,
        end_block: u64,
        chain_id: String,
        seed: H256,
    },
    /// Catch the span record up with what the child chain actually used.
    #[serde(rename = "bor/MsgBackfillSpans")]
    BackfillSpans {
        proposer: Address,
        chain_id: String,
        latest_span_id: u64,
        latest_bor_span_id: u64,
    },
    /// Propose a new milestone.
    #[serde(rename = "milestone/MsgMilestone")]
    Milestone {
        proposer: Address,
        start_block: u64,
        end_block: u64,
        hash: H256,
        bor_chain_id: String,
        milestone_id: String,
    },
    /// Tell the chain that no milestone landed in time.
    #[serde(rename = "milestone/MsgMilestoneTimeout")]
    MilestoneTimeout { from: Address },
}

impl ConsensusMsg {
    /// Short, stable name of the message, used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Checkpoint { .. } => "checkpoint",
            Self::CheckpointAck { .. } => "checkpoint-ack",
            Self::CheckpointNoAck { .. } => "no-ack",
            Self::EventRecord { .. } => "event-record",
            Self::ValidatorJoin { .. } => "validator-join",
            Self::StakeUpdate { .. } => "stake-update",
            Self::SignerChange { .. } => "signer-change",
            Self::UnstakeInit { .. } => "unstake-init",
            Self::TopUpFee { .. } => "top-up-fee",
            Self::Tick { .. } => "tick",
            Self::TickAck { .. } => "tick-ack",
            Self::Unjail { .. } => "unjail",
            Self::ProposeSpan { .. } => "span-propose",
            Self::BackfillSpans { .. } => "backfill-spans",
            Self::Milestone { .. } => "milestone",
            Self::MilestoneTimeout { .. } => "milestone-timeout",
        }
    }

    /// The `(tx_hash, log_index)` pair of the root chain event this message
    /// relays, if any.
    pub fn event_key(&self) -> Option<(H256, u64)> {
        match self {
            Self::CheckpointAck {
                tx_hash, log_index, ..
            }
            | Self::EventRecord {
                tx_hash, log_index, ..
            }
            | Self::ValidatorJoin {
                tx_hash, log_index, ..
            }
            | Self::StakeUpdate {
                tx_hash, log_index, ..
            }
            | Self::SignerChange {
                tx_hash, log_index, ..
            }
            | Self::UnstakeInit {
                tx_hash, log_index, ..
            }
            | Self::TopUpFee {
                tx_hash, log_index, ..
            }
            | Self::TickAck {
                tx_hash, log_index, ..
            }
            | Self::Unjail {
                tx_hash, log_index, ..
            } => Some((*tx_hash, *log_index)),
            _ => None,
        }
    }
}

/// A coin amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

/// Fee attached to a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdFee {
    #[serde(default)]
    pub amount: Vec<Coin>,
    pub gas: String,
}

/// The document that is signed. Field order is alphabetical so that the
/// serialized form is canonical.
#[derive(Debug, Clone, Serialize)]
pub struct StdSignDoc<'a> {
    pub account_number: String,
    pub chain_id: &'a str,
    pub fee: &'a StdFee,
    pub memo: &'a str,
    pub msgs: [&'a ConsensusMsg; 1],
    pub sequence: String,
}

impl StdSignDoc<'_> {
    /// Canonical bytes: every object's keys sorted, no whitespace.
    pub fn to_sign_bytes(&self) -> serde_json::Result<Vec<u8>> {
        // `serde_json::Value` keeps object keys in a `BTreeMap`.
        let value = serde_json::to_value(self)?;
        serde_json::to_vec(&value)
    }
}

/// A signed transaction, carrying exactly one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdTx {
    pub msg: ConsensusMsg,
    pub fee: StdFee,
    /// Hex encoded 65 bytes `r || s || v` signature.
    pub signature: String,
    #[serde(default)]
    pub memo: String,
}

/// `POST /txs` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastReq {
    pub tx: StdTx,
    pub mode: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_wire_shape_is_tagged() {
        let msg = ConsensusMsg::CheckpointNoAck {
            from: Address::zero(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "checkpoint/MsgCheckpointNoACK");
        assert!(v["value"]["from"].is_string());
        assert_eq!(msg.kind(), "no-ack");
        assert_eq!(msg.event_key(), None);
    }

    #[test]
    fn sign_bytes_are_sorted() {
        let msg = ConsensusMsg::MilestoneTimeout {
            from: Address::zero(),
        };
        let fee = StdFee {
            amount: vec![],
            gas: "0".into(),
        };
        let doc = StdSignDoc {
            account_number: "1".into(),
            chain_id: "heimdall-15001",
            fee: &fee,
            memo: "",
            msgs: [&msg],
            sequence: "4".into(),
        };
        let bytes = String::from_utf8(doc.to_sign_bytes().unwrap()).unwrap();
        assert!(bytes.starts_with(r#"{"account_number":"1","chain_id":"heimdall-15001","fee":{"amount":[],"gas":"0"}"#));
        assert!(bytes.ends_with(r#""sequence":"4"}"#));
    }
}
