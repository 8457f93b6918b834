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

//! Records served by the consensus chain REST API.

use std::time::Duration;

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::serde_helpers::{i64_string, u64_string};

/// Every REST response is wrapped with the height it was served at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseWithHeight<T> {
    /// Consensus chain height the query was answered at.
    #[serde(with = "u64_string", default)]
    pub height: u64,
    /// The actual payload.
    pub result: T,
}

/// A validator as tracked by the consensus chain staking module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validator {
    /// Validator id on the root chain staking contract.
    #[serde(rename = "ID", with = "u64_string")]
    pub id: u64,
    #[serde(with = "u64_string", default)]
    pub start_epoch: u64,
    #[serde(with = "u64_string", default)]
    pub end_epoch: u64,
    /// Nonce of the last applied staking event for this validator.
    #[serde(with = "u64_string", default)]
    pub nonce: u64,
    #[serde(with = "i64_string", default)]
    pub power: i64,
    #[serde(default)]
    pub pub_key: String,
    /// The address that signs consensus chain transactions.
    pub signer: Address,
    #[serde(rename = "last_updated", default)]
    pub last_updated: String,
    #[serde(default)]
    pub jailed: bool,
    #[serde(with = "i64_string", default)]
    pub accum: i64,
}

/// The active validator set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorSet {
    pub validators: Vec<Validator>,
    #[serde(default)]
    pub proposer: Option<Validator>,
}

impl ValidatorSet {
    /// 1-based position of `signer` in the set, if present.
    pub fn position_of(&self, signer: Address) -> Option<u64> {
        self.validators
            .iter()
            .position(|v| v.signer == signer)
            .map(|i| i as u64 + 1)
    }
}

/// Account record used to sign transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub address: Address,
    #[serde(with = "u64_string", default)]
    pub account_number: u64,
    #[serde(with = "u64_string", default)]
    pub sequence: u64,
}

/// Checkpoint module parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CheckpointParams {
    /// Buffer time in nanoseconds.
    #[serde(with = "u64_string")]
    pub checkpoint_buffer_time: u64,
    #[serde(with = "u64_string")]
    pub avg_checkpoint_length: u64,
    #[serde(with = "u64_string")]
    pub max_checkpoint_length: u64,
    #[serde(with = "u64_string", default)]
    pub child_chain_block_interval: u64,
}

impl CheckpointParams {
    /// The buffer time as a [`Duration`].
    pub fn buffer_time(&self) -> Duration {
        Duration::from_nanos(self.checkpoint_buffer_time)
    }
}

/// A checkpoint, as staged in the buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub proposer: Address,
    #[serde(with = "u64_string")]
    pub start_block: u64,
    #[serde(with = "u64_string")]
    pub end_block: u64,
    pub root_hash: H256,
    #[serde(default)]
    pub bor_chain_id: String,
    /// Unix seconds when the checkpoint entered the buffer.
    #[serde(with = "u64_string", default)]
    pub timestamp: u64,
}

/// Chain parameters of the chain manager module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainParams {
    #[serde(default)]
    pub bor_chain_id: String,
    #[serde(default)]
    pub state_sender_address: Address,
    #[serde(default)]
    pub root_chain_address: Address,
    #[serde(default)]
    pub staking_info_address: Address,
    #[serde(default)]
    pub state_receiver_address: Address,
}

/// Confirmation counts and contract addresses shared by every validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainManagerParams {
    #[serde(with = "u64_string")]
    pub mainchain_tx_confirmations: u64,
    #[serde(with = "u64_string")]
    pub maticchain_tx_confirmations: u64,
    #[serde(default)]
    pub chain_params: ChainParams,
}

/// A producer span of the child chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Span {
    #[serde(with = "u64_string")]
    pub span_id: u64,
    #[serde(with = "u64_string")]
    pub start_block: u64,
    #[serde(with = "u64_string")]
    pub end_block: u64,
    #[serde(default)]
    pub validator_set: ValidatorSet,
    #[serde(default)]
    pub selected_producers: Vec<Validator>,
    #[serde(default)]
    pub bor_chain_id: String,
}

/// A milestone, a finality marker on the child chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Milestone {
    pub proposer: Address,
    #[serde(with = "u64_string")]
    pub start_block: u64,
    #[serde(with = "u64_string")]
    pub end_block: u64,
    pub hash: H256,
    #[serde(default)]
    pub bor_chain_id: String,
    #[serde(default)]
    pub milestone_id: String,
    #[serde(with = "u64_string", default)]
    pub timestamp: u64,
}

/// A state-sync record that was already accepted by the consensus chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(with = "u64_string")]
    pub id: u64,
    pub contract: Address,
    #[serde(default)]
    pub data: String,
    pub tx_hash: H256,
    #[serde(with = "u64_string")]
    pub log_index: u64,
    #[serde(default)]
    pub bor_chain_id: String,
}

/// A single key/value attribute of an ABCI event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// An ABCI event emitted by a transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StringEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl StringEvent {
    /// Value of the first attribute with `key`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// Per-message log of a transaction result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AbciMessageLog {
    #[serde(default)]
    pub msg_index: u64,
    #[serde(default)]
    pub events: Vec<StringEvent>,
}

/// Result of submitting (or searching for) a transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxResponse {
    #[serde(with = "u64_string", default)]
    pub height: u64,
    pub txhash: String,
    /// Non-zero means the chain rejected the transaction.
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub raw_log: String,
    #[serde(default)]
    pub logs: Vec<AbciMessageLog>,
}

impl TxResponse {
    /// All events emitted by this transaction.
    pub fn events(&self) -> impl Iterator<Item = &StringEvent> {
        self.logs.iter().flat_map(|l| l.events.iter())
    }
}

/// One page of a tx search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchTxsResult {
    #[serde(with = "u64_string", default)]
    pub total_count: u64,
    #[serde(with = "u64_string", default)]
    pub count: u64,
    #[serde(default)]
    pub txs: Vec<TxResponse>,
}

/// Proof data for a side transaction: the payload that is submitted to the
/// root chain together with the validators' signatures over it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SideTxProof {
    /// Each signature as `[r, s, v]` decimal strings.
    #[serde(default)]
    pub sigs: Vec<[String; 3]>,
    /// Hex encoded signed transaction.
    #[serde(default)]
    pub tx: String,
    /// Hex encoded data.
    #[serde(default)]
    pub data: String,
}

/// Tendermint `/status` subset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStatus {
    pub sync_info: SyncInfo,
}

/// Tendermint sync info.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncInfo {
    #[serde(with = "u64_string")]
    pub latest_block_height: u64,
    #[serde(default)]
    pub catching_up: bool,
}

/// Tendermint `/num_unconfirmed_txs` and `/unconfirmed_txs` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnconfirmedTxs {
    #[serde(with = "u64_string", default)]
    pub n_txs: u64,
    #[serde(with = "u64_string", default)]
    pub total: u64,
    /// Base64 encoded raw transactions.
    #[serde(default)]
    pub txs: Option<Vec<String>>,
}

/// Tendermint JSON-RPC envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse<T> {
    pub result: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_set_from_rest_json() {
        let raw = r#"{
            "validators": [
                {"ID": "1", "startEpoch": "0", "endEpoch": "0", "nonce": "3",
                 "power": "10000", "pubKey": "0x04", "signer": "0x0000000000000000000000000000000000000001",
                 "last_updated": "", "jailed": false, "accum": "-20000"},
                {"ID": 2, "power": 1, "signer": "0x0000000000000000000000000000000000000002"}
            ],
            "proposer": null
        }"#;
        let set: ValidatorSet = serde_json::from_str(raw).unwrap();
        assert_eq!(set.validators[0].nonce, 3);
        assert_eq!(set.validators[0].accum, -20000);
        assert_eq!(set.position_of(Address::from_low_u64_be(2)), Some(2));
        assert_eq!(set.position_of(Address::from_low_u64_be(9)), None);
    }

    #[test]
    fn checkpoint_params_buffer_time() {
        let raw = r#"{"checkpoint_buffer_time":"1000000000000","avg_checkpoint_length":"256","max_checkpoint_length":"1024"}"#;
        let params: CheckpointParams = serde_json::from_str(raw).unwrap();
        assert_eq!(params.buffer_time(), Duration::from_secs(1000));
        assert_eq!(params.child_chain_block_interval, 0);
    }
}
