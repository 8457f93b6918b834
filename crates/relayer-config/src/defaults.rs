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

//! Default values of the configuration. All intervals are in milliseconds.

use bridge_relayer_types::rpc_url::RpcUrl;

fn url(raw: &str) -> RpcUrl {
    // all of the literals below are valid urls.
    raw.parse().unwrap_or_else(|_| unreachable!("invalid default url {raw}"))
}

/// Root chain JSON-RPC endpoint.
pub fn root_chain_endpoint() -> RpcUrl {
    url("http://localhost:9545")
}
/// Child chain JSON-RPC endpoint.
pub fn child_chain_endpoint() -> RpcUrl {
    url("http://localhost:8545")
}
/// Consensus chain REST endpoint.
pub fn consensus_rest_endpoint() -> RpcUrl {
    url("http://0.0.0.0:1317")
}
/// Consensus chain tendermint RPC endpoint.
pub fn tendermint_endpoint() -> RpcUrl {
    url("http://0.0.0.0:26657")
}
/// Consensus chain id.
pub fn consensus_chain_id() -> String {
    String::from("heimdall-15001")
}
/// Child chain id, as known by the consensus chain.
pub fn bor_chain_id() -> String {
    String::from("15001")
}

/// Root chain confirmations before an event is relayed.
pub const fn root_chain_confirmations() -> u64 {
    6
}
/// Child chain confirmations before a block is checkpointed.
pub const fn child_chain_confirmations() -> u64 {
    10
}
/// The root chain listener polls every minute.
pub const fn root_chain_poll_interval() -> u64 {
    60_000
}
/// The child chain listener polls every five minutes.
pub const fn child_chain_poll_interval() -> u64 {
    5 * 60_000
}
/// The consensus chain listener polls every minute.
pub const fn consensus_poll_interval() -> u64 {
    60_000
}
/// Timeout of a single RPC call.
pub const fn rpc_timeout() -> u64 {
    5_000
}
/// Root chain gas limit for checkpoint submission.
pub const fn main_chain_gas_limit() -> u64 {
    5_000_000
}
/// Max root chain gas price, 400 gwei.
pub const fn main_chain_max_gas_price() -> u64 {
    400_000_000_000
}

/// No-ack loop interval.
pub const fn no_ack_poll_interval() -> u64 {
    1_010_000
}
/// How long to wait for an ack before sending a no-ack.
pub const fn no_ack_wait_time() -> u64 {
    1_800_000
}

/// Milestone proposal interval.
pub const fn milestone_poll_interval() -> u64 {
    30_000
}
/// Minimum milestone length in child blocks.
pub const fn milestone_length() -> u64 {
    12
}
/// Child chain confirmations before a block can be in a milestone.
pub const fn milestone_confirmations() -> u64 {
    16
}
/// How far the child chain may run ahead of the last milestone before a
/// timeout is sent.
pub const fn milestone_buffer_length() -> u64 {
    60
}
/// Number of milestone proposers allowed to send a timeout.
pub const fn milestone_timeout_proposers() -> u64 {
    10
}

/// Span proposal interval.
pub const fn span_poll_interval() -> u64 {
    60_000
}

/// Self-heal stake update pass interval, 3 hours.
pub const fn stake_update_interval() -> u64 {
    3 * 60 * 60_000
}
/// Self-heal state-sync pass interval, 15 minutes.
pub const fn state_synced_interval() -> u64 {
    15 * 60_000
}
/// Events younger than this are left to the listener, 1 hour.
pub const fn max_depth_duration() -> u64 {
    60 * 60_000
}
/// Largest indexer response body, 10 MiB.
pub const fn indexer_body_limit() -> usize {
    10 * 1024 * 1024
}

/// Number of task workers.
pub const fn task_workers() -> usize {
    10
}
/// Delay per validator position.
pub const fn per_validator_delay() -> u64 {
    10_000
}
/// Redelivery delay when a prerequisite is missing.
pub const fn retry_delay() -> u64 {
    12_000
}
/// Redelivery delay for state-syncs already sitting in the mempool.
pub const fn state_sync_retry_delay() -> u64 {
    24_000
}
/// Retries of a task.
pub const fn task_retry_count() -> u32 {
    3
}
/// Max state-sync data size.
pub const fn max_state_sync_size() -> usize {
    30_000
}

/// Fee denom.
pub fn fee_denom() -> String {
    String::from("matic")
}
/// Fee amount, in the smallest unit.
pub fn fee_amount() -> String {
    String::from("10000000000000000")
}
/// Gas of a consensus chain transaction.
pub const fn tx_gas() -> u64 {
    200_000
}
/// Broadcast mode.
pub fn broadcast_mode() -> String {
    String::from("sync")
}

/// The child chain validator set system contract.
pub fn child_validator_set() -> ethers::types::Address {
    ethers::types::Address::from_low_u64_be(0x1000)
}
