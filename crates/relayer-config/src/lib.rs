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

//! # Relayer Configuration Module 🕸️
//!
//! A module for configuring the bridge relayer.
//!
//! ## Overview
//!
//! The relayer configuration module is responsible for configuring the relayer.
//! Possible configuration include:
//! * `root-chain` / `child-chain`: the EVM chains the relayer watches.
//! * `consensus`: the consensus chain REST and tendermint endpoints.
//! * `contracts`: the root chain contract addresses.
//! * `checkpoint`, `milestone`, `span`: proposal loop timings.
//! * `self-heal`: the reconciler.
//! * `task-queue`, `broadcaster`: the relay pipeline.
//!
//! All intervals are in milliseconds. See [config/local](../../config/local) for an example.

/// CLI configuration
#[cfg(feature = "cli")]
pub mod cli;
/// Default values
pub mod defaults;
/// Utils for processing configuration
pub mod utils;

use std::time::Duration;

use bridge_relayer_types::private_key::PrivateKey;
use bridge_relayer_types::rpc_url::RpcUrl;
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use defaults::*;

/// RelayerConfig is the configuration for the bridge relayer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerConfig {
    /// The root chain (L1).
    #[serde(default = "RootChainDefaults::config")]
    pub root_chain: EvmChainConfig,
    /// The child chain (L2).
    #[serde(default = "ChildChainDefaults::config")]
    pub child_chain: EvmChainConfig,
    /// The consensus chain.
    #[serde(default)]
    pub consensus: ConsensusConfig,
    /// Root chain contracts.
    #[serde(default)]
    pub contracts: ContractsConfig,
    /// Checkpoint loops.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// Milestone loops.
    #[serde(default)]
    pub milestone: MilestoneConfig,
    /// Span loop.
    #[serde(default)]
    pub span: SpanConfig,
    /// Self-healing reconciler.
    #[serde(default)]
    pub self_heal: SelfHealConfig,
    /// Relay task dispatcher.
    #[serde(default)]
    pub task_queue: TaskQueueConfig,
    /// Consensus chain tx broadcaster.
    #[serde(default)]
    pub broadcaster: BroadcasterConfig,
    /// The validator signing key.
    ///
    /// Either a `0x` hex string, or `$VAR` to read it from the environment.
    #[serde(skip_serializing)]
    pub private_key: Option<PrivateKey>,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            root_chain: RootChainDefaults::config(),
            child_chain: ChildChainDefaults::config(),
            consensus: Default::default(),
            contracts: Default::default(),
            checkpoint: Default::default(),
            milestone: Default::default(),
            span: Default::default(),
            self_heal: Default::default(),
            task_queue: Default::default(),
            broadcaster: Default::default(),
            private_key: None,
        }
    }
}

impl RelayerConfig {
    /// Makes sure that the config is valid, by going
    /// through the whole config and doing some basic checks.
    pub fn verify(&self) -> bridge_relayer_utils::Result<()> {
        // a relayer without a signing key can not broadcast anything.
        if self.private_key.is_none() {
            return Err(bridge_relayer_utils::Error::MissingSecrets);
        }
        if self.task_queue.workers == 0 {
            return Err(bridge_relayer_utils::Error::Generic(
                "task-queue.workers must be at least 1",
            ));
        }
        Ok(())
    }
}

struct RootChainDefaults;
struct ChildChainDefaults;

impl RootChainDefaults {
    fn config() -> EvmChainConfig {
        EvmChainConfig {
            http_endpoint: root_chain_endpoint(),
            ws_endpoint: None,
            chain_id: 1,
            confirmations: root_chain_confirmations(),
            poll_interval: root_chain_poll_interval(),
            rpc_timeout: rpc_timeout(),
        }
    }
}

impl ChildChainDefaults {
    fn config() -> EvmChainConfig {
        EvmChainConfig {
            http_endpoint: child_chain_endpoint(),
            ws_endpoint: None,
            chain_id: 15001,
            confirmations: child_chain_confirmations(),
            poll_interval: child_chain_poll_interval(),
            rpc_timeout: rpc_timeout(),
        }
    }
}

/// EvmChainConfig is the configuration of an EVM chain the relayer watches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EvmChainConfig {
    /// Http(s) Endpoint for quick Req/Res
    #[serde(skip_serializing)]
    pub http_endpoint: RpcUrl,
    /// Websocket Endpoint, when set the listener subscribes to new heads
    /// instead of polling.
    #[serde(default, skip_serializing)]
    pub ws_endpoint: Option<RpcUrl>,
    /// chain specific id.
    pub chain_id: u64,
    /// Number of blocks to wait before an event is considered final.
    pub confirmations: u64,
    /// Polling interval in milliseconds
    pub poll_interval: u64,
    /// Timeout of a single RPC call in milliseconds.
    #[serde(default = "rpc_timeout")]
    pub rpc_timeout: u64,
}

impl EvmChainConfig {
    /// The polling interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    /// The RPC timeout as a [`Duration`].
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout)
    }
}

/// ConsensusConfig is the configuration of the consensus chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConsensusConfig {
    /// REST server endpoint.
    #[serde(default = "consensus_rest_endpoint", skip_serializing)]
    pub rest_endpoint: RpcUrl,
    /// Tendermint RPC endpoint.
    #[serde(default = "tendermint_endpoint", skip_serializing)]
    pub tendermint_endpoint: RpcUrl,
    /// The consensus chain id, part of every signed transaction.
    #[serde(default = "consensus_chain_id")]
    pub chain_id: String,
    /// The child chain id as known by the consensus chain.
    #[serde(default = "bor_chain_id")]
    pub bor_chain_id: String,
    /// Polling interval of the consensus chain listener, in milliseconds.
    #[serde(default = "consensus_poll_interval")]
    pub poll_interval: u64,
    /// Timeout of a single REST call in milliseconds.
    #[serde(default = "rpc_timeout")]
    pub request_timeout: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            rest_endpoint: consensus_rest_endpoint(),
            tendermint_endpoint: tendermint_endpoint(),
            chain_id: consensus_chain_id(),
            bor_chain_id: bor_chain_id(),
            poll_interval: consensus_poll_interval(),
            request_timeout: rpc_timeout(),
        }
    }
}

impl ConsensusConfig {
    /// The polling interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }
}

/// Contract addresses the relayer reads or watches.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContractsConfig {
    /// The contract checkpoints are submitted to.
    #[serde(default)]
    pub root_chain: Address,
    /// Staking events.
    #[serde(default)]
    pub staking_info: Address,
    /// State-sync events.
    #[serde(default)]
    pub state_sender: Address,
    /// Slashing events.
    #[serde(default)]
    pub slash_manager: Address,
    /// The child chain validator set contract, read when backfilling spans.
    #[serde(default = "defaults::child_validator_set")]
    pub child_validator_set: Address,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            root_chain: Address::zero(),
            staking_info: Address::zero(),
            state_sender: Address::zero(),
            slash_manager: Address::zero(),
            child_validator_set: defaults::child_validator_set(),
        }
    }
}

impl ContractsConfig {
    /// The addresses whose logs the root chain listener fetches.
    pub fn watched(&self) -> Vec<Address> {
        [
            self.root_chain,
            self.staking_info,
            self.state_sender,
            self.slash_manager,
        ]
        .into_iter()
        .filter(|a| !a.is_zero())
        .collect()
    }
}

/// Checkpoint loop configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CheckpointConfig {
    /// How often the no-ack loop runs, in milliseconds.
    #[serde(default = "no_ack_poll_interval")]
    pub no_ack_poll_interval: u64,
    /// How long without an ack before a no-ack is due, in milliseconds.
    #[serde(default = "no_ack_wait_time")]
    pub no_ack_wait_time: u64,
    /// Root chain gas limit for checkpoint submission.
    #[serde(default = "main_chain_gas_limit")]
    pub main_chain_gas_limit: u64,
    /// Upper bound of the root chain gas price, in wei.
    #[serde(default = "main_chain_max_gas_price")]
    pub main_chain_max_gas_price: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            no_ack_poll_interval: no_ack_poll_interval(),
            no_ack_wait_time: no_ack_wait_time(),
            main_chain_gas_limit: main_chain_gas_limit(),
            main_chain_max_gas_price: main_chain_max_gas_price(),
        }
    }
}

/// Milestone loop configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MilestoneConfig {
    /// Proposal interval in milliseconds, timeouts run at twice this.
    #[serde(default = "milestone_poll_interval")]
    pub poll_interval: u64,
    /// Minimum number of blocks in a milestone.
    #[serde(default = "milestone_length")]
    pub length: u64,
    /// Child chain confirmations.
    #[serde(default = "milestone_confirmations")]
    pub confirmations: u64,
    /// Max distance between the child head and the last milestone.
    #[serde(default = "milestone_buffer_length")]
    pub buffer_length: u64,
    /// Consensus height from which milestones are enabled.
    #[serde(default)]
    pub fork_height: u64,
    /// Child chain height of the first milestone.
    #[serde(default)]
    pub start_height: u64,
    /// How many of the first milestone proposers may send a timeout.
    #[serde(default = "milestone_timeout_proposers")]
    pub timeout_proposers: u64,
}

impl Default for MilestoneConfig {
    fn default() -> Self {
        Self {
            poll_interval: milestone_poll_interval(),
            length: milestone_length(),
            confirmations: milestone_confirmations(),
            buffer_length: milestone_buffer_length(),
            fork_height: 0,
            start_height: 0,
            timeout_proposers: milestone_timeout_proposers(),
        }
    }
}

/// Span loop configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SpanConfig {
    /// Proposal interval in milliseconds.
    #[serde(default = "span_poll_interval")]
    pub poll_interval: u64,
}

impl Default for SpanConfig {
    fn default() -> Self {
        Self {
            poll_interval: span_poll_interval(),
        }
    }
}

/// Self-healing reconciler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SelfHealConfig {
    /// Run the reconciler at all.
    #[serde(default)]
    pub enabled: bool,
    /// When set, lookups go through this indexer instead of log scans.
    #[serde(default, skip_serializing)]
    pub indexer_url: Option<RpcUrl>,
    /// Stake update pass interval in milliseconds.
    #[serde(default = "stake_update_interval")]
    pub stake_update_interval: u64,
    /// State-sync pass interval in milliseconds.
    #[serde(default = "state_synced_interval")]
    pub state_synced_interval: u64,
    /// Minimum age of an event before the reconciler touches it, in milliseconds.
    #[serde(default = "max_depth_duration")]
    pub max_depth_duration: u64,
    /// Largest accepted indexer response, in bytes.
    #[serde(default = "indexer_body_limit")]
    pub indexer_body_limit: usize,
}

impl Default for SelfHealConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            indexer_url: None,
            stake_update_interval: stake_update_interval(),
            state_synced_interval: state_synced_interval(),
            max_depth_duration: max_depth_duration(),
            indexer_body_limit: indexer_body_limit(),
        }
    }
}

/// Relay task dispatcher configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskQueueConfig {
    /// Number of concurrent workers.
    #[serde(default = "task_workers")]
    pub workers: usize,
    /// Delay added per validator position, in milliseconds.
    #[serde(default = "per_validator_delay")]
    pub per_validator_delay: u64,
    /// Redelivery delay when a prerequisite is missing, in milliseconds.
    #[serde(default = "retry_delay")]
    pub retry_delay: u64,
    /// Redelivery delay for a state-sync already in the mempool, in milliseconds.
    #[serde(default = "state_sync_retry_delay")]
    pub state_sync_retry_delay: u64,
    /// How many times a failing task is retried.
    #[serde(default = "task_retry_count")]
    pub retry_count: u32,
    /// Max state-sync data size, larger payloads are relayed empty.
    #[serde(default = "max_state_sync_size")]
    pub max_state_sync_size: usize,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            workers: task_workers(),
            per_validator_delay: per_validator_delay(),
            retry_delay: retry_delay(),
            state_sync_retry_delay: state_sync_retry_delay(),
            retry_count: task_retry_count(),
            max_state_sync_size: max_state_sync_size(),
        }
    }
}

impl TaskQueueConfig {
    /// The per validator delay as a [`Duration`].
    pub fn per_validator_delay(&self) -> Duration {
        Duration::from_millis(self.per_validator_delay)
    }
}

/// Consensus chain transaction broadcaster configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BroadcasterConfig {
    /// Fees are attached only from this consensus height on.
    #[serde(default)]
    pub fee_start_height: u64,
    /// Fee amount in the smallest unit of `fee-denom`.
    #[serde(default = "fee_amount")]
    pub fee_amount: String,
    /// Fee denom.
    #[serde(default = "fee_denom")]
    pub fee_denom: String,
    /// Gas of a transaction.
    #[serde(default = "tx_gas")]
    pub gas: u64,
    /// `POST /txs` mode.
    #[serde(default = "broadcast_mode")]
    pub mode: String,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            fee_start_height: 0,
            fee_amount: fee_amount(),
            fee_denom: fee_denom(),
            gas: tx_gas(),
            mode: broadcast_mode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_config_files_are_correct() {
        // This walks all the directories inside the root of the config directory
        // and tries to parse the config file(s) inside it.
        let config_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("config");
        let config_dirs =
            glob::glob(config_dir.join("*").to_str().unwrap())
                .expect("Failed to read config directory")
                .filter_map(|p| p.ok())
                .filter(|p| p.is_dir())
                .collect::<Vec<_>>();
        assert!(
            !config_dirs.is_empty(),
            "No config directories found in the config directory"
        );
        for config_subdir in config_dirs {
            // Load the example dot env file.
            let _ = dotenv::from_path(config_subdir.join(".env.example"));
            if let Err(e) = utils::load(&config_subdir) {
                panic!("Failed to parse config file in directory: {config_subdir:?} with error: {e}");
            }
        }
    }

    #[test]
    fn defaults_are_sane() {
        let config = RelayerConfig::default();
        assert_eq!(config.task_queue.per_validator_delay, 10_000);
        assert_eq!(config.self_heal.state_synced_interval, 15 * 60_000);
        assert_eq!(config.root_chain.http_endpoint.port(), Some(9545));
        assert!(config.contracts.watched().is_empty());
        assert!(matches!(
            config.verify(),
            Err(bridge_relayer_utils::Error::MissingSecrets)
        ));
    }
}
