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
//! # Relay Processors ⚙️
//!
//! The handlers behind every relay task, and the timers that propose
//! checkpoints, no-acks, spans and milestones.
//!
//! Every validator runs the same handlers for the same events, so each
//! handler first asks the consensus chain whether the event was already
//! relayed and returns early when it was. Handlers never assume they run
//! once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bridge_relayer_chain_client::{
    ChildChainContracts, ConsensusClient, EvmClient, RootChainContracts,
};
use bridge_relayer_config::RelayerConfig;
use bridge_relayer_context::Shutdown;
use bridge_relayer_task_queue::{TaskHandler, TaskOutcome, TaskRegistry};
use bridge_relayer_tx_broadcaster::TxBroadcaster;
use bridge_relayer_utils::probe;
use ethers::types::Address;

mod event;
mod merkle;

/// Checkpoints, acks and no-acks.
pub mod checkpoint;
/// State-sync records.
pub mod clerk;
/// Fee top-ups.
pub mod fee;
/// Milestones and milestone timeouts.
pub mod milestone;
/// Slashing ticks and unjails.
pub mod slashing;
/// Span proposals and backfills.
pub mod span;
/// Validator joins, stake updates, signer changes and exits.
pub mod staking;
/// Names of the relay tasks.
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_utils;

pub use checkpoint::CheckpointProcessor;
pub use clerk::ClerkProcessor;
pub use event::EventPosition;
pub use fee::FeeProcessor;
pub use merkle::root_hash;
pub use milestone::MilestoneProcessor;
pub use slashing::SlashingProcessor;
pub use span::SpanProcessor;
pub use staking::StakingProcessor;

/// Everything a processor reads from or writes to.
#[derive(Clone)]
pub struct ProcessorContext {
    /// The consensus chain.
    pub consensus: Arc<dyn ConsensusClient>,
    /// The child chain, for block headers.
    pub child_chain: Arc<dyn EvmClient>,
    /// The child chain system contracts.
    pub child_contracts: Arc<dyn ChildChainContracts>,
    /// Both broadcaster lanes.
    pub broadcaster: Arc<TxBroadcaster>,
    /// The relayer configuration.
    pub config: Arc<RelayerConfig>,
}

impl std::fmt::Debug for ProcessorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorContext")
            .field("me", &self.me())
            .finish()
    }
}

impl ProcessorContext {
    /// The address of the local validator.
    pub fn me(&self) -> Address {
        self.broadcaster.consensus.address()
    }

    /// The root chain contracts.
    pub fn root_contracts(&self) -> &Arc<dyn RootChainContracts> {
        self.broadcaster.root_chain.contracts()
    }

    /// The child chain id as known by the consensus chain.
    pub fn bor_chain_id(&self) -> String {
        self.config.consensus.bor_chain_id.clone()
    }
}

/// A set of relay tasks handled by one type.
#[async_trait::async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Name used in logs.
    const NAME: &'static str;
    /// The task names this processor handles.
    const TASKS: &'static [&'static str];

    /// Handles one delivery of `task`.
    async fn handle(&self, task: &str, args: &[String]) -> TaskOutcome;
}

struct Route<P> {
    processor: Arc<P>,
    task: &'static str,
}

#[async_trait::async_trait]
impl<P: Processor> TaskHandler for Route<P> {
    async fn handle_task(&self, args: &[String]) -> TaskOutcome {
        self.processor.handle(self.task, args).await
    }
}

/// Registers every task of `processor`.
pub fn register<P: Processor>(processor: Arc<P>, registry: &mut TaskRegistry) {
    for task in P::TASKS {
        registry.register(
            *task,
            Arc::new(Route {
                processor: processor.clone(),
                task: *task,
            }),
        );
    }
    tracing::debug!(processor = P::NAME, tasks = P::TASKS.len(), "registered tasks");
}

/// Runs `tick` every `interval` until shutdown. A failing tick is logged and
/// the loop carries on.
pub async fn run_every<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: Shutdown,
    mut tick: F,
) where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = bridge_relayer_utils::Result<()>> + Send,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        loop_name = name,
        started = true,
    );
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = tick().await {
                    tracing::error!(%e, loop_name = name, "proposal loop tick failed");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!(loop_name = name, "polling stopped");
                break;
            }
        }
    }
}

/// Unix seconds.
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
