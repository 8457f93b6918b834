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

//! Reconciles the consensus chain against the root chain.
//!
//! Two passes run on their own timers. The state-sync pass walks every
//! state-sync id the root chain emitted but the consensus chain has no event
//! record for, in order. The stake pass compares, for every validator, the
//! last staking nonce on both chains. Missing events are fed through the
//! same [`EventRouter`] the root chain listener uses, so they are deduplicated
//! and delayed like any other event.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bridge_relayer_chain_client::events::{StakeUpdate, StateSynced};
use bridge_relayer_chain_client::{
    ConsensusClient, EvmClient, IndexedLog, IndexerClient, RootChainContracts,
};
use bridge_relayer_config::SelfHealConfig;
use bridge_relayer_context::Shutdown;
use bridge_relayer_store::QueueStore;
use bridge_relayer_task_queue::RelayTask;
use bridge_relayer_utils::metric::Metrics;
use bridge_relayer_utils::probe;
use bridge_relayer_utils::retry::{
    ConstantWithMaxRetryCount, ExponentialWithMaxRetryCount,
};
use ethers::contract::EthEvent;
use ethers::types::{Address, Filter, Log, H256};
use futures::TryFutureExt;

use crate::EventRouter;

/// Blocks per backward scan step.
const SCAN_WINDOW: u64 = 1000;
/// Backward scan steps before giving up.
const SCAN_MAX_ITERATIONS: u64 = 100;
/// Retries of a failed event lookup.
const FETCH_RETRIES: usize = 3;

/// Where the reconciler looks up root chain events.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Id of the last state-sync on the root chain.
    async fn latest_state_id(&self) -> bridge_relayer_utils::Result<u64>;

    /// The `StateSynced` log with `id`.
    async fn state_synced(
        &self,
        id: u64,
    ) -> bridge_relayer_utils::Result<Option<Log>>;

    /// Nonce of the last staking event of `validator_id` on the root chain.
    async fn latest_stake_update_nonce(
        &self,
        validator_id: u64,
    ) -> bridge_relayer_utils::Result<u64>;

    /// The `StakeUpdate` log of `validator_id` with `nonce`.
    async fn stake_update(
        &self,
        validator_id: u64,
        nonce: u64,
    ) -> bridge_relayer_utils::Result<Option<Log>>;
}

/// Looks events up through an indexer, then reads the log out of the
/// transaction receipt.
pub struct IndexerSource {
    indexer: Arc<dyn IndexerClient>,
    root_chain: Arc<dyn EvmClient>,
}

impl IndexerSource {
    pub fn new(indexer: Arc<dyn IndexerClient>, root_chain: Arc<dyn EvmClient>) -> Self {
        Self { indexer, root_chain }
    }

    async fn resolve(
        &self,
        at: Option<IndexedLog>,
    ) -> bridge_relayer_utils::Result<Option<Log>> {
        let Some(at) = at else {
            return Ok(None);
        };
        let Some(receipt) = self.root_chain.receipt(at.tx_hash).await? else {
            tracing::warn!(tx_hash = ?at.tx_hash, "indexed transaction has no receipt");
            return Ok(None);
        };
        let log_index = Some(at.log_index.into());
        Ok(receipt.logs.into_iter().find(|l| l.log_index == log_index))
    }
}

#[async_trait::async_trait]
impl EventSource for IndexerSource {
    async fn latest_state_id(&self) -> bridge_relayer_utils::Result<u64> {
        self.indexer.latest_state_id().await
    }

    async fn state_synced(
        &self,
        id: u64,
    ) -> bridge_relayer_utils::Result<Option<Log>> {
        let at = self.indexer.state_sync(id).await?;
        self.resolve(at).await
    }

    async fn latest_stake_update_nonce(
        &self,
        validator_id: u64,
    ) -> bridge_relayer_utils::Result<u64> {
        self.indexer.latest_stake_update_nonce(validator_id).await
    }

    async fn stake_update(
        &self,
        validator_id: u64,
        nonce: u64,
    ) -> bridge_relayer_utils::Result<Option<Log>> {
        let at = self.indexer.stake_update(validator_id, nonce).await?;
        self.resolve(at).await
    }
}

/// Reads the latest ids from the contracts and scans the root chain
/// backwards from its head for the logs.
pub struct LogScanSource {
    root_chain: Arc<dyn EvmClient>,
    contracts: Arc<dyn RootChainContracts>,
    state_sender: Address,
    staking_info: Address,
}

impl LogScanSource {
    pub fn new(
        root_chain: Arc<dyn EvmClient>,
        contracts: Arc<dyn RootChainContracts>,
        state_sender: Address,
        staking_info: Address,
    ) -> Self {
        Self {
            root_chain,
            contracts,
            state_sender,
            staking_info,
        }
    }

    /// Newest log matching `filter` whose topics start with `topics`,
    /// searched backwards from the head one window at a time.
    async fn scan(
        &self,
        filter: Filter,
        topics: &[H256],
    ) -> bridge_relayer_utils::Result<Option<Log>> {
        let mut to = self.root_chain.latest_header().await?.number;
        for _ in 0..SCAN_MAX_ITERATIONS {
            let from = to.saturating_sub(SCAN_WINDOW - 1);
            let window = filter.clone().from_block(from).to_block(to);
            let logs = self.root_chain.logs(&window).await?;
            let found = logs.into_iter().rev().find(|log| {
                log.topics.len() >= topics.len()
                    && log.topics[..topics.len()] == *topics
            });
            if found.is_some() {
                return Ok(found);
            }
            if from == 0 {
                break;
            }
            to = from - 1;
        }
        tracing::debug!(?topics, "event not found within the scan depth");
        Ok(None)
    }
}

#[async_trait::async_trait]
impl EventSource for LogScanSource {
    async fn latest_state_id(&self) -> bridge_relayer_utils::Result<u64> {
        self.contracts.latest_state_id().await
    }

    async fn state_synced(
        &self,
        id: u64,
    ) -> bridge_relayer_utils::Result<Option<Log>> {
        let topics = [StateSynced::signature(), H256::from_low_u64_be(id)];
        let filter = Filter::new()
            .address(self.state_sender)
            .topic0(topics[0])
            .topic1(topics[1]);
        self.scan(filter, &topics).await
    }

    async fn latest_stake_update_nonce(
        &self,
        validator_id: u64,
    ) -> bridge_relayer_utils::Result<u64> {
        self.contracts.validator_nonce(validator_id).await
    }

    async fn stake_update(
        &self,
        validator_id: u64,
        nonce: u64,
    ) -> bridge_relayer_utils::Result<Option<Log>> {
        let topics = [
            StakeUpdate::signature(),
            H256::from_low_u64_be(validator_id),
            H256::from_low_u64_be(nonce),
        ];
        let filter = Filter::new()
            .address(self.staking_info)
            .topic0(topics[0])
            .topic1(topics[1])
            .topic2(topics[2]);
        self.scan(filter, &topics).await
    }
}

/// The self-healing reconciler.
pub struct SelfHeal<S> {
    consensus: Arc<dyn ConsensusClient>,
    root_chain: Arc<dyn EvmClient>,
    source: Arc<dyn EventSource>,
    router: Arc<EventRouter<S>>,
    metrics: Arc<Metrics>,
    config: SelfHealConfig,
    fetch_interval: Duration,
    confirm_interval: Duration,
    confirm_attempts: usize,
}

impl<S> std::fmt::Debug for SelfHeal<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfHeal")
            .field("config", &self.config)
            .finish()
    }
}

/// What a pass did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Healed {
    /// Queued to run after the delay.
    Relayed(Duration),
    /// Not found, too young or not confirmed. Tried again next pass.
    Deferred,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl<S> SelfHeal<S>
where
    S: QueueStore<RelayTask> + Clone + Send + Sync + 'static,
{
    pub fn new(
        consensus: Arc<dyn ConsensusClient>,
        root_chain: Arc<dyn EvmClient>,
        source: Arc<dyn EventSource>,
        router: Arc<EventRouter<S>>,
        metrics: Arc<Metrics>,
        config: SelfHealConfig,
    ) -> Self {
        Self {
            consensus,
            root_chain,
            source,
            router,
            metrics,
            config,
            fetch_interval: Duration::from_secs(1),
            confirm_interval: Duration::from_secs(1),
            confirm_attempts: 15,
        }
    }

    /// Overrides how often and how long a relayed event is polled for on the
    /// consensus chain.
    pub fn with_confirmation(mut self, interval: Duration, attempts: usize) -> Self {
        self.confirm_interval = interval;
        self.fetch_interval = interval;
        self.confirm_attempts = attempts;
        self
    }

    /// Runs both passes on their timers until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: Shutdown) {
        let mut state_syncs = tokio::time::interval(Duration::from_millis(
            self.config.state_synced_interval,
        ));
        let mut stake_updates = tokio::time::interval(Duration::from_millis(
            self.config.stake_update_interval,
        ));
        for ticker in [&mut state_syncs, &mut stake_updates] {
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            loop_name = "self-heal",
            started = true,
        );
        loop {
            tokio::select! {
                _ = state_syncs.tick() => {
                    if let Err(e) = self.heal_state_syncs().await {
                        tracing::error!(%e, "state-sync self-heal pass failed");
                    }
                }
                _ = stake_updates.tick() => {
                    if let Err(e) = self.heal_stake_updates().await {
                        tracing::error!(%e, "stake update self-heal pass failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("self-heal stopped");
                    break;
                }
            }
        }
    }

    /// Calls `op` with exponential backoff.
    async fn fetch<T, F, Fut>(&self, op: F) -> bridge_relayer_utils::Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bridge_relayer_utils::Result<T>>,
    {
        let backoff =
            ExponentialWithMaxRetryCount::new(self.fetch_interval, FETCH_RETRIES);
        let task = || {
            op().map_err(|e| {
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Retry,
                    error = %e,
                    "self-heal lookup"
                );
                backoff::Error::transient(e)
            })
        };
        backoff::future::retry(backoff, task).await
    }

    /// Waits out the task `delay`, then polls `landed` until it holds or the
    /// attempts run out.
    async fn confirm<F, Fut>(&self, delay: Duration, landed: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bridge_relayer_utils::Result<bool>>,
    {
        tokio::time::sleep(delay).await;
        let backoff = ConstantWithMaxRetryCount::new(
            self.confirm_interval,
            self.confirm_attempts,
        );
        let task = || async {
            match landed().await {
                Ok(true) => Ok(()),
                Ok(false) => Err(backoff::Error::transient(
                    bridge_relayer_utils::Error::Generic("not committed yet"),
                )),
                Err(e) => Err(backoff::Error::transient(e)),
            }
        };
        backoff::future::retry(backoff, task).await.is_ok()
    }

    /// Whether `log` is older than the max depth duration. Younger events
    /// are left to the root chain listener.
    async fn old_enough(&self, log: &Log) -> bridge_relayer_utils::Result<bool> {
        let Some(number) = log.block_number.map(|n| n.as_u64()) else {
            return Ok(false);
        };
        let Some(header) = self.root_chain.header_by_number(number).await? else {
            tracing::warn!(block = number, "block of the event not found");
            return Ok(false);
        };
        let age = unix_now().saturating_sub(header.timestamp);
        Ok(age.saturating_mul(1000) >= self.config.max_depth_duration)
    }

    /// Routes a fetched event, unless it is missing or too young.
    async fn relay(&self, log: Option<Log>) -> bridge_relayer_utils::Result<Healed> {
        let Some(log) = log else {
            return Ok(Healed::Deferred);
        };
        if !self.old_enough(&log).await? {
            tracing::debug!(block = ?log.block_number, "event too young, left to the listener");
            return Ok(Healed::Deferred);
        }
        match self.router.route(&log).await? {
            Some(routed) => Ok(Healed::Relayed(routed.delay)),
            None => Ok(Healed::Deferred),
        }
    }

    /// Relays every state-sync the consensus chain misses, in id order.
    ///
    /// The pass stops at the first id that cannot be relayed and confirmed,
    /// the next pass starts over from it.
    #[tracing::instrument(skip_all)]
    pub async fn heal_state_syncs(&self) -> bridge_relayer_utils::Result<()> {
        let root_latest = self.source.latest_state_id().await?;
        let consensus_latest = self.consensus.latest_event_record_id().await?;
        tracing::debug!(root_latest, consensus_latest, "state-sync ids");
        let mut missing = 0u64;
        for id in consensus_latest.saturating_add(1)..=root_latest {
            if self.consensus.event_record(id).await?.is_some() {
                continue;
            }
            missing += 1;
            self.metrics.self_heal_missing_state_syncs.inc();
            let log = match self.fetch(|| self.source.state_synced(id)).await {
                Ok(log) => log,
                Err(e) => {
                    tracing::warn!(%e, id, "failed to fetch the state-sync");
                    break;
                }
            };
            let Healed::Relayed(delay) = self.relay(log).await? else {
                tracing::info!(id, "state-sync not relayed, retrying next pass");
                break;
            };
            let landed = self
                .confirm(delay, || async {
                    let record = self.consensus.event_record(id).await?;
                    Ok::<_, bridge_relayer_utils::Error>(record.is_some())
                })
                .await;
            if !landed {
                tracing::warn!(id, "state-sync not committed in time, retrying next pass");
                break;
            }
            tracing::info!(id, "✅ state-sync healed");
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::SelfHeal,
            pass = "state-sync",
            missing,
        );
        Ok(())
    }

    /// Relays the next staking event of every validator whose nonce lags
    /// behind the root chain.
    #[tracing::instrument(skip_all)]
    pub async fn heal_stake_updates(&self) -> bridge_relayer_utils::Result<()> {
        let set = self.consensus.validator_set().await?;
        let passes = set
            .validators
            .iter()
            .map(|v| self.heal_validator(v.id, v.nonce));
        let results = futures::future::join_all(passes).await;
        let mut missing = 0u64;
        for result in results {
            match result {
                Ok(true) => missing += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(%e, "stake update self-heal failed"),
            }
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::SelfHeal,
            pass = "stake-update",
            missing,
        );
        Ok(())
    }

    /// Returns whether the validator was behind.
    async fn heal_validator(
        &self,
        validator_id: u64,
        nonce: u64,
    ) -> bridge_relayer_utils::Result<bool> {
        let root_nonce = self.source.latest_stake_update_nonce(validator_id).await?;
        if root_nonce <= nonce {
            return Ok(false);
        }
        self.metrics.self_heal_missing_stake_updates.inc();
        let next = nonce + 1;
        tracing::info!(validator_id, nonce = next, root_nonce, "missing stake update");
        let log = self.fetch(|| self.source.stake_update(validator_id, next)).await?;
        let Healed::Relayed(delay) = self.relay(log).await? else {
            return Ok(true);
        };
        let landed = self
            .confirm(delay, || async {
                let validator = self.consensus.validator(validator_id).await?;
                Ok::<_, bridge_relayer_utils::Error>(validator.nonce >= next)
            })
            .await;
        if landed {
            tracing::info!(validator_id, nonce = next, "✅ stake update healed");
        } else {
            tracing::warn!(validator_id, nonce = next, "stake update not committed in time");
        }
        Ok(true)
    }
}
