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

//! # Relayer Service Module 🕸️
//!
//! A module for starting long-running tasks for event watching.
//!
//! ## Overview
//!
//! Services are tasks which the relayer constantly runs throughout its
//! lifetime: the three chain listeners, the task workers, the proposal loops
//! and the self-healing reconciler.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bridge_relayer_chain_client::{
    ChildChainContracts, ConsensusClient, EthersChildChainContracts,
    EthersEvmClient, EthersRootChainContracts, EvmClient, GraphQlIndexer,
    IndexerClient, RestConsensusClient, RootChainAddresses, RootChainContracts,
};
use bridge_relayer_context::{EvmChain, RelayerContext};
use bridge_relayer_event_watcher_traits::ListenerHandle;
use bridge_relayer_listeners::{
    ChildChainListener, ConsensusChainListener, EventRouter, EventSource,
    IndexerSource, LogScanSource, RootChainListener, SelfHeal,
};
use bridge_relayer_processors::{
    register, CheckpointProcessor, ClerkProcessor, FeeProcessor,
    MilestoneProcessor, ProcessorContext, SlashingProcessor, SpanProcessor,
    StakingProcessor,
};
use bridge_relayer_task_queue::{TaskDispatcher, TaskRegistry, TaskWorkerPool};
use bridge_relayer_tx_broadcaster::{
    ConsensusBroadcaster, RootChainBroadcaster, TxBroadcaster,
};
use bridge_relayer_utils::probe;
use tokio::task::JoinHandle;

/// The chain clients every service runs against.
#[derive(Clone)]
pub struct Clients {
    /// The consensus chain REST and tendermint RPC.
    pub consensus: Arc<dyn ConsensusClient>,
    /// The root chain RPC.
    pub root_chain: Arc<dyn EvmClient>,
    /// The child chain RPC.
    pub child_chain: Arc<dyn EvmClient>,
    /// The root chain contracts.
    pub root_contracts: Arc<dyn RootChainContracts>,
    /// The child chain system contracts.
    pub child_contracts: Arc<dyn ChildChainContracts>,
    /// The self-heal indexer, if one is configured.
    pub indexer: Option<Arc<dyn IndexerClient>>,
}

impl std::fmt::Debug for Clients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clients")
            .field("indexer", &self.indexer.is_some())
            .finish()
    }
}

impl Clients {
    /// Connects to every chain of the configuration.
    ///
    /// Websocket endpoints are optional, listeners poll without them.
    pub async fn connect(ctx: &RelayerContext) -> crate::Result<Self> {
        let config = &ctx.config;
        let root_provider = ctx.evm_provider(EvmChain::Root)?;
        let child_provider = ctx.evm_provider(EvmChain::Child)?;
        let root_ws = ctx.evm_ws_provider(EvmChain::Root).await?;
        let child_ws = ctx.evm_ws_provider(EvmChain::Child).await?;
        let root_chain = EthersEvmClient::new(root_provider, root_ws);
        let child_chain = EthersEvmClient::new(child_provider, child_ws);
        let wallet = ctx.evm_wallet(EvmChain::Root)?;
        let root_contracts = EthersRootChainContracts::new(
            root_chain.provider(),
            Some(wallet),
            RootChainAddresses {
                root_chain: config.contracts.root_chain,
                state_sender: config.contracts.state_sender,
                staking_info: config.contracts.staking_info,
            },
            config.checkpoint.main_chain_gas_limit,
            config.checkpoint.main_chain_max_gas_price,
        );
        let child_contracts = EthersChildChainContracts::new(
            child_chain.provider(),
            config.contracts.child_validator_set,
        );
        let http = ctx.consensus_http_client()?;
        let consensus = RestConsensusClient::new(
            http.clone(),
            config.consensus.rest_endpoint.clone(),
            config.consensus.tendermint_endpoint.clone(),
        );
        let indexer = config.self_heal.indexer_url.as_ref().map(|url| {
            Arc::new(GraphQlIndexer::new(
                http.clone(),
                url.as_url().clone(),
                config.self_heal.indexer_body_limit,
            )) as Arc<dyn IndexerClient>
        });
        tracing::debug!(
            root_chain = %config.root_chain.http_endpoint.as_url(),
            child_chain = %config.child_chain.http_endpoint.as_url(),
            consensus = %config.consensus.rest_endpoint.as_url(),
            indexer = indexer.is_some(),
            "connected chain clients"
        );
        Ok(Self {
            consensus: Arc::new(consensus),
            root_chain: Arc::new(root_chain),
            child_chain: Arc::new(child_chain),
            root_contracts: Arc::new(root_contracts),
            child_contracts: Arc::new(child_contracts),
            indexer,
        })
    }
}

/// Builds the context every processor shares, with both broadcaster lanes
/// signing as the configured validator.
pub fn processor_context(
    ctx: &RelayerContext,
    clients: &Clients,
) -> crate::Result<ProcessorContext> {
    let wallet = ctx.evm_wallet(EvmChain::Root)?;
    let broadcaster = TxBroadcaster {
        consensus: ConsensusBroadcaster::new(
            clients.consensus.clone(),
            wallet,
            ctx.config.consensus.chain_id.clone(),
            ctx.config.broadcaster.clone(),
            ctx.metrics.clone(),
        ),
        root_chain: RootChainBroadcaster::new(
            clients.root_contracts.clone(),
            ctx.metrics.clone(),
        ),
    };
    Ok(ProcessorContext {
        consensus: clients.consensus.clone(),
        child_chain: clients.child_chain.clone(),
        child_contracts: clients.child_contracts.clone(),
        broadcaster: Arc::new(broadcaster),
        config: Arc::new(ctx.config.clone()),
    })
}

/// The processors with a timer loop next to their task handlers.
struct Processors {
    checkpoint: Arc<CheckpointProcessor>,
    span: Arc<SpanProcessor>,
    milestone: Arc<MilestoneProcessor>,
}

/// Registers the task handlers of every processor.
fn task_registry(pctx: &ProcessorContext) -> (TaskRegistry, Processors) {
    let mut registry = TaskRegistry::new();
    let checkpoint = Arc::new(CheckpointProcessor::new(pctx.clone()));
    register(checkpoint.clone(), &mut registry);
    register(Arc::new(ClerkProcessor::new(pctx.clone())), &mut registry);
    register(Arc::new(StakingProcessor::new(pctx.clone())), &mut registry);
    register(Arc::new(FeeProcessor::new(pctx.clone())), &mut registry);
    register(Arc::new(SlashingProcessor::new(pctx.clone())), &mut registry);
    let processors = Processors {
        checkpoint,
        span: Arc::new(SpanProcessor::new(pctx.clone())),
        milestone: Arc::new(MilestoneProcessor::new(pctx.clone())),
    };
    (registry, processors)
}

/// The running services of the relayer.
#[derive(Debug)]
pub struct Services {
    listeners: Vec<ListenerHandle>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Services {
    /// Number of running listeners.
    pub fn listeners(&self) -> usize {
        self.listeners.len()
    }

    /// Resolves with the name of the first listener that stops while the
    /// relayer is still running. Never resolves without listeners.
    pub async fn listener_stopped(&mut self) -> String {
        if self.listeners.is_empty() {
            return std::future::pending().await;
        }
        let waits = self.listeners.iter_mut().map(|l| Box::pin(l.stopped()));
        let (_, index, pending) = futures::future::select_all(waits).await;
        drop(pending);
        self.listeners[index].name().to_owned()
    }

    /// Runs the services until `signal` resolves or a listener stops on its
    /// own, then shuts every service down and waits for them.
    ///
    /// Returns [`Error::ForceRestart`](crate::Error::ForceRestart) when a
    /// listener stopped, since the relayer cannot follow that chain anymore.
    pub async fn supervise(
        mut self,
        ctx: &RelayerContext,
        signal: impl Future<Output = ()>,
    ) -> crate::Result<()> {
        let stopped = tokio::select! {
            _ = signal => None,
            name = self.listener_stopped() => Some(name),
        };
        if let Some(name) = &stopped {
            tracing::error!(listener = %name, "listener stopped, restarting the relayer");
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            shutdown = true
        );
        tracing::warn!("Shutting down...");
        // send shutdown signal to all of the application.
        ctx.shutdown();
        // every service finishes the task it is running before it stops.
        self.join().await;
        match stopped {
            Some(_) => Err(crate::Error::ForceRestart),
            None => Ok(()),
        }
    }

    /// Waits for every service to stop, usually after
    /// [`RelayerContext::shutdown`].
    pub async fn join(self) {
        for listener in self.listeners {
            let name = listener.name().to_owned();
            if let Err(e) = listener.join().await {
                tracing::error!(%e, listener = %name, "listener stopped abnormally");
            }
        }
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(%e, service = name, "service task failed");
            }
        }
    }
}

/// Starts all background services.
///
/// Returns once every service is spawned; the services run until
/// [`RelayerContext::shutdown`].
///
/// # Arguments
///
/// * `ctx` - RelayContext reference that holds the configuration and store
/// * `clients` - the chain clients the services run against
pub async fn ignite(
    ctx: &RelayerContext,
    clients: Clients,
) -> crate::Result<Services> {
    tracing::trace!(
        "Relayer configuration: {}",
        serde_json::to_string_pretty(&ctx.config)?
    );
    let config = &ctx.config;
    let store = ctx.store().clone();
    let dispatcher = TaskDispatcher::new(store.clone(), ctx.metrics.clone());
    let pctx = processor_context(ctx, &clients)?;
    let me = pctx.me();
    let retry_count = config.task_queue.retry_count;
    tracing::info!(validator = ?me, "Starting the relayer services");

    let mut tasks = Vec::new();
    let (registry, processors) = task_registry(&pctx);
    let pool = TaskWorkerPool::new(
        dispatcher.clone(),
        registry,
        config.task_queue.workers,
        Duration::from_millis(config.task_queue.retry_delay),
    );
    let pool_ctx = ctx.clone();
    tasks.push((
        "task workers",
        tokio::spawn(async move {
            if let Err(e) = pool.run(&pool_ctx).await {
                tracing::error!(%e, "task workers stopped");
            }
        }),
    ));

    let router = Arc::new(EventRouter::new(
        clients.consensus.clone(),
        dispatcher.clone(),
        me,
        config.task_queue.per_validator_delay(),
        retry_count,
    ));
    let root_chain = RootChainListener::new(
        clients.root_chain.clone(),
        store.clone(),
        router.clone(),
        config.contracts.watched(),
        config.root_chain.confirmations,
        ctx.metrics.clone(),
    );
    let child_chain = ChildChainListener::new(
        clients.child_chain.clone(),
        dispatcher.clone(),
        retry_count,
    );
    let consensus_chain = ConsensusChainListener::new(
        clients.consensus.clone(),
        store,
        dispatcher,
        retry_count,
    );
    let listeners = vec![
        ListenerHandle::start(
            Arc::new(root_chain),
            config.root_chain.poll_interval(),
            ctx.shutdown_signal(),
            ctx.metrics.clone(),
        ),
        ListenerHandle::start(
            Arc::new(child_chain),
            config.child_chain.poll_interval(),
            ctx.shutdown_signal(),
            ctx.metrics.clone(),
        ),
        ListenerHandle::start(
            Arc::new(consensus_chain),
            config.consensus.poll_interval(),
            ctx.shutdown_signal(),
            ctx.metrics.clone(),
        ),
    ];

    let Processors {
        checkpoint,
        span,
        milestone,
    } = processors;
    tasks.push((
        "no-ack",
        tokio::spawn(checkpoint.run_no_ack(ctx.shutdown_signal())),
    ));
    tasks.push(("span", tokio::spawn(span.run(ctx.shutdown_signal()))));
    tasks.push((
        "milestone",
        tokio::spawn(milestone.clone().run(ctx.shutdown_signal())),
    ));
    tasks.push((
        "milestone timeout",
        tokio::spawn(milestone.run_timeout(ctx.shutdown_signal())),
    ));

    if config.self_heal.enabled {
        let source: Arc<dyn EventSource> = match clients.indexer.clone() {
            Some(indexer) => {
                tracing::info!("self-heal looks events up through the indexer");
                Arc::new(IndexerSource::new(indexer, clients.root_chain.clone()))
            }
            None => {
                tracing::info!("self-heal scans root chain logs");
                Arc::new(LogScanSource::new(
                    clients.root_chain.clone(),
                    clients.root_contracts.clone(),
                    config.contracts.state_sender,
                    config.contracts.staking_info,
                ))
            }
        };
        let self_heal = Arc::new(SelfHeal::new(
            clients.consensus.clone(),
            clients.root_chain.clone(),
            source,
            router,
            ctx.metrics.clone(),
            config.self_heal.clone(),
        ));
        tasks.push((
            "self-heal",
            tokio::spawn(self_heal.run(ctx.shutdown_signal())),
        ));
    }

    Ok(Services { listeners, tasks })
}
