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
//! # Relayer Context Module 🕸️
//!
//! A module for managing the context of the relayer.
use std::sync::Arc;
use std::time::Duration;

use ethers::providers::{Http, Provider, Ws};
use ethers::signers::{LocalWallet, Signer};
use tokio::sync::broadcast;

use bridge_relayer_config::{EvmChainConfig, RelayerConfig};
use bridge_relayer_store::SledStore;
use bridge_relayer_utils::metric::Metrics;

/// Which of the two EVM chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvmChain {
    /// The root chain (L1).
    Root,
    /// The child chain (L2).
    Child,
}

impl std::fmt::Display for EvmChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Root => write!(f, "root-chain"),
            Self::Child => write!(f, "child-chain"),
        }
    }
}

/// RelayerContext contains Relayer's configuration and shutdown signal.
#[derive(Clone)]
pub struct RelayerContext {
    /// The configuration of the relayer.
    pub config: RelayerConfig,
    /// Broadcasts a shutdown signal to all active tasks.
    ///
    /// When a task is spawned, it is passed a broadcast receiver handle.
    /// When a graceful shutdown is initiated, a `()` value is sent via
    /// the broadcast::Sender. Each active task receives it, reaches a
    /// safe terminal state, and completes.
    notify_shutdown: broadcast::Sender<()>,
    /// Represents the metrics for the relayer
    pub metrics: Arc<Metrics>,
    store: SledStore,
}

impl RelayerContext {
    /// Creates a new RelayerContext.
    pub fn new(
        config: RelayerConfig,
        store: SledStore,
    ) -> bridge_relayer_utils::Result<Self> {
        let (notify_shutdown, _) = broadcast::channel(2);
        let metrics = Arc::new(Metrics::new()?);
        Ok(Self {
            config,
            notify_shutdown,
            metrics,
            store,
        })
    }
    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }
    /// Sends a shutdown signal to all subscribed tasks.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// Returns the configuration of one of the EVM chains.
    pub fn evm_chain_config(&self, chain: EvmChain) -> &EvmChainConfig {
        match chain {
            EvmChain::Root => &self.config.root_chain,
            EvmChain::Child => &self.config.child_chain,
        }
    }

    /// Returns a new HTTP `Provider` for one of the EVM chains.
    ///
    /// Every request is bounded by the chain's `rpc-timeout`.
    pub fn evm_provider(
        &self,
        chain: EvmChain,
    ) -> bridge_relayer_utils::Result<Provider<Http>> {
        let chain_config = self.evm_chain_config(chain);
        let client = reqwest::Client::builder()
            .timeout(chain_config.rpc_timeout())
            .build()?;
        let http = Http::new_with_client(
            chain_config.http_endpoint.as_url().clone(),
            client,
        );
        let provider =
            Provider::new(http).interval(Duration::from_millis(500u64));
        Ok(provider)
    }

    /// Connects a websocket `Provider` for one of the EVM chains, if the chain
    /// has a `ws-endpoint` configured.
    pub async fn evm_ws_provider(
        &self,
        chain: EvmChain,
    ) -> bridge_relayer_utils::Result<Option<Provider<Ws>>> {
        let chain_config = self.evm_chain_config(chain);
        let Some(endpoint) = chain_config.ws_endpoint.as_ref() else {
            return Ok(None);
        };
        let provider = Provider::<Ws>::connect(endpoint.as_str()).await?;
        Ok(Some(provider))
    }

    /// Sets up and returns the validator wallet, bound to the chain id of
    /// `chain`.
    pub fn evm_wallet(
        &self,
        chain: EvmChain,
    ) -> bridge_relayer_utils::Result<LocalWallet> {
        let private_key = self
            .config
            .private_key
            .as_ref()
            .ok_or(bridge_relayer_utils::Error::MissingSecrets)?;
        let chain_id = self.evm_chain_config(chain).chain_id;
        let wallet = private_key.wallet()?.with_chain_id(chain_id);
        Ok(wallet)
    }

    /// Returns an HTTP client for the consensus chain REST API.
    pub fn consensus_http_client(
        &self,
    ) -> bridge_relayer_utils::Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(
                self.config.consensus.request_timeout,
            ))
            .build()?;
        Ok(client)
    }

    /// Returns a reference to the store.
    pub fn store(&self) -> &SledStore {
        &self.store
    }
}

/// Listens for the relayer shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value is
/// ever sent. Once a value has been sent via the broadcast channel, every task
/// should stop.
///
/// The `Shutdown` struct listens for the signal and tracks that the signal has
/// been received. Callers may query for whether the shutdown signal has been
/// received or not.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Returns `true` if the shutdown signal has been received.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.shutdown = true;
    }
}
