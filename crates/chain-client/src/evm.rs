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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ethers::providers::{Http, Middleware, Provider, Ws};
use ethers::types::{
    Block, BlockNumber, Filter, Log, TransactionReceipt, H256,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The part of a block header the relayer cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainHeader {
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    /// Unix seconds.
    pub timestamp: u64,
    pub transactions_root: H256,
    pub receipts_root: H256,
    /// Set when the header was fetched with the `finalized` tag.
    #[serde(default)]
    pub finalized: bool,
}

impl ChainHeader {
    /// Builds a header out of an RPC block, `None` for pending blocks.
    pub fn from_block<T>(block: &Block<T>, finalized: bool) -> Option<Self> {
        Some(Self {
            number: block.number?.as_u64(),
            hash: block.hash?,
            parent_hash: block.parent_hash,
            timestamp: block.timestamp.low_u64(),
            transactions_root: block.transactions_root,
            receipts_root: block.receipts_root,
            finalized,
        })
    }
}

/// JSON-RPC access to an EVM chain.
#[async_trait::async_trait]
pub trait EvmClient: Send + Sync {
    /// The `latest` head.
    async fn latest_header(&self) -> bridge_relayer_utils::Result<ChainHeader>;

    /// The `finalized` head, `None` when the chain does not support the tag.
    async fn finalized_header(
        &self,
    ) -> bridge_relayer_utils::Result<Option<ChainHeader>>;

    /// Header of block `number`.
    async fn header_by_number(
        &self,
        number: u64,
    ) -> bridge_relayer_utils::Result<Option<ChainHeader>>;

    /// Logs matching `filter`.
    async fn logs(&self, filter: &Filter) -> bridge_relayer_utils::Result<Vec<Log>>;

    /// Receipt of transaction `tx_hash`.
    async fn receipt(
        &self,
        tx_hash: H256,
    ) -> bridge_relayer_utils::Result<Option<TransactionReceipt>>;

    /// Subscribes to new heads, `None` when the client can only poll.
    ///
    /// The channel is closed when the subscription ends.
    async fn subscribe_headers(
        &self,
    ) -> bridge_relayer_utils::Result<Option<mpsc::Receiver<ChainHeader>>> {
        Ok(None)
    }

    /// The `finalized` head where available, `latest` otherwise.
    async fn head(&self) -> bridge_relayer_utils::Result<ChainHeader> {
        match self.finalized_header().await {
            Ok(Some(header)) => Ok(header),
            Ok(None) => self.latest_header().await,
            Err(e) => {
                tracing::debug!(%e, "finalized head unavailable, using latest");
                self.latest_header().await
            }
        }
    }
}

#[async_trait::async_trait]
impl<T: EvmClient + ?Sized> EvmClient for Arc<T> {
    async fn latest_header(&self) -> bridge_relayer_utils::Result<ChainHeader> {
        T::latest_header(self).await
    }

    async fn finalized_header(
        &self,
    ) -> bridge_relayer_utils::Result<Option<ChainHeader>> {
        T::finalized_header(self).await
    }

    async fn header_by_number(
        &self,
        number: u64,
    ) -> bridge_relayer_utils::Result<Option<ChainHeader>> {
        T::header_by_number(self, number).await
    }

    async fn logs(&self, filter: &Filter) -> bridge_relayer_utils::Result<Vec<Log>> {
        T::logs(self, filter).await
    }

    async fn receipt(
        &self,
        tx_hash: H256,
    ) -> bridge_relayer_utils::Result<Option<TransactionReceipt>> {
        T::receipt(self, tx_hash).await
    }

    async fn subscribe_headers(
        &self,
    ) -> bridge_relayer_utils::Result<Option<mpsc::Receiver<ChainHeader>>> {
        T::subscribe_headers(self).await
    }
}

/// [`EvmClient`] over an ethers HTTP provider, with an optional websocket
/// provider for head subscriptions.
#[derive(Debug, Clone)]
pub struct EthersEvmClient {
    provider: Arc<Provider<Http>>,
    ws: Option<Arc<Provider<Ws>>>,
    finalized_supported: Arc<AtomicBool>,
}

impl EthersEvmClient {
    /// Creates a new client.
    pub fn new(provider: Provider<Http>, ws: Option<Provider<Ws>>) -> Self {
        Self {
            provider: Arc::new(provider),
            ws: ws.map(Arc::new),
            finalized_supported: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The underlying HTTP provider.
    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    async fn header_at(
        &self,
        tag: BlockNumber,
    ) -> bridge_relayer_utils::Result<Option<ChainHeader>> {
        let block = self.provider.get_block(tag).await?;
        let finalized = matches!(tag, BlockNumber::Finalized);
        Ok(block.and_then(|b| ChainHeader::from_block(&b, finalized)))
    }
}

#[async_trait::async_trait]
impl EvmClient for EthersEvmClient {
    async fn latest_header(&self) -> bridge_relayer_utils::Result<ChainHeader> {
        self.header_at(BlockNumber::Latest).await?.ok_or(
            bridge_relayer_utils::Error::Generic("latest block is missing"),
        )
    }

    async fn finalized_header(
        &self,
    ) -> bridge_relayer_utils::Result<Option<ChainHeader>> {
        if !self.finalized_supported.load(Ordering::Relaxed) {
            return Ok(None);
        }
        match self.header_at(BlockNumber::Finalized).await {
            Ok(header) => Ok(header),
            Err(e) => {
                // pre-merge nodes reject the tag, stop asking.
                tracing::warn!(%e, "finalized tag is not supported, falling back to latest");
                self.finalized_supported.store(false, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn header_by_number(
        &self,
        number: u64,
    ) -> bridge_relayer_utils::Result<Option<ChainHeader>> {
        self.header_at(BlockNumber::Number(number.into())).await
    }

    async fn logs(&self, filter: &Filter) -> bridge_relayer_utils::Result<Vec<Log>> {
        let logs = self.provider.get_logs(filter).await?;
        Ok(logs)
    }

    async fn receipt(
        &self,
        tx_hash: H256,
    ) -> bridge_relayer_utils::Result<Option<TransactionReceipt>> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
        Ok(receipt)
    }

    async fn subscribe_headers(
        &self,
    ) -> bridge_relayer_utils::Result<Option<mpsc::Receiver<ChainHeader>>> {
        let Some(ws) = self.ws.clone() else {
            return Ok(None);
        };
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut stream = match ws.subscribe_blocks().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(%e, "failed to subscribe to new heads");
                    return;
                }
            };
            while let Some(block) = stream.next().await {
                let Some(header) = ChainHeader::from_block(&block, false) else {
                    continue;
                };
                if tx.send(header).await.is_err() {
                    break;
                }
            }
            tracing::warn!("new heads subscription ended");
        });
        Ok(Some(rx))
    }
}
