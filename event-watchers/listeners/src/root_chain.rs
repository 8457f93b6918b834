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

use std::sync::Arc;

use bridge_relayer_chain_client::{ChainHeader, EvmClient};
use bridge_relayer_event_watcher_traits::Listener;
use bridge_relayer_store::{CursorStore, QueueStore};
use bridge_relayer_task_queue::RelayTask;
use bridge_relayer_types::ROOT_CHAIN_CURSOR;
use bridge_relayer_utils::metric::Metrics;
use bridge_relayer_utils::probe;
use ethers::types::{Address, Filter};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::EventRouter;

/// An inclusive block range of root chain logs to relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub from: u64,
    pub to: u64,
}

/// The highest block of `header` deep enough to relay, `None` while the chain
/// is shorter than the confirmation count.
pub fn confirmed_head(header: &ChainHeader, confirmations: u64) -> Option<u64> {
    if header.finalized {
        return Some(header.number);
    }
    if header.number <= confirmations {
        return None;
    }
    Some(header.number - confirmations)
}

/// The next window to relay.
///
/// `retry_from` is the start of a window whose log query failed; it is
/// covered again before moving on. Without a cursor the listener starts at
/// the confirmed head.
pub fn next_window(
    cursor: Option<u64>,
    retry_from: Option<u64>,
    confirmed: u64,
) -> Option<Window> {
    if retry_from.is_none() && cursor.is_some_and(|c| c >= confirmed) {
        return None;
    }
    let from = match (retry_from, cursor) {
        (Some(from), _) => from,
        (None, Some(cursor)) => cursor + 1,
        (None, None) => confirmed,
    };
    Some(Window {
        from,
        to: confirmed.max(from),
    })
}

/// Relays the logs of the watched root chain contracts, once they are
/// confirmed.
pub struct RootChainListener<S, C> {
    client: Arc<dyn EvmClient>,
    store: C,
    router: Arc<EventRouter<S>>,
    contracts: Vec<Address>,
    confirmations: u64,
    metrics: Arc<Metrics>,
    retry_from: Mutex<Option<u64>>,
}

impl<S, C> std::fmt::Debug for RootChainListener<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootChainListener")
            .field("contracts", &self.contracts)
            .field("confirmations", &self.confirmations)
            .finish()
    }
}

impl<S, C> RootChainListener<S, C>
where
    S: QueueStore<RelayTask> + Clone + Send + Sync + 'static,
    C: CursorStore + 'static,
{
    pub fn new(
        client: Arc<dyn EvmClient>,
        store: C,
        router: Arc<EventRouter<S>>,
        contracts: Vec<Address>,
        confirmations: u64,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            store,
            router,
            contracts,
            confirmations,
            metrics,
            retry_from: Mutex::new(None),
        }
    }

    /// Fetches and routes the logs of `window`. The cursor is already past
    /// the window when this runs, so any failure hands the window back for
    /// another try. Logs routed before the failure are routed again then.
    async fn relay(&self, window: Window) -> bridge_relayer_utils::Result<usize> {
        let filter = Filter::new()
            .address(self.contracts.clone())
            .topic0(self.router.signatures())
            .from_block(window.from)
            .to_block(window.to);
        let logs = self.client.logs(&filter).await?;
        let mut routed = 0;
        for log in &logs {
            match self.router.route(log).await {
                Ok(Some(_)) => routed += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(%e, tx_hash = ?log.transaction_hash, "failed to route event");
                    return Err(e);
                }
            }
        }
        Ok(routed)
    }
}

#[async_trait::async_trait]
impl<S, C> Listener for RootChainListener<S, C>
where
    S: QueueStore<RelayTask> + Clone + Send + Sync + 'static,
    C: CursorStore + 'static,
{
    const TAG: &'static str = "Root Chain Listener";
    type Header = ChainHeader;

    async fn head(&self) -> bridge_relayer_utils::Result<ChainHeader> {
        self.client.head().await
    }

    async fn subscribe(
        &self,
    ) -> bridge_relayer_utils::Result<Option<mpsc::Receiver<ChainHeader>>> {
        self.client.subscribe_headers().await
    }

    #[tracing::instrument(skip_all, fields(block = header.number))]
    async fn process_header(
        &self,
        header: ChainHeader,
    ) -> bridge_relayer_utils::Result<()> {
        let Some(confirmed) = confirmed_head(&header, self.confirmations) else {
            tracing::trace!("chain shorter than the confirmation count");
            return Ok(());
        };
        let cursor = self.store.get_last_block_number(ROOT_CHAIN_CURSOR)?;
        let retry_from = *self.retry_from.lock();
        let Some(window) = next_window(cursor, retry_from, confirmed) else {
            return Ok(());
        };
        self.store.set_last_block_number(ROOT_CHAIN_CURSOR, window.to)?;
        match self.relay(window).await {
            Ok(routed) => {
                *self.retry_from.lock() = None;
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Sync,
                    listener = Self::TAG,
                    from = window.from,
                    to = window.to,
                    routed,
                );
                Ok(())
            }
            Err(e) => {
                *self.retry_from.lock() = Some(window.from);
                self.metrics.listener_back_off.inc();
                tracing::warn!(%e, from = window.from, to = window.to, "failed to relay the window, retrying it");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::{at, drain, me, router};
    use bridge_relayer_chain_client::mock::{
        state_synced_log, MockConsensusClient, MockEvmClient,
    };
    use bridge_relayer_processors::tasks;
    use bridge_relayer_store::InMemoryStore;

    fn header(number: u64) -> ChainHeader {
        ChainHeader {
            number,
            ..Default::default()
        }
    }

    fn listener() -> (
        MockEvmClient,
        MockConsensusClient,
        InMemoryStore,
        RootChainListener<InMemoryStore, InMemoryStore>,
    ) {
        let (consensus, queue, router) = router(1);
        let client = MockEvmClient::default();
        let cursors = InMemoryStore::default();
        let listener = RootChainListener::new(
            Arc::new(client.clone()),
            cursors,
            Arc::new(router),
            vec![Address::repeat_byte(0x11)],
            6,
            Arc::new(Metrics::new().unwrap()),
        );
        (client, consensus, queue, listener)
    }

    #[test]
    fn shallow_chains_are_skipped() {
        assert_eq!(confirmed_head(&header(6), 6), None);
        assert_eq!(confirmed_head(&header(7), 6), Some(1));
        let finalized = ChainHeader {
            finalized: true,
            ..header(3)
        };
        assert_eq!(confirmed_head(&finalized, 6), Some(3));
    }

    #[test]
    fn windows_follow_the_cursor() {
        assert_eq!(next_window(None, None, 100), Some(Window { from: 100, to: 100 }));
        assert_eq!(next_window(Some(90), None, 100), Some(Window { from: 91, to: 100 }));
        assert_eq!(next_window(Some(100), None, 100), None);
        assert_eq!(next_window(Some(120), None, 100), None);
        // a failed window is covered again, together with what came after it.
        assert_eq!(next_window(Some(100), Some(91), 110), Some(Window { from: 91, to: 110 }));
        assert_eq!(next_window(Some(100), Some(101), 100), Some(Window { from: 101, to: 101 }));
    }

    #[tokio::test]
    async fn cursor_never_goes_backwards_and_leaves_no_gaps() {
        let (client, _, _, listener) = listener();
        client.extend_to(200, 0);
        let heads = [106, 110, 108, 150, 150, 156];
        for head in heads {
            listener.process_header(header(head)).await.unwrap();
        }
        let queries = client.state().log_queries.clone();
        assert_eq!(queries, vec![(100, 100), (101, 104), (105, 144), (145, 150)]);
        assert_eq!(
            listener.store.get_last_block_number(ROOT_CHAIN_CURSOR).unwrap(),
            Some(150)
        );
    }

    #[tokio::test]
    async fn failed_queries_are_retried_with_a_wider_window() {
        let (client, _, queue, listener) = listener();
        client.extend_to(200, 0);
        client.add_log(state_synced_log(at(103, 1, 0), 1, me(), vec![]));
        listener.process_header(header(106)).await.unwrap();
        client.state().failing_log_queries = 1;
        listener.process_header(header(110)).await.unwrap();
        assert!(drain(&queue).is_empty());
        listener.process_header(header(112)).await.unwrap();
        let queries = client.state().log_queries.clone();
        assert_eq!(queries, vec![(100, 100), (101, 104), (101, 106)]);
        let queued = drain(&queue);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0, tasks::SEND_STATE_SYNCED);
        assert!(listener.metrics.listener_back_off.get() >= 1.0);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn events_that_fail_to_route_are_retried() {
        let (client, consensus, queue, listener) = listener();
        client.extend_to(200, 0);
        client.add_log(state_synced_log(at(103, 1, 0), 1, me(), vec![]));
        listener.process_header(header(106)).await.unwrap();
        consensus.state().failing_validator_set = 1;
        listener.process_header(header(110)).await.unwrap();
        assert!(drain(&queue).is_empty());
        for head in [112, 120, 150] {
            listener.process_header(header(head)).await.unwrap();
        }
        let queries = client.state().log_queries.clone();
        assert_eq!(queries, vec![(100, 100), (101, 104), (101, 106), (107, 114), (115, 144)]);
        let queued = drain(&queue);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0, tasks::SEND_STATE_SYNCED);
        assert_eq!(listener.metrics.listener_back_off.get() as u64, 1);
    }

    #[tokio::test]
    async fn state_sync_at_block_100_becomes_one_task() {
        let (client, _, queue, listener) = listener();
        client.extend_to(106, 0);
        client.add_log(state_synced_log(at(100, 1, 0), 5, me(), vec![0xab]));
        listener.process_header(header(106)).await.unwrap();
        assert_eq!(client.state().log_queries, vec![(100, 100)]);
        let queued = drain(&queue);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0, tasks::SEND_STATE_SYNCED);
        assert_eq!(queued[0].2[0], "StateSynced");
    }
}
