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

use bridge_relayer_chain_client::ConsensusClient;
use bridge_relayer_event_watcher_traits::Listener;
use bridge_relayer_processors::tasks;
use bridge_relayer_store::{CursorStore, QueueStore};
use bridge_relayer_task_queue::{RelayTask, TaskDispatcher};
use bridge_relayer_types::consensus::TxResponse;
use bridge_relayer_types::CONSENSUS_CHAIN_CURSOR;
use bridge_relayer_utils::probe;

/// Page size of the checkpoint tx search.
const PAGE_LIMIT: u64 = 50;

/// Finds committed checkpoint transactions on the consensus chain and hands
/// them to the root chain submitter.
pub struct ConsensusChainListener<S, C> {
    client: Arc<dyn ConsensusClient>,
    store: C,
    dispatcher: TaskDispatcher<S>,
    retry_count: u32,
}

impl<S, C> std::fmt::Debug for ConsensusChainListener<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusChainListener").finish()
    }
}

impl<S, C> ConsensusChainListener<S, C>
where
    S: QueueStore<RelayTask> + Clone + Send + Sync + 'static,
    C: CursorStore + 'static,
{
    pub fn new(
        client: Arc<dyn ConsensusClient>,
        store: C,
        dispatcher: TaskDispatcher<S>,
        retry_count: u32,
    ) -> Self {
        Self {
            client,
            store,
            dispatcher,
            retry_count,
        }
    }

    /// Every checkpoint tx committed in `[from, to]`.
    async fn checkpoint_txs(
        &self,
        from: u64,
        to: u64,
    ) -> bridge_relayer_utils::Result<Vec<TxResponse>> {
        let query = [
            ("message.action", String::from("checkpoint")),
            ("tx.minheight", from.to_string()),
            ("tx.maxheight", to.to_string()),
        ];
        let mut txs = Vec::new();
        let mut page = 1;
        loop {
            let result = self.client.search_txs(&query, page, PAGE_LIMIT).await?;
            let full = result.txs.len() as u64 >= PAGE_LIMIT;
            txs.extend(result.txs);
            if !full {
                break;
            }
            page += 1;
        }
        Ok(txs)
    }
}

fn is_checkpoint(tx: &TxResponse) -> bool {
    tx.code == 0 && tx.events().any(|e| e.kind == "checkpoint")
}

#[async_trait::async_trait]
impl<S, C> Listener for ConsensusChainListener<S, C>
where
    S: QueueStore<RelayTask> + Clone + Send + Sync + 'static,
    C: CursorStore + 'static,
{
    const TAG: &'static str = "Consensus Chain Listener";
    type Header = u64;

    async fn head(&self) -> bridge_relayer_utils::Result<u64> {
        self.client.latest_height().await
    }

    #[tracing::instrument(skip_all, fields(height = height))]
    async fn process_header(&self, height: u64) -> bridge_relayer_utils::Result<()> {
        let Some(cursor) = self.store.get_last_block_number(CONSENSUS_CHAIN_CURSOR)?
        else {
            tracing::info!("no consensus chain cursor, starting at the current height");
            self.store.set_last_block_number(CONSENSUS_CHAIN_CURSOR, height)?;
            return Ok(());
        };
        let from = cursor + 1;
        if from > height {
            return Ok(());
        }
        let txs = self.checkpoint_txs(from, height).await?;
        let mut found = 0;
        for tx in txs.iter().filter(|tx| is_checkpoint(tx)) {
            tracing::info!(txhash = %tx.txhash, height = tx.height, "✅ checkpoint committed on the consensus chain");
            let args = vec![String::from("checkpoint"), serde_json::to_string(tx)?];
            self.dispatcher.send_task(
                tasks::SEND_CHECKPOINT_TO_ROOT_CHAIN,
                args,
                self.retry_count,
            )?;
            found += 1;
        }
        self.store.set_last_block_number(CONSENSUS_CHAIN_CURSOR, height)?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Sync,
            listener = Self::TAG,
            from,
            to = height,
            checkpoints = found,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::drain;
    use bridge_relayer_chain_client::mock::MockConsensusClient;
    use bridge_relayer_store::InMemoryStore;
    use bridge_relayer_types::consensus::{AbciMessageLog, Attribute, StringEvent};
    use bridge_relayer_utils::metric::Metrics;

    fn checkpoint_tx(txhash: &str, start: u64, end: u64) -> TxResponse {
        let attribute = |key: &str, value: u64| Attribute {
            key: key.to_string(),
            value: value.to_string(),
        };
        TxResponse {
            height: 10,
            txhash: txhash.to_string(),
            logs: vec![AbciMessageLog {
                msg_index: 0,
                events: vec![StringEvent {
                    kind: String::from("checkpoint"),
                    attributes: vec![
                        attribute("start-block", start),
                        attribute("end-block", end),
                    ],
                }],
            }],
            ..Default::default()
        }
    }

    fn listener() -> (
        MockConsensusClient,
        InMemoryStore,
        ConsensusChainListener<InMemoryStore, InMemoryStore>,
    ) {
        let client = MockConsensusClient::default();
        let queue = InMemoryStore::default();
        let dispatcher =
            TaskDispatcher::new(queue.clone(), Arc::new(Metrics::new().unwrap()));
        let listener = ConsensusChainListener::new(
            Arc::new(client.clone()),
            InMemoryStore::default(),
            dispatcher,
            tasks::DEFAULT_RETRY_COUNT,
        );
        (client, queue, listener)
    }

    #[tokio::test]
    async fn first_run_starts_at_the_current_height() {
        let (client, queue, listener) = listener();
        client.state().checkpoint_txs.push(checkpoint_tx("AA", 0, 255));
        listener.process_header(10).await.unwrap();
        assert!(drain(&queue).is_empty());
        assert_eq!(
            listener.store.get_last_block_number(CONSENSUS_CHAIN_CURSOR).unwrap(),
            Some(10)
        );
    }

    #[tokio::test]
    async fn committed_checkpoints_are_submitted() {
        let (client, queue, listener) = listener();
        listener.store.set_last_block_number(CONSENSUS_CHAIN_CURSOR, 5).unwrap();
        {
            let mut state = client.state();
            state.checkpoint_txs.push(checkpoint_tx("AA", 0, 255));
            state.checkpoint_txs.push(TxResponse {
                code: 5,
                ..checkpoint_tx("BB", 256, 511)
            });
        }
        listener.process_header(12).await.unwrap();
        let queued = drain(&queue);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0, tasks::SEND_CHECKPOINT_TO_ROOT_CHAIN);
        let tx: TxResponse = serde_json::from_str(&queued[0].2[1]).unwrap();
        assert_eq!(tx.txhash, "AA");
        assert_eq!(
            listener.store.get_last_block_number(CONSENSUS_CHAIN_CURSOR).unwrap(),
            Some(12)
        );
        // the same height again is a no-op.
        listener.process_header(12).await.unwrap();
        assert!(drain(&queue).is_empty());
    }
}
