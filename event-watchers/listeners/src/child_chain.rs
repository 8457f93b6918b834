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
use bridge_relayer_processors::tasks;
use bridge_relayer_store::QueueStore;
use bridge_relayer_task_queue::{RelayTask, TaskDispatcher};
use tokio::sync::mpsc;

/// Hands every new child chain head to the checkpoint processor.
pub struct ChildChainListener<S> {
    client: Arc<dyn EvmClient>,
    dispatcher: TaskDispatcher<S>,
    retry_count: u32,
}

impl<S> std::fmt::Debug for ChildChainListener<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildChainListener").finish()
    }
}

impl<S> ChildChainListener<S>
where
    S: QueueStore<RelayTask> + Clone + Send + Sync + 'static,
{
    pub fn new(
        client: Arc<dyn EvmClient>,
        dispatcher: TaskDispatcher<S>,
        retry_count: u32,
    ) -> Self {
        Self {
            client,
            dispatcher,
            retry_count,
        }
    }
}

#[async_trait::async_trait]
impl<S> Listener for ChildChainListener<S>
where
    S: QueueStore<RelayTask> + Clone + Send + Sync + 'static,
{
    const TAG: &'static str = "Child Chain Listener";
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
        tracing::debug!(hash = ?header.hash, "new child chain header");
        let args = vec![
            String::from("newHeader"),
            serde_json::to_string(&header)?,
        ];
        self.dispatcher
            .send_task(tasks::SEND_CHECKPOINT, args, self.retry_count)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::drain;
    use bridge_relayer_chain_client::mock::MockEvmClient;
    use bridge_relayer_event_watcher_traits::ListenerHandle;
    use bridge_relayer_store::InMemoryStore;
    use bridge_relayer_utils::metric::Metrics;
    use std::time::Duration;

    #[tokio::test]
    async fn subscribed_heads_become_checkpoint_tasks() {
        let client = MockEvmClient::default();
        client.extend_to(5, 1_700_000_000);
        let (tx, rx) = mpsc::channel(4);
        client.set_subscription(rx);
        let store = InMemoryStore::default();
        let metrics = Arc::new(Metrics::new().unwrap());
        let dispatcher = TaskDispatcher::new(store.clone(), metrics.clone());
        let listener = Arc::new(ChildChainListener::new(
            Arc::new(client.clone()),
            dispatcher,
            tasks::DEFAULT_RETRY_COUNT,
        ));
        let (_notify, shutdown) = tokio::sync::broadcast::channel(1);
        let handle = ListenerHandle::start(
            listener,
            Duration::from_secs(3600),
            bridge_relayer_context::Shutdown::new(shutdown),
            metrics,
        );
        let head = client.state().headers[&5];
        tx.send(head).await.unwrap();
        for _ in 0..100 {
            if QueueStore::<RelayTask>::pending_len(&store, bridge_relayer_task_queue::RELAY_TASKS_QUEUE).unwrap() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.stop();
        handle.join().await.unwrap();

        let queued = drain(&store);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0, tasks::SEND_CHECKPOINT);
        assert_eq!(queued[0].2[0], "newHeader");
        let relayed: ChainHeader = serde_json::from_str(&queued[0].2[1]).unwrap();
        assert_eq!(relayed, head);
    }
}
