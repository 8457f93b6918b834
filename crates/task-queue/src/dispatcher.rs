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
use std::time::Duration;

use bridge_relayer_context::{RelayerContext, Shutdown};
use bridge_relayer_store::queue::now_millis;
use bridge_relayer_store::{QueueItem, QueueStore};
use bridge_relayer_utils::metric::Metrics;
use bridge_relayer_utils::probe;
use tokio::sync::Notify;

use crate::{RelayTask, TaskOutcome, TaskRegistry};

/// Name of the queue every relay task goes through.
pub const RELAY_TASKS_QUEUE: &str = "relay_tasks";

/// Longest a worker sleeps before looking at the queue again.
const MAX_IDLE: Duration = Duration::from_secs(1);

/// Enqueues relay tasks. Cheap to clone, safe to use from many tasks.
#[derive(Clone)]
pub struct TaskDispatcher<S> {
    store: S,
    metrics: Arc<Metrics>,
    notify: Arc<Notify>,
}

impl<S> std::fmt::Debug for TaskDispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher").finish()
    }
}

impl<S> TaskDispatcher<S>
where
    S: QueueStore<RelayTask> + Clone + Send + Sync + 'static,
{
    /// Creates a dispatcher over `store`.
    pub fn new(store: S, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            metrics,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Enqueues a task that is due right away.
    pub fn send_task(
        &self,
        name: &str,
        args: Vec<String>,
        retry_count: u32,
    ) -> bridge_relayer_utils::Result<u64> {
        self.send_task_with_delay(name, args, retry_count, Duration::ZERO)
    }

    /// Enqueues a task that must not run before `delay` has passed.
    #[tracing::instrument(skip(self, args))]
    pub fn send_task_with_delay(
        &self,
        name: &str,
        args: Vec<String>,
        retry_count: u32,
        delay: Duration,
    ) -> bridge_relayer_utils::Result<u64> {
        let task = RelayTask::new(name, args, retry_count);
        let id = self.enqueue(task, delay)?;
        self.metrics
            .tasks_dispatched
            .with_label_values(&[name])
            .inc();
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TaskQueue,
            task = %name,
            id,
            delay_ms = delay.as_millis() as u64,
            enqueued = true,
        );
        Ok(id)
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> bridge_relayer_utils::Result<usize> {
        self.store.pending_len(RELAY_TASKS_QUEUE)
    }

    fn enqueue(
        &self,
        task: RelayTask,
        delay: Duration,
    ) -> bridge_relayer_utils::Result<u64> {
        let eta = now_millis().saturating_add(delay.as_millis() as u64);
        let id = self
            .store
            .enqueue_item(RELAY_TASKS_QUEUE, QueueItem::with_eta(task, eta))?;
        self.notify.notify_waiters();
        Ok(id)
    }
}

/// A pool of workers running the tasks of a [`TaskDispatcher`].
pub struct TaskWorkerPool<S> {
    dispatcher: TaskDispatcher<S>,
    registry: Arc<TaskRegistry>,
    workers: usize,
    retry_delay: Duration,
}

impl<S> TaskWorkerPool<S>
where
    S: QueueStore<RelayTask> + Clone + Send + Sync + 'static,
{
    /// Creates a pool of `workers` workers. Failed tasks are retried after
    /// `retry_delay`.
    pub fn new(
        dispatcher: TaskDispatcher<S>,
        registry: TaskRegistry,
        workers: usize,
        retry_delay: Duration,
    ) -> Self {
        Self {
            dispatcher,
            registry: Arc::new(registry),
            workers: workers.max(1),
            retry_delay,
        }
    }

    /// Runs the workers until shutdown.
    ///
    /// Tasks left in flight by a previous run are queued again first, and
    /// every worker finishes the task it is running before it stops.
    #[tracing::instrument(skip_all, fields(workers = self.workers))]
    pub async fn run(
        self,
        ctx: &RelayerContext,
    ) -> bridge_relayer_utils::Result<()> {
        let requeued = self
            .dispatcher
            .store
            .requeue_in_flight(RELAY_TASKS_QUEUE)?;
        if requeued > 0 {
            tracing::info!(requeued, "queued tasks left in flight again");
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TaskQueue,
            workers = self.workers,
            tasks = self.registry.len(),
            starting = true,
        );
        let workers = (0..self.workers).map(|n| {
            let worker = Worker {
                n,
                dispatcher: self.dispatcher.clone(),
                registry: self.registry.clone(),
                retry_delay: self.retry_delay,
            };
            tokio::spawn(worker.run(ctx.shutdown_signal()))
        });
        let results = futures::future::join_all(workers).await;
        let mut result = Ok(());
        for r in results {
            match r {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(%e, "task worker failed");
                    result = Err(e);
                }
                Err(e) => {
                    tracing::error!(%e, "task worker panicked");
                    result = Err(bridge_relayer_utils::Error::TaskStoppedAbnormally);
                }
            }
        }
        result
    }
}

struct Worker<S> {
    n: usize,
    dispatcher: TaskDispatcher<S>,
    registry: Arc<TaskRegistry>,
    retry_delay: Duration,
}

impl<S> Worker<S>
where
    S: QueueStore<RelayTask> + Clone + Send + Sync + 'static,
{
    async fn run(self, mut shutdown: Shutdown) -> bridge_relayer_utils::Result<()> {
        let store = &self.dispatcher.store;
        while !shutdown.is_shutdown() {
            let now = now_millis();
            let Some((id, item)) = store.claim_due_item(RELAY_TASKS_QUEUE, now)?
            else {
                let wait = store
                    .next_eta(RELAY_TASKS_QUEUE)?
                    .map(|eta| Duration::from_millis(eta.saturating_sub(now)))
                    .unwrap_or(MAX_IDLE)
                    .clamp(Duration::from_millis(5), MAX_IDLE);
                tokio::select! {
                    _ = shutdown.recv() => {},
                    _ = self.dispatcher.notify.notified() => {},
                    _ = tokio::time::sleep(wait) => {},
                }
                continue;
            };
            let task = item.inner();
            self.execute(&task).await;
            store.ack_item(RELAY_TASKS_QUEUE, id)?;
        }
        tracing::debug!(worker = self.n, "task worker stopped");
        Ok(())
    }

    #[tracing::instrument(
        skip_all,
        fields(worker = self.n, task = %task.name, attempt = task.attempt)
    )]
    async fn execute(&self, task: &RelayTask) {
        let metrics = &self.dispatcher.metrics;
        let label = [task.name.as_str()];
        let Some(handler) = self.registry.get(&task.name) else {
            tracing::error!("no handler registered for task, dropping it");
            metrics.tasks_failed.with_label_values(&label).inc();
            return;
        };
        let outcome = handler.handle_task(&task.args).await;
        let requeue = match outcome {
            TaskOutcome::Ok => {
                metrics.tasks_succeeded.with_label_values(&label).inc();
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::TaskQueue,
                    task = %task.name,
                    done = true,
                );
                None
            }
            TaskOutcome::RetryAfter(delay) => {
                metrics.tasks_retried.with_label_values(&label).inc();
                tracing::debug!(?delay, "task asked to run again later");
                Some((task.clone(), delay))
            }
            TaskOutcome::Fail(e) if task.can_retry() => {
                metrics.tasks_retried.with_label_values(&label).inc();
                tracing::warn!(%e, retry_in = ?self.retry_delay, "task failed, retrying");
                Some((task.next_attempt(), self.retry_delay))
            }
            TaskOutcome::Fail(e) => {
                metrics.tasks_failed.with_label_values(&label).inc();
                tracing::error!(%e, "task failed, out of retries");
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::TaskQueue,
                    task = %task.name,
                    dropped = true,
                );
                None
            }
        };
        if let Some((task, delay)) = requeue {
            // the claimed copy is acked by the caller only after this succeeds.
            if let Err(e) = self.dispatcher.enqueue(task, delay) {
                tracing::error!(%e, "failed to queue the task again");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskHandler;
    use bridge_relayer_config::RelayerConfig;
    use bridge_relayer_store::{InMemoryStore, SledStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers with the scripted outcomes, then `Ok`.
    #[derive(Default)]
    struct Scripted {
        calls: AtomicUsize,
        outcomes: parking_lot::Mutex<Vec<TaskOutcome>>,
        seen: parking_lot::Mutex<Vec<(u64, Vec<String>)>>,
    }

    #[async_trait::async_trait]
    impl TaskHandler for Scripted {
        async fn handle_task(&self, args: &[String]) -> TaskOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push((now_millis(), args.to_vec()));
            let mut outcomes = self.outcomes.lock();
            if outcomes.is_empty() {
                TaskOutcome::Ok
            } else {
                outcomes.remove(0)
            }
        }
    }

    fn context() -> RelayerContext {
        RelayerContext::new(
            RelayerConfig::default(),
            SledStore::temporary().unwrap(),
        )
        .unwrap()
    }

    async fn run_for(
        ctx: &RelayerContext,
        pool: TaskWorkerPool<InMemoryStore>,
        duration: Duration,
    ) {
        let shutdown = {
            let ctx = ctx.clone();
            async move {
                tokio::time::sleep(duration).await;
                ctx.shutdown();
            }
        };
        let (result, ()) = tokio::join!(pool.run(ctx), shutdown);
        result.unwrap();
    }

    fn pool(
        store: &InMemoryStore,
        ctx: &RelayerContext,
        handler: Arc<Scripted>,
    ) -> (TaskDispatcher<InMemoryStore>, TaskWorkerPool<InMemoryStore>) {
        let dispatcher = TaskDispatcher::new(store.clone(), ctx.metrics.clone());
        let mut registry = TaskRegistry::new();
        registry.register("echo", handler);
        let pool = TaskWorkerPool::new(
            dispatcher.clone(),
            registry,
            2,
            Duration::from_millis(20),
        );
        (dispatcher, pool)
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn delayed_task_waits_for_its_eta() {
        let ctx = context();
        let store = InMemoryStore::default();
        let handler = Arc::new(Scripted::default());
        let (dispatcher, pool) = pool(&store, &ctx, handler.clone());
        let sent_at = now_millis();
        dispatcher
            .send_task_with_delay(
                "echo",
                vec!["a".into()],
                3,
                Duration::from_millis(150),
            )
            .unwrap();
        run_for(&ctx, pool, Duration::from_millis(400)).await;
        let seen = handler.seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0 >= sent_at + 150);
        assert_eq!(seen[0].1, vec![String::from("a")]);
        assert_eq!(dispatcher.pending().unwrap(), 0);
    }

    #[tokio::test]
    async fn retry_after_redelivers_without_counting_a_failure() {
        let ctx = context();
        let store = InMemoryStore::default();
        let handler = Arc::new(Scripted::default());
        *handler.outcomes.lock() = vec![
            TaskOutcome::RetryAfter(Duration::from_millis(10)),
            TaskOutcome::RetryAfter(Duration::from_millis(10)),
        ];
        let (dispatcher, pool) = pool(&store, &ctx, handler.clone());
        // no retries allowed, yet RetryAfter still redelivers.
        dispatcher.send_task("echo", vec![], 0).unwrap();
        run_for(&ctx, pool, Duration::from_millis(300)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failures_are_retried_up_to_the_retry_count() {
        let ctx = context();
        let store = InMemoryStore::default();
        let handler = Arc::new(Scripted::default());
        *handler.outcomes.lock() = (0..10)
            .map(|_| TaskOutcome::Fail(bridge_relayer_utils::Error::Generic("boom")))
            .collect();
        let (dispatcher, pool) = pool(&store, &ctx, handler.clone());
        dispatcher.send_task("echo", vec![], 2).unwrap();
        run_for(&ctx, pool, Duration::from_millis(300)).await;
        // first run + 2 retries.
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.pending().unwrap(), 0);
    }

    #[tokio::test]
    async fn in_flight_tasks_survive_a_restart() {
        let ctx = context();
        let store = InMemoryStore::default();
        let handler = Arc::new(Scripted::default());
        let (dispatcher, pool) = pool(&store, &ctx, handler.clone());
        dispatcher.send_task("echo", vec!["x".into()], 0).unwrap();
        // a crashed worker claimed it and never acked.
        let claimed: Option<(u64, QueueItem<RelayTask>)> =
            store.claim_due_item(RELAY_TASKS_QUEUE, now_millis()).unwrap();
        assert!(claimed.is_some());
        assert_eq!(dispatcher.pending().unwrap(), 0);

        run_for(&ctx, pool, Duration::from_millis(100)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tasks_are_dropped() {
        let ctx = context();
        let store = InMemoryStore::default();
        let handler = Arc::new(Scripted::default());
        let (dispatcher, pool) = pool(&store, &ctx, handler.clone());
        dispatcher.send_task("nobody", vec![], 3).unwrap();
        run_for(&ctx, pool, Duration::from_millis(100)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.pending().unwrap(), 0);
    }
}
