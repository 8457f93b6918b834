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
//! # Relayer Listener Traits 🕸️
//!
//! A module that drives chain listeners.
//!
//! ## Overview
//!
//! A [`Listener`] knows how to fetch the head of its chain and what to do
//! with a new head. The [`ListenerHandle`] runs it: either by following a
//! push subscription of new heads, or by polling the head on a fixed
//! interval. Heads flow through a channel of capacity one into a separate
//! header-processing task, so a slow handler never runs twice at the same
//! time; ticks that fire while it is busy are dropped.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use bridge_relayer_context::Shutdown;
use bridge_relayer_utils::metric::Metrics;
use bridge_relayer_utils::probe;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// A chain listener.
#[async_trait::async_trait]
pub trait Listener: Send + Sync + 'static {
    /// A Helper tag used to identify the listener during the logs.
    const TAG: &'static str;
    /// The head this listener reacts to.
    type Header: Debug + Send + 'static;

    /// Name of the listener, used in logs.
    fn name(&self) -> &str {
        Self::TAG
    }

    /// Fetches the current head of the chain.
    async fn head(&self) -> bridge_relayer_utils::Result<Self::Header>;

    /// Subscribes to new heads. `None` means the chain only supports polling.
    async fn subscribe(
        &self,
    ) -> bridge_relayer_utils::Result<Option<mpsc::Receiver<Self::Header>>> {
        Ok(None)
    }

    /// Handles one head. Runs to completion before the next head is handled.
    async fn process_header(
        &self,
        header: Self::Header,
    ) -> bridge_relayer_utils::Result<()>;
}

/// A running listener.
#[derive(Debug)]
pub struct ListenerHandle {
    name: String,
    stop: broadcast::Sender<()>,
    task: JoinHandle<bridge_relayer_utils::Result<()>>,
    outcome: Option<bridge_relayer_utils::Result<()>>,
}

impl ListenerHandle {
    /// Starts `listener`, polling every `poll_interval` unless the chain
    /// offers a subscription.
    ///
    /// The listener stops on [`ListenerHandle::stop`] or when `shutdown`
    /// fires, whichever comes first.
    pub fn start<L: Listener>(
        listener: Arc<L>,
        poll_interval: Duration,
        shutdown: Shutdown,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (stop, _) = broadcast::channel(1);
        let name = listener.name().to_owned();
        let task = tokio::spawn(run(
            listener,
            poll_interval,
            shutdown,
            stop.clone(),
            metrics,
        ));
        Self {
            name,
            stop,
            task,
            outcome: None,
        }
    }

    /// Name of the running listener.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals both the head producer and the header-processing task to stop.
    /// A header being processed is handled to completion.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }

    /// Waits for the listener to finish, keeping the handle. Cancel safe.
    pub async fn stopped(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let outcome = match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(listener = %self.name, %e, "listener task failed");
                Err(bridge_relayer_utils::Error::TaskStoppedAbnormally)
            }
        };
        self.outcome = Some(outcome);
    }

    /// Waits for the listener to finish.
    ///
    /// Returns an error when the subscription broke, or the task panicked.
    pub async fn join(mut self) -> bridge_relayer_utils::Result<()> {
        self.stopped().await;
        self.outcome.unwrap_or(Ok(()))
    }
}

/// Resolves once either the local stop or the process shutdown fires.
async fn stopped(shutdown: &mut Shutdown, stop: &mut broadcast::Receiver<()>) {
    tokio::select! {
        _ = shutdown.recv() => {},
        _ = stop.recv() => {},
    }
}

#[tracing::instrument(skip_all, fields(listener = %listener.name()))]
async fn run<L: Listener>(
    listener: Arc<L>,
    poll_interval: Duration,
    mut shutdown: Shutdown,
    stop: broadcast::Sender<()>,
    metrics: Arc<Metrics>,
) -> bridge_relayer_utils::Result<()> {
    let (tx, rx) = mpsc::channel::<L::Header>(1);
    let processor = tokio::spawn(process_headers(
        listener.clone(),
        rx,
        stop.subscribe(),
    ));
    let mut stop_rx = stop.subscribe();

    let subscription = match listener.subscribe().await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%e, "failed to subscribe to new heads, polling instead");
            None
        }
    };
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        listener = %listener.name(),
        started = true,
        subscribed = subscription.is_some(),
    );

    let result = match subscription {
        Some(mut heads) => loop {
            tokio::select! {
                _ = stopped(&mut shutdown, &mut stop_rx) => break Ok(()),
                head = heads.recv() => match head {
                    Some(head) => {
                        if tx.send(head).await.is_err() {
                            break Ok(());
                        }
                    }
                    None => {
                        tracing::error!("head subscription closed");
                        break Err(bridge_relayer_utils::Error::ForceRestart);
                    }
                },
            }
        },
        None => {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(
                tokio::time::MissedTickBehavior::Delay,
            );
            loop {
                tokio::select! {
                    _ = stopped(&mut shutdown, &mut stop_rx) => break Ok(()),
                    _ = ticker.tick() => {},
                }
                let head = match listener.head().await {
                    Ok(head) => head,
                    Err(e) => {
                        metrics.listener_back_off.inc();
                        tracing::warn!(%e, "failed to fetch the chain head");
                        continue;
                    }
                };
                match tx.try_send(head) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(head)) => {
                        tracing::trace!(?head, "still processing the previous head");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break Ok(()),
                }
            }
        }
    };

    // the processor drains its current header and exits.
    let _ = stop.send(());
    drop(tx);
    if let Err(e) = processor.await {
        tracing::error!(%e, "header processing task failed");
    }
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        listener = %listener.name(),
        stopped = true,
    );
    result
}

async fn process_headers<L: Listener>(
    listener: Arc<L>,
    mut heads: mpsc::Receiver<L::Header>,
    mut stop: broadcast::Receiver<()>,
) {
    loop {
        let head = tokio::select! {
            _ = stop.recv() => break,
            head = heads.recv() => match head {
                Some(head) => head,
                None => break,
            },
        };
        tracing::trace!(?head, "processing head");
        if let Err(e) = listener.process_header(head).await {
            tracing::error!(listener = %listener.name(), %e, "failed to process head");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Default)]
    struct SlowListener {
        head: AtomicU64,
        busy: AtomicBool,
        overlapped: AtomicBool,
        processed: std::sync::Mutex<Vec<u64>>,
        subscription: tokio::sync::Mutex<Option<mpsc::Receiver<u64>>>,
    }

    #[async_trait::async_trait]
    impl Listener for SlowListener {
        const TAG: &'static str = "Slow Listener";
        type Header = u64;

        async fn head(&self) -> bridge_relayer_utils::Result<u64> {
            Ok(self.head.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn subscribe(
            &self,
        ) -> bridge_relayer_utils::Result<Option<mpsc::Receiver<u64>>> {
            Ok(self.subscription.lock().await.take())
        }

        async fn process_header(
            &self,
            header: u64,
        ) -> bridge_relayer_utils::Result<()> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.processed.lock().unwrap().push(header);
            self.busy.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn shutdown() -> (broadcast::Sender<()>, Shutdown) {
        let (tx, rx) = broadcast::channel(1);
        (tx, Shutdown::new(rx))
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn polling_never_overlaps() {
        let listener = Arc::new(SlowListener::default());
        let (_tx, shutdown) = shutdown();
        let metrics = Arc::new(Metrics::new().unwrap());
        let handle = ListenerHandle::start(
            listener.clone(),
            Duration::from_millis(5),
            shutdown,
            metrics,
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop();
        handle.join().await.unwrap();

        assert!(!listener.overlapped.load(Ordering::SeqCst));
        let seen = listener.processed.lock().unwrap().clone();
        assert!(!seen.is_empty());
        // far fewer heads were processed than ticks fired.
        assert!((seen.len() as u64) < listener.head.load(Ordering::SeqCst));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn subscription_delivers_in_order_and_reports_closure() {
        let (heads_tx, heads_rx) = mpsc::channel(8);
        let listener = Arc::new(SlowListener {
            subscription: tokio::sync::Mutex::new(Some(heads_rx)),
            ..Default::default()
        });
        let (_tx, shutdown) = shutdown();
        let metrics = Arc::new(Metrics::new().unwrap());
        let mut handle = ListenerHandle::start(
            listener.clone(),
            Duration::from_secs(3600),
            shutdown,
            metrics,
        );
        for n in [7u64, 8, 9] {
            heads_tx.send(n).await.unwrap();
        }
        drop(heads_tx);
        handle.stopped().await;
        assert!(matches!(
            handle.join().await,
            Err(bridge_relayer_utils::Error::ForceRestart)
        ));
        // 9 may be dropped once the subscription closes, 7 and 8 never are.
        let seen = listener.processed.lock().unwrap().clone();
        assert!(seen == [7, 8] || seen == [7, 8, 9], "{seen:?}");
        // nothing was polled.
        assert_eq!(listener.head.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn process_shutdown_stops_the_listener() {
        let listener = Arc::new(SlowListener::default());
        let (tx, shutdown) = shutdown();
        let metrics = Arc::new(Metrics::new().unwrap());
        let handle = ListenerHandle::start(
            listener,
            Duration::from_millis(5),
            shutdown,
            metrics,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .unwrap()
            .unwrap();
    }
}
