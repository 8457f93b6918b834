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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bridge_relayer_chain_client::events::{
    signer_of_pubkey, NewHeaderBlock, SignerChange, Slashed, StakeUpdate,
    Staked, StateSynced, TopUpFee, UnJailed, UnstakeInit,
};
use bridge_relayer_chain_client::{validator, ConsensusClient};
use bridge_relayer_processors::tasks;
use bridge_relayer_store::QueueStore;
use bridge_relayer_task_queue::{RelayTask, TaskDispatcher};
use ethers::contract::{EthEvent, EthLogDecode};
use ethers::types::{Address, Bytes, Log, H256};

/// How the delay of a routed event is picked.
#[derive(Clone, Copy)]
enum DelayRule {
    /// Our validator delay.
    Validator,
    /// One interval if the joining signer is us, our validator delay plus
    /// one interval otherwise.
    Join(fn(&Log) -> Option<Bytes>),
    /// No delay if we sent the event for this validator id.
    Sender(fn(&Log) -> Option<u64>),
    /// No delay if the new signer key is ours.
    OwnSigner(fn(&Log) -> Option<Bytes>),
    /// No delay if the event is about our address.
    OwnAddress(fn(&Log) -> Option<Address>),
}

/// One entry of the routing table.
#[derive(Clone, Copy)]
struct Route {
    event: &'static str,
    task: &'static str,
    rule: DelayRule,
}

fn decode<E: EthLogDecode>(log: &Log) -> Option<E> {
    match ethers::contract::parse_log::<E>(log.clone()) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::error!(%e, tx_hash = ?log.transaction_hash, "error while parsing event");
            None
        }
    }
}

/// The routing table, keyed by event signature.
fn routes() -> HashMap<H256, Route> {
    let table = [
        (
            NewHeaderBlock::signature(),
            Route {
                event: "NewHeaderBlock",
                task: tasks::SEND_CHECKPOINT_ACK,
                rule: DelayRule::Validator,
            },
        ),
        (
            Staked::signature(),
            Route {
                event: "Staked",
                task: tasks::SEND_VALIDATOR_JOIN,
                rule: DelayRule::Join(|log| {
                    decode::<Staked>(log).map(|e| e.signer_pubkey)
                }),
            },
        ),
        (
            StakeUpdate::signature(),
            Route {
                event: "StakeUpdate",
                task: tasks::SEND_STAKE_UPDATE,
                rule: DelayRule::Sender(|log| {
                    decode::<StakeUpdate>(log).map(|e| e.validator_id.low_u64())
                }),
            },
        ),
        (
            SignerChange::signature(),
            Route {
                event: "SignerChange",
                task: tasks::SEND_SIGNER_CHANGE,
                rule: DelayRule::OwnSigner(|log| {
                    decode::<SignerChange>(log).map(|e| e.signer_pubkey)
                }),
            },
        ),
        (
            UnstakeInit::signature(),
            Route {
                event: "UnstakeInit",
                task: tasks::SEND_UNSTAKE_INIT,
                rule: DelayRule::Sender(|log| {
                    decode::<UnstakeInit>(log).map(|e| e.validator_id.low_u64())
                }),
            },
        ),
        (
            StateSynced::signature(),
            Route {
                event: "StateSynced",
                task: tasks::SEND_STATE_SYNCED,
                rule: DelayRule::Validator,
            },
        ),
        (
            TopUpFee::signature(),
            Route {
                event: "TopUpFee",
                task: tasks::SEND_TOP_UP_FEE,
                rule: DelayRule::OwnAddress(|log| {
                    decode::<TopUpFee>(log).map(|e| e.user)
                }),
            },
        ),
        (
            Slashed::signature(),
            Route {
                event: "Slashed",
                task: tasks::SEND_TICK_ACK,
                rule: DelayRule::Validator,
            },
        ),
        (
            UnJailed::signature(),
            Route {
                event: "UnJailed",
                task: tasks::SEND_UNJAIL,
                rule: DelayRule::Sender(|log| {
                    decode::<UnJailed>(log).map(|e| e.validator_id.low_u64())
                }),
            },
        ),
    ];
    table.into_iter().collect()
}

/// A task enqueued for a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routed {
    pub task: &'static str,
    /// How long the task waits in the queue before it may run.
    pub delay: Duration,
}

/// When a routed task may run.
enum Delay {
    Fixed(Duration),
    /// Our validator delay plus the extra.
    Validator(Duration),
}

/// Turns root chain logs into relay tasks.
///
/// Each known event maps to exactly one task. Validators stagger their tasks
/// by their position in the validator set, unless the event is their own.
pub struct EventRouter<S> {
    consensus: Arc<dyn ConsensusClient>,
    dispatcher: TaskDispatcher<S>,
    routes: HashMap<H256, Route>,
    me: Address,
    per_validator_delay: Duration,
    retry_count: u32,
}

impl<S> std::fmt::Debug for EventRouter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("me", &self.me)
            .field("events", &self.routes.len())
            .field("per_validator_delay", &self.per_validator_delay)
            .finish()
    }
}

impl<S> EventRouter<S>
where
    S: QueueStore<RelayTask> + Clone + Send + Sync + 'static,
{
    /// Creates a router that enqueues through `dispatcher` on behalf of `me`.
    pub fn new(
        consensus: Arc<dyn ConsensusClient>,
        dispatcher: TaskDispatcher<S>,
        me: Address,
        per_validator_delay: Duration,
        retry_count: u32,
    ) -> Self {
        Self {
            consensus,
            dispatcher,
            routes: routes(),
            me,
            per_validator_delay,
            retry_count,
        }
    }

    /// The signatures of every routed event, used as the topic filter of log
    /// queries.
    pub fn signatures(&self) -> Vec<H256> {
        self.routes.keys().copied().collect()
    }

    fn is_me(&self, pubkey: &[u8]) -> bool {
        signer_of_pubkey(pubkey) == Some(self.me)
    }

    /// `None` when the log carries no usable event.
    async fn delay_of(&self, rule: DelayRule, log: &Log) -> Option<Delay> {
        let per_validator = self.per_validator_delay;
        let delay = match rule {
            DelayRule::Validator => Delay::Validator(Duration::ZERO),
            DelayRule::Join(pubkey) => {
                // joins always wait one more step than the top up they follow.
                if self.is_me(&pubkey(log)?) {
                    Delay::Fixed(per_validator)
                } else {
                    Delay::Validator(per_validator)
                }
            }
            DelayRule::Sender(validator_id) => {
                let validator_id = validator_id(log)?;
                let sender = validator::is_event_sender(
                    self.consensus.as_ref(),
                    self.me,
                    validator_id,
                )
                .await;
                if sender {
                    Delay::Fixed(Duration::ZERO)
                } else {
                    Delay::Validator(Duration::ZERO)
                }
            }
            DelayRule::OwnSigner(pubkey) => {
                if self.is_me(&pubkey(log)?) {
                    Delay::Fixed(Duration::ZERO)
                } else {
                    Delay::Validator(Duration::ZERO)
                }
            }
            DelayRule::OwnAddress(address) => {
                if address(log)? == self.me {
                    Delay::Fixed(Duration::ZERO)
                } else {
                    Delay::Validator(Duration::ZERO)
                }
            }
        };
        Some(delay)
    }

    /// Enqueues the task of `log`, or returns `None` when the log maps to no
    /// task for us.
    #[tracing::instrument(
        skip_all,
        fields(tx_hash = ?log.transaction_hash, log_index = ?log.log_index)
    )]
    pub async fn route(
        &self,
        log: &Log,
    ) -> bridge_relayer_utils::Result<Option<Routed>> {
        let Some(route) = log.topics.first().and_then(|t| self.routes.get(t))
        else {
            tracing::trace!(topic = ?log.topics.first(), "not a relayed event");
            return Ok(None);
        };
        let Some(delay) = self.delay_of(route.rule, log).await else {
            return Ok(None);
        };
        let delay = match delay {
            Delay::Fixed(delay) => delay,
            Delay::Validator(extra) => {
                let delay = validator::calculate_task_delay(
                    self.consensus.as_ref(),
                    self.me,
                    self.per_validator_delay,
                )
                .await?;
                match delay {
                    Some(delay) => delay + extra,
                    None => {
                        tracing::info!(
                            event = route.event,
                            "not a current validator, ignoring event"
                        );
                        return Ok(None);
                    }
                }
            }
        };
        tracing::debug!(event = route.event, task = route.task, ?delay, "ReceivedEvent");
        let args = vec![route.event.to_string(), serde_json::to_string(log)?];
        self.dispatcher.send_task_with_delay(
            route.task,
            args,
            self.retry_count,
            delay,
        )?;
        Ok(Some(Routed {
            task: route.task,
            delay,
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bridge_relayer_chain_client::mock::{
        stake_update_log, state_synced_log, top_up_fee_log, LogPosition,
        MockConsensusClient,
    };
    use bridge_relayer_store::queue::now_millis;
    use bridge_relayer_store::InMemoryStore;
    use bridge_relayer_task_queue::RELAY_TASKS_QUEUE;
    use bridge_relayer_utils::metric::Metrics;
    use ethers::types::U256;

    pub fn me() -> Address {
        Address::repeat_byte(0x0a)
    }

    pub fn other(n: u8) -> Address {
        Address::repeat_byte(0xe0 + n)
    }

    pub fn at(block_number: u64, tx: u8, log_index: u64) -> LogPosition {
        LogPosition {
            emitter: Address::repeat_byte(0x11),
            block_number,
            tx_hash: H256::repeat_byte(tx),
            log_index,
        }
    }

    /// `(task, delay in ms, args)` of every queued task, in eta order.
    pub fn drain(store: &InMemoryStore) -> Vec<(String, u64, Vec<String>)> {
        let now = now_millis();
        let mut out = Vec::new();
        while let Some((id, item)) =
            QueueStore::<RelayTask>::claim_due_item(store, RELAY_TASKS_QUEUE, u64::MAX).unwrap()
        {
            let delay = item.eta().saturating_sub(now);
            let task = item.inner();
            out.push((task.name, delay, task.args));
            QueueStore::<RelayTask>::ack_item(store, RELAY_TASKS_QUEUE, id).unwrap();
        }
        out
    }

    /// A router for `me` at `position` (1 based) of the validator set.
    pub fn router(
        position: u8,
    ) -> (MockConsensusClient, InMemoryStore, EventRouter<InMemoryStore>) {
        let (consensus, store, dispatcher) = validators(position);
        let router = EventRouter::new(
            Arc::new(consensus.clone()),
            dispatcher,
            me(),
            Duration::from_secs(10),
            tasks::DEFAULT_RETRY_COUNT,
        );
        (consensus, store, router)
    }

    /// A validator set with `me` at `position`, and a dispatcher over an
    /// empty queue.
    pub fn validators(
        position: u8,
    ) -> (MockConsensusClient, InMemoryStore, TaskDispatcher<InMemoryStore>) {
        let mut signers: Vec<Address> = (1..position).map(other).collect();
        signers.push(me());
        let consensus = MockConsensusClient::with_validators(&signers);
        let store = InMemoryStore::default();
        let dispatcher = TaskDispatcher::new(store.clone(), Arc::new(Metrics::new().unwrap()));
        (consensus, store, dispatcher)
    }

    fn secs(delay_ms: u64) -> u64 {
        // rounds away the few ms between enqueue and drain.
        (delay_ms + 500) / 1000
    }

    #[tokio::test]
    async fn state_syncs_wait_for_the_validator_position() {
        let (_, store, router) = router(3);
        let log = state_synced_log(at(100, 1, 0), 7, other(9), vec![1, 2, 3]);
        let routed = router.route(&log).await.unwrap().unwrap();
        assert_eq!(routed.task, tasks::SEND_STATE_SYNCED);
        assert_eq!(routed.delay, Duration::from_secs(30));
        let queued = drain(&store);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0, tasks::SEND_STATE_SYNCED);
        assert_eq!(secs(queued[0].1), 30);
        assert_eq!(queued[0].2[0], "StateSynced");
        let relayed: Log = serde_json::from_str(&queued[0].2[1]).unwrap();
        assert_eq!(relayed, log);
    }

    #[tokio::test]
    async fn own_events_skip_the_delay() {
        let (_, store, router) = router(3);
        // validator 3 is us.
        router.route(&stake_update_log(at(100, 1, 0), 3, 4, U256::from(10))).await.unwrap();
        router.route(&top_up_fee_log(at(100, 1, 1), me(), U256::from(10))).await.unwrap();
        router.route(&stake_update_log(at(100, 1, 2), 1, 4, U256::from(10))).await.unwrap();
        let delays: Vec<_> = drain(&store).into_iter().map(|(t, d, _)| (t, secs(d))).collect();
        assert_eq!(
            delays,
            vec![
                (tasks::SEND_STAKE_UPDATE.to_string(), 0),
                (tasks::SEND_TOP_UP_FEE.to_string(), 0),
                (tasks::SEND_STAKE_UPDATE.to_string(), 30),
            ]
        );
    }

    #[tokio::test]
    async fn outsiders_relay_nothing() {
        let (consensus, store, router) = router(2);
        consensus.state().validators.retain(|v| v.signer != me());
        let log = state_synced_log(at(100, 1, 0), 7, other(9), vec![]);
        assert_eq!(router.route(&log).await.unwrap(), None);
        assert!(drain(&store).is_empty());
    }

    #[tokio::test]
    async fn unknown_logs_are_ignored() {
        let (_, store, router) = router(1);
        let log = Log {
            topics: vec![H256::repeat_byte(0x99)],
            ..Default::default()
        };
        assert_eq!(router.route(&log).await.unwrap(), None);
        assert!(drain(&store).is_empty());
    }

    #[test]
    fn earlier_positions_always_go_first() {
        let per_validator = Duration::from_secs(10);
        for mempool in [0, 999, 1000, 25_000] {
            let delays: Vec<_> = (1..=20)
                .map(|p| validator::validator_delay(p, per_validator, mempool))
                .collect();
            assert!(delays.windows(2).all(|w| w[0] < w[1]), "{mempool}: {delays:?}");
        }
    }
}
