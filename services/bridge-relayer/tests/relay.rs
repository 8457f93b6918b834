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

//! End to end runs of the relayer services against in-memory chains.

use std::sync::Arc;
use std::time::Duration;

use bridge_relayer::service::{ignite, Clients, Services};
use bridge_relayer_chain_client::mock::{
    state_synced_log, LogPosition, MockChildChain, MockConsensusClient,
    MockEvmClient, MockIndexer, MockRootChain,
};
use bridge_relayer_chain_client::{HeaderBlock, IndexedLog, IndexerClient};
use bridge_relayer_config::RelayerConfig;
use bridge_relayer_context::RelayerContext;
use bridge_relayer_processors::tasks;
use bridge_relayer_store::SledStore;
use bridge_relayer_task_queue::TaskDispatcher;
use bridge_relayer_types::consensus::EventRecord;
use bridge_relayer_types::msgs::ConsensusMsg;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Log, H256};

const SECRET: &str =
    "0x8917174396171783496173419137618235192359106130478137647163400318";

fn secret() -> H256 {
    SECRET.parse().unwrap()
}

fn me() -> Address {
    LocalWallet::from_bytes(secret().as_bytes())
        .unwrap()
        .address()
}

fn state_sender() -> Address {
    Address::repeat_byte(0x11)
}

fn at(block_number: u64, tx: u8) -> LogPosition {
    LogPosition {
        emitter: state_sender(),
        block_number,
        tx_hash: H256::repeat_byte(tx),
        log_index: 0,
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn config() -> RelayerConfig {
    let mut config = RelayerConfig::default();
    config.private_key = Some(secret().into());
    config.root_chain.poll_interval = 50;
    config.root_chain.confirmations = 6;
    config.consensus.poll_interval = 50;
    config.contracts.state_sender = state_sender();
    config.task_queue.per_validator_delay = 10;
    config.task_queue.retry_delay = 10;
    config.task_queue.state_sync_retry_delay = 10;
    config
}

/// The three chains, with the local validator alone in the set.
struct Chains {
    consensus: MockConsensusClient,
    root: MockEvmClient,
    root_contracts: MockRootChain,
    child: MockEvmClient,
    indexer: Option<MockIndexer>,
}

impl Chains {
    fn new() -> Self {
        let consensus = MockConsensusClient::with_validators(&[me()]);
        consensus.add_account(me(), 1, 0);
        let root_contracts = MockRootChain::default();
        // a fresh checkpoint keeps the no-ack loop quiet.
        root_contracts.set_last_header(
            1,
            HeaderBlock {
                created_at: now_secs(),
                ..Default::default()
            },
        );
        Self {
            consensus,
            root: MockEvmClient::default(),
            root_contracts,
            child: MockEvmClient::default(),
            indexer: None,
        }
    }

    fn clients(&self) -> Clients {
        Clients {
            consensus: Arc::new(self.consensus.clone()),
            root_chain: Arc::new(self.root.clone()),
            child_chain: Arc::new(self.child.clone()),
            root_contracts: Arc::new(self.root_contracts.clone()),
            child_contracts: Arc::new(MockChildChain::default()),
            indexer: self
                .indexer
                .clone()
                .map(|i| Arc::new(i) as Arc<dyn IndexerClient>),
        }
    }

    /// Ids of every event record submitted, accepted or not.
    fn record_attempts(&self) -> Vec<u64> {
        self.consensus
            .state()
            .attempts
            .iter()
            .filter_map(|req| match &req.tx.msg {
                ConsensusMsg::EventRecord { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }
}

async fn start(
    chains: &Chains,
    config: RelayerConfig,
) -> (RelayerContext, Services) {
    let ctx =
        RelayerContext::new(config, SledStore::temporary().unwrap()).unwrap();
    let services = ignite(&ctx, chains.clients()).await.unwrap();
    (ctx, services)
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out: {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn stop(ctx: RelayerContext, services: Services) {
    ctx.shutdown();
    services.join().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn root_chain_event_is_relayed_once() {
    let chains = Chains::new();
    chains.root.extend_to(110, 0);
    let log = state_synced_log(at(104, 0x42), 1, Address::repeat_byte(7), vec![1, 2, 3]);
    chains.root.add_log(log.clone());

    let (ctx, services) = start(&chains, config()).await;
    assert_eq!(services.listeners(), 3);
    eventually("event record 1", || {
        chains.consensus.state().event_records.contains_key(&1)
    })
    .await;

    // the same event delivered again is dropped without a broadcast.
    let dispatcher = TaskDispatcher::new(ctx.store().clone(), ctx.metrics.clone());
    let args = vec![
        String::from("StateSynced"),
        serde_json::to_string(&log).unwrap(),
    ];
    dispatcher
        .send_task(tasks::SEND_STATE_SYNCED, args, tasks::DEFAULT_RETRY_COUNT)
        .unwrap();
    let succeeded = ctx
        .metrics
        .tasks_succeeded
        .with_label_values(&[tasks::SEND_STATE_SYNCED]);
    eventually("second delivery", || succeeded.get() as u64 == 2).await;

    assert_eq!(chains.record_attempts(), vec![1]);
    let record = chains.consensus.state().event_records[&1].clone();
    assert_eq!(record.tx_hash, H256::repeat_byte(0x42));
    assert_eq!(record.contract, Address::repeat_byte(7));
    stop(ctx, services).await;
}

#[tokio::test]
async fn sequence_mismatch_is_retried_with_the_chain_sequence() {
    let chains = Chains::new();
    chains.root.extend_to(110, 0);
    chains
        .root
        .add_log(state_synced_log(at(104, 1), 1, Address::repeat_byte(7), vec![]));

    let (ctx, services) = start(&chains, config()).await;
    eventually("event record 1", || {
        chains.consensus.state().event_records.contains_key(&1)
    })
    .await;

    // two transactions of this validator landed from elsewhere.
    chains
        .consensus
        .state()
        .accounts
        .get_mut(&me())
        .unwrap()
        .sequence = 3;
    chains
        .root
        .add_log(state_synced_log(at(105, 2), 2, Address::repeat_byte(7), vec![]));
    chains.root.extend_to(111, 0);
    eventually("event record 2", || {
        chains.consensus.state().event_records.contains_key(&2)
    })
    .await;

    assert_eq!(chains.record_attempts(), vec![1, 2, 2]);
    assert_eq!(chains.consensus.state().accounts[&me()].sequence, 4);
    let retried = ctx
        .metrics
        .tasks_retried
        .with_label_values(&[tasks::SEND_STATE_SYNCED])
        .get();
    assert_eq!(retried as u64, 1);
    stop(ctx, services).await;
}

#[tokio::test]
async fn missed_state_syncs_are_healed_in_id_order() {
    let mut chains = Chains::new();
    for id in 1..=47 {
        chains.consensus.state().event_records.insert(
            id,
            EventRecord {
                id,
                contract: Address::repeat_byte(7),
                data: String::new(),
                tx_hash: H256::from_low_u64_be(id),
                log_index: 0,
                bor_chain_id: String::from("15001"),
            },
        );
    }
    // the listener starts far past the missed events.
    chains.root.extend_to(300, 0);
    let indexer = MockIndexer::default();
    for (n, id) in (48..=50u64).enumerate() {
        let tx = 0xa0 + n as u8;
        let log: Log =
            state_synced_log(at(100 + n as u64, tx), id, Address::repeat_byte(7), vec![]);
        chains.root.add_log(log);
        indexer.state_syncs.lock().insert(
            id,
            IndexedLog {
                tx_hash: H256::repeat_byte(tx),
                log_index: 0,
            },
        );
    }
    chains.indexer = Some(indexer);
    let mut config = config();
    config.self_heal.enabled = true;
    config.self_heal.state_synced_interval = 50;

    let (ctx, services) = start(&chains, config).await;
    eventually("event record 50", || {
        chains.consensus.state().event_records.contains_key(&50)
    })
    .await;

    assert_eq!(chains.record_attempts(), vec![48, 49, 50]);
    assert_eq!(chains.consensus.state().event_records.len(), 50);
    assert_eq!(ctx.metrics.self_heal_missing_state_syncs.get() as u64, 3);
    stop(ctx, services).await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn lost_head_subscription_shuts_the_relayer_down() {
    let chains = Chains::new();
    chains.root.extend_to(110, 0);
    let (heads, subscription) = tokio::sync::mpsc::channel(1);
    chains.root.set_subscription(subscription);

    let (ctx, services) = start(&chains, config()).await;
    let mut shutdown = ctx.shutdown_signal();
    drop(heads);

    let result = tokio::time::timeout(
        Duration::from_secs(20),
        services.supervise(&ctx, std::future::pending()),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(bridge_relayer::Error::ForceRestart)));
    // every other service was told to stop.
    tokio::time::timeout(Duration::from_secs(1), shutdown.recv())
        .await
        .unwrap();
}
