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

//! In-memory fakes of the chain clients.
//!
//! The fakes behave like a tiny, single validator view of the three chains:
//! the consensus fake verifies the signature and sequence of every broadcast
//! transaction the way the real chain does, and applies accepted messages to
//! its own state, so relay logic can be checked end to end without a node.
#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bridge_relayer_types::consensus::{
    Account, ChainManagerParams, Checkpoint, CheckpointParams, EventRecord,
    Milestone, SearchTxsResult, SideTxProof, Span, TxResponse, UnconfirmedTxs,
    Validator, ValidatorSet,
};
use bridge_relayer_types::msgs::{BroadcastReq, ConsensusMsg, StdSignDoc};
use ethers::contract::EthEvent;
use ethers::types::{
    Address, BlockNumber, Bytes, Filter, FilterBlockOption, Log, Signature,
    TransactionReceipt, ValueOrArray, H256, U256, U64,
};
use parking_lot::Mutex;

use crate::contracts::{ChildChainContracts, HeaderBlock, RootChainContracts};
use crate::evm::{ChainHeader, EvmClient};
use crate::indexer::{IndexedLog, IndexerClient};
use crate::{events, ConsensusClient, TxModule};

/// Code the chain answers with when the signature does not match the
/// account sequence.
pub const CODE_UNAUTHORIZED: u32 = 4;

fn validator(id: u64, signer: Address) -> Validator {
    Validator {
        id,
        signer,
        power: 10_000,
        ..Default::default()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Mutable state of [`MockConsensusClient`].
#[derive(Debug)]
pub struct ConsensusState {
    pub chain_id: String,
    pub height: u64,
    pub validators: Vec<Validator>,
    pub milestone_proposers: Vec<Validator>,
    pub current_proposer: Option<Validator>,
    pub accounts: HashMap<Address, Account>,
    pub chain_manager_params: ChainManagerParams,
    pub checkpoint_params: CheckpointParams,
    pub buffered_checkpoint: Option<Checkpoint>,
    pub ack_count: u64,
    pub last_no_ack: u64,
    pub latest_span: Span,
    pub next_span_seed: H256,
    pub dividend_account_root: H256,
    pub milestone_count: u64,
    pub latest_milestone: Option<Milestone>,
    pub event_records: BTreeMap<u64, EventRecord>,
    pub old_txs: HashSet<(H256, u64)>,
    pub checkpoint_txs: Vec<TxResponse>,
    pub side_tx_proofs: HashMap<String, SideTxProof>,
    pub unconfirmed_txs: Vec<String>,
    pub mempool_size: u64,
    /// Number of upcoming validator set queries that fail.
    pub failing_validator_set: usize,
    /// Number of upcoming latest height queries that fail.
    pub failing_latest_height: usize,
    /// Accepted transactions, in order.
    pub broadcasts: Vec<BroadcastReq>,
    /// Every submitted transaction, accepted or not.
    pub attempts: Vec<BroadcastReq>,
    /// Answers for the next broadcasts, consumed before any verification.
    pub scripted: VecDeque<TxResponse>,
    /// Apply accepted messages to the state above.
    pub commit: bool,
}

impl Default for ConsensusState {
    fn default() -> Self {
        Self {
            chain_id: String::from("heimdall-15001"),
            height: 1,
            validators: Vec::new(),
            milestone_proposers: Vec::new(),
            current_proposer: None,
            accounts: HashMap::new(),
            chain_manager_params: ChainManagerParams {
                mainchain_tx_confirmations: 6,
                maticchain_tx_confirmations: 10,
                chain_params: Default::default(),
            },
            checkpoint_params: CheckpointParams {
                checkpoint_buffer_time: 1_000_000_000 * 1000,
                avg_checkpoint_length: 256,
                max_checkpoint_length: 1024,
                child_chain_block_interval: 10_000,
            },
            buffered_checkpoint: None,
            ack_count: 0,
            last_no_ack: 0,
            latest_span: Span::default(),
            next_span_seed: H256::zero(),
            dividend_account_root: H256::zero(),
            milestone_count: 0,
            latest_milestone: None,
            event_records: BTreeMap::new(),
            old_txs: HashSet::new(),
            checkpoint_txs: Vec::new(),
            side_tx_proofs: HashMap::new(),
            unconfirmed_txs: Vec::new(),
            mempool_size: 0,
            failing_validator_set: 0,
            failing_latest_height: 0,
            broadcasts: Vec::new(),
            attempts: Vec::new(),
            scripted: VecDeque::new(),
            commit: true,
        }
    }
}

impl ConsensusState {
    fn verify_signer(&self, req: &BroadcastReq) -> Option<Address> {
        let raw = hex::decode(req.tx.signature.trim_start_matches("0x")).ok()?;
        let signature = Signature::try_from(raw.as_slice()).ok()?;
        self.accounts.values().find_map(|account| {
            let doc = StdSignDoc {
                account_number: account.account_number.to_string(),
                chain_id: &self.chain_id,
                fee: &req.tx.fee,
                memo: &req.tx.memo,
                msgs: [&req.tx.msg],
                sequence: account.sequence.to_string(),
            };
            let bytes = doc.to_sign_bytes().ok()?;
            let hash = H256::from(ethers::utils::keccak256(bytes));
            let recovered = signature.recover(hash).ok()?;
            (recovered == account.address).then_some(recovered)
        })
    }

    fn apply(&mut self, msg: &ConsensusMsg) {
        if let Some(key) = msg.event_key() {
            self.old_txs.insert(key);
        }
        match msg {
            ConsensusMsg::EventRecord {
                id,
                tx_hash,
                log_index,
                contract_address,
                data,
                chain_id,
                ..
            } => {
                self.event_records.insert(
                    *id,
                    EventRecord {
                        id: *id,
                        contract: *contract_address,
                        data: format!("{data}"),
                        tx_hash: *tx_hash,
                        log_index: *log_index,
                        bor_chain_id: chain_id.clone(),
                    },
                );
            }
            ConsensusMsg::StakeUpdate { id, nonce, .. }
            | ConsensusMsg::SignerChange { id, nonce, .. }
            | ConsensusMsg::UnstakeInit { id, nonce, .. } => {
                if let Some(v) = self.validators.iter_mut().find(|v| v.id == *id)
                {
                    v.nonce = *nonce;
                }
            }
            ConsensusMsg::CheckpointAck { .. } => self.ack_count += 1,
            ConsensusMsg::Checkpoint {
                proposer,
                start_block,
                end_block,
                root_hash,
                bor_chain_id,
                ..
            } => {
                self.buffered_checkpoint = Some(Checkpoint {
                    proposer: *proposer,
                    start_block: *start_block,
                    end_block: *end_block,
                    root_hash: *root_hash,
                    bor_chain_id: bor_chain_id.clone(),
                    timestamp: now_secs(),
                });
            }
            ConsensusMsg::CheckpointNoAck { .. } => self.last_no_ack = now_secs(),
            ConsensusMsg::Milestone {
                proposer,
                start_block,
                end_block,
                hash,
                bor_chain_id,
                milestone_id,
            } => {
                self.milestone_count += 1;
                self.latest_milestone = Some(Milestone {
                    proposer: *proposer,
                    start_block: *start_block,
                    end_block: *end_block,
                    hash: *hash,
                    bor_chain_id: bor_chain_id.clone(),
                    milestone_id: milestone_id.clone(),
                    timestamp: now_secs(),
                });
            }
            _ => {}
        }
    }
}

/// In-memory [`ConsensusClient`].
#[derive(Debug, Default, Clone)]
pub struct MockConsensusClient {
    state: Arc<Mutex<ConsensusState>>,
}

impl MockConsensusClient {
    /// A chain whose validator set (and proposer order) is `signers`, ids
    /// starting at 1.
    pub fn with_validators(signers: &[Address]) -> Self {
        let client = Self::default();
        {
            let mut state = client.state.lock();
            state.validators = signers
                .iter()
                .enumerate()
                .map(|(i, s)| validator(i as u64 + 1, *s))
                .collect();
            state.milestone_proposers = state.validators.clone();
            state.current_proposer = state.validators.first().cloned();
        }
        client
    }

    /// Registers an account so broadcasts signed for it are accepted.
    pub fn add_account(&self, address: Address, account_number: u64, sequence: u64) {
        self.state.lock().accounts.insert(
            address,
            Account {
                address,
                account_number,
                sequence,
            },
        );
    }

    /// Locks the state for inspection or scripting.
    pub fn state(&self) -> parking_lot::MutexGuard<'_, ConsensusState> {
        self.state.lock()
    }

    /// Accepted messages, in order.
    pub fn broadcast_msgs(&self) -> Vec<ConsensusMsg> {
        self.state
            .lock()
            .broadcasts
            .iter()
            .map(|b| b.tx.msg.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl ConsensusClient for MockConsensusClient {
    async fn account(
        &self,
        address: Address,
    ) -> bridge_relayer_utils::Result<Option<Account>> {
        Ok(self.state.lock().accounts.get(&address).copied())
    }

    async fn chain_manager_params(
        &self,
    ) -> bridge_relayer_utils::Result<ChainManagerParams> {
        Ok(self.state.lock().chain_manager_params.clone())
    }

    async fn checkpoint_params(
        &self,
    ) -> bridge_relayer_utils::Result<CheckpointParams> {
        Ok(self.state.lock().checkpoint_params)
    }

    async fn buffered_checkpoint(
        &self,
    ) -> bridge_relayer_utils::Result<Option<Checkpoint>> {
        Ok(self.state.lock().buffered_checkpoint.clone())
    }

    async fn ack_count(&self) -> bridge_relayer_utils::Result<u64> {
        Ok(self.state.lock().ack_count)
    }

    async fn last_no_ack(&self) -> bridge_relayer_utils::Result<u64> {
        Ok(self.state.lock().last_no_ack)
    }

    async fn proposers(
        &self,
        count: u64,
    ) -> bridge_relayer_utils::Result<Vec<Validator>> {
        let state = self.state.lock();
        Ok(state.validators.iter().take(count as usize).cloned().collect())
    }

    async fn current_proposer(&self) -> bridge_relayer_utils::Result<Validator> {
        self.state.lock().current_proposer.clone().ok_or(
            bridge_relayer_utils::Error::Generic("no current proposer"),
        )
    }

    async fn milestone_proposers(
        &self,
        count: u64,
    ) -> bridge_relayer_utils::Result<Vec<Validator>> {
        let state = self.state.lock();
        Ok(state
            .milestone_proposers
            .iter()
            .take(count as usize)
            .cloned()
            .collect())
    }

    async fn validator_set(&self) -> bridge_relayer_utils::Result<ValidatorSet> {
        let mut state = self.state.lock();
        if state.failing_validator_set > 0 {
            state.failing_validator_set -= 1;
            return Err(bridge_relayer_utils::Error::Generic("validator set unavailable"));
        }
        Ok(ValidatorSet {
            validators: state.validators.clone(),
            proposer: state.current_proposer.clone(),
        })
    }

    async fn validator(&self, id: u64) -> bridge_relayer_utils::Result<Validator> {
        self.state
            .lock()
            .validators
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or(bridge_relayer_utils::Error::Generic("unknown validator"))
    }

    async fn latest_span(&self) -> bridge_relayer_utils::Result<Span> {
        Ok(self.state.lock().latest_span.clone())
    }

    async fn prepare_next_span(
        &self,
        span_id: u64,
        start_block: u64,
        chain_id: &str,
    ) -> bridge_relayer_utils::Result<Span> {
        let state = self.state.lock();
        let length = state
            .latest_span
            .end_block
            .saturating_sub(state.latest_span.start_block);
        Ok(Span {
            span_id,
            start_block,
            end_block: start_block + length,
            validator_set: ValidatorSet {
                validators: state.validators.clone(),
                proposer: state.current_proposer.clone(),
            },
            selected_producers: state.validators.clone(),
            bor_chain_id: chain_id.to_owned(),
        })
    }

    async fn next_span_seed(&self) -> bridge_relayer_utils::Result<H256> {
        Ok(self.state.lock().next_span_seed)
    }

    async fn dividend_account_root(&self) -> bridge_relayer_utils::Result<H256> {
        Ok(self.state.lock().dividend_account_root)
    }

    async fn milestone_count(&self) -> bridge_relayer_utils::Result<u64> {
        Ok(self.state.lock().milestone_count)
    }

    async fn latest_milestone(
        &self,
    ) -> bridge_relayer_utils::Result<Option<Milestone>> {
        Ok(self.state.lock().latest_milestone.clone())
    }

    async fn event_record(
        &self,
        id: u64,
    ) -> bridge_relayer_utils::Result<Option<EventRecord>> {
        Ok(self.state.lock().event_records.get(&id).cloned())
    }

    async fn latest_event_record_id(&self) -> bridge_relayer_utils::Result<u64> {
        Ok(self
            .state
            .lock()
            .event_records
            .keys()
            .next_back()
            .copied()
            .unwrap_or_default())
    }

    async fn is_old_tx(
        &self,
        _module: TxModule,
        tx_hash: H256,
        log_index: u64,
    ) -> bridge_relayer_utils::Result<bool> {
        Ok(self.state.lock().old_txs.contains(&(tx_hash, log_index)))
    }

    async fn search_txs(
        &self,
        events: &[(&str, String)],
        _page: u64,
        limit: u64,
    ) -> bridge_relayer_utils::Result<SearchTxsResult> {
        let state = self.state.lock();
        let txs: Vec<TxResponse> = state
            .checkpoint_txs
            .iter()
            .filter(|tx| {
                events.iter().all(|(key, value)| {
                    let Some((kind, attr)) = key.split_once('.') else {
                        return true;
                    };
                    if kind == "message" || kind == "tx" {
                        return true;
                    }
                    tx.events().any(|e| {
                        e.kind == kind && e.attribute(attr) == Some(value.as_str())
                    })
                })
            })
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(SearchTxsResult {
            total_count: txs.len() as u64,
            count: txs.len() as u64,
            txs,
        })
    }

    async fn side_tx_proof(
        &self,
        tx_hash: &str,
    ) -> bridge_relayer_utils::Result<SideTxProof> {
        self.state
            .lock()
            .side_tx_proofs
            .get(tx_hash)
            .cloned()
            .ok_or(bridge_relayer_utils::Error::Generic("unknown side tx"))
    }

    async fn unconfirmed_txs(&self) -> bridge_relayer_utils::Result<UnconfirmedTxs> {
        let state = self.state.lock();
        Ok(UnconfirmedTxs {
            n_txs: state.unconfirmed_txs.len() as u64,
            total: state.unconfirmed_txs.len() as u64,
            txs: Some(state.unconfirmed_txs.clone()),
        })
    }

    async fn num_unconfirmed_txs(&self) -> bridge_relayer_utils::Result<u64> {
        Ok(self.state.lock().mempool_size)
    }

    async fn latest_height(&self) -> bridge_relayer_utils::Result<u64> {
        let mut state = self.state.lock();
        if state.failing_latest_height > 0 {
            state.failing_latest_height -= 1;
            return Err(bridge_relayer_utils::Error::Generic("node unavailable"));
        }
        Ok(state.height)
    }

    async fn broadcast(
        &self,
        req: &BroadcastReq,
    ) -> bridge_relayer_utils::Result<TxResponse> {
        let mut state = self.state.lock();
        state.attempts.push(req.clone());
        if let Some(scripted) = state.scripted.pop_front() {
            return Ok(scripted);
        }
        let Some(signer) = state.verify_signer(req) else {
            return Ok(TxResponse {
                height: state.height,
                code: CODE_UNAUTHORIZED,
                raw_log: String::from(
                    "signature verification failed; verify correct account sequence and chain-id",
                ),
                ..Default::default()
            });
        };
        if let Some(account) = state.accounts.get_mut(&signer) {
            account.sequence += 1;
        }
        if state.commit {
            state.apply(&req.tx.msg);
        }
        state.height += 1;
        state.broadcasts.push(req.clone());
        let txhash = hex::encode(ethers::utils::keccak256(
            serde_json::to_vec(&req.tx).unwrap_or_default(),
        ));
        Ok(TxResponse {
            height: state.height,
            txhash,
            code: 0,
            ..Default::default()
        })
    }
}

/// Mutable state of [`MockEvmClient`].
#[derive(Debug, Default)]
pub struct EvmState {
    pub headers: BTreeMap<u64, ChainHeader>,
    /// Number of the finalized head, `None` when the tag is unsupported.
    pub finalized: Option<u64>,
    pub logs: Vec<Log>,
    pub receipts: HashMap<H256, TransactionReceipt>,
    /// `(from, to)` of every log query, in order.
    pub log_queries: Vec<(u64, u64)>,
    /// Fail the next this many log queries.
    pub failing_log_queries: usize,
}

/// In-memory [`EvmClient`].
#[derive(Debug, Default, Clone)]
pub struct MockEvmClient {
    state: Arc<Mutex<EvmState>>,
    subscription: Arc<Mutex<Option<tokio::sync::mpsc::Receiver<ChainHeader>>>>,
}

impl MockEvmClient {
    /// Locks the state for inspection or scripting.
    pub fn state(&self) -> parking_lot::MutexGuard<'_, EvmState> {
        self.state.lock()
    }

    /// Adds synthetic headers up to `number`, all stamped `timestamp`.
    pub fn extend_to(&self, number: u64, timestamp: u64) {
        let mut state = self.state.lock();
        let first = state.headers.keys().next_back().map(|n| n + 1).unwrap_or(0);
        for n in first..=number {
            state.headers.insert(
                n,
                ChainHeader {
                    number: n,
                    hash: H256::from_low_u64_be(n + 1),
                    parent_hash: H256::from_low_u64_be(n),
                    timestamp,
                    transactions_root: H256::from_low_u64_be(n.wrapping_mul(3) + 7),
                    receipts_root: H256::from_low_u64_be(n.wrapping_mul(5) + 11),
                    finalized: false,
                },
            );
        }
    }

    /// Adds a log and a receipt that carries it.
    pub fn add_log(&self, log: Log) {
        let mut state = self.state.lock();
        if let Some(tx_hash) = log.transaction_hash {
            let receipt = state.receipts.entry(tx_hash).or_insert_with(|| {
                TransactionReceipt {
                    transaction_hash: tx_hash,
                    block_number: log.block_number,
                    status: Some(U64::from(1)),
                    ..Default::default()
                }
            });
            receipt.logs.push(log.clone());
        }
        state.logs.push(log);
    }

    /// Makes [`EvmClient::subscribe_headers`] hand out `rx`.
    pub fn set_subscription(&self, rx: tokio::sync::mpsc::Receiver<ChainHeader>) {
        *self.subscription.lock() = Some(rx);
    }
}

fn values<T: Clone>(v: &ValueOrArray<T>) -> Vec<T> {
    match v {
        ValueOrArray::Value(x) => vec![x.clone()],
        ValueOrArray::Array(xs) => xs.clone(),
    }
}

fn block_of(b: &Option<BlockNumber>) -> Option<u64> {
    match b {
        Some(BlockNumber::Number(n)) => Some(n.as_u64()),
        _ => None,
    }
}

#[async_trait::async_trait]
impl EvmClient for MockEvmClient {
    async fn latest_header(&self) -> bridge_relayer_utils::Result<ChainHeader> {
        self.state
            .lock()
            .headers
            .values()
            .next_back()
            .copied()
            .ok_or(bridge_relayer_utils::Error::Generic("no blocks"))
    }

    async fn finalized_header(
        &self,
    ) -> bridge_relayer_utils::Result<Option<ChainHeader>> {
        let state = self.state.lock();
        Ok(state
            .finalized
            .and_then(|n| state.headers.get(&n).copied())
            .map(|h| ChainHeader {
                finalized: true,
                ..h
            }))
    }

    async fn header_by_number(
        &self,
        number: u64,
    ) -> bridge_relayer_utils::Result<Option<ChainHeader>> {
        Ok(self.state.lock().headers.get(&number).copied())
    }

    async fn logs(&self, filter: &Filter) -> bridge_relayer_utils::Result<Vec<Log>> {
        let mut state = self.state.lock();
        let (from, to) = match &filter.block_option {
            FilterBlockOption::Range {
                from_block,
                to_block,
            } => (
                block_of(from_block).unwrap_or(0),
                block_of(to_block).unwrap_or(u64::MAX),
            ),
            FilterBlockOption::AtBlockHash(_) => (0, u64::MAX),
        };
        state.log_queries.push((from, to));
        if state.failing_log_queries > 0 {
            state.failing_log_queries -= 1;
            return Err(bridge_relayer_utils::Error::Generic("log query failed"));
        }
        let logs = state
            .logs
            .iter()
            .filter(|log| {
                let n = log.block_number.map(|n| n.as_u64()).unwrap_or(0);
                n >= from && n <= to
            })
            .filter(|log| match &filter.address {
                Some(addresses) => values(addresses).contains(&log.address),
                None => true,
            })
            .filter(|log| match filter.topics[0].as_ref() {
                Some(topics) => values(topics)
                    .iter()
                    .flatten()
                    .any(|t| log.topics.first() == Some(t)),
                None => true,
            })
            .cloned()
            .collect();
        Ok(logs)
    }

    async fn receipt(
        &self,
        tx_hash: H256,
    ) -> bridge_relayer_utils::Result<Option<TransactionReceipt>> {
        Ok(self.state.lock().receipts.get(&tx_hash).cloned())
    }

    async fn subscribe_headers(
        &self,
    ) -> bridge_relayer_utils::Result<Option<tokio::sync::mpsc::Receiver<ChainHeader>>>
    {
        Ok(self.subscription.lock().take())
    }
}

/// Mutable state of [`MockRootChain`].
#[derive(Debug, Default)]
pub struct RootChainState {
    pub current_header_block: u64,
    pub header_blocks: HashMap<u64, HeaderBlock>,
    pub last_child_block: u64,
    pub submissions: Vec<(Bytes, Vec<[U256; 3]>)>,
    pub latest_state_id: u64,
    pub validator_nonces: HashMap<u64, u64>,
}

/// In-memory [`RootChainContracts`].
#[derive(Debug, Default, Clone)]
pub struct MockRootChain {
    state: Arc<Mutex<RootChainState>>,
}

impl MockRootChain {
    /// Locks the state for inspection or scripting.
    pub fn state(&self) -> parking_lot::MutexGuard<'_, RootChainState> {
        self.state.lock()
    }

    /// Sets the last committed header block.
    pub fn set_last_header(&self, number: u64, header: HeaderBlock) {
        let mut state = self.state.lock();
        state.current_header_block = number;
        state.last_child_block = header.end;
        state.header_blocks.insert(number, header);
    }
}

#[async_trait::async_trait]
impl RootChainContracts for MockRootChain {
    async fn current_header_block(&self) -> bridge_relayer_utils::Result<u64> {
        Ok(self.state.lock().current_header_block)
    }

    async fn header_block(
        &self,
        number: u64,
    ) -> bridge_relayer_utils::Result<HeaderBlock> {
        Ok(self
            .state
            .lock()
            .header_blocks
            .get(&number)
            .copied()
            .unwrap_or_default())
    }

    async fn last_child_block(&self) -> bridge_relayer_utils::Result<u64> {
        Ok(self.state.lock().last_child_block)
    }

    async fn submit_checkpoint(
        &self,
        data: Bytes,
        sigs: Vec<[U256; 3]>,
    ) -> bridge_relayer_utils::Result<H256> {
        let mut state = self.state.lock();
        state.submissions.push((data, sigs));
        Ok(H256::from_low_u64_be(state.submissions.len() as u64))
    }

    async fn latest_state_id(&self) -> bridge_relayer_utils::Result<u64> {
        Ok(self.state.lock().latest_state_id)
    }

    async fn validator_nonce(
        &self,
        validator_id: u64,
    ) -> bridge_relayer_utils::Result<u64> {
        Ok(self
            .state
            .lock()
            .validator_nonces
            .get(&validator_id)
            .copied()
            .unwrap_or_default())
    }
}

/// In-memory [`ChildChainContracts`].
#[derive(Debug, Default, Clone)]
pub struct MockChildChain {
    pub current_span_id: Arc<Mutex<u64>>,
}

#[async_trait::async_trait]
impl ChildChainContracts for MockChildChain {
    async fn current_span_id(&self) -> bridge_relayer_utils::Result<u64> {
        Ok(*self.current_span_id.lock())
    }
}

/// In-memory [`IndexerClient`].
#[derive(Debug, Default, Clone)]
pub struct MockIndexer {
    pub state_syncs: Arc<Mutex<BTreeMap<u64, IndexedLog>>>,
    pub stake_updates: Arc<Mutex<BTreeMap<(u64, u64), IndexedLog>>>,
}

#[async_trait::async_trait]
impl IndexerClient for MockIndexer {
    async fn latest_state_id(&self) -> bridge_relayer_utils::Result<u64> {
        Ok(self
            .state_syncs
            .lock()
            .keys()
            .next_back()
            .copied()
            .unwrap_or_default())
    }

    async fn state_sync(
        &self,
        id: u64,
    ) -> bridge_relayer_utils::Result<Option<IndexedLog>> {
        Ok(self.state_syncs.lock().get(&id).copied())
    }

    async fn latest_stake_update_nonce(
        &self,
        validator_id: u64,
    ) -> bridge_relayer_utils::Result<u64> {
        Ok(self
            .stake_updates
            .lock()
            .keys()
            .filter(|(v, _)| *v == validator_id)
            .map(|(_, n)| *n)
            .max()
            .unwrap_or_default())
    }

    async fn stake_update(
        &self,
        validator_id: u64,
        nonce: u64,
    ) -> bridge_relayer_utils::Result<Option<IndexedLog>> {
        Ok(self.stake_updates.lock().get(&(validator_id, nonce)).copied())
    }
}

fn u256_topic(v: U256) -> H256 {
    let mut raw = [0u8; 32];
    v.to_big_endian(&mut raw);
    H256(raw)
}

fn log_at(
    emitter: Address,
    topics: Vec<H256>,
    data: Vec<u8>,
    block_number: u64,
    tx_hash: H256,
    log_index: u64,
) -> Log {
    Log {
        address: emitter,
        topics,
        data: data.into(),
        block_number: Some(block_number.into()),
        transaction_hash: Some(tx_hash),
        log_index: Some(log_index.into()),
        ..Default::default()
    }
}

/// Position of a mock log on the root chain.
#[derive(Debug, Clone, Copy)]
pub struct LogPosition {
    pub emitter: Address,
    pub block_number: u64,
    pub tx_hash: H256,
    pub log_index: u64,
}

/// A `StateSynced` log.
pub fn state_synced_log(
    at: LogPosition,
    id: u64,
    contract: Address,
    data: Vec<u8>,
) -> Log {
    use ethers::abi::Token;
    log_at(
        at.emitter,
        vec![
            events::StateSynced::signature(),
            u256_topic(id.into()),
            H256::from(contract),
        ],
        ethers::abi::encode(&[Token::Bytes(data)]),
        at.block_number,
        at.tx_hash,
        at.log_index,
    )
}

/// A `StakeUpdate` log.
pub fn stake_update_log(
    at: LogPosition,
    validator_id: u64,
    nonce: u64,
    new_amount: U256,
) -> Log {
    log_at(
        at.emitter,
        vec![
            events::StakeUpdate::signature(),
            u256_topic(validator_id.into()),
            u256_topic(nonce.into()),
            u256_topic(new_amount),
        ],
        Vec::new(),
        at.block_number,
        at.tx_hash,
        at.log_index,
    )
}

/// A `TopUpFee` log.
pub fn top_up_fee_log(at: LogPosition, user: Address, fee: U256) -> Log {
    log_at(
        at.emitter,
        vec![
            events::TopUpFee::signature(),
            H256::from(user),
            u256_topic(fee),
        ],
        Vec::new(),
        at.block_number,
        at.tx_hash,
        at.log_index,
    )
}

/// A `Slashed` log.
pub fn slashed_log(at: LogPosition, nonce: u64, amount: U256) -> Log {
    log_at(
        at.emitter,
        vec![
            events::Slashed::signature(),
            u256_topic(nonce.into()),
            u256_topic(amount),
        ],
        Vec::new(),
        at.block_number,
        at.tx_hash,
        at.log_index,
    )
}

/// A `NewHeaderBlock` log.
pub fn new_header_block_log(
    at: LogPosition,
    proposer: Address,
    header_block_id: u64,
    start: u64,
    end: u64,
    root: H256,
) -> Log {
    use ethers::abi::Token;
    log_at(
        at.emitter,
        vec![
            events::NewHeaderBlock::signature(),
            H256::from(proposer),
            u256_topic(header_block_id.into()),
            u256_topic(U256::zero()),
        ],
        ethers::abi::encode(&[
            Token::Uint(start.into()),
            Token::Uint(end.into()),
            Token::FixedBytes(root.as_bytes().to_vec()),
        ]),
        at.block_number,
        at.tx_hash,
        at.log_index,
    )
}
