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

use std::time::Duration;

use base64::Engine;
use bridge_relayer_chain_client::events::StateSynced;
use bridge_relayer_chain_client::TxModule;
use bridge_relayer_task_queue::TaskOutcome;
use bridge_relayer_types::msgs::{ConsensusMsg, StdTx};
use ethers::types::{Bytes, H256};

use crate::event::{already_relayed, root_chain_event, EventPosition};
use crate::{tasks, Processor, ProcessorContext};

/// Relays `StateSynced` events as event records.
#[derive(Debug)]
pub struct ClerkProcessor {
    ctx: ProcessorContext,
}

impl ClerkProcessor {
    /// Creates the processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    #[tracing::instrument(skip_all, fields(task = tasks::SEND_STATE_SYNCED))]
    async fn send_state_synced(&self, args: &[String]) -> TaskOutcome {
        let Some((event, at)) = root_chain_event::<StateSynced>(args) else {
            return TaskOutcome::Ok;
        };
        if already_relayed(&self.ctx, TxModule::Clerk, &at).await {
            return TaskOutcome::Ok;
        }
        let limits = &self.ctx.config.task_queue;
        let data = if event.data.len() > limits.max_state_sync_size {
            tracing::info!(
                id = %event.id,
                size = event.data.len(),
                limit = limits.max_state_sync_size,
                "data is too large, relaying an empty record"
            );
            Bytes::new()
        } else {
            event.data.clone()
        };
        tracing::info!(
            id = %event.id,
            contract = ?event.contract_address,
            tx_hash = ?at.tx_hash,
            log_index = at.log_index,
            block_number = at.block_number,
            "✅ Received task to send state-sync to heimdall"
        );
        let msg = ConsensusMsg::EventRecord {
            from: self.ctx.me(),
            tx_hash: at.tx_hash,
            log_index: at.log_index,
            block_number: at.block_number,
            contract_address: event.contract_address,
            data,
            id: event.id.low_u64(),
            chain_id: self.ctx.bor_chain_id(),
        };
        if self.in_mempool(&at).await {
            let delay = Duration::from_millis(limits.state_sync_retry_delay);
            tracing::info!(
                tx_hash = ?at.tx_hash,
                log_index = at.log_index,
                ?delay,
                "event record already in the mempool, retrying later"
            );
            return TaskOutcome::RetryAfter(delay);
        }
        self.ctx
            .broadcaster
            .consensus
            .broadcast(msg)
            .await
            .map(|_| ())
            .into()
    }

    /// Whether an event record for `at` waits in the consensus mempool.
    /// Lookup failures count as not pending.
    async fn in_mempool(&self, at: &EventPosition) -> bool {
        let pending = match self.ctx.consensus.unconfirmed_txs().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(%e, "failed to fetch unconfirmed txs");
                return false;
            }
        };
        pending
            .txs
            .unwrap_or_default()
            .iter()
            .filter_map(|raw| {
                base64::engine::general_purpose::STANDARD.decode(raw).ok()
            })
            .filter_map(|raw| serde_json::from_slice::<StdTx>(&raw).ok())
            .any(|tx| is_record_of(&tx.msg, at.tx_hash, at.log_index))
    }
}

fn is_record_of(msg: &ConsensusMsg, hash: H256, index: u64) -> bool {
    matches!(
        msg,
        ConsensusMsg::EventRecord { tx_hash, log_index, .. }
            if *tx_hash == hash && *log_index == index
    )
}

#[async_trait::async_trait]
impl Processor for ClerkProcessor {
    const NAME: &'static str = "clerk";
    const TASKS: &'static [&'static str] = &[tasks::SEND_STATE_SYNCED];

    async fn handle(&self, _task: &str, args: &[String]) -> TaskOutcome {
        self.send_state_synced(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{at, log_args, Harness};
    use bridge_relayer_chain_client::mock::state_synced_log;
    use bridge_relayer_types::msgs::StdFee;
    use ethers::types::Address;

    fn state_sync(id: u64, data: Vec<u8>) -> Vec<String> {
        log_args(
            "StateSynced",
            &state_synced_log(at(100, 0x42, 3), id, Address::repeat_byte(7), data),
        )
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn relays_a_state_sync_exactly_once() {
        let h = Harness::new(1);
        let clerk = ClerkProcessor::new(h.ctx.clone());
        let task = state_sync(48, vec![1, 2, 3]);

        assert!(clerk.handle(tasks::SEND_STATE_SYNCED, &task).await.is_ok());
        let msgs = h.consensus.broadcast_msgs();
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            ConsensusMsg::EventRecord {
                id,
                tx_hash,
                log_index,
                block_number,
                data,
                chain_id,
                ..
            } => {
                assert_eq!(*id, 48);
                assert_eq!(*tx_hash, H256::repeat_byte(0x42));
                assert_eq!(*log_index, 3);
                assert_eq!(*block_number, 100);
                assert_eq!(data.as_ref(), &[1, 2, 3]);
                assert_eq!(chain_id, "15001");
            }
            other => panic!("unexpected message {other:?}"),
        }

        // the record is on chain now, a second delivery is a no-op.
        assert!(clerk.handle(tasks::SEND_STATE_SYNCED, &task).await.is_ok());
        assert_eq!(h.consensus.state().attempts.len(), 1);
    }

    #[tokio::test]
    async fn oversized_data_is_relayed_empty() {
        let h = Harness::new(1);
        let clerk = ClerkProcessor::new(h.ctx.clone());
        let task = state_sync(1, vec![0xab; 30_001]);
        assert!(clerk.handle(tasks::SEND_STATE_SYNCED, &task).await.is_ok());
        match &h.consensus.broadcast_msgs()[0] {
            ConsensusMsg::EventRecord { data, .. } => assert!(data.is_empty()),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn pending_records_are_retried_later() {
        let h = Harness::new(1);
        let clerk = ClerkProcessor::new(h.ctx.clone());
        let pending = StdTx {
            msg: ConsensusMsg::EventRecord {
                from: Address::repeat_byte(1),
                tx_hash: H256::repeat_byte(0x42),
                log_index: 3,
                block_number: 100,
                contract_address: Address::repeat_byte(7),
                data: Bytes::new(),
                id: 5,
                chain_id: "15001".into(),
            },
            fee: StdFee::default(),
            signature: String::new(),
            memo: String::new(),
        };
        let raw = base64::engine::general_purpose::STANDARD
            .encode(serde_json::to_vec(&pending).unwrap());
        h.consensus.state().unconfirmed_txs = vec!["bm90IGEgdHg=".into(), raw];

        let outcome = clerk
            .handle(tasks::SEND_STATE_SYNCED, &state_sync(5, vec![]))
            .await;
        assert!(matches!(
            outcome,
            TaskOutcome::RetryAfter(d) if d == Duration::from_secs(24)
        ));
        assert!(h.consensus.state().attempts.is_empty());
    }

    #[tokio::test]
    async fn rejected_broadcasts_fail_the_task() {
        let h = Harness::new(1);
        h.consensus.state().scripted.push_back(
            bridge_relayer_types::consensus::TxResponse {
                code: 5,
                raw_log: "insufficient funds".into(),
                ..Default::default()
            },
        );
        let clerk = ClerkProcessor::new(h.ctx.clone());
        let outcome = clerk
            .handle(tasks::SEND_STATE_SYNCED, &state_sync(9, vec![]))
            .await;
        assert!(matches!(
            outcome,
            TaskOutcome::Fail(bridge_relayer_utils::Error::ConsensusTx { code: 5, .. })
        ));
    }
}
