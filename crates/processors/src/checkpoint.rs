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

//! Checkpoints move child chain blocks to the root chain in three steps: the
//! proposer stages a checkpoint on the consensus chain, the current proposer
//! submits the signed checkpoint to the root chain, and every validator
//! acknowledges the resulting `NewHeaderBlock`. When no ack shows up for too
//! long, the next proposers in line send a no-ack so the proposer rotates.

use std::sync::Arc;
use std::time::Duration;

use bridge_relayer_chain_client::events::NewHeaderBlock;
use bridge_relayer_chain_client::{validator, ChainHeader, HeaderBlock};
use bridge_relayer_context::Shutdown;
use bridge_relayer_task_queue::TaskOutcome;
use bridge_relayer_types::consensus::{CheckpointParams, TxResponse};
use bridge_relayer_types::msgs::ConsensusMsg;
use bridge_relayer_utils::probe;
use ethers::types::U256;

use crate::event::{payload, root_chain_event};
use crate::{now_secs, root_hash, run_every, tasks, Processor, ProcessorContext};

/// A candidate checkpoint, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointRange {
    /// First child block.
    pub start: u64,
    /// Last child block.
    pub end: u64,
}

impl CheckpointRange {
    /// Whether the range is worth proposing.
    pub fn is_proposable(&self) -> bool {
        self.end != 0 && self.start < self.end
    }
}

/// The next checkpoint after header block `last`, given the latest confirmed
/// child block and the wall clock `now` in unix seconds.
///
/// The range is rounded down to a multiple of the average checkpoint length
/// and capped at the max length. When that leaves nothing to propose and the
/// last checkpoint is older than twice the max length (in seconds), the
/// range is stretched to `latest_child_block` so the chain keeps moving.
pub fn next_expected_checkpoint(
    last: &HeaderBlock,
    latest_child_block: u64,
    params: &CheckpointParams,
    now: u64,
) -> CheckpointRange {
    let start = if last.end > 0 { last.end + 1 } else { 0 };
    let avg = params.avg_checkpoint_length.max(1);
    let max = params.max_checkpoint_length.max(1);

    let diff = (latest_child_block + 1).saturating_sub(start);
    let mut end = 0;
    if diff > 0 {
        let mut expected_diff = diff - diff % avg;
        if expected_diff > 0 {
            expected_diff -= 1;
        }
        expected_diff = expected_diff.min(max - 1);
        end = start + expected_diff;
        tracing::debug!(latest = latest_child_block, start, end, "calculating checkpoint eligibility");
    }

    let degenerate = end == 0 || end == start || (0 < diff && diff < avg);
    let force_push_after = max.saturating_mul(2);
    if degenerate && now.saturating_sub(last.created_at) > force_push_after {
        end = latest_child_block;
        tracing::info!(
            now,
            last_checkpoint_time = last.created_at,
            force_push_after,
            start,
            end,
            "force push checkpoint"
        );
    }
    CheckpointRange { start, end }
}

/// How many checkpoint intervals went by without an ack, 0 when a no-ack is
/// not due yet. A root chain without any checkpoint counts as one.
pub fn no_ack_count(last_created_at: u64, now: u64, wait: Duration) -> u64 {
    if last_created_at == 0 {
        return 1;
    }
    let wait = wait.as_secs().max(1);
    let elapsed = now.saturating_sub(last_created_at);
    if elapsed >= wait {
        elapsed / wait
    } else {
        0
    }
}

fn dec(raw: &str) -> bridge_relayer_utils::Result<U256> {
    U256::from_dec_str(raw).map_err(|e| {
        bridge_relayer_utils::Error::Decode(format!("{raw} is not a decimal number: {e}"))
    })
}

/// Start and end block of the `checkpoint` event of a consensus transaction.
fn checkpoint_bounds(tx: &TxResponse) -> Option<(u64, u64)> {
    let event = tx.events().find(|e| e.kind == "checkpoint")?;
    let start = event.attribute("start-block")?.parse().ok()?;
    let end = event.attribute("end-block")?.parse().ok()?;
    Some((start, end))
}

/// Proposes, acknowledges and submits checkpoints.
#[derive(Debug)]
pub struct CheckpointProcessor {
    ctx: ProcessorContext,
}

impl CheckpointProcessor {
    /// Creates the processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    async fn last_header_block(&self) -> bridge_relayer_utils::Result<HeaderBlock> {
        let contracts = self.ctx.root_contracts();
        let number = contracts.current_header_block().await?;
        contracts.header_block(number).await
    }

    #[tracing::instrument(skip_all, fields(task = tasks::SEND_CHECKPOINT))]
    async fn send_checkpoint(&self, args: &[String]) -> bridge_relayer_utils::Result<()> {
        let Some(header) = payload::<ChainHeader>(args) else {
            return Ok(());
        };
        tracing::info!(header_number = header.number, "processing new header");
        let me = self.ctx.me();
        if !validator::is_proposer(self.ctx.consensus.as_ref(), me).await? {
            tracing::info!(header_number = header.number, "i am not the proposer. skipping newheader");
            return Ok(());
        }

        let chain_params = self.ctx.consensus.chain_manager_params().await?;
        let confirmations = chain_params.maticchain_tx_confirmations;
        let latest = if header.finalized {
            header.number
        } else {
            match header.number.checked_sub(confirmations) {
                Some(n) => n,
                None => {
                    tracing::debug!(header_number = header.number, confirmations, "child chain too short");
                    return Ok(());
                }
            }
        };

        let params = self.ctx.consensus.checkpoint_params().await?;
        let last = self.last_header_block().await?;
        let range = next_expected_checkpoint(&last, latest, &params, now_secs());

        if let Some(buffered) = self.ctx.consensus.buffered_checkpoint().await? {
            let age = now_secs().saturating_sub(buffered.timestamp);
            if age < params.buffer_time().as_secs() {
                tracing::info!(
                    start = buffered.start_block,
                    end = buffered.end_block,
                    age,
                    "checkpoint already in buffer"
                );
                return Ok(());
            }
        }

        if !range.is_proposable() {
            tracing::info!(
                start = range.start,
                end = range.end,
                "waiting for blocks or invalid start end formation"
            );
            return Ok(());
        }

        let root = root_hash(self.ctx.child_chain.as_ref(), range.start, range.end).await?;
        let account_root = self.ctx.consensus.dividend_account_root().await?;
        tracing::info!(
            start = range.start,
            end = range.end,
            ?root,
            ?account_root,
            "✅ Creating and broadcasting new checkpoint"
        );
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Proposal,
            proposal = "checkpoint",
            start = range.start,
            end = range.end,
        );
        self.ctx
            .broadcaster
            .consensus
            .broadcast(ConsensusMsg::Checkpoint {
                proposer: me,
                start_block: range.start,
                end_block: range.end,
                root_hash: root,
                account_root_hash: account_root,
                bor_chain_id: self.ctx.bor_chain_id(),
            })
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(task = tasks::SEND_CHECKPOINT_ACK))]
    async fn send_checkpoint_ack(&self, args: &[String]) -> bridge_relayer_utils::Result<()> {
        let Some((event, at)) = root_chain_event::<NewHeaderBlock>(args) else {
            return Ok(());
        };
        let header_id = event.header_block_id.low_u64();
        let params = self.ctx.consensus.checkpoint_params().await?;
        let interval = params.child_chain_block_interval.max(1);
        let acks = self.ctx.consensus.ack_count().await?;
        if header_id / interval <= acks {
            tracing::info!(header_id, acks, "checkpoint already acknowledged");
            return Ok(());
        }
        tracing::info!(
            header_id,
            start = %event.start,
            end = %event.end,
            reward = %event.reward,
            root = ?event.root,
            proposer = ?event.proposer,
            tx_hash = ?at.tx_hash,
            log_index = at.log_index,
            "✅ Received task to send checkpoint-ack to heimdall"
        );
        self.ctx
            .broadcaster
            .consensus
            .broadcast(ConsensusMsg::CheckpointAck {
                from: self.ctx.me(),
                number: header_id,
                proposer: event.proposer,
                start_block: event.start.low_u64(),
                end_block: event.end.low_u64(),
                root_hash: event.root,
                tx_hash: at.tx_hash,
                log_index: at.log_index,
            })
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(task = tasks::SEND_CHECKPOINT_TO_ROOT_CHAIN))]
    async fn send_checkpoint_to_root_chain(
        &self,
        args: &[String],
    ) -> bridge_relayer_utils::Result<()> {
        let Some(tx) = payload::<TxResponse>(args) else {
            return Ok(());
        };
        let Some((start, end)) = checkpoint_bounds(&tx) else {
            tracing::error!(txhash = %tx.txhash, "transaction carries no checkpoint event");
            return Ok(());
        };
        tracing::info!(start, end, txhash = %tx.txhash, "processing checkpoint confirmation event");
        if !validator::is_current_proposer(self.ctx.consensus.as_ref(), self.ctx.me()).await? {
            tracing::info!(start, end, "i am not the current proposer. skipping checkpoint confirmation");
            return Ok(());
        }

        let query = [
            ("checkpoint.start-block", start.to_string()),
            ("checkpoint.end-block", end.to_string()),
            ("message.action", String::from("checkpoint")),
        ];
        let found = self.ctx.consensus.search_txs(&query, 1, 1).await?;
        let Some(checkpoint_tx) = found.txs.first() else {
            tracing::info!(start, end, "no checkpoint tx found on heimdall");
            return Ok(());
        };

        let proof = self.ctx.consensus.side_tx_proof(&checkpoint_tx.txhash).await?;
        let last_child = self.ctx.root_contracts().last_child_block().await?;
        tracing::info!(last_child, start, "validating if checkpoint needs to be pushed");
        if last_child + 1 == start || (last_child == 0 && start == 0) {
            let data = hex::decode(proof.data.trim_start_matches("0x"))?;
            let sigs = proof
                .sigs
                .iter()
                .map(|[r, s, v]| Ok([dec(r)?, dec(s)?, dec(v)?]))
                .collect::<bridge_relayer_utils::Result<Vec<_>>>()?;
            self.ctx
                .broadcaster
                .root_chain
                .submit_checkpoint(data.into(), sigs)
                .await?;
        } else if last_child > end {
            tracing::info!(last_child, start, "checkpoint already sent");
        } else if last_child > start {
            tracing::info!(last_child, start, "start block does not match, checkpoint already sent");
        } else {
            tracing::info!(last_child, start, "no need to send checkpoint");
        }
        Ok(())
    }

    /// Sends a no-ack when the root chain saw no checkpoint for too long and
    /// the local validator is next in line.
    #[tracing::instrument(skip_all)]
    pub async fn handle_no_ack(&self) -> bridge_relayer_utils::Result<()> {
        let last = self.last_header_block().await?;
        let now = now_secs();
        let wait = Duration::from_millis(self.ctx.config.checkpoint.no_ack_wait_time);
        let count = no_ack_count(last.created_at, now, wait);
        if count == 0 {
            return Ok(());
        }
        let params = self.ctx.consensus.checkpoint_params().await?;
        let last_no_ack = self.ctx.consensus.last_no_ack().await?;
        if last_no_ack != 0 && now.saturating_sub(last_no_ack) < params.buffer_time().as_secs() {
            tracing::debug!(
                since = now.saturating_sub(last_no_ack),
                buffer = params.buffer_time().as_secs(),
                "cannot send multiple no-ack in short time"
            );
            return Ok(());
        }
        let me = self.ctx.me();
        if !validator::is_in_proposer_list(self.ctx.consensus.as_ref(), me, count).await? {
            tracing::debug!(count, "not in the no-ack proposer list");
            return Ok(());
        }
        tracing::info!(count, last_checkpoint_time = last.created_at, "✅ Creating and broadcasting no-ack");
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Proposal,
            proposal = "no-ack",
            count,
        );
        self.ctx
            .broadcaster
            .consensus
            .broadcast(ConsensusMsg::CheckpointNoAck { from: me })
            .await?;
        Ok(())
    }

    /// Runs the no-ack loop until shutdown.
    pub async fn run_no_ack(self: Arc<Self>, shutdown: Shutdown) {
        let interval = Duration::from_millis(self.ctx.config.checkpoint.no_ack_poll_interval);
        run_every("checkpoint-no-ack", interval, shutdown, || self.handle_no_ack()).await
    }
}

#[async_trait::async_trait]
impl Processor for CheckpointProcessor {
    const NAME: &'static str = "checkpoint";
    const TASKS: &'static [&'static str] = &[
        tasks::SEND_CHECKPOINT,
        tasks::SEND_CHECKPOINT_ACK,
        tasks::SEND_CHECKPOINT_TO_ROOT_CHAIN,
    ];

    async fn handle(&self, task: &str, args: &[String]) -> TaskOutcome {
        let result = match task {
            tasks::SEND_CHECKPOINT => self.send_checkpoint(args).await,
            tasks::SEND_CHECKPOINT_ACK => self.send_checkpoint_ack(args).await,
            tasks::SEND_CHECKPOINT_TO_ROOT_CHAIN => {
                self.send_checkpoint_to_root_chain(args).await
            }
            _ => {
                tracing::warn!(task, "not a checkpoint task");
                Ok(())
            }
        };
        result.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{args, at, log_args, Harness};
    use bridge_relayer_chain_client::mock::new_header_block_log;
    use bridge_relayer_types::consensus::{
        AbciMessageLog, Attribute, Checkpoint, SideTxProof, StringEvent,
    };
    use ethers::types::H256;

    fn params() -> CheckpointParams {
        CheckpointParams {
            checkpoint_buffer_time: 1_000_000_000_000,
            avg_checkpoint_length: 256,
            max_checkpoint_length: 1024,
            child_chain_block_interval: 10_000,
        }
    }

    fn header_ending_at(end: u64, created_at: u64) -> HeaderBlock {
        HeaderBlock {
            end,
            created_at,
            ..Default::default()
        }
    }

    #[test]
    fn range_rounds_down_to_the_average_length() {
        let now = now_secs();
        let range = next_expected_checkpoint(&header_ending_at(1023, now), 2050, &params(), now);
        assert_eq!(range, CheckpointRange { start: 1024, end: 2047 });
        assert!(range.is_proposable());
    }

    #[test]
    fn first_checkpoint_starts_at_zero() {
        let now = now_secs();
        let range = next_expected_checkpoint(&HeaderBlock::default(), 300, &params(), now);
        assert_eq!(range, CheckpointRange { start: 0, end: 255 });
    }

    #[test]
    fn ranges_never_exceed_the_max_length() {
        let now = now_secs();
        let last = header_ending_at(1023, now);
        for latest in [1000, 1024, 1279, 1280, 2047, 5000, 100_000] {
            let range = next_expected_checkpoint(&last, latest, &params(), now);
            if range.is_proposable() {
                assert!(range.end >= range.start);
                assert!(range.end - range.start + 1 <= 1024, "{range:?}");
            }
        }
    }

    #[test]
    fn stalled_child_chain_is_force_pushed() {
        let now = now_secs();
        // 100 new blocks, less than one average length.
        let fresh = header_ending_at(1023, now - 10);
        let range = next_expected_checkpoint(&fresh, 1123, &params(), now);
        assert!(!range.is_proposable());

        let stale = header_ending_at(1023, now - 2 * 1024 - 1);
        let range = next_expected_checkpoint(&stale, 1123, &params(), now);
        assert_eq!(range, CheckpointRange { start: 1024, end: 1123 });
    }

    #[test]
    fn no_ack_is_due_after_whole_intervals() {
        let wait = Duration::from_secs(1800);
        assert_eq!(no_ack_count(0, 5, wait), 1);
        assert_eq!(no_ack_count(1_000, 2_000, wait), 0);
        assert_eq!(no_ack_count(1_000, 2_800, wait), 1);
        assert_eq!(no_ack_count(1_000, 1_000 + 3 * 1800 + 5, wait), 3);
    }

    fn new_header(number: u64) -> Vec<String> {
        let header = ChainHeader {
            number,
            ..Default::default()
        };
        args("newHeader", &header)
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn proposer_sends_the_expected_checkpoint() {
        let h = Harness::new(1);
        h.root.set_last_header(10_000, header_ending_at(1023, now_secs()));
        h.child.extend_to(2060, now_secs());
        h.consensus.state().dividend_account_root = H256::repeat_byte(0xac);
        let processor = CheckpointProcessor::new(h.ctx.clone());

        // 2060 minus 10 confirmations.
        let outcome = processor.handle(tasks::SEND_CHECKPOINT, &new_header(2060)).await;
        assert!(outcome.is_ok());
        let expected_root = root_hash(&h.child, 1024, 2047).await.unwrap();
        let msgs = h.consensus.broadcast_msgs();
        assert_eq!(
            msgs,
            vec![ConsensusMsg::Checkpoint {
                proposer: h.me(),
                start_block: 1024,
                end_block: 2047,
                root_hash: expected_root,
                account_root_hash: H256::repeat_byte(0xac),
                bor_chain_id: "15001".into(),
            }]
        );

        // the checkpoint now sits in the buffer.
        assert!(processor.handle(tasks::SEND_CHECKPOINT, &new_header(2061)).await.is_ok());
        assert_eq!(h.consensus.state().attempts.len(), 1);
    }

    #[tokio::test]
    async fn non_proposers_do_not_checkpoint() {
        let h = Harness::new(2);
        h.root.set_last_header(10_000, header_ending_at(1023, now_secs()));
        h.child.extend_to(2060, now_secs());
        let processor = CheckpointProcessor::new(h.ctx.clone());
        assert!(processor.handle(tasks::SEND_CHECKPOINT, &new_header(2060)).await.is_ok());
        assert!(h.consensus.state().attempts.is_empty());
    }

    #[tokio::test]
    async fn stale_buffer_does_not_block_a_new_checkpoint() {
        let h = Harness::new(1);
        h.root.set_last_header(10_000, header_ending_at(1023, now_secs()));
        h.child.extend_to(2060, now_secs());
        h.consensus.state().buffered_checkpoint = Some(Checkpoint {
            start_block: 0,
            end_block: 1023,
            timestamp: now_secs() - 2_000,
            ..Default::default()
        });
        let processor = CheckpointProcessor::new(h.ctx.clone());
        assert!(processor.handle(tasks::SEND_CHECKPOINT, &new_header(2060)).await.is_ok());
        assert_eq!(h.consensus.broadcast_msgs().len(), 1);
    }

    #[tokio::test]
    async fn acks_are_sent_once_per_header_block() {
        let h = Harness::new(1);
        let processor = CheckpointProcessor::new(h.ctx.clone());
        let log = new_header_block_log(at(500, 0x21, 0), h.me(), 10_000, 0, 255, H256::repeat_byte(1));
        let task = log_args("NewHeaderBlock", &log);
        assert!(processor.handle(tasks::SEND_CHECKPOINT_ACK, &task).await.is_ok());
        assert!(processor.handle(tasks::SEND_CHECKPOINT_ACK, &task).await.is_ok());
        let msgs = h.consensus.broadcast_msgs();
        assert_eq!(msgs.len(), 1);
        assert!(matches!(
            &msgs[0],
            ConsensusMsg::CheckpointAck { number: 10_000, start_block: 0, end_block: 255, log_index: 0, .. }
        ));
    }

    fn checkpoint_tx(start: u64, end: u64) -> TxResponse {
        TxResponse {
            height: 77,
            txhash: "c0ffee".into(),
            logs: vec![AbciMessageLog {
                msg_index: 0,
                events: vec![StringEvent {
                    kind: "checkpoint".into(),
                    attributes: vec![
                        Attribute {
                            key: "start-block".into(),
                            value: start.to_string(),
                        },
                        Attribute {
                            key: "end-block".into(),
                            value: end.to_string(),
                        },
                    ],
                }],
            }],
            ..Default::default()
        }
    }

    fn with_checkpoint_on_consensus(h: &Harness, start: u64, end: u64) {
        let mut state = h.consensus.state();
        state.checkpoint_txs.push(checkpoint_tx(start, end));
        state.side_tx_proofs.insert(
            "c0ffee".into(),
            SideTxProof {
                sigs: vec![["1".into(), "2".into(), "27".into()]],
                tx: String::new(),
                data: "0xdeadbeef".into(),
            },
        );
    }

    #[tokio::test]
    async fn current_proposer_submits_to_the_root_chain() {
        let h = Harness::new(1);
        with_checkpoint_on_consensus(&h, 1024, 2047);
        h.root.set_last_header(10_000, header_ending_at(1023, now_secs()));
        let processor = CheckpointProcessor::new(h.ctx.clone());
        let task = args("checkpoint", &checkpoint_tx(1024, 2047));

        assert!(processor.handle(tasks::SEND_CHECKPOINT_TO_ROOT_CHAIN, &task).await.is_ok());
        let submissions = h.root.state().submissions.clone();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].0.to_vec(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(submissions[0].1, vec![[U256::from(1), U256::from(2), U256::from(27)]]);

        // already on the root chain.
        h.root.set_last_header(20_000, header_ending_at(2047, now_secs()));
        assert!(processor.handle(tasks::SEND_CHECKPOINT_TO_ROOT_CHAIN, &task).await.is_ok());
        assert_eq!(h.root.state().submissions.len(), 1);
    }

    #[tokio::test]
    async fn only_the_current_proposer_submits() {
        let h = Harness::new(2);
        with_checkpoint_on_consensus(&h, 1024, 2047);
        h.root.set_last_header(10_000, header_ending_at(1023, now_secs()));
        let processor = CheckpointProcessor::new(h.ctx.clone());
        let task = args("checkpoint", &checkpoint_tx(1024, 2047));
        assert!(processor.handle(tasks::SEND_CHECKPOINT_TO_ROOT_CHAIN, &task).await.is_ok());
        assert!(h.root.state().submissions.is_empty());
    }

    #[tokio::test]
    async fn no_ack_goes_to_the_next_proposer_once() {
        // second in line: eligible after one missed interval.
        let h = Harness::new(2);
        let wait = h.ctx.config.checkpoint.no_ack_wait_time / 1000;
        h.root.set_last_header(10_000, header_ending_at(1023, now_secs() - wait - 5));
        let processor = CheckpointProcessor::new(h.ctx.clone());

        processor.handle_no_ack().await.unwrap();
        assert_eq!(
            h.consensus.broadcast_msgs(),
            vec![ConsensusMsg::CheckpointNoAck { from: h.me() }]
        );
        // within the buffer time of the last no-ack.
        processor.handle_no_ack().await.unwrap();
        assert_eq!(h.consensus.state().attempts.len(), 1);
    }

    #[tokio::test]
    async fn no_ack_waits_for_the_wait_time() {
        let h = Harness::new(2);
        h.root.set_last_header(10_000, header_ending_at(1023, now_secs() - 60));
        let processor = CheckpointProcessor::new(h.ctx.clone());
        processor.handle_no_ack().await.unwrap();
        assert!(h.consensus.state().attempts.is_empty());
    }
}
