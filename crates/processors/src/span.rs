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

//! Span proposals. A span is the range of child chain blocks produced by one
//! selection of block producers; the next one has to be on the consensus
//! chain before the child chain reaches its first block.

use std::sync::Arc;
use std::time::Duration;

use bridge_relayer_context::Shutdown;
use bridge_relayer_types::consensus::Span;
use bridge_relayer_types::msgs::ConsensusMsg;
use bridge_relayer_utils::probe;
use ethers::types::Address;

use crate::{run_every, ProcessorContext};

/// Whether `me` may propose or backfill after `span`: either as one of its
/// producers or as the proposer of its validator set.
pub fn is_span_proposer(span: &Span, me: Address) -> bool {
    span.selected_producers.iter().any(|v| v.signer == me)
        || span
            .validator_set
            .proposer
            .as_ref()
            .map(|p| p.signer == me)
            .unwrap_or(false)
}

/// Proposes the next span, and backfills span records the child chain has
/// already moved past.
#[derive(Debug)]
pub struct SpanProcessor {
    ctx: ProcessorContext,
}

impl SpanProcessor {
    /// Creates the processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    /// One proposal round.
    #[tracing::instrument(skip_all)]
    pub async fn propose(&self) -> bridge_relayer_utils::Result<()> {
        let span = self.ctx.consensus.latest_span().await?;
        let me = self.ctx.me();
        if !is_span_proposer(&span, me) {
            tracing::debug!(span_id = span.span_id, "not a producer of the latest span");
            return Ok(());
        }
        let head = self.ctx.child_chain.latest_header().await?.number;
        if span.start_block <= head && head <= span.end_block {
            self.propose_next(&span, me).await
        } else if head > span.end_block {
            self.backfill(&span, me, head).await
        } else {
            tracing::debug!(
                head,
                start = span.start_block,
                "latest span has not started yet"
            );
            Ok(())
        }
    }

    async fn propose_next(
        &self,
        span: &Span,
        me: Address,
    ) -> bridge_relayer_utils::Result<()> {
        let chain_id = self.ctx.bor_chain_id();
        let span_id = span.span_id + 1;
        let start_block = span.end_block + 1;
        let next = self
            .ctx
            .consensus
            .prepare_next_span(span_id, start_block, &chain_id)
            .await?;
        let seed = self.ctx.consensus.next_span_seed().await?;
        tracing::info!(
            span_id,
            start_block,
            end_block = next.end_block,
            ?seed,
            "✅ Proposing new span"
        );
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Proposal,
            proposal = "span",
            span_id,
        );
        self.ctx
            .broadcaster
            .consensus
            .broadcast(ConsensusMsg::ProposeSpan {
                span_id,
                proposer: me,
                start_block,
                end_block: next.end_block,
                chain_id,
                seed,
            })
            .await?;
        Ok(())
    }

    async fn backfill(
        &self,
        span: &Span,
        me: Address,
        head: u64,
    ) -> bridge_relayer_utils::Result<()> {
        let bor_span_id = self.ctx.child_contracts.current_span_id().await?;
        if bor_span_id <= span.span_id {
            tracing::warn!(
                head,
                span_end = span.end_block,
                span_id = span.span_id,
                bor_span_id,
                "child chain is past the latest span but did not switch spans"
            );
            return Ok(());
        }
        tracing::info!(
            latest_span_id = span.span_id,
            latest_bor_span_id = bor_span_id,
            "✅ Backfilling spans"
        );
        self.ctx
            .broadcaster
            .consensus
            .broadcast(ConsensusMsg::BackfillSpans {
                proposer: me,
                chain_id: self.ctx.bor_chain_id(),
                latest_span_id: span.span_id,
                latest_bor_span_id: bor_span_id,
            })
            .await?;
        Ok(())
    }

    /// Runs proposal rounds until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let interval = Duration::from_millis(self.ctx.config.span.poll_interval);
        run_every("span", interval, shutdown, || self.propose()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{other, Harness};
    use bridge_relayer_types::consensus::{Validator, ValidatorSet};
    use ethers::types::H256;

    fn span_produced_by(h: &Harness, producers: Vec<Validator>, end_block: u64) {
        let validators = h.consensus.state().validators.clone();
        h.consensus.state().latest_span = Span {
            span_id: 5,
            start_block: end_block + 1 - 6400,
            end_block,
            validator_set: ValidatorSet {
                proposer: producers.first().cloned(),
                validators,
            },
            selected_producers: producers,
            bor_chain_id: "15001".into(),
        };
    }

    #[tokio::test]
    async fn producers_propose_the_next_span() {
        let h = Harness::new(1);
        let validators = h.consensus.state().validators.clone();
        span_produced_by(&h, validators, 6399);
        h.consensus.state().next_span_seed = H256::repeat_byte(0x5e);
        h.child.extend_to(100, 0);

        SpanProcessor::new(h.ctx.clone()).propose().await.unwrap();
        assert_eq!(
            h.consensus.broadcast_msgs(),
            vec![ConsensusMsg::ProposeSpan {
                span_id: 6,
                proposer: h.me(),
                start_block: 6400,
                end_block: 12_799,
                chain_id: "15001".into(),
                seed: H256::repeat_byte(0x5e),
            }]
        );
    }

    #[tokio::test]
    async fn other_validators_stay_quiet() {
        let h = Harness::new(2);
        let first = h.consensus.state().validators[0].clone();
        assert_eq!(first.signer, other(1));
        span_produced_by(&h, vec![first], 6399);
        h.child.extend_to(100, 0);

        SpanProcessor::new(h.ctx.clone()).propose().await.unwrap();
        assert!(h.consensus.state().attempts.is_empty());
    }

    #[tokio::test]
    async fn lagging_span_records_are_backfilled() {
        let h = Harness::new(1);
        let validators = h.consensus.state().validators.clone();
        span_produced_by(&h, validators, 6399);
        h.child.extend_to(7000, 0);
        *h.child_contracts.current_span_id.lock() = 7;

        SpanProcessor::new(h.ctx.clone()).propose().await.unwrap();
        assert_eq!(
            h.consensus.broadcast_msgs(),
            vec![ConsensusMsg::BackfillSpans {
                proposer: h.me(),
                chain_id: "15001".into(),
                latest_span_id: 5,
                latest_bor_span_id: 7,
            }]
        );
    }

    #[tokio::test]
    async fn nothing_to_backfill_when_the_child_chain_agrees() {
        let h = Harness::new(1);
        let validators = h.consensus.state().validators.clone();
        span_produced_by(&h, validators, 6399);
        h.child.extend_to(7000, 0);
        *h.child_contracts.current_span_id.lock() = 5;

        SpanProcessor::new(h.ctx.clone()).propose().await.unwrap();
        assert!(h.consensus.state().attempts.is_empty());
    }
}
