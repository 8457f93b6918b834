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

//! Milestones finalize recent child chain blocks on the consensus chain,
//! well before the next checkpoint does.

use std::sync::Arc;
use std::time::Duration;

use bridge_relayer_chain_client::validator;
use bridge_relayer_context::Shutdown;
use bridge_relayer_types::msgs::ConsensusMsg;
use bridge_relayer_utils::probe;

use crate::{run_every, ProcessorContext};

/// Proposes milestones and milestone timeouts.
#[derive(Debug)]
pub struct MilestoneProcessor {
    ctx: ProcessorContext,
}

impl MilestoneProcessor {
    /// Creates the processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    /// The first block of the next milestone.
    async fn next_start(&self) -> bridge_relayer_utils::Result<u64> {
        let count = self.ctx.consensus.milestone_count().await?;
        if count == 0 {
            return Ok(self.ctx.config.milestone.start_height);
        }
        match self.ctx.consensus.latest_milestone().await? {
            Some(latest) => Ok(latest.end_block + 1),
            None => Err(bridge_relayer_utils::Error::UnexpectedResponse(format!(
                "{count} milestones but no latest one"
            ))),
        }
    }

    /// One proposal round.
    #[tracing::instrument(skip_all)]
    pub async fn propose(&self) -> bridge_relayer_utils::Result<()> {
        let config = &self.ctx.config.milestone;
        let height = self.ctx.consensus.latest_height().await?;
        if height < config.fork_height {
            tracing::debug!(height, fork_height = config.fork_height, "milestones not enabled yet");
            return Ok(());
        }
        let me = self.ctx.me();
        if !validator::is_milestone_proposer(self.ctx.consensus.as_ref(), me).await? {
            tracing::debug!("not the milestone proposer");
            return Ok(());
        }

        let start = self.next_start().await?;
        let head = self.ctx.child_chain.latest_header().await?.number;
        let min_head = start + config.length + config.confirmations - 1;
        if head < min_head {
            tracing::debug!(head, start, min_head, "not enough blocks for a milestone");
            return Ok(());
        }
        let end = head - config.confirmations;
        let hash = match self.ctx.child_chain.header_by_number(end + 1).await? {
            Some(next) => next.parent_hash,
            None => {
                return Err(bridge_relayer_utils::Error::UnexpectedResponse(format!(
                    "child chain block {} is missing",
                    end + 1
                )))
            }
        };
        let milestone_id = format!("{} - {:#x}", uuid::Uuid::new_v4(), hash);
        tracing::info!(start, end, ?hash, %milestone_id, "✅ Proposing milestone");
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Proposal,
            proposal = "milestone",
            start,
            end,
        );
        self.ctx
            .broadcaster
            .consensus
            .broadcast(ConsensusMsg::Milestone {
                proposer: me,
                start_block: start,
                end_block: end,
                hash,
                bor_chain_id: self.ctx.bor_chain_id(),
                milestone_id,
            })
            .await?;
        Ok(())
    }

    /// Sends a timeout when the child chain ran too far past the latest
    /// milestone and the local validator is among the first proposers.
    #[tracing::instrument(skip_all)]
    pub async fn timeout(&self) -> bridge_relayer_utils::Result<()> {
        let config = &self.ctx.config.milestone;
        let Some(latest) = self.ctx.consensus.latest_milestone().await? else {
            return Ok(());
        };
        let head = self.ctx.child_chain.latest_header().await?.number;
        let behind = head.saturating_sub(latest.end_block);
        if behind <= config.buffer_length {
            return Ok(());
        }
        let me = self.ctx.me();
        if !validator::is_in_milestone_proposer_list(
            self.ctx.consensus.as_ref(),
            me,
            config.timeout_proposers,
        )
        .await?
        {
            return Ok(());
        }
        tracing::info!(head, last_end = latest.end_block, behind, "✅ Sending milestone timeout");
        self.ctx
            .broadcaster
            .consensus
            .broadcast(ConsensusMsg::MilestoneTimeout { from: me })
            .await?;
        Ok(())
    }

    /// Runs proposal rounds until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let interval = Duration::from_millis(self.ctx.config.milestone.poll_interval);
        run_every("milestone", interval, shutdown, || self.propose()).await
    }

    /// Runs timeout rounds, at half the proposal rate, until shutdown.
    pub async fn run_timeout(self: Arc<Self>, shutdown: Shutdown) {
        let interval = Duration::from_millis(self.ctx.config.milestone.poll_interval * 2);
        run_every("milestone-timeout", interval, shutdown, || self.timeout()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Harness;
    use bridge_relayer_config::RelayerConfig;
    use bridge_relayer_types::consensus::Milestone;
    use ethers::types::H256;

    #[tokio::test]
    async fn proposer_finalizes_confirmed_blocks() {
        let h = Harness::new(1);
        h.child.extend_to(100, 0);
        let processor = MilestoneProcessor::new(h.ctx.clone());

        processor.propose().await.unwrap();
        let msgs = h.consensus.broadcast_msgs();
        assert_eq!(msgs.len(), 1);
        let ConsensusMsg::Milestone { start_block, end_block, hash, milestone_id, .. } = &msgs[0]
        else {
            panic!("expected a milestone, got {:?}", msgs[0]);
        };
        assert_eq!((*start_block, *end_block), (0, 84));
        // hash of block 84.
        assert_eq!(*hash, H256::from_low_u64_be(85));
        assert!(milestone_id.ends_with(&format!(" - {:#x}", hash)));

        // the next one starts at 85 and needs more blocks.
        processor.propose().await.unwrap();
        assert_eq!(h.consensus.state().attempts.len(), 1);
        h.child.extend_to(200, 0);
        processor.propose().await.unwrap();
        assert!(matches!(
            h.consensus.broadcast_msgs().last(),
            Some(ConsensusMsg::Milestone { start_block: 85, end_block: 184, .. })
        ));
    }

    #[tokio::test]
    async fn short_chains_get_no_milestone() {
        let h = Harness::new(1);
        h.child.extend_to(20, 0);
        MilestoneProcessor::new(h.ctx.clone()).propose().await.unwrap();
        assert!(h.consensus.state().attempts.is_empty());
    }

    #[tokio::test]
    async fn only_the_milestone_proposer_proposes() {
        let h = Harness::new(2);
        h.child.extend_to(100, 0);
        MilestoneProcessor::new(h.ctx.clone()).propose().await.unwrap();
        assert!(h.consensus.state().attempts.is_empty());
    }

    #[tokio::test]
    async fn nothing_before_the_fork_height() {
        let mut config = RelayerConfig::default();
        config.milestone.fork_height = 10;
        let h = Harness::with_config(1, config);
        h.child.extend_to(100, 0);
        MilestoneProcessor::new(h.ctx.clone()).propose().await.unwrap();
        assert!(h.consensus.state().attempts.is_empty());
    }

    #[tokio::test]
    async fn stalled_milestones_time_out() {
        let h = Harness::new(2);
        h.consensus.state().latest_milestone = Some(Milestone {
            end_block: 10,
            ..Default::default()
        });
        let processor = MilestoneProcessor::new(h.ctx.clone());

        h.child.extend_to(50, 0);
        processor.timeout().await.unwrap();
        assert!(h.consensus.state().attempts.is_empty());

        h.child.extend_to(100, 0);
        processor.timeout().await.unwrap();
        assert_eq!(
            h.consensus.broadcast_msgs(),
            vec![ConsensusMsg::MilestoneTimeout { from: h.me() }]
        );
    }
}
