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

use bridge_relayer_chain_client::events::{Slashed, UnJailed};
use bridge_relayer_chain_client::TxModule;
use bridge_relayer_task_queue::TaskOutcome;
use bridge_relayer_types::msgs::ConsensusMsg;

use crate::event::{already_relayed, root_chain_event};
use crate::{tasks, Processor, ProcessorContext};

/// Relays slashing ticks and unjails.
#[derive(Debug)]
pub struct SlashingProcessor {
    ctx: ProcessorContext,
}

impl SlashingProcessor {
    /// Creates the processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    async fn broadcast(&self, msg: ConsensusMsg) -> TaskOutcome {
        self.ctx
            .broadcaster
            .consensus
            .broadcast(msg)
            .await
            .map(|_| ())
            .into()
    }

    #[tracing::instrument(skip_all, fields(task = tasks::SEND_TICK_ACK))]
    async fn send_tick_ack(&self, args: &[String]) -> TaskOutcome {
        let Some((event, at)) = root_chain_event::<Slashed>(args) else {
            return TaskOutcome::Ok;
        };
        if already_relayed(&self.ctx, TxModule::Slashing, &at).await {
            return TaskOutcome::Ok;
        }
        tracing::info!(
            nonce = %event.nonce,
            amount = %event.amount,
            tx_hash = ?at.tx_hash,
            "✅ Received task to send tick-ack to heimdall"
        );
        self.broadcast(ConsensusMsg::TickAck {
            from: self.ctx.me(),
            id: event.nonce.low_u64(),
            amount: event.amount,
            tx_hash: at.tx_hash,
            log_index: at.log_index,
            block_number: at.block_number,
        })
        .await
    }

    #[tracing::instrument(skip_all, fields(task = tasks::SEND_UNJAIL))]
    async fn send_unjail(&self, args: &[String]) -> TaskOutcome {
        let Some((event, at)) = root_chain_event::<UnJailed>(args) else {
            return TaskOutcome::Ok;
        };
        if already_relayed(&self.ctx, TxModule::Slashing, &at).await {
            return TaskOutcome::Ok;
        }
        tracing::info!(
            validator_id = %event.validator_id,
            signer = ?event.signer,
            tx_hash = ?at.tx_hash,
            "✅ Received task to send unjail to heimdall"
        );
        self.broadcast(ConsensusMsg::Unjail {
            from: self.ctx.me(),
            id: event.validator_id.low_u64(),
            tx_hash: at.tx_hash,
            log_index: at.log_index,
            block_number: at.block_number,
        })
        .await
    }
}

#[async_trait::async_trait]
impl Processor for SlashingProcessor {
    const NAME: &'static str = "slashing";
    const TASKS: &'static [&'static str] =
        &[tasks::SEND_TICK_ACK, tasks::SEND_UNJAIL];

    async fn handle(&self, task: &str, args: &[String]) -> TaskOutcome {
        match task {
            tasks::SEND_TICK_ACK => self.send_tick_ack(args).await,
            tasks::SEND_UNJAIL => self.send_unjail(args).await,
            _ => {
                tracing::warn!(task, "not a slashing task");
                TaskOutcome::Ok
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{at, log_args, Harness};
    use bridge_relayer_chain_client::mock::slashed_log;
    use ethers::types::U256;

    #[tokio::test]
    async fn tick_acks_carry_the_slashing_nonce() {
        let h = Harness::new(1);
        let slashing = SlashingProcessor::new(h.ctx.clone());
        let task = log_args("Slashed", &slashed_log(at(10, 0x33, 1), 4, U256::from(500)));
        assert!(slashing.handle(tasks::SEND_TICK_ACK, &task).await.is_ok());
        assert!(slashing.handle(tasks::SEND_TICK_ACK, &task).await.is_ok());
        let msgs = h.consensus.broadcast_msgs();
        assert_eq!(msgs.len(), 1);
        assert!(matches!(
            &msgs[0],
            ConsensusMsg::TickAck { id: 4, amount, log_index: 1, .. } if *amount == U256::from(500)
        ));
    }

    #[tokio::test]
    async fn undecodable_events_are_dropped() {
        let h = Harness::new(1);
        let slashing = SlashingProcessor::new(h.ctx.clone());
        // a tick log handed to the unjail task does not decode.
        let task = log_args("UnJailed", &slashed_log(at(10, 0x34, 0), 1, U256::one()));
        assert!(slashing.handle(tasks::SEND_UNJAIL, &task).await.is_ok());
        assert!(h.consensus.state().attempts.is_empty());
    }
}
