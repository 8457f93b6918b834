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

use bridge_relayer_chain_client::events::{
    uncompressed_pubkey, SignerChange, StakeUpdate, Staked, UnstakeInit,
};
use bridge_relayer_chain_client::TxModule;
use bridge_relayer_task_queue::TaskOutcome;
use bridge_relayer_types::msgs::ConsensusMsg;

use crate::event::{already_relayed, root_chain_event};
use crate::{tasks, Processor, ProcessorContext};

/// Where the consensus chain stands relative to a staking event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceCheck {
    /// The event is the next one for the validator.
    Next,
    /// The event, or a later one, is already applied.
    Applied,
    /// Earlier events are still missing.
    Behind,
}

/// Compares the consensus chain nonce of a validator with the nonce of an
/// event.
pub fn check_nonce(consensus_nonce: u64, event_nonce: u64) -> NonceCheck {
    if consensus_nonce >= event_nonce {
        NonceCheck::Applied
    } else if consensus_nonce.saturating_add(1) == event_nonce {
        NonceCheck::Next
    } else {
        NonceCheck::Behind
    }
}

/// Relays validator joins, stake updates, signer changes and exits.
#[derive(Debug)]
pub struct StakingProcessor {
    ctx: ProcessorContext,
}

impl StakingProcessor {
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

    /// `None` when the event may be relayed now, the outcome to return
    /// otherwise.
    async fn nonce_gate(&self, validator_id: u64, nonce: u64) -> Option<TaskOutcome> {
        let validator = match self.ctx.consensus.validator(validator_id).await {
            Ok(v) => v,
            Err(e) => return Some(TaskOutcome::Fail(e)),
        };
        match check_nonce(validator.nonce, nonce) {
            NonceCheck::Next => None,
            NonceCheck::Applied => {
                tracing::info!(
                    validator_id,
                    consensus_nonce = validator.nonce,
                    nonce,
                    "validator nonce already ahead, skipping"
                );
                Some(TaskOutcome::Ok)
            }
            NonceCheck::Behind => {
                let delay = Duration::from_millis(self.ctx.config.task_queue.retry_delay);
                tracing::info!(
                    validator_id,
                    consensus_nonce = validator.nonce,
                    nonce,
                    ?delay,
                    "earlier staking events pending, retrying later"
                );
                Some(TaskOutcome::RetryAfter(delay))
            }
        }
    }

    #[tracing::instrument(skip_all, fields(task = tasks::SEND_VALIDATOR_JOIN))]
    async fn send_validator_join(&self, args: &[String]) -> TaskOutcome {
        let Some((event, at)) = root_chain_event::<Staked>(args) else {
            return TaskOutcome::Ok;
        };
        if already_relayed(&self.ctx, TxModule::Staking, &at).await {
            return TaskOutcome::Ok;
        }
        tracing::info!(
            validator_id = %event.validator_id,
            signer = ?event.signer,
            nonce = %event.nonce,
            tx_hash = ?at.tx_hash,
            log_index = at.log_index,
            "✅ Received task to send validatorjoin to heimdall"
        );
        self.broadcast(ConsensusMsg::ValidatorJoin {
            from: self.ctx.me(),
            id: event.validator_id.low_u64(),
            activation_epoch: event.activation_epoch.low_u64(),
            amount: event.amount,
            signer_pub_key: uncompressed_pubkey(&event.signer_pubkey),
            tx_hash: at.tx_hash,
            log_index: at.log_index,
            block_number: at.block_number,
            nonce: event.nonce.low_u64(),
        })
        .await
    }

    #[tracing::instrument(skip_all, fields(task = tasks::SEND_STAKE_UPDATE))]
    async fn send_stake_update(&self, args: &[String]) -> TaskOutcome {
        let Some((event, at)) = root_chain_event::<StakeUpdate>(args) else {
            return TaskOutcome::Ok;
        };
        if already_relayed(&self.ctx, TxModule::Staking, &at).await {
            return TaskOutcome::Ok;
        }
        let (id, nonce) = (event.validator_id.low_u64(), event.nonce.low_u64());
        if let Some(outcome) = self.nonce_gate(id, nonce).await {
            return outcome;
        }
        tracing::info!(
            validator_id = id,
            nonce,
            new_amount = %event.new_amount,
            tx_hash = ?at.tx_hash,
            log_index = at.log_index,
            "✅ Received task to send stake-update to heimdall"
        );
        self.broadcast(ConsensusMsg::StakeUpdate {
            from: self.ctx.me(),
            id,
            new_amount: event.new_amount,
            tx_hash: at.tx_hash,
            log_index: at.log_index,
            block_number: at.block_number,
            nonce,
        })
        .await
    }

    #[tracing::instrument(skip_all, fields(task = tasks::SEND_SIGNER_CHANGE))]
    async fn send_signer_change(&self, args: &[String]) -> TaskOutcome {
        let Some((event, at)) = root_chain_event::<SignerChange>(args) else {
            return TaskOutcome::Ok;
        };
        if already_relayed(&self.ctx, TxModule::Staking, &at).await {
            return TaskOutcome::Ok;
        }
        let (id, nonce) = (event.validator_id.low_u64(), event.nonce.low_u64());
        if let Some(outcome) = self.nonce_gate(id, nonce).await {
            return outcome;
        }
        tracing::info!(
            validator_id = id,
            nonce,
            old_signer = ?event.old_signer,
            new_signer = ?event.new_signer,
            tx_hash = ?at.tx_hash,
            "✅ Received task to send signer-change to heimdall"
        );
        self.broadcast(ConsensusMsg::SignerChange {
            from: self.ctx.me(),
            id,
            new_signer_pub_key: uncompressed_pubkey(&event.signer_pubkey),
            tx_hash: at.tx_hash,
            log_index: at.log_index,
            block_number: at.block_number,
            nonce,
        })
        .await
    }

    #[tracing::instrument(skip_all, fields(task = tasks::SEND_UNSTAKE_INIT))]
    async fn send_unstake_init(&self, args: &[String]) -> TaskOutcome {
        let Some((event, at)) = root_chain_event::<UnstakeInit>(args) else {
            return TaskOutcome::Ok;
        };
        if already_relayed(&self.ctx, TxModule::Staking, &at).await {
            return TaskOutcome::Ok;
        }
        let (id, nonce) = (event.validator_id.low_u64(), event.nonce.low_u64());
        if let Some(outcome) = self.nonce_gate(id, nonce).await {
            return outcome;
        }
        tracing::info!(
            validator_id = id,
            nonce,
            deactivation_epoch = %event.deactivation_epoch,
            tx_hash = ?at.tx_hash,
            "✅ Received task to send unstake-init to heimdall"
        );
        self.broadcast(ConsensusMsg::UnstakeInit {
            from: self.ctx.me(),
            id,
            deactivation_epoch: event.deactivation_epoch.low_u64(),
            tx_hash: at.tx_hash,
            log_index: at.log_index,
            block_number: at.block_number,
            nonce,
        })
        .await
    }
}

#[async_trait::async_trait]
impl Processor for StakingProcessor {
    const NAME: &'static str = "staking";
    const TASKS: &'static [&'static str] = &[
        tasks::SEND_VALIDATOR_JOIN,
        tasks::SEND_STAKE_UPDATE,
        tasks::SEND_SIGNER_CHANGE,
        tasks::SEND_UNSTAKE_INIT,
    ];

    async fn handle(&self, task: &str, args: &[String]) -> TaskOutcome {
        match task {
            tasks::SEND_VALIDATOR_JOIN => self.send_validator_join(args).await,
            tasks::SEND_STAKE_UPDATE => self.send_stake_update(args).await,
            tasks::SEND_SIGNER_CHANGE => self.send_signer_change(args).await,
            tasks::SEND_UNSTAKE_INIT => self.send_unstake_init(args).await,
            _ => {
                tracing::warn!(task, "not a staking task");
                TaskOutcome::Ok
            }
        }
    }
}
