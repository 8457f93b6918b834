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

use bridge_relayer_chain_client::events::TopUpFee;
use bridge_relayer_chain_client::TxModule;
use bridge_relayer_task_queue::TaskOutcome;
use bridge_relayer_types::msgs::ConsensusMsg;

use crate::event::{already_relayed, root_chain_event};
use crate::{tasks, Processor, ProcessorContext};

/// Relays fee top-ups.
#[derive(Debug)]
pub struct FeeProcessor {
    ctx: ProcessorContext,
}

impl FeeProcessor {
    /// Creates the processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    #[tracing::instrument(skip_all, fields(task = tasks::SEND_TOP_UP_FEE))]
    async fn send_top_up_fee(&self, args: &[String]) -> TaskOutcome {
        let Some((event, at)) = root_chain_event::<TopUpFee>(args) else {
            return TaskOutcome::Ok;
        };
        if already_relayed(&self.ctx, TxModule::Topup, &at).await {
            return TaskOutcome::Ok;
        }
        tracing::info!(
            user = ?event.user,
            fee = %event.fee,
            tx_hash = ?at.tx_hash,
            log_index = at.log_index,
            "✅ Received task to send topup to heimdall"
        );
        let msg = ConsensusMsg::TopUpFee {
            from: self.ctx.me(),
            user: event.user,
            fee: event.fee,
            tx_hash: at.tx_hash,
            log_index: at.log_index,
            block_number: at.block_number,
        };
        self.ctx
            .broadcaster
            .consensus
            .broadcast(msg)
            .await
            .map(|_| ())
            .into()
    }
}

#[async_trait::async_trait]
impl Processor for FeeProcessor {
    const NAME: &'static str = "fee";
    const TASKS: &'static [&'static str] = &[tasks::SEND_TOP_UP_FEE];

    async fn handle(&self, _task: &str, args: &[String]) -> TaskOutcome {
        self.send_top_up_fee(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{at, log_args, Harness};
    use bridge_relayer_chain_client::mock::top_up_fee_log;
    use ethers::types::U256;

    #[tokio::test]
    async fn top_ups_are_relayed_once() {
        let h = Harness::new(1);
        let fee = FeeProcessor::new(h.ctx.clone());
        let task = log_args(
            "TopUpFee",
            &top_up_fee_log(at(300, 0x70, 2), h.me(), U256::exp10(18)),
        );
        assert!(fee.handle(tasks::SEND_TOP_UP_FEE, &task).await.is_ok());
        assert!(fee.handle(tasks::SEND_TOP_UP_FEE, &task).await.is_ok());
        let msgs = h.consensus.broadcast_msgs();
        assert_eq!(msgs.len(), 1);
        assert!(matches!(
            &msgs[0],
            ConsensusMsg::TopUpFee { user, fee, block_number: 300, .. }
                if *user == h.me() && *fee == U256::exp10(18)
        ));
    }
}
