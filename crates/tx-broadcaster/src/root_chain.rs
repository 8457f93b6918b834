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

use std::sync::Arc;

use bridge_relayer_chain_client::RootChainContracts;
use bridge_relayer_utils::metric::Metrics;
use bridge_relayer_utils::probe;
use ethers::types::{Bytes, H256, U256};
use tokio::sync::Mutex;

/// Submits checkpoints to the root chain one at a time.
pub struct RootChainBroadcaster {
    contracts: Arc<dyn RootChainContracts>,
    lane: Mutex<()>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for RootChainBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootChainBroadcaster").finish()
    }
}

impl RootChainBroadcaster {
    /// Creates the root chain lane.
    pub fn new(
        contracts: Arc<dyn RootChainContracts>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            contracts,
            lane: Mutex::new(()),
            metrics,
        }
    }

    /// Read access to the root chain contracts.
    pub fn contracts(&self) -> &Arc<dyn RootChainContracts> {
        &self.contracts
    }

    /// Submits a signed checkpoint and waits for it to be mined.
    #[tracing::instrument(skip_all, fields(sigs = sigs.len()))]
    pub async fn submit_checkpoint(
        &self,
        data: Bytes,
        sigs: Vec<[U256; 3]>,
    ) -> bridge_relayer_utils::Result<H256> {
        let _lane = self.lane.lock().await;
        match self.contracts.submit_checkpoint(data, sigs).await {
            Ok(tx_hash) => {
                self.metrics
                    .broadcasts_succeeded
                    .with_label_values(&["submit-checkpoint"])
                    .inc();
                tracing::info!(?tx_hash, "checkpoint submitted to the root chain");
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Broadcast,
                    msg = "submit-checkpoint",
                    ?tx_hash,
                    accepted = true,
                );
                Ok(tx_hash)
            }
            Err(e) => {
                self.metrics
                    .broadcasts_failed
                    .with_label_values(&["submit-checkpoint"])
                    .inc();
                tracing::error!(%e, "failed to submit the checkpoint");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_relayer_chain_client::mock::MockRootChain;

    #[tokio::test]
    async fn submissions_reach_the_contract() {
        let root = MockRootChain::default();
        let lane = RootChainBroadcaster::new(
            Arc::new(root.clone()),
            Arc::new(Metrics::new().unwrap()),
        );
        let sigs = vec![[U256::one(), U256::from(2), U256::from(27)]];
        lane.submit_checkpoint(Bytes::from(vec![1, 2]), sigs.clone())
            .await
            .unwrap();
        let state = root.state();
        assert_eq!(state.submissions.len(), 1);
        assert_eq!(state.submissions[0].1, sigs);
    }
}
