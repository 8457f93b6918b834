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

use bridge_relayer_chain_client::ConsensusClient;
use bridge_relayer_config::BroadcasterConfig;
use bridge_relayer_types::consensus::TxResponse;
use bridge_relayer_types::msgs::{
    BroadcastReq, Coin, ConsensusMsg, StdFee, StdSignDoc, StdTx,
};
use bridge_relayer_utils::metric::Metrics;
use bridge_relayer_utils::probe;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256};
use tokio::sync::Mutex;

/// The account number and the next sequence of the local signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountState {
    /// Account number.
    pub account_number: u64,
    /// Sequence of the next transaction.
    pub sequence: u64,
}

/// Broadcasts consensus chain transactions one at a time.
pub struct ConsensusBroadcaster {
    client: Arc<dyn ConsensusClient>,
    wallet: LocalWallet,
    chain_id: String,
    config: BroadcasterConfig,
    /// `None` until the first broadcast, or after a failed refresh.
    account: Mutex<Option<AccountState>>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for ConsensusBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusBroadcaster")
            .field("address", &self.wallet.address())
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

impl ConsensusBroadcaster {
    /// Creates a broadcaster signing with `wallet` for consensus chain
    /// `chain_id`.
    pub fn new(
        client: Arc<dyn ConsensusClient>,
        wallet: LocalWallet,
        chain_id: impl Into<String>,
        config: BroadcasterConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            wallet,
            chain_id: chain_id.into(),
            config,
            account: Mutex::new(None),
            metrics,
        }
    }

    /// Address of the local signer.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// The cached account state, loading it if needed.
    pub async fn account(&self) -> bridge_relayer_utils::Result<AccountState> {
        let mut account = self.account.lock().await;
        self.loaded(&mut account).await
    }

    /// The cached next sequence, without touching the chain.
    pub async fn cached_sequence(&self) -> Option<u64> {
        self.account.lock().await.map(|a| a.sequence)
    }

    async fn fetch_account(
        &self,
    ) -> bridge_relayer_utils::Result<AccountState> {
        let address = self.address();
        let account = self.client.account(address).await?.ok_or_else(|| {
            bridge_relayer_utils::Error::UnexpectedResponse(format!(
                "account {address:?} does not exist on the consensus chain"
            ))
        })?;
        Ok(AccountState {
            account_number: account.account_number,
            sequence: account.sequence,
        })
    }

    async fn loaded(
        &self,
        cached: &mut Option<AccountState>,
    ) -> bridge_relayer_utils::Result<AccountState> {
        match cached {
            Some(state) => Ok(*state),
            None => {
                let state = self.fetch_account().await?;
                tracing::debug!(
                    account_number = state.account_number,
                    sequence = state.sequence,
                    "loaded signer account"
                );
                *cached = Some(state);
                Ok(state)
            }
        }
    }

    async fn fee(&self) -> bridge_relayer_utils::Result<StdFee> {
        let height = self.client.latest_height().await?;
        let amount = if height >= self.config.fee_start_height {
            vec![Coin {
                denom: self.config.fee_denom.clone(),
                amount: self.config.fee_amount.clone(),
            }]
        } else {
            Vec::new()
        };
        Ok(StdFee {
            amount,
            gas: self.config.gas.to_string(),
        })
    }

    fn sign(
        &self,
        msg: ConsensusMsg,
        fee: StdFee,
        state: AccountState,
    ) -> bridge_relayer_utils::Result<BroadcastReq> {
        let memo = String::new();
        let doc = StdSignDoc {
            account_number: state.account_number.to_string(),
            chain_id: &self.chain_id,
            fee: &fee,
            memo: &memo,
            msgs: [&msg],
            sequence: state.sequence.to_string(),
        };
        let hash = H256::from(ethers::utils::keccak256(doc.to_sign_bytes()?));
        let signature = self.wallet.sign_hash(hash)?;
        Ok(BroadcastReq {
            tx: StdTx {
                msg,
                fee,
                signature: hex::encode(signature.to_vec()),
                memo,
            },
            mode: self.config.mode.clone(),
        })
    }

    /// Signs and submits `msg`.
    ///
    /// A transaction the chain answered with a non-zero code is an error. On
    /// any error the cached sequence is fetched again from the chain. Only
    /// signing and submitting hold the account lock.
    #[tracing::instrument(skip_all, fields(msg = msg.kind()))]
    pub async fn broadcast(
        &self,
        msg: ConsensusMsg,
    ) -> bridge_relayer_utils::Result<TxResponse> {
        let kind = msg.kind();
        let fee = self.fee().await?;
        let mut cached = self.account.lock().await;
        let state = self.loaded(&mut cached).await?;
        let result = self.submit(msg, fee, state).await;
        match &result {
            Ok(response) => {
                *cached = Some(AccountState {
                    sequence: state.sequence + 1,
                    ..state
                });
                self.metrics
                    .broadcasts_succeeded
                    .with_label_values(&[kind])
                    .inc();
                tracing::info!(
                    sequence = state.sequence,
                    txhash = %response.txhash,
                    height = response.height,
                    "transaction accepted"
                );
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Broadcast,
                    msg = %kind,
                    sequence = state.sequence,
                    txhash = %response.txhash,
                    accepted = true,
                );
            }
            Err(e) => {
                self.metrics
                    .broadcasts_failed
                    .with_label_values(&[kind])
                    .inc();
                tracing::warn!(%e, sequence = state.sequence, "broadcast failed, refreshing the sequence");
                self.metrics.sequence_refreshes.inc();
                match self.fetch_account().await {
                    Ok(fresh) => {
                        tracing::debug!(
                            cached = state.sequence,
                            fresh = fresh.sequence,
                            "refreshed the account sequence"
                        );
                        *cached = Some(fresh);
                    }
                    Err(refresh) => {
                        tracing::warn!(%refresh, "failed to refresh the sequence");
                        *cached = None;
                    }
                }
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Broadcast,
                    msg = %kind,
                    sequence = state.sequence,
                    errored = true,
                    error = %e,
                );
            }
        }
        result
    }

    async fn submit(
        &self,
        msg: ConsensusMsg,
        fee: StdFee,
        state: AccountState,
    ) -> bridge_relayer_utils::Result<TxResponse> {
        let req = self.sign(msg, fee, state)?;
        let response = self.client.broadcast(&req).await?;
        if response.code != 0 {
            return Err(bridge_relayer_utils::Error::ConsensusTx {
                code: response.code,
                log: response.raw_log,
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_relayer_chain_client::mock::MockConsensusClient;

    fn wallet() -> LocalWallet {
        "8917174396171783496173419137618235192359106130478137647163400318"
            .parse()
            .unwrap()
    }

    fn no_ack(wallet: &LocalWallet) -> ConsensusMsg {
        ConsensusMsg::CheckpointNoAck {
            from: wallet.address(),
        }
    }

    fn broadcaster(
        client: &MockConsensusClient,
        config: BroadcasterConfig,
    ) -> ConsensusBroadcaster {
        let chain_id = client.state().chain_id.clone();
        ConsensusBroadcaster::new(
            Arc::new(client.clone()),
            wallet(),
            chain_id,
            config,
            Arc::new(Metrics::new().unwrap()),
        )
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn accepted_broadcast_bumps_the_sequence() {
        let client = MockConsensusClient::default();
        client.add_account(wallet().address(), 12, 0);
        let b = broadcaster(&client, BroadcasterConfig::default());
        let response = b.broadcast(no_ack(&wallet())).await.unwrap();
        assert_eq!(response.code, 0);
        assert_eq!(b.cached_sequence().await, Some(1));
        assert_eq!(client.state().broadcasts.len(), 1);
    }

    #[tokio::test]
    async fn failed_broadcast_recovers_the_chain_sequence() {
        let client = MockConsensusClient::default();
        let me = wallet().address();
        client.add_account(me, 12, 5);
        let b = broadcaster(&client, BroadcasterConfig::default());
        assert_eq!(b.account().await.unwrap().sequence, 5);
        // two transactions landed from elsewhere.
        client.state().accounts.get_mut(&me).unwrap().sequence = 7;

        let err = b.broadcast(no_ack(&wallet())).await.unwrap_err();
        assert!(matches!(
            err,
            bridge_relayer_utils::Error::ConsensusTx { code: 4, .. }
        ));
        assert_eq!(b.cached_sequence().await, Some(7));

        b.broadcast(no_ack(&wallet())).await.unwrap();
        assert_eq!(b.cached_sequence().await, Some(8));
        assert_eq!(client.state().accounts[&me].sequence, 8);
        assert_eq!(client.state().attempts.len(), 2);
        assert_eq!(client.state().broadcasts.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_broadcasts_are_serialised() {
        let client = MockConsensusClient::default();
        client.add_account(wallet().address(), 1, 0);
        let b = broadcaster(&client, BroadcasterConfig::default());
        let msg = no_ack(&wallet());
        let results = futures::future::join_all(
            (0..5).map(|_| b.broadcast(msg.clone())),
        )
        .await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(b.cached_sequence().await, Some(5));
    }

    #[tokio::test]
    async fn failed_fee_lookup_submits_nothing() {
        let client = MockConsensusClient::default();
        client.add_account(wallet().address(), 1, 3);
        let b = broadcaster(&client, BroadcasterConfig::default());
        assert_eq!(b.account().await.unwrap().sequence, 3);
        client.state().failing_latest_height = 1;
        assert!(b.broadcast(no_ack(&wallet())).await.is_err());
        // nothing was signed, so the sequence is still good.
        assert!(client.state().attempts.is_empty());
        assert_eq!(b.cached_sequence().await, Some(3));
        assert_eq!(b.metrics.sequence_refreshes.get() as u64, 0);

        b.broadcast(no_ack(&wallet())).await.unwrap();
        assert_eq!(b.cached_sequence().await, Some(4));
    }

    #[tokio::test]
    async fn fees_start_at_the_configured_height() {
        let client = MockConsensusClient::default();
        client.add_account(wallet().address(), 1, 0);
        client.state().height = 10;
        let config = BroadcasterConfig {
            fee_start_height: 20,
            ..Default::default()
        };
        let b = broadcaster(&client, config);
        b.broadcast(no_ack(&wallet())).await.unwrap();
        client.state().height = 20;
        b.broadcast(no_ack(&wallet())).await.unwrap();
        let state = client.state();
        assert!(state.broadcasts[0].tx.fee.amount.is_empty());
        assert_eq!(state.broadcasts[1].tx.fee.amount.len(), 1);
        assert_eq!(state.broadcasts[1].tx.fee.gas, "200000");
    }

    #[tokio::test]
    async fn missing_account_is_an_error() {
        let client = MockConsensusClient::default();
        let b = broadcaster(&client, BroadcasterConfig::default());
        assert!(b.broadcast(no_ack(&wallet())).await.is_err());
        assert!(client.state().attempts.is_empty());
    }
}
