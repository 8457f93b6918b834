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

use bridge_relayer_types::consensus::{
    Account, ChainManagerParams, Checkpoint, CheckpointParams, EventRecord,
    Milestone, NodeStatus, ResponseWithHeight, RpcResponse, SearchTxsResult,
    SideTxProof, Span, TxResponse, UnconfirmedTxs, Validator, ValidatorSet,
};
use bridge_relayer_types::msgs::BroadcastReq;
use bridge_relayer_types::rpc_url::RpcUrl;
use bridge_relayer_types::serde_helpers::u64_string;
use bridge_relayer_utils::Error;
use ethers::types::{Address, H256};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

/// Consensus chain modules that track already relayed root chain events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum TxModule {
    #[display(fmt = "staking")]
    Staking,
    #[display(fmt = "topup")]
    Topup,
    #[display(fmt = "clerk")]
    Clerk,
    #[display(fmt = "slashing")]
    Slashing,
}

/// Queries and submissions against the consensus chain.
#[async_trait::async_trait]
pub trait ConsensusClient: Send + Sync {
    /// `/auth/accounts/{address}`, `None` until the account exists.
    async fn account(
        &self,
        address: Address,
    ) -> bridge_relayer_utils::Result<Option<Account>>;
    /// `/chainmanager/params`.
    async fn chain_manager_params(
        &self,
    ) -> bridge_relayer_utils::Result<ChainManagerParams>;
    /// `/checkpoints/params`.
    async fn checkpoint_params(
        &self,
    ) -> bridge_relayer_utils::Result<CheckpointParams>;
    /// `/checkpoints/buffer`, `None` when the buffer is empty.
    async fn buffered_checkpoint(
        &self,
    ) -> bridge_relayer_utils::Result<Option<Checkpoint>>;
    /// `/checkpoints/count`, the number of acknowledged checkpoints.
    async fn ack_count(&self) -> bridge_relayer_utils::Result<u64>;
    /// `/checkpoints/last-no-ack`, unix seconds, 0 when none was sent.
    async fn last_no_ack(&self) -> bridge_relayer_utils::Result<u64>;
    /// `/staking/proposer/{count}`.
    async fn proposers(
        &self,
        count: u64,
    ) -> bridge_relayer_utils::Result<Vec<Validator>>;
    /// `/staking/current-proposer`.
    async fn current_proposer(&self) -> bridge_relayer_utils::Result<Validator>;
    /// `/staking/milestoneProposer/{count}`.
    async fn milestone_proposers(
        &self,
        count: u64,
    ) -> bridge_relayer_utils::Result<Vec<Validator>>;
    /// `/staking/validator-set`.
    async fn validator_set(&self) -> bridge_relayer_utils::Result<ValidatorSet>;
    /// `/staking/validator/{id}`.
    async fn validator(&self, id: u64) -> bridge_relayer_utils::Result<Validator>;
    /// `/bor/latest-span`.
    async fn latest_span(&self) -> bridge_relayer_utils::Result<Span>;
    /// `/bor/prepare-next-span`.
    async fn prepare_next_span(
        &self,
        span_id: u64,
        start_block: u64,
        chain_id: &str,
    ) -> bridge_relayer_utils::Result<Span>;
    /// `/bor/next-span-seed`.
    async fn next_span_seed(&self) -> bridge_relayer_utils::Result<H256>;
    /// `/topup/dividend-account-root`.
    async fn dividend_account_root(&self) -> bridge_relayer_utils::Result<H256>;
    /// `/milestone/count`.
    async fn milestone_count(&self) -> bridge_relayer_utils::Result<u64>;
    /// `/milestone/latest`, `None` before the first milestone.
    async fn latest_milestone(
        &self,
    ) -> bridge_relayer_utils::Result<Option<Milestone>>;
    /// `/clerk/event-record/{id}`, `None` when the record does not exist.
    async fn event_record(
        &self,
        id: u64,
    ) -> bridge_relayer_utils::Result<Option<EventRecord>>;
    /// `/clerk/event-record/latest-id`.
    async fn latest_event_record_id(&self) -> bridge_relayer_utils::Result<u64>;
    /// `/{module}/isoldtx`, whether the event was already relayed.
    async fn is_old_tx(
        &self,
        module: TxModule,
        tx_hash: H256,
        log_index: u64,
    ) -> bridge_relayer_utils::Result<bool>;
    /// `/txs?{events}&page=&limit=`.
    async fn search_txs(
        &self,
        events: &[(&str, String)],
        page: u64,
        limit: u64,
    ) -> bridge_relayer_utils::Result<SearchTxsResult>;
    /// `/txs/{hash}/side-tx`.
    async fn side_tx_proof(
        &self,
        tx_hash: &str,
    ) -> bridge_relayer_utils::Result<SideTxProof>;
    /// Tendermint `/unconfirmed_txs`.
    async fn unconfirmed_txs(&self) -> bridge_relayer_utils::Result<UnconfirmedTxs>;
    /// Tendermint `/num_unconfirmed_txs`, the mempool size.
    async fn num_unconfirmed_txs(&self) -> bridge_relayer_utils::Result<u64>;
    /// Tendermint `/status`, the latest block height.
    async fn latest_height(&self) -> bridge_relayer_utils::Result<u64>;
    /// `POST /txs`. The HTTP call succeeding does not mean the chain accepted
    /// the transaction, check [`TxResponse::code`].
    async fn broadcast(
        &self,
        req: &BroadcastReq,
    ) -> bridge_relayer_utils::Result<TxResponse>;
}

#[derive(Debug, Deserialize)]
struct CountResult {
    #[serde(with = "u64_string")]
    result: u64,
}

#[derive(Debug, Deserialize)]
struct MilestoneCount {
    #[serde(with = "u64_string")]
    count: u64,
}

#[derive(Debug, Deserialize)]
struct LatestRecordId {
    #[serde(with = "u64_string")]
    id: u64,
}

/// [`ConsensusClient`] over the REST server and tendermint RPC.
#[derive(Debug, Clone)]
pub struct RestConsensusClient {
    http: reqwest::Client,
    rest: RpcUrl,
    tendermint: RpcUrl,
}

impl RestConsensusClient {
    /// Creates a new client, `http` should carry the request timeout.
    pub fn new(http: reqwest::Client, rest: RpcUrl, tendermint: RpcUrl) -> Self {
        Self {
            http,
            rest,
            tendermint,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> bridge_relayer_utils::Result<Option<T>> {
        tracing::trace!(%url, "GET");
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(Some(response.json().await?));
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND
            || body.to_lowercase().contains("not found")
        {
            return Ok(None);
        }
        Err(Error::UnexpectedResponse(format!(
            "GET {url} returned {status}: {body}"
        )))
    }

    async fn query<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> bridge_relayer_utils::Result<T> {
        let missing = url.to_string();
        let wrapped: ResponseWithHeight<T> = self
            .get_json(url)
            .await?
            .ok_or_else(|| Error::UnexpectedResponse(format!("{missing} not found")))?;
        Ok(wrapped.result)
    }

    async fn query_optional<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> bridge_relayer_utils::Result<Option<T>> {
        let wrapped: Option<ResponseWithHeight<Option<T>>> =
            self.get_json(url).await?;
        Ok(wrapped.and_then(|w| w.result))
    }

    async fn tendermint<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> bridge_relayer_utils::Result<T> {
        let url = self.tendermint.join_path(path);
        let missing = url.to_string();
        let wrapped: RpcResponse<T> = self
            .get_json(url)
            .await?
            .ok_or_else(|| Error::UnexpectedResponse(format!("{missing} not found")))?;
        Ok(wrapped.result)
    }

    fn rest(&self, path: &str) -> Url {
        self.rest.join_path(path)
    }
}

#[async_trait::async_trait]
impl ConsensusClient for RestConsensusClient {
    async fn account(
        &self,
        address: Address,
    ) -> bridge_relayer_utils::Result<Option<Account>> {
        self.query_optional(self.rest(&format!("/auth/accounts/{address:?}")))
            .await
    }

    async fn chain_manager_params(
        &self,
    ) -> bridge_relayer_utils::Result<ChainManagerParams> {
        self.query(self.rest("/chainmanager/params")).await
    }

    async fn checkpoint_params(
        &self,
    ) -> bridge_relayer_utils::Result<CheckpointParams> {
        self.query(self.rest("/checkpoints/params")).await
    }

    async fn buffered_checkpoint(
        &self,
    ) -> bridge_relayer_utils::Result<Option<Checkpoint>> {
        self.query_optional(self.rest("/checkpoints/buffer")).await
    }

    async fn ack_count(&self) -> bridge_relayer_utils::Result<u64> {
        let count: CountResult =
            self.query(self.rest("/checkpoints/count")).await?;
        Ok(count.result)
    }

    async fn last_no_ack(&self) -> bridge_relayer_utils::Result<u64> {
        let last: CountResult =
            self.query(self.rest("/checkpoints/last-no-ack")).await?;
        Ok(last.result)
    }

    async fn proposers(
        &self,
        count: u64,
    ) -> bridge_relayer_utils::Result<Vec<Validator>> {
        self.query(self.rest(&format!("/staking/proposer/{count}")))
            .await
    }

    async fn current_proposer(&self) -> bridge_relayer_utils::Result<Validator> {
        self.query(self.rest("/staking/current-proposer")).await
    }

    async fn milestone_proposers(
        &self,
        count: u64,
    ) -> bridge_relayer_utils::Result<Vec<Validator>> {
        self.query(self.rest(&format!("/staking/milestoneProposer/{count}")))
            .await
    }

    async fn validator_set(&self) -> bridge_relayer_utils::Result<ValidatorSet> {
        self.query(self.rest("/staking/validator-set")).await
    }

    async fn validator(&self, id: u64) -> bridge_relayer_utils::Result<Validator> {
        self.query(self.rest(&format!("/staking/validator/{id}")))
            .await
    }

    async fn latest_span(&self) -> bridge_relayer_utils::Result<Span> {
        self.query(self.rest("/bor/latest-span")).await
    }

    async fn prepare_next_span(
        &self,
        span_id: u64,
        start_block: u64,
        chain_id: &str,
    ) -> bridge_relayer_utils::Result<Span> {
        let mut url = self.rest("/bor/prepare-next-span");
        url.query_pairs_mut()
            .append_pair("span_id", &span_id.to_string())
            .append_pair("start_block", &start_block.to_string())
            .append_pair("chain_id", chain_id);
        self.query(url).await
    }

    async fn next_span_seed(&self) -> bridge_relayer_utils::Result<H256> {
        self.query(self.rest("/bor/next-span-seed")).await
    }

    async fn dividend_account_root(&self) -> bridge_relayer_utils::Result<H256> {
        self.query(self.rest("/topup/dividend-account-root")).await
    }

    async fn milestone_count(&self) -> bridge_relayer_utils::Result<u64> {
        let count: MilestoneCount =
            self.query(self.rest("/milestone/count")).await?;
        Ok(count.count)
    }

    async fn latest_milestone(
        &self,
    ) -> bridge_relayer_utils::Result<Option<Milestone>> {
        self.query_optional(self.rest("/milestone/latest")).await
    }

    async fn event_record(
        &self,
        id: u64,
    ) -> bridge_relayer_utils::Result<Option<EventRecord>> {
        self.query_optional(self.rest(&format!("/clerk/event-record/{id}")))
            .await
    }

    async fn latest_event_record_id(&self) -> bridge_relayer_utils::Result<u64> {
        let latest: Option<LatestRecordId> = self
            .query_optional(self.rest("/clerk/event-record/latest-id"))
            .await?;
        Ok(latest.map(|l| l.id).unwrap_or_default())
    }

    async fn is_old_tx(
        &self,
        module: TxModule,
        tx_hash: H256,
        log_index: u64,
    ) -> bridge_relayer_utils::Result<bool> {
        let mut url = self.rest(&format!("/{module}/isoldtx"));
        url.query_pairs_mut()
            .append_pair("txhash", &format!("{tx_hash:?}"))
            .append_pair("logindex", &log_index.to_string());
        self.query(url).await
    }

    async fn search_txs(
        &self,
        events: &[(&str, String)],
        page: u64,
        limit: u64,
    ) -> bridge_relayer_utils::Result<SearchTxsResult> {
        let mut url = self.rest("/txs");
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in events {
                pairs.append_pair(key, value);
            }
            pairs
                .append_pair("page", &page.to_string())
                .append_pair("limit", &limit.to_string());
        }
        let result = self.get_json(url).await?;
        Ok(result.unwrap_or_default())
    }

    async fn side_tx_proof(
        &self,
        tx_hash: &str,
    ) -> bridge_relayer_utils::Result<SideTxProof> {
        let hash = tx_hash.trim_start_matches("0x");
        self.query(self.rest(&format!("/txs/{hash}/side-tx"))).await
    }

    async fn unconfirmed_txs(&self) -> bridge_relayer_utils::Result<UnconfirmedTxs> {
        self.tendermint("/unconfirmed_txs").await
    }

    async fn num_unconfirmed_txs(&self) -> bridge_relayer_utils::Result<u64> {
        let txs: UnconfirmedTxs = self.tendermint("/num_unconfirmed_txs").await?;
        Ok(txs.total)
    }

    async fn latest_height(&self) -> bridge_relayer_utils::Result<u64> {
        let status: NodeStatus = self.tendermint("/status").await?;
        Ok(status.sync_info.latest_block_height)
    }

    #[tracing::instrument(skip_all, fields(msg = req.tx.msg.kind()))]
    async fn broadcast(
        &self,
        req: &BroadcastReq,
    ) -> bridge_relayer_utils::Result<TxResponse> {
        let url = self.rest("/txs");
        let response = self.http.post(url.clone()).json(req).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UnexpectedResponse(format!(
                "POST {url} returned {status}: {body}"
            )));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_paths() {
        assert_eq!(TxModule::Clerk.to_string(), "clerk");
        assert_eq!(TxModule::Topup.to_string(), "topup");
    }

    #[test]
    fn count_accepts_numbers_and_strings() {
        let a: ResponseWithHeight<CountResult> =
            serde_json::from_str(r#"{"height":"7","result":{"result":5}}"#)
                .unwrap();
        let b: ResponseWithHeight<CountResult> =
            serde_json::from_str(r#"{"height":"7","result":{"result":"5"}}"#)
                .unwrap();
        assert_eq!(a.result.result, 5);
        assert_eq!(b.result.result, 5);
        assert_eq!(a.height, 7);
    }

    #[test]
    fn empty_buffer_is_none() {
        let r: ResponseWithHeight<Option<Checkpoint>> =
            serde_json::from_str(r#"{"height":"1","result":null}"#).unwrap();
        assert!(r.result.is_none());
    }
}
