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

use bridge_relayer_types::serde_helpers::u64_string;
use bridge_relayer_utils::Error;
use ethers::types::H256;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

/// Where a root chain event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedLog {
    pub tx_hash: H256,
    pub log_index: u64,
}

/// Lookups of root chain events through an indexing service.
#[async_trait::async_trait]
pub trait IndexerClient: Send + Sync {
    /// Highest indexed state-sync id, 0 when nothing is indexed.
    async fn latest_state_id(&self) -> bridge_relayer_utils::Result<u64>;

    /// Location of the `StateSynced` event with `id`.
    async fn state_sync(
        &self,
        id: u64,
    ) -> bridge_relayer_utils::Result<Option<IndexedLog>>;

    /// Highest indexed stake update nonce of `validator_id`.
    async fn latest_stake_update_nonce(
        &self,
        validator_id: u64,
    ) -> bridge_relayer_utils::Result<u64>;

    /// Location of the `StakeUpdate` event of `validator_id` with `nonce`.
    async fn stake_update(
        &self,
        validator_id: u64,
        nonce: u64,
    ) -> bridge_relayer_utils::Result<Option<IndexedLog>>;
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateSyncs<T> {
    state_syncs: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StakeUpdates<T> {
    stake_updates: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateIdEntry {
    #[serde(with = "u64_string")]
    state_id: u64,
}

#[derive(Debug, Deserialize)]
struct NonceEntry {
    #[serde(with = "u64_string")]
    nonce: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    #[serde(with = "u64_string")]
    log_index: u64,
    transaction_hash: H256,
}

impl From<LogEntry> for IndexedLog {
    fn from(e: LogEntry) -> Self {
        Self {
            tx_hash: e.transaction_hash,
            log_index: e.log_index,
        }
    }
}

/// [`IndexerClient`] for a GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct GraphQlIndexer {
    http: reqwest::Client,
    url: Url,
    body_limit: usize,
}

impl GraphQlIndexer {
    /// Creates a new client. Responses larger than `body_limit` bytes are
    /// rejected.
    pub fn new(http: reqwest::Client, url: Url, body_limit: usize) -> Self {
        Self {
            http,
            url,
            body_limit,
        }
    }

    #[tracing::instrument(skip(self))]
    async fn query<T: DeserializeOwned>(
        &self,
        query: String,
    ) -> bridge_relayer_utils::Result<T> {
        let body = serde_json::json!({ "query": query });
        let mut response =
            self.http.post(self.url.clone()).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::UnexpectedResponse(format!(
                "indexer returned {status}"
            )));
        }
        if let Some(size) = response.content_length() {
            if size as usize > self.body_limit {
                return Err(Error::ResponseTooLarge {
                    size: size as usize,
                    limit: self.body_limit,
                });
            }
        }
        let mut raw = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if raw.len() + chunk.len() > self.body_limit {
                return Err(Error::ResponseTooLarge {
                    size: raw.len() + chunk.len(),
                    limit: self.body_limit,
                });
            }
            raw.extend_from_slice(&chunk);
        }
        let parsed: GraphQlResponse<T> = serde_json::from_slice(&raw)?;
        match parsed.data {
            Some(data) => Ok(data),
            None => Err(Error::UnexpectedResponse(format!(
                "indexer returned no data: {:?}",
                parsed.errors
            ))),
        }
    }
}

#[async_trait::async_trait]
impl IndexerClient for GraphQlIndexer {
    async fn latest_state_id(&self) -> bridge_relayer_utils::Result<u64> {
        let q = "{ stateSyncs(first: 1, orderBy: stateId, orderDirection: desc) { stateId } }";
        let r: StateSyncs<StateIdEntry> = self.query(q.to_owned()).await?;
        Ok(r.state_syncs.first().map(|e| e.state_id).unwrap_or_default())
    }

    async fn state_sync(
        &self,
        id: u64,
    ) -> bridge_relayer_utils::Result<Option<IndexedLog>> {
        let q = format!(
            "{{ stateSyncs(where: {{stateId: {id}}}) {{ logIndex transactionHash }} }}"
        );
        let r: StateSyncs<LogEntry> = self.query(q).await?;
        Ok(r.state_syncs.into_iter().next().map(Into::into))
    }

    async fn latest_stake_update_nonce(
        &self,
        validator_id: u64,
    ) -> bridge_relayer_utils::Result<u64> {
        let q = format!(
            "{{ stakeUpdates(first: 1, where: {{validatorId: {validator_id}}}, orderBy: nonce, orderDirection: desc) {{ nonce }} }}"
        );
        let r: StakeUpdates<NonceEntry> = self.query(q).await?;
        Ok(r.stake_updates.first().map(|e| e.nonce).unwrap_or_default())
    }

    async fn stake_update(
        &self,
        validator_id: u64,
        nonce: u64,
    ) -> bridge_relayer_utils::Result<Option<IndexedLog>> {
        let q = format!(
            "{{ stakeUpdates(where: {{validatorId: {validator_id}, nonce: {nonce}}}) {{ logIndex transactionHash }} }}"
        );
        let r: StakeUpdates<LogEntry> = self.query(q).await?;
        Ok(r.stake_updates.into_iter().next().map(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_indexer_payloads() {
        let raw = r#"{"data":{"stateSyncs":[{"stateId":"50"}]}}"#;
        let r: GraphQlResponse<StateSyncs<StateIdEntry>> =
            serde_json::from_str(raw).unwrap();
        assert_eq!(r.data.unwrap().state_syncs[0].state_id, 50);

        let raw = r#"{"data":{"stakeUpdates":[{"logIndex":"3","transactionHash":"0x1111111111111111111111111111111111111111111111111111111111111111"}]}}"#;
        let r: GraphQlResponse<StakeUpdates<LogEntry>> =
            serde_json::from_str(raw).unwrap();
        let log: IndexedLog =
            r.data.unwrap().stake_updates.into_iter().next().unwrap().into();
        assert_eq!(log.log_index, 3);
        assert_eq!(log.tx_hash, H256::repeat_byte(0x11));

        let raw = r#"{"data":{"stateSyncs":[]}}"#;
        let r: GraphQlResponse<StateSyncs<LogEntry>> =
            serde_json::from_str(raw).unwrap();
        assert!(r.data.unwrap().state_syncs.is_empty());
    }
}
