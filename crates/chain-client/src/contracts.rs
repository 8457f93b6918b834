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

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

ethers::contract::abigen!(
    RootChain,
    r#"[
        function currentHeaderBlock() external view returns (uint256)
        function getLastChildBlock() external view returns (uint256)
        function headerBlocks(uint256) external view returns (bytes32 root, uint256 start, uint256 end, uint256 createdAt, address proposer)
        function submitCheckpoint(bytes data, uint256[3][] sigs) external
    ]"#
);

ethers::contract::abigen!(
    StateSender,
    r#"[
        function counter() external view returns (uint256)
    ]"#
);

ethers::contract::abigen!(
    StakingInfo,
    r#"[
        function validatorNonce(uint256) external view returns (uint256)
    ]"#
);

ethers::contract::abigen!(
    BorValidatorSet,
    r#"[
        function currentSpanNumber() external view returns (uint256)
    ]"#
);

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// A header block (checkpoint) as stored by the root chain contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderBlock {
    pub root: H256,
    pub start: u64,
    pub end: u64,
    /// Unix seconds.
    pub created_at: u64,
    pub proposer: Address,
}

/// Reads and writes of the root chain contracts.
#[async_trait::async_trait]
pub trait RootChainContracts: Send + Sync {
    /// Id of the last committed header block.
    async fn current_header_block(&self) -> bridge_relayer_utils::Result<u64>;

    /// The header block with id `number`.
    async fn header_block(
        &self,
        number: u64,
    ) -> bridge_relayer_utils::Result<HeaderBlock>;

    /// Last child chain block covered by a committed checkpoint.
    async fn last_child_block(&self) -> bridge_relayer_utils::Result<u64>;

    /// Submits a checkpoint signed by the consensus chain validators.
    async fn submit_checkpoint(
        &self,
        data: Bytes,
        sigs: Vec<[U256; 3]>,
    ) -> bridge_relayer_utils::Result<H256>;

    /// Id of the last state-sync emitted by the state sender.
    async fn latest_state_id(&self) -> bridge_relayer_utils::Result<u64>;

    /// Nonce of the last staking event of `validator_id`.
    async fn validator_nonce(
        &self,
        validator_id: u64,
    ) -> bridge_relayer_utils::Result<u64>;
}

/// Reads of the child chain system contracts.
#[async_trait::async_trait]
pub trait ChildChainContracts: Send + Sync {
    /// Span id the child chain is currently producing with.
    async fn current_span_id(&self) -> bridge_relayer_utils::Result<u64>;
}

/// Addresses of the root chain contracts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RootChainAddresses {
    pub root_chain: Address,
    pub state_sender: Address,
    pub staking_info: Address,
}

/// [`RootChainContracts`] over ethers contract bindings.
#[derive(Debug, Clone)]
pub struct EthersRootChainContracts {
    root_chain: RootChain<Provider<Http>>,
    root_chain_signer: Option<RootChain<SignerClient>>,
    state_sender: StateSender<Provider<Http>>,
    staking_info: StakingInfo<Provider<Http>>,
    provider: Arc<Provider<Http>>,
    gas_limit: u64,
    max_gas_price: U256,
}

impl EthersRootChainContracts {
    /// Binds the contracts at `addresses`.
    ///
    /// Without a `wallet` every read works but checkpoint submission fails
    /// with [`bridge_relayer_utils::Error::MissingSecrets`].
    pub fn new(
        provider: Arc<Provider<Http>>,
        wallet: Option<LocalWallet>,
        addresses: RootChainAddresses,
        gas_limit: u64,
        max_gas_price: u64,
    ) -> Self {
        let root_chain_signer = wallet.map(|wallet| {
            let client = SignerMiddleware::new((*provider).clone(), wallet);
            RootChain::new(addresses.root_chain, Arc::new(client))
        });
        Self {
            root_chain: RootChain::new(addresses.root_chain, provider.clone()),
            root_chain_signer,
            state_sender: StateSender::new(
                addresses.state_sender,
                provider.clone(),
            ),
            staking_info: StakingInfo::new(
                addresses.staking_info,
                provider.clone(),
            ),
            provider,
            gas_limit,
            max_gas_price: max_gas_price.into(),
        }
    }
}

#[async_trait::async_trait]
impl RootChainContracts for EthersRootChainContracts {
    async fn current_header_block(&self) -> bridge_relayer_utils::Result<u64> {
        let v = self.root_chain.current_header_block().call().await?;
        Ok(v.as_u64())
    }

    async fn header_block(
        &self,
        number: u64,
    ) -> bridge_relayer_utils::Result<HeaderBlock> {
        let (root, start, end, created_at, proposer) =
            self.root_chain.header_blocks(number.into()).call().await?;
        Ok(HeaderBlock {
            root: H256::from(root),
            start: start.as_u64(),
            end: end.as_u64(),
            created_at: created_at.as_u64(),
            proposer,
        })
    }

    async fn last_child_block(&self) -> bridge_relayer_utils::Result<u64> {
        let v = self.root_chain.get_last_child_block().call().await?;
        Ok(v.as_u64())
    }

    #[tracing::instrument(skip_all, fields(sigs = sigs.len()))]
    async fn submit_checkpoint(
        &self,
        data: Bytes,
        sigs: Vec<[U256; 3]>,
    ) -> bridge_relayer_utils::Result<H256> {
        let contract = self
            .root_chain_signer
            .as_ref()
            .ok_or(bridge_relayer_utils::Error::MissingSecrets)?;
        let gas_price = self.provider.get_gas_price().await?;
        if gas_price > self.max_gas_price {
            tracing::warn!(
                %gas_price,
                max = %self.max_gas_price,
                "root chain gas price is too high, not submitting"
            );
            return Err(bridge_relayer_utils::Error::Generic(
                "root chain gas price is above the configured maximum",
            ));
        }
        let call = contract
            .submit_checkpoint(data, sigs)
            .gas(self.gas_limit)
            .gas_price(gas_price);
        let pending = call.send().await?;
        let tx_hash = pending.tx_hash();
        tracing::debug!(?tx_hash, "checkpoint submitted, waiting for receipt");
        let receipt = pending.await?;
        match receipt {
            Some(r) if r.status == Some(0u64.into()) => {
                Err(bridge_relayer_utils::Error::Generic(
                    "checkpoint submission reverted",
                ))
            }
            _ => Ok(tx_hash),
        }
    }

    async fn latest_state_id(&self) -> bridge_relayer_utils::Result<u64> {
        let v = self.state_sender.counter().call().await?;
        Ok(v.as_u64())
    }

    async fn validator_nonce(
        &self,
        validator_id: u64,
    ) -> bridge_relayer_utils::Result<u64> {
        let v = self
            .staking_info
            .validator_nonce(validator_id.into())
            .call()
            .await?;
        Ok(v.as_u64())
    }
}

/// [`ChildChainContracts`] over ethers contract bindings.
#[derive(Debug, Clone)]
pub struct EthersChildChainContracts {
    validator_set: BorValidatorSet<Provider<Http>>,
}

impl EthersChildChainContracts {
    /// Binds the validator set contract at `validator_set`.
    pub fn new(provider: Arc<Provider<Http>>, validator_set: Address) -> Self {
        Self {
            validator_set: BorValidatorSet::new(validator_set, provider),
        }
    }
}

#[async_trait::async_trait]
impl ChildChainContracts for EthersChildChainContracts {
    async fn current_span_id(&self) -> bridge_relayer_utils::Result<u64> {
        let v = self.validator_set.current_span_number().call().await?;
        Ok(v.as_u64())
    }
}
