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

#![warn(missing_docs)]
//! # Chain Clients 🔗
//!
//! Typed access to the three chains the relayer talks to:
//!
//! * the root chain and the child chain, both EVM chains, through [`EvmClient`],
//! * the root chain contracts, through [`RootChainContracts`] and
//!   [`ChildChainContracts`],
//! * the consensus chain REST server and its tendermint RPC, through
//!   [`ConsensusClient`],
//! * an optional event indexer used by the self-healing reconciler, through
//!   [`IndexerClient`].
//!
//! Every client is a trait so the relay logic can run against the in-memory
//! fakes of the [`mock`] module in tests.

/// Root chain contract bindings.
pub mod contracts;
/// Consensus chain REST client.
pub mod consensus;
/// Root chain events the relayer reacts to.
pub mod events;
/// EVM JSON-RPC client.
pub mod evm;
/// Self-heal indexer client.
pub mod indexer;
/// Proposer and validator-position helpers.
pub mod validator;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use consensus::{ConsensusClient, RestConsensusClient, TxModule};
pub use contracts::{
    ChildChainContracts, EthersChildChainContracts, EthersRootChainContracts,
    HeaderBlock, RootChainAddresses, RootChainContracts,
};
pub use evm::{ChainHeader, EthersEvmClient, EvmClient};
pub use indexer::{GraphQlIndexer, IndexedLog, IndexerClient};
