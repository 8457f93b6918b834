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

use bridge_relayer_chain_client::mock::{
    LogPosition, MockChildChain, MockConsensusClient, MockEvmClient,
    MockRootChain,
};
use bridge_relayer_config::RelayerConfig;
use bridge_relayer_tx_broadcaster::{
    ConsensusBroadcaster, RootChainBroadcaster, TxBroadcaster,
};
use bridge_relayer_utils::metric::Metrics;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Log, H256};

use crate::ProcessorContext;

pub fn wallet() -> LocalWallet {
    "8917174396171783496173419137618235192359106130478137647163400318"
        .parse()
        .unwrap()
}

pub fn other(n: u8) -> Address {
    Address::repeat_byte(0xe0 + n)
}

pub fn at(block_number: u64, tx: u8, log_index: u64) -> LogPosition {
    LogPosition {
        emitter: Address::repeat_byte(0x11),
        block_number,
        tx_hash: H256::repeat_byte(tx),
        log_index,
    }
}

pub fn args<T: serde::Serialize>(event_name: &str, payload: &T) -> Vec<String> {
    vec![
        event_name.to_string(),
        serde_json::to_string(payload).unwrap(),
    ]
}

pub fn log_args(event_name: &str, log: &Log) -> Vec<String> {
    args(event_name, log)
}

/// The three chains, faked, and a processor context wired to them. The
/// local validator sits at `position` (1 based) of the validator set.
pub struct Harness {
    pub consensus: MockConsensusClient,
    pub child: MockEvmClient,
    pub root: MockRootChain,
    pub child_contracts: MockChildChain,
    pub ctx: ProcessorContext,
}

impl Harness {
    pub fn new(position: u8) -> Self {
        Self::with_config(position, RelayerConfig::default())
    }

    pub fn with_config(position: u8, config: RelayerConfig) -> Self {
        let me = wallet().address();
        let mut signers: Vec<Address> = (1..position).map(other).collect();
        signers.push(me);
        let consensus = MockConsensusClient::with_validators(&signers);
        consensus.add_account(me, 1, 0);
        let child = MockEvmClient::default();
        let root = MockRootChain::default();
        let child_contracts = MockChildChain::default();
        let metrics = Arc::new(Metrics::new().unwrap());
        let chain_id = consensus.state().chain_id.clone();
        let broadcaster = TxBroadcaster {
            consensus: ConsensusBroadcaster::new(
                Arc::new(consensus.clone()),
                wallet(),
                chain_id,
                config.broadcaster.clone(),
                metrics.clone(),
            ),
            root_chain: RootChainBroadcaster::new(Arc::new(root.clone()), metrics),
        };
        let ctx = ProcessorContext {
            consensus: Arc::new(consensus.clone()),
            child_chain: Arc::new(child.clone()),
            child_contracts: Arc::new(child_contracts.clone()),
            broadcaster: Arc::new(broadcaster),
            config: Arc::new(config),
        };
        Self {
            consensus,
            child,
            root,
            child_contracts,
            ctx,
        }
    }

    pub fn me(&self) -> Address {
        self.ctx.me()
    }
}
