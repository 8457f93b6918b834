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

use ethers::contract::EthEvent;
use ethers::types::{Address, Bytes, H256, U256};

/// A checkpoint was committed to the root chain contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, EthEvent)]
pub struct NewHeaderBlock {
    #[ethevent(indexed)]
    pub proposer: Address,
    #[ethevent(indexed)]
    pub header_block_id: U256,
    #[ethevent(indexed)]
    pub reward: U256,
    pub start: U256,
    pub end: U256,
    pub root: H256,
}

/// A new validator staked.
#[derive(Debug, Clone, Default, PartialEq, Eq, EthEvent)]
pub struct Staked {
    #[ethevent(indexed)]
    pub signer: Address,
    #[ethevent(indexed)]
    pub validator_id: U256,
    pub nonce: U256,
    #[ethevent(indexed)]
    pub activation_epoch: U256,
    pub amount: U256,
    pub total: U256,
    pub signer_pubkey: Bytes,
}

/// A validator's stake changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, EthEvent)]
pub struct StakeUpdate {
    #[ethevent(indexed)]
    pub validator_id: U256,
    #[ethevent(indexed)]
    pub nonce: U256,
    #[ethevent(indexed)]
    pub new_amount: U256,
}

/// A validator rotated its signer.
#[derive(Debug, Clone, Default, PartialEq, Eq, EthEvent)]
pub struct SignerChange {
    #[ethevent(indexed)]
    pub validator_id: U256,
    pub nonce: U256,
    #[ethevent(indexed)]
    pub old_signer: Address,
    #[ethevent(indexed)]
    pub new_signer: Address,
    pub signer_pubkey: Bytes,
}

/// A validator started unbonding.
#[derive(Debug, Clone, Default, PartialEq, Eq, EthEvent)]
pub struct UnstakeInit {
    #[ethevent(indexed)]
    pub user: Address,
    #[ethevent(indexed)]
    pub validator_id: U256,
    pub nonce: U256,
    pub deactivation_epoch: U256,
    #[ethevent(indexed)]
    pub amount: U256,
}

/// A state-sync from the root chain to the child chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, EthEvent)]
pub struct StateSynced {
    #[ethevent(indexed)]
    pub id: U256,
    #[ethevent(indexed)]
    pub contract_address: Address,
    pub data: Bytes,
}

/// A fee top up.
#[derive(Debug, Clone, Default, PartialEq, Eq, EthEvent)]
pub struct TopUpFee {
    #[ethevent(indexed)]
    pub user: Address,
    #[ethevent(indexed)]
    pub fee: U256,
}

/// A slashing tick was applied on the root chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, EthEvent)]
pub struct Slashed {
    #[ethevent(indexed)]
    pub nonce: U256,
    #[ethevent(indexed)]
    pub amount: U256,
}

/// A validator was unjailed.
#[derive(Debug, Clone, Default, PartialEq, Eq, EthEvent)]
#[ethevent(name = "UnJailed")]
pub struct UnJailed {
    #[ethevent(indexed)]
    pub validator_id: U256,
    #[ethevent(indexed)]
    pub signer: Address,
}

/// Derives the signer address of a 64 byte (or 65 byte, `0x04` prefixed)
/// uncompressed public key, as emitted by the staking events.
pub fn signer_of_pubkey(pubkey: &[u8]) -> Option<Address> {
    let raw = match pubkey.len() {
        64 => pubkey,
        65 if pubkey[0] == 0x04 => &pubkey[1..],
        _ => return None,
    };
    let hash = ethers::utils::keccak256(raw);
    Some(Address::from_slice(&hash[12..]))
}

/// Prefixes a 64 byte public key with `0x04`, the uncompressed marker the
/// consensus chain expects.
pub fn uncompressed_pubkey(pubkey: &[u8]) -> Bytes {
    if pubkey.len() == 64 {
        let mut out = Vec::with_capacity(65);
        out.push(0x04);
        out.extend_from_slice(pubkey);
        out.into()
    } else {
        Bytes::from(pubkey.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_match_the_contracts() {
        assert_eq!(
            StateSynced::abi_signature(),
            "StateSynced(uint256,address,bytes)"
        );
        assert_eq!(StakeUpdate::abi_signature(), "StakeUpdate(uint256,uint256,uint256)");
        assert_eq!(UnJailed::abi_signature(), "UnJailed(uint256,address)");
        assert_eq!(
            NewHeaderBlock::abi_signature(),
            "NewHeaderBlock(address,uint256,uint256,uint256,uint256,bytes32)"
        );
        assert_ne!(Staked::signature(), SignerChange::signature());
    }

    #[test]
    fn pubkey_to_signer() {
        let wallet: ethers::signers::LocalWallet =
            "0x8917174396171783496173419137618235192359106130478137647163400318"
                .parse()
                .unwrap();
        use ethers::signers::Signer;
        let point = wallet.signer().verifying_key().to_encoded_point(false);
        let full = point.as_bytes();
        assert_eq!(full.len(), 65);
        assert_eq!(signer_of_pubkey(full), Some(wallet.address()));
        assert_eq!(signer_of_pubkey(&full[1..]), Some(wallet.address()));
        assert_eq!(uncompressed_pubkey(&full[1..]).as_ref(), full);
        assert_eq!(signer_of_pubkey(&[1, 2, 3]), None);
    }
}
