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

use bridge_relayer_chain_client::{ChainHeader, EvmClient};
use ethers::types::H256;
use ethers::utils::keccak256;
use futures::{StreamExt, TryStreamExt};

/// Concurrent header requests while hashing a range.
const HEADER_FETCH_CONCURRENCY: usize = 16;

fn leaf(header: &ChainHeader) -> [u8; 32] {
    let mut buf = [0u8; 128];
    buf[24..32].copy_from_slice(&header.number.to_be_bytes());
    buf[56..64].copy_from_slice(&header.timestamp.to_be_bytes());
    buf[64..96].copy_from_slice(header.transactions_root.as_bytes());
    buf[96..128].copy_from_slice(header.receipts_root.as_bytes());
    keccak256(buf)
}

/// Merkle root over `leaves`, padded with zero leaves to a power of two.
fn merkle_root(mut nodes: Vec<[u8; 32]>) -> H256 {
    let width = nodes.len().next_power_of_two();
    nodes.resize(width, [0u8; 32]);
    while nodes.len() > 1 {
        nodes = nodes
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&pair[0]);
                buf[32..].copy_from_slice(&pair[1]);
                keccak256(buf)
            })
            .collect();
    }
    H256(nodes[0])
}

/// The checkpoint root hash of child chain blocks `start..=end`.
///
/// Each block contributes `keccak(number ‖ timestamp ‖ txRoot ‖ receiptsRoot)`,
/// every field 32 bytes wide.
#[tracing::instrument(skip(client))]
pub async fn root_hash(
    client: &dyn EvmClient,
    start: u64,
    end: u64,
) -> bridge_relayer_utils::Result<H256> {
    if start > end {
        return Err(bridge_relayer_utils::Error::Generic(
            "root hash of an empty block range",
        ));
    }
    let leaves: Vec<[u8; 32]> = futures::stream::iter(start..=end)
        .map(|number| async move {
            let header = client.header_by_number(number).await?.ok_or_else(|| {
                bridge_relayer_utils::Error::UnexpectedResponse(format!(
                    "child chain block {number} not found"
                ))
            })?;
            Ok::<_, bridge_relayer_utils::Error>(leaf(&header))
        })
        .buffered(HEADER_FETCH_CONCURRENCY)
        .try_collect()
        .await?;
    Ok(merkle_root(leaves))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_relayer_chain_client::mock::MockEvmClient;

    #[test]
    fn single_leaf_is_its_own_root() {
        let leaf = [7u8; 32];
        assert_eq!(merkle_root(vec![leaf]), H256(leaf));
    }

    #[test]
    fn odd_ranges_are_padded_with_zero_leaves() {
        let (a, b, c) = ([1u8; 32], [2u8; 32], [3u8; 32]);
        let hash = |l: [u8; 32], r: [u8; 32]| keccak256([l, r].concat());
        let expected = hash(hash(a, b), hash(c, [0u8; 32]));
        assert_eq!(merkle_root(vec![a, b, c]), H256(expected));
    }

    #[tokio::test]
    async fn root_covers_every_block_in_order() {
        let client = MockEvmClient::default();
        client.extend_to(10, 1_700_000_000);
        let root = root_hash(&client, 3, 6).await.unwrap();
        let leaves: Vec<_> = {
            let state = client.state();
            (3..=6).map(|n| leaf(&state.headers[&n])).collect()
        };
        assert_eq!(root, merkle_root(leaves));
        assert_ne!(root, root_hash(&client, 3, 7).await.unwrap());
        assert!(root_hash(&client, 9, 11).await.is_err());
        assert!(root_hash(&client, 6, 3).await.is_err());
    }
}
