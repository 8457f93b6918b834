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

//! Who is allowed to send what, and when.
//!
//! Every validator runs the same relayer, so the helpers here decide which
//! of them should act on an event and how long each of them waits before
//! doing so.

use std::time::Duration;

use ethers::types::Address;

use crate::ConsensusClient;

/// Every this many pending mempool transactions stretch the task delay by
/// one more step.
pub const MEMPOOL_TXS_PER_STEP: u64 = 1000;

/// Whether `me` is the next checkpoint proposer.
pub async fn is_proposer<C: ConsensusClient + ?Sized>(
    client: &C,
    me: Address,
) -> bridge_relayer_utils::Result<bool> {
    let proposers = client.proposers(1).await?;
    Ok(proposers.first().map(|p| p.signer == me).unwrap_or(false))
}

/// Whether `me` is the next milestone proposer.
pub async fn is_milestone_proposer<C: ConsensusClient + ?Sized>(
    client: &C,
    me: Address,
) -> bridge_relayer_utils::Result<bool> {
    let proposers = client.milestone_proposers(1).await?;
    match proposers.first() {
        Some(p) => Ok(p.signer == me),
        None => Err(bridge_relayer_utils::Error::UnexpectedResponse(
            "milestone proposer list is empty".into(),
        )),
    }
}

/// Whether `me` is one of the `count` proposers following the next one.
///
/// Used for no-acks: after `count` missed checkpoint intervals, the next
/// `count` proposers in line may speak up.
pub async fn is_in_proposer_list<C: ConsensusClient + ?Sized>(
    client: &C,
    me: Address,
    count: u64,
) -> bridge_relayer_utils::Result<bool> {
    let proposers = client.proposers(count + 1).await?;
    tracing::debug!(fetched = proposers.len(), count, "fetched proposers");
    Ok(proposers
        .iter()
        .take(count as usize + 1)
        .skip(1)
        .any(|p| p.signer == me))
}

/// Whether `me` is one of the first `count` milestone proposers.
pub async fn is_in_milestone_proposer_list<C: ConsensusClient + ?Sized>(
    client: &C,
    me: Address,
    count: u64,
) -> bridge_relayer_utils::Result<bool> {
    let proposers = client.milestone_proposers(count).await?;
    Ok(proposers.iter().any(|p| p.signer == me))
}

/// Whether `me` is the proposer of the current checkpoint.
pub async fn is_current_proposer<C: ConsensusClient + ?Sized>(
    client: &C,
    me: Address,
) -> bridge_relayer_utils::Result<bool> {
    let proposer = client.current_proposer().await?;
    Ok(proposer.signer == me)
}

/// Whether `me` signs for validator `validator_id`. Lookup failures count as
/// `false`.
pub async fn is_event_sender<C: ConsensusClient + ?Sized>(
    client: &C,
    me: Address,
    validator_id: u64,
) -> bool {
    match client.validator(validator_id).await {
        Ok(v) => v.signer == me,
        Err(e) => {
            tracing::warn!(%e, validator_id, "failed to fetch validator");
            false
        }
    }
}

/// `position × per_validator × (mempool_txs / 1000 + 1)`.
pub fn validator_delay(
    position: u64,
    per_validator: Duration,
    mempool_txs: u64,
) -> Duration {
    let factor = mempool_txs / MEMPOOL_TXS_PER_STEP + 1;
    let steps = position.saturating_mul(factor);
    per_validator.saturating_mul(u32::try_from(steps).unwrap_or(u32::MAX))
}

/// The delay before `me` should act on an event, `None` when `me` is not in
/// the current validator set.
pub async fn calculate_task_delay<C: ConsensusClient + ?Sized>(
    client: &C,
    me: Address,
    per_validator: Duration,
) -> bridge_relayer_utils::Result<Option<Duration>> {
    let set = client.validator_set().await?;
    let Some(position) = set.position_of(me) else {
        tracing::info!(validators = set.validators.len(), "not in the current validator set");
        return Ok(None);
    };
    let mempool = match client.num_unconfirmed_txs().await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(%e, "failed to fetch mempool size, assuming empty");
            0
        }
    };
    let delay = validator_delay(position, per_validator, mempool);
    tracing::debug!(position, mempool, ?delay, "computed task delay");
    Ok(Some(delay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConsensusClient;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn delay_grows_with_position() {
        let step = Duration::from_secs(10);
        for p in 1..20 {
            assert!(validator_delay(p, step, 0) < validator_delay(p + 1, step, 0));
            // same mempool pressure for everyone keeps the order.
            assert!(
                validator_delay(p, step, 2500) < validator_delay(p + 1, step, 2500)
            );
        }
        assert_eq!(validator_delay(2, step, 999), Duration::from_secs(20));
        assert_eq!(validator_delay(2, step, 1000), Duration::from_secs(40));
    }

    #[tokio::test]
    async fn not_the_proposer_when_absent() {
        let client = MockConsensusClient::with_validators(&[addr(1)]);
        assert!(!is_proposer(&client, addr(9)).await.unwrap());
        assert!(is_proposer(&client, addr(1)).await.unwrap());
    }

    #[tokio::test]
    async fn proposer_list_skips_the_first() {
        let client =
            MockConsensusClient::with_validators(&[addr(1), addr(2), addr(3)]);
        assert!(!is_in_proposer_list(&client, addr(1), 1).await.unwrap());
        assert!(is_in_proposer_list(&client, addr(2), 1).await.unwrap());
        assert!(!is_in_proposer_list(&client, addr(3), 1).await.unwrap());
        assert!(is_in_proposer_list(&client, addr(3), 2).await.unwrap());
    }

    #[tokio::test]
    async fn task_delay_follows_set_position() {
        let client =
            MockConsensusClient::with_validators(&[addr(1), addr(2), addr(3)]);
        let step = Duration::from_secs(10);
        let d1 = calculate_task_delay(&client, addr(1), step).await.unwrap();
        let d3 = calculate_task_delay(&client, addr(3), step).await.unwrap();
        assert_eq!(d1, Some(Duration::from_secs(10)));
        assert_eq!(d3, Some(Duration::from_secs(30)));
        assert_eq!(
            calculate_task_delay(&client, addr(7), step).await.unwrap(),
            None
        );
    }
}
