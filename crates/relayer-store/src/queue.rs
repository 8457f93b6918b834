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

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A Queue item that wraps the inner item together with the time it becomes
/// eligible to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem<T> {
    /// The inner value wrapped by the Queue Item.
    inner: T,
    /// The time when the item was enqueued (unix ms).
    enqueued_at: u64,
    /// The item must not be dequeued before this time (unix ms).
    eta: u64,
}

impl<T> QueueItem<T> {
    /// Creates a new QueueItem that is due right away.
    pub fn new(inner: T) -> Self {
        let now = now_millis();
        Self {
            inner,
            enqueued_at: now,
            eta: now,
        }
    }

    /// Creates a new QueueItem that becomes due at `eta` (unix ms).
    pub fn with_eta(inner: T, eta: u64) -> Self {
        Self {
            inner,
            enqueued_at: now_millis(),
            eta,
        }
    }

    /// Returns a reference to the inner value.
    pub fn inner_ref(&self) -> &T {
        &self.inner
    }

    /// Unwraps the QueueItem and returns the inner value.
    pub fn inner(self) -> T {
        self.inner
    }

    /// When this item becomes due (unix ms).
    pub fn eta(&self) -> u64 {
        self.eta
    }

    /// When this item was enqueued (unix ms).
    pub fn enqueued_at(&self) -> u64 {
        self.enqueued_at
    }

    /// Checks whether the item may be dequeued at `now` (unix ms).
    pub fn is_due(&self, now: u64) -> bool {
        self.eta <= now
    }
}

/// Builds the ordering key of a pending item: big-endian eta followed by the
/// big-endian item id. Lexicographic order of the keys is (eta, id) order.
pub fn pending_key(eta: u64, id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&eta.to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

/// Splits a pending key back into `(eta, id)`.
pub fn split_pending_key(key: &[u8]) -> Option<(u64, u64)> {
    let eta = key.get(..8)?.try_into().ok()?;
    let id = key.get(8..16)?.try_into().ok()?;
    Some((u64::from_be_bytes(eta), u64::from_be_bytes(id)))
}

/// A durable delay queue.
///
/// Items are ordered by their ETA. A worker *claims* a due item, which moves
/// it atomically from the pending set into the in-flight set, and *acks* it
/// once handled. In-flight items left behind by a crash are moved back with
/// [`QueueStore::requeue_in_flight`], which gives at-least-once delivery.
pub trait QueueStore<Item>
where
    Item: Serialize + DeserializeOwned,
{
    /// Insert an item into the named queue, returns the item id.
    fn enqueue_item(
        &self,
        queue: &str,
        item: QueueItem<Item>,
    ) -> crate::Result<u64>;
    /// Claim the earliest item whose eta is `<= now`, if any.
    ///
    /// Two concurrent callers never claim the same item.
    fn claim_due_item(
        &self,
        queue: &str,
        now: u64,
    ) -> crate::Result<Option<(u64, QueueItem<Item>)>>;
    /// Drop a claimed item for good.
    fn ack_item(&self, queue: &str, id: u64) -> crate::Result<()>;
    /// Move every in-flight item back to pending, returns how many were moved.
    fn requeue_in_flight(&self, queue: &str) -> crate::Result<usize>;
    /// The eta of the earliest pending item.
    fn next_eta(&self, queue: &str) -> crate::Result<Option<u64>>;
    /// Number of pending items.
    fn pending_len(&self, queue: &str) -> crate::Result<usize>;
}

impl<S, T> QueueStore<T> for Arc<S>
where
    S: QueueStore<T>,
    T: Serialize + DeserializeOwned,
{
    fn enqueue_item(
        &self,
        queue: &str,
        item: QueueItem<T>,
    ) -> crate::Result<u64> {
        S::enqueue_item(self, queue, item)
    }

    fn claim_due_item(
        &self,
        queue: &str,
        now: u64,
    ) -> crate::Result<Option<(u64, QueueItem<T>)>> {
        S::claim_due_item(self, queue, now)
    }

    fn ack_item(&self, queue: &str, id: u64) -> crate::Result<()> {
        S::ack_item(self, queue, id)
    }

    fn requeue_in_flight(&self, queue: &str) -> crate::Result<usize> {
        S::requeue_in_flight(self, queue)
    }

    fn next_eta(&self, queue: &str) -> crate::Result<Option<u64>> {
        S::next_eta(self, queue)
    }

    fn pending_len(&self, queue: &str) -> crate::Result<usize> {
        S::pending_len(self, queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_keys_sort_by_eta_then_id() {
        let a = pending_key(10, 99);
        let b = pending_key(11, 1);
        let c = pending_key(11, 2);
        assert!(a < b && b < c);
        assert_eq!(split_pending_key(&c), Some((11, 2)));
        assert_eq!(split_pending_key(&c[..7]), None);
    }
}
