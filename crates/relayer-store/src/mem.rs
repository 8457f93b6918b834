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

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::queue::{QueueItem, QueueStore};
use super::{CursorKey, CursorStore};

#[derive(Default)]
struct MemQueue {
    pending: BTreeMap<(u64, u64), Vec<u8>>,
    in_flight: HashMap<u64, Vec<u8>>,
}

/// InMemoryStore is a store that keeps cursors and queues in memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    last_block_numbers: Arc<RwLock<HashMap<CursorKey, u64>>>,
    queues: Arc<Mutex<HashMap<String, MemQueue>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl CursorStore for InMemoryStore {
    #[tracing::instrument(skip(self))]
    fn get_last_block_number<K: Into<CursorKey> + Debug>(
        &self,
        key: K,
    ) -> crate::Result<Option<u64>> {
        let guard = self.last_block_numbers.read();
        Ok(guard.get(&key.into()).cloned())
    }

    #[tracing::instrument(skip(self))]
    fn set_last_block_number<K: Into<CursorKey> + Debug>(
        &self,
        key: K,
        block_number: u64,
    ) -> crate::Result<u64> {
        let mut guard = self.last_block_numbers.write();
        let val = guard.entry(key.into()).or_insert(block_number);
        let old = *val;
        *val = old.max(block_number);
        Ok(old)
    }
}

impl<T> QueueStore<T> for InMemoryStore
where
    T: Serialize + DeserializeOwned,
{
    fn enqueue_item(
        &self,
        queue: &str,
        item: QueueItem<T>,
    ) -> crate::Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let bytes = serde_json::to_vec(&item)?;
        let mut guard = self.queues.lock();
        guard
            .entry(queue.to_owned())
            .or_default()
            .pending
            .insert((item.eta(), id), bytes);
        Ok(id)
    }

    fn claim_due_item(
        &self,
        queue: &str,
        now: u64,
    ) -> crate::Result<Option<(u64, QueueItem<T>)>> {
        let mut guard = self.queues.lock();
        let Some(q) = guard.get_mut(queue) else {
            return Ok(None);
        };
        let key = match q.pending.keys().next() {
            Some(&(eta, id)) if eta <= now => (eta, id),
            _ => return Ok(None),
        };
        let Some(bytes) = q.pending.remove(&key) else {
            return Ok(None);
        };
        let item = serde_json::from_slice(&bytes)?;
        q.in_flight.insert(key.1, bytes);
        Ok(Some((key.1, item)))
    }

    fn ack_item(&self, queue: &str, id: u64) -> crate::Result<()> {
        let mut guard = self.queues.lock();
        if let Some(q) = guard.get_mut(queue) {
            q.in_flight.remove(&id);
        }
        Ok(())
    }

    fn requeue_in_flight(&self, queue: &str) -> crate::Result<usize> {
        let mut guard = self.queues.lock();
        let Some(q) = guard.get_mut(queue) else {
            return Ok(0);
        };
        let drained: Vec<_> = q.in_flight.drain().collect();
        let moved = drained.len();
        for (id, bytes) in drained {
            let item: QueueItem<T> = serde_json::from_slice(&bytes)?;
            q.pending.insert((item.eta(), id), bytes);
        }
        Ok(moved)
    }

    fn next_eta(&self, queue: &str) -> crate::Result<Option<u64>> {
        let guard = self.queues.lock();
        Ok(guard
            .get(queue)
            .and_then(|q| q.pending.keys().next())
            .map(|(eta, _)| *eta))
    }

    fn pending_len(&self, queue: &str) -> crate::Result<usize> {
        let guard = self.queues.lock();
        Ok(guard.get(queue).map(|q| q.pending.len()).unwrap_or_default())
    }
}
