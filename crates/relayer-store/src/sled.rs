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

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use sled::Transactional;
use std::fmt::Debug;
use std::path::Path;

use super::queue::{pending_key, split_pending_key, QueueItem, QueueStore};
use super::{decode_height, encode_height, CursorKey, CursorStore};

/// SledStore is a store that keeps cursors and the relay task queue in a
/// [Sled](https://sled.rs)-based database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Create a new SledStore.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }
    /// Creates a temporary SledStore.
    pub fn temporary() -> crate::Result<Self> {
        let dir = tempfile::tempdir()?;
        Self::open(dir.path())
    }

    /// Gets the total amount of data stored on disk
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    fn queue_trees(&self, queue: &str) -> crate::Result<(sled::Tree, sled::Tree)> {
        let pending = self.db.open_tree(queue.to_owned())?;
        let in_flight = self.db.open_tree(format!("{queue}_inflight"))?;
        Ok((pending, in_flight))
    }
}

impl CursorStore for SledStore {
    #[tracing::instrument(skip(self))]
    fn set_last_block_number<K: Into<CursorKey> + Debug>(
        &self,
        key: K,
        block_number: u64,
    ) -> crate::Result<u64> {
        let tree = self.db.open_tree("cursors")?;
        let key: CursorKey = key.into();
        let mut old = None;
        // compare-and-swap loop, so the cursor can never move backwards even
        // if two writers race.
        tree.fetch_and_update(key.to_bytes(), |current| {
            let current = current.and_then(|v| decode_height(v).ok());
            old = current;
            match current {
                Some(c) if c >= block_number => Some(encode_height(c)),
                _ => Some(encode_height(block_number)),
            }
        })?;
        self.db.flush()?;
        Ok(old.unwrap_or(block_number))
    }

    #[tracing::instrument(skip(self))]
    fn get_last_block_number<K: Into<CursorKey> + Debug>(
        &self,
        key: K,
    ) -> crate::Result<Option<u64>> {
        let tree = self.db.open_tree("cursors")?;
        let key: CursorKey = key.into();
        match tree.get(key.to_bytes())? {
            Some(v) => decode_height(&v).map(Some),
            None => Ok(None),
        }
    }
}

impl<T> QueueStore<T> for SledStore
where
    T: Serialize + DeserializeOwned,
{
    #[tracing::instrument(skip_all, fields(queue = %queue, eta = item.eta()))]
    fn enqueue_item(
        &self,
        queue: &str,
        item: QueueItem<T>,
    ) -> crate::Result<u64> {
        let (pending, _) = self.queue_trees(queue)?;
        let id = self.db.generate_id()?;
        let item_bytes = serde_json::to_vec(&item)?;
        pending.insert(pending_key(item.eta(), id), item_bytes)?;
        // flush the db to make sure we don't lose anything.
        self.db.flush()?;
        tracing::trace!(id, "enqueued item");
        Ok(id)
    }

    #[tracing::instrument(skip(self))]
    fn claim_due_item(
        &self,
        queue: &str,
        now: u64,
    ) -> crate::Result<Option<(u64, QueueItem<T>)>> {
        let (pending, in_flight) = self.queue_trees(queue)?;
        loop {
            let (key, _) = match pending.first()? {
                Some(entry) => entry,
                None => return Ok(None),
            };
            let Some((eta, id)) = split_pending_key(&key) else {
                tracing::warn!(?key, "dropping malformed queue key");
                pending.remove(&key)?;
                continue;
            };
            if eta > now {
                return Ok(None);
            }
            // move the item from pending to in-flight in a single
            // transaction, whoever removes it first owns it.
            let moved = (&pending, &in_flight).transaction(
                |(p, f): &(TransactionalTree, TransactionalTree)|
                 -> ConflictableTransactionResult<Option<sled::IVec>, std::io::Error> {
                    match p.remove(key.clone())? {
                        Some(v) => {
                            f.insert(id.to_be_bytes().to_vec(), v.clone())?;
                            Ok(Some(v))
                        }
                        None => Ok(None),
                    }
                },
            )?;
            if let Some(value) = moved {
                self.db.flush()?;
                let item = serde_json::from_slice(&value)?;
                return Ok(Some((id, item)));
            }
            // someone else claimed it, look again.
        }
    }

    #[tracing::instrument(skip(self))]
    fn ack_item(&self, queue: &str, id: u64) -> crate::Result<()> {
        let (_, in_flight) = self.queue_trees(queue)?;
        in_flight.remove(id.to_be_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn requeue_in_flight(&self, queue: &str) -> crate::Result<usize> {
        let (pending, in_flight) = self.queue_trees(queue)?;
        let mut moved = 0;
        for entry in in_flight.iter() {
            let (id_bytes, value) = entry?;
            let Ok(id_bytes) = <[u8; 8]>::try_from(id_bytes.as_ref()) else {
                in_flight.remove(&id_bytes)?;
                continue;
            };
            let id = u64::from_be_bytes(id_bytes);
            let item: QueueItem<T> = serde_json::from_slice(&value)?;
            pending.insert(pending_key(item.eta(), id), value)?;
            in_flight.remove(id_bytes)?;
            moved += 1;
        }
        self.db.flush()?;
        Ok(moved)
    }

    fn next_eta(&self, queue: &str) -> crate::Result<Option<u64>> {
        let (pending, _) = self.queue_trees(queue)?;
        Ok(pending
            .first()?
            .and_then(|(k, _)| split_pending_key(&k))
            .map(|(eta, _)| eta))
    }

    fn pending_len(&self, queue: &str) -> crate::Result<usize> {
        let (pending, _) = self.queue_trees(queue)?;
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_last_block_number_should_work() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledStore::open(tmp.path()).unwrap();
        assert_eq!(
            store.get_last_block_number("rootchain-last-block").unwrap(),
            None
        );
        store
            .set_last_block_number("rootchain-last-block", 20)
            .unwrap();
        let block = store.get_last_block_number("rootchain-last-block");
        assert_eq!(block.unwrap(), Some(20));
        // other cursors are untouched.
        assert_eq!(
            store
                .get_last_block_number_or("heimdall-last-block", 7)
                .unwrap(),
            7
        );
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let store = SledStore::temporary().unwrap();
        store.set_last_block_number("heimdall-last-block", 100).unwrap();
        let old = store.set_last_block_number("heimdall-last-block", 90).unwrap();
        assert_eq!(old, 100);
        assert_eq!(
            store.get_last_block_number("heimdall-last-block").unwrap(),
            Some(100)
        );
    }

    #[test]
    fn task_queue_should_work() {
        let store = SledStore::temporary().unwrap();
        let queue = "relay_tasks";
        let empty: Option<(u64, QueueItem<String>)> =
            store.claim_due_item(queue, u64::MAX).unwrap();
        assert!(empty.is_none());

        let late = QueueItem::with_eta(String::from("late"), 2_000);
        let early = QueueItem::with_eta(String::from("early"), 1_000);
        store.enqueue_item(queue, late).unwrap();
        store.enqueue_item(queue, early).unwrap();
        assert_eq!(QueueStore::<String>::pending_len(&store, queue).unwrap(), 2);
        assert_eq!(
            QueueStore::<String>::next_eta(&store, queue).unwrap(),
            Some(1_000)
        );

        // nothing is due yet.
        let none: Option<(u64, QueueItem<String>)> =
            store.claim_due_item(queue, 999).unwrap();
        assert!(none.is_none());

        let (id, item): (u64, QueueItem<String>) =
            store.claim_due_item(queue, 1_500).unwrap().unwrap();
        assert_eq!(item.inner(), "early");
        QueueStore::<String>::ack_item(&store, queue, id).unwrap();

        // a claimed but never acked item comes back after a restart.
        let (_, item): (u64, QueueItem<String>) =
            store.claim_due_item(queue, 2_500).unwrap().unwrap();
        assert_eq!(item.inner(), "late");
        assert_eq!(
            QueueStore::<String>::requeue_in_flight(&store, queue).unwrap(),
            1
        );
        let (_, item): (u64, QueueItem<String>) =
            store.claim_due_item(queue, 2_500).unwrap().unwrap();
        assert_eq!(item.inner(), "late");
    }
}
