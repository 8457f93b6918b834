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

//! # Relayer Store Module 🕸️
//!
//! A module for managing the storage of the relayer.
//!
//! ## Overview
//!
//! The relayer store keeps two things durable across restarts:
//! the per-chain cursors (the last processed block of every listener) and
//! the relay task queue.
//!
use std::fmt::{Debug, Display};

use bridge_relayer_utils::Result;

/// A module for managing in-memory storage of the relayer.
pub mod mem;
/// Durable delay queue abstraction.
pub mod queue;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
#[cfg(feature = "sled")]
pub mod sled;

/// A store that uses [`sled`](https://sled.rs) as the backend.
#[cfg(feature = "sled")]
pub use self::sled::SledStore;
/// A store that uses in memory data structures as the backend.
pub use mem::InMemoryStore;
pub use queue::{QueueItem, QueueStore};

/// CursorKey names the cursor of one observed chain, for example
/// `"rootchain-last-block"`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CursorKey(String);

impl CursorKey {
    /// Returns the bytes of the key.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }
}

impl Display for CursorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CursorKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

impl From<String> for CursorKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Encodes a block height the way cursors are persisted: a decimal string.
pub(crate) fn encode_height(block_number: u64) -> Vec<u8> {
    block_number.to_string().into_bytes()
}

/// Decodes a persisted cursor value.
pub(crate) fn decode_height(bytes: &[u8]) -> Result<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| {
            bridge_relayer_utils::Error::Decode(format!(
                "cursor value {bytes:?} is not a decimal block number"
            ))
        })
}

/// CursorStore is a simple trait for storing and retrieving the last
/// processed block height of every observed chain.
///
/// A cursor never moves backwards: setting a lower value than the stored one
/// is a no-op.
pub trait CursorStore: Clone + Send + Sync {
    /// Sets the new block number for that cursor and returns the previous one.
    /// If there was no previous value, the given block number is returned.
    fn set_last_block_number<K: Into<CursorKey> + Debug>(
        &self,
        key: K,
        block_number: u64,
    ) -> crate::Result<u64>;
    /// Get the last block number for that cursor, if it was ever set.
    fn get_last_block_number<K: Into<CursorKey> + Debug>(
        &self,
        key: K,
    ) -> crate::Result<Option<u64>>;

    /// an easy way to call the `get_last_block_number`
    /// with a fallback value.
    fn get_last_block_number_or<K: Into<CursorKey> + Debug>(
        &self,
        key: K,
        default_block_number: u64,
    ) -> crate::Result<u64> {
        self.get_last_block_number(key)
            .map(|v| v.unwrap_or(default_block_number))
    }
}

impl<S: CursorStore> CursorStore for std::sync::Arc<S> {
    fn set_last_block_number<K: Into<CursorKey> + Debug>(
        &self,
        key: K,
        block_number: u64,
    ) -> crate::Result<u64> {
        S::set_last_block_number(self, key, block_number)
    }

    fn get_last_block_number<K: Into<CursorKey> + Debug>(
        &self,
        key: K,
    ) -> crate::Result<Option<u64>> {
        S::get_last_block_number(self, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heights_are_decimal_strings() {
        assert_eq!(encode_height(1024), b"1024".to_vec());
        assert_eq!(decode_height(b"1024").unwrap(), 1024);
        assert!(decode_height(&[0xff, 0x00]).is_err());
    }
}
