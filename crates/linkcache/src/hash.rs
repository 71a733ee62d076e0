// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Key hashing used to route keys to shards.

use std::sync::Arc;

/// Hashes a cache key to pick the shard that owns it.
///
/// The hash only has to be stable for the lifetime of a cache instance; it is never persisted.
/// Any `Fn(&str) -> u64` closure can be used as a key hash.
///
/// # Example
///
/// ```
/// use linkcache::{KeyHash, Xxh3};
///
/// let by_length = |key: &str| key.len() as u64;
/// assert_eq!(by_length.hash_key("abc"), 3);
/// assert_eq!(Xxh3.hash_key("abc"), Xxh3.hash_key("abc"));
/// ```
pub trait KeyHash: Send + Sync {
    /// Returns the hash of `key`.
    fn hash_key(&self, key: &str) -> u64;
}

/// The default key hash: XXH3 (64-bit) over the raw bytes of the key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Xxh3;

impl KeyHash for Xxh3 {
    #[inline]
    fn hash_key(&self, key: &str) -> u64 {
        xxhash_rust::xxh3::xxh3_64(key.as_bytes())
    }
}

impl<F> KeyHash for F
where
    F: Fn(&str) -> u64 + Send + Sync,
{
    #[inline]
    fn hash_key(&self, key: &str) -> u64 {
        self(key)
    }
}

/// A type-erased key hash, shared by the data shards and the link graph of one cache.
#[derive(Clone)]
pub(crate) struct SharedHash(pub(crate) Arc<dyn KeyHash>);

impl KeyHash for SharedHash {
    #[inline]
    fn hash_key(&self, key: &str) -> u64 {
        self.0.hash_key(key)
    }
}

/// Maps a hash onto `0..count`.
#[expect(
    clippy::cast_possible_truncation,
    reason = "the remainder is always smaller than count, which is a usize"
)]
pub(crate) fn index_for(hash: u64, count: usize) -> usize {
    debug_assert!(count > 0, "count must be greater than zero");
    (hash % count as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xxh3_is_deterministic() {
        assert_eq!(Xxh3.hash_key("user:1"), Xxh3.hash_key("user:1"));
        assert_ne!(Xxh3.hash_key("user:1"), Xxh3.hash_key("user:2"));
    }

    #[test]
    fn closures_are_key_hashes() {
        let constant = |_: &str| 7_u64;
        assert_eq!(constant.hash_key("anything"), 7);
    }

    #[test]
    fn shared_hash_delegates() {
        let shared = SharedHash(Arc::new(|key: &str| key.len() as u64));
        assert_eq!(shared.hash_key("four"), 4);
        assert_eq!(shared.clone().hash_key(""), 0);
    }

    #[test]
    fn index_for_stays_in_range() {
        for key in ["a", "b", "c", "group:42", ""] {
            assert!(index_for(Xxh3.hash_key(key), 3) < 3);
        }
        assert_eq!(index_for(10, 4), 2);
        assert_eq!(index_for(u64::MAX, 1), 0);
    }
}
