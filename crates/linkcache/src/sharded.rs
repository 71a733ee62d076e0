// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Hash-partitioned store.

use std::fmt;
use std::future::Future;

use crate::error::BuildError;
use crate::hash::{KeyHash, Xxh3, index_for};
use crate::store::Store;

/// A fixed set of stores, each owning the keys that hash to its index.
///
/// A key always lives in shard `hash(key) % shard_count`; the shard count never changes after
/// construction. Every operation is forwarded to the owning shard, so contention on one shard
/// never slows down keys of another. A sharded store is itself a [`Store`] and can be nested.
///
/// # Example
///
/// ```
/// use linkcache::{LazyShard, ShardConfig, ShardedStore, Store};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = ShardedStore::new(4, |_| LazyShard::<u32, String>::new(ShardConfig::new(100)))?;
/// assert_eq!(store.get("answer", || async { Ok(42) }).await, Ok(42));
/// assert_eq!(store.len(), 1);
/// # Ok::<(), linkcache::BuildError>(())
/// # }).unwrap();
/// ```
pub struct ShardedStore<S, H = Xxh3> {
    shards: Box<[S]>,
    hasher: H,
}

impl<S> ShardedStore<S> {
    /// Creates `count` shards with `make`, routing keys with the default hash.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ZeroShards`] when `count` is zero, or the first error returned by
    /// `make`.
    pub fn new(count: usize, make: impl FnMut(usize) -> Result<S, BuildError>) -> Result<Self, BuildError> {
        Self::with_hasher(count, Xxh3, make)
    }
}

impl<S, H: KeyHash> ShardedStore<S, H> {
    /// Creates `count` shards with `make`, routing keys with `hasher`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ZeroShards`] when `count` is zero, or the first error returned by
    /// `make`.
    pub fn with_hasher(count: usize, hasher: H, make: impl FnMut(usize) -> Result<S, BuildError>) -> Result<Self, BuildError> {
        if count == 0 {
            return Err(BuildError::ZeroShards);
        }

        let shards = (0..count).map(make).collect::<Result<Box<[S]>, _>>()?;
        Ok(Self { shards, hasher })
    }

    /// Returns the number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns the shard that owns `key`.
    #[must_use]
    pub fn shard_for(&self, key: &str) -> &S {
        &self.shards[index_for(self.hasher.hash_key(key), self.shards.len())]
    }

    /// Returns every shard.
    #[must_use]
    pub fn shards(&self) -> &[S] {
        &self.shards
    }
}

impl<V, E, S, H> Store<V, E> for ShardedStore<S, H>
where
    S: Store<V, E>,
    H: KeyHash,
{
    fn get<F, Fut>(&self, key: &str, fetch: F) -> impl Future<Output = Result<V, E>> + Send
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send,
    {
        self.shard_for(key).get(key, fetch)
    }

    fn set(&self, key: &str, value: V) -> impl Future<Output = ()> + Send {
        self.shard_for(key).set(key, value)
    }

    fn set_has(&self, key: &str, value: V) -> impl Future<Output = bool> + Send {
        self.shard_for(key).set_has(key, value)
    }

    fn peek(&self, key: &str) -> impl Future<Output = Option<Result<V, E>>> + Send {
        self.shard_for(key).peek(key)
    }

    fn del(&self, key: &str) -> bool {
        self.shard_for(key).del(key)
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.len()).sum()
    }

    async fn stop(&self) {
        for shard in &self.shards {
            shard.stop().await;
        }
    }
}

impl<S, H> fmt::Debug for ShardedStore<S, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedStore")
            .field("shards", &self.shards.len())
            .finish_non_exhaustive()
    }
}
