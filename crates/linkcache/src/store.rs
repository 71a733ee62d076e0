// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The capability interface shared by shards and sharded stores.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::entry::Ttl;
use crate::error::BuildError;
use crate::target::{NoopTarget, Target};

/// Invoked with the key of an entry removed by capacity pressure or expiry.
///
/// Never invoked for explicit deletes. The callback runs after the shard lock has been released,
/// so it may delete other keys, including keys of the same shard.
pub type EvictCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A keyed read-through store of fetch outcomes.
///
/// Implemented by [`LazyShard`](crate::LazyShard), [`ActiveShard`](crate::ActiveShard),
/// [`Shard`](crate::Shard) and [`ShardedStore`](crate::ShardedStore). Because a sharded store is
/// itself a store, stores compose.
pub trait Store<V, E>: Send + Sync {
    /// Returns the cached outcome for `key`, running `fetch` to produce it when the key is absent
    /// or expired.
    ///
    /// Concurrent calls for the same key run `fetch` at most once; the other callers wait and
    /// receive the same outcome. Errors are cached for the failure TTL and returned as is.
    fn get<F, Fut>(&self, key: &str, fetch: F) -> impl Future<Output = Result<V, E>> + Send
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send;

    /// Stores `value` as a fresh successful outcome for `key`.
    fn set(&self, key: &str, value: V) -> impl Future<Output = ()> + Send;

    /// Stores `value` only when `key` is currently cached. Returns whether it was stored.
    fn set_has(&self, key: &str, value: V) -> impl Future<Output = bool> + Send;

    /// Returns the fresh cached outcome for `key` without fetching.
    fn peek(&self, key: &str) -> impl Future<Output = Option<Result<V, E>>> + Send;

    /// Removes `key`. Returns `true` when an entry was removed.
    fn del(&self, key: &str) -> bool;

    /// Returns the number of cached entries.
    ///
    /// The count may include entries that expired but have not been reclaimed yet.
    fn len(&self) -> usize;

    /// Returns `true` when no entries are cached.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases background resources. Calling it more than once is harmless.
    fn stop(&self) -> impl Future<Output = ()> + Send;
}

/// Settings shared by every shard of a store.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use linkcache::ShardConfig;
///
/// let config = ShardConfig::new(1024)
///     .success_ttl(Duration::from_secs(30))
///     .failed_ttl(Duration::from_secs(1));
/// assert_eq!(config.capacity(), 1024);
/// ```
#[derive(Clone)]
pub struct ShardConfig {
    pub(crate) capacity: usize,
    pub(crate) ttl: Ttl,
    pub(crate) sweep_interval: Duration,
    pub(crate) target: Arc<dyn Target>,
    pub(crate) on_evict: Option<EvictCallback>,
    pub(crate) name: Arc<str>,
}

pub(crate) const DEFAULT_CAPACITY: usize = 20_000;
pub(crate) const DEFAULT_SUCCESS_TTL: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_FAILED_TTL: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_NAME: &str = "linkcache";

impl ShardConfig {
    /// Creates a configuration for shards holding at most `capacity` entries each.
    ///
    /// Successful outcomes live for 60 seconds, failures for 5 seconds, and active shards sweep
    /// once per second.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ttl: Ttl {
                success: DEFAULT_SUCCESS_TTL,
                failed: DEFAULT_FAILED_TTL,
            },
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            target: Arc::new(NoopTarget),
            on_evict: None,
            name: Arc::from(DEFAULT_NAME),
        }
    }

    /// Sets how long a successful outcome stays fresh.
    #[must_use]
    pub fn success_ttl(mut self, ttl: Duration) -> Self {
        self.ttl.success = ttl;
        self
    }

    /// Sets how long a failed outcome stays cached.
    #[must_use]
    pub fn failed_ttl(mut self, ttl: Duration) -> Self {
        self.ttl.failed = ttl;
        self
    }

    /// Sets how often active shards reclaim expired entries.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the statistics sink.
    #[must_use]
    pub fn target(mut self, target: Arc<dyn Target>) -> Self {
        self.target = target;
        self
    }

    /// Sets the callback invoked for entries removed by capacity pressure or expiry.
    #[must_use]
    pub fn on_evict(mut self, callback: EvictCallback) -> Self {
        self.on_evict = Some(callback);
        self
    }

    /// Sets the cache name reported in log events.
    #[must_use]
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the per-shard capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rejects TTLs for which no expiry deadline can be computed.
    pub(crate) fn check_ttl(&self) -> Result<(), BuildError> {
        let now = tokio::time::Instant::now();
        if now.checked_add(self.ttl.success).is_none() || now.checked_add(self.ttl.failed).is_none() {
            return Err(BuildError::TtlOutOfRange);
        }
        Ok(())
    }

    pub(crate) fn evicted(&self, key: &str) {
        tracing::debug!(cache.name = &*self.name, cache.key = key, "cache.evicted");
        if let Some(callback) = &self.on_evict {
            callback(key);
        }
    }
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for ShardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardConfig")
            .field("capacity", &self.capacity)
            .field("success_ttl", &self.ttl.success)
            .field("failed_ttl", &self.ttl.failed)
            .field("sweep_interval", &self.sweep_interval)
            .field("on_evict", &self.on_evict.is_some())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
