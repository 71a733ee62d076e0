// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring caches.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::config::LocalCacheConfig;
use crate::error::BuildError;
use crate::hash::{KeyHash, SharedHash, Xxh3};
use crate::hook::DeleteHook;
use crate::store::{DEFAULT_CAPACITY, DEFAULT_NAME, ShardConfig};
use crate::target::{NoopTarget, Target};

const DEFAULT_SHARDS: usize = 500;
const DEFAULT_LINK_SHARDS: usize = 500;

/// How shards expire their entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum Strategy {
    /// Freshness is checked when a key is read; full shards evict the least recently used key.
    ///
    /// Expired entries linger until read, deleted or evicted, so the links of an expired key are
    /// only invalidated once the key is evicted by capacity pressure.
    #[default]
    Lazy,

    /// A background task removes expired entries and reports them, so linked keys are invalidated
    /// shortly after expiry. Requires a Tokio runtime when the cache is built.
    Active,
}

/// Builder for configuring a [`Cache`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use linkcache::{Cache, Strategy};
///
/// let cache = Cache::<String, String>::builder()
///     .name("users")
///     .shards(64)
///     .capacity(1_000)
///     .success_ttl(Duration::from_secs(300))
///     .failed_ttl(Duration::from_secs(1))
///     .strategy(Strategy::Lazy)
///     .build()?;
/// # Ok::<(), linkcache::BuildError>(())
/// ```
pub struct CacheBuilder<V, E> {
    pub(crate) shards: usize,
    pub(crate) link_shards: usize,
    pub(crate) strategy: Strategy,
    pub(crate) shard: ShardConfig,
    pub(crate) hasher: SharedHash,
    pub(crate) hooks: Vec<Arc<dyn DeleteHook>>,
    _phantom: PhantomData<fn() -> (V, E)>,
}

impl<V, E> Default for CacheBuilder<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> CacheBuilder<V, E> {
    /// Creates a builder with default settings.
    ///
    /// The defaults are 500 data shards of 20 000 entries each, 500 link partitions, the lazy
    /// strategy, a 60 second success TTL, a 5 second failure TTL and a 1 second sweep interval.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: DEFAULT_SHARDS,
            link_shards: DEFAULT_LINK_SHARDS,
            strategy: Strategy::default(),
            shard: ShardConfig::new(DEFAULT_CAPACITY),
            hasher: SharedHash(Arc::new(Xxh3)),
            hooks: Vec::new(),
            _phantom: PhantomData,
        }
    }

    /// Creates a builder from the local cache section of a service configuration.
    ///
    /// The topic becomes the cache name, `slot_num` the shard count and `slot_size` the
    /// per-shard capacity. Callers are expected to check [`LocalCacheConfig::enabled`] first;
    /// a disabled section fails to build.
    ///
    /// # Examples
    ///
    /// ```
    /// use linkcache::{CacheBuilder, LocalCacheConfig};
    ///
    /// let config = LocalCacheConfig {
    ///     topic: "user".to_string(),
    ///     slot_num: 16,
    ///     slot_size: 256,
    ///     success_expire: 300,
    ///     failed_expire: 5,
    /// };
    /// let cache = CacheBuilder::<String, String>::from_config(&config).build()?;
    /// # Ok::<(), linkcache::BuildError>(())
    /// ```
    #[must_use]
    pub fn from_config(config: &LocalCacheConfig) -> Self {
        Self::new()
            .name(config.topic.as_str())
            .shards(config.slot_num)
            .capacity(config.slot_size)
            .success_ttl(config.success_ttl())
            .failed_ttl(config.failed_ttl())
    }

    /// Sets the number of data shards.
    #[must_use]
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Sets the maximum number of entries per shard.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.shard.capacity = capacity;
        self
    }

    /// Sets the number of link graph partitions.
    ///
    /// Zero disables link tracking: the related keys given to [`Cache::get_link`] are ignored
    /// and deletes no longer cascade.
    #[must_use]
    pub fn link_shards(mut self, link_shards: usize) -> Self {
        self.link_shards = link_shards;
        self
    }

    /// Sets the expiry strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets how long successful lookups stay fresh.
    #[must_use]
    pub fn success_ttl(mut self, ttl: Duration) -> Self {
        self.shard = self.shard.success_ttl(ttl);
        self
    }

    /// Sets how long failed lookups stay cached.
    #[must_use]
    pub fn failed_ttl(mut self, ttl: Duration) -> Self {
        self.shard = self.shard.failed_ttl(ttl);
        self
    }

    /// Sets how often the active strategy reclaims expired entries.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.shard = self.shard.sweep_interval(interval);
        self
    }

    /// Sets the hash used to route keys to data shards and link partitions.
    #[must_use]
    pub fn hasher(mut self, hasher: impl KeyHash + 'static) -> Self {
        self.hasher = SharedHash(Arc::new(hasher));
        self
    }

    /// Sets the statistics sink.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use linkcache::{Cache, CountingTarget};
    ///
    /// let stats = Arc::new(CountingTarget::new());
    /// let cache = Cache::<String, String>::builder()
    ///     .target(Arc::clone(&stats))
    ///     .build()?;
    /// assert_eq!(stats.snapshot().get_hit, 0);
    /// # Ok::<(), linkcache::BuildError>(())
    /// ```
    #[must_use]
    pub fn target<T: Target + 'static>(mut self, target: Arc<T>) -> Self {
        let target: Arc<dyn Target> = target;
        self.shard = self.shard.target(target);
        self
    }

    /// Adds a hook that runs before [`Cache::del`] removes keys.
    ///
    /// Hooks run in the order they were added.
    #[must_use]
    pub fn pre_delete(mut self, hook: impl DeleteHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Sets the name reported in log events.
    #[must_use]
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.shard = self.shard.name(name);
        self
    }
}

impl<V, E> CacheBuilder<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Builds the cache.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ZeroShards`] when no data shards are requested,
    /// [`BuildError::ZeroCapacity`] when shards cannot hold entries,
    /// [`BuildError::ZeroSweepInterval`] for an active cache that never sweeps, and
    /// [`BuildError::MissingRuntime`] for an active cache built outside of a Tokio runtime.
    pub fn build(self) -> Result<Cache<V, E>, BuildError> {
        Cache::from_builder(self)
    }
}

impl<V, E> fmt::Debug for CacheBuilder<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("shards", &self.shards)
            .field("link_shards", &self.link_shards)
            .field("strategy", &self.strategy)
            .field("shard", &self.shard)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl<V, E> From<&LocalCacheConfig> for CacheBuilder<V, E> {
    fn from(config: &LocalCacheConfig) -> Self {
        Self::from_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::CountingTarget;

    type Builder = CacheBuilder<String, String>;

    #[test]
    fn defaults() {
        let builder = Builder::new();
        assert_eq!(builder.shards, 500);
        assert_eq!(builder.link_shards, 500);
        assert_eq!(builder.strategy, Strategy::Lazy);
        assert_eq!(builder.shard.capacity(), 20_000);
        assert_eq!(builder.shard.ttl.success, Duration::from_secs(60));
        assert_eq!(builder.shard.ttl.failed, Duration::from_secs(5));
        assert_eq!(&*builder.shard.name, DEFAULT_NAME);
    }

    #[test]
    fn setters_are_applied() {
        let builder = Builder::new()
            .shards(3)
            .capacity(7)
            .link_shards(0)
            .strategy(Strategy::Active)
            .success_ttl(Duration::from_millis(50))
            .failed_ttl(Duration::from_millis(10))
            .sweep_interval(Duration::from_millis(5))
            .target(Arc::new(CountingTarget::new()))
            .pre_delete(|_: &[String]| async {})
            .name("users");

        assert_eq!(builder.shards, 3);
        assert_eq!(builder.shard.capacity(), 7);
        assert_eq!(builder.link_shards, 0);
        assert_eq!(builder.strategy, Strategy::Active);
        assert_eq!(builder.shard.ttl.success, Duration::from_millis(50));
        assert_eq!(builder.shard.ttl.failed, Duration::from_millis(10));
        assert_eq!(builder.shard.sweep_interval, Duration::from_millis(5));
        assert_eq!(builder.hooks.len(), 1);
        assert_eq!(&*builder.shard.name, "users");
    }

    #[test]
    fn from_config_maps_every_field() {
        let config = LocalCacheConfig {
            topic: "group".to_string(),
            slot_num: 4,
            slot_size: 32,
            success_expire: 120,
            failed_expire: 2,
        };
        let builder = Builder::from(&config);

        assert_eq!(builder.shards, 4);
        assert_eq!(builder.shard.capacity(), 32);
        assert_eq!(builder.shard.ttl.success, Duration::from_secs(120));
        assert_eq!(builder.shard.ttl.failed, Duration::from_secs(2));
        assert_eq!(&*builder.shard.name, "group");
    }

    #[test]
    fn custom_hasher_is_used() {
        let builder = Builder::new().hasher(|_: &str| 3_u64);
        assert_eq!(builder.hasher.hash_key("anything"), 3);
    }

    #[test]
    fn debug_lists_settings() {
        let rendered = format!("{:?}", Builder::new().shards(2));
        assert!(rendered.contains("shards: 2"));
        assert!(rendered.contains("strategy: Lazy"));
    }
}
