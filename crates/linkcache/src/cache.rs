// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The cache facade.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};

use hashbrown::HashSet;

use crate::builder::CacheBuilder;
use crate::error::BuildError;
use crate::hash::SharedHash;
use crate::hook::DeleteHook;
use crate::link::LinkGraph;
use crate::shard::Shard;
use crate::sharded::ShardedStore;
use crate::store::Store;
use crate::target::Target;

/// A sharded, link-aware read-through cache.
///
/// `Cache` is a cheap handle: clones share the same entries. Values and errors are cloned out to
/// every caller, so wrap large values in an [`Arc`].
///
/// # Examples
///
/// ```
/// use linkcache::Cache;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let cache = Cache::<u64, String>::builder().shards(4).build()?;
///
/// let members = cache
///     .get_link("group:7:count", || async { Ok(12) }, &["group:7"])
///     .await;
/// assert_eq!(members, Ok(12));
///
/// // Deleting the group also drops the derived count.
/// let invalidated = cache.del(&["group:7"]).await;
/// assert!(invalidated.contains(&"group:7:count".to_string()));
/// # Ok::<(), linkcache::BuildError>(())
/// # }).unwrap();
/// ```
pub struct Cache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    inner: Arc<CacheInner<V, E>>,
}

struct CacheInner<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    store: ShardedStore<Shard<V, E>, SharedHash>,
    links: Option<LinkGraph<SharedHash>>,
    hooks: Vec<Arc<dyn DeleteHook>>,
    target: Arc<dyn Target>,
    name: Arc<str>,
}

impl<V, E> Clone for Cache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> Cache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a builder with default settings.
    #[must_use]
    pub fn builder() -> CacheBuilder<V, E> {
        CacheBuilder::new()
    }

    pub(crate) fn from_builder(builder: CacheBuilder<V, E>) -> Result<Self, BuildError> {
        let CacheBuilder {
            shards,
            link_shards,
            strategy,
            shard,
            hasher,
            hooks,
            ..
        } = builder;

        // Evictions cascade through the cache, which does not exist yet when its shards are built.
        let handle: Arc<OnceLock<Weak<CacheInner<V, E>>>> = Arc::new(OnceLock::new());
        let callback_handle = Arc::clone(&handle);
        let shard = shard.on_evict(Arc::new(move |key: &str| {
            if let Some(inner) = callback_handle.get().and_then(Weak::upgrade) {
                inner.evicted(key);
            }
        }));

        let links = if link_shards == 0 {
            None
        } else {
            Some(LinkGraph::with_hasher(link_shards, hasher.clone())?)
        };
        let store = ShardedStore::with_hasher(shards, hasher, |_| Shard::new(strategy, shard.clone()))?;

        let inner = Arc::new(CacheInner {
            store,
            links,
            hooks,
            target: Arc::clone(&shard.target),
            name: Arc::clone(&shard.name),
        });
        let _ = handle.set(Arc::downgrade(&inner));

        Ok(Self { inner })
    }

    /// Returns the value for `key`, running `fetch` when it is absent or expired.
    ///
    /// Concurrent calls for the same key share a single run of `fetch`. A failed fetch is cached
    /// for the failure TTL; callers within that window receive the same error without a new fetch.
    pub async fn get<F, Fut>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send,
    {
        self.inner.store.get(key, fetch).await
    }

    /// Like [`get`](Self::get), and links `key` with every key in `related` when `fetch` runs.
    ///
    /// Afterwards, invalidating any of the related keys also invalidates `key`, and the other
    /// way around. Links are ignored when link tracking is disabled.
    pub async fn get_link<F, Fut, R>(&self, key: &str, fetch: F, related: &[R]) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send,
        R: AsRef<str> + Sync,
    {
        let links = self.inner.links.as_ref();
        let fetch = move || {
            if let Some(links) = links {
                links.link(key, related);
            }
            fetch()
        };
        self.inner.store.get(key, fetch).await
    }

    /// Returns the cached value for every key, fetching all the others with one call to
    /// `fetch_batch`.
    ///
    /// `fetch_batch` receives the keys without a fresh cached value, each once. The values it
    /// returns are cached and merged into the result; keys it leaves out are absent from the
    /// result and stay uncached. When it fails, the error is returned and nothing is cached.
    /// Cached failures are not returned: their keys are fetched again.
    ///
    /// # Errors
    ///
    /// Returns the error of `fetch_batch`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    ///
    /// use linkcache::Cache;
    ///
    /// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
    /// let cache = Cache::<u32, String>::builder().shards(2).build()?;
    /// cache.set("a", 1).await;
    ///
    /// let values = cache
    ///     .get_batch(&["a", "b"], |missing| async move {
    ///         assert_eq!(missing, vec!["b".to_string()]);
    ///         Ok(HashMap::from([("b".to_string(), 2)]))
    ///     })
    ///     .await;
    /// assert_eq!(values.map(|values| values.len()), Ok(2));
    /// # Ok::<(), linkcache::BuildError>(())
    /// # }).unwrap();
    /// ```
    pub async fn get_batch<K, F, Fut>(&self, keys: &[K], fetch_batch: F) -> Result<HashMap<String, V>, E>
    where
        K: AsRef<str> + Sync,
        F: FnOnce(Vec<String>) -> Fut + Send,
        Fut: Future<Output = Result<HashMap<String, V>, E>> + Send,
    {
        let mut found = HashMap::with_capacity(keys.len());
        let mut missing = Vec::new();
        let mut seen = HashSet::with_capacity(keys.len());

        for key in keys {
            let key = key.as_ref();
            if !seen.insert(key) {
                continue;
            }
            match self.inner.store.peek(key).await {
                Some(Ok(value)) => {
                    self.inner.target.incr_get_hit();
                    found.insert(key.to_owned(), value);
                }
                _ => missing.push(key.to_owned()),
            }
        }

        if missing.is_empty() {
            return Ok(found);
        }

        tracing::debug!(cache.name = &*self.inner.name, cache.keys = missing.len(), "cache.fetch_batch");
        let mut fetched = match fetch_batch(missing.clone()).await {
            Ok(fetched) => fetched,
            Err(error) => {
                self.inner.target.incr_get_failed();
                return Err(error);
            }
        };

        for key in missing {
            if let Some(value) = fetched.remove(&key) {
                self.inner.target.incr_get_success();
                self.inner.store.set(&key, value.clone()).await;
                found.insert(key, value);
            }
        }
        Ok(found)
    }

    /// Stores `value` for `key` as a fresh successful lookup.
    pub async fn set(&self, key: &str, value: V) {
        self.inner.store.set(key, value).await;
    }

    /// Replaces the value of `key` only when it is cached. Returns whether it was replaced.
    ///
    /// With [`Strategy::Active`](crate::Strategy::Active), a key that just expired counts as
    /// absent and the call does nothing.
    pub async fn set_has(&self, key: &str, value: V) -> bool {
        self.inner.store.set_has(key, value).await
    }

    /// Runs every pre-delete hook, then invalidates `keys` and everything linked to them.
    ///
    /// Hooks run in registration order and are each awaited before the next one starts. Returns
    /// the invalidated keys, as [`del_local`](Self::del_local) does.
    pub async fn del<R: AsRef<str>>(&self, keys: &[R]) -> Vec<String> {
        if !self.inner.hooks.is_empty() {
            let owned: Vec<String> = keys.iter().map(|key| key.as_ref().to_owned()).collect();
            for hook in &self.inner.hooks {
                hook.before_delete(&owned).await;
            }
            tracing::debug!(cache.name = &*self.inner.name, cache.keys = owned.len(), "cache.pre_delete");
        }
        self.del_local(keys)
    }

    /// Invalidates `keys` and everything transitively linked to them, without running hooks.
    ///
    /// Returns every invalidated key, each once, whether or not it held a cached value.
    pub fn del_local<R: AsRef<str>>(&self, keys: &[R]) -> Vec<String> {
        let mut processed = HashSet::new();
        let mut invalidated = Vec::new();
        for key in keys {
            self.inner.cascade(key.as_ref(), &mut processed, &mut invalidated, false);
        }
        invalidated
    }

    /// Returns the number of cached entries across all shards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    /// Returns `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Stops background work. The cache keeps serving requests afterwards; expired entries of an
    /// active cache are then only reclaimed when read.
    pub async fn stop(&self) {
        self.inner.store.stop().await;
    }
}

impl<V, E> CacheInner<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Invalidates everything reachable from `root`, appending the new keys to `invalidated`.
    ///
    /// With `evicted`, `root` itself has already left its shard and is not deleted again.
    fn cascade(&self, root: &str, processed: &mut HashSet<String>, invalidated: &mut Vec<String>, evicted: bool) {
        let start = invalidated.len();
        let mut stack = vec![root.to_owned()];

        while let Some(key) = stack.pop() {
            if !processed.insert(key.clone()) {
                continue;
            }
            if let Some(links) = &self.links {
                stack.extend(links.unlink(&key).into_iter().filter(|related| !processed.contains(related)));
            }
            invalidated.push(key);
        }

        for key in &invalidated[start..] {
            if evicted && key == root {
                continue;
            }
            self.store.del(key);
        }

        if invalidated.len() - start > 1 {
            tracing::info!(
                cache.name = &*self.name,
                cache.key = root,
                cache.invalidated = invalidated.len() - start,
                "cache.cascade"
            );
        }
    }

    fn evicted(&self, key: &str) {
        if self.links.is_none() {
            return;
        }
        self.cascade(key, &mut HashSet::new(), &mut Vec::new(), true);
    }
}

impl<V, E> fmt::Debug for Cache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.inner.name)
            .field("shards", &self.inner.store.shard_count())
            .field("len", &self.inner.store.len())
            .field("links", &self.inner.links.is_some())
            .field("hooks", &self.inner.hooks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::builder::Strategy;
    use crate::config::LocalCacheConfig;
    use crate::target::CountingTarget;
    use crate::testing::LogCapture;

    type TestCache = Cache<u32, String>;

    fn cache() -> TestCache {
        TestCache::builder().shards(4).capacity(16).link_shards(4).build().unwrap()
    }

    fn sorted(mut keys: Vec<String>) -> Vec<String> {
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn get_caches_values() {
        let cache = cache();
        assert_eq!(cache.get("k", || async { Ok(1) }).await, Ok(1));
        assert_eq!(cache.get("k", || async { Ok(2) }).await, Ok(1));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn cascade_follows_links_transitively() {
        let cache = cache();
        let _ = cache.get_link("a:1", || async { Ok(1) }, &["b:1", "c:1"]).await;
        let _ = cache.get_link("z:1", || async { Ok(2) }, &["b:1"]).await;
        let _ = cache.get("unrelated", || async { Ok(3) }).await;

        let invalidated = cache.del_local(&["z:1"]);
        assert_eq!(sorted(invalidated), vec!["a:1", "b:1", "c:1", "z:1"]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a:1", || async { Ok(10) }).await, Ok(10));
    }

    #[tokio::test]
    async fn links_are_registered_only_when_fetching() {
        let cache = cache();
        let _ = cache.get("a", || async { Ok(1) }).await;
        let _ = cache.get_link("a", || async { Ok(2) }, &["b"]).await;

        assert_eq!(cache.del_local(&["b"]), vec!["b"]);
        assert_eq!(cache.get("a", || async { Ok(3) }).await, Ok(1));
    }

    #[tokio::test]
    async fn disabled_links_do_not_cascade() {
        let cache = TestCache::builder().shards(2).link_shards(0).build().unwrap();
        let _ = cache.get_link("a", || async { Ok(1) }, &["b"]).await;

        assert_eq!(cache.del_local(&["b"]), vec!["b"]);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn hooks_run_in_order_before_deleting() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&calls);
        let second = Arc::clone(&calls);
        let cache = TestCache::builder()
            .shards(2)
            .pre_delete(move |keys: &[String]| {
                first.lock().unwrap().push(format!("first:{}", keys.join(",")));
                async {}
            })
            .pre_delete(move |keys: &[String]| {
                second.lock().unwrap().push(format!("second:{}", keys.join(",")));
                async {}
            })
            .build()
            .unwrap();
        let _ = cache.get("a", || async { Ok(1) }).await;

        let invalidated = cache.del(&["a", "b"]).await;
        assert_eq!(invalidated, vec!["a", "b"]);
        assert_eq!(*calls.lock().unwrap(), vec!["first:a,b", "second:a,b"]);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn del_local_skips_hooks() {
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        let cache = TestCache::builder()
            .shards(2)
            .pre_delete(move |_: &[String]| {
                *flag.lock().unwrap() = true;
                async {}
            })
            .build()
            .unwrap();

        let _ = cache.del_local(&["a"]);
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn eviction_invalidates_linked_keys() {
        let cache = TestCache::builder().shards(1).capacity(2).build().unwrap();
        let _ = cache.get_link("a", || async { Ok(1) }, &["x"]).await;
        let _ = cache.get("x", || async { Ok(2) }).await;

        // Evicts "a" from the shard whose lock the cascade needs to delete "x".
        let run = cache.get("b", || async { Ok(3) });
        tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("x", || async { Ok(20) }).await, Ok(20));
        assert_eq!(cache.get("b", || async { Ok(30) }).await, Ok(3));
    }

    #[tokio::test]
    async fn get_batch_merges_cached_and_fetched_values() {
        let target = Arc::new(CountingTarget::new());
        let cache = TestCache::builder().shards(2).target(Arc::clone(&target)).build().unwrap();
        cache.set("a", 1).await;

        let values = cache
            .get_batch(&["a", "b", "c", "b"], |missing| async move {
                assert_eq!(missing, vec!["b".to_string(), "c".to_string()]);
                Ok(HashMap::from([("b".to_string(), 2)]))
            })
            .await
            .unwrap();

        assert_eq!(values, HashMap::from([("a".to_string(), 1), ("b".to_string(), 2)]));
        assert_eq!(cache.get("b", || async { Ok(99) }).await, Ok(2));
        assert_eq!(cache.get("c", || async { Ok(3) }).await, Ok(3));

        let snapshot = target.snapshot();
        assert_eq!(snapshot.get_hit, 2);
        assert_eq!(snapshot.get_success, 2);
    }

    #[tokio::test]
    async fn get_batch_errors_cache_nothing() {
        let cache = cache();
        let result = cache
            .get_batch(&["a"], |_| async { Err::<HashMap<String, u32>, _>("down".to_string()) })
            .await;

        assert_eq!(result, Err("down".to_string()));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn get_batch_refetches_cached_failures() {
        let cache = cache();
        let _ = cache.get("a", || async { Err("down".to_string()) }).await;

        let values = cache
            .get_batch(&["a"], |missing| async move { Ok(missing.into_iter().map(|key| (key, 5)).collect()) })
            .await;
        assert_eq!(values, Ok(HashMap::from([("a".to_string(), 5)])));
    }

    #[tokio::test]
    async fn set_has_only_replaces_cached_keys() {
        let cache = cache();
        assert!(!cache.set_has("a", 1).await);
        cache.set("a", 2).await;
        assert!(cache.set_has("a", 3).await);
        assert_eq!(cache.get("a", || async { Ok(4) }).await, Ok(3));
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let cache = cache();
        let other = cache.clone();
        let _ = cache.get("a", || async { Ok(1) }).await;
        assert_eq!(other.get("a", || async { Ok(2) }).await, Ok(1));
    }

    #[tokio::test]
    async fn cascade_is_logged() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let cache = TestCache::builder().shards(2).name("groups").build().unwrap();
        let _ = cache.get_link("a", || async { Ok(1) }, &["b"]).await;
        let _ = cache.del(&["a"]).await;

        capture.assert_contains("cache.cascade");
        capture.assert_contains("cache.name=\"groups\"");
        capture.assert_contains("cache.invalidated=2");
        capture.assert_contains("cache.fetch");
    }

    #[tokio::test]
    async fn active_strategy_builds_and_stops() {
        let cache = TestCache::builder().shards(2).strategy(Strategy::Active).build().unwrap();
        assert_eq!(cache.get("a", || async { Ok(1) }).await, Ok(1));
        cache.stop().await;
        cache.stop().await;
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert_eq!(TestCache::builder().shards(0).build().unwrap_err(), BuildError::ZeroShards);
        assert_eq!(TestCache::builder().capacity(0).build().unwrap_err(), BuildError::ZeroCapacity);
        assert_eq!(
            TestCache::builder().strategy(Strategy::Active).build().unwrap_err(),
            BuildError::MissingRuntime
        );
    }

    #[test]
    fn out_of_range_settings_fail_at_build() {
        assert_eq!(
            TestCache::builder().shards(1).success_ttl(Duration::MAX).build().unwrap_err(),
            BuildError::TtlOutOfRange
        );
        assert_eq!(
            TestCache::builder().shards(1).failed_ttl(Duration::MAX).build().unwrap_err(),
            BuildError::TtlOutOfRange
        );
        assert_eq!(
            TestCache::builder().shards(1).capacity(usize::MAX).build().unwrap_err(),
            BuildError::CapacityTooLarge
        );

        let config = LocalCacheConfig {
            topic: "user".to_string(),
            slot_num: 1,
            slot_size: 8,
            success_expire: u64::MAX,
            failed_expire: 1,
        };
        assert_eq!(
            CacheBuilder::<u32, String>::from_config(&config).build().unwrap_err(),
            BuildError::TtlOutOfRange
        );
    }

    #[tokio::test]
    async fn out_of_range_ttl_fails_for_active_caches() {
        let result = TestCache::builder()
            .shards(1)
            .strategy(Strategy::Active)
            .success_ttl(Duration::MAX)
            .build();
        assert_eq!(result.unwrap_err(), BuildError::TtlOutOfRange);
    }

    #[test]
    fn debug_summarizes_the_cache() {
        let rendered = format!("{:?}", cache());
        assert!(rendered.contains("shards: 4"));
        assert!(rendered.contains("links: true"));
    }
}
