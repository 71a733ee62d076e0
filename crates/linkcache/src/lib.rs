// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A sharded, link-aware local cache that sits in front of expensive remote lookups.
//!
//! This crate provides [`Cache`], an in-process read-through cache designed for services that
//! repeatedly resolve the same records from a database or a peer service. It combines several
//! techniques:
//!
//! 1. **Per-key stampede protection:** Every key owns its own lock. Concurrent callers asking for
//!    the same missing key wait for a single fetch instead of all hitting the backend.
//! 2. **Sharding:** Keys are partitioned across independent shards by a string hash, so lock
//!    contention on membership changes is limited to a fraction of the keyspace.
//! 3. **Two expiry strategies:** [`Strategy::Lazy`] checks freshness on read and keeps the
//!    least recently used keys; [`Strategy::Active`] evicts expired keys in the background.
//! 4. **Failure caching:** A failed fetch is cached for a shorter TTL, so a failing backend is not
//!    hammered by every request.
//! 5. **Cascading invalidation:** Values derived from other records can be linked to them.
//!    Deleting any key deletes everything reachable from it through the [`LinkGraph`].
//!
//! # Example
//!
//! ```
//! use linkcache::Cache;
//!
//! # tokio_test_block_on(async {
//! let cache = Cache::<String, String>::builder().shards(8).capacity(128).build()?;
//!
//! // The fetch runs once, later calls are served from the cache.
//! let name = cache
//!     .get("user:1", || async { Ok("alice".to_string()) })
//!     .await;
//! assert_eq!(name.as_deref(), Ok("alice"));
//!
//! // A derived value that must be dropped whenever `user:1` changes.
//! let summary = cache
//!     .get_link("summary:1", || async { Ok("alice (admin)".to_string()) }, &["user:1"])
//!     .await;
//! assert!(summary.is_ok());
//!
//! // Invalidating the source record also invalidates the summary.
//! let invalidated = cache.del_local(&["user:1"]);
//! assert_eq!(invalidated.len(), 2);
//! # Ok::<(), linkcache::BuildError>(())
//! # }).unwrap();
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! # Concurrency Model
//!
//! The cache is a passive library: all work runs on the calling task. The fetch closure is executed
//! while holding only the lock of the key being fetched, never a shard lock, so a slow backend call
//! does not block unrelated keys. Shard locks are held for constant-time membership updates only.
//!
//! There is no separate cancellation token. Dropping a future that waits on another caller's
//! in-flight fetch does not cancel that fetch, and a waiter that stays alive receives the result
//! produced by whichever caller ran the fetch. If the caller running the fetch is dropped, the key
//! is left without an outcome and the next waiter runs its own fetch.
//!
//! Fetch closures must not panic. A panic propagates to the caller that ran the fetch.
//!
//! # Invalidation Across Nodes
//!
//! The cache only deletes local entries. To fan an invalidation out to other nodes, register a
//! [`DeleteHook`] that publishes the keys to your messaging system, and call
//! [`Cache::del_local`] when receiving such a notification. [`TopicRouter`] groups keys by the
//! topics interested in them.

mod active;
mod builder;
mod cache;
mod config;
mod entry;
mod error;
mod hash;
mod hook;
mod lazy;
mod link;
mod lru;
mod shard;
mod sharded;
mod store;
mod target;
mod topic;

#[doc(inline)]
pub use active::ActiveShard;
#[doc(inline)]
pub use builder::{CacheBuilder, Strategy};
#[doc(inline)]
pub use cache::Cache;
#[doc(inline)]
pub use config::LocalCacheConfig;
#[doc(inline)]
pub use error::BuildError;
#[doc(inline)]
pub use hash::{KeyHash, Xxh3};
#[doc(inline)]
pub use hook::DeleteHook;
#[doc(inline)]
pub use lazy::LazyShard;
#[doc(inline)]
pub use link::LinkGraph;
#[doc(inline)]
pub use shard::Shard;
#[doc(inline)]
pub use sharded::ShardedStore;
#[doc(inline)]
pub use store::{EvictCallback, ShardConfig, Store};
#[cfg(feature = "metrics")]
#[doc(inline)]
pub use target::MeterTarget;
#[doc(inline)]
pub use target::{CountingTarget, NoopTarget, Target, TargetSnapshot};
#[doc(inline)]
pub use topic::TopicRouter;

#[cfg(test)]
mod testing;
