// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Strategy selection for a single shard.

use std::fmt;
use std::future::Future;

use crate::active::ActiveShard;
use crate::builder::Strategy;
use crate::error::BuildError;
use crate::lazy::LazyShard;
use crate::store::{ShardConfig, Store};

/// A single shard using one of the supported expiry strategies.
pub enum Shard<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Expiry checked on read, least recently used eviction.
    Lazy(LazyShard<V, E>),
    /// Expiry enforced in the background.
    Active(ActiveShard<V, E>),
}

impl<V, E> Shard<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a shard using `strategy`.
    ///
    /// # Errors
    ///
    /// Returns the error of [`LazyShard::new`] or [`ActiveShard::new`].
    pub fn new(strategy: Strategy, config: ShardConfig) -> Result<Self, BuildError> {
        match strategy {
            Strategy::Lazy => LazyShard::new(config).map(Self::Lazy),
            Strategy::Active => ActiveShard::new(config).map(Self::Active),
        }
    }
}

impl<V, E> Store<V, E> for Shard<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn get<F, Fut>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send,
    {
        match self {
            Self::Lazy(shard) => shard.get(key, fetch).await,
            Self::Active(shard) => shard.get(key, fetch).await,
        }
    }

    async fn set(&self, key: &str, value: V) {
        match self {
            Self::Lazy(shard) => shard.set(key, value).await,
            Self::Active(shard) => shard.set(key, value).await,
        }
    }

    async fn set_has(&self, key: &str, value: V) -> bool {
        match self {
            Self::Lazy(shard) => shard.set_has(key, value).await,
            Self::Active(shard) => shard.set_has(key, value).await,
        }
    }

    async fn peek(&self, key: &str) -> Option<Result<V, E>> {
        match self {
            Self::Lazy(shard) => shard.peek(key).await,
            Self::Active(shard) => shard.peek(key).await,
        }
    }

    fn del(&self, key: &str) -> bool {
        match self {
            Self::Lazy(shard) => shard.del(key),
            Self::Active(shard) => shard.del(key),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Lazy(shard) => shard.len(),
            Self::Active(shard) => shard.len(),
        }
    }

    async fn stop(&self) {
        match self {
            Self::Lazy(shard) => shard.stop().await,
            Self::Active(shard) => shard.stop().await,
        }
    }
}

impl<V, E> fmt::Debug for Shard<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lazy(shard) => fmt::Debug::fmt(shard, f),
            Self::Active(shard) => fmt::Debug::fmt(shard, f),
        }
    }
}
