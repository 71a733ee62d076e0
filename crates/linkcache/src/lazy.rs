// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Single-shard store with lazy expiry and least-recently-used eviction.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use crate::entry::{EntryRef, Slot, read_through};
use crate::error::BuildError;
use crate::lru::{LruList, MAX_CAPACITY, NodeIndex};
use crate::store::{ShardConfig, Store};

/// A single shard that checks freshness when a key is read.
///
/// Expired entries stay resident until they are read again, deleted, or pushed out by capacity
/// pressure. When the shard is full, inserting a new key evicts the least recently used one and
/// reports it to the eviction callback.
///
/// The membership lock is held only for O(1) bookkeeping. Fetches run under the per-key lock.
pub struct LazyShard<V, E> {
    membership: Mutex<Membership<V, E>>,
    config: ShardConfig,
}

struct Membership<V, E> {
    map: HashMap<String, Resident<V, E>>,
    order: LruList<String>,
}

struct Resident<V, E> {
    entry: EntryRef<V, E>,
    node: NodeIndex,
}

enum Acquired<V, E> {
    // A newly inserted entry, already locked by the caller.
    Fresh(OwnedMutexGuard<Slot<V, E>>),
    Existing(EntryRef<V, E>),
}

impl<V, E> Acquired<V, E> {
    async fn lock(self) -> OwnedMutexGuard<Slot<V, E>> {
        match self {
            Self::Fresh(guard) => guard,
            Self::Existing(entry) => entry.lock_owned().await,
        }
    }
}

impl<V, E> LazyShard<V, E> {
    /// Creates an empty shard.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ZeroCapacity`] or [`BuildError::CapacityTooLarge`] when the
    /// configured capacity is out of range, and [`BuildError::TtlOutOfRange`] when a TTL is too
    /// long to compute an expiry deadline.
    pub fn new(config: ShardConfig) -> Result<Self, BuildError> {
        if config.capacity == 0 {
            return Err(BuildError::ZeroCapacity);
        }
        if config.capacity > MAX_CAPACITY {
            return Err(BuildError::CapacityTooLarge);
        }
        config.check_ttl()?;

        Ok(Self {
            membership: Mutex::new(Membership {
                map: HashMap::new(),
                order: LruList::new(config.capacity),
            }),
            config,
        })
    }

    /// Returns the entry for `key`, inserting a locked empty one when absent.
    fn acquire(&self, key: &str) -> Acquired<V, E> {
        let mut evicted = Vec::new();

        let acquired = {
            let mut membership = self.membership.lock();
            let Membership { map, order } = &mut *membership;

            if let Some(resident) = map.get(key) {
                order.touch(resident.node);
                Acquired::Existing(Arc::clone(&resident.entry))
            } else {
                while order.is_full() {
                    let Some(victim) = order.pop_back() else { break };
                    map.remove(&victim);
                    evicted.push(victim);
                }

                // Not shared until it is inserted below, so the lock is always free here.
                let entry = Slot::entry();
                let acquired = Arc::clone(&entry)
                    .try_lock_owned()
                    .map_or_else(|_| Acquired::Existing(Arc::clone(&entry)), Acquired::Fresh);

                if let Some(node) = order.push_front(key.to_owned()) {
                    map.insert(key.to_owned(), Resident { entry, node });
                }
                acquired
            }
        };

        for key in &evicted {
            self.config.evicted(key);
        }
        acquired
    }

    /// Returns the entry for `key` when it is resident.
    fn lookup(&self, key: &str, touch: bool) -> Option<EntryRef<V, E>> {
        let mut membership = self.membership.lock();
        let Membership { map, order } = &mut *membership;
        let resident = map.get(key)?;
        if touch {
            order.touch(resident.node);
        }
        Some(Arc::clone(&resident.entry))
    }

    fn remove(&self, key: &str) -> bool {
        let mut membership = self.membership.lock();
        let Some(resident) = membership.map.remove(key) else {
            return false;
        };
        membership.order.remove(resident.node);
        true
    }

    fn fill(&self, slot: &mut Slot<V, E>, value: V) {
        slot.fill(Ok(value), Some(Instant::now() + self.config.ttl.success));
    }
}

impl<V, E> Store<V, E> for LazyShard<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn get<F, Fut>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send,
    {
        let mut slot = self.acquire(key).lock().await;
        read_through(&mut slot, key, &self.config.name, fetch, Some(self.config.ttl), &*self.config.target)
            .await
            .outcome
    }

    async fn set(&self, key: &str, value: V) {
        let mut slot = self.acquire(key).lock().await;
        self.fill(&mut slot, value);
    }

    async fn set_has(&self, key: &str, value: V) -> bool {
        let Some(entry) = self.lookup(key, true) else {
            return false;
        };
        let mut slot = entry.lock_owned().await;
        self.fill(&mut slot, value);
        true
    }

    async fn peek(&self, key: &str) -> Option<Result<V, E>> {
        let entry = self.lookup(key, false)?;
        let slot = entry.lock_owned().await;
        slot.fresh(Instant::now())
    }

    fn del(&self, key: &str) -> bool {
        let removed = self.remove(key);
        if removed {
            self.config.target.incr_del_hit();
        } else {
            self.config.target.incr_del_not_found();
        }
        removed
    }

    fn len(&self) -> usize {
        self.membership.lock().map.len()
    }

    async fn stop(&self) {}
}

impl<V, E> fmt::Debug for LazyShard<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyShard")
            .field("len", &self.membership.lock().map.len())
            .field("capacity", &self.config.capacity)
            .finish()
    }
}
