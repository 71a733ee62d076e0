// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Single-shard store with background expiry, backed by moka.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use moka::Expiry;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{OwnedMutexGuard, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::entry::{EntryRef, Slot, Ttl, read_through};
use crate::error::BuildError;
use crate::store::{ShardConfig, Store};

const PENDING: u8 = 0;
const SUCCEEDED: u8 = 1;
const FAILED: u8 = 2;

/// An entry as stored in the moka map.
struct ActiveEntry<V, E> {
    slot: EntryRef<V, E>,
    // Drives the expiry policy; one of PENDING, SUCCEEDED or FAILED.
    state: Arc<AtomicU8>,
}

impl<V, E> ActiveEntry<V, E> {
    fn new() -> Self {
        Self {
            slot: Slot::entry(),
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    fn mark(&self, succeeded: bool) {
        self.state.store(if succeeded { SUCCEEDED } else { FAILED }, Ordering::Release);
    }
}

impl<V, E> Clone for ActiveEntry<V, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            state: Arc::clone(&self.state),
        }
    }
}

/// Gives successful and failed outcomes their own lifetimes. Pending entries never expire.
struct OutcomeExpiry(Ttl);

impl OutcomeExpiry {
    fn ttl_for<V, E>(&self, entry: &ActiveEntry<V, E>) -> Option<Duration> {
        match entry.state.load(Ordering::Acquire) {
            SUCCEEDED => Some(self.0.success),
            FAILED => Some(self.0.failed),
            _ => None,
        }
    }
}

impl<V, E> Expiry<String, ActiveEntry<V, E>> for OutcomeExpiry {
    fn expire_after_create(&self, _key: &String, value: &ActiveEntry<V, E>, _created_at: std::time::Instant) -> Option<Duration> {
        self.ttl_for(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &ActiveEntry<V, E>,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.ttl_for(value)
    }
}

struct Shared<V, E> {
    cache: Cache<String, ActiveEntry<V, E>>,
    // Keys removed by size or expiry, waiting to be reported outside of every lock.
    evicted: Arc<Mutex<Vec<String>>>,
    // Serializes get-or-insert against conditional re-insertion.
    membership: Mutex<()>,
    config: ShardConfig,
}

impl<V, E> Shared<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn drain(&self) {
        let keys = std::mem::take(&mut *self.evicted.lock());
        for key in &keys {
            self.config.evicted(key);
        }
    }

    fn sweep(&self) {
        self.cache.run_pending_tasks();
        self.drain();
    }
}

struct Sweeper {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// A single shard whose entries expire in the background.
///
/// Entries are held in a bounded moka map with least-recently-used eviction and a per-entry
/// expiry: the success TTL for successful outcomes and the failure TTL for failures. A sweeper
/// task, spawned on the current Tokio runtime, reclaims expired entries every sweep interval and
/// reports them to the eviction callback, so linked keys are invalidated without waiting for a
/// read.
///
/// Call [`Store::stop`] to stop the sweeper gracefully. Dropping the shard aborts it.
pub struct ActiveShard<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<V, E>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<V, E> ActiveShard<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates an empty shard and starts its sweeper on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ZeroCapacity`], [`BuildError::ZeroSweepInterval`] or
    /// [`BuildError::TtlOutOfRange`] for invalid settings, and [`BuildError::MissingRuntime`] when
    /// called outside of a Tokio runtime.
    pub fn new(config: ShardConfig) -> Result<Self, BuildError> {
        if config.capacity == 0 {
            return Err(BuildError::ZeroCapacity);
        }
        config.check_ttl()?;
        if config.sweep_interval.is_zero() {
            return Err(BuildError::ZeroSweepInterval);
        }
        let Ok(runtime) = Handle::try_current() else {
            return Err(BuildError::MissingRuntime);
        };

        let evicted = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::clone(&evicted);
        let cache = Cache::builder()
            .name(&config.name)
            .max_capacity(u64::try_from(config.capacity).unwrap_or(u64::MAX))
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(OutcomeExpiry(config.ttl))
            .eviction_listener(move |key: Arc<String>, _, cause: RemovalCause| {
                if cause.was_evicted() {
                    queue.lock().push(String::clone(&key));
                }
            })
            .build();

        let interval = config.sweep_interval;
        let shared = Arc::new(Shared {
            cache,
            evicted,
            membership: Mutex::new(()),
            config,
        });

        let (stop, mut stopped) = oneshot::channel();
        let worker = Arc::clone(&shared);
        let task = runtime.spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticks.tick() => worker.sweep(),
                }
            }
        });

        Ok(Self {
            shared,
            sweeper: Mutex::new(Some(Sweeper { stop, task })),
        })
    }

    /// Returns the live entry for `key`, inserting a locked empty one when absent.
    fn acquire(&self, key: &str) -> (ActiveEntry<V, E>, Option<OwnedMutexGuard<Slot<V, E>>>) {
        let acquired = {
            let _membership = self.shared.membership.lock();
            if let Some(entry) = self.shared.cache.get(key) {
                (entry, None)
            } else {
                // Not shared until it is inserted below, so the lock is always free here.
                let entry = ActiveEntry::new();
                let guard = Arc::clone(&entry.slot).try_lock_owned().ok();
                self.shared.cache.insert(key.to_owned(), entry.clone());
                (entry, guard)
            }
        };
        self.shared.drain();
        acquired
    }

    /// Re-inserts `entry` so that its expiry reflects the outcome it now holds.
    ///
    /// Skipped when the key was deleted or replaced in the meantime. Returns whether `entry` is
    /// still the resident entry for `key`.
    fn rearm(&self, key: &str, entry: &ActiveEntry<V, E>) -> bool {
        let resident = {
            let _membership = self.shared.membership.lock();
            let resident = self
                .shared
                .cache
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(&current.slot, &entry.slot));
            if resident {
                self.shared.cache.insert(key.to_owned(), entry.clone());
            }
            resident
        };
        self.shared.drain();
        resident
    }

    /// Stores `value` in `entry`. Returns `false` when the key left the shard before the value
    /// could be stored.
    async fn store(&self, key: &str, entry: ActiveEntry<V, E>, guard: Option<OwnedMutexGuard<Slot<V, E>>>, value: V) -> bool {
        let mut slot = match guard {
            Some(guard) => guard,
            None => Arc::clone(&entry.slot).lock_owned().await,
        };
        slot.fill(Ok(value), None);
        entry.mark(true);
        drop(slot);
        self.rearm(key, &entry)
    }
}

impl<V, E> Store<V, E> for ActiveShard<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn get<F, Fut>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send,
    {
        let (entry, guard) = self.acquire(key);
        let mut slot = match guard {
            Some(guard) => guard,
            None => Arc::clone(&entry.slot).lock_owned().await,
        };

        let read = read_through(&mut slot, key, &self.shared.config.name, fetch, None, &*self.shared.config.target).await;
        if read.fetched {
            entry.mark(read.outcome.is_ok());
            drop(slot);
            self.rearm(key, &entry);
        }
        read.outcome
    }

    async fn set(&self, key: &str, value: V) {
        let (entry, guard) = self.acquire(key);
        let _ = self.store(key, entry, guard, value).await;
    }

    async fn set_has(&self, key: &str, value: V) -> bool {
        let entry = {
            let _membership = self.shared.membership.lock();
            self.shared.cache.get(key)
        };
        let Some(entry) = entry else {
            return false;
        };
        self.store(key, entry, None, value).await
    }

    async fn peek(&self, key: &str) -> Option<Result<V, E>> {
        let entry = self.shared.cache.get(key)?;
        let slot = entry.slot.lock_owned().await;
        slot.fresh(Instant::now())
    }

    fn del(&self, key: &str) -> bool {
        let removed = {
            let _membership = self.shared.membership.lock();
            self.shared.cache.remove(key).is_some()
        };
        if removed {
            self.shared.config.target.incr_del_hit();
        } else {
            self.shared.config.target.incr_del_not_found();
        }
        self.shared.drain();
        removed
    }

    fn len(&self) -> usize {
        usize::try_from(self.shared.cache.entry_count()).unwrap_or(usize::MAX)
    }

    async fn stop(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(Sweeper { stop, task }) = sweeper {
            let _ = stop.send(());
            let _ = task.await;
        }
    }
}

impl<V, E> Drop for ActiveShard<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.task.abort();
        }
    }
}

impl<V, E> fmt::Debug for ActiveShard<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveShard")
            .field("len", &self.shared.cache.entry_count())
            .field("capacity", &self.shared.config.capacity)
            .field("sweeping", &self.sweeper.lock().is_some())
            .finish()
    }
}
