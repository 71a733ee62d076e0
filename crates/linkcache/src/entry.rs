// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-key entries and the read-through routine shared by both shard strategies.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::target::Target;

/// An entry as stored in a shard. The mutex is the per-key lock: at most one fetch runs per entry.
pub(crate) type EntryRef<V, E> = Arc<Mutex<Slot<V, E>>>;

/// The cached outcome of the last fetch for a key.
#[derive(Debug)]
pub(crate) struct Slot<V, E> {
    outcome: Option<Result<V, E>>,
    // `None` means the owning map manages expiry.
    expires_at: Option<Instant>,
}

impl<V, E> Slot<V, E> {
    pub(crate) const fn empty() -> Self {
        Self {
            outcome: None,
            expires_at: None,
        }
    }

    pub(crate) fn entry() -> EntryRef<V, E> {
        Arc::new(Mutex::new(Self::empty()))
    }

    pub(crate) fn fill(&mut self, outcome: Result<V, E>, expires_at: Option<Instant>) {
        self.outcome = Some(outcome);
        self.expires_at = expires_at;
    }
}

impl<V: Clone, E: Clone> Slot<V, E> {
    /// Returns a copy of the cached outcome if it has not expired at `now`.
    pub(crate) fn fresh(&self, now: Instant) -> Option<Result<V, E>> {
        match self.expires_at {
            Some(deadline) if now >= deadline => None,
            _ => self.outcome.clone(),
        }
    }
}

/// How long fetched outcomes stay fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ttl {
    pub(crate) success: Duration,
    pub(crate) failed: Duration,
}

/// What a read-through produced.
pub(crate) struct ReadThrough<V, E> {
    pub(crate) outcome: Result<V, E>,
    pub(crate) fetched: bool,
}

/// Serves the fresh outcome held by `slot`, or runs `fetch` and caches what it returns.
///
/// The caller must hold the entry lock. When `ttl` is `None` the slot never expires on its own,
/// which is how the active strategy stores outcomes.
pub(crate) async fn read_through<V, E, F, Fut>(
    slot: &mut Slot<V, E>,
    key: &str,
    name: &str,
    fetch: F,
    ttl: Option<Ttl>,
    target: &dyn Target,
) -> ReadThrough<V, E>
where
    V: Clone,
    E: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    if let Some(outcome) = slot.fresh(Instant::now()) {
        target.incr_get_hit();
        return ReadThrough { outcome, fetched: false };
    }

    tracing::debug!(cache.name = name, cache.key = key, "cache.fetch");
    let outcome = fetch().await;

    let now = Instant::now();
    let expires_at = match &outcome {
        Ok(_) => {
            target.incr_get_success();
            ttl.map(|ttl| now + ttl.success)
        }
        Err(_) => {
            target.incr_get_failed();
            tracing::debug!(cache.name = name, cache.key = key, "cache.fetch_failed");
            ttl.map(|ttl| now + ttl.failed)
        }
    };

    slot.fill(outcome.clone(), expires_at);
    ReadThrough { outcome, fetched: true }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::CountingTarget;

    const TTL: Ttl = Ttl {
        success: Duration::from_millis(50),
        failed: Duration::from_millis(10),
    };

    #[tokio::test(start_paused = true)]
    async fn empty_slot_fetches_and_caches() {
        let target = CountingTarget::new();
        let mut slot = Slot::<u32, String>::empty();

        let first = read_through(&mut slot, "k", "test", || async { Ok(7) }, Some(TTL), &target).await;
        assert_eq!(first.outcome, Ok(7));
        assert!(first.fetched);

        let second = read_through(&mut slot, "k", "test", || async { Ok(8) }, Some(TTL), &target).await;
        assert_eq!(second.outcome, Ok(7));
        assert!(!second.fetched);

        let snapshot = target.snapshot();
        assert_eq!(snapshot.get_success, 1);
        assert_eq!(snapshot.get_hit, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn outcome_expires_at_deadline() {
        let mut slot = Slot::<u32, String>::empty();
        slot.fill(Ok(1), Some(Instant::now() + Duration::from_millis(5)));

        assert_eq!(slot.fresh(Instant::now()), Some(Ok(1)));
        tokio::time::advance(Duration::from_millis(5)).await;
        assert_eq!(slot.fresh(Instant::now()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_use_the_failed_ttl() {
        let target = CountingTarget::new();
        let mut slot = Slot::<u32, String>::empty();

        let failed = read_through(&mut slot, "k", "test", || async { Err("down".to_string()) }, Some(TTL), &target).await;
        assert_eq!(failed.outcome, Err("down".to_string()));

        tokio::time::advance(Duration::from_millis(9)).await;
        assert_eq!(slot.fresh(Instant::now()), Some(Err("down".to_string())));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(slot.fresh(Instant::now()), None);
        assert_eq!(target.snapshot().get_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unmanaged_slots_never_expire() {
        let target = CountingTarget::new();
        let mut slot = Slot::<u32, String>::empty();
        let _ = read_through(&mut slot, "k", "test", || async { Ok(3) }, None, &target).await;

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(slot.fresh(Instant::now()), Some(Ok(3)));
    }
}
