// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Statistics sinks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives cache statistics.
///
/// Every method has an empty default body, so an implementation only overrides the counters it
/// cares about. Methods are called on the hot path and must not block.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// use linkcache::Target;
///
/// #[derive(Debug, Default)]
/// struct Misses(AtomicU64);
///
/// impl Target for Misses {
///     fn incr_get_success(&self) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait Target: Send + Sync {
    /// A lookup was served from a fresh cached outcome.
    fn incr_get_hit(&self) {}

    /// A lookup ran the fetch function and it succeeded.
    fn incr_get_success(&self) {}

    /// A lookup ran the fetch function and it failed.
    fn incr_get_failed(&self) {}

    /// A delete removed an entry.
    fn incr_del_hit(&self) {}

    /// A delete found nothing to remove.
    fn incr_del_not_found(&self) {}
}

/// A target that discards everything. This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTarget;

impl Target for NoopTarget {}

/// A point-in-time copy of the counters of a [`CountingTarget`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct TargetSnapshot {
    /// Lookups served from the cache.
    pub get_hit: u64,
    /// Fetches that succeeded.
    pub get_success: u64,
    /// Fetches that failed.
    pub get_failed: u64,
    /// Deletes that removed an entry.
    pub del_hit: u64,
    /// Deletes of absent keys.
    pub del_not_found: u64,
}

/// A target that keeps the counters in memory.
///
/// # Example
///
/// ```
/// use linkcache::{CountingTarget, Target};
///
/// let target = CountingTarget::new();
/// target.incr_get_hit();
/// assert_eq!(target.snapshot().get_hit, 1);
/// ```
#[derive(Debug, Default)]
pub struct CountingTarget {
    get_hit: AtomicU64,
    get_success: AtomicU64,
    get_failed: AtomicU64,
    del_hit: AtomicU64,
    del_not_found: AtomicU64,
}

impl CountingTarget {
    /// Creates a target with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the current value of every counter.
    #[must_use]
    pub fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot {
            get_hit: self.get_hit.load(Ordering::Relaxed),
            get_success: self.get_success.load(Ordering::Relaxed),
            get_failed: self.get_failed.load(Ordering::Relaxed),
            del_hit: self.del_hit.load(Ordering::Relaxed),
            del_not_found: self.del_not_found.load(Ordering::Relaxed),
        }
    }
}

impl Target for CountingTarget {
    fn incr_get_hit(&self) {
        self.get_hit.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_get_success(&self) {
        self.get_success.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_get_failed(&self) {
        self.get_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_del_hit(&self) {
        self.del_hit.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_del_not_found(&self) {
        self.del_not_found.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(feature = "metrics")]
pub use meter::MeterTarget;

#[cfg(feature = "metrics")]
mod meter {
    use opentelemetry::KeyValue;
    use opentelemetry::metrics::{Counter, Meter};

    use super::Target;

    const CACHE_EVENT_COUNT_NAME: &str = "cache.event.count";
    const CACHE_NAME: &str = "cache.name";
    const CACHE_ACTIVITY_NAME: &str = "cache.activity";

    /// A target that records every statistic as an OpenTelemetry counter.
    ///
    /// All events go to the `cache.event.count` counter, tagged with the cache name and one of
    /// the `get.hit`, `get.success`, `get.failed`, `del.hit` or `del.not_found` activities.
    #[derive(Debug, Clone)]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    pub struct MeterTarget {
        counter: Counter<u64>,
        name: String,
    }

    impl MeterTarget {
        /// Creates a target that records into `meter` under the cache name `name`.
        #[must_use]
        pub fn new(meter: &Meter, name: impl Into<String>) -> Self {
            Self {
                counter: meter
                    .u64_counter(CACHE_EVENT_COUNT_NAME)
                    .with_description("Cache events")
                    .with_unit("{event}")
                    .build(),
                name: name.into(),
            }
        }

        fn record(&self, activity: &'static str) {
            self.counter.add(
                1,
                &[
                    KeyValue::new(CACHE_NAME, self.name.clone()),
                    KeyValue::new(CACHE_ACTIVITY_NAME, activity),
                ],
            );
        }
    }

    impl Target for MeterTarget {
        fn incr_get_hit(&self) {
            self.record("get.hit");
        }

        fn incr_get_success(&self) {
            self.record("get.success");
        }

        fn incr_get_failed(&self) {
            self.record("get.failed");
        }

        fn incr_del_hit(&self) {
            self.record("del.hit");
        }

        fn incr_del_not_found(&self) {
            self.record("del.not_found");
        }
    }

}
