// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Construction errors.

/// An error raised while constructing a cache or one of its stores.
///
/// Invalid configuration is rejected when the cache is built, never on first use.
///
/// # Example
///
/// ```
/// use linkcache::{BuildError, Cache};
///
/// let error = Cache::<String, String>::builder().shards(0).build().unwrap_err();
/// assert_eq!(error, BuildError::ZeroShards);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    /// A sharded store was requested with no shards.
    #[error("shard count must be greater than zero")]
    ZeroShards,

    /// A shard was requested with no room for entries.
    #[error("shard capacity must be greater than zero")]
    ZeroCapacity,

    /// The active strategy was requested with a zero sweep interval.
    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,

    /// A shard was requested with more entries than it can index.
    #[error("shard capacity must be smaller than {}", u32::MAX)]
    CapacityTooLarge,

    /// A success or failure TTL is too long to compute an expiry deadline.
    #[error("TTL is too long to compute an expiry deadline")]
    TtlOutOfRange,

    /// The active strategy was requested outside of a Tokio runtime.
    #[error("the active strategy must be built from within a Tokio runtime")]
    MissingRuntime,
}
