// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Service-level local cache settings.

use std::time::Duration;

/// The local cache section of a service configuration.
///
/// Each cached entity type usually has its own section. A section is only active when it names an
/// invalidation topic and both sizes are positive; see [`LocalCacheConfig::enabled`]. With the
/// `serde` feature the section can be deserialized from camelCase keys:
///
/// ```text
/// topic: user
/// slotNum: 500
/// slotSize: 20000
/// successExpire: 300
/// failedExpire: 5
/// ```
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use linkcache::LocalCacheConfig;
///
/// let config = LocalCacheConfig {
///     topic: "user".to_string(),
///     slot_num: 100,
///     slot_size: 1000,
///     success_expire: 300,
///     failed_expire: 5,
/// };
/// assert!(config.enabled());
/// assert_eq!(config.success_ttl(), Duration::from_secs(300));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct LocalCacheConfig {
    /// The pub/sub topic invalidations for this entity are published to.
    pub topic: String,
    /// Number of data shards.
    pub slot_num: usize,
    /// Capacity of each shard.
    pub slot_size: usize,
    /// Lifetime of successful lookups, in seconds.
    pub success_expire: u64,
    /// Lifetime of failed lookups, in seconds.
    pub failed_expire: u64,
}

impl LocalCacheConfig {
    /// Returns `true` when the section describes a usable cache.
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.topic.is_empty() && self.slot_num > 0 && self.slot_size > 0
    }

    /// Returns the lifetime of successful lookups.
    #[must_use]
    pub fn success_ttl(&self) -> Duration {
        Duration::from_secs(self.success_expire)
    }

    /// Returns the lifetime of failed lookups.
    #[must_use]
    pub fn failed_ttl(&self) -> Duration {
        Duration::from_secs(self.failed_expire)
    }
}
