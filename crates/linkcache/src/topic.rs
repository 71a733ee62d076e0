// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Routing of invalidated keys to pub/sub topics.

use std::collections::HashMap;

/// Maps pub/sub topics to the key prefixes they carry invalidations for.
///
/// Used by delete hooks that broadcast invalidations: given the keys being deleted, the router
/// tells which topic each key must be published to.
///
/// # Example
///
/// ```
/// use linkcache::TopicRouter;
///
/// let mut router = TopicRouter::new();
/// router.subscribe("user", ["user:", "friend:"]);
/// router.subscribe("group", ["group:"]);
///
/// let routed = router.keys_by_topic(&["user", "group"], &["user:1", "group:7", "other:1"]);
/// assert_eq!(routed["user"], vec!["user:1".to_string()]);
/// assert_eq!(routed["group"], vec!["group:7".to_string()]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TopicRouter {
    prefixes: HashMap<String, Vec<String>>,
}

impl TopicRouter {
    /// Creates a router with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes keys starting with any of `prefixes` to `topic`.
    ///
    /// Subscribing the same topic again adds to its prefixes.
    pub fn subscribe<I, P>(&mut self, topic: impl Into<String>, prefixes: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.prefixes
            .entry(topic.into())
            .or_default()
            .extend(prefixes.into_iter().map(Into::into));
    }

    /// Returns the prefixes routed to `topic`.
    #[must_use]
    pub fn prefixes(&self, topic: &str) -> &[String] {
        self.prefixes.get(topic).map(Vec::as_slice).unwrap_or_default()
    }

    /// Groups `keys` by the topics in `topics` they must be published to.
    ///
    /// Every requested topic is present in the result, possibly with no keys. A key matching
    /// prefixes of several topics is routed to each of them, at most once per topic. Keys keep
    /// their input order.
    #[must_use]
    pub fn keys_by_topic<T, K>(&self, topics: &[T], keys: &[K]) -> HashMap<String, Vec<String>>
    where
        T: AsRef<str>,
        K: AsRef<str>,
    {
        topics
            .iter()
            .map(|topic| {
                let topic = topic.as_ref();
                let prefixes = self.prefixes(topic);
                let routed = keys
                    .iter()
                    .map(AsRef::<str>::as_ref)
                    .filter(|key| prefixes.iter().any(|prefix| key.starts_with(prefix.as_str())))
                    .map(str::to_owned)
                    .collect();
                (topic.to_owned(), routed)
            })
            .collect()
    }
}
