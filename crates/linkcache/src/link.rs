// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bidirectional dependency links between cache keys.

use std::fmt;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::error::BuildError;
use crate::hash::{KeyHash, Xxh3, index_for};

type Adjacency = HashMap<String, HashSet<String>>;

/// An undirected graph of cache keys, partitioned by key hash.
///
/// Links are always recorded in both directions: linking `a` to `b` also links `b` to `a`. The
/// graph itself never recurses; callers walk it one hop at a time with [`LinkGraph::unlink`].
///
/// # Example
///
/// ```
/// use linkcache::LinkGraph;
///
/// let graph = LinkGraph::new(4)?;
/// graph.link("summary:1", &["user:1", "user:2"]);
///
/// let mut neighbours = graph.unlink("user:1");
/// assert_eq!(neighbours, vec!["summary:1".to_string()]);
///
/// neighbours = graph.unlink("summary:1");
/// neighbours.sort();
/// assert_eq!(neighbours, vec!["user:1".to_string(), "user:2".to_string()]);
/// # Ok::<(), linkcache::BuildError>(())
/// ```
pub struct LinkGraph<H = Xxh3> {
    partitions: Box<[Mutex<Adjacency>]>,
    hasher: H,
}

impl LinkGraph {
    /// Creates a graph split into `partitions` independently locked parts.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ZeroShards`] when `partitions` is zero.
    pub fn new(partitions: usize) -> Result<Self, BuildError> {
        Self::with_hasher(partitions, Xxh3)
    }
}

impl<H: KeyHash> LinkGraph<H> {
    /// Creates a graph split into `partitions` parts, routing keys with `hasher`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ZeroShards`] when `partitions` is zero.
    pub fn with_hasher(partitions: usize, hasher: H) -> Result<Self, BuildError> {
        if partitions == 0 {
            return Err(BuildError::ZeroShards);
        }

        Ok(Self {
            partitions: (0..partitions).map(|_| Mutex::new(Adjacency::new())).collect(),
            hasher,
        })
    }

    fn partition(&self, key: &str) -> &Mutex<Adjacency> {
        &self.partitions[index_for(self.hasher.hash_key(key), self.partitions.len())]
    }

    /// Links `key` with every key in `related`, in both directions.
    ///
    /// Linking is idempotent. A key is never linked to itself.
    pub fn link<R: AsRef<str>>(&self, key: &str, related: &[R]) {
        for other in related {
            let other = other.as_ref();
            if other == key {
                continue;
            }

            // One partition lock at a time; the two halves of an edge may share a partition.
            self.partition(key)
                .lock()
                .entry_ref(key)
                .or_default()
                .insert(other.to_owned());
            self.partition(other)
                .lock()
                .entry_ref(other)
                .or_default()
                .insert(key.to_owned());
        }
    }

    /// Removes the adjacency record of `key` and returns its direct neighbours.
    ///
    /// The reverse edges stay in the neighbours' records until they are unlinked in turn.
    pub fn unlink(&self, key: &str) -> Vec<String> {
        self.partition(key)
            .lock()
            .remove(key)
            .map(|related| related.into_iter().collect())
            .unwrap_or_default()
    }

    /// Returns the direct neighbours of `key` without modifying the graph.
    #[must_use]
    pub fn neighbours(&self, key: &str) -> Vec<String> {
        self.partition(key)
            .lock()
            .get(key)
            .map(|related| related.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of keys that have an adjacency record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|partition| partition.lock().len()).sum()
    }

    /// Returns `true` when no key has an adjacency record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(|partition| partition.lock().is_empty())
    }
}

impl<H> fmt::Debug for LinkGraph<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkGraph")
            .field("partitions", &self.partitions.len())
            .finish_non_exhaustive()
    }
}
