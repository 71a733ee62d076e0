// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Recency list used by the lazy shard.
//!
//! Nodes live in an index arena with a free list, so moving a key to the front or removing it is
//! O(1) and needs no allocation once the arena has grown to the shard's capacity. The arena grows
//! on demand instead of being preallocated, because most shards never fill up.

#![expect(
    clippy::cast_possible_truncation,
    reason = "NodeIndex is u32 and capacities are bounded well below u32::MAX"
)]

/// Index of a node in the arena.
pub(crate) type NodeIndex = u32;

const NULL_INDEX: NodeIndex = NodeIndex::MAX;

/// Largest capacity whose node indices stay clear of the null sentinel.
pub(crate) const MAX_CAPACITY: usize = NULL_INDEX as usize - 1;

#[derive(Debug)]
struct Node<K> {
    key: Option<K>,
    prev: NodeIndex,
    next: NodeIndex,
}

impl<K> Node<K> {
    const fn vacant(next: NodeIndex) -> Self {
        Self {
            key: None,
            prev: NULL_INDEX,
            next,
        }
    }
}

/// A bounded doubly-linked list ordered from most to least recently used.
#[derive(Debug)]
pub(crate) struct LruList<K> {
    nodes: Vec<Node<K>>,
    head: NodeIndex,
    tail: NodeIndex,
    free_head: NodeIndex,
    len: usize,
    capacity: usize,
}

impl<K> LruList<K> {
    /// Creates an empty list that holds at most `capacity` keys.
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity <= MAX_CAPACITY, "capacity must fit in a node index");
        Self {
            nodes: Vec::new(),
            head: NULL_INDEX,
            tail: NULL_INDEX,
            free_head: NULL_INDEX,
            len: 0,
            capacity,
        }
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) const fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    fn alloc(&mut self, key: K) -> Option<NodeIndex> {
        if self.free_head != NULL_INDEX {
            let idx = self.free_head;
            let node = &mut self.nodes[idx as usize];
            self.free_head = node.next;
            node.key = Some(key);
            node.prev = NULL_INDEX;
            node.next = NULL_INDEX;
            return Some(idx);
        }

        if self.nodes.len() >= self.capacity {
            return None;
        }

        let idx = self.nodes.len() as NodeIndex;
        self.nodes.push(Node {
            key: Some(key),
            prev: NULL_INDEX,
            next: NULL_INDEX,
        });
        Some(idx)
    }

    fn link_front(&mut self, idx: NodeIndex) {
        self.nodes[idx as usize].prev = NULL_INDEX;
        self.nodes[idx as usize].next = self.head;
        if self.head != NULL_INDEX {
            self.nodes[self.head as usize].prev = idx;
        }
        self.head = idx;
        if self.tail == NULL_INDEX {
            self.tail = idx;
        }
    }

    fn unlink(&mut self, idx: NodeIndex) {
        let prev = self.nodes[idx as usize].prev;
        let next = self.nodes[idx as usize].next;

        if prev == NULL_INDEX {
            self.head = next;
        } else {
            self.nodes[prev as usize].next = next;
        }

        if next == NULL_INDEX {
            self.tail = prev;
        } else {
            self.nodes[next as usize].prev = prev;
        }
    }

    /// Inserts `key` as the most recently used entry.
    ///
    /// Returns `None` when the list is full; the caller evicts first.
    pub(crate) fn push_front(&mut self, key: K) -> Option<NodeIndex> {
        if self.is_full() {
            return None;
        }
        let idx = self.alloc(key)?;
        self.link_front(idx);
        self.len += 1;
        Some(idx)
    }

    /// Marks the node as the most recently used entry.
    pub(crate) fn touch(&mut self, idx: NodeIndex) {
        if idx == self.head || self.nodes.get(idx as usize).is_none_or(|node| node.key.is_none()) {
            return;
        }
        self.unlink(idx);
        self.link_front(idx);
    }

    /// Removes the node and returns its key.
    pub(crate) fn remove(&mut self, idx: NodeIndex) -> Option<K> {
        let key = self.nodes.get_mut(idx as usize)?.key.take()?;
        self.unlink(idx);
        self.nodes[idx as usize] = Node::vacant(self.free_head);
        self.free_head = idx;
        self.len -= 1;
        Some(key)
    }

    /// Removes and returns the least recently used key.
    pub(crate) fn pop_back(&mut self) -> Option<K> {
        if self.tail == NULL_INDEX {
            return None;
        }
        self.remove(self.tail)
    }
}
