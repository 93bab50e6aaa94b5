//! Trie nodes and the arena that owns them.
//!
//! Every node is owned by the arena; parent and child links are plain
//! indices, so the parent/child cycle never turns into an ownership cycle.

use crate::key::{self, KEY_BITS};

/// Index of a node in the [`NodeArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

impl NodeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A path-compressed trie node.
///
/// The node's segment is the bit range `start..end` of `key`. `key` holds the
/// whole root-to-node path, so `end` is also the node's depth and, when the
/// node is registered, its prefix length.
#[derive(Clone, Debug)]
pub(crate) struct Node<V> {
    /// Path bits from the root through this node; bits past `end` are zero.
    pub(crate) key: u128,
    /// Depth of the parent (`0` for the root).
    pub(crate) start: u8,
    /// Depth of this node.
    pub(crate) end: u8,
    /// Payload of a registered prefix; `None` for branch-only nodes.
    pub(crate) value: Option<V>,
    pub(crate) parent: Option<NodeId>,
    /// Children keyed by the first bit after `end`.
    pub(crate) children: [Option<NodeId>; 2],
}

impl<V> Node<V> {
    pub(crate) fn new(key: u128, start: u8, end: u8, value: Option<V>, parent: Option<NodeId>) -> Self {
        debug_assert!(start <= end && end <= KEY_BITS);
        Self {
            key: key::mask(key, end),
            start,
            end,
            value,
            parent,
            children: [None, None],
        }
    }

    #[inline]
    pub(crate) fn is_registered(&self) -> bool {
        self.value.is_some()
    }

    /// Number of bits compressed into this node.
    #[inline]
    pub(crate) fn segment_len(&self) -> u8 {
        self.end - self.start
    }

    /// Segment bits, most significant first.
    #[cfg(test)]
    pub(crate) fn segment(&self) -> impl Iterator<Item = usize> + '_ {
        (self.start..self.end).map(move |i| key::bit_at(self.key, i))
    }

    #[inline]
    pub(crate) fn child(&self, bit: usize) -> Option<NodeId> {
        self.children[bit]
    }

    pub(crate) fn child_count(&self) -> usize {
        self.children.iter().flatten().count()
    }

    /// The single child, if the node has exactly one.
    pub(crate) fn only_child(&self) -> Option<NodeId> {
        match self.children {
            [Some(c), None] | [None, Some(c)] => Some(c),
            _ => None,
        }
    }
}

/// Slot table for nodes, with a free list for slots released by removal.
#[derive(Clone, Debug)]
pub(crate) struct NodeArena<V> {
    slots: Vec<Option<Node<V>>>,
    free: Vec<NodeId>,
}

impl<V> NodeArena<V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn alloc(&mut self, node: Node<V>) -> NodeId {
        if let Some(id) = self.free.pop() {
            debug_assert!(self.slots[id.index()].is_none());
            self.slots[id.index()] = Some(node);
            return id;
        }
        let id = NodeId(u32::try_from(self.slots.len()).expect("node arena exceeds u32 indices"));
        self.slots.push(Some(node));
        id
    }

    /// Release a slot and hand back its node.
    pub(crate) fn free(&mut self, id: NodeId) -> Node<V> {
        let node = self.slots[id.index()].take().expect("freeing a vacant node slot");
        self.free.push(id);
        node
    }

    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> &Node<V> {
        self.slots[id.index()].as_ref().expect("dangling node id")
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut Node<V> {
        self.slots[id.index()].as_mut().expect("dangling node id")
    }

    /// Live nodes.
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn memory_usage(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<Option<Node<V>>>()
            + self.free.capacity() * std::mem::size_of::<NodeId>()
    }

    pub(crate) fn shrink_to_fit(&mut self) {
        self.slots.shrink_to_fit();
        self.free.shrink_to_fit();
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}
