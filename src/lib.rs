//! # netdb
//!
//! An IP network database answering longest-prefix-match queries, built on a
//! path-compressed binary (PATRICIA) trie.
//!
//! IPv4 and IPv6 networks share one 128-bit key space: IPv4 networks are
//! stored as IPv4-mapped IPv6 networks and rendered back as IPv4.
//!
//! ## Example
//!
//! ```rust
//! use netdb::NetDb;
//!
//! let mut db: NetDb<&str> = NetDb::new();
//! db.insert("10.0.0.0/8", "corp").unwrap();
//! db.insert("10.1.0.0/16", "lab").unwrap();
//! db.insert("2001:db8::/32", "docs").unwrap();
//!
//! let m = db.lookup("10.1.2.3").unwrap();
//! assert_eq!(m.network.to_string(), "10.1.0.0/16");
//! assert_eq!(m.payload, "lab");
//!
//! assert_eq!(db.lookup("10.9.9.9").unwrap().payload, "corp");
//! assert_eq!(db.lookup("2001:db8::1").unwrap().prefix_len(), 32);
//! assert!(db.lookup("192.0.2.1").is_err());
//! ```
//!
//! ## Concurrency
//!
//! [`NetDb`] has no internal locking: mutate it from one writer, or read it
//! from many readers, never both at once. [`SharedNetDb`] enforces that with
//! a reader/writer lock.

#![forbid(unsafe_code)]

mod error;
mod graph;
pub mod key;
mod node;
mod shared;

use std::net::IpAddr;

pub use ipnet::IpNet;
use tracing::{debug, trace};

pub use error::{Error, Result};
pub use graph::{DotOptions, Vertex};
pub use key::Prefix;
use key::KEY_BITS;
use node::{Node, NodeArena, NodeId};
pub use shared::SharedNetDb;

/// Result of a longest-prefix-match lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Match<V> {
    /// The most specific registered network containing the address.
    pub network: IpNet,
    pub payload: V,
}

impl<V> Match<V> {
    /// Prefix length in the network's own family (`/24` for IPv4, not `/120`).
    #[inline]
    pub fn prefix_len(&self) -> u8 {
        self.network.prefix_len()
    }
}

// =============================================================================
// NetDb
// =============================================================================

/// A longest-prefix-match database of IP networks.
///
/// Nodes live in an index-addressed arena. A node is either registered (it
/// carries a payload and represents an inserted network) or branch-only (it
/// exists to fan out two diverging key paths).
#[derive(Clone)]
pub struct NetDb<V> {
    nodes: NodeArena<V>,
    root: Option<NodeId>,
    /// Registered nodes.
    count: usize,
}

impl<V> NetDb<V> {
    pub fn new() -> Self {
        Self {
            nodes: NodeArena::new(),
            root: None,
            count: 0,
        }
    }

    /// Number of registered networks.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Count registered networks by walking the trie.
    pub fn networks(&self) -> usize {
        self.walk()
            .filter(|&id| self.nodes.get(id).is_registered())
            .count()
    }

    /// Count all nodes, branch-only nodes included, by walking the trie.
    pub fn nodes(&self) -> usize {
        let n = self.walk().count();
        debug_assert_eq!(n, self.nodes.len(), "unreachable nodes left in the arena");
        n
    }

    /// Bytes held by the node arena, including spare capacity.
    pub fn memory_usage(&self) -> usize {
        self.nodes.memory_usage()
    }

    /// Release spare arena capacity left behind by removals.
    pub fn shrink_to_fit(&mut self) {
        self.nodes.shrink_to_fit();
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.count = 0;
    }

    fn parse(cidr: &str, op: &'static str) -> Result<Prefix> {
        Prefix::parse(cidr).map_err(|err| {
            debug!(op, cidr, %err, "rejected prefix");
            err
        })
    }

    /// Preorder walk over node ids, zero child before one child.
    fn walk(&self) -> Walk<'_, V> {
        Walk {
            db: self,
            stack: self.root.into_iter().collect(),
        }
    }

    /// First registered node on the way from `start` up to the root.
    fn nearest_registered(&self, mut cur: Option<NodeId>) -> Option<NodeId> {
        while let Some(id) = cur {
            let node = self.nodes.get(id);
            if node.is_registered() {
                return Some(id);
            }
            cur = node.parent;
        }
        None
    }

    fn entry(&self, id: NodeId) -> Option<(IpNet, &V)> {
        let node = self.nodes.get(id);
        let value = node.value.as_ref()?;
        Some((key::render(node.key, node.end), value))
    }
}

// =============================================================================
// Insertion
// =============================================================================

impl<V> NetDb<V> {
    /// Register a network given as `address[/len]`.
    ///
    /// Re-inserting a network replaces its payload and returns the old one.
    /// Fails with [`Error::InvalidPrefix`] on malformed text or a `/0`
    /// length, leaving the database untouched.
    pub fn insert(&mut self, cidr: &str, value: V) -> Result<Option<V>> {
        let prefix = Self::parse(cidr, "insert")?;
        Ok(self.insert_prefix(prefix, value))
    }

    /// Typed form of [`insert`](Self::insert); returns the replaced payload.
    pub fn insert_net(&mut self, net: IpNet, value: V) -> Result<Option<V>> {
        let prefix = Prefix::from_net(net)?;
        Ok(self.insert_prefix(prefix, value))
    }

    /// Register an already validated prefix; returns the replaced payload.
    pub fn insert_prefix(&mut self, prefix: Prefix, value: V) -> Option<V> {
        let (bits, len) = (prefix.bits(), prefix.prefix_len());

        let Some(mut cur) = self.root else {
            self.root = Some(self.nodes.alloc(Node::new(bits, 0, len, Some(value), None)));
            self.count += 1;
            debug!(%prefix, "registered first prefix");
            return None;
        };

        loop {
            let node = self.nodes.get(cur);
            debug_assert!(node.start < len || node.parent.is_none());

            let limit = node.end.min(len);
            let matched = key::first_difference(bits, node.key, node.start, limit);

            if matched < limit {
                // Paths diverge inside this segment.
                self.split(cur, matched);
                self.attach(cur, bits, len, value);
                self.count += 1;
                debug!(%prefix, branch_depth = matched, "registered prefix");
                return None;
            }

            if len < node.end {
                // Key ends inside this segment: its upper part becomes the new network.
                self.split(cur, len);
                self.nodes.get_mut(cur).value = Some(value);
                self.count += 1;
                debug!(%prefix, "registered prefix above existing node");
                return None;
            }

            if len == node.end {
                let old = self.nodes.get_mut(cur).value.replace(value);
                if old.is_none() {
                    self.count += 1;
                    debug!(%prefix, "registered branch node");
                } else {
                    debug!(%prefix, "replaced payload");
                }
                return old;
            }

            match node.child(key::bit_at(bits, node.end)) {
                Some(child) => cur = child,
                None => {
                    self.attach(cur, bits, len, value);
                    self.count += 1;
                    debug!(%prefix, "registered prefix");
                    return None;
                }
            }
        }
    }

    /// Split `id` at depth `at`.
    ///
    /// `id` keeps the upper part of its segment and becomes branch-only; a
    /// fresh child takes the lower part along with the payload and children.
    fn split(&mut self, id: NodeId, at: u8) {
        let node = self.nodes.get_mut(id);
        debug_assert!(node.start <= at && at < node.end);

        let lower = Node {
            key: node.key,
            start: at,
            end: node.end,
            value: node.value.take(),
            parent: Some(id),
            children: std::mem::take(&mut node.children),
        };
        node.key = key::mask(node.key, at);
        node.end = at;

        let bit = key::bit_at(lower.key, at);
        let grandchildren = lower.children;
        let lower_id = self.nodes.alloc(lower);
        for child in grandchildren.into_iter().flatten() {
            self.nodes.get_mut(child).parent = Some(lower_id);
        }
        self.nodes.get_mut(id).children[bit] = Some(lower_id);
        trace!(depth = at, bit, "split node");
    }

    /// Hang a new registered node for `bits/len` under `parent`.
    fn attach(&mut self, parent: NodeId, bits: u128, len: u8, value: V) {
        let start = self.nodes.get(parent).end;
        debug_assert!(start < len);
        let bit = key::bit_at(bits, start);
        debug_assert!(self.nodes.get(parent).child(bit).is_none());

        let id = self
            .nodes
            .alloc(Node::new(bits, start, len, Some(value), Some(parent)));
        self.nodes.get_mut(parent).children[bit] = Some(id);
    }
}

// =============================================================================
// Lookup
// =============================================================================

impl<V> NetDb<V> {
    /// Find the most specific registered network containing `addr`.
    ///
    /// Fails with [`Error::NotFound`] when no network contains it and with
    /// [`Error::InvalidAddress`] when `addr` is not an IP address.
    pub fn lookup(&self, addr: &str) -> Result<Match<V>>
    where
        V: Clone,
    {
        let bits = key::parse_addr(addr)?;
        self.lookup_bits(bits)
            .map(|(network, payload)| Match {
                network,
                payload: payload.clone(),
            })
            .ok_or(Error::NotFound)
    }

    /// Borrowing form of [`lookup`](Self::lookup) for a typed address.
    pub fn longest_match(&self, addr: IpAddr) -> Option<(IpNet, &V)> {
        self.lookup_bits(Prefix::host(addr).bits())
    }

    fn lookup_bits(&self, addr: u128) -> Option<(IpNet, &V)> {
        let found = self.nearest_registered(self.descend(addr))?;
        self.entry(found)
    }

    /// Deepest node whose whole root-to-node path matches `addr`.
    fn descend(&self, addr: u128) -> Option<NodeId> {
        let mut cur = self.root?;
        let mut last = None;
        loop {
            let node = self.nodes.get(cur);
            if key::first_difference(addr, node.key, node.start, node.end) < node.end {
                trace!(depth = node.start, "lookup diverged inside segment");
                return last;
            }
            last = Some(cur);
            if node.end == KEY_BITS {
                return last;
            }
            match node.child(key::bit_at(addr, node.end)) {
                Some(child) => cur = child,
                None => {
                    trace!(depth = node.end, "lookup fell off the trie");
                    return last;
                }
            }
        }
    }

    /// Exact-match query for a registered network.
    pub fn get(&self, cidr: &str) -> Result<Option<&V>> {
        let prefix = Self::parse(cidr, "get")?;
        Ok(self.get_prefix(prefix))
    }

    /// Typed form of [`get`](Self::get); `None` unless `prefix` is registered.
    pub fn get_prefix(&self, prefix: Prefix) -> Option<&V> {
        self.find(prefix)
            .and_then(|id| self.nodes.get(id).value.as_ref())
    }

    /// Whether `prefix` is registered. Branch-only nodes do not count.
    pub fn contains(&self, prefix: Prefix) -> bool {
        self.get_prefix(prefix).is_some()
    }

    /// Node whose path is exactly `prefix`, registered or not.
    fn find(&self, prefix: Prefix) -> Option<NodeId> {
        let (bits, len) = (prefix.bits(), prefix.prefix_len());
        let mut cur = self.root?;
        loop {
            let node = self.nodes.get(cur);
            if node.end > len
                || key::first_difference(bits, node.key, node.start, node.end) < node.end
            {
                return None;
            }
            if node.end == len {
                return Some(cur);
            }
            cur = node.child(key::bit_at(bits, node.end))?;
        }
    }
}

// =============================================================================
// Removal
// =============================================================================

impl<V> NetDb<V> {
    /// Unregister a network given as `address[/len]`, returning its payload.
    ///
    /// Branch-only nodes left with fewer than two children are compacted
    /// away. Removing an absent network is a no-op returning `Ok(None)`.
    pub fn remove(&mut self, cidr: &str) -> Result<Option<V>> {
        let prefix = Self::parse(cidr, "remove")?;
        Ok(self.remove_prefix(prefix))
    }

    /// Typed form of [`remove`](Self::remove); returns the removed payload.
    pub fn remove_prefix(&mut self, prefix: Prefix) -> Option<V> {
        let id = self.find(prefix)?;
        let old = self.nodes.get_mut(id).value.take()?;
        self.count -= 1;
        self.compact(id);
        debug!(%prefix, "removed prefix");
        Some(old)
    }

    /// Eliminate `id` if it is branch-only with fewer than two children.
    ///
    /// Detaching a childless node may leave its parent with a single child,
    /// so the walk continues upward.
    fn compact(&mut self, mut id: NodeId) {
        loop {
            let node = self.nodes.get(id);
            if node.is_registered() {
                return;
            }
            match (node.child_count(), node.only_child()) {
                (0, _) => {
                    let node = self.nodes.free(id);
                    let Some(parent) = node.parent else {
                        self.root = None;
                        trace!("trie emptied");
                        return;
                    };
                    let bit = key::bit_at(node.key, node.start);
                    debug_assert_eq!(self.nodes.get(parent).child(bit), Some(id));
                    self.nodes.get_mut(parent).children[bit] = None;
                    trace!(depth = node.end, "detached node");
                    id = parent;
                }
                (1, Some(child)) => {
                    self.merge_into_child(id, child);
                    return;
                }
                _ => return,
            }
        }
    }

    /// Fold branch-only `id` into its only child, which absorbs its segment.
    fn merge_into_child(&mut self, id: NodeId, child: NodeId) {
        let node = self.nodes.free(id);
        let merged = self.nodes.get_mut(child);
        merged.start = node.start;
        merged.parent = node.parent;
        match node.parent {
            None => self.root = Some(child),
            Some(parent) => {
                let bit = key::bit_at(node.key, node.start);
                self.nodes.get_mut(parent).children[bit] = Some(child);
            }
        }
        trace!(from = node.start, to = node.end, "merged node into child");
    }
}

// =============================================================================
// Iteration
// =============================================================================

impl<V> NetDb<V> {
    /// Registered networks in key order, less specific before more specific.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter { walk: self.walk() }
    }
}

impl<V> Default for NetDb<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for NetDb<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, V> IntoIterator for &'a NetDb<V> {
    type Item = (IpNet, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

struct Walk<'a, V> {
    db: &'a NetDb<V>,
    stack: Vec<NodeId>,
}

impl<V> Iterator for Walk<'_, V> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        let node = self.db.nodes.get(id);
        debug_assert!(node.segment_len() > 0 || node.parent.is_none());
        self.stack.extend(node.children.iter().rev().flatten());
        Some(id)
    }
}

pub struct Iter<'a, V> {
    walk: Walk<'a, V>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (IpNet, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let db = self.walk.db;
        self.walk.by_ref().find_map(|id| db.entry(id))
    }
}


#[cfg(test)]
mod proptests;
