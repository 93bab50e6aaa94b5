//! Shared access to a [`NetDb`] behind a reader/writer lock.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::{Match, NetDb};

/// A [`NetDb`] that may be shared between threads.
///
/// Writers get exclusive access; lookups and diagnostics run concurrently
/// with each other but never with a writer.
pub struct SharedNetDb<V> {
    inner: RwLock<NetDb<V>>,
}

impl<V> SharedNetDb<V> {
    pub fn new() -> Self {
        Self::from(NetDb::new())
    }

    pub fn insert(&self, cidr: &str, value: V) -> Result<Option<V>> {
        self.inner.write().insert(cidr, value)
    }

    pub fn remove(&self, cidr: &str) -> Result<Option<V>> {
        self.inner.write().remove(cidr)
    }

    pub fn lookup(&self, addr: &str) -> Result<Match<V>>
    where
        V: Clone,
    {
        self.inner.read().lookup(addr)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn networks(&self) -> usize {
        self.inner.read().networks()
    }

    pub fn nodes(&self) -> usize {
        self.inner.read().nodes()
    }

    /// Hold the read lock for several queries in a row.
    pub fn read(&self) -> RwLockReadGuard<'_, NetDb<V>> {
        self.inner.read()
    }

    /// Hold the write lock for a batch of mutations.
    pub fn write(&self) -> RwLockWriteGuard<'_, NetDb<V>> {
        self.inner.write()
    }

    pub fn into_inner(self) -> NetDb<V> {
        self.inner.into_inner()
    }
}

impl<V> From<NetDb<V>> for SharedNetDb<V> {
    fn from(db: NetDb<V>) -> Self {
        Self {
            inner: RwLock::new(db),
        }
    }
}

impl<V> Default for SharedNetDb<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for SharedNetDb<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedNetDb")
            .field("inner", &*self.inner.read())
            .finish()
    }
}
