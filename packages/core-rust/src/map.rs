//! Thread-safe map with atomic, reentrant fetch-or-compute.
//!
//! Reads go straight to a sharded [`DashMap`]. Every mutation, including the
//! fetch-or-compute critical section, runs under a per-map reentrant monitor
//! so a compute callback can touch the same map again on the same thread
//! without deadlocking. No `DashMap` shard lock is ever held while user code
//! runs.

use std::borrow::Borrow;
use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;

use dashmap::DashMap;
use parking_lot::ReentrantMutex;

/// Concurrent key/value map supporting atomic fetch-or-compute.
///
/// Values are cloned out on read, so `V` is usually an `Arc` or a small
/// `Copy` type.
pub struct ConcurrentMap<K, V> {
    entries: DashMap<K, V>,
    write_lock: ReentrantMutex<()>,
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Creates a new, empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            write_lock: ReentrantMutex::new(()),
        }
    }

    /// Returns a clone of the value for `key`, or `None` if absent.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Inserts or replaces the value for `key`. Returns the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let _guard = self.write_lock.lock();
        self.entries.insert(key, value)
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let _guard = self.write_lock.lock();
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point-in-time snapshot of the keys. Concurrent writers are not blocked.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.entries.clear();
    }

    /// Returns the value for `key`, computing and storing it first if absent.
    ///
    /// Concurrent callers racing on the same missing key run `compute` at
    /// most once between them and all observe the stored value.
    pub fn fetch_or_compute<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        match self.fetch_or_try_compute(key, || Ok::<V, Infallible>(compute())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Fallible variant of [`fetch_or_compute`](Self::fetch_or_compute).
    ///
    /// When `compute` fails the error is returned unchanged and the key stays
    /// absent, so a later call may retry. A panic inside `compute` unwinds
    /// through the monitor without poisoning it and likewise installs nothing.
    ///
    /// # Errors
    ///
    /// Returns whatever error `compute` returns.
    pub fn fetch_or_try_compute<E, F>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let _guard = self.write_lock.lock();

        // Another thread may have installed the key while we waited.
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let computed = compute()?;

        // A nested call on this thread may have installed the key while
        // `compute` ran; keep whichever value landed first.
        let value = self.entries.entry(key).or_insert(computed).value().clone();
        Ok(value)
    }
}

impl<K, V> Default for ConcurrentMap<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for ConcurrentMap<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentMap")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}
