//! A map whose keys and values are both held weakly.
//!
//! `WeakMap<K, V>` associates `Gc<K>` keys with `Gc<V>` values by key
//! identity. The map never keeps a key or a value alive: once a collection
//! reclaims either side of an entry, the entry is gone from every lookup,
//! size query and iteration.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::iter::FusedIterator;

use indexmap::IndexMap;

use crate::gc::collection_epoch;
use crate::ptr::{ObjectId, Weak};
use crate::trace::{Trace, Visitor};
use crate::Gc;

#[cfg(feature = "tracing")]
use crate::tracing::internal::log_weak_map_pruned;

struct Entry<K, V> {
    key: Weak<K>,
    value: Weak<V>,
}

impl<K: Trace + 'static, V: Trace + 'static> Entry<K, V> {
    fn is_live(&self) -> bool {
        self.key.is_alive() && self.value.is_alive()
    }

    fn upgrade(&self) -> Option<(Gc<K>, Gc<V>)> {
        Some((self.key.upgrade()?, self.value.upgrade()?))
    }

    fn upgrade_value(&self) -> Option<Gc<V>> {
        if self.key.is_alive() {
            self.value.upgrade()
        } else {
            None
        }
    }
}

/// A weak key -> weak value association map.
///
/// Keys are compared by identity ([`Gc::id`]), never by value. Iteration
/// follows insertion order; overwriting a key keeps its position.
///
/// Reads take `&self` and drop dead entries as a side effect. Liveness can
/// only change during a collection that reclaims something, so a read only
/// rescans the table when such a collection ran since the last scan;
/// otherwise the stored entries are known to be live.
///
/// # Examples
///
/// ```
/// use evanesce::{Heap, WeakMap};
///
/// let heap = Heap::new();
/// let mut map = WeakMap::new();
///
/// let key = heap.alloc(String::from("A"));
/// let value = heap.alloc(String::from("x"));
/// map.insert(&key, &value);
/// assert_eq!(map.get(&key).as_deref().map(String::as_str), Some("x"));
///
/// drop(value);
/// heap.collect_full();
///
/// assert!(map.get(&key).is_none());
/// assert!(!map.contains_key(&key));
/// assert_eq!(map.len(), 0);
/// ```
pub struct WeakMap<K, V> {
    entries: RefCell<IndexMap<ObjectId, Entry<K, V>>>,
    /// Collection epoch at which every stored entry was last known live.
    pruned_at: Cell<u64>,
}

impl<K: Trace + 'static, V: Trace + 'static> WeakMap<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty map with room for `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RefCell::new(IndexMap::with_capacity(capacity)),
            pruned_at: Cell::new(collection_epoch()),
        }
    }

    /// Associates `value` with `key`'s identity.
    ///
    /// Replaces any existing entry for the same key, keeping its position.
    /// Returns the previous value if it was still alive. The map keeps no
    /// strong handle to either argument.
    ///
    /// A destructor running during a sweep may pass handles that are already
    /// collected. Such an entry is dead on arrival: any existing entry for
    /// `key` is removed and nothing is stored.
    pub fn insert(&mut self, key: &Gc<K>, value: &Gc<V>) -> Option<Gc<V>> {
        self.prune_stale();
        let entries = self.entries.get_mut();
        let id = Gc::id(key);
        if Gc::is_dead(key) || Gc::is_dead(value) {
            return entries
                .shift_remove(&id)
                .and_then(|old| old.upgrade_value());
        }
        let entry = Entry {
            key: Gc::downgrade(key),
            value: Gc::downgrade(value),
        };
        entries.insert(id, entry).and_then(|old| old.upgrade_value())
    }

    /// Returns the value associated with `key`, or `None` if there is none
    /// or it has been collected.
    #[must_use]
    pub fn get(&self, key: &Gc<K>) -> Option<Gc<V>> {
        self.prune_stale();
        self.entries
            .borrow()
            .get(&Gc::id(key))
            .and_then(Entry::upgrade_value)
    }

    /// Returns `true` if `get` would return a value.
    #[must_use]
    pub fn contains_key(&self, key: &Gc<K>) -> bool {
        self.prune_stale();
        self.entries
            .borrow()
            .get(&Gc::id(key))
            .is_some_and(Entry::is_live)
    }

    /// Alias for [`WeakMap::contains_key`].
    #[inline]
    #[must_use]
    pub fn include(&self, key: &Gc<K>) -> bool {
        self.contains_key(key)
    }

    /// Alias for [`WeakMap::contains_key`].
    #[inline]
    #[must_use]
    pub fn member(&self, key: &Gc<K>) -> bool {
        self.contains_key(key)
    }

    /// Number of entries whose key and value are both alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prune_stale();
        self.entries.borrow().len()
    }

    /// Alias for [`WeakMap::len`].
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.len()
    }

    /// Alias for [`WeakMap::len`].
    #[inline]
    #[must_use]
    pub fn length(&self) -> usize {
        self.len()
    }

    /// Returns `true` if no live entry remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes the entry for `key`, returning its value if it was alive.
    pub fn remove(&mut self, key: &Gc<K>) -> Option<Gc<V>> {
        self.entries
            .get_mut()
            .shift_remove(&Gc::id(key))
            .and_then(|old| old.upgrade_value())
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.get_mut().clear();
        self.pruned_at.set(collection_epoch());
    }

    /// Drops the storage of every entry whose key or value was collected and
    /// returns how many were dropped.
    ///
    /// Reads already do this when needed; calling it directly is only useful
    /// to release the memory of collected objects early.
    pub fn prune(&mut self) -> usize {
        self.prune_dead()
    }

    /// Snapshot iterator over the live `(key, value)` pairs.
    ///
    /// The snapshot holds strong handles, so every pair it yields stays
    /// alive until the iterator is dropped, even if a collection runs
    /// meanwhile.
    #[must_use]
    pub fn iter(&self) -> Iter<K, V> {
        Iter {
            inner: self.snapshot().into_iter(),
        }
    }

    /// Snapshot iterator over the live keys.
    #[must_use]
    pub fn keys(&self) -> Keys<K> {
        let keys: Vec<_> = self.snapshot().into_iter().map(|(key, _)| key).collect();
        Keys {
            inner: keys.into_iter(),
        }
    }

    /// Snapshot iterator over the live values.
    #[must_use]
    pub fn values(&self) -> Values<V> {
        let values: Vec<_> = self
            .snapshot()
            .into_iter()
            .map(|(_, value)| value)
            .collect();
        Values {
            inner: values.into_iter(),
        }
    }

    /// Calls `f` once for every live entry, in insertion order.
    ///
    /// The set of entries visited is fixed when the call starts.
    pub fn each_pair<F>(&self, mut f: F)
    where
        F: FnMut(&Gc<K>, &Gc<V>),
    {
        for (key, value) in self.snapshot() {
            f(&key, &value);
        }
    }

    /// Alias for [`WeakMap::each_pair`].
    #[inline]
    pub fn each<F>(&self, f: F)
    where
        F: FnMut(&Gc<K>, &Gc<V>),
    {
        self.each_pair(f);
    }

    /// Calls `f` with the key of every live entry.
    pub fn each_key<F>(&self, mut f: F)
    where
        F: FnMut(&Gc<K>),
    {
        self.each_pair(|key, _| f(key));
    }

    /// Calls `f` with the value of every live entry.
    pub fn each_value<F>(&self, mut f: F)
    where
        F: FnMut(&Gc<V>),
    {
        self.each_pair(|_, value| f(value));
    }

    fn snapshot(&self) -> Vec<(Gc<K>, Gc<V>)> {
        self.prune_stale();
        self.entries
            .borrow()
            .values()
            .filter_map(Entry::upgrade)
            .collect()
    }

    /// Drops dead entries if a collection reclaimed anything since the last
    /// scan.
    fn prune_stale(&self) {
        if self.pruned_at.get() != collection_epoch() {
            self.prune_dead();
        }
    }

    fn prune_dead(&self) -> usize {
        let epoch = collection_epoch();
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live());
        let removed = before - entries.len();
        self.pruned_at.set(epoch);

        #[cfg(feature = "tracing")]
        if removed > 0 {
            log_weak_map_pruned(removed, entries.len());
        }

        removed
    }
}

impl<K: Trace + 'static, V: Trace + 'static> Default for WeakMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, K: Trace + 'static, V: Trace + 'static> Extend<(&'a Gc<K>, &'a Gc<V>)>
    for WeakMap<K, V>
{
    fn extend<I: IntoIterator<Item = (&'a Gc<K>, &'a Gc<V>)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K: Trace + 'static, V: Trace + 'static> IntoIterator for &WeakMap<K, V> {
    type Item = (Gc<K>, Gc<V>);
    type IntoIter = Iter<K, V>;

    fn into_iter(self) -> Iter<K, V> {
        self.iter()
    }
}

impl<K, V> fmt::Debug for WeakMap<K, V>
where
    K: Trace + fmt::Debug + 'static,
    V: Trace + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

// SAFETY: the map only holds weak handles, which are not edges.
unsafe impl<K, V> Trace for WeakMap<K, V> {
    #[inline]
    fn trace(&self, _visitor: &mut impl Visitor) {}
}

/// Iterator over a snapshot of a [`WeakMap`]'s live entries.
///
/// Created by [`WeakMap::iter`].
pub struct Iter<K, V> {
    inner: std::vec::IntoIter<(Gc<K>, Gc<V>)>,
}

impl<K, V> Iterator for Iter<K, V> {
    type Item = (Gc<K>, Gc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Iter<K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl<K, V> ExactSizeIterator for Iter<K, V> {}
impl<K, V> FusedIterator for Iter<K, V> {}

/// Iterator over a snapshot of a [`WeakMap`]'s live keys.
///
/// Created by [`WeakMap::keys`].
pub struct Keys<K> {
    inner: std::vec::IntoIter<Gc<K>>,
}

impl<K> Iterator for Keys<K> {
    type Item = Gc<K>;

    fn next(&mut self) -> Option<Gc<K>> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K> DoubleEndedIterator for Keys<K> {
    fn next_back(&mut self) -> Option<Gc<K>> {
        self.inner.next_back()
    }
}

impl<K> ExactSizeIterator for Keys<K> {}
impl<K> FusedIterator for Keys<K> {}

/// Iterator over a snapshot of a [`WeakMap`]'s live values.
///
/// Created by [`WeakMap::values`].
pub struct Values<V> {
    inner: std::vec::IntoIter<Gc<V>>,
}

impl<V> Iterator for Values<V> {
    type Item = Gc<V>;

    fn next(&mut self) -> Option<Gc<V>> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<V> DoubleEndedIterator for Values<V> {
    fn next_back(&mut self) -> Option<Gc<V>> {
        self.inner.next_back()
    }
}

impl<V> ExactSizeIterator for Values<V> {}
impl<V> FusedIterator for Values<V> {}
