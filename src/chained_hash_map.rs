//! ChainedHashMap: public map API over `RawTable`.
//!
//! Adds the writing flag around every mutation, the cursor identity used to
//! reject cursors from other maps, and the std-style trait surface.

use crate::error::TableError;
use crate::iter::{Cursor, Iter};
use crate::key_ops::{KeyOps, StdKeys};
use crate::raw_table::{RawTable, TableStats};
use crate::reentrancy::WritingFlag;
use core::borrow::Borrow;
use core::fmt;
use std::rc::Rc;

/// Hash map with chained 8-slot buckets and incremental growth.
///
/// Growing never rehashes everything at once: each insert or remove moves
/// at most two old buckets into the new array. Iteration order is
/// randomized on every walk.
pub struct ChainedHashMap<K, V, O = StdKeys> {
    pub(crate) raw: RawTable<K, V, O>,
    pub(crate) writing: WritingFlag,
    /// Cursors remember which map created them.
    pub(crate) identity: Rc<()>,
}

impl<K, V> ChainedHashMap<K, V> {
    pub fn new() -> Self {
        Self::with_ops(StdKeys::default())
    }

    /// Sized so that `hint` entries fit without growing.
    pub fn with_capacity(hint: usize) -> Self {
        Self::with_capacity_and_ops(hint, StdKeys::default())
    }
}

impl<K, V> Default for ChainedHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, O> ChainedHashMap<K, V, O> {
    pub fn with_ops(ops: O) -> Self {
        Self::with_capacity_and_ops(0, ops)
    }

    /// Panics if `hint` cannot be satisfied; see
    /// [`try_with_capacity_and_ops`](Self::try_with_capacity_and_ops).
    pub fn with_capacity_and_ops(hint: usize, ops: O) -> Self {
        Self::try_with_capacity_and_ops(hint, ops).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn try_with_capacity_and_ops(hint: usize, ops: O) -> Result<Self, TableError> {
        Ok(Self {
            raw: RawTable::with_capacity(hint, ops)?,
            writing: WritingFlag::new(),
            identity: Rc::new(()),
        })
    }

    pub fn ops(&self) -> &O {
        &self.raw.ops
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn stats(&self) -> TableStats {
        self.raw.stats()
    }

    /// Remove every entry. The bucket array keeps its size and the hash
    /// seed changes.
    pub fn clear(&mut self) {
        let _w = self.writing.begin_write();
        self.raw.clear();
    }

    /// Start a detached iteration; see [`Cursor`].
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self)
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        self.get_key_value(q).map(|(_, v)| v)
    }

    pub fn get_key_value<Q>(&self, q: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        self.writing.check_read();
        let e = self.raw.entry(self.raw.find(q)?);
        Some((e.key(), e.value()))
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        self.writing.check_read();
        let ek = self.raw.find(q)?;
        Some(self.raw.entry_mut(ek).value_mut())
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        self.writing.check_read();
        self.raw.find(q).is_some()
    }

    /// Insert or overwrite. Returns the previous value when `key` was
    /// present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V>
    where
        O: KeyOps<K>,
    {
        let hash = self.raw.hash(&key);
        let _w = self.writing.begin_write();
        self.raw.insert_hashed(hash, key, value)
    }

    pub fn remove<Q>(&mut self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q> + KeyOps<K>,
    {
        self.remove_entry(q).map(|(_, v)| v)
    }

    pub fn remove_entry<Q>(&mut self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q> + KeyOps<K>,
    {
        if self.raw.is_empty() {
            self.raw.hash_for_effect(q);
            return None;
        }
        let hash = self.raw.hash(q);
        let _w = self.writing.begin_write();
        self.raw.remove_hashed(hash, q)
    }

    pub fn iter(&self) -> Iter<'_, K, V, O> {
        self.writing.check_iter();
        Iter::new(&self.raw)
    }
}

impl<K, V, O> FromIterator<(K, V)> for ChainedHashMap<K, V, O>
where
    O: KeyOps<K> + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_capacity_and_ops(iter.size_hint().0, O::default());
        map.extend(iter);
        map
    }
}

impl<K, V, O> Extend<(K, V)> for ChainedHashMap<K, V, O>
where
    O: KeyOps<K>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<'a, K, V, O> IntoIterator for &'a ChainedHashMap<K, V, O>
where
    O: KeyOps<K>,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, O>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, O> fmt::Debug for ChainedHashMap<K, V, O>
where
    K: fmt::Debug,
    V: fmt::Debug,
    O: KeyOps<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
