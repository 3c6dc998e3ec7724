//! RawTable: the table header and the mutation engine.
//!
//! Structure: one entry arena plus a bucket arena holding the current
//! bucket array and, while a growth is in progress, the old one. Growth and
//! evacuation live in `grow`, iteration in `iter`. This layer does no
//! misuse detection of its own; `ChainedHashMap` raises the writing flag
//! around every call that mutates.

use crate::bucket::{bucket_mask, propagate_empty_rest, ArrayKey, BucketArena, BucketKey};
use crate::entry::{Entry, EntryKey};
use crate::error::TableError;
use crate::key_ops::KeyOps;
use crate::tag::{Half, Tag, BUCKET_CNT};
use core::borrow::Borrow;
use slotmap::SlotMap;

/// Maximum average load of a bucket that triggers growth, as a fraction
/// (6.5 entries per 8-slot bucket).
pub(crate) const LOAD_FACTOR_NUM: usize = 13;
pub(crate) const LOAD_FACTOR_DEN: usize = 2;

/// Reports whether `count` entries in `2^b` buckets exceed the load factor.
pub(crate) fn over_load_factor(count: usize, b: u8) -> bool {
    count > BUCKET_CNT
        && count > LOAD_FACTOR_NUM.saturating_mul(crate::bucket::bucket_shift(b) / LOAD_FACTOR_DEN)
}

/// Reports whether `noverflow` overflow buckets are too many for `2^b`
/// buckets: about as many overflow buckets as primary ones. Most of them
/// are then sparsely used, or the load factor would have triggered first.
pub(crate) fn too_many_overflow_buckets(noverflow: u16, b: u8) -> bool {
    noverflow >= 1u16 << b.min(15)
}

/// Snapshot of the table's shape.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TableStats {
    pub len: usize,
    /// log2 of the primary bucket count.
    pub log2_buckets: u8,
    /// Overflow buckets linked into chains of the current array.
    pub overflow_buckets: usize,
    /// Longest chain of the current array, primary bucket included.
    pub longest_chain: usize,
    pub growing: bool,
    pub same_size_grow: bool,
    /// Old buckets already evacuated by the running growth.
    pub evacuated: usize,
    /// Arrays kept alive only for cursors.
    pub retired_arrays: usize,
    /// Buckets allocated across all arrays, preallocated spares included.
    pub allocated_buckets: usize,
}

pub(crate) struct RawTable<K, V, O> {
    pub(crate) ops: O,
    pub(crate) seed: u64,
    /// log2 of the current array's bucket count.
    pub(crate) b: u8,
    pub(crate) entries: SlotMap<EntryKey, Entry<K, V>>,
    pub(crate) arena: BucketArena,
    pub(crate) current: ArrayKey,
    /// Present iff a growth is in progress.
    pub(crate) old: Option<ArrayKey>,
    /// Evacuated arrays still pinned by a cursor.
    pub(crate) retired: Vec<ArrayKey>,
    /// Old buckets below this index are all evacuated.
    pub(crate) nevacuate: usize,
    pub(crate) same_size_grow: bool,
    /// Scratch space for `evacuate`: destination and tag per occupied slot.
    pub(crate) evac_plan: Vec<(Half, Tag)>,
}

impl<K, V, O> RawTable<K, V, O> {
    pub fn with_capacity(hint: usize, ops: O) -> Result<Self, TableError> {
        let mut b = 0u8;
        while u32::from(b) < usize::BITS - 1 && over_load_factor(hint, b) {
            b += 1;
        }
        let entry_bytes = hint
            .checked_mul(core::mem::size_of::<Entry<K, V>>() + core::mem::size_of::<u64>())
            .ok_or(TableError::CapacityOverflow)?;
        if entry_bytes > isize::MAX as usize {
            return Err(TableError::CapacityOverflow);
        }
        let mut arena = BucketArena::new();
        let current = arena.alloc_array(b)?;
        Ok(Self {
            ops,
            seed: rand::random(),
            b,
            entries: SlotMap::with_capacity_and_key(hint),
            arena,
            current,
            old: None,
            retired: Vec::new(),
            nevacuate: 0,
            same_size_grow: false,
            evac_plan: Vec::new(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entry(&self, ek: EntryKey) -> &Entry<K, V> {
        &self.entries[ek]
    }

    #[inline]
    pub fn entry_mut(&mut self, ek: EntryKey) -> &mut Entry<K, V> {
        &mut self.entries[ek]
    }

    pub(crate) fn reseed(&mut self) {
        self.seed = rand::random();
        log::trace!("reseeded hash (b = {})", self.b);
    }

    /// Chain that currently holds keys with this hash: the old one while
    /// its contents have not been moved yet, else the current one.
    fn probe_head(&self, hash: u64) -> BucketKey {
        let index = hash as usize & bucket_mask(self.b);
        if let Some(old) = self.old {
            let mut mask = bucket_mask(self.b);
            if !self.same_size_grow {
                mask >>= 1;
            }
            let oldb = self.arena[old].head(hash as usize & mask);
            if !self.arena[oldb].is_evacuated() {
                return oldb;
            }
        }
        self.arena[self.current].head(index)
    }

    /// Scan one chain for `q`. Stops at the first `EmptyRest` tag: nothing
    /// after it in the chain is occupied.
    fn find_in_chain<Q>(
        &self,
        head: BucketKey,
        top: Tag,
        q: &Q,
    ) -> Option<(BucketKey, usize, EntryKey)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        let mut next = Some(head);
        while let Some(bk) = next {
            let bucket = &self.arena[bk];
            for i in 0..BUCKET_CNT {
                let tag = bucket.tags[i];
                if tag != top {
                    if tag == Tag::EMPTY_REST {
                        return None;
                    }
                    continue;
                }
                if let Some(ek) = bucket.slots[i] {
                    if self.ops.eq(q, self.entries[ek].key().borrow()) {
                        return Some((bk, i, ek));
                    }
                }
            }
            next = bucket.overflow;
        }
        None
    }

    #[inline]
    pub fn hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        self.ops.hash(q, self.seed)
    }

    /// Hash `q` for its side effect only, when hashing may panic.
    #[inline]
    pub fn hash_for_effect<Q>(&self, q: &Q)
    where
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        if O::HASH_MAY_PANIC {
            let _ = self.ops.hash(q, self.seed);
        }
    }

    /// Lookup. Never mutates and never migrates.
    pub fn find<Q>(&self, q: &Q) -> Option<EntryKey>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        if self.entries.is_empty() {
            self.hash_for_effect(q);
            return None;
        }
        let hash = self.hash(q);
        self.find_in_chain(self.probe_head(hash), Tag::from_hash(hash), q)
            .map(|(_, _, ek)| ek)
    }

    /// Insert or update. Returns the previous value on update.
    pub fn insert_hashed(&mut self, hash: u64, key: K, value: V) -> Option<V>
    where
        O: KeyOps<K>,
    {
        self.sweep_retired();
        let top = Tag::from_hash(hash);
        loop {
            let index = hash as usize & bucket_mask(self.b);
            if self.is_growing() {
                self.grow_work(index);
            }
            let head = self.arena[self.current].head(index);

            let mut insert_at: Option<(BucketKey, usize)> = None;
            let mut tail = head;
            let mut next = Some(head);
            'chain: while let Some(bk) = next {
                tail = bk;
                let bucket = &self.arena[bk];
                for i in 0..BUCKET_CNT {
                    let tag = bucket.tags[i];
                    if tag != top {
                        if tag.is_empty() && insert_at.is_none() {
                            insert_at = Some((bk, i));
                        }
                        if tag == Tag::EMPTY_REST {
                            break 'chain;
                        }
                        continue;
                    }
                    let Some(ek) = bucket.slots[i] else { continue };
                    if !self.ops.eq(&key, self.entries[ek].key()) {
                        continue;
                    }
                    let entry = &mut self.entries[ek];
                    if O::KEY_UPDATE {
                        entry.key.replace(key);
                    }
                    return Some(entry.value.replace(value));
                }
                next = bucket.overflow;
            }

            // Growing invalidates the slot found above; start over.
            if !self.is_growing()
                && (over_load_factor(self.entries.len() + 1, self.b)
                    || too_many_overflow_buckets(self.arena.noverflow(), self.b))
            {
                self.hash_grow();
                continue;
            }

            let (bk, i) = match insert_at {
                Some(at) => at,
                None => (self.arena.new_overflow(self.current, tail), 0),
            };
            let ek = self.entries.insert(Entry::new(key, value));
            self.arena[bk].set(i, top, Some(ek));
            return None;
        }
    }

    /// Delete. Removing the last entry picks a new seed.
    pub fn remove_hashed<Q>(&mut self, hash: u64, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q> + KeyOps<K>,
    {
        self.sweep_retired();
        if self.entries.is_empty() {
            return None;
        }
        let index = hash as usize & bucket_mask(self.b);
        if self.is_growing() {
            self.grow_work(index);
        }
        let head = self.arena[self.current].head(index);
        let (bk, i, ek) = self.find_in_chain(head, Tag::from_hash(hash), q)?;
        let entry = self
            .entries
            .remove(ek)
            .expect("occupied slot must refer to a live entry");
        self.arena[bk].set(i, Tag::EMPTY_ONE, None);
        propagate_empty_rest(&mut self.arena, head, bk, i);
        if self.entries.is_empty() {
            // Make repeated collision probing harder.
            self.reseed();
        }
        Some(entry.into_pair())
    }

    /// Drop every entry. Keeps the current bucket count, like a table
    /// created for this size, but with a new seed.
    pub fn clear(&mut self) {
        self.sweep_retired();
        if self.entries.is_empty() {
            return;
        }
        self.entries.clear();
        if let Some(old) = self.old.take() {
            self.release_array(old);
        }
        self.same_size_grow = false;
        self.nevacuate = 0;
        if self.arena[self.current].is_pinned() {
            let fresh = self
                .arena
                .alloc_array(self.b)
                .unwrap_or_else(|e| panic!("cannot reallocate cleared map: {e}"));
            let stale = core::mem::replace(&mut self.current, fresh);
            self.release_array(stale);
            self.arena.reset_noverflow();
        } else {
            self.arena.reset_array(self.current);
        }
        self.reseed();
        log::debug!("cleared map (b = {})", self.b);
    }

    pub fn stats(&self) -> TableStats {
        let (overflow_buckets, longest_chain) = self.arena.chain_stats(self.current);
        TableStats {
            len: self.len(),
            log2_buckets: self.b,
            overflow_buckets,
            longest_chain,
            growing: self.is_growing(),
            same_size_grow: self.same_size_grow,
            evacuated: if self.is_growing() { self.nevacuate } else { 0 },
            retired_arrays: self.retired.len(),
            allocated_buckets: self.arena.bucket_count(),
        }
    }
}

#[cfg(test)]
impl<K, V, O> RawTable<K, V, O> {
    /// Structural invariants that must hold between operations.
    pub(crate) fn assert_invariants(&self) {
        use crate::tag::SlotState;

        let mut live = 0;
        let mut check_chain = |head: BucketKey, counts: bool| {
            let mut seen_rest = false;
            let mut next = Some(head);
            while let Some(bk) = next {
                let bucket = &self.arena[bk];
                for i in 0..BUCKET_CNT {
                    match bucket.tags[i].state() {
                        SlotState::EmptyRest => seen_rest = true,
                        SlotState::EmptyOne => {
                            assert!(!seen_rest, "EmptyOne after EmptyRest");
                            assert!(bucket.slots[i].is_none());
                        }
                        SlotState::Full(_) => {
                            assert!(!seen_rest, "occupied slot after EmptyRest");
                            let ek = bucket.slots[i].expect("full tag without entry");
                            assert!(self.entries.contains_key(ek), "full tag with dead entry");
                            if counts {
                                live += 1;
                            }
                        }
                        SlotState::Moved(_) | SlotState::MovedEmpty => {
                            panic!("evacuation mark in a live chain")
                        }
                    }
                }
                next = bucket.overflow;
            }
        };

        let current = &self.arena[self.current];
        assert_eq!(current.b, self.b);
        for index in 0..current.primary.len() {
            check_chain(current.head(index), true);
        }
        if let Some(old) = self.old {
            let old_array = &self.arena[old];
            assert!(self.nevacuate <= old_array.primary.len());
            for index in 0..old_array.primary.len() {
                let head = old_array.head(index);
                if self.arena[head].is_evacuated() {
                    continue;
                }
                assert!(index >= self.nevacuate, "cursor passed an unevacuated bucket");
                check_chain(head, true);
            }
        } else {
            assert!(!self.same_size_grow);
            assert_eq!(self.nevacuate, 0);
        }
        assert_eq!(live, self.entries.len(), "slot count does not match entry count");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_ops::StdKeys;

    fn table() -> RawTable<u64, u64, StdKeys> {
        RawTable::with_capacity(0, StdKeys::default()).unwrap()
    }

    fn insert(t: &mut RawTable<u64, u64, StdKeys>, k: u64, v: u64) -> Option<u64> {
        let h = t.hash(&k);
        t.insert_hashed(h, k, v)
    }

    fn remove(t: &mut RawTable<u64, u64, StdKeys>, k: u64) -> Option<u64> {
        let h = t.hash(&k);
        t.remove_hashed(h, &k).map(|(_, v)| v)
    }

    fn get(t: &RawTable<u64, u64, StdKeys>, k: u64) -> Option<u64> {
        t.find(&k).map(|ek| *t.entry(ek).value())
    }

    #[test]
    fn load_factor_thresholds() {
        assert!(!over_load_factor(8, 0));
        assert!(over_load_factor(9, 0));
        assert!(!over_load_factor(13, 1));
        assert!(over_load_factor(14, 1));
        assert!(!over_load_factor(6656, 10));
        assert!(over_load_factor(6657, 10));
    }

    #[test]
    fn overflow_threshold_caps_at_b15() {
        assert!(too_many_overflow_buckets(1, 0));
        assert!(!too_many_overflow_buckets(15, 4));
        assert!(too_many_overflow_buckets(16, 4));
        assert!(!too_many_overflow_buckets(u16::MAX / 2, 20));
        assert!(too_many_overflow_buckets(1 << 15, 20));
    }

    #[test]
    fn capacity_hint_sizes_the_array() {
        let t: RawTable<u64, u64, StdKeys> =
            RawTable::with_capacity(0, StdKeys::default()).unwrap();
        assert_eq!(t.b, 0);
        let t: RawTable<u64, u64, StdKeys> =
            RawTable::with_capacity(8, StdKeys::default()).unwrap();
        assert_eq!(t.b, 0);
        let t: RawTable<u64, u64, StdKeys> =
            RawTable::with_capacity(100, StdKeys::default()).unwrap();
        assert_eq!(t.b, 4);
        t.assert_invariants();
    }

    #[test]
    fn absurd_capacity_is_rejected() {
        let r: Result<RawTable<u64, u64, StdKeys>, _> =
            RawTable::with_capacity(usize::MAX, StdKeys::default());
        assert!(matches!(r, Err(TableError::CapacityOverflow)));
    }

    #[test]
    fn insert_update_remove() {
        let mut t = table();
        assert_eq!(insert(&mut t, 1, 10), None);
        assert_eq!(insert(&mut t, 1, 11), Some(10));
        assert_eq!(get(&t, 1), Some(11));
        assert_eq!(t.len(), 1);
        assert_eq!(remove(&mut t, 1), Some(11));
        assert_eq!(remove(&mut t, 1), None);
        assert_eq!(get(&t, 1), None);
        t.assert_invariants();
    }

    #[test]
    fn removing_last_entry_reseeds() {
        let mut t = table();
        insert(&mut t, 7, 7);
        insert(&mut t, 8, 8);
        let seed = t.seed;
        remove(&mut t, 7);
        assert_eq!(t.seed, seed, "seed only changes when the table empties");
        remove(&mut t, 8);
        assert_ne!(t.seed, seed);
    }

    #[test]
    fn clear_reseeds_and_keeps_size() {
        let mut t = table();
        for k in 0..1000 {
            insert(&mut t, k, k);
        }
        let b = t.b;
        let seed = t.seed;
        t.clear();
        assert_eq!(t.len(), 0);
        assert_eq!(t.b, b);
        assert_ne!(t.seed, seed);
        assert!(!t.is_growing());
        t.assert_invariants();
        for k in 0..1000 {
            assert_eq!(get(&t, k), None);
        }
        insert(&mut t, 5, 50);
        assert_eq!(get(&t, 5), Some(50));
        t.assert_invariants();
    }

    #[test]
    fn deleted_slots_are_reused() {
        let mut t = table();
        for k in 0..8 {
            insert(&mut t, k, k);
        }
        let buckets = t.arena.bucket_count();
        for round in 0..100 {
            for k in 0..8 {
                remove(&mut t, k);
            }
            for k in 0..8 {
                insert(&mut t, k, k + round);
            }
        }
        assert_eq!(t.arena.bucket_count(), buckets);
        assert_eq!(t.b, 0);
        t.assert_invariants();
    }

    #[test]
    fn delete_restores_empty_rest_across_chain() {
        // Single bucket: every key shares the chain.
        let mut t = table();
        for k in 0..8 {
            insert(&mut t, k, k);
        }
        assert_eq!(t.b, 0);
        for k in (0..8).rev() {
            remove(&mut t, k);
            t.assert_invariants();
        }
        let head = t.arena[t.current].head(0);
        assert!(t.arena[head].tags.iter().all(|&tag| tag == Tag::EMPTY_REST));
    }
}
