//! Randomized traversal that stays valid across growth.
//!
//! A walk snapshots the array that was current when it started, picks a
//! random start bucket and in-bucket offset, and visits every primary
//! bucket once, wrapping around. If the map is growing and the walk runs
//! over the new array, a bucket whose source old bucket has not been
//! evacuated yet is read from the old array instead, keeping only the
//! entries that will land in the bucket being visited (the check bucket).
//!
//! Arrays a walk reads are pinned. The table retires pinned arrays instead
//! of freeing them, so a `Cursor` can hold a walk without borrowing the map
//! while the map keeps changing between steps.

use crate::bucket::{bucket_mask, bucket_shift, ArrayKey, BucketKey};
use crate::chained_hash_map::ChainedHashMap;
use crate::entry::EntryKey;
use crate::key_ops::KeyOps;
use crate::raw_table::RawTable;
use crate::tag::{Tag, BUCKET_CNT};
use core::iter::FusedIterator;
use std::rc::{Rc, Weak};

pub(crate) struct Walk {
    /// Array that was current when the walk started.
    array: ArrayKey,
    b: u8,
    start_bucket: usize,
    offset: usize,
    /// Next primary bucket to visit.
    bucket: usize,
    /// Bucket being read, `None` between chains.
    bptr: Option<BucketKey>,
    i: usize,
    wrapped: bool,
    check_bucket: Option<usize>,
    _pins: Vec<Rc<()>>,
}

impl<K, V, O> RawTable<K, V, O> {
    /// Start a walk, or `None` when there is nothing to visit.
    pub(crate) fn walk_start(&self) -> Option<Walk> {
        if self.is_empty() {
            return None;
        }
        let r: u64 = rand::random();
        let mut pins = vec![self.arena[self.current].pin()];
        if let Some(old) = self.old {
            pins.push(self.arena[old].pin());
        }
        let start_bucket = r as usize & bucket_mask(self.b);
        Some(Walk {
            array: self.current,
            b: self.b,
            start_bucket,
            offset: (r >> self.b) as usize & (BUCKET_CNT - 1),
            bucket: start_bucket,
            bptr: None,
            i: 0,
            wrapped: false,
            check_bucket: None,
            _pins: pins,
        })
    }

    /// Chain to read for primary bucket `w.bucket`, with its check bucket.
    fn walk_head(&self, w: &Walk) -> (BucketKey, Option<usize>) {
        if let Some(old) = self.old {
            // Only a walk started during this growth runs over the new array.
            if w.array == self.current {
                debug_assert_eq!(w.b, self.b);
                let head = self.arena[old].head(w.bucket & (self.old_bucket_count() - 1));
                if !self.arena[head].is_evacuated() {
                    return (head, Some(w.bucket));
                }
            }
        }
        (self.arena[w.array].head(w.bucket), None)
    }

    /// The entry in slot `i` of `bk`, if the walk should report it.
    fn walk_slot(&self, w: &Walk, bk: BucketKey, i: usize) -> Option<EntryKey>
    where
        O: KeyOps<K>,
    {
        let bucket = &self.arena[bk];
        let tag = bucket.tags[i];
        if tag.is_empty() || tag == Tag::MOVED_EMPTY {
            return None;
        }
        // Deleted or cleared since the slot was written.
        let ek = bucket.slots[i]?;
        let key = self.entries.get(ek)?.key();
        let reflexive = O::REFLEXIVE || self.ops.eq(key, key);

        if let Some(check) = w.check_bucket {
            if !self.same_size_grow {
                let keep = if reflexive {
                    self.ops.hash(key, self.seed) as usize & bucket_mask(w.b) == check
                } else {
                    // Same choice evacuation makes for this key.
                    (check >> (w.b - 1)) & 1 == usize::from(tag.low_bit())
                };
                if !keep {
                    return None;
                }
            }
        }

        if tag.is_evacuated() && reflexive {
            // Moved out of the array this walk reads; report the live binding.
            return self.find(key);
        }
        Some(ek)
    }

    /// Next entry of the walk, or `None` once every bucket was visited.
    pub(crate) fn walk_next(&self, w: &mut Walk) -> Option<EntryKey>
    where
        O: KeyOps<K>,
    {
        loop {
            let bk = match w.bptr {
                Some(bk) => bk,
                None => {
                    if w.bucket == w.start_bucket && w.wrapped {
                        return None;
                    }
                    let (bk, check) = self.walk_head(w);
                    w.check_bucket = check;
                    w.bucket += 1;
                    if w.bucket == bucket_shift(w.b) {
                        w.bucket = 0;
                        w.wrapped = true;
                    }
                    w.i = 0;
                    w.bptr = Some(bk);
                    bk
                }
            };
            while w.i < BUCKET_CNT {
                let slot = (w.i + w.offset) & (BUCKET_CNT - 1);
                w.i += 1;
                if let Some(ek) = self.walk_slot(w, bk, slot) {
                    return Some(ek);
                }
            }
            w.bptr = self.arena[bk].overflow;
            w.i = 0;
        }
    }
}

/// Borrowing iterator over a `ChainedHashMap`, in randomized order.
pub struct Iter<'a, K, V, O> {
    table: &'a RawTable<K, V, O>,
    walk: Option<Walk>,
    remaining: usize,
}

impl<'a, K, V, O> Iter<'a, K, V, O> {
    pub(crate) fn new(table: &'a RawTable<K, V, O>) -> Self {
        Self {
            table,
            walk: table.walk_start(),
            remaining: table.len(),
        }
    }
}

impl<'a, K, V, O> Iterator for Iter<'a, K, V, O>
where
    O: KeyOps<K>,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let walk = self.walk.as_mut()?;
        match self.table.walk_next(walk) {
            Some(ek) => {
                self.remaining = self.remaining.saturating_sub(1);
                let e = self.table.entry(ek);
                Some((e.key(), e.value()))
            }
            None => {
                self.walk = None;
                None
            }
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, O> ExactSizeIterator for Iter<'_, K, V, O> where O: KeyOps<K> {}

impl<K, V, O> FusedIterator for Iter<'_, K, V, O> where O: KeyOps<K> {}

/// Detached iteration state. Holds no borrow of the map, so the map may be
/// mutated between steps:
///
/// - every key present for the whole iteration is yielded exactly once;
/// - a key removed before it was reached is not yielded;
/// - a key inserted during the iteration may or may not be yielded.
///
/// Stepping a cursor with a map other than the one that created it panics.
pub struct Cursor {
    owner: Weak<()>,
    walk: Option<Walk>,
}

impl Cursor {
    pub(crate) fn new<K, V, O>(map: &ChainedHashMap<K, V, O>) -> Self {
        Self {
            owner: Rc::downgrade(&map.identity),
            walk: map.raw.walk_start(),
        }
    }

    /// Advance and return the next entry, or `None` when done. Once done,
    /// keeps returning `None`.
    pub fn next<'m, K, V, O>(&mut self, map: &'m ChainedHashMap<K, V, O>) -> Option<(&'m K, &'m V)>
    where
        O: KeyOps<K>,
    {
        assert!(
            self.owner.as_ptr() == Rc::as_ptr(&map.identity),
            "cursor used with a map other than the one it was created from"
        );
        map.writing.check_iter();
        let walk = self.walk.as_mut()?;
        match map.raw.walk_next(walk) {
            Some(ek) => {
                let e = map.raw.entry(ek);
                Some((e.key(), e.value()))
            }
            None => {
                // Unpin eagerly so retired arrays can be released.
                self.walk = None;
                None
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.walk.is_none()
    }
}

impl core::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cursor")
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}
