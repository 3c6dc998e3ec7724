//! Growth and paced evacuation.
//!
//! A growth allocates the new array up front and then moves old buckets
//! over a few at a time: every mutating call evacuates the old bucket it is
//! about to touch plus the one at the evacuation cursor. A growth therefore
//! completes within one mutating call per old bucket, and no single call
//! moves more than two chains.

use crate::bucket::{bucket_shift, ArrayKey, BucketKey};
use crate::entry::EntryKey;
use crate::key_ops::KeyOps;
use crate::raw_table::{over_load_factor, RawTable};
use crate::tag::{Half, SlotState, Tag, BUCKET_CNT};

/// Upper bound on already evacuated buckets skipped per cursor advance.
const EVACUATION_SCAN_LIMIT: usize = 1024;

/// Where the next entry for one destination half goes.
#[derive(Copy, Clone)]
struct EvacDst {
    bucket: BucketKey,
    i: usize,
}

impl<K, V, O> RawTable<K, V, O> {
    #[inline]
    pub(crate) fn is_growing(&self) -> bool {
        self.old.is_some()
    }

    /// Bucket count of the array being evacuated.
    #[inline]
    pub(crate) fn old_bucket_count(&self) -> usize {
        if self.same_size_grow {
            bucket_shift(self.b)
        } else {
            bucket_shift(self.b - 1)
        }
    }

    /// Start a growth. Doubles when the next insert would exceed the load
    /// factor, otherwise reorganizes at the same size to shed overflow
    /// buckets left by insert/delete churn.
    pub(crate) fn hash_grow(&mut self) {
        debug_assert!(!self.is_growing());
        let bigger = over_load_factor(self.entries.len() + 1, self.b);
        let new_b = if bigger { self.b + 1 } else { self.b };
        // Fully built before anything is swapped.
        let fresh = self
            .arena
            .alloc_array(new_b)
            .unwrap_or_else(|e| panic!("cannot grow map: {e}"));

        self.same_size_grow = !bigger;
        self.old = Some(self.current);
        self.current = fresh;
        self.b = new_b;
        self.nevacuate = 0;
        self.arena.reset_noverflow();
        log::debug!(
            "growing map: {} entries, b = {}{}",
            self.entries.len(),
            new_b,
            if bigger { "" } else { " (same size)" }
        );
    }

    /// Evacuate the old bucket feeding `bucket`, then one more to make
    /// progress.
    pub(crate) fn grow_work(&mut self, bucket: usize)
    where
        O: KeyOps<K>,
    {
        self.evacuate(bucket & (self.old_bucket_count() - 1));
        if self.is_growing() {
            self.evacuate(self.nevacuate);
        }
    }

    /// Destination half for a doubling evacuation, and the tag the entry
    /// carries there.
    fn route(&self, slot: Option<EntryKey>, top: Tag, newbit: usize, iterating: bool) -> (Half, Tag)
    where
        O: KeyOps<K>,
    {
        let entry = slot
            .and_then(|ek| self.entries.get(ek))
            .expect("occupied slot must refer to a live entry");
        let key = entry.key();
        let hash = self.ops.hash(key, self.seed);
        if iterating && !O::REFLEXIVE && !self.ops.eq(key, key) {
            // The hash of a key that is not equal to itself is not
            // repeatable, but a cursor filtering this old bucket must agree
            // with the choice made here. Both use the low tag bit, and the
            // key gets a fresh tag so such keys still spread on later growths.
            (Half::from_bit(top.low_bit()), Tag::from_hash(hash))
        } else {
            (Half::from_bit(hash as usize & newbit != 0), top)
        }
    }

    /// Move every live entry of old bucket `oldbucket` (and its overflow
    /// chain) into the current array, leaving evacuation marks behind.
    pub(crate) fn evacuate(&mut self, oldbucket: usize)
    where
        O: KeyOps<K>,
    {
        let Some(old) = self.old else {
            return;
        };
        let newbit = self.old_bucket_count();
        let head = self.arena[old].head(oldbucket);

        if !self.arena[head].is_evacuated() {
            let cur = self.current;
            // Cursors started after this growth walk unevacuated old buckets
            // and must route non-reflexive keys the same way.
            let iterating = self.arena[cur].is_pinned();
            let low = self.arena[cur].head(oldbucket);
            let high = if self.same_size_grow {
                low
            } else {
                self.arena[cur].head(oldbucket + newbit)
            };
            let mut dst = [EvacDst { bucket: low, i: 0 }, EvacDst { bucket: high, i: 0 }];

            // Every destination is worked out before the first slot is
            // marked, so a panicking hash leaves this chain untouched.
            let mut plan = core::mem::take(&mut self.evac_plan);
            plan.clear();
            let mut next = Some(head);
            while let Some(bk) = next {
                for i in 0..BUCKET_CNT {
                    let top = self.arena[bk].tags[i];
                    match top.state() {
                        SlotState::EmptyRest | SlotState::EmptyOne => continue,
                        SlotState::Full(_) => {}
                        other => panic!("bad map state: {other:?} in unevacuated bucket"),
                    }
                    plan.push(if self.same_size_grow {
                        (Half::Low, top)
                    } else {
                        self.route(self.arena[bk].slots[i], top, newbit, iterating)
                    });
                }
                next = self.arena[bk].overflow;
            }

            let mut routes = plan.iter().copied();
            let mut next = Some(head);
            while let Some(bk) = next {
                for i in 0..BUCKET_CNT {
                    if self.arena[bk].tags[i].is_empty() {
                        self.arena[bk].tags[i] = Tag::MOVED_EMPTY;
                        continue;
                    }
                    let (half, new_top) = routes
                        .next()
                        .expect("every occupied slot has a planned destination");
                    let slot = self.arena[bk].slots[i];
                    self.arena[bk].tags[i] = Tag::moved(half);

                    let d = &mut dst[half as usize];
                    if d.i == BUCKET_CNT {
                        d.bucket = self.arena.new_overflow(cur, d.bucket);
                        d.i = 0;
                    }
                    self.arena[d.bucket].set(d.i, new_top, slot);
                    d.i += 1;
                }
                next = self.arena[bk].overflow;
            }
            let moved = plan.len();
            self.evac_plan = plan;
            log::trace!("evacuated old bucket {oldbucket}: {moved} entries");
        }

        if oldbucket == self.nevacuate {
            self.advance_evacuation_mark(old, newbit);
        }
    }

    fn advance_evacuation_mark(&mut self, old: ArrayKey, newbit: usize) {
        self.nevacuate += 1;
        let stop = (self.nevacuate + EVACUATION_SCAN_LIMIT).min(newbit);
        while self.nevacuate != stop
            && self.arena[self.arena[old].head(self.nevacuate)].is_evacuated()
        {
            self.nevacuate += 1;
        }
        if self.nevacuate == newbit {
            self.finish_growth();
        }
    }

    fn finish_growth(&mut self) {
        if let Some(old) = self.old.take() {
            self.release_array(old);
        }
        self.same_size_grow = false;
        self.nevacuate = 0;
        log::debug!("map growth done: {} entries, b = {}", self.entries.len(), self.b);
    }

    /// Free an array that is no longer current or old, or keep it around
    /// while a cursor may still read it.
    pub(crate) fn release_array(&mut self, key: ArrayKey) {
        if self.arena[key].is_pinned() {
            log::debug!("retiring bucket array still read by a cursor");
            self.retired.push(key);
        } else {
            self.arena.free_array(key);
        }
    }

    /// Free retired arrays whose cursors are gone.
    pub(crate) fn sweep_retired(&mut self) {
        if self.retired.is_empty() {
            return;
        }
        let arena = &mut self.arena;
        self.retired.retain(|&k| {
            if arena[k].is_pinned() {
                true
            } else {
                arena.free_array(k);
                false
            }
        });
    }
}
