//! Buckets, bucket arrays and the overflow chain manager.
//!
//! All buckets of all arrays live in one arena and are addressed by
//! `BucketKey`. A bucket array is the list of its 2^B primary buckets plus
//! a pool of preallocated overflow buckets. Overflow buckets hang off a
//! primary bucket through `Bucket::overflow`, forming one chain per primary.

use crate::entry::EntryKey;
use crate::error::TableError;
use crate::tag::{Tag, BUCKET_CNT};
use slotmap::SlotMap;
use std::rc::Rc;

slotmap::new_key_type! {
    pub(crate) struct BucketKey;
    pub(crate) struct ArrayKey;
}

#[derive(Debug, Default)]
pub(crate) struct Bucket {
    pub tags: [Tag; BUCKET_CNT],
    pub slots: [Option<EntryKey>; BUCKET_CNT],
    pub overflow: Option<BucketKey>,
}

impl Bucket {
    /// Evacuation marks every slot of a primary bucket, so the first tag
    /// tells whether the whole chain has moved.
    #[inline]
    pub fn is_evacuated(&self) -> bool {
        self.tags[0].is_evacuated()
    }

    #[inline]
    pub fn set(&mut self, i: usize, tag: Tag, slot: Option<EntryKey>) {
        self.tags[i] = tag;
        self.slots[i] = slot;
    }
}

#[derive(Debug)]
pub(crate) struct BucketArray {
    /// log2 of the primary bucket count.
    pub b: u8,
    pub primary: Vec<BucketKey>,
    /// Preallocated overflow buckets not yet linked into a chain.
    spare: Vec<BucketKey>,
    /// Cursors that may read this array hold a clone.
    pin: Rc<()>,
}

impl BucketArray {
    #[inline]
    pub fn head(&self, index: usize) -> BucketKey {
        self.primary[index]
    }

    pub fn is_pinned(&self) -> bool {
        Rc::strong_count(&self.pin) > 1
    }

    pub fn pin(&self) -> Rc<()> {
        Rc::clone(&self.pin)
    }
}

#[inline]
pub(crate) fn bucket_shift(b: u8) -> usize {
    1usize << b
}

#[inline]
pub(crate) fn bucket_mask(b: u8) -> usize {
    bucket_shift(b) - 1
}

/// Largest supported B: the primary array of `2^B` handles must be
/// addressable.
pub(crate) fn check_size(b: u8) -> Result<usize, TableError> {
    if u32::from(b) >= usize::BITS - 1 {
        return Err(TableError::CapacityOverflow);
    }
    let n = bucket_shift(b);
    let spare = if b >= 4 { bucket_shift(b - 4) } else { 0 };
    let bytes = (n + spare)
        .checked_mul(core::mem::size_of::<Bucket>())
        .ok_or(TableError::CapacityOverflow)?;
    if bytes > isize::MAX as usize {
        return Err(TableError::CapacityOverflow);
    }
    Ok(n)
}

/// Owner of every bucket, plus the approximate overflow count of the
/// current array.
#[derive(Debug)]
pub(crate) struct BucketArena {
    buckets: SlotMap<BucketKey, Bucket>,
    arrays: SlotMap<ArrayKey, BucketArray>,
    noverflow: u16,
}

impl core::ops::Index<BucketKey> for BucketArena {
    type Output = Bucket;
    #[inline]
    fn index(&self, k: BucketKey) -> &Bucket {
        &self.buckets[k]
    }
}

impl core::ops::IndexMut<BucketKey> for BucketArena {
    #[inline]
    fn index_mut(&mut self, k: BucketKey) -> &mut Bucket {
        &mut self.buckets[k]
    }
}

impl core::ops::Index<ArrayKey> for BucketArena {
    type Output = BucketArray;
    #[inline]
    fn index(&self, k: ArrayKey) -> &BucketArray {
        &self.arrays[k]
    }
}

impl BucketArena {
    pub fn new() -> Self {
        Self {
            buckets: SlotMap::with_key(),
            arrays: SlotMap::with_key(),
            noverflow: 0,
        }
    }

    /// Build a complete array of `2^b` empty buckets. For `b >= 4` also
    /// preallocates `2^(b-4)` overflow buckets, about what the median
    /// number of entries for this size needs. Nothing is observable on
    /// error.
    pub fn alloc_array(&mut self, b: u8) -> Result<ArrayKey, TableError> {
        let n = check_size(b)?;
        let spare_n = if b >= 4 { bucket_shift(b - 4) } else { 0 };
        let mut primary = Vec::new();
        primary
            .try_reserve_exact(n)
            .map_err(|_| TableError::AllocError { buckets: n })?;
        let mut spare = Vec::new();
        spare
            .try_reserve_exact(spare_n)
            .map_err(|_| TableError::AllocError { buckets: spare_n })?;

        self.buckets.reserve(n + spare_n);
        primary.extend((0..n).map(|_| self.buckets.insert(Bucket::default())));
        spare.extend((0..spare_n).map(|_| self.buckets.insert(Bucket::default())));
        Ok(self.arrays.insert(BucketArray {
            b,
            primary,
            spare,
            pin: Rc::new(()),
        }))
    }

    /// Release an array with every chain and spare bucket it owns.
    pub fn free_array(&mut self, key: ArrayKey) {
        let Some(array) = self.arrays.remove(key) else {
            return;
        };
        debug_assert!(!array.is_pinned(), "freeing an array a cursor still reads");
        for head in array.primary {
            let mut next = Some(head);
            while let Some(k) = next {
                next = self.buckets.remove(k).and_then(|b| b.overflow);
            }
        }
        for k in array.spare {
            self.buckets.remove(k);
        }
    }

    /// Empty every bucket of `key` in place, dropping overflow chains and
    /// refilling the spare pool as a fresh array would have it.
    pub fn reset_array(&mut self, key: ArrayKey) {
        let array = &self.arrays[key];
        let b = array.b;
        let heads = array.primary.clone();
        let spare_n = if b >= 4 { bucket_shift(b - 4) } else { 0 };
        for head in heads {
            let bucket = &mut self.buckets[head];
            let mut next = bucket.overflow.take();
            *bucket = Bucket::default();
            while let Some(k) = next {
                next = self.buckets.remove(k).and_then(|b| b.overflow);
            }
        }
        let missing = spare_n.saturating_sub(self.arrays[key].spare.len());
        let fresh: Vec<BucketKey> = (0..missing)
            .map(|_| self.buckets.insert(Bucket::default()))
            .collect();
        self.arrays[key].spare.extend(fresh);
        self.noverflow = 0;
    }

    /// Link a new overflow bucket after `tail`, which must end a chain of
    /// array `array`. Takes a preallocated bucket when one is left.
    pub fn new_overflow(&mut self, array: ArrayKey, tail: BucketKey) -> BucketKey {
        debug_assert!(self.buckets[tail].overflow.is_none());
        let ovf = match self.arrays[array].spare.pop() {
            Some(k) => k,
            None => self.buckets.insert(Bucket::default()),
        };
        let b = self.arrays[array].b;
        self.incr_noverflow(b);
        self.buckets[tail].overflow = Some(ovf);
        ovf
    }

    /// Exact below B = 16. Above, counts with probability 1/2^(B-15), so
    /// that 2^15 still means "about as many overflow buckets as buckets".
    fn incr_noverflow(&mut self, b: u8) {
        if b < 16 {
            self.noverflow = self.noverflow.saturating_add(1);
            return;
        }
        let mask = (1u32 << (b - 15).min(31)) - 1;
        if rand::random::<u32>() & mask == 0 {
            self.noverflow = self.noverflow.saturating_add(1);
        }
    }

    pub fn noverflow(&self) -> u16 {
        self.noverflow
    }

    pub fn reset_noverflow(&mut self) {
        self.noverflow = 0;
    }

    /// Number of overflow buckets in use by `array` and its longest chain.
    pub fn chain_stats(&self, array: ArrayKey) -> (usize, usize) {
        let mut overflow = 0;
        let mut longest = 0;
        for &head in &self.arrays[array].primary {
            let mut len = 0;
            let mut next = Some(head);
            while let Some(k) = next {
                len += 1;
                next = self.buckets[k].overflow;
            }
            overflow += len - 1;
            longest = longest.max(len);
        }
        (overflow, longest)
    }

    /// Every bucket held by the arena, spares and retired arrays included.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[cfg(test)]
    pub fn array_count(&self) -> usize {
        self.arrays.len()
    }
}

/// Mark `tail` and every slot before it as `EmptyRest` while they are
/// empty, walking back across overflow boundaries to the chain head. Called
/// after slot `i` of `bucket` became empty.
pub(crate) fn propagate_empty_rest(
    arena: &mut BucketArena,
    head: BucketKey,
    mut bucket: BucketKey,
    mut i: usize,
) {
    // Only a slot whose successor is EmptyRest may become EmptyRest.
    let next_is_rest = if i == BUCKET_CNT - 1 {
        match arena[bucket].overflow {
            Some(ovf) => arena[ovf].tags[0] == Tag::EMPTY_REST,
            None => true,
        }
    } else {
        arena[bucket].tags[i + 1] == Tag::EMPTY_REST
    };
    if !next_is_rest {
        return;
    }
    loop {
        arena[bucket].tags[i] = Tag::EMPTY_REST;
        if i == 0 {
            if bucket == head {
                break;
            }
            // Find the predecessor of `bucket` in the chain.
            let current = bucket;
            bucket = head;
            while arena[bucket].overflow != Some(current) {
                match arena[bucket].overflow {
                    Some(next) => bucket = next,
                    None => unreachable!("bucket is not in its own chain"),
                }
            }
            i = BUCKET_CNT - 1;
        } else {
            i -= 1;
        }
        if arena[bucket].tags[i] != Tag::EMPTY_ONE {
            break;
        }
    }
}
