//! Slot tags: one byte per slot carrying either hash bits or slot state.
//!
//! Values below `MIN_HASH` are reserved. A full slot stores the top byte of
//! its key's hash, bumped out of the reserved range, so a tag comparison
//! rejects most non-matching keys without calling `eq`.

/// Slots per bucket.
pub(crate) const BUCKET_CNT: usize = 8;

const EMPTY_REST: u8 = 0;
const EMPTY_ONE: u8 = 1;
const MOVED_LOW: u8 = 2;
const MOVED_HIGH: u8 = 3;
const MOVED_EMPTY: u8 = 4;
const MIN_HASH: u8 = 5;

/// Destination half of a doubling evacuation. `Low` keeps the old bucket
/// index, `High` adds the old bucket count.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Half {
    Low = 0,
    High = 1,
}

impl Half {
    #[inline]
    pub fn from_bit(bit: bool) -> Half {
        if bit {
            Half::High
        } else {
            Half::Low
        }
    }
}

/// Decoded view of a tag.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum SlotState {
    /// Empty, and so is every later slot in this bucket and its overflow chain.
    EmptyRest,
    /// Empty; later slots may be occupied.
    EmptyOne,
    /// Entry was evacuated to the given half of the new array.
    Moved(Half),
    /// Slot was empty when its bucket was evacuated.
    MovedEmpty,
    /// Occupied; carries hash bits.
    Full(u8),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub(crate) struct Tag(u8);

impl Tag {
    pub const EMPTY_REST: Tag = Tag(EMPTY_REST);
    pub const EMPTY_ONE: Tag = Tag(EMPTY_ONE);
    pub const MOVED_EMPTY: Tag = Tag(MOVED_EMPTY);

    /// Tag for a key with the given hash.
    #[inline]
    pub fn from_hash(hash: u64) -> Tag {
        let top = (hash >> 56) as u8;
        if top < MIN_HASH {
            Tag(top + MIN_HASH)
        } else {
            Tag(top)
        }
    }

    #[inline]
    pub fn moved(half: Half) -> Tag {
        match half {
            Half::Low => Tag(MOVED_LOW),
            Half::High => Tag(MOVED_HIGH),
        }
    }

    #[inline]
    pub fn state(self) -> SlotState {
        match self.0 {
            EMPTY_REST => SlotState::EmptyRest,
            EMPTY_ONE => SlotState::EmptyOne,
            MOVED_LOW => SlotState::Moved(Half::Low),
            MOVED_HIGH => SlotState::Moved(Half::High),
            MOVED_EMPTY => SlotState::MovedEmpty,
            top => SlotState::Full(top),
        }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 <= EMPTY_ONE
    }

    #[cfg(test)]
    pub fn is_full(self) -> bool {
        self.0 >= MIN_HASH
    }

    /// True for the three evacuation markers.
    #[inline]
    pub fn is_evacuated(self) -> bool {
        self.0 > EMPTY_ONE && self.0 < MIN_HASH
    }

    /// Direction bit for keys whose hash is not repeatable. `MOVED_LOW` and
    /// `MOVED_HIGH` differ in exactly this bit, so it survives evacuation.
    #[inline]
    pub fn low_bit(self) -> bool {
        self.0 & 1 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_tags_skip_reserved_range() {
        for top in 0u8..=255 {
            let tag = Tag::from_hash((top as u64) << 56 | 0xdead_beef);
            assert!(tag.is_full(), "top byte {top} produced a reserved tag");
            if top >= MIN_HASH {
                assert_eq!(tag.state(), SlotState::Full(top));
            } else {
                assert_eq!(tag.state(), SlotState::Full(top + MIN_HASH));
            }
        }
    }

    #[test]
    fn states_decode() {
        assert_eq!(Tag::EMPTY_REST.state(), SlotState::EmptyRest);
        assert_eq!(Tag::EMPTY_ONE.state(), SlotState::EmptyOne);
        assert_eq!(Tag::moved(Half::Low).state(), SlotState::Moved(Half::Low));
        assert_eq!(Tag::moved(Half::High).state(), SlotState::Moved(Half::High));
        assert_eq!(Tag::MOVED_EMPTY.state(), SlotState::MovedEmpty);
        assert_eq!(Tag::default(), Tag::EMPTY_REST);
    }

    #[test]
    fn classification() {
        assert!(Tag::EMPTY_REST.is_empty());
        assert!(Tag::EMPTY_ONE.is_empty());
        assert!(!Tag::MOVED_EMPTY.is_empty());
        for t in [Tag::moved(Half::Low), Tag::moved(Half::High), Tag::MOVED_EMPTY] {
            assert!(t.is_evacuated());
            assert!(!t.is_full());
        }
        assert!(!Tag::from_hash(0).is_evacuated());
    }

    #[test]
    fn moved_tags_keep_direction_bit() {
        assert!(!Tag::moved(Half::Low).low_bit());
        assert!(Tag::moved(Half::High).low_bit());
        assert_eq!(Half::from_bit(Tag::moved(Half::High).low_bit()), Half::High);
    }
}
