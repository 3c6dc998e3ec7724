//! Entry storage.
//!
//! Buckets only hold entry handles. Keys and values live in the entry
//! arena, boxed when larger than `MAX_INLINE_SIZE` so that one oversized
//! type does not inflate every arena slot.

use core::mem;
use core::ops::{Deref, DerefMut};

slotmap::new_key_type! {
    /// Handle to an entry in the entry arena.
    pub(crate) struct EntryKey;
}

/// Keys or values larger than this are stored behind a `Box`.
pub(crate) const MAX_INLINE_SIZE: usize = 128;

pub(crate) enum Stored<T> {
    Inline(T),
    Boxed(Box<T>),
}

impl<T> Stored<T> {
    pub const INDIRECT: bool = mem::size_of::<T>() > MAX_INLINE_SIZE;

    #[inline]
    pub fn new(v: T) -> Self {
        if Self::INDIRECT {
            Stored::Boxed(Box::new(v))
        } else {
            Stored::Inline(v)
        }
    }

    #[inline]
    pub fn into_inner(self) -> T {
        match self {
            Stored::Inline(v) => v,
            Stored::Boxed(b) => *b,
        }
    }

    /// Overwrite in place, keeping any existing box.
    #[inline]
    pub fn replace(&mut self, v: T) -> T {
        mem::replace(&mut **self, v)
    }

    #[cfg(test)]
    pub fn is_boxed(&self) -> bool {
        matches!(self, Stored::Boxed(_))
    }
}

impl<T> Deref for Stored<T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        match self {
            Stored::Inline(v) => v,
            Stored::Boxed(b) => b,
        }
    }
}

impl<T> DerefMut for Stored<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        match self {
            Stored::Inline(v) => v,
            Stored::Boxed(b) => b,
        }
    }
}

pub(crate) struct Entry<K, V> {
    pub key: Stored<K>,
    pub value: Stored<V>,
}

impl<K, V> Entry<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self {
            key: Stored::new(key),
            value: Stored::new(value),
        }
    }

    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    #[inline]
    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn into_pair(self) -> (K, V) {
        (self.key.into_inner(), self.value.into_inner())
    }
}
