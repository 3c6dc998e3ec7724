//! Debug-only writing flag.
//!
//! The map has a single logical owner. `&mut self` already rules out
//! overlapping mutation in safe code, but user code (`KeyOps`, `Hash`, `Eq`)
//! runs while the bucket chains are transiently inconsistent and could reach
//! back into the map through a raw pointer. In debug builds a mutation
//! raises the flag and every entry point checks it; a hit is fatal because
//! no invariant of the bucket chains can be trusted afterwards. In release
//! builds this compiles to a zero-cost no-op.

use core::cell::Cell;
use core::marker::PhantomData;

/// Per-map writing flag. Mutating entry points hold a guard from
/// `begin_write`; readers call `check_read`.
#[derive(Debug)]
pub struct WritingFlag {
    #[cfg(debug_assertions)]
    writing: Cell<bool>,
    // Keep !Send + !Sync in line with single-threaded design.
    _nosend: PhantomData<*mut ()>,
}

impl WritingFlag {
    pub const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            writing: Cell::new(false),
            _nosend: PhantomData,
        }
    }

    /// Mark a mutation in flight. In debug builds, panics if one already is.
    #[inline]
    pub fn begin_write(&self) -> WriteGuard<'_> {
        #[cfg(debug_assertions)]
        {
            assert!(!self.writing.get(), "concurrent map writes");
            self.writing.set(true);
            return WriteGuard { owner: self };
        }

        #[cfg(not(debug_assertions))]
        {
            return WriteGuard { _z: PhantomData };
        }
    }

    /// Lookups must not observe a map that is mid-mutation.
    #[inline]
    pub fn check_read(&self) {
        #[cfg(debug_assertions)]
        assert!(!self.writing.get(), "concurrent map read and map write");
    }

    #[inline]
    pub fn check_iter(&self) {
        #[cfg(debug_assertions)]
        assert!(!self.writing.get(), "concurrent map iteration and map write");
    }
}

impl Default for WritingFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `WritingFlag::begin_write`.
pub struct WriteGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a WritingFlag,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl<'a> Drop for WriteGuard<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            // Cleared on unwind too, so a panicking hash or Eq does not
            // leave the map permanently flagged.
            debug_assert!(self.owner.writing.get());
            self.owner.writing.set(false);
        }
    }
}
