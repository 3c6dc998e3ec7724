// Misuse detection as seen from the public API.
//
// User `KeyOps` code runs while a mutation is in flight. A panic there must
// not leave the map flagged as being written, and reads, writes and cursors
// must work normally once the panic has been caught.
use chained_hashmap::{ChainedHashMap, KeyOps, StdKeys};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Equality that panics while armed.
#[derive(Default)]
struct TrippingKeys {
    inner: StdKeys,
    armed: Cell<bool>,
}

impl KeyOps<u32> for TrippingKeys {
    fn hash(&self, key: &u32, seed: u64) -> u64 {
        self.inner.hash(key, seed)
    }

    fn eq(&self, a: &u32, b: &u32) -> bool {
        assert!(!self.armed.get(), "eq tripped");
        a == b
    }
}

#[test]
fn panicking_eq_during_insert_releases_the_flag() {
    let mut m = ChainedHashMap::with_ops(TrippingKeys::default());
    for k in 0..100u32 {
        m.insert(k, k);
    }
    m.ops().armed.set(true);
    // Overwriting an existing key must compare it.
    let res = catch_unwind(AssertUnwindSafe(|| {
        m.insert(5, 0);
    }));
    assert!(res.is_err());
    m.ops().armed.set(false);

    assert_eq!(m.insert(5, 50), Some(5));
    assert_eq!(m.get(&5), Some(&50));
    assert_eq!(m.remove(&6), Some(6));
    assert_eq!(m.len(), 99);
    let mut c = m.cursor();
    let mut n = 0;
    while c.next(&m).is_some() {
        n += 1;
    }
    assert_eq!(n, 99);
}

#[test]
fn panicking_eq_during_remove_releases_the_flag() {
    let mut m = ChainedHashMap::with_ops(TrippingKeys::default());
    for k in 0..20u32 {
        m.insert(k, k);
    }
    m.ops().armed.set(true);
    let res = catch_unwind(AssertUnwindSafe(|| m.remove(&3)));
    assert!(res.is_err());
    m.ops().armed.set(false);
    assert_eq!(m.remove(&3), Some(3));
    m.clear();
    assert!(m.is_empty());
}

// Values are handed back before their drop runs, so a drop that touches the
// map again (through a shared owner) sees a consistent map.
#[test]
fn removed_values_drop_outside_the_mutation() {
    use std::cell::RefCell;
    use std::rc::Rc;

    struct ReentrantDrop(Rc<RefCell<ChainedHashMap<u32, u32>>>);
    impl Drop for ReentrantDrop {
        fn drop(&mut self) {
            self.0.borrow_mut().insert(99, 99);
        }
    }

    let side = Rc::new(RefCell::new(ChainedHashMap::new()));
    let mut m: ChainedHashMap<u32, ReentrantDrop> = ChainedHashMap::new();
    m.insert(1, ReentrantDrop(side.clone()));
    drop(m.remove(&1));
    assert_eq!(side.borrow().get(&99), Some(&99));
}

/// Hashing that refuses key 13, declared through `HASH_MAY_PANIC`.
#[derive(Default)]
struct UnhashableThirteen(StdKeys);

impl KeyOps<u32> for UnhashableThirteen {
    const HASH_MAY_PANIC: bool = true;

    fn hash(&self, key: &u32, seed: u64) -> u64 {
        assert_ne!(*key, 13, "key 13 cannot be hashed");
        KeyOps::<u32>::hash(&self.0, key, seed)
    }

    fn eq(&self, a: &u32, b: &u32) -> bool {
        a == b
    }
}

// A key whose hash panics panics on lookup and remove even when the map is
// empty, and leaves nothing flagged behind.
#[test]
fn hash_panics_surface_on_an_empty_map() {
    let mut m: ChainedHashMap<u32, u32, UnhashableThirteen> =
        ChainedHashMap::with_ops(UnhashableThirteen::default());
    assert!(catch_unwind(AssertUnwindSafe(|| m.get(&13))).is_err());
    assert!(catch_unwind(AssertUnwindSafe(|| m.contains_key(&13))).is_err());
    assert!(catch_unwind(AssertUnwindSafe(|| m.remove(&13))).is_err());
    assert!(m.is_empty());

    // Other keys, writes included, still work.
    assert_eq!(m.get(&1), None);
    assert_eq!(m.remove(&1), None);
    assert_eq!(m.insert(1, 10), None);
    assert!(catch_unwind(AssertUnwindSafe(|| m.insert(13, 0))).is_err());
    assert_eq!(m.len(), 1);
    assert_eq!(m.remove(&1), Some(10));
    let mut c = m.cursor();
    assert!(c.next(&m).is_none());
}

/// Hashing that panics for keys below 1000 while armed.
#[derive(Default)]
struct TrippingHash {
    inner: StdKeys,
    armed: Cell<bool>,
}

impl KeyOps<u32> for TrippingHash {
    fn hash(&self, key: &u32, seed: u64) -> u64 {
        assert!(!(self.armed.get() && *key < 1000), "hash tripped");
        KeyOps::<u32>::hash(&self.inner, key, seed)
    }

    fn eq(&self, a: &u32, b: &u32) -> bool {
        a == b
    }
}

// A hash panic while a bucket is being moved to the grown array loses
// nothing: the move is redone by a later mutation.
#[test]
fn hash_panic_during_growth_keeps_every_entry() {
    let mut m = ChainedHashMap::with_ops(TrippingHash::default());
    let mut k = 0u32;
    while !(m.stats().growing && m.stats().log2_buckets >= 5) {
        m.insert(k, k);
        k += 1;
    }
    assert!(k < 1000);
    let before = m.len();

    // Fresh keys hash fine; moving any non-empty old bucket rehashes a
    // tripping key, and the growth cannot finish without doing so.
    m.ops().armed.set(true);
    let mut fresh = 5000u32;
    let tripped = loop {
        let res = catch_unwind(AssertUnwindSafe(|| m.insert(fresh, fresh)));
        if res.is_err() {
            break true;
        }
        fresh += 1;
        if !m.stats().growing {
            break false;
        }
    };
    assert!(tripped);
    m.ops().armed.set(false);
    // The key whose insert panicked was not added.
    assert_eq!(m.len(), before + (fresh - 5000) as usize);
    assert_eq!(m.get(&fresh), None);

    for j in 0..k {
        assert_eq!(m.get(&j), Some(&j), "key {j} lost");
    }
    let mut fresh = 2000;
    while m.stats().growing {
        m.insert(fresh, fresh);
        fresh += 1;
    }
    for j in 0..k {
        assert_eq!(m.get(&j), Some(&j), "key {j} lost after growth");
    }
    assert_eq!(m.iter().count(), m.len());
}
