#![cfg(test)]

// Property tests for ChainedHashMap kept inside the crate so every step can
// check the bucket chains, not only the public answers.

use crate::chained_hash_map::ChainedHashMap;
use crate::iter::Cursor;
use crate::key_ops::{FloatKeys, KeyOps, StdKeys};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::{BuildHasher, Hash, Hasher};

#[derive(Clone, Debug)]
enum Op {
    Insert(u16, i32),
    Remove(u16),
    Get(u16),
    Clear,
    Iterate,
    StartCursor,
    Step(u8),
    InsertNan,
}

// Small key domain so removes and overwrites hit; weights keep clears rare
// enough for the table to grow between them.
fn arb_ops(keys: u16) -> impl Strategy<Value = Vec<Op>> {
    let key = 0..keys;
    let op = prop_oneof![
        40 => (key.clone(), any::<i32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        15 => key.clone().prop_map(Op::Remove),
        10 => key.prop_map(Op::Get),
        1 => Just(Op::Clear),
        2 => Just(Op::Iterate),
        2 => Just(Op::StartCursor),
        10 => any::<u8>().prop_map(Op::Step),
    ];
    proptest::collection::vec(op, 1..600)
}

/// A cursor under observation: entries present since it started and never
/// removed must come out exactly once. `T` tells entries apart.
struct Tracked<T> {
    cursor: Cursor,
    stable: HashSet<T>,
    yielded: HashMap<T, usize>,
}

impl<T: Copy + Eq + Hash> Tracked<T> {
    fn start<K, V, O>(sut: &ChainedHashMap<K, V, O>, model: &HashMap<T, V>) -> Self {
        Tracked {
            cursor: sut.cursor(),
            stable: model.keys().copied().collect(),
            yielded: HashMap::new(),
        }
    }
}

fn step<K, V, O, T>(
    t: &mut Tracked<T>,
    sut: &ChainedHashMap<K, V, O>,
    model: &HashMap<T, V>,
    n: usize,
    id: impl Fn(&K, &V) -> T,
) -> Result<(), TestCaseError>
where
    O: KeyOps<K>,
    V: Debug + PartialEq,
    T: Copy + Debug + Eq + Hash,
{
    for _ in 0..n {
        let Some((k, v)) = t.cursor.next(sut) else {
            break;
        };
        let e = id(k, v);
        prop_assert_eq!(model.get(&e), Some(v), "cursor yielded a stale binding for {:?}", e);
        *t.yielded.entry(e).or_insert(0) += 1;
    }
    Ok(())
}

fn finish<K, V, O, T>(
    mut t: Tracked<T>,
    sut: &ChainedHashMap<K, V, O>,
    model: &HashMap<T, V>,
    id: impl Fn(&K, &V) -> T,
) -> Result<(), TestCaseError>
where
    O: KeyOps<K>,
    V: Debug + PartialEq,
    T: Copy + Debug + Eq + Hash,
{
    step(&mut t, sut, model, usize::MAX, id)?;
    prop_assert!(t.cursor.is_done());
    for e in &t.stable {
        prop_assert_eq!(t.yielded.get(e).copied().unwrap_or(0), 1, "stable entry {:?}", e);
    }
    Ok(())
}

fn key_id(k: &u16, _: &i32) -> u16 {
    *k
}

fn run<O: KeyOps<u16> + Default>(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut sut: ChainedHashMap<u16, i32, O> = ChainedHashMap::with_ops(O::default());
    let mut model: HashMap<u16, i32> = HashMap::new();
    let mut tracked: Option<Tracked<u16>> = None;

    for op in ops {
        match op {
            Op::Insert(k, v) => {
                prop_assert_eq!(sut.insert(k, v), model.insert(k, v));
            }
            Op::Remove(k) => {
                prop_assert_eq!(sut.remove(&k), model.remove(&k));
                if let Some(t) = tracked.as_mut() {
                    t.stable.remove(&k);
                }
            }
            Op::Get(k) => {
                prop_assert_eq!(sut.get(&k), model.get(&k));
            }
            Op::Clear => {
                sut.clear();
                model.clear();
                if let Some(t) = tracked.as_mut() {
                    t.stable.clear();
                }
            }
            Op::Iterate => {
                let it = sut.iter();
                prop_assert_eq!(it.len(), model.len());
                let mut seen = HashMap::new();
                for (k, v) in it {
                    prop_assert!(seen.insert(*k, *v).is_none(), "key {} yielded twice", k);
                }
                prop_assert_eq!(&seen, &model);
            }
            Op::StartCursor => {
                if let Some(t) = tracked.take() {
                    finish(t, &sut, &model, key_id)?;
                }
                tracked = Some(Tracked::start(&sut, &model));
            }
            Op::Step(n) => {
                if let Some(t) = tracked.as_mut() {
                    step(t, &sut, &model, n as usize, key_id)?;
                }
            }
            Op::InsertNan => unreachable!("u16 keys have no NaN"),
        }
        sut.raw.assert_invariants();
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }

    if let Some(t) = tracked.take() {
        finish(t, &sut, &model, key_id)?;
    }
    for (k, v) in &model {
        prop_assert_eq!(sut.get(k), Some(v));
    }
    Ok(())
}

fn arb_float_ops(keys: u16) -> impl Strategy<Value = Vec<Op>> {
    let key = 0..keys;
    let op = prop_oneof![
        30 => (key.clone(), any::<i32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        15 => Just(Op::InsertNan),
        12 => key.clone().prop_map(Op::Remove),
        8 => key.prop_map(Op::Get),
        1 => Just(Op::Clear),
        2 => Just(Op::Iterate),
        3 => Just(Op::StartCursor),
        10 => any::<u8>().prop_map(Op::Step),
    ];
    proptest::collection::vec(op, 1..600)
}

/// Float map entries: finite keys by value, NaN keys by the value stored
/// with them.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
enum FloatId {
    Finite(u16),
    Nan(i32),
}

fn float_id(k: &f64, v: &i32) -> FloatId {
    if k.is_nan() {
        FloatId::Nan(*v)
    } else {
        FloatId::Finite(*k as u16)
    }
}

// NaN keys never match a lookup or remove and get unrepeatable hashes, so
// growth routes them by tag bit while cursors are out.
fn run_float(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut sut: ChainedHashMap<f64, i32, FloatKeys> =
        ChainedHashMap::with_ops(FloatKeys::default());
    let mut model: HashMap<FloatId, i32> = HashMap::new();
    let mut tracked: Option<Tracked<FloatId>> = None;
    let mut next_nan = 0i32;

    for op in ops {
        match op {
            Op::Insert(k, v) => {
                prop_assert_eq!(sut.insert(f64::from(k), v), model.insert(FloatId::Finite(k), v));
            }
            Op::InsertNan => {
                prop_assert_eq!(sut.insert(f64::NAN, next_nan), None);
                model.insert(FloatId::Nan(next_nan), next_nan);
                next_nan += 1;
            }
            Op::Remove(k) => {
                let id = FloatId::Finite(k);
                prop_assert_eq!(sut.remove(&f64::from(k)), model.remove(&id));
                prop_assert_eq!(sut.remove(&f64::NAN), None);
                if let Some(t) = tracked.as_mut() {
                    t.stable.remove(&id);
                }
            }
            Op::Get(k) => {
                prop_assert_eq!(sut.get(&f64::from(k)), model.get(&FloatId::Finite(k)));
                prop_assert_eq!(sut.get(&f64::NAN), None);
            }
            Op::Clear => {
                sut.clear();
                model.clear();
                if let Some(t) = tracked.as_mut() {
                    t.stable.clear();
                }
            }
            Op::Iterate => {
                let mut seen = HashMap::new();
                for (k, v) in sut.iter() {
                    let id = float_id(k, v);
                    prop_assert!(seen.insert(id, *v).is_none(), "{:?} yielded twice", id);
                }
                prop_assert_eq!(&seen, &model);
            }
            Op::StartCursor => {
                if let Some(t) = tracked.take() {
                    finish(t, &sut, &model, float_id)?;
                }
                tracked = Some(Tracked::start(&sut, &model));
            }
            Op::Step(n) => {
                if let Some(t) = tracked.as_mut() {
                    step(t, &sut, &model, n as usize, float_id)?;
                }
            }
        }
        sut.raw.assert_invariants();
        prop_assert_eq!(sut.len(), model.len());
    }

    if let Some(t) = tracked.take() {
        finish(t, &sut, &model, float_id)?;
    }
    Ok(())
}

// Every key hashes alike: one chain, all tags equal, equality decides.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Property: model equivalence against std HashMap with structural
// invariants after every op, plus exactly-once delivery for cursors that
// are stepped while the map grows, shrinks and is cleared underneath them.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine(ops in arb_ops(256)) {
        run::<StdKeys>(ops)?;
    }

    #[test]
    fn prop_state_machine_all_collide(ops in arb_ops(64)) {
        run::<StdKeys<ConstBuildHasher>>(ops)?;
    }

    #[test]
    fn prop_state_machine_float_keys(ops in arb_float_ops(64)) {
        run_float(ops)?;
    }
}
