//! Key capabilities: seeded hashing and equality.
//!
//! The map never calls `Hash`/`Eq` directly; it goes through a `KeyOps`
//! value so that key types with unusual equality (floats) can describe
//! themselves. Lookups may use a borrowed form `Q` of the stored key `K`;
//! as with `Borrow`, `KeyOps<Q>` must hash and compare a borrowed key
//! exactly as `KeyOps<K>` does the owned one.

use core::hash::{BuildHasher, Hash, Hasher};
use hashbrown::hash_map::DefaultHashBuilder;

pub trait KeyOps<Q: ?Sized> {
    /// Every key equals itself. When false, keys for which `eq(k, k)` fails
    /// (NaN) can never be found again, and their hash is not repeatable.
    const REFLEXIVE: bool = true;

    /// Overwriting an existing entry also replaces the stored key with the
    /// one passed to `insert` (for keys that are equal but not identical,
    /// like `0.0` and `-0.0`).
    const KEY_UPDATE: bool = false;

    /// `hash` may panic for some keys. Lookups on an empty map then still
    /// hash the key, so the panic does not depend on the map's contents.
    const HASH_MAY_PANIC: bool = false;

    /// Must return the same value for equal keys under the same seed, and
    /// for a stored key every time it is asked (non-reflexive keys aside).
    /// A panic here while the map is growing leaves the bucket being moved
    /// as it was; the move is retried by the next insert or remove.
    fn hash(&self, key: &Q, seed: u64) -> u64;

    fn eq(&self, a: &Q, b: &Q) -> bool;
}

/// `KeyOps` for any `Hash + Eq` key, built on a `BuildHasher`.
#[derive(Clone, Debug, Default)]
pub struct StdKeys<S = DefaultHashBuilder> {
    build_hasher: S,
}

impl<S> StdKeys<S> {
    pub fn with_hasher(build_hasher: S) -> Self {
        Self { build_hasher }
    }

    /// The `BuildHasher` every key is hashed with.
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }
}

impl<Q, S> KeyOps<Q> for StdKeys<S>
where
    Q: ?Sized + Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn hash(&self, key: &Q, seed: u64) -> u64 {
        let mut h = self.build_hasher.build_hasher();
        h.write_u64(seed);
        key.hash(&mut h);
        h.finish()
    }

    #[inline]
    fn eq(&self, a: &Q, b: &Q) -> bool {
        a == b
    }
}

/// `KeyOps` for `f32`/`f64` keys with IEEE equality: NaN never equals
/// itself (each inserted NaN is a distinct entry), and `0.0 == -0.0`.
#[derive(Clone, Debug, Default)]
pub struct FloatKeys<S = DefaultHashBuilder> {
    build_hasher: S,
}

impl<S> FloatKeys<S> {
    pub fn with_hasher(build_hasher: S) -> Self {
        Self { build_hasher }
    }
}

macro_rules! float_key_ops {
    ($t:ty) => {
        impl<S: BuildHasher> KeyOps<$t> for FloatKeys<S> {
            const REFLEXIVE: bool = false;
            const KEY_UPDATE: bool = true;

            fn hash(&self, key: &$t, seed: u64) -> u64 {
                if key.is_nan() {
                    // Unrepeatable on purpose: NaNs spread over all buckets.
                    return rand::random();
                }
                // +0.0 and -0.0 compare equal and must hash alike.
                let bits = if *key == 0.0 { 0 } else { key.to_bits() };
                let mut h = self.build_hasher.build_hasher();
                h.write_u64(seed);
                bits.hash(&mut h);
                h.finish()
            }

            #[inline]
            fn eq(&self, a: &$t, b: &$t) -> bool {
                a == b
            }
        }
    };
}

float_key_ops!(f32);
float_key_ops!(f64);
