//! chained-hashmap: A single-threaded hash map with chained 8-slot buckets,
//! incremental growth, and iteration that survives growth.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a hash table whose resizing is paced across mutations instead
//!   of stopping the world, with iterators that stay correct while the map
//!   changes underneath them.
//! - Layers:
//!   - `tag` / `bucket`: per-slot tag bytes, 8-slot buckets, bucket arrays
//!     and overflow chains, all addressed by generational handles.
//!   - `RawTable<K, V, O>`: table header and mutation engine (insert,
//!     update, delete, clear), plus growth (`grow`) and walks (`iter`).
//!   - `ChainedHashMap<K, V, O>`: public API; adds the debug writing flag,
//!     cursor identity and the std-style trait surface.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` (cursor pins are `Rc`s).
//! - No `unsafe`: buckets and entries live in `slotmap` arenas and chains
//!   link by key, so stale handles fail loudly instead of dangling.
//! - Bounded work per call: a mutation evacuates at most two old buckets.
//! - Keys are unique; inserting an existing key overwrites its value.
//!
//! Buckets and tags
//! - Each bucket has 8 slots. A slot's tag is the top byte of the key's
//!   hash, or one of five reserved states: `EmptyRest` (this slot and all
//!   later ones in the chain are empty), `EmptyOne`, and the evacuation
//!   marks `MovedLow`, `MovedHigh`, `MovedEmpty`. Hash tags below the
//!   reserved range are shifted up by 5.
//! - Lookups compare tags first and stop scanning at `EmptyRest`.
//!
//! Growth
//! - Inserting a new key grows the table when the load would exceed 6.5
//!   entries per bucket (doubling), or when there are about as many
//!   overflow buckets as primary ones (same-size rebuild).
//! - The new array is built in full before the swap. Each later insert or
//!   remove evacuates the old bucket it is about to touch and the one at
//!   the evacuation cursor; lookups read the old bucket until it moves.
//!
//! Iteration
//! - Walks start at a random bucket and in-bucket offset. A walk that runs
//!   over the new array of an unfinished growth reads unevacuated buckets
//!   from the old array and keeps only the keys bound for the bucket being
//!   visited.
//! - `Iter` borrows the map. `Cursor` does not: the arrays it reads are
//!   pinned and retired instead of freed until it is done or dropped.
//!
//! Key capabilities
//! - `KeyOps` supplies seeded hashing and equality. `StdKeys` covers any
//!   `Hash + Eq` key; `FloatKeys` covers floats, whose NaN never equals
//!   itself and whose `0.0`/`-0.0` compare equal.
//!
//! Misuse detection
//! - Debug builds track a writing flag: reading, stepping a cursor or
//!   writing while a mutation is in flight (reachable only through user
//!   `KeyOps` code and raw pointers) panics. Release builds skip it.
//!
//! Notes and non-goals
//! - The bucket array never shrinks; `clear` keeps its size.
//! - Keys and values larger than 128 bytes are boxed in the entry arena.

mod bucket;
mod chained_hash_map;
mod entry;
mod error;
mod grow;
mod iter;
mod key_ops;
mod raw_table;
mod reentrancy;
mod table_proptest;
mod tag;

// Public surface
pub use chained_hash_map::ChainedHashMap;
pub use error::TableError;
pub use iter::{Cursor, Iter};
pub use key_ops::{FloatKeys, KeyOps, StdKeys};
pub use raw_table::TableStats;
