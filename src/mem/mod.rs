//! Module implement a rank indexed btree, fully held in memory.
//!
//! [Index] keeps its nodes in an arena owned by the index, freed
//! nodes are recycled before new ones are allocated. Along with
//! every child link the index maintains the subtree element count
//! and the running rank-offset, so that all three access styles,
//! key lookup, positional lookup and cursor iteration, run in
//! O(log n).
//!
//! **Inventory of features**
//!
//! * Parametrised over element type `T` and comparator group `G`.
//! * Key ordered access through an application comparator, grouped
//!   comparators can coarsen the order per call.
//! * Positional access, `insert_at`, `put_at`, `remove_at`,
//!   `get_at`, `find_at`, `swap`.
//! * Duplicate keys with the multi-key option, insertion order is
//!   preserved within an equal range.
//! * Bidirectional cursor, `find_begin`, `find_end`, `find_lower`,
//!   `find_upper`, `iterate_next`, `iterate_prev`.
//! * Reference counting hooks, invoked on transfer-in/out.
//! * Serialization, `write`/`write_fixed`/`read` round-trip the
//!   whole tree without touching the rebalancer.
//!
//! Typical workflow:
//!
//! ```ignore
//! let mut index = mem::Index::with_cmp("users", 64, (), |a: &u64, b: &u64, _: &()| a.cmp(b))?;
//! index.insert(10)?;
//! index.insert(20)?;
//! assert_eq!(index.get_at(1)?, &20);
//! let mut cursor = index.find_begin();
//! index.iterate_next(&mut cursor)?;
//! ```

mod index;
mod iter;
mod node;
mod ser;

pub use index::{CmpFn, HookFn, Index, SizeFn, Stats, SubFn};
pub use iter::{Cursor, Iter};
