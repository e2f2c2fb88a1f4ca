//! Module implement a rank indexed btree over record storage.
//!
//! [Index] runs the same algorithms as [crate::mem::Index], but
//! every node lives as a fixed-length record inside a [RecordStore],
//! a transactional store of records keyed by monotonically
//! increasing record numbers. Record number 1 holds the index
//! header, `magic, version, order, element-size, options, root,
//! free-list head, max-recno`. Nodes are packed little-endian.
//!
//! Node buffers are held in a small bounded [cache](Config::set_cache_buffers),
//! three buffers suffice for any single operation. Buffers touched
//! by a mutation are marked dirty and written back on eviction, on
//! [Index::flush] and on drop. Compound operations pin the buffers
//! they hold across cache calls, pinned buffers are never evicted.
//!
//! Because a cached parent buffer can be evicted any time, nodes do
//! not carry their slot position within the parent. Instead every
//! node stores a child-index-map, a compact array sorted by child
//! record number, from which the slot of a given child is recovered
//! by binary search.
//!
//! Freed nodes go on a doubly linked free list threaded through the
//! free records themselves and are reused before the store grows.
//! [Index::trim] erases trailing free records, [Index::defrag]
//! compacts the store until no free record remains.
//!
//! **Inventory of features**
//!
//! * Elements are opaque byte strings of a fixed, per-index size.
//! * Key ordered access through an application comparator over the
//!   element bytes.
//! * Positional access, `insert_at`, `put_at`, `update`,
//!   `remove_at`, `get_at`, `find_at`.
//! * Duplicate keys with the multi-key option.
//! * Bidirectional cursor with `iterate_refresh` to re-resolve the
//!   element copy after cache traffic.
//! * Read-only handles, `reload` for post-abort resynchronization.
//!
//! Typical workflow:
//!
//! ```ignore
//! let mut config = dbt::Config::new("events", 64, 8);
//! config.set_cache_buffers(25);
//! let cmp: Arc<dbt::CmpFn> = Arc::new(|a, b| a.cmp(b));
//! let mut index = dbt::Index::create_in(dir, config, Some(cmp))?;
//! index.insert(&42_u64.to_be_bytes())?;
//! index.flush()?;
//! ```

pub(crate) mod buf;
mod cache;
mod config;
mod files;
mod index;
mod node;
mod store;

pub use config::{
    to_index_location, Config, DEFAULT_CACHE_BUFFERS, MAX_NAME_LEN, MIN_CACHE_BUFFERS,
};
pub use files::{FileStore, IndexFileName};
pub use index::{CmpFn, Cursor, HookFn, Index, Stats};
pub use node::{Link, REC_HEADER, REC_NULL};
pub use store::{MemStore, RecordStore};
