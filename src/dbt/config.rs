use std::{ffi, path};

use crate::{
    dbt::{files::IndexFileName, node::Layout},
    opts, Result,
};

/// Minimum number of cache buffers, split/concatenate need three
/// simultaneously pinned nodes.
pub const MIN_CACHE_BUFFERS: usize = 3;
/// Default number of cache buffers.
pub const DEFAULT_CACHE_BUFFERS: usize = 25;
/// Longest accepted index name.
pub const MAX_NAME_LEN: usize = 256;

/// Compose a path to the index file identified by unique `name`
/// under `dir`.
pub fn to_index_location(dir: &ffi::OsStr, name: &str) -> ffi::OsString {
    let loc: path::PathBuf = [
        dir.to_os_string(),
        IndexFileName::from(name.to_string()).into(),
    ]
    .iter()
    .collect();
    loc.into_os_string()
}

/// Configuration for creating a record-storage btree index.
///
/// Geometry, `order` and `element_size`, and the option bits are
/// persisted in the index header. The cache size is per handle.
#[derive(Clone, Debug)]
pub struct Config {
    /// name of the index.
    pub name: String,
    /// Branching factor, maximum number of children per node.
    ///
    /// Must be at least 3.
    pub order: usize,
    /// Number of bytes of every element.
    pub element_size: usize,
    /// Number of node buffers held by the cache.
    ///
    /// Default: [DEFAULT_CACHE_BUFFERS]
    pub cache_buffers: usize,
    pub(crate) options: u32,
}

impl Config {
    pub fn new(name: &str, order: usize, element_size: usize) -> Config {
        Config {
            name: name.to_string(),
            order,
            element_size,
            cache_buffers: DEFAULT_CACHE_BUFFERS,
            options: 0,
        }
    }

    /// Configure the number of node buffers held in memory, at least
    /// [MIN_CACHE_BUFFERS].
    pub fn set_cache_buffers(&mut self, cache_buffers: usize) -> &mut Self {
        self.cache_buffers = cache_buffers;
        self
    }

    /// Allow the same key multiple times.
    pub fn set_multi_key(&mut self) -> &mut Self {
        self.options |= opts::MULTI_KEY;
        self
    }

    /// With multi-key, insert new duplicates at the lower end of the
    /// equal range.
    pub fn set_insert_lower(&mut self) -> &mut Self {
        self.options |= opts::INSERT_LOWER;
        self
    }

    /// Allow positional insert/replace while a comparator is
    /// configured.
    pub fn set_allow_index(&mut self) -> &mut Self {
        self.options |= opts::ALLOW_INDEX;
        self
    }

    /// Length of one node record for this geometry.
    pub fn to_node_size(&self) -> usize {
        let layout = Layout {
            order: self.order,
            element_size: self.element_size,
        };
        layout.node_size()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.len() > MAX_NAME_LEN {
            err_at!(InvalidInput, msg: "name longer than {}", MAX_NAME_LEN)?;
        }
        if self.order < 3 {
            err_at!(InvalidInput, msg: "order {} too small", self.order)?;
        }
        if self.element_size == 0 {
            err_at!(InvalidInput, msg: "element size cannot be zero")?;
        }
        if self.cache_buffers < MIN_CACHE_BUFFERS {
            err_at!(InvalidInput, msg: "at least {} cache buffers", MIN_CACHE_BUFFERS)?;
        }
        if self.options & opts::INSERT_LOWER != 0 && self.options & opts::MULTI_KEY == 0 {
            err_at!(InvalidInput, msg: "insert-lower requires multi-key")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
