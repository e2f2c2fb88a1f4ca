use std::{cmp::Ordering, ffi, sync::Arc};

use crate::{
    dbt::{
        buf,
        cache::Cache,
        config::{to_index_location, Config, MAX_NAME_LEN, MIN_CACHE_BUFFERS},
        files::FileStore,
        node::{
            Header, Layout, Link, OFF_FREE_MARKER, OFF_FREE_NEXT, OFF_FREE_PREV, REC_HEADER,
            REC_NULL, SIZE_LINK,
        },
        store::RecordStore,
    },
    opts, Result,
};

/// Comparator over stored elements. First argument is always the
/// stored element bytes, second the caller supplied key.
pub type CmpFn = dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync;

/// Reference counting hook, invoked on transfer-in (acquire) and
/// transfer-out (release) of an element.
pub type HookFn = dyn Fn(&[u8]) + Send + Sync;

// release pins before propagating an error out of a compound
// operation.
macro_rules! unpin_on_err {
    ($cache:expr, $res:expr $(, $slot:expr)*) => {
        match $res {
            Ok(val) => val,
            Err(err) => {
                $($cache.unpin($slot);)*
                return Err(err);
            }
        }
    };
}

/// Cursor into a record-storage [Index].
///
/// The cursor carries a copy of the element it points at. It stays
/// positioned across read operations on the same index, but after
/// any other operation the element copy may be stale, refresh it
/// with [Index::iterate_refresh].
#[derive(Clone, Debug)]
pub struct Cursor {
    pub(crate) node: u64,
    pub(crate) pos: usize,
    pub(crate) index: usize,
    pub(crate) found: bool,
    pub(crate) element: Option<Vec<u8>>,
}

impl Cursor {
    /// Rank of the element this cursor points at. For the end cursor
    /// this equals the number of elements in the index.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the search that produced this cursor observed an
    /// exact match.
    #[inline]
    pub fn is_found(&self) -> bool {
        self.found
    }

    /// Element bytes under the cursor, None for end cursors.
    #[inline]
    pub fn element(&self) -> Option<&[u8]> {
        self.element.as_deref()
    }
}

/// Index type, a rank indexed btree whose nodes live as fixed-length
/// records inside a [RecordStore], accessed through a bounded cache
/// of node buffers.
///
/// Elements are opaque byte strings of the configured
/// `element_size`. All mutations go through the cache, modified
/// buffers are written back on eviction, [Index::flush] or drop.
pub struct Index<S>
where
    S: RecordStore,
{
    name: String,
    layout: Layout,
    options: u32,
    rdonly: bool,
    cache_buffers: usize,

    root: u64,
    free_list: u64,
    max_recno: u64,

    store: S,
    cache: Cache,

    overflow_node: u64,
    overflow_element: Vec<u8>,
    overflow_link: Link,

    cmp: Option<Arc<CmpFn>>,
    acquire: Option<Arc<HookFn>>,
    release: Option<Arc<HookFn>>,
}

impl<S> Index<S>
where
    S: RecordStore,
{
    /// Create a new index inside `store`, which must be empty and
    /// sized for `config.to_node_size()` records. The header record
    /// lands at record number 1.
    pub fn create(config: Config, mut store: S, cmp: Option<Arc<CmpFn>>) -> Result<Index<S>> {
        config.validate()?;
        let layout = Layout {
            order: config.order,
            element_size: config.element_size,
        };
        if store.record_len() != layout.node_size() {
            err_at!(
                InvalidInput,
                msg: "store record length {} != node size {}",
                store.record_len(), layout.node_size()
            )?;
        }
        let mut options = config.options;
        if cmp.is_none() {
            options |= opts::NOCMP;
        }

        let header = Header {
            order: config.order,
            element_size: config.element_size,
            options,
            root: REC_NULL,
            free_list: REC_NULL,
            max_recno: REC_HEADER,
        };
        let mut record = vec![0_u8; layout.node_size()];
        header.encode(&mut record);
        let recno = store.append(&record)?;
        if recno != REC_HEADER {
            err_at!(IOError, msg: "header record landed at {}", recno)?;
        }

        Ok(Index {
            name: config.name,
            layout,
            options,
            rdonly: false,
            cache_buffers: config.cache_buffers,
            root: REC_NULL,
            free_list: REC_NULL,
            max_recno: REC_HEADER,
            store,
            cache: Cache::new(config.cache_buffers, layout.node_size()),
            overflow_node: REC_NULL,
            overflow_element: vec![0; layout.element_size],
            overflow_link: Link::default(),
            cmp,
            acquire: None,
            release: None,
        })
    }

    /// Open an existing index from `store`. `cmp` must be supplied
    /// iff the index was created with a comparator. With `rdonly`
    /// every mutation fails with [Error::ReadOnly].
    pub fn open(
        name: &str,
        mut store: S,
        cmp: Option<Arc<CmpFn>>,
        cache_buffers: usize,
        rdonly: bool,
    ) -> Result<Index<S>> {
        if name.len() > MAX_NAME_LEN {
            err_at!(InvalidInput, msg: "name longer than {}", MAX_NAME_LEN)?;
        }
        if cache_buffers < MIN_CACHE_BUFFERS {
            err_at!(InvalidInput, msg: "at least {} cache buffers", MIN_CACHE_BUFFERS)?;
        }

        let node_size = store.record_len();
        let mut record = vec![0_u8; node_size];
        store.get(REC_HEADER, &mut record)?;
        let header = Header::decode(&record)?;
        let layout = Layout {
            order: header.order,
            element_size: header.element_size,
        };
        if layout.node_size() != node_size {
            err_at!(
                InvalidFile,
                msg: "node size {} != record length {}",
                layout.node_size(), node_size
            )?;
        }
        let nocmp = header.options & opts::NOCMP != 0;
        if nocmp && cmp.is_some() {
            err_at!(InvalidInput, msg: "index {} has no comparator", name)?;
        } else if !nocmp && cmp.is_none() {
            err_at!(InvalidInput, msg: "index {} needs a comparator", name)?;
        }

        Ok(Index {
            name: name.to_string(),
            layout,
            options: header.options,
            rdonly,
            cache_buffers,
            root: header.root,
            free_list: header.free_list,
            max_recno: header.max_recno,
            store,
            cache: Cache::new(cache_buffers, node_size),
            overflow_node: REC_NULL,
            overflow_element: vec![0; layout.element_size],
            overflow_link: Link::default(),
            cmp,
            acquire: None,
            release: None,
        })
    }

    /// Configure the reference counting hooks, invoked when an
    /// element is transferred into, resp. out of, the index.
    pub fn set_refcount_hooks(&mut self, acquire: Arc<HookFn>, release: Arc<HookFn>) -> &mut Self {
        self.acquire = Some(acquire);
        self.release = Some(release);
        self
    }

    /// Return name of this index instance.
    #[inline]
    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    /// Return the branching factor of this index.
    #[inline]
    pub fn to_order(&self) -> usize {
        self.layout.order
    }

    /// Return the configured element size, in bytes.
    #[inline]
    pub fn to_element_size(&self) -> usize {
        self.layout.element_size
    }

    /// Return whether this handle is read-only.
    #[inline]
    pub fn is_rdonly(&self) -> bool {
        self.rdonly
    }
}

impl Index<FileStore> {
    /// Create a new index under `dir`, in a file named
    /// `"<name>.btree"`.
    pub fn create_in(
        dir: &ffi::OsStr,
        config: Config,
        cmp: Option<Arc<CmpFn>>,
    ) -> Result<Index<FileStore>> {
        config.validate()?;
        let loc = to_index_location(dir, &config.name);
        let store = FileStore::create(&loc, config.to_node_size())?;
        Index::create(config, store, cmp)
    }

    /// Open the index named `name` under `dir`.
    pub fn open_in(
        dir: &ffi::OsStr,
        name: &str,
        cmp: Option<Arc<CmpFn>>,
        cache_buffers: usize,
        rdonly: bool,
    ) -> Result<Index<FileStore>> {
        let loc = to_index_location(dir, name);
        let store = FileStore::open(&loc, rdonly)?;
        Index::open(name, store, cmp, cache_buffers, rdonly)
    }

    /// Return whether an index named `name` exists under `dir`.
    pub fn exists_in(dir: &ffi::OsStr, name: &str) -> bool {
        FileStore::exists(&to_index_location(dir, name))
    }
}

// small wrappers over the node layout, keyed by cache slot.
impl<S> Index<S>
where
    S: RecordStore,
{
    #[inline]
    fn fill_of(&self, slot: usize) -> usize {
        self.layout.fill(self.cache.data(slot))
    }

    #[inline]
    fn parent_of(&self, slot: usize) -> u64 {
        self.layout.parent(self.cache.data(slot))
    }

    #[inline]
    fn link_of(&self, slot: usize, i: usize) -> Link {
        self.layout.link(self.cache.data(slot), i)
    }

    #[inline]
    fn child_of(&self, slot: usize, i: usize) -> u64 {
        self.layout.link_child(self.cache.data(slot), i)
    }

    #[inline]
    fn element_of(&self, slot: usize, i: usize) -> &[u8] {
        self.layout.element(self.cache.data(slot), i)
    }

    #[inline]
    fn is_leaf_at(&self, slot: usize) -> bool {
        self.layout.is_leaf(self.cache.data(slot))
    }

    fn cimap_get_of(&self, slot: usize, child: u64) -> Result<usize> {
        match self.layout.cimap_get(self.cache.data(slot), child) {
            Some(index) => Ok(index),
            None => err_at!(Fatal, msg: "child {} missing in cimap", child),
        }
    }

    #[inline]
    fn cimap_put_of(&mut self, slot: usize, child: u64, index: usize) {
        self.layout.cimap_put(self.cache.data_mut(slot), child, index)
    }

    #[inline]
    fn cimap_remove_of(&mut self, slot: usize, child: u64) {
        self.layout.cimap_remove(self.cache.data_mut(slot), child)
    }

    fn check_writable(&self) -> Result<()> {
        if self.rdonly {
            err_at!(ReadOnly, msg: "index {} opened read-only", self.name)
        } else {
            Ok(())
        }
    }

    fn check_element(&self, element: &[u8]) -> Result<()> {
        if element.len() != self.layout.element_size {
            err_at!(
                InvalidInput,
                msg: "element length {} != {}", element.len(), self.layout.element_size
            )
        } else {
            Ok(())
        }
    }

    fn to_cmp(&self) -> Result<Arc<CmpFn>> {
        match &self.cmp {
            Some(cmp) => Ok(Arc::clone(cmp)),
            None => err_at!(InvalidInput, msg: "index {} has no comparator", self.name),
        }
    }

    // positional mutation is allowed without comparator, or with
    // comparator when the allow-index option is set.
    fn check_by_index(&self) -> Result<()> {
        if self.options & opts::NOCMP != 0 || self.options & opts::ALLOW_INDEX != 0 {
            Ok(())
        } else {
            err_at!(InvalidInput, msg: "index {} is keyed, positional mutation disabled", self.name)
        }
    }

    fn clear_overflow(&mut self) {
        self.overflow_node = REC_NULL;
        for b in self.overflow_element.iter_mut() {
            *b = 0;
        }
        self.overflow_link = Link::default();
    }

    fn update_header(&mut self) -> Result<()> {
        let header = Header {
            order: self.layout.order,
            element_size: self.layout.element_size,
            options: self.options,
            root: self.root,
            free_list: self.free_list,
            max_recno: self.max_recno,
        };
        let slot = self.cache.get(&mut self.store, REC_HEADER)?;
        header.encode(self.cache.data_mut(slot));
        Ok(())
    }

    // allocate a node record, popping the free list head or
    // appending a fresh record. The node's buffer is resident and
    // zeroed on return.
    fn alloc_node(&mut self) -> Result<u64> {
        let recno = if self.free_list == REC_NULL {
            let record = vec![0_u8; self.layout.node_size()];
            let recno = self.store.append(&record)?;
            self.max_recno = recno;
            self.cache.install(&mut self.store, recno, false)?;
            recno
        } else {
            let recno = self.free_list;
            let slot = self.cache.get(&mut self.store, recno)?;
            debug_assert!(buf::get_rec(self.cache.data(slot), OFF_FREE_MARKER) == REC_HEADER);
            let next = buf::get_rec(self.cache.data(slot), OFF_FREE_NEXT);
            self.free_list = next;
            {
                let data = self.cache.data_mut(slot);
                for b in data.iter_mut() {
                    *b = 0;
                }
            }
            if next != REC_NULL {
                let slot = self.cache.get(&mut self.store, next)?;
                buf::set_rec(self.cache.data_mut(slot), OFF_FREE_PREV, REC_NULL);
            }
            recno
        };
        self.update_header()?;
        Ok(recno)
    }

    // push `node` onto the free list, marking the record free by
    // writing the header record number into its parent field.
    fn free_node(&mut self, node: u64) -> Result<()> {
        if self.free_list != REC_NULL {
            let slot = self.cache.get(&mut self.store, self.free_list)?;
            buf::set_rec(self.cache.data_mut(slot), OFF_FREE_PREV, node);
        }
        let slot = self.cache.get(&mut self.store, node)?;
        {
            let data = self.cache.data_mut(slot);
            for b in data.iter_mut() {
                *b = 0;
            }
            buf::set_rec(data, OFF_FREE_MARKER, REC_HEADER);
            buf::set_rec(data, OFF_FREE_NEXT, self.free_list);
            buf::set_rec(data, OFF_FREE_PREV, REC_NULL);
        }
        self.free_list = node;
        self.update_header()
    }

    fn erase_node(&mut self, node: u64) -> Result<()> {
        self.store.del(node)
    }
}

// Search primitives, all top-down with a binary search per node.
impl<S> Index<S>
where
    S: RecordStore,
{
    fn search_lower<F>(&mut self, key: &[u8], cmp: F) -> Result<(u64, usize, bool)>
    where
        F: Fn(&[u8], &[u8]) -> Ordering,
    {
        let mut candidate = (REC_NULL, 0);
        let mut found = false;
        let mut cur = self.root;
        let mut prev = REC_NULL;
        let mut prev_fill = 0;

        while cur != REC_NULL {
            let slot = self.cache.get(&mut self.store, cur)?;
            let fill = self.fill_of(slot);
            let (mut l, mut u) = (0_isize, fill as isize - 1);
            prev = cur;
            prev_fill = fill;
            while l <= u {
                let m = l + (u - l) / 2;
                match cmp(self.element_of(slot, m as usize), key) {
                    Ordering::Less => l = m + 1,
                    ord => {
                        candidate = (cur, m as usize);
                        u = m - 1;
                        if ord == Ordering::Equal {
                            found = true;
                        }
                    }
                }
            }
            cur = self.child_of(slot, l as usize);
        }

        if candidate.0 == REC_NULL && prev != REC_NULL {
            // all element keys less than the requested key, select
            // the imaginary element after the rightmost leaf.
            candidate = (prev, prev_fill);
        }
        Ok((candidate.0, candidate.1, found))
    }

    fn search_upper<F>(&mut self, key: &[u8], cmp: F) -> Result<(u64, usize, bool)>
    where
        F: Fn(&[u8], &[u8]) -> Ordering,
    {
        let mut candidate = (REC_NULL, 0);
        let mut found = false;
        let mut cur = self.root;
        let mut prev = REC_NULL;
        let mut prev_fill = 0;

        while cur != REC_NULL {
            let slot = self.cache.get(&mut self.store, cur)?;
            let fill = self.fill_of(slot);
            let (mut l, mut u) = (0_isize, fill as isize - 1);
            prev = cur;
            prev_fill = fill;
            while l <= u {
                let m = l + (u - l) / 2;
                match cmp(self.element_of(slot, m as usize), key) {
                    Ordering::Greater => {
                        candidate = (cur, m as usize);
                        u = m - 1;
                    }
                    ord => {
                        if ord == Ordering::Equal {
                            found = true;
                        }
                        l = m + 1;
                    }
                }
            }
            cur = self.child_of(slot, l as usize);
        }

        if candidate.0 == REC_NULL && prev != REC_NULL {
            candidate = (prev, prev_fill);
        }
        Ok((candidate.0, candidate.1, found))
    }

    fn search_index(&mut self, index: usize) -> Result<(u64, usize, bool)> {
        let mut cur = self.root;
        let mut offset = 0_isize;
        let index = index as isize;

        while cur != REC_NULL {
            let slot = self.cache.get(&mut self.store, cur)?;
            let fill = self.fill_of(slot) as isize;
            let (mut l, mut u) = (0_isize, fill);
            let mut descended = false;
            while l <= u {
                let m = l + (u - l) / 2;
                let link = self.link_of(slot, m as usize);
                let c = link.count as isize;
                let o = offset + link.offset as isize;
                if o + c == index {
                    if m == fill && !self.is_leaf_at(slot) {
                        cur = link.child;
                        offset = o;
                        descended = true;
                        break;
                    } else {
                        return Ok((cur, m as usize, m < fill));
                    }
                } else if o > index {
                    u = m - 1;
                } else if o + c < index {
                    l = m + 1;
                } else {
                    cur = link.child;
                    offset = o;
                    descended = true;
                    break;
                }
            }
            if !descended {
                break;
            }
        }
        Ok((REC_NULL, 0, false))
    }

    fn to_index(&mut self, node: u64, pos: usize) -> Result<usize> {
        if node == REC_NULL {
            return Ok(0);
        }
        let mut node = node;
        let mut pos = pos;
        let slot = self.cache.get(&mut self.store, node)?;
        let mut index = self.link_of(slot, pos).count;
        loop {
            let slot = self.cache.get(&mut self.store, node)?;
            index += self.link_of(slot, pos).offset;
            let parent = self.parent_of(slot);
            if parent == REC_NULL {
                return Ok(index);
            }
            let pslot = self.cache.get(&mut self.store, parent)?;
            pos = self.cimap_get_of(pslot, node)?;
            node = parent;
        }
    }

    fn to_insert_before(&mut self, node: &mut u64, pos: &mut usize) -> Result<()> {
        if *node == REC_NULL {
            // all elements compare less, append at the rightmost slot.
            if self.root == REC_NULL {
                return Ok(());
            }
            let slot = self.cache.get(&mut self.store, self.root)?;
            *node = self.root;
            *pos = self.fill_of(slot);
        }
        let mut slot = self.cache.get(&mut self.store, *node)?;
        while !self.is_leaf_at(slot) {
            *node = self.child_of(slot, *pos);
            slot = self.cache.get(&mut self.store, *node)?;
            *pos = self.fill_of(slot);
        }
        Ok(())
    }

    fn to_next(&mut self, node_: &mut u64, pos_: &mut usize) -> Result<bool> {
        let mut node = *node_;
        let mut pos = *pos_;

        let mut slot = self.cache.get(&mut self.store, node)?;
        if pos == self.fill_of(slot) {
            return Ok(false);
        }
        pos += 1;
        // descend leftmost into the subtree right of the element.
        loop {
            let child = self.child_of(slot, pos);
            if child == REC_NULL {
                break;
            }
            node = child;
            slot = self.cache.get(&mut self.store, node)?;
            pos = 0;
        }
        // ascend
        while pos == self.fill_of(slot) {
            let child = node;
            node = self.parent_of(slot);
            if node == REC_NULL {
                // *node_ is the rightmost leaf, move to the
                // imaginary element after its end.
                *pos_ += 1;
                return Ok(true);
            }
            slot = self.cache.get(&mut self.store, node)?;
            pos = self.cimap_get_of(slot, child)?;
        }
        *node_ = node;
        *pos_ = pos;
        Ok(true)
    }

    fn to_prev(&mut self, node_: &mut u64, pos_: &mut usize) -> Result<bool> {
        let mut node = *node_;
        let mut pos = *pos_;

        let mut slot = self.cache.get(&mut self.store, node)?;
        // descend rightmost into the subtree left of the element.
        loop {
            let child = self.child_of(slot, pos);
            if child == REC_NULL {
                break;
            }
            node = child;
            slot = self.cache.get(&mut self.store, node)?;
            pos = self.fill_of(slot);
        }
        // ascend
        while pos == 0 {
            let child = node;
            node = self.parent_of(slot);
            if node == REC_NULL {
                return Ok(false);
            }
            slot = self.cache.get(&mut self.store, node)?;
            pos = self.cimap_get_of(slot, child)?;
        }
        pos -= 1;
        *node_ = node;
        *pos_ = pos;
        Ok(true)
    }
}

// Rebalancer. `adjust` drains the overflow slot and repairs
// underflowing nodes, one redistribute/split/concatenate per level.
impl<S> Index<S>
where
    S: RecordStore,
{
    #[inline]
    fn near_overflowing(&self, slot: usize) -> bool {
        self.fill_of(slot) == self.layout.order - 1
    }

    #[inline]
    fn underflowing(&self, slot: usize) -> bool {
        self.fill_of(slot) < self.layout.order / 2
    }

    // whether a sibling can lend an element and stay at or above
    // the minimum fill.
    #[inline]
    fn can_lend(&self, slot: usize) -> bool {
        self.fill_of(slot) > self.layout.order / 2
    }

    fn left_sibling(&self, parent_slot: usize, node: u64) -> Result<u64> {
        let child_index = self.cimap_get_of(parent_slot, node)?;
        if child_index == 0 {
            Ok(REC_NULL)
        } else {
            Ok(self.child_of(parent_slot, child_index - 1))
        }
    }

    fn right_sibling(&self, parent_slot: usize, node: u64) -> Result<u64> {
        let child_index = self.cimap_get_of(parent_slot, node)?;
        if child_index == self.fill_of(parent_slot) {
            Ok(REC_NULL)
        } else {
            Ok(self.child_of(parent_slot, child_index + 1))
        }
    }

    fn new_root(&mut self) -> Result<()> {
        let root = self.alloc_node()?;
        if self.root != REC_NULL {
            let old = self.root;
            let old_slot = self.cache.get(&mut self.store, old)?;
            self.cache.pin(old_slot);
            let root_slot =
                unpin_on_err!(self.cache, self.cache.get(&mut self.store, root), old_slot);

            let lay = self.layout;
            lay.set_parent(self.cache.data_mut(old_slot), root);
            self.cimap_put_of(root_slot, old, 0);
            let total = if self.overflow_node == old {
                self.overflow_link.offset + self.overflow_link.count
            } else {
                let fill = self.fill_of(old_slot);
                let link = self.link_of(old_slot, fill);
                link.offset + link.count
            };
            let link = Link { offset: 0, count: total, child: old };
            lay.set_link(self.cache.data_mut(root_slot), 0, &link);
            self.cache.unpin(old_slot);
        }
        self.root = root;
        self.update_header()
    }

    // split the overflowing node `l` into `l` and a fresh right
    // sibling, promoting the median into the parent. The parent may
    // in turn become the overflow owner.
    fn split(&mut self, l: u64) -> Result<()> {
        let lay = self.layout;
        let order = lay.order;
        let esz = lay.element_size;
        let sidx = order / 2;

        debug_assert!(l == self.overflow_node);
        debug_assert!(l != self.root);

        let l_slot = self.cache.get(&mut self.store, l)?;
        self.cache.pin(l_slot);
        let l_fill = self.fill_of(l_slot);
        let p = self.parent_of(l_slot);
        debug_assert!(l_fill == order - 1);

        let p_slot = unpin_on_err!(self.cache, self.cache.get(&mut self.store, p), l_slot);
        self.cache.pin(p_slot);
        let mut p_fill = self.fill_of(p_slot);
        let l_child_index =
            unpin_on_err!(self.cache, self.cimap_get_of(p_slot, l), l_slot, p_slot);

        let r = unpin_on_err!(self.cache, self.alloc_node(), l_slot, p_slot);
        let r_slot = unpin_on_err!(self.cache, self.cache.get(&mut self.store, r), l_slot, p_slot);
        self.cache.pin(r_slot);
        let r_fill = l_fill - sidx;
        let r_child_index = l_child_index + 1;

        // move the parked overflow element/link to the back of the
        // right node.
        let overflow_child = self.overflow_link.child;
        self.cimap_put_of(r_slot, overflow_child, r_fill);
        self.cimap_remove_of(l_slot, overflow_child);
        {
            let data = self.cache.data_mut(r_slot);
            buf::set_data(data, lay.off_element(r_fill - 1), &self.overflow_element);
            lay.set_link(data, r_fill, &self.overflow_link);
        }

        // insert the new right node into the parent.
        let r_link_in_parent = if r_child_index == order {
            // right node lands in the parent's overflow position.
            let src = lay.off_element(sidx);
            buf::get_data(
                self.cache.data(l_slot),
                src,
                &mut self.overflow_element,
            );
            self.overflow_node = p;
            false
        } else {
            if p_fill == order - 1 {
                // parent will overflow, park its last element/link.
                let parked_child = self.child_of(p_slot, p_fill);
                self.cimap_remove_of(p_slot, parked_child);
                let src = lay.off_element(p_fill - 1);
                buf::get_data(self.cache.data(p_slot), src, &mut self.overflow_element);
                self.overflow_link = self.link_of(p_slot, p_fill);
                self.overflow_node = p;
                p_fill -= 1;
            } else {
                self.clear_overflow();
            }
            self.layout.cimap_inc(self.cache.data_mut(p_slot), r_child_index);
            self.cimap_put_of(p_slot, r, r_child_index);
            {
                let data = self.cache.data_mut(p_slot);
                buf::move_internal(
                    data,
                    lay.off_element(l_child_index + 1),
                    lay.off_element(l_child_index),
                    (p_fill - l_child_index) * esz,
                );
                buf::move_internal(
                    data,
                    lay.off_link(l_child_index + 2),
                    lay.off_link(l_child_index + 1),
                    (p_fill - l_child_index) * SIZE_LINK,
                );
            }
            // promote the median element from the left node.
            self.cache.copy(
                l_slot,
                lay.off_element(sidx),
                p_slot,
                lay.off_element(l_child_index),
                esz,
            );
            p_fill += 1;
            true
        };

        // move the cimap entries of the migrating children.
        for i in 0..r_fill {
            let child = self.child_of(l_slot, i + sidx + 1);
            self.cimap_remove_of(l_slot, child);
            self.cimap_put_of(r_slot, child, i);
        }
        // move elements and links from the left node to the right.
        self.cache.copy(
            l_slot,
            lay.off_element(sidx + 1),
            r_slot,
            lay.off_element(0),
            (r_fill - 1) * esz,
        );
        self.cache.copy(
            l_slot,
            lay.off_link(sidx + 1),
            r_slot,
            lay.off_link(0),
            r_fill * SIZE_LINK,
        );
        {
            let data = self.cache.data_mut(l_slot);
            buf::fill(data, lay.off_element(sidx), 0, r_fill * esz);
            buf::fill(data, lay.off_link(sidx + 1), 0, r_fill * SIZE_LINK);
        }
        let l_fill = sidx;

        // recompute rank metadata on the right node. n elements went
        // to the right node and one to the parent.
        let mut n = 0;
        {
            let data = self.cache.data_mut(r_slot);
            for i in 0..=r_fill {
                lay.set_link_offset(data, i, n);
                n += lay.link(data, i).count + 1;
            }
        }
        let n = n - 1;
        let r_link = {
            let data = self.cache.data_mut(p_slot);
            lay.add_link_count(data, l_child_index, -((n as i64) + 1));
            let plink = lay.link(data, l_child_index);
            Link {
                offset: plink.offset + plink.count + 1,
                count: n,
                child: r,
            }
        };

        {
            let data = self.cache.data_mut(r_slot);
            lay.set_parent(data, p);
            lay.set_fill(data, r_fill);
        }
        lay.set_fill(self.cache.data_mut(l_slot), l_fill);
        lay.set_fill(self.cache.data_mut(p_slot), p_fill);
        if r_link_in_parent {
            lay.set_link(self.cache.data_mut(p_slot), r_child_index, &r_link);
        } else {
            self.overflow_link = r_link;
        }
        self.cache.unpin(l_slot);
        self.cache.unpin(p_slot);

        // update the parent pointer of the right node's children.
        for i in 0..=r_fill {
            let child = self.child_of(r_slot, i);
            if child != REC_NULL {
                let child_slot =
                    unpin_on_err!(self.cache, self.cache.get(&mut self.store, child), r_slot);
                lay.set_parent(self.cache.data_mut(child_slot), r);
            }
        }
        self.cache.unpin(r_slot);
        Ok(())
    }

    // merge `l`, the separating parent element and `l`'s right
    // sibling into `l`. When the merged node would hold `order`
    // elements the right node's tail is parked in the overflow slot,
    // owned by `l`.
    fn concatenate(&mut self, l: u64) -> Result<()> {
        let lay = self.layout;
        let order = lay.order;
        let esz = lay.element_size;

        debug_assert!(self.overflow_node == REC_NULL);

        let l_slot = self.cache.get(&mut self.store, l)?;
        self.cache.pin(l_slot);
        let l_fill = self.fill_of(l_slot);
        let p = self.parent_of(l_slot);

        let p_slot = unpin_on_err!(self.cache, self.cache.get(&mut self.store, p), l_slot);
        self.cache.pin(p_slot);
        let mut p_fill = self.fill_of(p_slot);
        let l_child_index =
            unpin_on_err!(self.cache, self.cimap_get_of(p_slot, l), l_slot, p_slot);
        debug_assert!(l_child_index < order - 1);
        let r = self.child_of(p_slot, l_child_index + 1);

        let r_slot =
            unpin_on_err!(self.cache, self.cache.get(&mut self.store, r), p_slot, l_slot);
        let mut r_fill = self.fill_of(r_slot);
        let r_child_index = l_child_index + 1;
        debug_assert!(l_fill + 1 + r_fill <= order);

        if l_fill + 1 + r_fill == order {
            // merged node would overflow, park the right node's tail.
            let src = lay.off_element(r_fill - 1);
            buf::get_data(self.cache.data(r_slot), src, &mut self.overflow_element);
            self.overflow_link = self.link_of(r_slot, r_fill);
            self.overflow_node = l;
            r_fill -= 1;
        }
        for i in 0..=r_fill {
            let child = self.child_of(r_slot, i);
            self.cimap_put_of(l_slot, child, i + l_fill + 1);
        }
        // pull the separator down from the parent and append the
        // right node's elements and links.
        self.cache.copy(
            p_slot,
            lay.off_element(l_child_index),
            l_slot,
            lay.off_element(l_fill),
            esz,
        );
        self.cache.copy(
            r_slot,
            lay.off_element(0),
            l_slot,
            lay.off_element(l_fill + 1),
            r_fill * esz,
        );
        self.cache.copy(
            r_slot,
            lay.off_link(0),
            l_slot,
            lay.off_link(l_fill + 1),
            (r_fill + 1) * SIZE_LINK,
        );
        let l_fill = l_fill + 1 + r_fill;

        p_fill -= 1;
        self.cimap_remove_of(p_slot, r);
        self.layout.cimap_dec(self.cache.data_mut(p_slot), r_child_index + 1);
        {
            let data = self.cache.data_mut(p_slot);
            buf::move_internal(
                data,
                lay.off_element(l_child_index),
                lay.off_element(l_child_index + 1),
                (p_fill - l_child_index) * esz,
            );
            buf::move_internal(
                data,
                lay.off_link(l_child_index + 1),
                lay.off_link(l_child_index + 2),
                (p_fill - l_child_index) * SIZE_LINK,
            );
            buf::fill(data, lay.off_element(p_fill), 0, esz);
            buf::fill(data, lay.off_link(p_fill + 1), 0, SIZE_LINK);
        }
        unpin_on_err!(self.cache, self.free_node(r), l_slot, p_slot);

        // recompute rank metadata on the merged node.
        let mut n = 0;
        {
            let data = self.cache.data_mut(l_slot);
            for i in 0..=l_fill {
                lay.set_link_offset(data, i, n);
                n += lay.link(data, i).count + 1;
            }
        }
        let mut n = n - 1;
        if self.overflow_node == l {
            n += 1;
            self.overflow_link.offset = n;
            n += self.overflow_link.count;
        }
        lay.set_link_count(self.cache.data_mut(p_slot), l_child_index, n);

        lay.set_fill(self.cache.data_mut(l_slot), l_fill);
        lay.set_fill(self.cache.data_mut(p_slot), p_fill);
        self.cache.unpin(p_slot);

        // reparent the children that moved into the merged node.
        for i in (l_fill - r_fill)..=l_fill {
            let child = self.child_of(l_slot, i);
            if child != REC_NULL {
                let child_slot =
                    unpin_on_err!(self.cache, self.cache.get(&mut self.store, child), l_slot);
                lay.set_parent(self.cache.data_mut(child_slot), l);
            }
        }
        self.cache.unpin(l_slot);
        Ok(())
    }

    // move one element from `l` through the parent into `l`'s right
    // sibling, making room in `l`. Drains the overflow slot when `l`
    // owns it.
    fn lr_redistribute(&mut self, l: u64) -> Result<()> {
        let lay = self.layout;
        let order = lay.order;
        let esz = lay.element_size;

        debug_assert!(l == self.overflow_node || self.overflow_node == REC_NULL);
        debug_assert!(l != self.root);

        let l_slot = self.cache.get(&mut self.store, l)?;
        self.cache.pin(l_slot);
        let mut l_fill = self.fill_of(l_slot);
        let p = self.parent_of(l_slot);

        let p_slot = unpin_on_err!(self.cache, self.cache.get(&mut self.store, p), l_slot);
        self.cache.pin(p_slot);
        let l_child_index =
            unpin_on_err!(self.cache, self.cimap_get_of(p_slot, l), l_slot, p_slot);
        debug_assert!(l_child_index < order - 1);
        let r = self.child_of(p_slot, l_child_index + 1);

        let r_slot =
            unpin_on_err!(self.cache, self.cache.get(&mut self.store, r), p_slot, l_slot);
        self.cache.pin(r_slot);
        let mut r_fill = self.fill_of(r_slot);
        let r_child_index = l_child_index + 1;
        debug_assert!(r_fill < order - 1);

        self.layout.cimap_inc(self.cache.data_mut(r_slot), 0);
        {
            let data = self.cache.data_mut(r_slot);
            buf::move_internal(data, lay.off_element(1), lay.off_element(0), r_fill * esz);
            buf::move_internal(data, lay.off_link(1), lay.off_link(0), (r_fill + 1) * SIZE_LINK);
        }
        // separator moves down into the right node's first slot.
        self.cache.copy(
            p_slot,
            lay.off_element(l_child_index),
            r_slot,
            lay.off_element(0),
            esz,
        );
        if l == self.overflow_node {
            let child = self.overflow_link.child;
            self.cimap_put_of(r_slot, child, 0);
            {
                let data = self.cache.data_mut(p_slot);
                buf::set_data(data, lay.off_element(l_child_index), &self.overflow_element);
            }
            {
                let data = self.cache.data_mut(r_slot);
                lay.set_link(data, 0, &self.overflow_link);
            }
            self.clear_overflow();
        } else {
            let child = self.child_of(l_slot, l_fill);
            self.cimap_remove_of(l_slot, child);
            self.cimap_put_of(r_slot, child, 0);
            self.cache.copy(
                l_slot,
                lay.off_element(l_fill - 1),
                p_slot,
                lay.off_element(l_child_index),
                esz,
            );
            self.cache.copy(l_slot, lay.off_link(l_fill), r_slot, lay.off_link(0), SIZE_LINK);
            {
                let data = self.cache.data_mut(l_slot);
                buf::fill(data, lay.off_element(l_fill - 1), 0, esz);
                buf::fill(data, lay.off_link(l_fill), 0, SIZE_LINK);
            }
            l_fill -= 1;
        }
        r_fill += 1;

        // n elements moved out of the left subtree into the right.
        let n = self.link_of(r_slot, 0).count + 1;
        {
            let data = self.cache.data_mut(p_slot);
            lay.add_link_count(data, l_child_index, -(n as i64));
            lay.add_link_count(data, r_child_index, n as i64);
            lay.add_link_offset(data, r_child_index, -(n as i64));
        }
        {
            let data = self.cache.data_mut(r_slot);
            lay.set_link_offset(data, 0, 0);
            for i in 1..=r_fill {
                lay.add_link_offset(data, i, n as i64);
            }
        }

        lay.set_fill(self.cache.data_mut(l_slot), l_fill);
        lay.set_fill(self.cache.data_mut(r_slot), r_fill);
        self.cache.unpin(l_slot);
        self.cache.unpin(p_slot);

        let child = self.child_of(r_slot, 0);
        if child != REC_NULL {
            let child_slot =
                unpin_on_err!(self.cache, self.cache.get(&mut self.store, child), r_slot);
            lay.set_parent(self.cache.data_mut(child_slot), r);
        }
        self.cache.unpin(r_slot);
        Ok(())
    }

    // mirror of lr_redistribute, move the right node's first element
    // through the parent into the left sibling's tail.
    fn rl_redistribute(&mut self, r: u64) -> Result<()> {
        let lay = self.layout;
        let order = lay.order;
        let esz = lay.element_size;

        debug_assert!(r == self.overflow_node || self.overflow_node == REC_NULL);
        debug_assert!(r != self.root);

        let r_slot = self.cache.get(&mut self.store, r)?;
        self.cache.pin(r_slot);
        let mut r_fill = self.fill_of(r_slot);
        let p = self.parent_of(r_slot);

        let p_slot = unpin_on_err!(self.cache, self.cache.get(&mut self.store, p), r_slot);
        self.cache.pin(p_slot);
        let r_child_index =
            unpin_on_err!(self.cache, self.cimap_get_of(p_slot, r), r_slot, p_slot);
        debug_assert!(r_child_index > 0);
        let l_child_index = r_child_index - 1;
        let l = self.child_of(p_slot, l_child_index);

        let l_slot =
            unpin_on_err!(self.cache, self.cache.get(&mut self.store, l), p_slot, r_slot);
        self.cache.pin(l_slot);
        let mut l_fill = self.fill_of(l_slot);
        debug_assert!(l_fill < order - 1);

        let child = self.child_of(r_slot, 0);
        self.cimap_put_of(l_slot, child, l_fill + 1);
        self.cimap_remove_of(r_slot, child);
        // first element of the right node goes away, renumber the
        // children that follow it.
        self.layout.cimap_dec(self.cache.data_mut(r_slot), 1);
        self.cache.copy(
            p_slot,
            lay.off_element(l_child_index),
            l_slot,
            lay.off_element(l_fill),
            esz,
        );
        self.cache.copy(
            r_slot,
            lay.off_element(0),
            p_slot,
            lay.off_element(l_child_index),
            esz,
        );
        self.cache.copy(r_slot, lay.off_link(0), l_slot, lay.off_link(l_fill + 1), SIZE_LINK);
        {
            let data = self.cache.data_mut(r_slot);
            buf::move_internal(data, lay.off_element(0), lay.off_element(1), (r_fill - 1) * esz);
            buf::move_internal(data, lay.off_link(0), lay.off_link(1), r_fill * SIZE_LINK);
        }
        l_fill += 1;
        if self.overflow_node == r {
            let overflow_child = self.overflow_link.child;
            self.cimap_put_of(r_slot, overflow_child, r_fill);
            {
                let data = self.cache.data_mut(r_slot);
                buf::set_data(data, lay.off_element(r_fill - 1), &self.overflow_element);
                lay.set_link(data, r_fill, &self.overflow_link);
            }
            self.clear_overflow();
        } else {
            let data = self.cache.data_mut(r_slot);
            buf::fill(data, lay.off_element(r_fill - 1), 0, esz);
            buf::fill(data, lay.off_link(r_fill), 0, SIZE_LINK);
            r_fill -= 1;
        }

        let n = self.link_of(l_slot, l_fill).count + 1;
        {
            let data = self.cache.data_mut(p_slot);
            lay.add_link_count(data, l_child_index, n as i64);
            lay.add_link_count(data, r_child_index, -(n as i64));
            lay.add_link_offset(data, r_child_index, n as i64);
        }
        {
            let data = self.cache.data_mut(r_slot);
            for i in 0..=r_fill {
                lay.add_link_offset(data, i, -(n as i64));
            }
        }
        {
            let offset = if l_fill == 0 {
                0
            } else {
                let link = self.link_of(l_slot, l_fill - 1);
                link.offset + link.count + 1
            };
            lay.set_link_offset(self.cache.data_mut(l_slot), l_fill, offset);
        }

        lay.set_fill(self.cache.data_mut(l_slot), l_fill);
        lay.set_fill(self.cache.data_mut(r_slot), r_fill);
        self.cache.unpin(r_slot);
        self.cache.unpin(p_slot);

        let child = self.child_of(l_slot, l_fill);
        if child != REC_NULL {
            let child_slot =
                unpin_on_err!(self.cache, self.cache.get(&mut self.store, child), l_slot);
            let data = self.cache.data_mut(child_slot);
            lay.set_parent(data, l);
        }
        self.cache.unpin(l_slot);
        Ok(())
    }

    fn adjust(&mut self, node: u64) -> Result<()> {
        let node_slot = self.cache.get(&mut self.store, node)?;
        let parent = self.parent_of(node_slot);

        if self.overflow_node == node {
            if parent == REC_NULL {
                self.new_root()?;
                return self.split(node);
            }
            self.cache.pin(node_slot);
            let parent_slot =
                unpin_on_err!(self.cache, self.cache.get(&mut self.store, parent), node_slot);
            self.cache.pin(parent_slot);

            let left = unpin_on_err!(
                self.cache,
                self.left_sibling(parent_slot, node),
                node_slot,
                parent_slot
            );
            let right = unpin_on_err!(
                self.cache,
                self.right_sibling(parent_slot, node),
                node_slot,
                parent_slot
            );
            if right != REC_NULL {
                let right_slot = unpin_on_err!(
                    self.cache,
                    self.cache.get(&mut self.store, right),
                    node_slot,
                    parent_slot
                );
                if !self.near_overflowing(right_slot) {
                    self.cache.unpin(node_slot);
                    self.cache.unpin(parent_slot);
                    return self.lr_redistribute(node);
                }
            }
            if left != REC_NULL {
                let left_slot = unpin_on_err!(
                    self.cache,
                    self.cache.get(&mut self.store, left),
                    node_slot,
                    parent_slot
                );
                if !self.near_overflowing(left_slot) {
                    self.cache.unpin(node_slot);
                    self.cache.unpin(parent_slot);
                    return self.rl_redistribute(node);
                }
            }
            self.cache.unpin(node_slot);
            self.cache.unpin(parent_slot);
            self.split(node)?;
            self.adjust(parent)
        } else if self.underflowing(node_slot) {
            if parent == REC_NULL {
                if self.fill_of(node_slot) == 0 {
                    // root lost its last element, promote its only
                    // child.
                    let child = self.child_of(node_slot, 0);
                    self.root = child;
                    self.update_header()?;
                    if child != REC_NULL {
                        let child_slot = self.cache.get(&mut self.store, child)?;
                        let lay = self.layout;
                        lay.set_parent(self.cache.data_mut(child_slot), REC_NULL);
                    }
                    return self.free_node(node);
                }
                return Ok(());
            }
            self.cache.pin(node_slot);
            let parent_slot =
                unpin_on_err!(self.cache, self.cache.get(&mut self.store, parent), node_slot);
            self.cache.pin(parent_slot);

            let left = unpin_on_err!(
                self.cache,
                self.left_sibling(parent_slot, node),
                node_slot,
                parent_slot
            );
            let right = unpin_on_err!(
                self.cache,
                self.right_sibling(parent_slot, node),
                node_slot,
                parent_slot
            );
            if left != REC_NULL {
                let left_slot = unpin_on_err!(
                    self.cache,
                    self.cache.get(&mut self.store, left),
                    node_slot,
                    parent_slot
                );
                if self.can_lend(left_slot) {
                    self.cache.unpin(node_slot);
                    self.cache.unpin(parent_slot);
                    return self.lr_redistribute(left);
                }
            }
            if right != REC_NULL {
                let right_slot = unpin_on_err!(
                    self.cache,
                    self.cache.get(&mut self.store, right),
                    node_slot,
                    parent_slot
                );
                if self.can_lend(right_slot) {
                    self.cache.unpin(node_slot);
                    self.cache.unpin(parent_slot);
                    return self.rl_redistribute(right);
                }
            }
            self.cache.unpin(node_slot);
            self.cache.unpin(parent_slot);
            if right != REC_NULL {
                self.concatenate(node)?;
                if self.overflow_node == node {
                    // merged node ended up with `order` elements,
                    // shed the parked one.
                    self.adjust(node)?;
                }
                self.adjust(parent)
            } else if left != REC_NULL {
                self.concatenate(left)?;
                if self.overflow_node == left {
                    self.adjust(left)?;
                }
                self.adjust(parent)
            } else {
                err_at!(Fatal, msg: "underflowing node {} without siblings", node)
            }
        } else {
            Ok(())
        }
    }

    fn update_count(&mut self, node: u64, amount: i64) -> Result<()> {
        let lay = self.layout;
        let slot = self.cache.get(&mut self.store, node)?;
        let mut node = node;
        let mut parent = self.parent_of(slot);

        while parent != REC_NULL {
            let pslot = self.cache.get(&mut self.store, parent)?;
            let child_index = self.cimap_get_of(pslot, node)?;
            node = parent;
            parent = self.parent_of(pslot);

            let fill = self.fill_of(pslot);
            let data = self.cache.data_mut(pslot);
            lay.add_link_count(data, child_index, amount);
            for i in (child_index + 1)..=fill {
                lay.add_link_offset(data, i, amount);
            }
        }
        Ok(())
    }

    fn node_insert(&mut self, node: u64, pos: usize, element: &[u8]) -> Result<()> {
        let lay = self.layout;
        let order = lay.order;

        if self.root == REC_NULL {
            self.new_root()?;
        }
        let (node, pos) = if node == REC_NULL { (self.root, 0) } else { (node, pos) };

        let slot = self.cache.get(&mut self.store, node)?;
        let mut fill = self.fill_of(slot);

        if pos == order - 1 {
            // new element goes straight to the overflow position.
            self.overflow_element.copy_from_slice(element);
            self.overflow_node = node;
        } else {
            if fill == order - 1 {
                // node will overflow, park its last element.
                let src = lay.off_element(fill - 1);
                buf::get_data(self.cache.data(slot), src, &mut self.overflow_element);
                self.overflow_node = node;
                fill -= 1;
            }
            let data = self.cache.data_mut(slot);
            buf::move_internal(
                data,
                lay.off_element(pos + 1),
                lay.off_element(pos),
                (fill - pos) * lay.element_size,
            );
            buf::set_data(data, lay.off_element(pos), element);
            fill += 1;
            lay.set_fill(data, fill);
        }
        if self.overflow_node == node {
            self.overflow_link.offset = fill + 1;
        } else {
            lay.set_link_offset(self.cache.data_mut(slot), fill, fill);
        }

        self.update_count(node, 1)?;
        self.adjust(node)?;
        if let Some(acquire) = &self.acquire {
            acquire(element);
        }
        Ok(())
    }

    fn node_replace(&mut self, node: u64, pos: usize, element: &[u8]) -> Result<Vec<u8>> {
        let lay = self.layout;
        let slot = self.cache.get(&mut self.store, node)?;
        let old = self.element_of(slot, pos).to_vec();

        if let Some(acquire) = &self.acquire {
            acquire(element);
        }
        if let Some(release) = &self.release {
            release(&old);
        }
        lay.set_element(self.cache.data_mut(slot), pos, element);
        Ok(old)
    }

    fn node_remove(&mut self, node: u64, pos: usize) -> Result<Vec<u8>> {
        let lay = self.layout;
        let esz = lay.element_size;

        let slot = self.cache.get(&mut self.store, node)?;
        let mut node_fill = self.fill_of(slot);
        self.cache.pin(slot);
        let removed = self.element_of(slot, pos).to_vec();
        if let Some(release) = &self.release {
            release(&removed);
        }

        let target;
        if self.is_leaf_at(slot) {
            self.cache.unpin(slot);
            node_fill -= 1;
            {
                let data = self.cache.data_mut(slot);
                buf::move_internal(
                    data,
                    lay.off_element(pos),
                    lay.off_element(pos + 1),
                    (node_fill - pos) * esz,
                );
            }
            if node == self.root && node_fill == 0 {
                self.root = REC_NULL;
                self.free_node(node)?;
                return Ok(removed);
            }
            lay.set_fill(self.cache.data_mut(slot), node_fill);
            target = node;
        } else {
            // replace with the first element of the leftmost leaf of
            // the right subtree, reducing to a leaf removal.
            let mut cur = self.child_of(slot, pos + 1);
            let mut cur_slot =
                unpin_on_err!(self.cache, self.cache.get(&mut self.store, cur), slot);
            while !self.is_leaf_at(cur_slot) {
                cur = self.child_of(cur_slot, 0);
                cur_slot = unpin_on_err!(self.cache, self.cache.get(&mut self.store, cur), slot);
            }
            let mut cur_fill = self.fill_of(cur_slot);
            self.cache.copy(cur_slot, lay.off_element(0), slot, lay.off_element(pos), esz);
            cur_fill -= 1;
            {
                let data = self.cache.data_mut(cur_slot);
                buf::move_internal(data, lay.off_element(0), lay.off_element(1), cur_fill * esz);
                buf::fill(data, lay.off_element(cur_fill), 0, esz);
                lay.set_fill(data, cur_fill);
            }
            self.cache.unpin(slot);
            target = cur;
        }
        self.update_count(target, -1)?;
        self.adjust(target)?;
        Ok(removed)
    }

    // check whether `element` keeps comparator order at position
    // (node, pos). With `replace` the occupant is going away and the
    // successor is checked instead.
    fn validate_at(
        &mut self,
        cmp: &Arc<CmpFn>,
        element: &[u8],
        node: u64,
        pos: usize,
        replace: bool,
    ) -> Result<bool> {
        if node == REC_NULL {
            return Ok(true);
        }

        // element before must compare <= element.
        let (mut pn, mut pp) = (node, pos);
        if self.to_prev(&mut pn, &mut pp)? {
            let slot = self.cache.get(&mut self.store, pn)?;
            if cmp(self.element_of(slot, pp), element) == Ordering::Greater {
                return Ok(false);
            }
        }

        // element after must compare >= element.
        let after = if replace {
            let (mut nn, mut np) = (node, pos);
            if self.to_next(&mut nn, &mut np)? {
                let slot = self.cache.get(&mut self.store, nn)?;
                if np < self.fill_of(slot) {
                    Some((nn, np))
                } else {
                    None
                }
            } else {
                None
            }
        } else {
            let slot = self.cache.get(&mut self.store, node)?;
            if pos < self.fill_of(slot) {
                Some((node, pos))
            } else {
                None
            }
        };
        if let Some((nn, np)) = after {
            let slot = self.cache.get(&mut self.store, nn)?;
            if cmp(self.element_of(slot, np), element) == Ordering::Less {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// Public operations.
impl<S> Index<S>
where
    S: RecordStore,
{
    /// Return number of elements in the index.
    pub fn len(&mut self) -> Result<usize> {
        if self.root == REC_NULL {
            return Ok(0);
        }
        let slot = self.cache.get(&mut self.store, self.root)?;
        let fill = self.fill_of(slot);
        let mut n = fill;
        for i in 0..=fill {
            n += self.link_of(slot, i).count;
        }
        Ok(n)
    }

    /// Return whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.root == REC_NULL
    }

    /// Insert a new element. In unique mode fail with
    /// [Error::KeyExists] when an equal element is present. With
    /// multi-key, duplicates land at the upper end of the equal
    /// range, or the lower end under the insert-lower option.
    pub fn insert(&mut self, element: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.check_element(element)?;
        let cmp = self.to_cmp()?;
        debug_assert!(self.overflow_node == REC_NULL);

        let (mut node, mut pos, found) = if self.options & opts::INSERT_LOWER != 0 {
            self.search_lower(element, |a, b| cmp(a, b))?
        } else {
            self.search_upper(element, |a, b| cmp(a, b))?
        };
        if self.options & opts::MULTI_KEY == 0 && found {
            self.cache.cleanup();
            return err_at!(KeyExists, msg: "duplicate key in index {}", self.name);
        }
        self.to_insert_before(&mut node, &mut pos)?;
        self.node_insert(node, pos, element)?;
        self.cache.cleanup();
        Ok(())
    }

    /// Insert a new element at rank `index`, `0 <= index <= len`.
    /// Requires a rank-only index, or the allow-index option, in
    /// which case the element must preserve comparator order at that
    /// rank.
    pub fn insert_at(&mut self, index: usize, element: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.check_element(element)?;
        self.check_by_index()?;
        let size = self.len()?;
        if index > size {
            return err_at!(OutOfBound, msg: "index {} beyond {}", index, size);
        }
        debug_assert!(self.overflow_node == REC_NULL);

        let (mut node, mut pos, _) = self.search_index(index)?;
        if self.options & opts::NOCMP == 0 {
            let cmp = self.to_cmp()?;
            if !self.validate_at(&cmp, element, node, pos, false)? {
                return err_at!(InvalidInput, msg: "element breaks ordering at {}", index);
            }
        }
        self.to_insert_before(&mut node, &mut pos)?;
        self.node_insert(node, pos, element)?;
        self.cache.cleanup();
        Ok(())
    }

    /// Insert or replace. When an equal element exists the first of
    /// the equal range is replaced and its old bytes returned,
    /// otherwise the element is inserted.
    pub fn put(&mut self, element: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_writable()?;
        self.check_element(element)?;
        let cmp = self.to_cmp()?;
        debug_assert!(self.overflow_node == REC_NULL);

        let (mut node, mut pos, found) = self.search_lower(element, |a, b| cmp(a, b))?;
        let old = if found {
            Some(self.node_replace(node, pos, element)?)
        } else {
            self.to_insert_before(&mut node, &mut pos)?;
            self.node_insert(node, pos, element)?;
            None
        };
        self.cache.cleanup();
        Ok(old)
    }

    /// Insert or replace at rank `index`. `index == len` appends.
    /// Same preconditions as [Index::insert_at].
    pub fn put_at(&mut self, index: usize, element: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_writable()?;
        self.check_element(element)?;
        self.check_by_index()?;
        let size = self.len()?;
        if index > size {
            return err_at!(OutOfBound, msg: "index {} beyond {}", index, size);
        }
        debug_assert!(self.overflow_node == REC_NULL);

        let (mut node, mut pos, found) = self.search_index(index)?;
        if self.options & opts::NOCMP == 0 {
            let cmp = self.to_cmp()?;
            if !self.validate_at(&cmp, element, node, pos, found)? {
                return err_at!(InvalidInput, msg: "element breaks ordering at {}", index);
            }
        }
        let old = if found {
            Some(self.node_replace(node, pos, element)?)
        } else {
            self.to_insert_before(&mut node, &mut pos)?;
            self.node_insert(node, pos, element)?;
            None
        };
        self.cache.cleanup();
        Ok(old)
    }

    /// Replace the element at rank `index`. With a comparator the
    /// new element must compare equal to the one it replaces.
    pub fn update(&mut self, index: usize, element: &[u8]) -> Result<Vec<u8>> {
        self.check_writable()?;
        self.check_element(element)?;
        let size = self.len()?;
        if index >= size {
            return err_at!(OutOfBound, msg: "index {} beyond {}", index, size);
        }

        let (node, pos, found) = self.search_index(index)?;
        if !found {
            return err_at!(KeyNotFound, msg: "no element at {}", index);
        }
        if let Some(cmp) = &self.cmp {
            let slot = self.cache.get(&mut self.store, node)?;
            if cmp(self.element_of(slot, pos), element) != Ordering::Equal {
                return err_at!(InvalidInput, msg: "replacement compares unequal at {}", index);
            }
        }
        let old = self.node_replace(node, pos, element)?;
        self.cache.cleanup();
        Ok(old)
    }

    /// Remove the first element matching `key` and return it.
    pub fn remove(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_writable()?;
        let cmp = self.to_cmp()?;
        debug_assert!(self.overflow_node == REC_NULL);

        let (node, pos, found) = self.search_lower(key, |a, b| cmp(a, b))?;
        if !found {
            self.cache.cleanup();
            return err_at!(KeyNotFound, msg: "no such key in index {}", self.name);
        }
        let removed = self.node_remove(node, pos)?;
        self.cache.cleanup();
        Ok(removed)
    }

    /// Remove the element at rank `index` and return it.
    pub fn remove_at(&mut self, index: usize) -> Result<Vec<u8>> {
        self.check_writable()?;
        let size = self.len()?;
        if index >= size {
            return err_at!(OutOfBound, msg: "index {} beyond {}", index, size);
        }
        debug_assert!(self.overflow_node == REC_NULL);

        let (node, pos, found) = self.search_index(index)?;
        if !found {
            return err_at!(KeyNotFound, msg: "no element at {}", index);
        }
        let removed = self.node_remove(node, pos)?;
        self.cache.cleanup();
        Ok(removed)
    }

    /// Return whether an element matching `key` is present.
    pub fn contains(&mut self, key: &[u8]) -> Result<bool> {
        let cmp = self.to_cmp()?;
        let (_, _, found) = self.search_lower(key, |a, b| cmp(a, b))?;
        self.cache.cleanup();
        Ok(found)
    }

    /// Get the first element matching `key`.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cmp = self.to_cmp()?;
        let (node, pos, found) = self.search_lower(key, |a, b| cmp(a, b))?;
        let element = if found {
            let slot = self.cache.get(&mut self.store, node)?;
            Some(self.element_of(slot, pos).to_vec())
        } else {
            None
        };
        self.cache.cleanup();
        Ok(element)
    }

    /// Get the element at rank `index`.
    pub fn get_at(&mut self, index: usize) -> Result<Vec<u8>> {
        let size = self.len()?;
        if index >= size {
            return err_at!(OutOfBound, msg: "index {} beyond {}", index, size);
        }
        let (node, pos, found) = self.search_index(index)?;
        if !found {
            return err_at!(KeyNotFound, msg: "no element at {}", index);
        }
        let slot = self.cache.get(&mut self.store, node)?;
        let element = self.element_of(slot, pos).to_vec();
        self.cache.cleanup();
        Ok(element)
    }
}

// Search operations returning cursors, and cursor stepping.
impl<S> Index<S>
where
    S: RecordStore,
{
    fn read_element(&mut self, node: u64, pos: usize) -> Result<Option<Vec<u8>>> {
        if node == REC_NULL {
            return Ok(None);
        }
        let slot = self.cache.get(&mut self.store, node)?;
        if pos >= self.fill_of(slot) {
            Ok(None)
        } else {
            Ok(Some(self.element_of(slot, pos).to_vec()))
        }
    }

    fn make_cursor(&mut self, node: u64, pos: usize, found: bool) -> Result<Cursor> {
        let index = self.to_index(node, pos)?;
        let element = self.read_element(node, pos)?;
        Ok(Cursor { node, pos, index, found, element })
    }

    /// Cursor at the first element. For an empty index this equals
    /// [Index::find_end].
    pub fn find_begin(&mut self) -> Result<Cursor> {
        let mut node = self.root;
        let mut child = self.root;
        while child != REC_NULL {
            node = child;
            let slot = self.cache.get(&mut self.store, node)?;
            child = self.child_of(slot, 0);
        }
        let element = self.read_element(node, 0)?;
        self.cache.cleanup();
        Ok(Cursor { node, pos: 0, index: 0, found: element.is_some(), element })
    }

    /// Cursor at the imaginary element after the last one. Its index
    /// equals the number of elements.
    pub fn find_end(&mut self) -> Result<Cursor> {
        if self.root == REC_NULL {
            return Ok(Cursor { node: REC_NULL, pos: 0, index: 0, found: false, element: None });
        }
        let index = self.len()?;
        let mut node = self.root;
        let mut slot = self.cache.get(&mut self.store, node)?;
        loop {
            let fill = self.fill_of(slot);
            let child = self.child_of(slot, fill);
            if child == REC_NULL {
                break;
            }
            node = child;
            slot = self.cache.get(&mut self.store, node)?;
        }
        let pos = self.fill_of(slot);
        self.cache.cleanup();
        Ok(Cursor { node, pos, index, found: false, element: None })
    }

    /// Cursor at rank `index`.
    pub fn find_at(&mut self, index: usize) -> Result<Cursor> {
        let (node, pos, found) = self.search_index(index)?;
        if !found {
            self.cache.cleanup();
            return err_at!(KeyNotFound, msg: "no element at {}", index);
        }
        let cursor = self.make_cursor(node, pos, true)?;
        self.cache.cleanup();
        Ok(cursor)
    }

    /// Cursor at the first element comparing >= `key`. If all
    /// elements compare less the end cursor is returned.
    pub fn find_lower(&mut self, key: &[u8]) -> Result<Cursor> {
        let cmp = self.to_cmp()?;
        let (node, pos, found) = self.search_lower(key, |a, b| cmp(a, b))?;
        let cursor = self.make_cursor(node, pos, found)?;
        self.cache.cleanup();
        Ok(cursor)
    }

    /// Cursor at the first element comparing > `key`. If all
    /// elements compare less-or-equal the end cursor is returned.
    pub fn find_upper(&mut self, key: &[u8]) -> Result<Cursor> {
        let cmp = self.to_cmp()?;
        let (node, pos, found) = self.search_upper(key, |a, b| cmp(a, b))?;
        let cursor = self.make_cursor(node, pos, found)?;
        self.cache.cleanup();
        Ok(cursor)
    }

    /// Like [Index::find_lower] with a caller supplied comparator.
    /// The comparator must be compatible with the index order, it
    /// may only coarsen it.
    pub fn find_lower_with<F>(&mut self, key: &[u8], cmp: F) -> Result<Cursor>
    where
        F: Fn(&[u8], &[u8]) -> Ordering,
    {
        let (node, pos, found) = self.search_lower(key, cmp)?;
        let cursor = self.make_cursor(node, pos, found)?;
        self.cache.cleanup();
        Ok(cursor)
    }

    /// Like [Index::find_upper] with a caller supplied comparator.
    pub fn find_upper_with<F>(&mut self, key: &[u8], cmp: F) -> Result<Cursor>
    where
        F: Fn(&[u8], &[u8]) -> Ordering,
    {
        let (node, pos, found) = self.search_upper(key, cmp)?;
        let cursor = self.make_cursor(node, pos, found)?;
        self.cache.cleanup();
        Ok(cursor)
    }

    /// Step `cursor` to the next element, return the new rank.
    /// Stepping past [Index::find_end] fails with
    /// [Error::KeyNotFound].
    pub fn iterate_next(&mut self, cursor: &mut Cursor) -> Result<usize> {
        if cursor.node == REC_NULL {
            return err_at!(KeyNotFound, msg: "iterating past end");
        }
        let (mut node, mut pos) = (cursor.node, cursor.pos);
        if !self.to_next(&mut node, &mut pos)? {
            self.cache.cleanup();
            return err_at!(KeyNotFound, msg: "iterating past end");
        }
        cursor.node = node;
        cursor.pos = pos;
        cursor.index += 1;
        cursor.element = self.read_element(node, pos)?;
        cursor.found = cursor.element.is_some();
        self.cache.cleanup();
        Ok(cursor.index)
    }

    /// Step `cursor` to the previous element, return the new rank.
    /// Stepping before [Index::find_begin] fails with
    /// [Error::KeyNotFound].
    pub fn iterate_prev(&mut self, cursor: &mut Cursor) -> Result<usize> {
        if cursor.node == REC_NULL {
            return err_at!(KeyNotFound, msg: "iterating before begin");
        }
        let (mut node, mut pos) = (cursor.node, cursor.pos);
        if !self.to_prev(&mut node, &mut pos)? {
            self.cache.cleanup();
            return err_at!(KeyNotFound, msg: "iterating before begin");
        }
        cursor.node = node;
        cursor.pos = pos;
        cursor.index -= 1;
        cursor.element = self.read_element(node, pos)?;
        cursor.found = true;
        self.cache.cleanup();
        Ok(cursor.index)
    }

    /// Re-resolve the element bytes under `cursor` from the tree.
    /// Required after any other operation on the same index, cache
    /// traffic may have reloaded the node.
    pub fn iterate_refresh(&mut self, cursor: &mut Cursor) -> Result<()> {
        cursor.element = self.read_element(cursor.node, cursor.pos)?;
        self.cache.cleanup();
        Ok(())
    }
}

// Maintenance operations.
impl<S> Index<S>
where
    S: RecordStore,
{
    /// Write back every dirty cache buffer and empty the cache.
    pub fn flush_cache(&mut self) -> Result<()> {
        self.cache.flush(&mut self.store)
    }

    /// Write back every dirty cache buffer and make the store
    /// durable.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_cache()?;
        self.store.sync()
    }

    /// Resynchronize this handle with the store: drop the cache
    /// without writing anything back and re-read the header record.
    /// Call after the enclosing store transaction was aborted.
    pub fn reload(&mut self) -> Result<()> {
        self.cache.clear();
        self.clear_overflow();

        let mut record = vec![0_u8; self.layout.node_size()];
        self.store.get(REC_HEADER, &mut record)?;
        let header = Header::decode(&record)?;
        if header.order != self.layout.order || header.element_size != self.layout.element_size {
            err_at!(
                InvalidFile,
                msg: "geometry changed to {}/{}", header.order, header.element_size
            )?;
        }
        self.options = header.options;
        self.root = header.root;
        self.free_list = header.free_list;
        self.max_recno = header.max_recno;
        Ok(())
    }

    /// Erase trailing free records from the store.
    pub fn trim(&mut self) -> Result<()> {
        self.check_writable()?;
        self.trim_inner()?;
        self.cache.cleanup();
        Ok(())
    }

    fn trim_inner(&mut self) -> Result<()> {
        let mut update = false;
        let mut cur = self.max_recno;
        while cur > REC_HEADER {
            let slot = self.cache.get(&mut self.store, cur)?;
            if buf::get_rec(self.cache.data(slot), OFF_FREE_MARKER) != REC_HEADER {
                break;
            }
            let next = buf::get_rec(self.cache.data(slot), OFF_FREE_NEXT);
            let prev = buf::get_rec(self.cache.data(slot), OFF_FREE_PREV);
            self.cache.forget(slot);
            self.erase_node(cur)?;

            if next != REC_NULL {
                let slot = self.cache.get(&mut self.store, next)?;
                buf::set_rec(self.cache.data_mut(slot), OFF_FREE_PREV, prev);
            }
            if prev != REC_NULL {
                let slot = self.cache.get(&mut self.store, prev)?;
                buf::set_rec(self.cache.data_mut(slot), OFF_FREE_NEXT, next);
            } else {
                self.free_list = next;
            }
            self.max_recno -= 1;
            update = true;
            cur -= 1;
        }
        if update {
            self.update_header()?;
        }
        Ok(())
    }

    /// Compact the store: repeatedly relocate the highest live
    /// record into the first free slot, then erase the trailing free
    /// records. Afterwards the store holds only live records, with
    /// no gaps.
    pub fn defrag(&mut self) -> Result<()> {
        self.check_writable()?;
        let lay = self.layout;

        let header_slot = self.cache.get(&mut self.store, REC_HEADER)?;
        self.cache.pin(header_slot);
        unpin_on_err!(self.cache, self.trim_inner(), header_slot);

        while self.free_list != REC_NULL {
            let source = self.max_recno;
            let target = self.free_list;
            #[cfg(feature = "debug")]
            println!("defrag relocate {} -> {}", source, target);
            let target_slot = unpin_on_err!(
                self.cache,
                self.cache.get(&mut self.store, target),
                header_slot
            );
            self.cache.pin(target_slot);
            let source_slot = unpin_on_err!(
                self.cache,
                self.cache.get(&mut self.store, source),
                header_slot,
                target_slot
            );

            debug_assert!(
                buf::get_rec(self.cache.data(target_slot), OFF_FREE_MARKER) == REC_HEADER
            );
            self.free_list = buf::get_rec(self.cache.data(target_slot), OFF_FREE_NEXT);

            let node_size = lay.node_size();
            self.cache.copy(source_slot, 0, target_slot, 0, node_size);

            // fix the parent's child link and cimap entry.
            if source == self.root {
                self.root = target;
            } else {
                let dep = self.parent_of(target_slot);
                let dep_slot = unpin_on_err!(
                    self.cache,
                    self.cache.get(&mut self.store, dep),
                    header_slot,
                    target_slot
                );
                let child_index = unpin_on_err!(
                    self.cache,
                    self.cimap_get_of(dep_slot, source),
                    header_slot,
                    target_slot
                );
                self.cimap_remove_of(dep_slot, source);
                self.cimap_put_of(dep_slot, target, child_index);
                lay.set_link_child(self.cache.data_mut(dep_slot), child_index, target);
            }

            // fix the children's parent pointers.
            let fill = self.fill_of(target_slot);
            if !self.is_leaf_at(target_slot) {
                for i in 0..=fill {
                    let dep = self.child_of(target_slot, i);
                    let dep_slot = unpin_on_err!(
                        self.cache,
                        self.cache.get(&mut self.store, dep),
                        header_slot,
                        target_slot
                    );
                    lay.set_parent(self.cache.data_mut(dep_slot), target);
                }
            }

            self.cache.unpin(target_slot);
            unpin_on_err!(self.cache, self.free_node(source), header_slot);
            unpin_on_err!(self.cache, self.trim_inner(), header_slot);
        }
        self.cache.unpin(header_slot);
        self.update_header()?;
        self.cache.cleanup();
        Ok(())
    }
}

// Deep validation of the tree shape and the free list, used by
// tests after every kind of mutation.
impl<S> Index<S>
where
    S: RecordStore,
{
    /// Validate the btree with following rules:
    ///
    /// * Every non-root node holds at least ceil(order/2)-1 and at
    ///   most order-1 elements.
    /// * A node has either no children or fill+1 children, and all
    ///   leaf nodes are at the same depth.
    /// * Parent pointers and child-index-map entries are consistent.
    /// * Every link's count equals the number of elements in the
    ///   child's subtree and its offset the running within-node rank.
    /// * Elements are in comparator order within and across nodes,
    ///   duplicates only with the multi-key option.
    /// * The overflow slot is empty, every record on the free list
    ///   carries the free marker, and live + free + header records
    ///   account for every allocated record number.
    pub fn validate(&mut self) -> Result<()> {
        if self.overflow_node != REC_NULL {
            return err_at!(Fatal, msg: "overflow slot occupied outside mutation");
        }

        let (n_count, n_nodes) = if self.root == REC_NULL {
            (0, 0)
        } else {
            let (n_count, n_nodes, _) = self.validate_tree(self.root, REC_NULL, None, None)?;
            (n_count, n_nodes)
        };
        let size = self.len()?;
        if n_count != size {
            return err_at!(Fatal, msg: "tree count {} != size {}", n_count, size);
        }

        let n_free = self.validate_free_list()?;
        let accounted = n_nodes as u64 + n_free + 1;
        if accounted != self.max_recno {
            return err_at!(
                Fatal,
                msg: "{} live + {} free + header != max recno {}", n_nodes, n_free, self.max_recno
            );
        }
        self.cache.cleanup();
        Ok(())
    }

    fn validate_free_list(&mut self) -> Result<u64> {
        let mut n_free = 0;
        let mut prev = REC_NULL;
        let mut cur = self.free_list;
        while cur != REC_NULL {
            let slot = self.cache.get(&mut self.store, cur)?;
            let data = self.cache.data(slot);
            if buf::get_rec(data, OFF_FREE_MARKER) != REC_HEADER {
                return err_at!(Fatal, msg: "free record {} without marker", cur);
            }
            if buf::get_rec(data, OFF_FREE_PREV) != prev {
                return err_at!(Fatal, msg: "free record {} bad prev", cur);
            }
            prev = cur;
            cur = buf::get_rec(data, OFF_FREE_NEXT);
            n_free += 1;
            if n_free > self.max_recno {
                return err_at!(Fatal, msg: "free list cycles");
            }
        }
        Ok(n_free)
    }

    #[allow(clippy::type_complexity)]
    fn validate_tree(
        &mut self,
        node: u64,
        parent: u64,
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
    ) -> Result<(usize, usize, usize)> {
        let lay = self.layout;
        let order = lay.order;

        // read everything needed up-front, recursion thrashes the
        // cache.
        let (fill, node_parent, links, elements) = {
            let slot = self.cache.get(&mut self.store, node)?;
            let fill = self.fill_of(slot);
            if fill > order - 1 {
                return err_at!(Fatal, msg: "node {} overfull {}", node, fill);
            }
            let mut links = Vec::with_capacity(fill + 1);
            for i in 0..=fill {
                links.push(self.link_of(slot, i));
            }
            let mut elements = Vec::with_capacity(fill);
            for i in 0..fill {
                elements.push(self.element_of(slot, i).to_vec());
            }
            // every child must be mapped at its link position.
            for (i, link) in links.iter().enumerate() {
                if link.child != REC_NULL && self.cimap_get_of(slot, link.child)? != i {
                    return err_at!(Fatal, msg: "node {} bad cimap for child {}", node, link.child);
                }
            }
            (fill, self.parent_of(slot), links, elements)
        };

        if node_parent != parent {
            return err_at!(Fatal, msg: "node {} bad parent {}", node, node_parent);
        }
        // a split of an even-order node leaves ceil(order/2) - 1
        // elements on the lighter side.
        if parent != REC_NULL && fill < (order + 1) / 2 - 1 {
            return err_at!(Fatal, msg: "node {} underfull {}", node, fill);
        }

        let leaf = links[0].child == REC_NULL;
        for link in links.iter() {
            if (link.child == REC_NULL) != leaf {
                return err_at!(Fatal, msg: "node {} mixes leaf/non-leaf links", node);
            }
        }

        if let Some(cmp) = &self.cmp {
            let multi = self.options & opts::MULTI_KEY != 0;
            let mut bound = lower.clone();
            for element in elements.iter() {
                if let Some(b) = &bound {
                    let ord = cmp(b, element);
                    let ok = if multi { ord != Ordering::Greater } else { ord == Ordering::Less };
                    if !ok {
                        return err_at!(Fatal, msg: "node {} breaks sort order", node);
                    }
                }
                bound = Some(element.clone());
            }
            if let (Some(last), Some(up)) = (elements.last(), &upper) {
                let ord = cmp(last, up);
                let ok = if multi { ord != Ordering::Greater } else { ord == Ordering::Less };
                if !ok {
                    return err_at!(Fatal, msg: "node {} breaks sort order at bound", node);
                }
            }
        }

        let mut total = fill;
        let mut n_nodes = 1;
        let mut offset = 0;
        let mut depth = 1;
        for (i, link) in links.iter().enumerate() {
            if link.offset != offset {
                return err_at!(Fatal, msg: "node {} link {} offset {} != {}", node, i, link.offset, offset);
            }
            if leaf {
                if link.count != 0 {
                    return err_at!(Fatal, msg: "node {} leaf link {} count {}", node, i, link.count);
                }
            } else {
                let lo = if i == 0 { lower.clone() } else { Some(elements[i - 1].clone()) };
                let hi = if i == fill { upper.clone() } else { Some(elements[i].clone()) };
                let (count, nodes, d) = self.validate_tree(link.child, node, lo, hi)?;
                if count != link.count {
                    return err_at!(Fatal, msg: "node {} link {} count {} != {}", node, i, link.count, count);
                }
                if i == 0 {
                    depth = d + 1;
                } else if d + 1 != depth {
                    return err_at!(Fatal, msg: "node {} uneven depth below link {}", node, i);
                }
                total += count;
                n_nodes += nodes;
            }
            offset += link.count + 1;
        }
        Ok((total, n_nodes, depth))
    }

    /// Gather statistics from this index instance.
    pub fn to_stats(&mut self) -> Result<Stats> {
        let n_count = self.len()?;
        let n_free = self.validate_free_list()?;
        Ok(Stats {
            name: self.name.clone(),
            order: self.layout.order,
            element_size: self.layout.element_size,
            cache_buffers: self.cache_buffers,
            n_count,
            n_free: n_free as usize,
            max_recno: self.max_recno,
            n_gets: self.cache.n_gets,
            n_hits: self.cache.n_hits,
            n_evicted: self.cache.n_evicted,
            n_writebacks: self.cache.n_writebacks,
        })
    }
}

impl<S> Drop for Index<S>
where
    S: RecordStore,
{
    fn drop(&mut self) {
        if !self.rdonly {
            self.cache.flush(&mut self.store).ok();
            self.store.sync().ok();
        }
    }
}

/// Statistics for [Index], via `to_stats()`.
#[derive(Clone, Debug)]
pub struct Stats {
    pub name: String,
    pub order: usize,
    pub element_size: usize,
    pub cache_buffers: usize,
    pub n_count: usize,
    pub n_free: usize,
    pub max_recno: u64,
    pub n_gets: usize,
    pub n_hits: usize,
    pub n_evicted: usize,
    pub n_writebacks: usize,
}

#[cfg(test)]
#[path = "index_test.rs"]
mod index_test;
