use std::{any::Any, cmp::Ordering, mem};

use crate::{
    mem::{
        iter::{Cursor, Iter},
        node::{Link, Node, NodeId},
    },
    opts, Result,
};

/// Comparator over stored elements. First argument is always the
/// stored element, second the caller supplied key, third the group
/// to compare under. A grouped comparator may treat several elements
/// as equal, but for any two groups g1 and g2 it must hold:
/// g1 < g2 iff all elements within g1 < all elements within g2.
pub type CmpFn<T, G> = dyn Fn(&T, &T, &G) -> Ordering;

/// Reference counting hook, invoked on transfer-in (acquire) and
/// transfer-out (release) of an element.
pub type HookFn<T> = dyn Fn(&T);

/// Sub-element count hook, for indexes configured with sub-elements.
pub type SizeFn<T> = dyn Fn(&T) -> usize;

/// Sub-element accessor hook, for indexes configured with
/// sub-elements. `0 <= index < size-hook(element)`.
pub type SubFn<T> = dyn for<'a> Fn(&'a T, usize) -> &'a dyn Any;

// Tree owned scratch slot. While a mutation is in flight a node can
// temporarily hold `order` elements, the extra element and link are
// parked here, tagged with the owning node. The slot is empty
// whenever a public operation returns.
pub(crate) struct Overflow<T> {
    pub(crate) node: NodeId,
    pub(crate) element: Option<T>,
    pub(crate) link: Link,
}

impl<T> Overflow<T> {
    fn new() -> Overflow<T> {
        Overflow {
            node: NodeId::NULL,
            element: None,
            link: Link::default(),
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.node.is_null()
    }

    fn clear(&mut self) {
        self.node = NodeId::NULL;
        self.element = None;
        self.link = Link::default();
    }
}

/// Index type, a rank indexed btree fully held in memory.
///
/// Parametrised over the element type `T` and the comparator group
/// type `G`. Without a comparator the index is ordered by rank alone
/// and mutated through the positional API.
pub struct Index<T, G = ()> {
    pub(crate) name: String,
    pub(crate) order: usize,
    pub(crate) options: u32,

    pub(crate) nodes: Vec<Node<T>>,
    pub(crate) free_ids: Vec<NodeId>,
    pub(crate) root: NodeId,
    pub(crate) overflow: Overflow<T>,

    pub(crate) cmp: Option<Box<CmpFn<T, G>>>,
    pub(crate) group_default: G,
    pub(crate) acquire: Option<Box<HookFn<T>>>,
    pub(crate) release: Option<Box<HookFn<T>>>,
    pub(crate) sub_size: Option<Box<SizeFn<T>>>,
    pub(crate) sub_get: Option<Box<SubFn<T>>>,
}

impl<T> Index<T, ()> {
    /// Create a new index ordered by rank alone. Key based operations
    /// shall fail with [Error::InvalidInput], mutate the index with
    /// the positional API, `insert_at`, `put_at`, `remove_at`.
    pub fn new(name: &str, order: usize) -> Result<Index<T, ()>> {
        if order < 3 {
            err_at!(InvalidInput, msg: "order {} too small", order)?;
        }
        Ok(Index {
            name: name.to_string(),
            order,
            options: opts::NOCMP,
            nodes: Vec::default(),
            free_ids: Vec::default(),
            root: NodeId::NULL,
            overflow: Overflow::new(),
            cmp: None,
            group_default: (),
            acquire: None,
            release: None,
            sub_size: None,
            sub_get: None,
        })
    }
}

impl<T, G> Index<T, G> {
    /// Create a new index ordered by `cmp`. `group_default` is handed
    /// to the comparator for all operations that do not supply their
    /// own group.
    pub fn with_cmp<F>(name: &str, order: usize, group_default: G, cmp: F) -> Result<Index<T, G>>
    where
        F: 'static + Fn(&T, &T, &G) -> Ordering,
    {
        if order < 3 {
            err_at!(InvalidInput, msg: "order {} too small", order)?;
        }
        Ok(Index {
            name: name.to_string(),
            order,
            options: 0,
            nodes: Vec::default(),
            free_ids: Vec::default(),
            root: NodeId::NULL,
            overflow: Overflow::new(),
            cmp: Some(Box::new(cmp)),
            group_default,
            acquire: None,
            release: None,
            sub_size: None,
            sub_get: None,
        })
    }

    pub(crate) fn from_parts(
        name: &str,
        order: usize,
        options: u32,
        group_default: G,
        cmp: Option<Box<CmpFn<T, G>>>,
    ) -> Index<T, G> {
        Index {
            name: name.to_string(),
            order,
            options,
            nodes: Vec::default(),
            free_ids: Vec::default(),
            root: NodeId::NULL,
            overflow: Overflow::new(),
            cmp,
            group_default,
            acquire: None,
            release: None,
            sub_size: None,
            sub_get: None,
        }
    }

    /// Allow the same key multiple times. Iteration order within an
    /// equal range follows insertion order. Configure before the
    /// first insert.
    pub fn set_multi_key(&mut self) -> Result<&mut Self> {
        self.check_empty()?;
        self.options |= opts::MULTI_KEY;
        Ok(self)
    }

    /// With multi-key, insert new duplicates at the lower end of the
    /// equal range. Configure before the first insert.
    pub fn set_insert_lower(&mut self) -> Result<&mut Self> {
        self.check_empty()?;
        if self.options & opts::MULTI_KEY == 0 {
            err_at!(InvalidInput, msg: "insert-lower requires multi-key")?;
        }
        self.options |= opts::INSERT_LOWER;
        Ok(self)
    }

    /// Allow positional insert/replace while a comparator is
    /// configured. Positional mutations are then validated against
    /// neighbour order. Configure before the first insert.
    pub fn set_allow_index(&mut self) -> Result<&mut Self> {
        self.check_empty()?;
        self.options |= opts::ALLOW_INDEX;
        Ok(self)
    }

    /// Configure the sub-element hooks, `size` returns the number of
    /// sub-elements within an element and `sub` returns one of them.
    pub fn set_subelement_hooks<FS, FG>(&mut self, size: FS, sub: FG) -> &mut Self
    where
        FS: 'static + Fn(&T) -> usize,
        FG: 'static + for<'a> Fn(&'a T, usize) -> &'a dyn Any,
    {
        self.options |= opts::USE_SUBELEMENTS;
        self.sub_size = Some(Box::new(size));
        self.sub_get = Some(Box::new(sub));
        self
    }

    /// Configure the reference counting hooks, invoked when an
    /// element is transferred into, resp. out of, the index.
    pub fn set_refcount_hooks<FA, FR>(&mut self, acquire: FA, release: FR) -> &mut Self
    where
        FA: 'static + Fn(&T),
        FR: 'static + Fn(&T),
    {
        self.acquire = Some(Box::new(acquire));
        self.release = Some(Box::new(release));
        self
    }

    /// Freeze the index, further mutations shall fail with
    /// [Error::Finalized]. References obtained from `get`/`get_at`
    /// stay valid until the index is dropped.
    pub fn finalize(&mut self) {
        self.options |= opts::FINALIZED;
    }

    /// Return whether the index got finalized.
    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.options & opts::FINALIZED != 0
    }

    /// Return name of this index instance.
    #[inline]
    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    /// Return the branching factor this index was created with.
    #[inline]
    pub fn to_order(&self) -> usize {
        self.order
    }

    fn check_empty(&self) -> Result<()> {
        if self.root.is_null() {
            Ok(())
        } else {
            err_at!(InvalidInput, msg: "index {} not empty", self.name)
        }
    }

    fn check_mutable(&self) -> Result<()> {
        if self.is_finalized() {
            err_at!(Finalized, msg: "index {} finalized", self.name)
        } else {
            Ok(())
        }
    }

    #[inline]
    fn is_nocmp(&self) -> bool {
        self.options & opts::NOCMP != 0
    }

    #[inline]
    fn is_multi_key(&self) -> bool {
        self.options & opts::MULTI_KEY != 0
    }

    fn to_cmp(&self) -> Result<&CmpFn<T, G>> {
        match &self.cmp {
            Some(cmp) => Ok(cmp.as_ref()),
            None => err_at!(InvalidInput, msg: "index {} has no comparator", self.name),
        }
    }

    // positional mutation is allowed without comparator, or with
    // comparator when the allow-index option is set.
    fn check_by_index(&self) -> Result<()> {
        if self.is_nocmp() || (self.options & opts::ALLOW_INDEX) != 0 {
            Ok(())
        } else {
            err_at!(InvalidInput, msg: "index {} is keyed, positional mutation disabled", self.name)
        }
    }
}

impl<T, G> Index<T, G> {
    /// Return number of elements in the index.
    pub fn len(&self) -> usize {
        if self.root.is_null() {
            0
        } else {
            let node = self.node(self.root);
            let link = &node.links[node.fill()];
            link.offset + link.count
        }
    }

    /// Return whether the index is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return whether an element matching `key` is present.
    pub fn contains(&self, key: &T) -> Result<bool> {
        let cmp = self.to_cmp()?;
        let g = &self.group_default;
        let (_, _, found) = self.search_lower(key, |a, b| cmp(a, b, g));
        Ok(found)
    }

    /// Get the first element matching `key`. With multi-key, `get`,
    /// `put` and `remove` all operate on the first of the equal
    /// range.
    pub fn get(&self, key: &T) -> Result<Option<&T>> {
        let cmp = self.to_cmp()?;
        let g = &self.group_default;
        let (node, pos, found) = self.search_lower(key, |a, b| cmp(a, b, g));
        if found {
            Ok(Some(&self.node(node).elements[pos]))
        } else {
            Ok(None)
        }
    }

    /// Get the element at rank `index`.
    pub fn get_at(&self, index: usize) -> Result<&T> {
        let (node, pos, found) = self.search_index(index);
        if found {
            Ok(&self.node(node).elements[pos])
        } else {
            err_at!(OutOfBound, msg: "index {} beyond {}", index, self.len())
        }
    }

    /// Approximate number of heap bytes owned by this index.
    pub fn footprint(&self) -> usize {
        let mut bytes = mem::size_of::<Self>();
        bytes += self.nodes.capacity() * mem::size_of::<Node<T>>();
        for node in self.nodes.iter() {
            bytes += node.elements.capacity() * mem::size_of::<T>();
            bytes += node.links.capacity() * mem::size_of::<Link>();
        }
        bytes += self.free_ids.capacity() * mem::size_of::<NodeId>();
        bytes
    }

    /// Number of bytes of element payload held by this index.
    pub fn payload_footprint(&self) -> usize {
        self.len() * mem::size_of::<T>()
    }

    /// Gather statistics from this index instance.
    pub fn to_stats(&self) -> Stats {
        let mut depth = 0;
        let mut cur = self.root;
        while !cur.is_null() {
            depth += 1;
            cur = self.node(cur).links[0].child;
        }
        Stats {
            name: self.name.clone(),
            order: self.order,
            n_count: self.len(),
            n_nodes: self.nodes.len() - self.free_ids.len(),
            n_free: self.free_ids.len(),
            depth,
            footprint: self.footprint(),
        }
    }

    #[inline]
    pub(crate) fn node(&self, id: NodeId) -> &Node<T> {
        &self.nodes[id.off()]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        &mut self.nodes[id.off()]
    }

    pub(crate) fn alloc_node(&mut self) -> NodeId {
        match self.free_ids.pop() {
            Some(id) => {
                self.node_mut(id).reset();
                id
            }
            None => {
                self.nodes.push(Node::new(self.order));
                NodeId::new(self.nodes.len() - 1)
            }
        }
    }

    fn free_node(&mut self, id: NodeId) {
        let node = self.node_mut(id);
        node.elements.clear();
        node.links.clear();
        node.links.push(Link::default());
        node.parent = NodeId::NULL;
        node.child_index = 0;
        self.free_ids.push(id);
    }
}

// Search primitives, all top-down with a binary search per node.
impl<T, G> Index<T, G> {
    // return (node, pos, found), smallest position whose element
    // compares >= key. If all elements compare less, return the
    // imaginary end-of-node position on the rightmost leaf.
    pub(crate) fn search_lower<F>(&self, key: &T, cmp: F) -> (NodeId, usize, bool)
    where
        F: Fn(&T, &T) -> Ordering,
    {
        let mut candidate = (NodeId::NULL, 0);
        let mut found = false;
        let mut cur = self.root;
        let mut prev = NodeId::NULL;
        let mut prev_fill = 0;

        while !cur.is_null() {
            let node = self.node(cur);
            let (mut l, mut u) = (0_isize, node.fill() as isize - 1);
            prev = cur;
            prev_fill = node.fill();
            while l <= u {
                let m = l + (u - l) / 2;
                match cmp(&node.elements[m as usize], key) {
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
            cur = node.links[l as usize].child;
        }

        if candidate.0.is_null() && !prev.is_null() {
            candidate = (prev, prev_fill);
        }
        (candidate.0, candidate.1, found)
    }

    // return (node, pos, found), smallest position whose element
    // compares > key, `found` tells whether an equal element was
    // observed on the way.
    pub(crate) fn search_upper<F>(&self, key: &T, cmp: F) -> (NodeId, usize, bool)
    where
        F: Fn(&T, &T) -> Ordering,
    {
        let mut candidate = (NodeId::NULL, 0);
        let mut found = false;
        let mut cur = self.root;
        let mut prev = NodeId::NULL;
        let mut prev_fill = 0;

        while !cur.is_null() {
            let node = self.node(cur);
            let (mut l, mut u) = (0_isize, node.fill() as isize - 1);
            prev = cur;
            prev_fill = node.fill();
            while l <= u {
                let m = l + (u - l) / 2;
                match cmp(&node.elements[m as usize], key) {
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
            cur = node.links[l as usize].child;
        }

        if candidate.0.is_null() && !prev.is_null() {
            candidate = (prev, prev_fill);
        }
        (candidate.0, candidate.1, found)
    }

    // return (node, pos, found) for rank `index`. When not found:
    // node is null if index > size, otherwise index == size and
    // (node, pos) is the trailing slot where an append would land.
    pub(crate) fn search_index(&self, index: usize) -> (NodeId, usize, bool) {
        let mut cur = self.root;
        let mut offset = 0_isize;
        let index = index as isize;

        while !cur.is_null() {
            let node = self.node(cur);
            let fill = node.fill() as isize;
            let (mut l, mut u) = (0_isize, fill);
            let mut descended = false;
            while l <= u {
                let m = l + (u - l) / 2;
                let c = node.links[m as usize].count as isize;
                let o = offset + node.links[m as usize].offset as isize;
                if o + c == index {
                    if m == fill && !node.is_leaf() {
                        cur = node.links[m as usize].child;
                        offset = o;
                        descended = true;
                        break;
                    } else {
                        return (cur, m as usize, m < fill);
                    }
                } else if o > index {
                    u = m - 1;
                } else if o + c < index {
                    l = m + 1;
                } else {
                    cur = node.links[m as usize].child;
                    offset = o;
                    descended = true;
                    break;
                }
            }
            if !descended {
                break;
            }
        }
        (NodeId::NULL, 0, false)
    }

    // rank of position (node, pos), walks the spine up accumulating
    // link offsets.
    pub(crate) fn to_index(&self, node: NodeId, pos: usize) -> usize {
        if node.is_null() {
            return 0;
        }
        let mut node = node;
        let mut pos = pos;
        let mut index = self.node(node).links[pos].count;
        loop {
            let n = self.node(node);
            index += n.links[pos].offset;
            pos = n.child_index;
            node = n.parent;
            if node.is_null() {
                break index;
            }
        }
    }

    // convert (node, pos) to the leaf position where an insert keeps
    // the new element immediately before the element at (node, pos).
    fn to_insert_before(&self, node: &mut NodeId, pos: &mut usize) {
        if node.is_null() {
            // all elements compare less, append at the rightmost slot.
            if self.root.is_null() {
                return;
            }
            *node = self.root;
            *pos = self.node(self.root).fill();
        }
        while !self.node(*node).is_leaf() {
            *node = self.node(*node).links[*pos].child;
            *pos = self.node(*node).fill();
        }
    }

    pub(crate) fn to_next(&self, node_: &mut NodeId, pos_: &mut usize) -> bool {
        let mut node = *node_;
        let mut pos = *pos_;

        if pos == self.node(node).fill() {
            return false;
        }
        pos += 1;
        // descend
        while !self.node(node).links[pos].child.is_null() {
            node = self.node(node).links[pos].child;
            pos = 0;
        }
        // ascend
        while pos == self.node(node).fill() {
            let n = self.node(node);
            pos = n.child_index;
            node = n.parent;
            if node.is_null() {
                // *node_ is the rightmost leaf, move to the imaginary
                // element after its end.
                *pos_ += 1;
                return true;
            }
        }
        *node_ = node;
        *pos_ = pos;
        true
    }

    pub(crate) fn to_prev(&self, node_: &mut NodeId, pos_: &mut usize) -> bool {
        let mut node = *node_;
        let mut pos = *pos_;

        // descend
        while !self.node(node).links[pos].child.is_null() {
            node = self.node(node).links[pos].child;
            pos = self.node(node).fill();
        }
        // ascend
        while pos == 0 {
            let n = self.node(node);
            pos = n.child_index;
            node = n.parent;
            if node.is_null() {
                return false;
            }
        }
        pos -= 1;
        *node_ = node;
        *pos_ = pos;
        true
    }
}

// Rebalancer. `adjust` drains the overflow slot and repairs
// underflowing nodes, one redistribute/split/concatenate per level.
impl<T, G> Index<T, G> {
    fn left_sibling(&self, node: NodeId) -> NodeId {
        let n = self.node(node);
        if n.parent.is_null() || n.child_index == 0 {
            NodeId::NULL
        } else {
            self.node(n.parent).links[n.child_index - 1].child
        }
    }

    fn right_sibling(&self, node: NodeId) -> NodeId {
        let n = self.node(node);
        if n.parent.is_null() {
            NodeId::NULL
        } else {
            let p = self.node(n.parent);
            if n.child_index == p.fill() {
                NodeId::NULL
            } else {
                p.links[n.child_index + 1].child
            }
        }
    }

    #[inline]
    fn near_overflowing(&self, node: NodeId) -> bool {
        self.node(node).fill() == self.order - 1
    }

    #[inline]
    fn underflowing(&self, node: NodeId) -> bool {
        self.node(node).fill() < self.order / 2
    }

    // whether a sibling can lend an element and stay at or above
    // the minimum fill.
    #[inline]
    fn can_lend(&self, node: NodeId) -> bool {
        self.node(node).fill() > self.order / 2
    }

    fn new_root(&mut self) {
        let root = self.alloc_node();
        if !self.root.is_null() {
            let old = self.root;
            let total = if self.overflow.node == old {
                self.overflow.link.offset + self.overflow.link.count
            } else {
                let on = self.node(old);
                on.links[on.fill()].offset + on.links[on.fill()].count
            };
            self.node_mut(old).parent = root;
            self.node_mut(old).child_index = 0;
            self.node_mut(root).links[0] = Link { offset: 0, count: total, child: old };
        }
        self.root = root;
    }

    // split the overflowing node `l` into `l` and a fresh right
    // sibling, promoting the median into the parent. The parent may
    // in turn become the overflow owner.
    fn split(&mut self, l: NodeId) {
        let order = self.order;
        let sidx = order / 2;

        debug_assert!(self.overflow.node == l);
        debug_assert!(l != self.root);
        debug_assert!(self.node(l).fill() == order - 1);

        let p = self.node(l).parent;
        let ci = self.node(l).child_index;
        let r = self.alloc_node();

        // carve off the upper half of `l` together with the parked
        // overflow element/link.
        let (mut r_elements, mut r_links, promoted) = {
            let ln = self.node_mut(l);
            let mut tail = ln.elements.split_off(sidx);
            let links = ln.links.split_off(sidx + 1);
            let promoted = tail.remove(0);
            (tail, links, promoted)
        };
        r_elements.push(self.overflow.element.take().unwrap());
        r_links.push(self.overflow.link);
        let r_fill = r_elements.len();

        {
            let rn = self.node_mut(r);
            rn.parent = p;
            rn.child_index = ci + 1;
            rn.elements = r_elements;
            rn.links = r_links;
        }

        if ci + 1 == order {
            // new right node lands in the parent's overflow position.
            self.overflow.element = Some(promoted);
            self.overflow.node = p;
        } else {
            if self.node(p).fill() == order - 1 {
                // parent will overflow, park its last element/link.
                let (elem, link) = {
                    let pn = self.node_mut(p);
                    (pn.elements.pop().unwrap(), pn.links.pop().unwrap())
                };
                if !link.child.is_null() {
                    self.node_mut(link.child).child_index = order;
                }
                self.overflow.element = Some(elem);
                self.overflow.link = link;
                self.overflow.node = p;
            } else {
                self.overflow.clear();
            }
            {
                let pn = self.node_mut(p);
                pn.elements.insert(ci, promoted);
                pn.links.insert(ci + 1, Link { offset: 0, count: 0, child: r });
            }
            for i in (ci + 1)..=self.node(p).fill() {
                let child = self.node(p).links[i].child;
                if !child.is_null() {
                    self.node_mut(child).child_index = i;
                }
            }
        }

        // reparent the children that moved into the right node.
        for i in 0..=r_fill {
            let child = self.node(r).links[i].child;
            if !child.is_null() {
                let cn = self.node_mut(child);
                cn.parent = r;
                cn.child_index = i;
            }
        }

        // recompute rank metadata. n elements went to the right node
        // and one to the parent.
        let n = self.node_mut(r).reset_offsets();
        let r_link = {
            let pn = self.node_mut(p);
            pn.links[ci].count -= n + 1;
            Link {
                offset: pn.links[ci].offset + pn.links[ci].count + 1,
                count: n,
                child: r,
            }
        };
        if ci + 1 == order {
            self.overflow.link = r_link;
        } else {
            self.node_mut(p).links[ci + 1] = r_link;
        }
    }

    // merge `l`, the separating parent element and `l`'s right
    // sibling into `l`. When the merged node would hold `order`
    // elements the right node's tail is parked in the overflow slot,
    // owned by `l`.
    fn concatenate(&mut self, l: NodeId) {
        debug_assert!(self.overflow.is_empty());

        let p = self.node(l).parent;
        let ci = self.node(l).child_index;
        debug_assert!(ci < self.order - 1);
        let r = self.node(p).links[ci + 1].child;

        let l_fill = self.node(l).fill();
        let mut r_fill = self.node(r).fill();
        debug_assert!(l_fill + 1 + r_fill <= self.order);

        if l_fill + 1 + r_fill == self.order {
            let (elem, link) = {
                let rn = self.node_mut(r);
                (rn.elements.pop().unwrap(), rn.links.pop().unwrap())
            };
            if !link.child.is_null() {
                let order = self.order;
                let cn = self.node_mut(link.child);
                cn.parent = l;
                cn.child_index = order;
            }
            self.overflow.element = Some(elem);
            self.overflow.link = link;
            self.overflow.node = l;
            r_fill -= 1;
        }

        let sep = self.node_mut(p).elements.remove(ci);
        let (r_elements, r_links) = {
            let rn = self.node_mut(r);
            (mem::take(&mut rn.elements), mem::take(&mut rn.links))
        };
        {
            let ln = self.node_mut(l);
            ln.elements.push(sep);
            ln.elements.extend(r_elements);
            ln.links.extend(r_links);
        }
        self.node_mut(p).links.remove(ci + 1);

        let l_fill = self.node(l).fill();
        for i in (l_fill - r_fill)..=l_fill {
            let child = self.node(l).links[i].child;
            if !child.is_null() {
                let cn = self.node_mut(child);
                cn.parent = l;
                cn.child_index = i;
            }
        }
        for i in (ci + 1)..=self.node(p).fill() {
            let child = self.node(p).links[i].child;
            if !child.is_null() {
                self.node_mut(child).child_index = i;
            }
        }

        self.free_node(r);

        let mut n = self.node_mut(l).reset_offsets();
        if self.overflow.node == l {
            n += 1;
            self.overflow.link.offset = n;
            n += self.overflow.link.count;
        }
        self.node_mut(p).links[ci].count = n;
    }

    // move one element from `l` through the parent into `l`'s right
    // sibling, making room in `l`. Drains the overflow slot when `l`
    // owns it.
    fn lr_redistribute(&mut self, l: NodeId) {
        debug_assert!(self.overflow.node == l || self.overflow.is_empty());
        debug_assert!(l != self.root);

        let p = self.node(l).parent;
        let ci = self.node(l).child_index;
        debug_assert!(ci < self.order - 1);
        let r = self.node(p).links[ci + 1].child;
        debug_assert!(self.node(r).fill() < self.order - 1);

        let (from_l, link) = if self.overflow.node == l {
            let elem = self.overflow.element.take().unwrap();
            let link = self.overflow.link;
            self.overflow.clear();
            (elem, link)
        } else {
            let ln = self.node_mut(l);
            (ln.elements.pop().unwrap(), ln.links.pop().unwrap())
        };
        let sep = mem::replace(&mut self.node_mut(p).elements[ci], from_l);
        {
            let rn = self.node_mut(r);
            rn.elements.insert(0, sep);
            rn.links.insert(0, link);
        }

        if !link.child.is_null() {
            self.node_mut(link.child).parent = r;
        }
        for i in 0..=self.node(r).fill() {
            let child = self.node(r).links[i].child;
            if !child.is_null() {
                self.node_mut(child).child_index = i;
            }
        }

        // n elements moved out of the left subtree into the right.
        let n = self.node(r).links[0].count + 1;
        {
            let pn = self.node_mut(p);
            pn.links[ci].count -= n;
            pn.links[ci + 1].count += n;
            pn.links[ci + 1].offset -= n;
        }
        {
            let rn = self.node_mut(r);
            rn.links[0].offset = 0;
            for i in 1..rn.links.len() {
                rn.links[i].offset += n;
            }
        }
    }

    // mirror of lr_redistribute, move the right node's first element
    // through the parent into the left sibling's tail.
    fn rl_redistribute(&mut self, r: NodeId) {
        debug_assert!(self.overflow.node == r || self.overflow.is_empty());
        debug_assert!(r != self.root);

        let p = self.node(r).parent;
        let rci = self.node(r).child_index;
        debug_assert!(rci > 0);
        let lci = rci - 1;
        let l = self.node(p).links[lci].child;
        debug_assert!(self.node(l).fill() < self.order - 1);

        let first_elem = self.node_mut(r).elements.remove(0);
        let first_link = self.node_mut(r).links.remove(0);
        let sep = mem::replace(&mut self.node_mut(p).elements[lci], first_elem);
        {
            let ln = self.node_mut(l);
            ln.elements.push(sep);
            ln.links.push(first_link);
        }

        if self.overflow.node == r {
            let elem = self.overflow.element.take().unwrap();
            let link = self.overflow.link;
            self.overflow.clear();
            let rn = self.node_mut(r);
            rn.elements.push(elem);
            rn.links.push(link);
        }

        for i in 0..=self.node(r).fill() {
            let child = self.node(r).links[i].child;
            if !child.is_null() {
                self.node_mut(child).child_index = i;
            }
        }

        let l_fill = self.node(l).fill();
        let n = self.node(l).links[l_fill].count + 1;
        {
            let pn = self.node_mut(p);
            pn.links[lci].count += n;
            pn.links[rci].count -= n;
            pn.links[rci].offset += n;
        }
        {
            let ln = self.node_mut(l);
            ln.links[l_fill].offset = if l_fill == 0 {
                0
            } else {
                ln.links[l_fill - 1].offset + ln.links[l_fill - 1].count + 1
            };
        }
        {
            let moved = self.node(l).links[l_fill].child;
            if !moved.is_null() {
                let cn = self.node_mut(moved);
                cn.parent = l;
                cn.child_index = l_fill;
            }
        }
        for i in 0..self.node(r).links.len() {
            self.node_mut(r).links[i].offset -= n;
        }
    }

    fn adjust(&mut self, node: NodeId) {
        if self.overflow.node == node {
            let left = self.left_sibling(node);
            let right = self.right_sibling(node);
            if !right.is_null() && !self.near_overflowing(right) {
                self.lr_redistribute(node);
            } else if !left.is_null() && !self.near_overflowing(left) {
                self.rl_redistribute(node);
            } else if self.node(node).parent.is_null() {
                self.new_root();
                self.split(node);
            } else {
                let parent = self.node(node).parent;
                self.split(node);
                self.adjust(parent);
            }
        } else if self.underflowing(node) {
            let left = self.left_sibling(node);
            let right = self.right_sibling(node);
            if !left.is_null() && self.can_lend(left) {
                self.lr_redistribute(left);
            } else if !right.is_null() && self.can_lend(right) {
                self.rl_redistribute(right);
            } else if self.node(node).parent.is_null() {
                if self.node(node).fill() == 0 {
                    // root lost its last element, promote its only child.
                    let child = self.node(node).links[0].child;
                    #[cfg(feature = "debug")]
                    println!("root {:?} collapsed into {:?}", node, child);
                    self.root = child;
                    if !child.is_null() {
                        self.node_mut(child).parent = NodeId::NULL;
                    }
                    self.free_node(node);
                }
            } else if !right.is_null() {
                let parent = self.node(node).parent;
                self.concatenate(node);
                if self.overflow.node == node {
                    // merged node ended up with `order` elements,
                    // shed the parked one.
                    self.adjust(node);
                }
                self.adjust(parent);
            } else {
                // a left sibling must exist.
                let parent = self.node(node).parent;
                self.concatenate(left);
                if self.overflow.node == left {
                    self.adjust(left);
                }
                self.adjust(parent);
            }
        }
    }

    fn update_count(&mut self, node: NodeId, amount: isize) {
        let mut node = node;
        loop {
            let (parent, ci) = {
                let n = self.node(node);
                (n.parent, n.child_index)
            };
            if parent.is_null() {
                break;
            }
            let pn = self.node_mut(parent);
            pn.links[ci].count = (pn.links[ci].count as isize + amount) as usize;
            for i in (ci + 1)..pn.links.len() {
                pn.links[i].offset = (pn.links[i].offset as isize + amount) as usize;
            }
            node = parent;
        }
    }

    fn node_insert(&mut self, node: NodeId, pos: usize, elem: T) {
        if let Some(acquire) = &self.acquire {
            acquire(&elem);
        }
        if self.root.is_null() {
            self.new_root();
        }
        let (node, pos) = if node.is_null() { (self.root, 0) } else { (node, pos) };
        let order = self.order;

        if pos == order - 1 {
            // new element goes straight to the overflow position.
            self.overflow.element = Some(elem);
            self.overflow.node = node;
        } else {
            if self.node(node).fill() == order - 1 {
                // node will overflow, park its last element.
                let parked = self.node_mut(node).elements.pop().unwrap();
                self.overflow.element = Some(parked);
                self.overflow.node = node;
            }
            let grow = self.overflow.node != node;
            let n = self.node_mut(node);
            n.elements.insert(pos, elem);
            if grow {
                let fill = n.fill();
                n.links.push(Link { offset: fill, count: 0, child: NodeId::NULL });
            }
        }
        if self.overflow.node == node {
            self.overflow.link.offset = self.node(node).fill() + 1;
        } else {
            let n = self.node_mut(node);
            let fill = n.fill();
            n.links[fill].offset = fill;
        }

        self.update_count(node, 1);
        self.adjust(node);
    }

    fn node_replace(&mut self, node: NodeId, pos: usize, elem: T) -> T {
        if let Some(acquire) = &self.acquire {
            acquire(&elem);
        }
        let old = mem::replace(&mut self.node_mut(node).elements[pos], elem);
        if let Some(release) = &self.release {
            release(&old);
        }
        old
    }

    fn node_remove(&mut self, node: NodeId, pos: usize) -> T {
        let removed;
        let target;
        if self.node(node).is_leaf() {
            let n = self.node_mut(node);
            removed = n.elements.remove(pos);
            n.links.pop();
            if node == self.root && self.node(node).fill() == 0 {
                self.free_node(node);
                self.root = NodeId::NULL;
                return removed;
            }
            target = node;
        } else {
            // replace with the first element of the leftmost leaf of
            // the right subtree, reducing to a leaf removal.
            let mut cur = self.node(node).links[pos + 1].child;
            while !self.node(cur).is_leaf() {
                cur = self.node(cur).links[0].child;
            }
            let succ = {
                let cn = self.node_mut(cur);
                let succ = cn.elements.remove(0);
                cn.links.pop();
                succ
            };
            removed = mem::replace(&mut self.node_mut(node).elements[pos], succ);
            target = cur;
        }
        self.update_count(target, -1);
        self.adjust(target);
        removed
    }

    // check whether `elem` keeps comparator order at position
    // (node, pos). With `replace` the occupant is going away and the
    // successor is checked instead.
    pub(crate) fn validate_at(
        &self,
        cmp: &CmpFn<T, G>,
        elem: &T,
        node: NodeId,
        pos: usize,
        replace: bool,
    ) -> bool {
        if node.is_null() {
            return true;
        }
        let g = &self.group_default;

        // element before must compare <= elem.
        let (mut pn, mut pp) = (node, pos);
        if self.to_prev(&mut pn, &mut pp)
            && cmp(&self.node(pn).elements[pp], elem, g) == Ordering::Greater
        {
            return false;
        }

        // element after must compare >= elem.
        let after = if replace {
            let (mut nn, mut np) = (node, pos);
            if self.to_next(&mut nn, &mut np) && np < self.node(nn).fill() {
                Some((nn, np))
            } else {
                None
            }
        } else if pos < self.node(node).fill() {
            Some((node, pos))
        } else {
            None
        };
        if let Some((nn, np)) = after {
            if cmp(&self.node(nn).elements[np], elem, g) == Ordering::Less {
                return false;
            }
        }
        true
    }
}

// Public mutation operations.
impl<T, G> Index<T, G> {
    /// Insert a new element. In unique mode fail with
    /// [Error::KeyExists] when an equal element is present. With
    /// multi-key, duplicates land at the upper end of the equal
    /// range, or the lower end under the insert-lower option.
    pub fn insert(&mut self, elem: T) -> Result<()> {
        self.check_mutable()?;
        let cmp = self.to_cmp()?;
        let g = &self.group_default;
        debug_assert!(self.overflow.is_empty());

        let (mut node, mut pos, found) = if self.options & opts::INSERT_LOWER != 0 {
            self.search_lower(&elem, |a, b| cmp(a, b, g))
        } else {
            self.search_upper(&elem, |a, b| cmp(a, b, g))
        };
        if !self.is_multi_key() && found {
            return err_at!(KeyExists, msg: "duplicate key in index {}", self.name);
        }
        self.to_insert_before(&mut node, &mut pos);
        self.node_insert(node, pos, elem);
        Ok(())
    }

    /// Insert a new element at rank `index`, `0 <= index <= len`.
    /// Requires a rank-only index, or the allow-index option, in
    /// which case the element must preserve comparator order at that
    /// rank.
    pub fn insert_at(&mut self, index: usize, elem: T) -> Result<()> {
        self.check_mutable()?;
        self.check_by_index()?;
        if index > self.len() {
            return err_at!(OutOfBound, msg: "index {} beyond {}", index, self.len());
        }
        debug_assert!(self.overflow.is_empty());

        let (mut node, mut pos, _) = self.search_index(index);
        if !self.is_nocmp() {
            let cmp = self.to_cmp()?;
            if !self.validate_at(cmp, &elem, node, pos, false) {
                return err_at!(InvalidInput, msg: "element breaks ordering at {}", index);
            }
        }
        self.to_insert_before(&mut node, &mut pos);
        self.node_insert(node, pos, elem);
        Ok(())
    }

    /// Insert or replace. When an equal element exists the first of
    /// the equal range is replaced and returned, otherwise the
    /// element is inserted.
    pub fn put(&mut self, elem: T) -> Result<Option<T>> {
        self.check_mutable()?;
        let cmp = self.to_cmp()?;
        let g = &self.group_default;
        debug_assert!(self.overflow.is_empty());

        let (mut node, mut pos, found) = self.search_lower(&elem, |a, b| cmp(a, b, g));
        if found {
            Ok(Some(self.node_replace(node, pos, elem)))
        } else {
            self.to_insert_before(&mut node, &mut pos);
            self.node_insert(node, pos, elem);
            Ok(None)
        }
    }

    /// Insert or replace at rank `index`. `index == len` appends.
    /// Same preconditions as [Index::insert_at].
    pub fn put_at(&mut self, index: usize, elem: T) -> Result<Option<T>> {
        self.check_mutable()?;
        self.check_by_index()?;
        if index > self.len() {
            return err_at!(OutOfBound, msg: "index {} beyond {}", index, self.len());
        }
        debug_assert!(self.overflow.is_empty());

        let (mut node, mut pos, found) = self.search_index(index);
        if !self.is_nocmp() {
            let cmp = self.to_cmp()?;
            if !self.validate_at(cmp, &elem, node, pos, found) {
                return err_at!(InvalidInput, msg: "element breaks ordering at {}", index);
            }
        }
        if found {
            Ok(Some(self.node_replace(node, pos, elem)))
        } else {
            self.to_insert_before(&mut node, &mut pos);
            self.node_insert(node, pos, elem);
            Ok(None)
        }
    }

    /// Remove the first element matching `key` and return it.
    pub fn remove(&mut self, key: &T) -> Result<T> {
        self.check_mutable()?;
        let cmp = self.to_cmp()?;
        let g = &self.group_default;
        debug_assert!(self.overflow.is_empty());

        let (node, pos, found) = self.search_lower(key, |a, b| cmp(a, b, g));
        if !found {
            return err_at!(KeyNotFound, msg: "no such key in index {}", self.name);
        }
        let removed = self.node_remove(node, pos);
        if let Some(release) = &self.release {
            release(&removed);
        }
        Ok(removed)
    }

    /// Remove the element at rank `index` and return it.
    pub fn remove_at(&mut self, index: usize) -> Result<T> {
        self.check_mutable()?;
        if index >= self.len() {
            return err_at!(OutOfBound, msg: "index {} beyond {}", index, self.len());
        }
        debug_assert!(self.overflow.is_empty());

        let (node, pos, found) = self.search_index(index);
        if !found {
            return err_at!(KeyNotFound, msg: "no element at {}", index);
        }
        let removed = self.node_remove(node, pos);
        if let Some(release) = &self.release {
            release(&removed);
        }
        Ok(removed)
    }

    /// Remove the first element matching `key` under `group` and
    /// return it.
    pub fn remove_group(&mut self, key: &T, group: &G) -> Result<T> {
        self.check_mutable()?;
        let cmp = self.to_cmp()?;
        debug_assert!(self.overflow.is_empty());

        let (node, pos, found) = self.search_lower(key, |a, b| cmp(a, b, group));
        if !found {
            return err_at!(KeyNotFound, msg: "no such key in index {}", self.name);
        }
        let removed = self.node_remove(node, pos);
        if let Some(release) = &self.release {
            release(&removed);
        }
        Ok(removed)
    }

    /// Remove elements in rank range `[l, u)`, return the number of
    /// elements removed.
    pub fn remove_range(&mut self, l: usize, u: usize) -> Result<usize> {
        self.check_mutable()?;
        if l > u || u > self.len() {
            return err_at!(OutOfBound, msg: "range {}..{} beyond {}", l, u, self.len());
        }
        for _ in l..u {
            self.remove_at(l)?;
        }
        Ok(u - l)
    }

    /// Swap the elements at ranks `index_a` and `index_b`. With a
    /// comparator the two elements must compare equal, so the swap
    /// can only reorder duplicates.
    pub fn swap(&mut self, index_a: usize, index_b: usize) -> Result<()> {
        self.check_mutable()?;
        self.check_by_index()?;
        let size = self.len();
        if index_a >= size || index_b >= size {
            return err_at!(OutOfBound, msg: "swap {}/{} beyond {}", index_a, index_b, size);
        }
        if index_a == index_b {
            return Ok(());
        }

        let (node_a, pos_a, _) = self.search_index(index_a);
        let (node_b, pos_b, _) = self.search_index(index_b);
        if !self.is_nocmp() {
            let cmp = self.to_cmp()?;
            let g = &self.group_default;
            let (a, b) = (&self.node(node_a).elements[pos_a], &self.node(node_b).elements[pos_b]);
            if cmp(a, b, g) != Ordering::Equal {
                return err_at!(InvalidInput, msg: "swap of unequal elements");
            }
        }

        let (a, b) = (node_a.off(), node_b.off());
        if a == b {
            self.nodes[a].elements.swap(pos_a, pos_b);
        } else if a < b {
            let (s1, s2) = self.nodes.split_at_mut(b);
            mem::swap(&mut s1[a].elements[pos_a], &mut s2[0].elements[pos_b]);
        } else {
            let (s1, s2) = self.nodes.split_at_mut(a);
            mem::swap(&mut s2[0].elements[pos_a], &mut s1[b].elements[pos_b]);
        }
        Ok(())
    }

    /// Remove all elements. The release hook, if any, is invoked for
    /// every element.
    pub fn clear(&mut self) -> Result<()> {
        self.check_mutable()?;
        if let Some(release) = &self.release {
            for node in self.nodes.iter() {
                for elem in node.elements.iter() {
                    release(elem);
                }
            }
        }
        self.nodes.clear();
        self.free_ids.clear();
        self.root = NodeId::NULL;
        self.overflow.clear();
        Ok(())
    }
}

// Search operations returning cursors.
impl<T, G> Index<T, G> {
    pub(crate) fn make_cursor(&self, node: NodeId, pos: usize, found: bool) -> Cursor {
        Cursor {
            node,
            pos,
            index: self.to_index(node, pos),
            found,
        }
    }

    /// Cursor at the first element. For an empty index this equals
    /// [Index::find_end].
    pub fn find_begin(&self) -> Cursor {
        let mut node = self.root;
        let mut child = self.root;
        while !child.is_null() {
            node = child;
            child = self.node(node).links[0].child;
        }
        Cursor { node, pos: 0, index: 0, found: !node.is_null() }
    }

    /// Cursor at the imaginary element after the last one. Its index
    /// equals the number of elements.
    pub fn find_end(&self) -> Cursor {
        if self.root.is_null() {
            return Cursor { node: NodeId::NULL, pos: 0, index: 0, found: false };
        }
        let index = self.len();
        let mut node = self.root;
        loop {
            let n = self.node(node);
            let child = n.links[n.fill()].child;
            if child.is_null() {
                break;
            }
            node = child;
        }
        Cursor { node, pos: self.node(node).fill(), index, found: false }
    }

    /// Cursor at rank `index`.
    pub fn find_at(&self, index: usize) -> Result<Cursor> {
        let (node, pos, found) = self.search_index(index);
        if found {
            Ok(self.make_cursor(node, pos, true))
        } else {
            err_at!(KeyNotFound, msg: "no element at {}", index)
        }
    }

    /// Cursor at the first element comparing >= `key`. If all
    /// elements compare less the end cursor is returned.
    pub fn find_lower(&self, key: &T) -> Result<Cursor> {
        let cmp = self.to_cmp()?;
        let g = &self.group_default;
        let (node, pos, found) = self.search_lower(key, |a, b| cmp(a, b, g));
        Ok(self.make_cursor(node, pos, found))
    }

    /// Cursor at the first element comparing > `key`. If all
    /// elements compare less-or-equal the end cursor is returned.
    pub fn find_upper(&self, key: &T) -> Result<Cursor> {
        let cmp = self.to_cmp()?;
        let g = &self.group_default;
        let (node, pos, found) = self.search_upper(key, |a, b| cmp(a, b, g));
        Ok(self.make_cursor(node, pos, found))
    }

    /// Like [Index::find_lower] with a caller supplied group.
    pub fn find_lower_group(&self, key: &T, group: &G) -> Result<Cursor> {
        let cmp = self.to_cmp()?;
        let (node, pos, found) = self.search_lower(key, |a, b| cmp(a, b, group));
        Ok(self.make_cursor(node, pos, found))
    }

    /// Like [Index::find_upper] with a caller supplied group.
    pub fn find_upper_group(&self, key: &T, group: &G) -> Result<Cursor> {
        let cmp = self.to_cmp()?;
        let (node, pos, found) = self.search_upper(key, |a, b| cmp(a, b, group));
        Ok(self.make_cursor(node, pos, found))
    }

    /// Like [Index::find_lower] with a caller supplied comparator.
    /// The comparator must be compatible with the index order, it may
    /// only coarsen it.
    pub fn find_lower_with<F>(&self, key: &T, cmp: F) -> Cursor
    where
        F: Fn(&T, &T) -> Ordering,
    {
        let (node, pos, found) = self.search_lower(key, cmp);
        self.make_cursor(node, pos, found)
    }

    /// Like [Index::find_upper] with a caller supplied comparator.
    pub fn find_upper_with<F>(&self, key: &T, cmp: F) -> Cursor
    where
        F: Fn(&T, &T) -> Ordering,
    {
        let (node, pos, found) = self.search_upper(key, cmp);
        self.make_cursor(node, pos, found)
    }

    /// Total number of sub-elements across the index, requires the
    /// sub-element hooks.
    pub fn count_subelements(&self) -> Result<usize> {
        let size = match &self.sub_size {
            Some(size) => size,
            None => return err_at!(InvalidInput, msg: "sub-element hooks not configured"),
        };
        let mut count = 0;
        for node in self.nodes.iter() {
            for elem in node.elements.iter() {
                count += size(elem);
            }
        }
        Ok(count)
    }

    /// Resolve sub-element `i` of the element under `cursor`,
    /// requires the sub-element hooks.
    pub fn subelement<'a>(&'a self, cursor: &Cursor, i: usize) -> Result<&'a dyn Any> {
        let sub = match &self.sub_get {
            Some(sub) => sub,
            None => return err_at!(InvalidInput, msg: "sub-element hooks not configured"),
        };
        match self.element(cursor) {
            Some(elem) => Ok(sub(elem, i)),
            None => err_at!(KeyNotFound, msg: "cursor at end"),
        }
    }

    /// Resolve the element under `cursor`, None for end cursors.
    pub fn element<'a>(&'a self, cursor: &Cursor) -> Option<&'a T> {
        if cursor.node.is_null() {
            return None;
        }
        let node = self.nodes.get(cursor.node.off())?;
        node.elements.get(cursor.pos)
    }

    /// Step `cursor` to the next element, return the new rank.
    /// Stepping past [Index::find_end] fails with
    /// [Error::KeyNotFound].
    pub fn iterate_next(&self, cursor: &mut Cursor) -> Result<usize> {
        if cursor.node.is_null() {
            return err_at!(KeyNotFound, msg: "iterating past end");
        }
        let (mut node, mut pos) = (cursor.node, cursor.pos);
        if !self.to_next(&mut node, &mut pos) {
            return err_at!(KeyNotFound, msg: "iterating past end");
        }
        cursor.node = node;
        cursor.pos = pos;
        cursor.index += 1;
        cursor.found = pos < self.node(node).fill();
        Ok(cursor.index)
    }

    /// Step `cursor` to the previous element, return the new rank.
    /// Stepping before [Index::find_begin] fails with
    /// [Error::KeyNotFound].
    pub fn iterate_prev(&self, cursor: &mut Cursor) -> Result<usize> {
        if cursor.node.is_null() {
            return err_at!(KeyNotFound, msg: "iterating before begin");
        }
        let (mut node, mut pos) = (cursor.node, cursor.pos);
        if !self.to_prev(&mut node, &mut pos) {
            return err_at!(KeyNotFound, msg: "iterating before begin");
        }
        cursor.node = node;
        cursor.pos = pos;
        cursor.index -= 1;
        cursor.found = true;
        Ok(cursor.index)
    }

    /// Check whether the element under `cursor`, whose key may have
    /// been modified in place, is still valid at its position.
    pub fn validate_modified(&self, cursor: &Cursor) -> Result<()> {
        let cmp = self.to_cmp()?;
        let elem = match self.element(cursor) {
            Some(elem) => elem,
            None => return err_at!(InvalidInput, msg: "cursor at end"),
        };
        if self.validate_at(cmp, elem, cursor.node, cursor.pos, true) {
            Ok(())
        } else {
            err_at!(InvalidInput, msg: "element breaks ordering at {}", cursor.index)
        }
    }

    /// Full table scan, in comparator order.
    pub fn iter(&self) -> Iter<T, G> {
        Iter::new(self, self.find_begin())
    }
}

// Deep validation of the tree shape, used by tests after every kind
// of mutation.
impl<T, G> Index<T, G> {
    /// Validate the btree with following rules:
    ///
    /// * Every non-root node holds at least ceil(order/2)-1 and at
    ///   most order-1 elements.
    /// * A node has either no children or fill+1 children, and all
    ///   leaf nodes are at the same depth.
    /// * Parent/child-index back references are consistent.
    /// * Every link's count equals the number of elements in the
    ///   child's subtree and its offset the running within-node rank.
    /// * Elements are in comparator order within and across nodes,
    ///   duplicates only with the multi-key option.
    /// * The overflow slot is empty.
    pub fn validate(&self) -> Result<()> {
        if !self.overflow.is_empty() {
            return err_at!(Fatal, msg: "overflow slot occupied outside mutation");
        }
        if self.root.is_null() {
            return Ok(());
        }
        let (count, _) = self.validate_tree(self.root, NodeId::NULL, 0, None, None)?;
        if count != self.len() {
            return err_at!(Fatal, msg: "tree count {} != size {}", count, self.len());
        }
        Ok(())
    }

    fn validate_tree(
        &self,
        node: NodeId,
        parent: NodeId,
        child_index: usize,
        lower: Option<&T>,
        upper: Option<&T>,
    ) -> Result<(usize, usize)> {
        let n = self.node(node);

        if n.parent != parent {
            return err_at!(Fatal, msg: "{:?} bad parent {:?}", node, n.parent);
        }
        if !parent.is_null() && n.child_index != child_index {
            return err_at!(Fatal, msg: "{:?} bad child_index {}", node, n.child_index);
        }
        if n.fill() > self.order - 1 {
            return err_at!(Fatal, msg: "{:?} overfull {}", node, n.fill());
        }
        // a split of an even-order node leaves ceil(order/2) - 1
        // elements on the lighter side.
        if !parent.is_null() && n.fill() < (self.order + 1) / 2 - 1 {
            return err_at!(Fatal, msg: "{:?} underfull {}", node, n.fill());
        }
        if n.links.len() != n.fill() + 1 {
            return err_at!(Fatal, msg: "{:?} has {} links", node, n.links.len());
        }
        let leaf = n.is_leaf();
        for link in n.links.iter() {
            if link.child.is_null() != leaf {
                return err_at!(Fatal, msg: "{:?} mixes leaf/non-leaf links", node);
            }
        }

        if let Some(cmp) = &self.cmp {
            let g = &self.group_default;
            let mut bound = lower;
            for elem in n.elements.iter() {
                if let Some(b) = bound {
                    let ord = cmp(b, elem, g);
                    let ok = match self.is_multi_key() {
                        true => ord != Ordering::Greater,
                        false => ord == Ordering::Less,
                    };
                    if !ok {
                        return err_at!(Fatal, msg: "{:?} breaks sort order", node);
                    }
                }
                bound = Some(elem);
            }
            if let (Some(last), Some(up)) = (n.elements.last(), upper) {
                let ord = cmp(last, up, g);
                let ok = match self.is_multi_key() {
                    true => ord != Ordering::Greater,
                    false => ord == Ordering::Less,
                };
                if !ok {
                    return err_at!(Fatal, msg: "{:?} breaks sort order at bound", node);
                }
            }
        }

        let mut total = n.fill();
        let mut offset = 0;
        let mut depth = 1;
        for (i, link) in n.links.iter().enumerate() {
            if link.offset != offset {
                return err_at!(Fatal, msg: "{:?} link {} offset {} != {}", node, i, link.offset, offset);
            }
            if leaf {
                if link.count != 0 {
                    return err_at!(Fatal, msg: "{:?} leaf link {} count {}", node, i, link.count);
                }
            } else {
                let lo = if i == 0 { lower } else { Some(&n.elements[i - 1]) };
                let hi = if i == n.fill() { upper } else { Some(&n.elements[i]) };
                let (count, d) = self.validate_tree(link.child, node, i, lo, hi)?;
                if count != link.count {
                    return err_at!(Fatal, msg: "{:?} link {} count {} != {}", node, i, link.count, count);
                }
                if i == 0 {
                    depth = d + 1;
                } else if d + 1 != depth {
                    return err_at!(Fatal, msg: "{:?} uneven depth below link {}", node, i);
                }
                total += count;
            }
            offset += link.count + 1;
        }
        Ok((total, depth))
    }
}

impl<T, G> Drop for Index<T, G> {
    fn drop(&mut self) {
        if let Some(release) = &self.release {
            for node in self.nodes.iter() {
                for elem in node.elements.iter() {
                    release(elem);
                }
            }
        }
    }
}

/// Statistics for [Index], via `to_stats()`.
#[derive(Clone, Debug)]
pub struct Stats {
    pub name: String,
    pub order: usize,
    pub n_count: usize,
    pub n_nodes: usize,
    pub n_free: usize,
    pub depth: usize,
    pub footprint: usize,
}

#[cfg(test)]
#[path = "index_test.rs"]
mod index_test;
