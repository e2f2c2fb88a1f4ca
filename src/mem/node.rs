use std::fmt;

// Handle into the index arena. Freed handles are recycled before new
// slots are allocated.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

impl NodeId {
    pub const NULL: NodeId = NodeId(usize::MAX);

    #[inline]
    pub fn new(off: usize) -> NodeId {
        NodeId(off)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        *self == NodeId::NULL
    }

    #[inline]
    pub fn off(&self) -> usize {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> NodeId {
        NodeId::NULL
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_null() {
            write!(f, "NodeId(null)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

// Child link, carries the rank metadata for the subtree below it.
//
// `count` is the number of elements in the child's subtree, `offset`
// the within-node rank of the subtree's first element, that is,
// sum of (count + 1) over all links to the left.
#[derive(Clone, Copy, Default, Debug)]
pub struct Link {
    pub offset: usize,
    pub count: usize,
    pub child: NodeId,
}

// Node in the arena. `elements` holds upto `order - 1` elements and
// `links` holds exactly `elements.len() + 1` entries while the node
// is live. A node is a leaf iff links[0].child is null.
pub struct Node<T> {
    pub parent: NodeId,
    pub child_index: usize,
    pub elements: Vec<T>,
    pub links: Vec<Link>,
}

impl<T> Node<T> {
    pub fn new(order: usize) -> Node<T> {
        Node {
            parent: NodeId::NULL,
            child_index: 0,
            elements: Vec::with_capacity(order - 1),
            links: vec![Link::default()],
        }
    }

    // return node to its freshly allocated shape, elements must have
    // been drained by the caller.
    pub fn reset(&mut self) {
        self.parent = NodeId::NULL;
        self.child_index = 0;
        self.elements.clear();
        self.links.clear();
        self.links.push(Link::default());
    }

    #[inline]
    pub fn fill(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.links[0].child.is_null()
    }

    // recompute link offsets from the link counts, return the total
    // number of elements in this node's subtree, not counting an
    // overflow slot the node may own.
    pub fn reset_offsets(&mut self) -> usize {
        let mut n = 0;
        for link in self.links.iter_mut() {
            link.offset = n;
            n += link.count + 1;
        }
        n - 1
    }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;
