//! Serialization for the in-memory index.
//!
//! The stream starts with a header, `magic "btreeser", version,
//! order, options, fixed-element-size-or-0`, followed by a pre-order
//! walk of the tree. Entering a node emits a descend marker, the
//! node's child-index, fill and its serialized elements, leaving a
//! node emits an ascend marker. The stream ends with an end marker.
//! Integers are big-endian. [Index::read] is the exact inverse and
//! rebuilds the tree, rank metadata included, without going through
//! the rebalancer.

use lazy_static::lazy_static;

use std::{convert::TryFrom, io};

use crate::{
    mem::{
        index::{CmpFn, Index},
        node::{Link, NodeId},
    },
    opts, Result,
};

lazy_static! {
    pub(crate) static ref SER_MAGIC: Vec<u8> = {
        let magic = "btreeser";
        magic.as_bytes().to_vec()
    };
}

const SER_VERSION: u32 = 1;

const WALK_END: u8 = 0;
const WALK_DESCEND: u8 = 1;
const WALK_ASCEND: u8 = 2;

impl<T, G> Index<T, G> {
    /// Serialize this index into `w`. `size` returns the serialized
    /// size of an element, `ser` writes exactly that many bytes for
    /// it.
    pub fn write<W, FS, FE>(&self, w: &mut W, size: FS, mut ser: FE) -> Result<()>
    where
        W: io::Write,
        FS: Fn(&T) -> usize,
        FE: FnMut(&T, &mut W) -> Result<()>,
    {
        self.write_header(w, 0)?;
        self.write_walk(w, |elem, w| {
            out_u64(w, size(elem) as u64)?;
            ser(elem, w)
        })?;
        out_u8(w, WALK_END)
    }

    /// Serialize this index into `w`, where every element serializes
    /// to exactly `fixed` bytes.
    pub fn write_fixed<W, FE>(&self, w: &mut W, fixed: usize, mut ser: FE) -> Result<()>
    where
        W: io::Write,
        FE: FnMut(&T, &mut W) -> Result<()>,
    {
        if fixed == 0 {
            err_at!(InvalidInput, msg: "fixed element size cannot be zero")?;
        }
        self.write_header(w, fixed as u64)?;
        self.write_walk(w, |elem, w| ser(elem, w))?;
        out_u8(w, WALK_END)
    }

    fn write_header<W: io::Write>(&self, w: &mut W, fixed: u64) -> Result<()> {
        out_data(w, &SER_MAGIC)?;
        out_u32(w, SER_VERSION)?;
        out_u32(w, self.order as u32)?;
        out_u64(w, self.options as u64)?;
        out_u64(w, fixed)
    }

    fn write_walk<W, FE>(&self, w: &mut W, mut emit: FE) -> Result<()>
    where
        W: io::Write,
        FE: FnMut(&T, &mut W) -> Result<()>,
    {
        let mut cur = self.root;
        let mut descend = true;
        while !cur.is_null() {
            while descend {
                {
                    let node = self.node(cur);
                    out_u8(w, WALK_DESCEND)?;
                    out_u32(w, node.child_index as u32)?;
                    out_u32(w, node.fill() as u32)?;
                }
                for i in 0..self.node(cur).fill() {
                    emit(&self.node(cur).elements[i], w)?;
                }
                let node = self.node(cur);
                if node.is_leaf() {
                    descend = false;
                } else {
                    cur = node.links[0].child;
                }
            }
            while !descend {
                out_u8(w, WALK_ASCEND)?;
                let index = self.node(cur).child_index + 1;
                cur = self.node(cur).parent;
                if cur.is_null() {
                    descend = true;
                } else if index <= self.node(cur).fill() {
                    cur = self.node(cur).links[index].child;
                    descend = true;
                }
            }
        }
        Ok(())
    }

    /// Deserialize an index from `r`, the inverse of [Index::write]
    /// and [Index::write_fixed]. `de` rebuilds one element from its
    /// serialized bytes. `cmp` must be supplied iff the serialized
    /// index was built with a comparator.
    pub fn read<R, FD>(
        name: &str,
        r: &mut R,
        group_default: G,
        cmp: Option<Box<CmpFn<T, G>>>,
        mut de: FD,
    ) -> Result<Index<T, G>>
    where
        R: io::Read,
        FD: FnMut(&[u8]) -> Result<T>,
    {
        let mut magic = [0_u8; 8];
        in_data(r, &mut magic)?;
        if magic[..] != SER_MAGIC[..] {
            err_at!(InvalidFile, msg: "bad magic {:?}", magic)?;
        }
        let version = in_u32(r)?;
        if version != SER_VERSION {
            err_at!(InvalidFile, msg: "bad version {}", version)?;
        }
        let order = in_u32(r)? as usize;
        if order < 3 {
            err_at!(InvalidFile, msg: "bad order {}", order)?;
        }
        let options = in_u64(r)?;
        let options = match u32::try_from(options) {
            Ok(options) => options,
            Err(_) => err_at!(InvalidFile, msg: "bad options {:x}", options)?,
        };
        let fixed = in_u64(r)?;

        let nocmp = options & opts::NOCMP != 0;
        if nocmp && cmp.is_some() {
            err_at!(InvalidInput, msg: "serialized index has no comparator")?;
        } else if !nocmp && cmp.is_none() {
            err_at!(InvalidInput, msg: "serialized index needs a comparator")?;
        }

        let mut index: Index<T, G> = Index::from_parts(name, order, options, group_default, cmp);
        let mut cur = NodeId::NULL;
        let mut buf: Vec<u8> = Vec::new();

        loop {
            match in_u8(r)? {
                WALK_DESCEND => {
                    let ci = in_u32(r)? as usize;
                    let fill = in_u32(r)? as usize;
                    if fill > order - 1 || ci > order {
                        err_at!(InvalidFile, msg: "bad node ci:{} fill:{}", ci, fill)?;
                    }
                    let id = index.alloc_node();
                    for _ in 0..fill {
                        let size = if fixed == 0 { in_u64(r)? } else { fixed };
                        let size = match usize::try_from(size) {
                            Ok(size) => size,
                            Err(_) => err_at!(InvalidFile, msg: "bad element size {}", size)?,
                        };
                        buf.resize(size, 0);
                        in_data(r, &mut buf)?;
                        let elem = de(&buf)?;
                        index.node_mut(id).elements.push(elem);
                    }
                    let fill = index.node(id).fill();
                    index.node_mut(id).links = vec![Link::default(); fill + 1];
                    if cur.is_null() {
                        if !index.root.is_null() {
                            err_at!(InvalidFile, msg: "more than one root")?;
                        }
                        index.root = id;
                    } else {
                        if ci > index.node(cur).fill()
                            || !index.node(cur).links[ci].child.is_null()
                        {
                            err_at!(InvalidFile, msg: "bad child index {}", ci)?;
                        }
                        index.node_mut(cur).links[ci].child = id;
                        index.node_mut(id).parent = cur;
                        index.node_mut(id).child_index = ci;
                    }
                    cur = id;
                }
                WALK_ASCEND => {
                    if cur.is_null() {
                        err_at!(InvalidFile, msg: "ascend past root")?;
                    }
                    {
                        let node = index.node(cur);
                        let leaf = node.links[0].child.is_null();
                        for link in node.links.iter() {
                            if link.child.is_null() != leaf {
                                err_at!(InvalidFile, msg: "partially filled node")?;
                            }
                        }
                    }
                    let total = index.node_mut(cur).reset_offsets();
                    let parent = index.node(cur).parent;
                    if !parent.is_null() {
                        let ci = index.node(cur).child_index;
                        index.node_mut(parent).links[ci].count = total;
                    }
                    cur = parent;
                }
                WALK_END => {
                    if !cur.is_null() {
                        err_at!(InvalidFile, msg: "truncated walk")?;
                    }
                    break;
                }
                tag => err_at!(InvalidFile, msg: "bad walk marker {}", tag)?,
            }
        }
        Ok(index)
    }
}

fn out_data<W: io::Write>(w: &mut W, data: &[u8]) -> Result<()> {
    err_at!(IOError, w.write_all(data))
}

fn out_u8<W: io::Write>(w: &mut W, value: u8) -> Result<()> {
    out_data(w, &[value])
}

fn out_u32<W: io::Write>(w: &mut W, value: u32) -> Result<()> {
    out_data(w, &value.to_be_bytes())
}

fn out_u64<W: io::Write>(w: &mut W, value: u64) -> Result<()> {
    out_data(w, &value.to_be_bytes())
}

fn in_data<R: io::Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    err_at!(IOError, r.read_exact(buf))
}

fn in_u8<R: io::Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0_u8; 1];
    in_data(r, &mut buf)?;
    Ok(buf[0])
}

fn in_u32<R: io::Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0_u8; 4];
    in_data(r, &mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn in_u64<R: io::Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0_u8; 8];
    in_data(r, &mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

#[cfg(test)]
#[path = "ser_test.rs"]
mod ser_test;
