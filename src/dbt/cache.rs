use crate::{
    dbt::{node::REC_NULL, store::RecordStore},
    Result,
};

// One node buffer. `recno` is REC_NULL while the buffer is empty,
// `refcnt` pins the buffer against eviction for the duration of a
// compound operation.
struct Buf {
    recno: u64,
    refcnt: u32,
    modified: bool,
    data: Vec<u8>,
}

// Bounded pool of node buffers with write-back on eviction. Lookup
// is a linear scan, the pool is small.
pub(crate) struct Cache {
    bufs: Vec<Buf>,

    pub(crate) n_gets: usize,
    pub(crate) n_hits: usize,
    pub(crate) n_evicted: usize,
    pub(crate) n_writebacks: usize,
}

impl Cache {
    pub fn new(count: usize, node_size: usize) -> Cache {
        let mut bufs = Vec::with_capacity(count);
        for _ in 0..count {
            bufs.push(Buf {
                recno: REC_NULL,
                refcnt: 0,
                modified: false,
                data: vec![0; node_size],
            });
        }
        Cache {
            bufs,
            n_gets: 0,
            n_hits: 0,
            n_evicted: 0,
            n_writebacks: 0,
        }
    }

    /// Return the buffer slot holding record `recno`, reading it
    /// from `store` on a miss. May write back and evict an unpinned
    /// buffer.
    pub fn get<S>(&mut self, store: &mut S, recno: u64) -> Result<usize>
    where
        S: RecordStore,
    {
        debug_assert!(recno != REC_NULL);
        self.n_gets += 1;
        for (slot, buf) in self.bufs.iter().enumerate() {
            if buf.recno == recno {
                self.n_hits += 1;
                return Ok(slot);
            }
        }
        let slot = self.unused(store)?;
        store.get(recno, &mut self.bufs[slot].data)?;
        self.bufs[slot].recno = recno;
        debug_assert!(self.bufs[slot].refcnt == 0);
        Ok(slot)
    }

    /// Claim a zeroed buffer slot for the freshly allocated record
    /// `recno`.
    pub fn install<S>(&mut self, store: &mut S, recno: u64, modified: bool) -> Result<usize>
    where
        S: RecordStore,
    {
        let slot = self.unused(store)?;
        let buf = &mut self.bufs[slot];
        for b in buf.data.iter_mut() {
            *b = 0;
        }
        buf.recno = recno;
        buf.modified = modified;
        Ok(slot)
    }

    // find a reusable buffer, preferring empty buffers, then
    // unmodified ones. Fails when every buffer is pinned.
    fn unused<S>(&mut self, store: &mut S) -> Result<usize>
    where
        S: RecordStore,
    {
        let mut clean = None;
        let mut dirty = None;
        for (slot, buf) in self.bufs.iter().enumerate() {
            if buf.recno == REC_NULL {
                return Ok(slot);
            } else if buf.refcnt == 0 {
                if buf.modified {
                    dirty = Some(slot);
                } else {
                    clean = Some(slot);
                }
            }
        }
        let slot = match clean.or(dirty) {
            Some(slot) => slot,
            None => return err_at!(CacheExhausted, msg: "all {} buffers pinned", self.bufs.len()),
        };
        #[cfg(feature = "debug")]
        println!(
            "cache evict recno:{} modified:{}",
            self.bufs[slot].recno, self.bufs[slot].modified
        );
        if self.bufs[slot].modified {
            let buf = &mut self.bufs[slot];
            store.put(buf.recno, &buf.data)?;
            buf.modified = false;
            self.n_writebacks += 1;
        }
        self.n_evicted += 1;
        self.bufs[slot].recno = REC_NULL;
        Ok(slot)
    }

    #[inline]
    pub fn pin(&mut self, slot: usize) {
        self.bufs[slot].refcnt += 1;
    }

    #[inline]
    pub fn unpin(&mut self, slot: usize) {
        debug_assert!(self.bufs[slot].refcnt > 0);
        self.bufs[slot].refcnt -= 1;
    }

    #[inline]
    pub fn data(&self, slot: usize) -> &[u8] {
        &self.bufs[slot].data
    }

    /// Mutable access marks the buffer dirty.
    #[inline]
    pub fn data_mut(&mut self, slot: usize) -> &mut [u8] {
        self.bufs[slot].modified = true;
        &mut self.bufs[slot].data
    }

    /// Copy `len` bytes between two resident buffers, marking the
    /// destination dirty.
    pub fn copy(&mut self, src: usize, soff: usize, dst: usize, doff: usize, len: usize) {
        debug_assert!(src != dst);
        let (s, d) = if src < dst {
            let (s1, s2) = self.bufs.split_at_mut(dst);
            (&s1[src], &mut s2[0])
        } else {
            let (s1, s2) = self.bufs.split_at_mut(src);
            (&s2[0], &mut s1[dst])
        };
        d.data[doff..doff + len].copy_from_slice(&s.data[soff..soff + len]);
        d.modified = true;
    }

    /// Drop the buffer without writing it back, for records about to
    /// be erased.
    pub fn forget(&mut self, slot: usize) {
        let buf = &mut self.bufs[slot];
        buf.recno = REC_NULL;
        buf.refcnt = 0;
        buf.modified = false;
    }

    /// Write back every dirty buffer and empty the pool. When a
    /// write fails the remaining buffers are still emptied and the
    /// first error is returned.
    pub fn flush<S>(&mut self, store: &mut S) -> Result<()>
    where
        S: RecordStore,
    {
        let mut res = Ok(());
        for buf in self.bufs.iter_mut() {
            if buf.modified && res.is_ok() {
                debug_assert!(buf.recno != REC_NULL);
                res = store.put(buf.recno, &buf.data);
            }
            buf.recno = REC_NULL;
            buf.refcnt = 0;
            buf.modified = false;
        }
        res
    }

    /// Empty the pool without writing anything back, part of
    /// post-abort resynchronization.
    pub fn clear(&mut self) {
        for buf in self.bufs.iter_mut() {
            buf.recno = REC_NULL;
            buf.refcnt = 0;
            buf.modified = false;
        }
    }

    /// Per-operation epilogue, every pin must have been released.
    pub fn cleanup(&self) {
        for buf in self.bufs.iter() {
            debug_assert!(buf.refcnt == 0, "buffer for {} still pinned", buf.recno);
        }
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
