//! One erase-unit.
//!
//! A `Block` owns a next-write cursor (`next_page`/`next_offset`), an
//! invalid-page bitmap sized to `nr_host_pages_in_blk`, and an optional
//! staging buffer allocated only while the block is an active write
//! target. A single `Mutex` guards the cursor and bitmap together,
//! ported from `spin::Mutex` to `std::sync::Mutex` since this runs on a
//! standard host rather than bare metal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::ids::{ApId, BlockId, PhysAddr, PoolId};
use crate::macros::invariant;

struct BlockState {
    /// Append point currently writing this block, if any.
    ap: Option<ApId>,
    next_page: u32,
    next_offset: u32,
    invalid_pages: Vec<bool>,
    nr_invalid_pages: usize,
    /// Host pages written into the staging buffer so far.
    data_size: usize,
    /// Host pages whose device I/O has completed.
    data_cmnt_size: usize,
    /// Staging buffer: `nr_host_pages_in_blk` host pages, contiguous.
    /// Non-`None` iff this block is an active write target and not yet
    /// fully committed.
    data: Option<Vec<u8>>,
}

/// One erase-unit. See module docs.
pub struct Block {
    pub id: BlockId,
    pub pool: PoolId,
    nr_host_pages_in_blk: usize,
    nr_host_pages_in_flash_page: usize,
    host_page_size: usize,
    state: Mutex<BlockState>,
    /// Set (and cleared) by the external GC collaborator while it relocates
    /// this block's valid pages. Read on the lookup fast path, so kept as
    /// an atomic rather than folded into `state`.
    gc_running: AtomicBool,
}

impl Block {
    pub fn new(
        id: BlockId,
        pool: PoolId,
        nr_host_pages_in_blk: usize,
        nr_host_pages_in_flash_page: usize,
        host_page_size: usize,
    ) -> Self {
        Block {
            id,
            pool,
            nr_host_pages_in_blk,
            nr_host_pages_in_flash_page,
            host_page_size,
            state: Mutex::new(BlockState {
                ap: None,
                next_page: 0,
                next_offset: 0,
                invalid_pages: vec![false; nr_host_pages_in_blk],
                nr_invalid_pages: 0,
                data_size: 0,
                data_cmnt_size: 0,
                data: None,
            }),
            gc_running: AtomicBool::new(false),
        }
    }

    fn nr_flash_pages(&self) -> u32 {
        (self.nr_host_pages_in_blk / self.nr_host_pages_in_flash_page) as u32
    }

    /// Zeros the invalid bitmap and all cursors/counters. Called under the
    /// owning pool's lock, before the staging buffer is allocated.
    pub fn reset(&self) {
        let mut st = self.state.lock().unwrap();
        st.next_page = 0;
        st.next_offset = 0;
        st.invalid_pages.iter_mut().for_each(|b| *b = false);
        st.nr_invalid_pages = 0;
        st.data_size = 0;
        st.data_cmnt_size = 0;
        st.data = None;
        self.gc_running.store(false, Ordering::Release);
    }

    /// Allocates the staging buffer and marks this block active for `ap`.
    /// Done outside the pool lock, after `reset`.
    pub fn activate(&self, ap: ApId) {
        let mut st = self.state.lock().unwrap();
        invariant!(st.data.is_none(), "activate() called on an already-active block");
        st.data = Some(vec![0u8; self.nr_host_pages_in_blk * self.host_page_size]);
        st.ap = Some(ap);
    }

    pub fn current_ap(&self) -> Option<ApId> {
        self.state.lock().unwrap().ap
    }

    /// True once `next_page` has reached the block's flash-page count.
    pub fn is_full(&self) -> bool {
        self.state.lock().unwrap().next_page >= self.nr_flash_pages()
    }

    /// Advances the cursor and returns the next physical address, or `None`
    /// if the block is full. `next_offset` advances first and only bumps
    /// `next_page` once it saturates at `nr_host_pages_in_flash_page`.
    pub fn alloc_phys(&self) -> Option<PhysAddr> {
        let mut st = self.state.lock().unwrap();
        if st.next_page >= self.nr_flash_pages() {
            return None;
        }
        let intra = st.next_page as usize * self.nr_host_pages_in_flash_page + st.next_offset as usize;
        invariant!(
            (st.next_offset as usize) < self.nr_host_pages_in_flash_page,
            "next_offset {} out of range for flash page width {}",
            st.next_offset,
            self.nr_host_pages_in_flash_page
        );

        st.next_offset += 1;
        if st.next_offset as usize >= self.nr_host_pages_in_flash_page {
            st.next_offset = 0;
            st.next_page += 1;
        }
        st.data_size += 1;

        let base = self.id.0 as u64 * self.nr_host_pages_in_blk as u64;
        Some(PhysAddr(base + intra as u64))
    }

    /// Copies `payload` (one host page) into the staging buffer at the
    /// block-relative page index `offset`.
    pub fn stage_write(&self, offset: usize, payload: &[u8]) {
        let mut st = self.state.lock().unwrap();
        let data = st
            .data
            .as_mut()
            .expect("stage_write called on a block with no staging buffer");
        let start = offset * self.host_page_size;
        invariant!(
            start + self.host_page_size <= data.len(),
            "stage_write offset {} out of range for block",
            offset
        );
        data[start..start + self.host_page_size].copy_from_slice(&payload[..self.host_page_size]);
    }

    /// Gathers `nr_host_pages_in_flash_page` contiguous host pages out of
    /// the staging buffer starting at block-relative `flash_page_base`, so
    /// the flash page is written to the device as a unit.
    pub fn read_flash_page(&self, flash_page_base: usize, nr_host_pages_in_flash_page: usize) -> Vec<u8> {
        let st = self.state.lock().unwrap();
        let data = st.data.as_ref().expect("read_flash_page called on an inactive block");
        let start = flash_page_base * self.host_page_size;
        let len = nr_host_pages_in_flash_page * self.host_page_size;
        data[start..start + len].to_vec()
    }

    /// Marks one more staged page as device-committed. Returns `true` once
    /// every page in the block has committed, at which point the caller
    /// (`pipeline::endio`) releases the staging buffer and promotes the
    /// block to its pool's `prio_list`.
    pub fn commit_page(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        st.data_cmnt_size += 1;
        invariant!(
            st.data_cmnt_size <= self.nr_host_pages_in_blk,
            "data_cmnt_size exceeded nr_host_pages_in_blk"
        );
        let done = st.data_cmnt_size == self.nr_host_pages_in_blk;
        if done {
            st.data = None;
        }
        done
    }

    /// Sets the invalid bit for `addr`'s block-relative offset and bumps
    /// `nr_invalid_pages`. Re-invalidating the same page is a logic error.
    pub fn invalidate_page(&self, addr: PhysAddr) {
        let (blk, offset) = addr.split(self.nr_host_pages_in_blk);
        invariant!(blk == self.id, "invalidate_page addr {:?} does not belong to block {:?}", addr, self.id);

        let mut st = self.state.lock().unwrap();
        invariant!(
            !st.invalid_pages[offset],
            "double invalidation of page {} in block {:?}",
            offset,
            self.id
        );
        st.invalid_pages[offset] = true;
        st.nr_invalid_pages += 1;
    }

    pub fn nr_invalid_pages(&self) -> usize {
        self.state.lock().unwrap().nr_invalid_pages
    }

    /// `popcount(invalid_pages)`, exposed for tests asserting it matches
    /// `nr_invalid_pages`.
    pub fn popcount_invalid(&self) -> usize {
        self.state.lock().unwrap().invalid_pages.iter().filter(|b| **b).count()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().data.is_some()
    }

    pub fn data_cmnt_size(&self) -> usize {
        self.state.lock().unwrap().data_cmnt_size
    }

    pub fn gc_running(&self) -> bool {
        self.gc_running.load(Ordering::Acquire)
    }

    pub fn set_gc_running(&self, running: bool) {
        self.gc_running.store(running, Ordering::Release);
    }

    /// Clears the active-block back-reference. Called by `AppendPoint`
    /// when swapping in a new current block.
    pub fn clear_ap(&self) {
        self.state.lock().unwrap().ap = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> Block {
        let b = Block::new(BlockId(0), PoolId(0), 8, 2, 64);
        b.activate(ApId(0));
        b
    }

    #[test]
    fn alloc_phys_advances_offset_before_page() {
        let b = block();
        let a0 = b.alloc_phys().unwrap();
        let a1 = b.alloc_phys().unwrap();
        let a2 = b.alloc_phys().unwrap();
        assert_eq!(a0.0, 0);
        assert_eq!(a1.0, 1);
        assert_eq!(a2.0, 2);
        assert!(!b.is_full());
    }

    #[test]
    fn block_reports_full_after_all_pages_allocated() {
        let b = block();
        for _ in 0..8 {
            assert!(b.alloc_phys().is_some());
        }
        assert!(b.is_full());
        assert!(b.alloc_phys().is_none());
    }

    #[test]
    fn invalidate_sets_bit_and_counter() {
        let b = block();
        let a0 = b.alloc_phys().unwrap();
        b.invalidate_page(a0);
        assert_eq!(b.nr_invalid_pages(), 1);
        assert_eq!(b.popcount_invalid(), b.nr_invalid_pages());
    }

    #[test]
    #[should_panic(expected = "double invalidation")]
    fn double_invalidation_panics() {
        let b = block();
        let a0 = b.alloc_phys().unwrap();
        b.invalidate_page(a0);
        b.invalidate_page(a0);
    }

    #[test]
    fn commit_page_releases_buffer_once_full() {
        let b = block();
        for _ in 0..7 {
            assert!(b.alloc_phys().is_some());
            assert!(!b.commit_page());
        }
        assert!(b.alloc_phys().is_some());
        assert!(b.commit_page());
        assert!(!b.is_active());
    }
}
