//! One flash channel's blocks, free/used/prio lifecycle, and optional
//! per-pool I/O serialization.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{FtlError, Result};
use crate::ids::{BlockId, PoolId};
use crate::request::RequestWrapper;

/// Free/used/prio block lists plus the optional serialized-waiting queue
/// for one channel. List order matters: `free_list` is FIFO (oldest freed
/// block at the front) for round-robin wear-leveling; `used_list` appends
/// at the back so its head is the oldest, most-reclaimable block.
pub struct Pool {
    pub id: PoolId,
    lists: Mutex<Lists>,
    nr_free_blocks: AtomicUsize,
    pub serialize: bool,
    waiting: Mutex<VecDeque<Arc<RequestWrapper>>>,
    is_active: AtomicUsize,
    cur_bio: Mutex<Option<Arc<RequestWrapper>>>,
}

struct Lists {
    free_list: VecDeque<BlockId>,
    used_list: VecDeque<BlockId>,
    prio_list: VecDeque<BlockId>,
}

impl Pool {
    pub fn new(id: PoolId, all_blocks: impl Iterator<Item = BlockId>, serialize: bool) -> Self {
        let free_list: VecDeque<BlockId> = all_blocks.collect();
        let nr_free = free_list.len();
        Pool {
            id,
            lists: Mutex::new(Lists {
                free_list,
                used_list: VecDeque::new(),
                prio_list: VecDeque::new(),
            }),
            nr_free_blocks: AtomicUsize::new(nr_free),
            serialize,
            waiting: Mutex::new(VecDeque::new()),
            is_active: AtomicUsize::new(0),
            cur_bio: Mutex::new(None),
        }
    }

    pub fn nr_free_blocks(&self) -> usize {
        self.nr_free_blocks.load(Ordering::Acquire)
    }

    /// Pops the front of `free_list` and appends it to `used_list`. Refuses
    /// host (non-GC) requests when doing so would leave fewer free blocks
    /// than there are append points, reserving headroom so GC can always
    /// find a block to relocate into even when the host pool is saturated.
    ///
    /// Returns the popped id; the caller is responsible for calling
    /// `Block::reset`/`activate` *after* releasing this pool's lock.
    pub fn get_block(&self, is_gc: bool, nr_aps: usize) -> Result<BlockId> {
        let mut lists = self.lists.lock().unwrap();
        if lists.free_list.is_empty() {
            return Err(FtlError::PoolExhausted(self.id.0));
        }
        if !is_gc && lists.free_list.len() < nr_aps {
            return Err(FtlError::PoolExhausted(self.id.0));
        }
        let id = lists.free_list.pop_front().unwrap();
        lists.used_list.push_back(id);
        self.nr_free_blocks.fetch_sub(1, Ordering::AcqRel);
        Ok(id)
    }

    /// Moves `block` from wherever it currently sits to the back of
    /// `free_list`. Precondition: all of its valid pages have already been
    /// migrated elsewhere (enforced by the GC collaborator, not here).
    pub fn put_block(&self, block: BlockId) {
        let mut lists = self.lists.lock().unwrap();
        lists.used_list.retain(|b| *b != block);
        lists.prio_list.retain(|b| *b != block);
        lists.free_list.push_back(block);
        self.nr_free_blocks.fetch_add(1, Ordering::AcqRel);
    }

    /// Appends a fully-committed block to `prio_list` (GC candidate).
    pub fn push_prio(&self, block: BlockId) {
        self.lists.lock().unwrap().prio_list.push_back(block);
    }

    /// Snapshot of the current GC-candidate list, sorted by policy
    /// externally — the sort itself is the GC engine's job.
    pub fn prio_snapshot(&self) -> Vec<BlockId> {
        self.lists.lock().unwrap().prio_list.iter().copied().collect()
    }

    pub fn free_list_len(&self) -> usize {
        self.lists.lock().unwrap().free_list.len()
    }

    /// Pushes a request onto the serialized waiting queue and arms exactly
    /// one in-flight submission via a push-then-atomically-increment
    /// protocol. Returns `Some(req)` if
    /// the caller became the one responsible for kicking off
    /// `delayed_submit` (i.e. `is_active` transitioned 0 -> 1), `None` if
    /// another submitter is already driving the queue.
    pub fn enqueue_waiting(&self, req: Arc<RequestWrapper>) -> bool {
        self.waiting.lock().unwrap().push_back(req);
        self.is_active.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Pops the head of the waiting queue and marks it `cur_bio`. Returns
    /// `None` if the queue is empty, in which case the caller must clear
    /// `is_active`.
    pub fn pop_waiting(&self) -> Option<Arc<RequestWrapper>> {
        let req = self.waiting.lock().unwrap().pop_front();
        *self.cur_bio.lock().unwrap() = req.clone();
        req
    }

    pub fn clear_active(&self) {
        self.is_active.store(0, Ordering::Release);
    }

    /// Decrements the in-flight count after a submission completes;
    /// non-zero means more waiters remain queued.
    pub fn decrement_active(&self) -> usize {
        self.is_active.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn clear_cur_bio(&self) {
        *self.cur_bio.lock().unwrap() = None;
    }

    #[cfg(test)]
    pub fn waiting_len(&self) -> usize {
        self.waiting.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_block_refuses_host_below_ap_headroom() {
        let blocks = (0..2).map(BlockId);
        let pool = Pool::new(PoolId(0), blocks, false);
        // nr_aps = 2, only 2 free blocks: the first host get_block leaves 1,
        // which is below headroom, so it must be refused... but the first
        // call itself is still allowed since len() == nr_aps (not <).
        assert!(pool.get_block(false, 2).is_ok());
        assert!(pool.get_block(false, 2).is_err());
        // GC ignores the headroom reservation.
        assert!(pool.get_block(true, 2).is_ok());
    }

    #[test]
    fn free_list_invariant_matches_counter() {
        let blocks = (0..4).map(BlockId);
        let pool = Pool::new(PoolId(0), blocks, false);
        let b = pool.get_block(false, 1).unwrap();
        assert_eq!(pool.free_list_len(), pool.nr_free_blocks());
        pool.put_block(b);
        assert_eq!(pool.free_list_len(), pool.nr_free_blocks());
        assert_eq!(pool.nr_free_blocks(), 4);
    }

    #[test]
    fn round_robin_free_list_order() {
        let blocks = (0..3).map(BlockId);
        let pool = Pool::new(PoolId(0), blocks, false);
        let a = pool.get_block(true, 1).unwrap();
        let b = pool.get_block(true, 1).unwrap();
        pool.put_block(a);
        // a was freed first, so the next get_block should return it again
        // (front-of-free-list wear-leveling).
        let next = pool.get_block(true, 1).unwrap();
        assert_eq!(next, a);
        let _ = b;
    }
}
