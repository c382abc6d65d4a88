//! Write cursor: the active block currently being appended to, plus a
//! second cursor reserved for GC relocation writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::block::Block;
use crate::error::{FtlError, Result};
use crate::ids::{ApId, BlockId, PhysAddr, PoolId};
use crate::macros::invariant;
use crate::pool::Pool;
use crate::vtable::FtlType;

/// Current write target for one pool. Host writes land through `cur`; GC
/// relocation writes land through `gc_cur`, a second cursor that host
/// allocation never touches.
pub struct AppendPoint {
    pub id: ApId,
    pub pool: PoolId,
    cur: Mutex<Option<BlockId>>,
    gc_cur: Mutex<Option<BlockId>>,
    /// Serializes the whole `alloc_addr` sequence, so two concurrent
    /// writers on the same AP can't both observe a full `cur` and both
    /// race to replace it.
    alloc_lock: Mutex<()>,
    pub t_read_us: u64,
    pub t_write_us: u64,
    accesses: AtomicU64,
}

impl AppendPoint {
    pub fn new(id: ApId, pool: PoolId, t_read_us: u64, t_write_us: u64) -> Self {
        AppendPoint {
            id,
            pool,
            cur: Mutex::new(None),
            gc_cur: Mutex::new(None),
            alloc_lock: Mutex::new(()),
            t_read_us,
            t_write_us,
            accesses: AtomicU64::new(0),
        }
    }

    pub fn cur_block(&self) -> Option<BlockId> {
        *self.cur.lock().unwrap()
    }

    pub fn gc_cur_block(&self) -> Option<BlockId> {
        *self.gc_cur.lock().unwrap()
    }

    pub fn record_access(&self) {
        self.accesses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    /// Swaps in `new_block` as `cur`. Asserts the outgoing block (if any)
    /// is full before replacing it, and installs the new block's
    /// back-reference.
    fn set_cur(&self, new_block: BlockId, blocks: &[Block]) {
        let mut cur = self.cur.lock().unwrap();
        if let Some(old) = *cur {
            invariant!(
                blocks[old.0].is_full(),
                "AppendPoint::set_cur replaced block {:?} before it was full",
                old
            );
            blocks[old.0].clear_ap();
        }
        blocks[new_block.0].activate(self.id);
        *cur = Some(new_block);
    }

    fn set_gc_cur(&self, new_block: BlockId, blocks: &[Block]) {
        let mut cur = self.gc_cur.lock().unwrap();
        if let Some(old) = *cur {
            invariant!(
                blocks[old.0].is_full(),
                "AppendPoint::set_gc_cur replaced block {:?} before it was full",
                old
            );
            blocks[old.0].clear_ap();
        }
        blocks[new_block.0].activate(self.id);
        *cur = Some(new_block);
    }

    /// Reserves a physical address for one page write:
    ///
    /// 1. Try `cur`'s own cursor.
    /// 2. On exhaustion, pull a fresh block from the pool (`is_gc=false`)
    ///    and install it as `cur`.
    /// 3. If the pool has nothing left and this is a GC write, fall back
    ///    to `gc_cur`, pulling a block with `is_gc=true` if needed.
    /// 4. Otherwise fail — the caller defers.
    ///
    /// Host writes never dip into the GC reserve; GC writes can always
    /// drain because `is_gc=true` bypasses the pool's AP headroom check,
    /// and because any exhaustion hitting the host-reserved pull above
    /// still falls through to the `gc_cur` fallback when `is_gc` is set.
    pub fn alloc_addr(
        &self,
        is_gc: bool,
        pool: &Pool,
        blocks: &[Block],
        nr_aps: usize,
        vtype: &dyn FtlType,
    ) -> Result<(BlockId, PhysAddr)> {
        let _alloc_guard = self.alloc_lock.lock().unwrap();
        if let Some(cur) = self.cur_block() {
            if let Some(addr) = vtype.alloc_phys_addr(&blocks[cur.0]) {
                return Ok((cur, addr));
            }
        }

        match pool.get_block(false, nr_aps) {
            Ok(fresh) => {
                blocks[fresh.0].reset();
                self.set_cur(fresh, blocks);
                let cur = self.cur_block().unwrap();
                if let Some(addr) = vtype.alloc_phys_addr(&blocks[cur.0]) {
                    return Ok((cur, addr));
                }
            }
            Err(FtlError::PoolExhausted(_)) => {}
            Err(e) => return Err(e),
        }

        if !is_gc {
            return Err(FtlError::PoolExhausted(pool.id.0));
        }

        if let Some(gc_cur) = self.gc_cur_block() {
            if let Some(addr) = vtype.alloc_phys_addr(&blocks[gc_cur.0]) {
                return Ok((gc_cur, addr));
            }
        }

        let fresh = pool.get_block(true, nr_aps)?;
        blocks[fresh.0].reset();
        self.set_gc_cur(fresh, blocks);
        let gc_cur = self.gc_cur_block().unwrap();
        vtype
            .alloc_phys_addr(&blocks[gc_cur.0])
            .map(|addr| (gc_cur, addr))
            .ok_or(FtlError::PoolExhausted(pool.id.0))
    }
}
