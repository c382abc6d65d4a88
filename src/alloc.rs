//! Round-robin write allocator: picks an append point, reserves a physical
//! address, and installs the new mapping.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::append_point::AppendPoint;
use crate::block::Block;
use crate::error::Result;
use crate::ids::{ApId, LogicalAddr, MapId};
use crate::map::{LtopHandle, TranslationMap};
use crate::pool::Pool;
use crate::vtable::FtlType;

/// Selects the next append point for a host write via a round-robin
/// cursor over all APs, or for a GC write via a best-effort survey of the
/// pool with the most free blocks.
pub struct RoundRobinAllocator {
    cursor: AtomicUsize,
}

impl RoundRobinAllocator {
    pub fn new() -> Self {
        RoundRobinAllocator {
            cursor: AtomicUsize::new(0),
        }
    }

    fn next_ap_rr(&self, nr_aps: usize) -> ApId {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % nr_aps;
        ApId(idx)
    }

    /// Best-effort, unlocked survey of `pools` picking the one with the
    /// most free blocks. Ties resolve to the lowest-indexed pool (stable
    /// scan).
    fn most_free_pool(&self, pools: &[Pool]) -> usize {
        let mut best = 0;
        let mut best_free = pools[0].nr_free_blocks();
        for (i, pool) in pools.iter().enumerate().skip(1) {
            let free = pool.nr_free_blocks();
            if free > best_free {
                best = i;
                best_free = free;
            }
        }
        best
    }

    /// Picks an AP (round-robin for host writes, most-free pool for GC),
    /// reserves a physical address under that AP's lock, and installs the
    /// forward/reverse mapping. Returns `None` if the allocator could not
    /// reserve an address (caller defers).
    #[allow(clippy::too_many_arguments)]
    pub fn map_ltop(
        &self,
        l: LogicalAddr,
        is_gc: bool,
        map: &TranslationMap,
        aps: &[AppendPoint],
        pools: &[Pool],
        blocks: &[Block],
        nr_aps: usize,
        vtype: &dyn FtlType,
    ) -> Result<Option<LtopHandle>> {
        let ap_id = if !is_gc {
            self.next_ap_rr(aps.len())
        } else {
            let pool_idx = self.most_free_pool(pools);
            // nr_aps == number of pools, so the pool index doubles as the AP index.
            ApId(pool_idx)
        };

        let ap = &aps[ap_id.0];
        let pool = &pools[ap.pool.0];

        let (block, addr) = match ap.alloc_addr(is_gc, pool, blocks, nr_aps, vtype) {
            Ok(pair) => pair,
            Err(crate::error::FtlError::PoolExhausted(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        map.update_map(l, addr, block, MapId::Primary, blocks);

        Ok(Some(LtopHandle {
            addr,
            block: Some(block),
        }))
    }
}
