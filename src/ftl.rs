//! Top-level FTL instance: one long-lived object owning `pools[]`,
//! `aps[]`, `blocks[]` by value, with explicit construction and no
//! process-wide singleton. Workers and the pipeline hold an `Arc<Ftl>`
//! and address components by stable index.

use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::alloc::RoundRobinAllocator;
use crate::append_point::AppendPoint;
use crate::block::Block;
use crate::config::Config;
use crate::error::Result;
use crate::gc::GcHooks;
use crate::ids::{ApId, BlockId, LogicalAddr, PoolId};
use crate::map::TranslationMap;
use crate::pipeline::{self, BioOps, DeferredEntry, WriteRequest, WriteResult};
use crate::pool::Pool;
use crate::request::Bio;
use crate::vtable::{DefaultType, FtlType};

/// A single FTL instance. One `nr_aps`-pool array, one flat block array
/// shared across pools, one translation map, one allocator, one GC
/// contract, one deferred queue, one device, one strategy.
pub struct Ftl {
    pub config: Config,
    pub blocks: Vec<Block>,
    pub pools: Vec<Pool>,
    pub aps: Vec<AppendPoint>,
    pub map: TranslationMap,
    pub allocator: RoundRobinAllocator,
    pub gc: GcHooks,
    pub deferred: SegQueue<DeferredEntry>,
    pub device: Box<dyn BioOps>,
    pub vtype: Box<dyn FtlType>,
}

impl Ftl {
    /// Builds an `Ftl` with `config.nr_aps` pools, each holding
    /// `config.blocks_per_pool` blocks (so `nr_aps == nr_pools`), using
    /// [`DefaultType`] as the strategy. Use [`Ftl::with_type`] to install
    /// a different [`FtlType`].
    pub fn new(config: Config, device: Box<dyn BioOps>) -> Result<Arc<Self>> {
        Self::with_type(config, device, Box::new(DefaultType))
    }

    pub fn with_type(config: Config, device: Box<dyn BioOps>, vtype: Box<dyn FtlType>) -> Result<Arc<Self>> {
        config.validate()?;

        let nr_blocks = config.nr_blocks();
        let mut blocks = Vec::with_capacity(nr_blocks);
        let mut pools = Vec::with_capacity(config.nr_aps);
        let mut aps = Vec::with_capacity(config.nr_aps);

        for pool_idx in 0..config.nr_aps {
            let base = pool_idx * config.blocks_per_pool;
            for offset in 0..config.blocks_per_pool {
                blocks.push(Block::new(
                    BlockId(base + offset),
                    PoolId(pool_idx),
                    config.nr_host_pages_in_blk,
                    config.nr_host_pages_in_flash_page,
                    config.host_page_size,
                ));
            }
        }

        for pool_idx in 0..config.nr_aps {
            let base = pool_idx * config.blocks_per_pool;
            let ids = (base..base + config.blocks_per_pool).map(BlockId);
            pools.push(Pool::new(PoolId(pool_idx), ids, config.pool_serialize()));
            aps.push(AppendPoint::new(ApId(pool_idx), PoolId(pool_idx), config.t_read_us, config.t_write_us));
        }

        let nr_phys_pages = nr_blocks as u64 * config.nr_host_pages_in_blk as u64;

        Ok(Arc::new(Ftl {
            map: TranslationMap::new(config.nr_pages, nr_phys_pages),
            blocks,
            pools,
            aps,
            allocator: RoundRobinAllocator::new(),
            gc: GcHooks::new(),
            deferred: SegQueue::new(),
            device,
            vtype,
            config,
        }))
    }

    /// Client surface: `read(request)`. Always "accepted"; the request
    /// completes asynchronously via its own completion hook.
    pub fn read(self: &Arc<Self>, bio: Arc<Bio>) {
        self.vtype.read_bio(self, bio);
    }

    /// Client surface: `write(request, is_gc, private, completion?, map,
    /// complete_original?)`. Locks `req.l` before dispatch, since locking
    /// is the caller's responsibility for the write path.
    pub fn write(self: &Arc<Self>, req: WriteRequest) -> WriteResult {
        self.map.lock_addr(req.l);
        self.vtype.write_bio(self, req)
    }

    pub fn lock_addr(&self, l: LogicalAddr) {
        self.map.lock_addr(l);
    }

    pub fn unlock_addr(&self, l: LogicalAddr) {
        self.map.unlock_addr(l);
    }

    /// Client surface: `kick_gc()`, idempotent.
    pub fn kick_gc(&self) {
        self.gc.kick();
    }

    /// Replays every parked deferred entry. Intended to be called by the
    /// external GC collaborator once it has freed blocks; the core never
    /// calls this on its own, since GC itself is out of scope.
    pub fn drain_deferred(self: &Arc<Self>) {
        pipeline::drain_deferred(self);
    }
}
