//! Polymorphic strategy selector.
//!
//! `FtlType` is the capability set an extension substitutes to change
//! selection policy without touching [`crate::pipeline`] itself: lookup,
//! write-mapping, deferral, the read/write entry points, pool-serialize
//! admission, and two optional hooks (`endio_hook`, `alloc_phys_addr`).
//! `DefaultType` delegates every method straight to the free functions in
//! `pipeline`/`map`/`alloc`; a hints-style variant overrides only the
//! methods it cares about.

use std::sync::Arc;

use crate::alloc::RoundRobinAllocator;
use crate::block::Block;
use crate::error::Result;
use crate::ftl::Ftl;
use crate::ids::LogicalAddr;
use crate::map::{LtopHandle, TranslationMap};
use crate::pipeline::{self, DeferredEntry, WriteRequest, WriteResult};
use crate::request::{Bio, RequestWrapper};

/// Strategy selector substituted per-`Ftl` instance.
///
/// Every method has a default implementation delegating to the crate's
/// built-in pipeline/allocator so a variant need only override the hooks
/// it actually changes.
pub trait FtlType: Send + Sync {
    fn read_bio(&self, ftl: &Arc<Ftl>, bio: Arc<Bio>) {
        pipeline::read_bio(ftl, bio)
    }

    fn write_bio(&self, ftl: &Arc<Ftl>, req: WriteRequest) -> WriteResult {
        pipeline::write_bio(ftl, req)
    }

    fn lookup_ltop(&self, map: &TranslationMap, l: LogicalAddr, blocks: &[Block]) -> Option<LtopHandle> {
        map.lookup_ltop(l, blocks)
    }

    #[allow(clippy::too_many_arguments)]
    fn map_ltop(
        &self,
        allocator: &RoundRobinAllocator,
        l: LogicalAddr,
        is_gc: bool,
        map: &TranslationMap,
        aps: &[crate::append_point::AppendPoint],
        pools: &[crate::pool::Pool],
        blocks: &[Block],
        nr_aps: usize,
    ) -> Result<Option<LtopHandle>> {
        allocator.map_ltop(l, is_gc, map, aps, pools, blocks, nr_aps, self)
    }

    fn defer_bio(&self, ftl: &Ftl, entry: DeferredEntry) {
        pipeline::defer_bio(ftl, entry)
    }

    /// Admission hook for the pool-serialize waiting queue. Returning
    /// `false` lets a variant reject a request outright instead of
    /// enqueuing it (the default and hints variants both always admit).
    fn bio_wait_add(&self, _wrapper: &RequestWrapper) -> bool {
        true
    }

    /// Optional completion-path hook: may adjust the device-wait target
    /// `endio` is about to pace against. No-op by default.
    fn endio_hook(&self, _wrapper: &RequestWrapper, _dev_wait_us: &mut u64) {}

    /// Optional override of `Block::alloc_phys`. Returning `None` here
    /// when the block itself would have returned `Some` is how a hints
    /// extension could reject a physical page the block's own cursor
    /// considers free. The default variant never rejects.
    fn alloc_phys_addr(&self, block: &Block) -> Option<crate::ids::PhysAddr> {
        block.alloc_phys()
    }
}

/// The built-in strategy: every method is the crate's own pipeline logic.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultType;

impl FtlType for DefaultType {}

/// A hints-aware variant demonstrating the extension seam an
/// application-hint layer would substitute into (out of scope itself,
/// but its substitution point is in scope). This variant only overrides
/// `endio_hook`, to illustrate a hint-driven device-wait adjustment
/// (e.g. a hot-data hint shortening the wait); it does not implement any
/// actual hint policy, which is the external collaborator's job.
#[derive(Debug, Default, Clone, Copy)]
pub struct HintsType;

impl FtlType for HintsType {
    fn endio_hook(&self, _wrapper: &RequestWrapper, dev_wait_us: &mut u64) {
        log::trace!("hints-enabled endio_hook observed dev_wait_us={}", dev_wait_us);
    }
}
