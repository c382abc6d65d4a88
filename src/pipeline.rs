//! Inbound read/write handling, the deferred queue, pool-serialized
//! waiting, and completion.
//!
//! `BioOps` is the trait seam replacing the underlying block-device
//! driver, modeled directly on a generic synchronous block device
//! interface: two read/write methods keyed by sector, returning an
//! errno-style code on failure rather than a rich error type.

use std::sync::Arc;

use crate::ftl::Ftl;
use crate::ids::{ApId, LogicalAddr, MapId};
use crate::request::{Bio, BioOutcome, CompletionHook, Direction, RequestKind, RequestWrapper, MAX_DEFER_RETRIES};

/// Generic block device interface. Sectors are device-native (not host
/// pages).
pub trait BioOps: Send + Sync {
    fn read_block(&self, sector: u64, buf: &mut [u8]) -> core::result::Result<(), i32>;
    fn write_block(&self, sector: u64, buf: &[u8]) -> core::result::Result<(), i32>;
}

/// Result of `Ftl::write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Success,
    Deferred,
}

/// Arguments to `Ftl::write`.
pub struct WriteRequest {
    pub l: LogicalAddr,
    pub payload: Vec<u8>,
    pub is_gc: bool,
    pub private: usize,
    pub completion: Option<CompletionHook>,
    pub map: MapId,
    pub complete_original: Option<Arc<Bio>>,
}

/// An entry parked because mapping was transiently exhausted. Replayed by
/// `drain_deferred` once the GC collaborator has freed blocks.
pub enum DeferredEntry {
    Read(Arc<Bio>),
    Write { req: WriteRequest, retries: u32 },
}

/// Computes the device-facing sector for a read: `p.addr * NR_PHY_IN_LOG +
/// (sector mod NR_PHY_IN_LOG)`.
fn read_dev_sector(ftl: &Ftl, phys_page: u64, logical_sector: u64) -> u64 {
    let offset_in_page = logical_sector % ftl.config.nr_phy_in_log;
    phys_page * ftl.config.nr_phy_in_log + offset_in_page
}

/// Default `read_bio`: compute `l`, lock it, consult `lookup_ltop` (through
/// the active strategy). On a mapping miss, defer and kick GC. On a
/// never-written hit, zero-fill. On a live hit, translate the sector and
/// submit.
pub fn read_bio(ftl: &Arc<Ftl>, bio: Arc<Bio>) {
    let l = LogicalAddr(bio.sector / ftl.config.nr_phy_in_log);
    ftl.map.lock_addr(l);

    match ftl.vtype.lookup_ltop(&ftl.map, l, &ftl.blocks) {
        None => {
            ftl.map.unlock_addr(l);
            defer_bio(ftl, DeferredEntry::Read(bio));
            ftl.gc.kick();
        }
        Some(handle) => match handle.block {
            None => {
                ftl.map.unlock_addr(l);
                let payload = vec![0u8; ftl.config.host_page_size];
                bio.complete(BioOutcome::Ok { payload });
            }
            Some(block_id) => {
                let dev_sector = read_dev_sector(ftl, handle.addr.0, bio.sector);
                let ap = ApId(ftl.blocks[block_id.0].pool.0);
                let wrapper = Arc::new(RequestWrapper::new(
                    ap,
                    handle.addr,
                    Some(block_id),
                    l,
                    Direction::Read,
                    RequestKind::Host,
                    MapId::Primary,
                    Some(bio),
                    dev_sector,
                    vec![0u8; ftl.config.host_page_size],
                    0,
                    None,
                ));
                submit_bio(ftl, wrapper);
            }
        },
    }
}

/// Default `write_bio`. Locking `req.l` is the caller's responsibility:
/// `Ftl::write` locks before calling this.
pub fn write_bio(ftl: &Arc<Ftl>, req: WriteRequest) -> WriteResult {
    write_bio_with_retries(ftl, req, 0)
}

/// Does the actual allocate-and-submit work for a write, carrying forward
/// the number of times this request has already been deferred so a
/// re-exhaustion can be counted against `MAX_DEFER_RETRIES` instead of
/// silently resetting to zero.
fn write_bio_with_retries(ftl: &Arc<Ftl>, req: WriteRequest, retries: u32) -> WriteResult {
    match ftl.vtype.map_ltop(
        &ftl.allocator,
        req.l,
        req.is_gc,
        &ftl.map,
        &ftl.aps,
        &ftl.pools,
        &ftl.blocks,
        ftl.config.nr_aps,
    ) {
        Ok(Some(handle)) => {
            let block_id = handle.block.expect("map_ltop returned a handle with no block");
            let (_, offset) = handle.addr.split(ftl.config.nr_host_pages_in_blk);
            ftl.blocks[block_id.0].stage_write(offset, &req.payload);

            let flash_page_width = ftl.config.nr_host_pages_in_flash_page;
            let flash_base = (offset / flash_page_width) * flash_page_width;
            let buf = ftl.blocks[block_id.0].read_flash_page(flash_base, flash_page_width);

            let block_base = block_id.0 as u64 * ftl.config.nr_host_pages_in_blk as u64;
            let dev_sector = (block_base + flash_base as u64) * ftl.config.nr_phy_in_log;

            let ap = ApId(ftl.blocks[block_id.0].pool.0);
            let wrapper = Arc::new(RequestWrapper::new(
                ap,
                handle.addr,
                Some(block_id),
                req.l,
                Direction::Write,
                RequestKind::Host,
                req.map,
                req.complete_original,
                dev_sector,
                buf,
                req.private,
                req.completion,
            ));
            submit_bio(ftl, wrapper);
            WriteResult::Success
        }
        Ok(None) => {
            ftl.map.unlock_addr(req.l);
            let l = req.l;
            let next_retries = retries + 1;
            if next_retries >= MAX_DEFER_RETRIES {
                log::warn!(
                    "logical address {:?} exceeded {} deferred retries; leaving parked",
                    l,
                    MAX_DEFER_RETRIES
                );
            }
            defer_bio(ftl, DeferredEntry::Write { req, retries: next_retries });
            ftl.gc.kick();
            WriteResult::Deferred
        }
        Err(e) => {
            // Only a genuine construction/invariant error reaches here; the
            // ordinary exhaustion path returns Ok(None) above.
            ftl.map.unlock_addr(req.l);
            log::error!("write_bio: unexpected allocator error: {e}");
            WriteResult::Deferred
        }
    }
}

pub fn defer_bio(ftl: &Ftl, entry: DeferredEntry) {
    ftl.deferred.push(entry);
}

/// `submit_bio`: binds the request, accounts an AP access, and either
/// submits immediately (pool-serialize disabled, or the active strategy
/// declines to enqueue it) or parks it on the pool's waiting queue.
fn submit_bio(ftl: &Arc<Ftl>, wrapper: Arc<RequestWrapper>) {
    ftl.aps[wrapper.ap.0].record_access();
    let pool_id = ftl.aps[wrapper.ap.0].pool;
    let pool = &ftl.pools[pool_id.0];

    if !pool.serialize || !ftl.vtype.bio_wait_add(&wrapper) {
        wrapper.mark_start();
        do_submit(ftl, &wrapper);
        return;
    }

    let became_worker = pool.enqueue_waiting(wrapper);
    if became_worker {
        let ftl = Arc::clone(ftl);
        std::thread::spawn(move || run_delayed_submit(&ftl, pool_id));
    }
}

/// Runs the serialized-submission loop for one pool: pop the head of the
/// waiting queue, submit it, and keep draining until the queue is empty,
/// at which point `is_active` is cleared.
fn run_delayed_submit(ftl: &Arc<Ftl>, pool_id: crate::ids::PoolId) {
    let pool = &ftl.pools[pool_id.0];
    loop {
        match pool.pop_waiting() {
            Some(wrapper) => {
                wrapper.mark_start();
                do_submit(ftl, &wrapper);
                pool.clear_cur_bio();
                if pool.decrement_active() == 0 {
                    break;
                }
            }
            None => {
                pool.clear_active();
                break;
            }
        }
    }
}

/// Issues the device-facing I/O and runs `endio`.
fn do_submit(ftl: &Arc<Ftl>, wrapper: &Arc<RequestWrapper>) {
    let result = match wrapper.direction {
        Direction::Read => {
            let mut buf = wrapper.buf.lock().unwrap();
            ftl.device.read_block(wrapper.dev_sector, &mut buf)
        }
        Direction::Write => {
            let buf = wrapper.buf.lock().unwrap();
            ftl.device.write_block(wrapper.dev_sector, &buf)
        }
    };
    endio(ftl, wrapper, result);
}

/// Completion path: unlocks the logical address, advances per-block commit
/// counters, paces the device wait, restores and invokes the upstream
/// completion, and releases the wrapper.
fn endio(ftl: &Arc<Ftl>, wrapper: &Arc<RequestWrapper>, result: core::result::Result<(), i32>) {
    ftl.map.unlock_addr(wrapper.l);

    let mut became_full = false;
    if wrapper.direction == Direction::Write && result.is_ok() {
        if let Some(block_id) = wrapper.block {
            became_full = ftl.blocks[block_id.0].commit_page();
        }
    }
    if became_full {
        if let Some(block_id) = wrapper.block {
            ftl.pools[ftl.blocks[block_id.0].pool.0].push_prio(block_id);
            log::info!("block {:?} fully committed, queued for GC", block_id);
        }
    }

    let ap = &ftl.aps[wrapper.ap.0];
    let mut dev_wait_us = match wrapper.direction {
        Direction::Read => ap.t_read_us,
        Direction::Write => ap.t_write_us,
    };
    ftl.vtype.endio_hook(wrapper, &mut dev_wait_us);

    if !ftl.config.no_waits() && dev_wait_us > 0 {
        crate::time::pace(wrapper.start(), dev_wait_us);
    }

    let outcome = match &result {
        Ok(()) => {
            let buf = wrapper.buf.lock().unwrap();
            match wrapper.direction {
                Direction::Read => BioOutcome::Ok { payload: buf.clone() },
                Direction::Write => BioOutcome::Ok { payload: Vec::new() },
            }
        }
        Err(errno) => {
            log::error!("device I/O failed for {:?} at sector {}: errno {}", wrapper.direction, wrapper.dev_sector, errno);
            BioOutcome::Err(*errno)
        }
    };

    let private_outcome = match &outcome {
        BioOutcome::Ok { payload } => BioOutcome::Ok { payload: payload.clone() },
        BioOutcome::Err(e) => BioOutcome::Err(*e),
    };
    wrapper.complete_private(private_outcome);

    if let Some(orig) = &wrapper.orig {
        if wrapper.kind != RequestKind::GcRead {
            orig.complete(outcome);
        }
    }
}

/// Drains the deferred queue and re-dispatches each entry through its
/// original direction's entry point, in enqueue order. Intended to be
/// called by the GC collaborator once it has freed blocks; the core does
/// not run GC itself so nothing else would trigger this.
pub fn drain_deferred(ftl: &Arc<Ftl>) {
    let mut batch = Vec::new();
    while let Some(entry) = ftl.deferred.pop() {
        batch.push(entry);
    }

    for entry in batch {
        match entry {
            DeferredEntry::Read(bio) => read_bio(ftl, bio),
            DeferredEntry::Write { req, retries } => {
                ftl.map.lock_addr(req.l);
                write_bio_with_retries(ftl, req, retries);
            }
        }
    }
}
