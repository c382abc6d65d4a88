//! Upstream request shape and the per-I/O wrapper the pipeline binds to a
//! physical address.

use std::sync::Mutex;
use std::time::Instant;

use crate::ids::{ApId, BlockId, LogicalAddr, MapId, PhysAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Result handed to an upstream completion hook: the read payload on
/// success, or a device errno propagated verbatim.
pub enum BioOutcome {
    Ok { payload: Vec<u8> },
    Err(i32),
}

pub type CompletionHook = Box<dyn FnOnce(BioOutcome) + Send>;

/// One upstream request: a sector, a direction, a write payload (unused
/// for reads), a completion callback, and a private cookie.
pub struct Bio {
    pub sector: u64,
    pub direction: Direction,
    pub payload: Vec<u8>,
    pub private: usize,
    completion: Mutex<Option<CompletionHook>>,
}

impl Bio {
    pub fn new(sector: u64, direction: Direction, payload: Vec<u8>, private: usize, completion: CompletionHook) -> Self {
        Bio {
            sector,
            direction,
            payload,
            private,
            completion: Mutex::new(Some(completion)),
        }
    }

    /// Restores and invokes the saved completion hook exactly once.
    pub fn complete(&self, outcome: BioOutcome) {
        let hook = self.completion.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(outcome);
        }
    }
}

/// Distinguishes a normal host-issued wrapper from one a GC collaborator
/// issued to read a page ahead of relocating it, rather than inferring it
/// from "completion signal set + direction is read".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Host,
    GcRead,
}

/// Per-I/O state bound to a physical address. Lives for the duration of
/// exactly one I/O; built in `submit_bio`, consumed in `endio`.
pub struct RequestWrapper {
    pub ap: ApId,
    pub addr: PhysAddr,
    pub block: Option<BlockId>,
    pub l: LogicalAddr,
    pub direction: Direction,
    pub kind: RequestKind,
    pub map: MapId,
    /// The upstream request this wrapper ultimately completes. For a GC
    /// read this is `None` — the GC collaborator owns the handle and polls
    /// it directly rather than receiving a callback.
    pub orig: Option<std::sync::Arc<Bio>>,
    /// Device-facing sector, already translated from the logical sector.
    pub dev_sector: u64,
    /// Device-facing buffer: the payload being written, or the buffer a
    /// read will be filled into.
    pub buf: Mutex<Vec<u8>>,
    /// Private cookie and optional completion supplied directly to
    /// `Ftl::write`, independent of any `Bio` (a GC-issued write has no
    /// upstream bio at all, just this).
    pub private: usize,
    completion: Mutex<Option<CompletionHook>>,
    start: Mutex<Option<Instant>>,
}

/// Bounded retry count for a request that keeps hitting mapping exhaustion
/// on the deferred queue, rather than retrying indefinitely.
pub const MAX_DEFER_RETRIES: u32 = 8;

impl RequestWrapper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ap: ApId,
        addr: PhysAddr,
        block: Option<BlockId>,
        l: LogicalAddr,
        direction: Direction,
        kind: RequestKind,
        map: MapId,
        orig: Option<std::sync::Arc<Bio>>,
        dev_sector: u64,
        buf: Vec<u8>,
        private: usize,
        completion: Option<CompletionHook>,
    ) -> Self {
        RequestWrapper {
            ap,
            addr,
            block,
            l,
            direction,
            kind,
            map,
            orig,
            dev_sector,
            buf: Mutex::new(buf),
            private,
            completion: Mutex::new(completion),
            start: Mutex::new(None),
        }
    }

    pub fn mark_start(&self) {
        *self.start.lock().unwrap() = Some(Instant::now());
    }

    pub fn start(&self) -> Instant {
        self.start.lock().unwrap().unwrap_or_else(Instant::now)
    }

    /// Invokes this wrapper's own private completion, if any. Separate
    /// from `orig`'s completion since a GC-issued write may carry only
    /// this and no upstream `Bio` at all.
    pub fn complete_private(&self, outcome: BioOutcome) {
        if let Some(hook) = self.completion.lock().unwrap().take() {
            hook(outcome);
        }
    }
}
