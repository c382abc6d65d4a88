//! GC contract surface. The garbage-collection policy itself is out of
//! scope; this module only exposes the hooks the core
//! promises: an idempotent kick signal, the per-pool `prio_list`, and the
//! per-block `gc_running` flag (the latter lives on `Block` itself since
//! it gates `lookup_ltop`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Idempotent "a deferred/exhaustion condition was reached" signal. A GC
/// collaborator polls `take_kicked` (or registers a callback via
/// `set_hook`) to learn it should run; repeated kicks before it runs are
/// coalesced rather than queued.
pub struct GcHooks {
    kicked: AtomicBool,
    hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl GcHooks {
    pub fn new() -> Self {
        GcHooks {
            kicked: AtomicBool::new(false),
            hook: Mutex::new(None),
        }
    }

    /// Registers a callback invoked synchronously every time `kick` fires.
    /// Intended for a GC engine to wake its own worker; optional, since
    /// a caller may prefer to poll `take_kicked` instead.
    pub fn set_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        *self.hook.lock().unwrap() = Some(hook);
    }

    /// Idempotent: calling this repeatedly before it is observed has the
    /// same effect as calling it once.
    pub fn kick(&self) {
        self.kicked.store(true, Ordering::Release);
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook();
        }
    }

    /// Observes and clears the kick flag.
    pub fn take_kicked(&self) -> bool {
        self.kicked.swap(false, Ordering::AcqRel)
    }
}

impl Default for GcHooks {
    fn default() -> Self {
        Self::new()
    }
}
