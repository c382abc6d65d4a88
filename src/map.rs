//! Forward (logical -> physical+block) and reverse (physical -> logical)
//! translation maps, with per-logical-address locking and a global
//! `rev_lock` guarding the coupled forward/reverse update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use crate::block::Block;
use crate::ids::{BlockId, LogicalAddr, MapId, PhysAddr};

#[derive(Debug, Clone, Copy)]
pub struct ForwardEntry {
    pub addr: PhysAddr,
    pub block: Option<BlockId>,
}

impl ForwardEntry {
    pub const EMPTY: ForwardEntry = ForwardEntry {
        addr: PhysAddr::EMPTY,
        block: None,
    };
}

#[derive(Debug, Clone, Copy)]
pub struct ReverseEntry {
    pub logical: Option<LogicalAddr>,
    pub map: MapId,
}

impl ReverseEntry {
    pub const EMPTY: ReverseEntry = ReverseEntry {
        logical: None,
        map: MapId::Primary,
    };
}

/// A lookup result: a copy of the forward entry's contents.
#[derive(Debug, Clone, Copy)]
pub struct LtopHandle {
    pub addr: PhysAddr,
    pub block: Option<BlockId>,
}

/// Per-logical-address spinlock. Deliberately not a `std::sync::Mutex`
/// guard: the pipeline acquires this in `read_bio`/`write_bio` and only
/// releases it from `endio`, which for a pool-serialized request runs on a
/// different worker thread — a `MutexGuard` cannot cross that hop (it is
/// `!Send`), so the lock here is a bare atomic flag with explicit
/// `lock`/`unlock`, preferring atomic state over guard-scoped locking in
/// this contended fast path.
struct AddrLock {
    locked: AtomicBool,
}

impl AddrLock {
    fn new() -> Self {
        AddrLock {
            locked: AtomicBool::new(false),
        }
    }

    fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::thread::yield_now();
        }
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// Forward/reverse translation table for one FTL instance.
pub struct TranslationMap {
    addr_locks: Vec<AddrLock>,
    forward: Vec<Mutex<ForwardEntry>>,
    reverse: RwLock<Vec<ReverseEntry>>,
    rev_lock: Mutex<()>,
}

impl TranslationMap {
    pub fn new(nr_pages: u64, nr_phys_pages: u64) -> Self {
        TranslationMap {
            addr_locks: (0..nr_pages).map(|_| AddrLock::new()).collect(),
            forward: (0..nr_pages).map(|_| Mutex::new(ForwardEntry::EMPTY)).collect(),
            reverse: RwLock::new(vec![ReverseEntry::EMPTY; nr_phys_pages as usize]),
            rev_lock: Mutex::new(()),
        }
    }

    /// Acquires the per-logical-address lock, blocking the caller until
    /// it is free. Must be paired with `unlock_addr`.
    pub fn lock_addr(&self, l: LogicalAddr) {
        self.addr_locks[l.0 as usize].lock();
    }

    pub fn unlock_addr(&self, l: LogicalAddr) {
        self.addr_locks[l.0 as usize].unlock();
    }

    /// Reads `{addr, block}` for `l`. Fails (returns `None`) if the
    /// target block has `gc_running` set — the caller must defer rather
    /// than serve a read against a page mid-relocation.
    pub fn lookup_ltop(&self, l: LogicalAddr, blocks: &[Block]) -> Option<LtopHandle> {
        let entry = *self.forward[l.0 as usize].lock().unwrap();
        if let Some(block) = entry.block {
            if blocks[block.0].gc_running() {
                return None;
            }
        }
        Some(LtopHandle {
            addr: entry.addr,
            block: entry.block,
        })
    }

    /// Installs `(l -> p, block)` as the unique live mapping for `l`,
    /// invalidating whatever page the previous mapping pointed at and
    /// poisoning its reverse entry. The caller must already hold `l`'s
    /// `lock_addr`; this additionally takes the short-lived `rev_lock`.
    pub fn update_map(&self, l: LogicalAddr, p: PhysAddr, block: BlockId, map: MapId, blocks: &[Block]) {
        let _rev = self.rev_lock.lock().unwrap();
        let mut entry = self.forward[l.0 as usize].lock().unwrap();

        let prev = *entry;
        if let Some(prev_block) = prev.block {
            blocks[prev_block.0].invalidate_page(prev.addr);
            self.reverse.write().unwrap()[prev.addr.0 as usize] = ReverseEntry {
                logical: None, // POISON: forward owner was just invalidated
                map: MapId::Primary,
            };
        }

        *entry = ForwardEntry {
            addr: p,
            block: Some(block),
        };

        self.reverse.write().unwrap()[p.0 as usize] = ReverseEntry {
            logical: Some(l),
            map,
        };
    }

    pub fn reverse_lookup(&self, p: PhysAddr) -> ReverseEntry {
        self.reverse.read().unwrap()[p.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ApId;
    use crate::ids::PoolId;

    fn one_block() -> Vec<Block> {
        vec![Block::new(BlockId(0), PoolId(0), 8, 2, 64)]
    }

    #[test]
    fn update_map_poisons_previous_reverse_entry() {
        let blocks = one_block();
        blocks[0].activate(ApId(0));
        let map = TranslationMap::new(4, 8);

        let p0 = blocks[0].alloc_phys().unwrap();
        map.lock_addr(LogicalAddr(3));
        map.update_map(LogicalAddr(3), p0, BlockId(0), MapId::Primary, &blocks);
        map.unlock_addr(LogicalAddr(3));
        assert_eq!(map.reverse_lookup(p0).logical, Some(LogicalAddr(3)));

        let p1 = blocks[0].alloc_phys().unwrap();
        map.lock_addr(LogicalAddr(3));
        map.update_map(LogicalAddr(3), p1, BlockId(0), MapId::Primary, &blocks);
        map.unlock_addr(LogicalAddr(3));

        assert_eq!(blocks[0].nr_invalid_pages(), 1);
        assert!(map.reverse_lookup(p0).logical.is_none());
        assert_eq!(map.reverse_lookup(p1).logical, Some(LogicalAddr(3)));
    }

    #[test]
    fn lookup_fails_while_gc_running() {
        let blocks = one_block();
        blocks[0].activate(ApId(0));
        let map = TranslationMap::new(4, 8);
        let p0 = blocks[0].alloc_phys().unwrap();
        map.lock_addr(LogicalAddr(0));
        map.update_map(LogicalAddr(0), p0, BlockId(0), MapId::Primary, &blocks);
        map.unlock_addr(LogicalAddr(0));

        assert!(map.lookup_ltop(LogicalAddr(0), &blocks).is_some());
        blocks[0].set_gc_running(true);
        assert!(map.lookup_ltop(LogicalAddr(0), &blocks).is_none());
    }
}
