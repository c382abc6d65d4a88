//! End-to-end scenarios driven against an in-memory fake `BioOps` device
//! rather than real hardware, for deterministic, fast test runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ftl_core::config::{Config, NVM_OPT_NO_WAITS, NVM_OPT_POOL_SERIALIZE};
use ftl_core::ftl::Ftl;
use ftl_core::ids::{BlockId, LogicalAddr, MapId};
use ftl_core::pipeline::{BioOps, WriteRequest, WriteResult};
use ftl_core::request::{Bio, BioOutcome, Direction};

/// In-memory device: one flat byte buffer addressed by `sector *
/// sector_size`. Tests fix `nr_phy_in_log = 1` so one device sector maps
/// onto exactly one host page, keeping sector arithmetic trivial.
struct FakeDevice {
    storage: Mutex<Vec<u8>>,
    sector_size: usize,
}

impl FakeDevice {
    fn new(nr_phys_pages: u64, sector_size: usize) -> Self {
        FakeDevice {
            storage: Mutex::new(vec![0u8; nr_phys_pages as usize * sector_size]),
            sector_size,
        }
    }
}

impl BioOps for FakeDevice {
    fn read_block(&self, sector: u64, buf: &mut [u8]) -> Result<(), i32> {
        let storage = self.storage.lock().unwrap();
        let start = sector as usize * self.sector_size;
        buf.copy_from_slice(&storage[start..start + buf.len()]);
        Ok(())
    }

    fn write_block(&self, sector: u64, buf: &[u8]) -> Result<(), i32> {
        let mut storage = self.storage.lock().unwrap();
        let start = sector as usize * self.sector_size;
        storage[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

const HOST_PAGE_SIZE: usize = 64;

fn config(nr_aps: usize, blocks_per_pool: usize, nr_host_pages_in_blk: usize, flash_page: usize, options: u32) -> Config {
    Config {
        nr_aps,
        blocks_per_pool,
        nr_pages: 256,
        nr_host_pages_in_blk,
        nr_host_pages_in_flash_page: flash_page,
        nr_phy_in_log: 1,
        host_page_size: HOST_PAGE_SIZE,
        t_read_us: 0,
        t_write_us: 0,
        options: options | NVM_OPT_NO_WAITS,
    }
}

fn build(cfg: Config) -> Arc<Ftl> {
    let nr_phys_pages = cfg.nr_blocks() as u64 * cfg.nr_host_pages_in_blk as u64;
    let device = Box::new(FakeDevice::new(nr_phys_pages, HOST_PAGE_SIZE));
    Ftl::new(cfg, device).expect("valid config")
}

fn payload(byte: u8) -> Vec<u8> {
    vec![byte; HOST_PAGE_SIZE]
}

/// Issues a write and blocks until it completes, returning the device-side
/// outcome. Works whether completion happens synchronously in this thread
/// (pool-serialize off) or on a background worker (pool-serialize on).
fn write_blocking(ftl: &Arc<Ftl>, l: u64, data: Vec<u8>) -> (WriteResult, BioOutcome) {
    let (tx, rx) = std::sync::mpsc::channel();
    let req = WriteRequest {
        l: LogicalAddr(l),
        payload: data,
        is_gc: false,
        private: 0,
        completion: Some(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        })),
        map: MapId::Primary,
        complete_original: None,
    };
    let result = ftl.write(req);
    match result {
        WriteResult::Success => {
            let outcome = rx.recv_timeout(Duration::from_secs(5)).expect("write completion");
            (result, outcome)
        }
        WriteResult::Deferred => (result, BioOutcome::Err(0)),
    }
}

fn read_blocking(ftl: &Arc<Ftl>, sector: u64) -> BioOutcome {
    let (tx, rx) = std::sync::mpsc::channel();
    let done = Arc::new(AtomicBool::new(false));
    let done2 = Arc::clone(&done);
    let bio = Arc::new(Bio::new(
        sector,
        Direction::Read,
        Vec::new(),
        0,
        Box::new(move |outcome| {
            done2.store(true, Ordering::Release);
            let _ = tx.send(outcome);
        }),
    ));
    ftl.read(bio);
    rx.recv_timeout(Duration::from_secs(5)).expect("read completion")
}

/// Issues a read and returns immediately without waiting for completion,
/// reporting whether it completed within a short grace period. Used by
/// the deferral scenarios, where completion must *not* happen until the
/// caller explicitly drains the deferred queue.
fn read_nonblocking(ftl: &Arc<Ftl>, sector: u64) -> (Arc<AtomicBool>, std::sync::mpsc::Receiver<BioOutcome>) {
    let (tx, rx) = std::sync::mpsc::channel();
    let done = Arc::new(AtomicBool::new(false));
    let done2 = Arc::clone(&done);
    let bio = Arc::new(Bio::new(
        sector,
        Direction::Read,
        Vec::new(),
        0,
        Box::new(move |outcome| {
            done2.store(true, Ordering::Release);
            let _ = tx.send(outcome);
        }),
    ));
    ftl.read(bio);
    (done, rx)
}

#[test]
fn scenario_1_zero_fill_on_cold_read() {
    let ftl = build(config(2, 4, 8, 2, 0));
    let outcome = read_blocking(&ftl, 5);
    match outcome {
        BioOutcome::Ok { payload } => assert!(payload.iter().all(|b| *b == 0)),
        BioOutcome::Err(e) => panic!("unexpected device error {e}"),
    }
    for pool in &ftl.pools {
        assert_eq!(pool.nr_free_blocks(), 4, "cold read must not consume a block");
    }
}

#[test]
fn scenario_2_sequential_writes_exhaust_a_block() {
    let ftl = build(config(1, 2, 8, 2, 0));
    for l in 0..8u64 {
        let (result, outcome) = write_blocking(&ftl, l, payload(l as u8));
        assert_eq!(result, WriteResult::Success);
        assert!(matches!(outcome, BioOutcome::Ok { .. }));
    }

    assert_eq!(ftl.pools[0].nr_free_blocks(), 1, "exactly one block consumed");
    let block = &ftl.blocks[0];
    assert_eq!(block.data_cmnt_size(), 8);
    assert!(!block.is_active(), "staging buffer released once fully committed");
    assert_eq!(ftl.pools[0].prio_snapshot(), vec![BlockId(0)]);
}

#[test]
fn scenario_3_overwrite_invalidates_previous_page() {
    let ftl = build(config(1, 2, 8, 2, 0));
    write_blocking(&ftl, 3, payload(1));
    write_blocking(&ftl, 3, payload(2));

    assert_eq!(ftl.blocks[0].nr_invalid_pages(), 1);
    assert_eq!(ftl.blocks[0].popcount_invalid(), 1);

    let outcome = read_blocking(&ftl, 3);
    match outcome {
        BioOutcome::Ok { payload } => assert!(payload.iter().all(|b| *b == 2)),
        BioOutcome::Err(e) => panic!("unexpected device error {e}"),
    }
}

#[test]
fn scenario_4_deferral_under_exhaustion_then_drains() {
    let ftl = build(config(1, 1, 8, 2, 0));
    for l in 0..8u64 {
        let (result, _) = write_blocking(&ftl, l, payload(l as u8));
        assert_eq!(result, WriteResult::Success);
    }
    assert_eq!(ftl.pools[0].nr_free_blocks(), 0);

    let req = WriteRequest {
        l: LogicalAddr(8),
        payload: payload(9),
        is_gc: false,
        private: 0,
        completion: None,
        map: MapId::Primary,
        complete_original: None,
    };
    assert_eq!(ftl.write(req), WriteResult::Deferred);
    assert!(ftl.gc.take_kicked());

    // GC frees the exhausted block.
    ftl.pools[0].put_block(BlockId(0));
    assert_eq!(ftl.pools[0].nr_free_blocks(), 1);

    ftl.drain_deferred();

    let outcome = read_blocking(&ftl, 8);
    match outcome {
        BioOutcome::Ok { payload } => assert!(payload.iter().all(|b| *b == 9)),
        BioOutcome::Err(e) => panic!("unexpected device error {e}"),
    }
}

#[test]
fn scenario_5_pool_serialize_caps_in_flight_at_one() {
    let ftl = build(config(1, 8, 8, 2, NVM_OPT_POOL_SERIALIZE));
    assert!(ftl.pools[0].serialize);

    let mut receivers = Vec::new();
    for l in 0..3u64 {
        let (tx, rx) = std::sync::mpsc::channel();
        let req = WriteRequest {
            l: LogicalAddr(l),
            payload: payload(l as u8),
            is_gc: false,
            private: 0,
            completion: Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
            map: MapId::Primary,
            complete_original: None,
        };
        assert_eq!(ftl.write(req), WriteResult::Success);
        receivers.push(rx);
    }

    for (i, rx) in receivers.into_iter().enumerate() {
        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap_or_else(|_| panic!("write {i} never completed"));
        assert!(matches!(outcome, BioOutcome::Ok { .. }));
    }

    // All three landed in the same block, in submission order.
    assert_eq!(ftl.blocks[0].data_cmnt_size(), 3);
}

#[test]
fn scenario_6_gc_in_progress_read_defers_not_zero_fills() {
    let ftl = build(config(1, 2, 8, 2, 0));
    write_blocking(&ftl, 0, payload(7));

    ftl.blocks[0].set_gc_running(true);

    let (done, rx) = read_nonblocking(&ftl, 0);
    std::thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::Acquire), "read against a gc_running block must defer, not complete");

    ftl.blocks[0].set_gc_running(false);
    ftl.drain_deferred();

    let outcome = rx.recv_timeout(Duration::from_secs(5)).expect("deferred read eventually completes");
    match outcome {
        BioOutcome::Ok { payload } => assert!(payload.iter().all(|b| *b == 7)),
        BioOutcome::Err(e) => panic!("unexpected device error {e}"),
    }
}

#[test]
fn write_then_read_round_trip() {
    let ftl = build(config(1, 2, 8, 2, 0));
    write_blocking(&ftl, 4, payload(42));
    let outcome = read_blocking(&ftl, 4);
    match outcome {
        BioOutcome::Ok { payload } => assert_eq!(payload, self::payload(42)),
        BioOutcome::Err(e) => panic!("unexpected device error {e}"),
    }
}
