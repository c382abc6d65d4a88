//! Device-wait pacing: emulates per-access flash latency.
//!
//! Rather than a bare microsecond-granularity busy-wait loop, this uses a
//! monotonic clock and a short sleep primitive: re-check the clock, and
//! only spin-sleep in small increments while a meaningful gap remains.

use std::time::{Duration, Instant};

/// Wait is considered excessive past this many microseconds and logged as a
/// diagnostic warning rather than failed outright.
const EXCESSIVE_WAIT_US: u64 = 1500;

/// Below this remaining gap we just spin rather than sleep, since sleeping
/// for single-digit microseconds is dominated by scheduler wakeup latency
/// on most hosts.
const MIN_SLEEP_GAP_US: u64 = 10;

const SLEEP_QUANTUM_US: u64 = 5;

/// Busy-paces the calling thread until `dev_wait_us` have elapsed since
/// `start`, as part of `endio`'s per-access pacing step.
///
/// No-op if `dev_wait_us` is zero (the `NVM_OPT_NO_WAITS` case is handled by
/// the caller not invoking this at all).
pub fn pace(start: Instant, dev_wait_us: u64) {
    if dev_wait_us == 0 {
        return;
    }

    loop {
        let elapsed_us = start.elapsed().as_micros() as u64;
        if elapsed_us >= dev_wait_us {
            break;
        }
        let remaining = dev_wait_us - elapsed_us;
        if remaining > MIN_SLEEP_GAP_US {
            std::thread::sleep(Duration::from_micros(SLEEP_QUANTUM_US));
        }
    }

    let total_us = start.elapsed().as_micros() as u64;
    if total_us > EXCESSIVE_WAIT_US {
        log::warn!(
            "device-wait pacing took {}us, exceeding the {}us excessive-wait threshold",
            total_us,
            EXCESSIVE_WAIT_US
        );
    }
}
