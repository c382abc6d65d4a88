//! Crate-wide error types.
//!
//! Transient conditions the pipeline is expected to hit routinely (mapping
//! exhaustion, an unwritten read) are *not* errors — they are encoded as
//! ordinary return values on [`crate::pipeline::SubmitPipeline`]. `FtlError`
//! is reserved for construction-time misconfiguration and device-reported
//! failures; true invariant violations (double-invalidation, allocating past
//! a full block) panic via [`crate::invariant`] instead of returning here,
//! since they indicate state corruption rather than a recoverable condition.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, FtlError>;

#[derive(Debug, Error)]
pub enum FtlError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A pool's free list is empty and GC has no candidates to offer either.
    #[error("pool {0} exhausted: no free blocks")]
    PoolExhausted(usize),

    /// The device reported a failure while completing a request; carried
    /// verbatim to the upstream completion callback rather than retried.
    #[error("device I/O error (errno {0})")]
    Device(i32),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("nr_aps must equal the number of pools (got nr_aps={nr_aps}, pools={pools})")]
    ApPoolMismatch { nr_aps: usize, pools: usize },

    #[error("blocks_per_pool must be >= 1")]
    NoBlocksPerPool,

    #[error("nr_host_pages_in_blk ({nr_host_pages_in_blk}) must be a multiple of NR_HOST_PAGES_IN_FLASH_PAGE ({flash_page})")]
    BlockNotFlashPageAligned {
        nr_host_pages_in_blk: usize,
        flash_page: usize,
    },

    #[error("NR_HOST_PAGES_IN_FLASH_PAGE must be >= 1")]
    ZeroFlashPage,

    #[error("NR_PHY_IN_LOG must be >= 1")]
    ZeroPhyInLog,

    #[error("host_page_size must be >= 1")]
    ZeroHostPageSize,
}
