//! FTL configuration knobs.

use crate::error::ConfigError;

/// Disable device-wait pacing entirely (`NVM_OPT_NO_WAITS`).
pub const NVM_OPT_NO_WAITS: u32 = 1 << 0;
/// Serialize I/O per pool via the waiting queue (`NVM_OPT_POOL_SERIALIZE`).
pub const NVM_OPT_POOL_SERIALIZE: u32 = 1 << 1;

/// Aggregates every configuration knob an `Ftl` instance needs.
///
/// One `Config` describes one [`crate::ftl::Ftl`] instance: the number of
/// append points (1:1 with pools), the block/page geometry, and per-AP
/// device-wait targets.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of append points == number of pools.
    pub nr_aps: usize,
    /// Blocks owned by each pool.
    pub blocks_per_pool: usize,
    /// Total logical page count exposed to upstream clients.
    pub nr_pages: u64,
    /// Host pages per erase-block.
    pub nr_host_pages_in_blk: usize,
    /// Host pages grouped into one flash page (the device write unit).
    pub nr_host_pages_in_flash_page: usize,
    /// Device sectors per host page.
    pub nr_phy_in_log: u64,
    /// Byte size of one host page, needed to actually back a staging
    /// buffer with real bytes.
    pub host_page_size: usize,
    /// Per-AP microsecond device-wait target for reads, applied uniformly.
    pub t_read_us: u64,
    /// Per-AP microsecond device-wait target for writes, applied uniformly.
    pub t_write_us: u64,
    /// Option bitmask (`NVM_OPT_*`).
    pub options: u32,
}

impl Config {
    pub fn no_waits(&self) -> bool {
        self.options & NVM_OPT_NO_WAITS != 0
    }

    pub fn pool_serialize(&self) -> bool {
        self.options & NVM_OPT_POOL_SERIALIZE != 0
    }

    /// Total number of erase-blocks across all pools.
    pub fn nr_blocks(&self) -> usize {
        self.nr_aps * self.blocks_per_pool
    }

    /// Flash pages per block (the unit `next_page` counts in).
    pub fn nr_flash_pages_in_blk(&self) -> usize {
        self.nr_host_pages_in_blk / self.nr_host_pages_in_flash_page
    }

    /// Checks the geometry's arithmetic invariants. Malformed construction
    /// input is a caller mistake, not a runtime invariant violation, so
    /// this returns an error rather than panicking.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blocks_per_pool == 0 {
            return Err(ConfigError::NoBlocksPerPool);
        }
        if self.nr_host_pages_in_flash_page == 0 {
            return Err(ConfigError::ZeroFlashPage);
        }
        if self.nr_host_pages_in_blk % self.nr_host_pages_in_flash_page != 0 {
            return Err(ConfigError::BlockNotFlashPageAligned {
                nr_host_pages_in_blk: self.nr_host_pages_in_blk,
                flash_page: self.nr_host_pages_in_flash_page,
            });
        }
        if self.nr_phy_in_log == 0 {
            return Err(ConfigError::ZeroPhyInLog);
        }
        if self.host_page_size == 0 {
            return Err(ConfigError::ZeroHostPageSize);
        }
        Ok(())
    }
}
