//! Configuration for crabtree.
//!
//! Compile-time constants describe the on-disk format. [`StorageConfig`]
//! holds the runtime knobs and can be loaded from the environment:
//!
//! - `CRABTREE_POOL_SIZE`: number of buffer pool frames (default: `256`)
//! - `CRABTREE_BLOOM_FPR`: bloom filter false-positive rate for LSM disk
//!   components, in `(0, 1)` (default: `0.01`)
//! - `CRABTREE_EXCLUSIVE_LATCH`: `true` to latch leaves exclusively in
//!   search cursors (default: `false`)

use crate::buffer::LatchMode;
use crate::common::{Error, Result};

/// Size of a page in bytes (4KB).
///
/// This value is chosen to match:
/// - OS page size on most systems (4096 bytes)
/// - Common database page sizes (PostgreSQL uses 8KB, but 4KB is also standard)
///
/// # Memory Layout
/// With 4KB pages and 32-bit PageIds:
/// - Max pages: 2^32 = 4,294,967,296 pages
/// - Max database size: 4,294,967,296 × 4KB = 16TB
pub const PAGE_SIZE: usize = 4096;

/// Maximum number of pages with u32 PageId.
pub const MAX_PAGES: u64 = (u32::MAX as u64) + 1;

/// Maximum theoretical database size in bytes.
pub const MAX_DB_SIZE_BYTES: u64 = MAX_PAGES * PAGE_SIZE as u64;

/// Largest encoded tuple an index accepts.
///
/// A quarter of a page minus frame overhead: splitting a full frame by
/// bytes then always leaves room for the tuple that caused the split.
pub const MAX_TUPLE_SIZE: usize = 1000;

/// Runtime configuration for a buffer pool and the indexes built on it.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// Number of frames in the buffer pool.
    pub pool_size: usize,
    /// Target false-positive rate of bloom filters built for LSM components.
    pub bloom_false_positive_rate: f64,
    /// Latch mode search cursors take on leaf pages.
    pub latch_mode: LatchMode,
}

impl StorageConfig {
    /// Default number of buffer pool frames.
    pub const DEFAULT_POOL_SIZE: usize = 256;
    /// Default bloom filter false-positive rate.
    pub const DEFAULT_BLOOM_FPR: f64 = 0.01;

    const ENV_POOL_SIZE: &'static str = "CRABTREE_POOL_SIZE";
    const ENV_BLOOM_FPR: &'static str = "CRABTREE_BLOOM_FPR";
    const ENV_EXCLUSIVE_LATCH: &'static str = "CRABTREE_EXCLUSIVE_LATCH";

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to the defaults; set but unparsable
    /// variables are an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(Self::ENV_POOL_SIZE) {
            config.pool_size = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{}: expected a frame count, got {raw:?}", Self::ENV_POOL_SIZE))
            })?;
        }

        if let Some(raw) = lookup(Self::ENV_BLOOM_FPR) {
            config.bloom_false_positive_rate = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{}: expected a rate, got {raw:?}", Self::ENV_BLOOM_FPR))
            })?;
        }

        if let Some(raw) = lookup(Self::ENV_EXCLUSIVE_LATCH) {
            let exclusive: bool = raw.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{}: expected true or false, got {raw:?}",
                    Self::ENV_EXCLUSIVE_LATCH
                ))
            })?;
            config.latch_mode = if exclusive {
                LatchMode::Exclusive
            } else {
                LatchMode::Shared
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size < 4 {
            // A split holds two leaves plus a parent while the free page
            // manager pins its head page.
            return Err(Error::Config(format!(
                "pool_size must be at least 4, got {}",
                self.pool_size
            )));
        }
        let fpr = self.bloom_false_positive_rate;
        if !(fpr > 0.0 && fpr < 1.0) {
            return Err(Error::Config(format!(
                "bloom_false_positive_rate must be in (0, 1), got {fpr}"
            )));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pool_size: Self::DEFAULT_POOL_SIZE,
            bloom_false_positive_rate: Self::DEFAULT_BLOOM_FPR,
            latch_mode: LatchMode::Shared,
        }
    }
}
