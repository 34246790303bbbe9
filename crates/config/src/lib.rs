//! # Config
//!
//! Tunables for the `sstable` crate's table writer.
//!
//! There is exactly one knob the on-disk format exposes to callers: the
//! target size of an index block before it is flushed to disk
//! (`max_index_block_size_bytes`). Everything else about the format (wire
//! layout, varint encoding, binary search semantics) is fixed and not
//! configurable.
//!
//! The allocator alignment is also surfaced here since it is the other
//! injected constant the host is expected to supply (see
//! `sstable::memory::Allocator`).

use thiserror::Error;

/// Default per-level index block size, per the on-disk format design: 64 KiB.
pub const DEFAULT_MAX_INDEX_BLOCK_SIZE_BYTES: u64 = 64 * 1024;

/// Default allocator alignment for `MemoryRegion`s, in bytes: one page.
pub const DEFAULT_ALLOCATOR_ALIGNMENT: usize = 4096;

/// Errors raised while validating a [`Config`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_index_block_size_bytes` was zero.
    #[error("max_index_block_size_bytes must be greater than zero")]
    ZeroBlockSize,
    /// `allocator_alignment` was zero or not a power of two.
    #[error("allocator_alignment must be a non-zero power of two, got {0}")]
    InvalidAlignment(usize),
}

/// Validated configuration for an [`crate::Config`] building a table writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum serialized size of a data block or index block before it is
    /// flushed to disk. Bounds, but does not fix, the fan-out of the index
    /// tree: a block is flushed as soon as adding the next record would
    /// exceed this size.
    pub max_index_block_size_bytes: u64,
    /// Alignment requested from the allocator for each `MemoryRegion`.
    pub allocator_alignment: usize,
}

impl Config {
    /// Builds a [`Config`], validating both fields.
    pub fn new(
        max_index_block_size_bytes: u64,
        allocator_alignment: usize,
    ) -> Result<Self, ConfigError> {
        if max_index_block_size_bytes == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if allocator_alignment == 0 || !allocator_alignment.is_power_of_two() {
            return Err(ConfigError::InvalidAlignment(allocator_alignment));
        }
        Ok(Self {
            max_index_block_size_bytes,
            allocator_alignment,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_index_block_size_bytes: DEFAULT_MAX_INDEX_BLOCK_SIZE_BYTES,
            allocator_alignment: DEFAULT_ALLOCATOR_ALIGNMENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.max_index_block_size_bytes, 65536);
        assert_eq!(cfg.allocator_alignment, 4096);
    }

    #[test]
    fn rejects_zero_block_size() {
        assert_eq!(Config::new(0, 4096), Err(ConfigError::ZeroBlockSize));
    }

    #[test]
    fn rejects_non_power_of_two_alignment() {
        assert_eq!(
            Config::new(65536, 100),
            Err(ConfigError::InvalidAlignment(100))
        );
    }

    #[test]
    fn rejects_zero_alignment() {
        assert_eq!(Config::new(65536, 0), Err(ConfigError::InvalidAlignment(0)));
    }

    #[test]
    fn accepts_custom_values() {
        let cfg = Config::new(128 * 1024, 8192).unwrap();
        assert_eq!(cfg.max_index_block_size_bytes, 128 * 1024);
        assert_eq!(cfg.allocator_alignment, 8192);
    }
}
