//! Read-path companion to [`crate::writer`]: opens a table file, reads the
//! 8-byte root-offset footer, descends the index tree by binary search down
//! to a leaf, and binary-searches the leaf for an exact `(key, snapshotId)`.
//!
//! Not a named component of the core design — the writer's own tree is
//! useless without something that can walk it back down, so this module
//! completes the round trip the same way the data flow in the overview
//! describes it.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{FormatError, Result};
use crate::index_block::IndexBlock;
use crate::key::{Key, Value};
use crate::memory::{Allocator, MemoryRegion};
use crate::sbm::Sbm;

/// Opens an immutable table file for point lookups.
///
/// A `Mutex<File>` lets `get` take `&self` despite seeking, the same
/// single-lock-around-a-shared-handle pattern the format's reader side
/// relies on for concurrent readers of one file.
pub struct TableReader {
    file: Mutex<File>,
    allocator: Allocator,
    root_offset: u64,
}

impl TableReader {
    /// Opens `path`, reading only the 8-byte footer eagerly.
    pub fn open<P: AsRef<Path>>(path: P, config: &config::Config) -> Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::End(-8))?;
        let mut footer = [0u8; 8];
        file.read_exact(&mut footer)?;
        let root_offset = u64::from_le_bytes(footer);
        Ok(Self {
            file: Mutex::new(file),
            allocator: Allocator::new(config.allocator_alignment),
            root_offset,
        })
    }

    fn read_block_at(&self, offset: u64) -> Result<MemoryRegion> {
        let mut file = self.file.lock().map_err(|_| {
            FormatError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "table reader lock poisoned",
            ))
        })?;
        file.seek(SeekFrom::Start(offset))?;
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut region = self.allocator.allocate(len)?;
        file.read_exact(region.as_mut_slice()?)?;
        Ok(region)
    }

    fn read_index_block(&self, offset: u64) -> Result<IndexBlock> {
        let region = self.read_block_at(offset)?;
        IndexBlock::from_sbm(Sbm::from_region(region)?)
    }

    fn read_leaf(&self, offset: u64) -> Result<Sbm> {
        Sbm::from_region(self.read_block_at(offset)?)
    }

    /// Looks up the exact `(bytes, snapshot_id)` pair named by `key`.
    pub fn get(&self, key: &Key) -> Result<Option<Value>> {
        let mut offset = self.root_offset;
        loop {
            let block = self.read_index_block(offset)?;
            let idx = block.floor_index(key)?;
            let idx = if idx < 0 { 0 } else { idx as usize };
            let record = block.get(idx)?;
            offset = record.offset;
            if record.is_leaf {
                break;
            }
        }
        let leaf = self.read_leaf(offset)?;
        let idx = leaf.floor_index(key)?;
        if idx < 0 {
            return Ok(None);
        }
        let found = leaf.get(idx as usize)?;
        if found.key == *key {
            Ok(Some(found.value))
        } else {
            Ok(None)
        }
    }
}
