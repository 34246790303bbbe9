//! Index Record and Index Block: the building blocks of the hierarchical
//! index tree.
//!
//! An Index Block is structurally a Sorted Byte Map whose entries happen to
//! carry a fixed 9-byte payload (an 8-byte child offset plus a 1-byte
//! `isLeaf` flag) instead of an arbitrary value — so it is built directly on
//! top of [`crate::sbm`] rather than duplicating its layout.

use crate::error::{FormatError, Result};
use crate::key::{Entry, Key, Value};
use crate::memory::Allocator;
use crate::sbm::{Sbm, SbmBuilder, SbmIter};

/// A `(startKey, offset, isLeaf)` triple naming a child block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// The first (lowest) key of the child block.
    pub start_key: Key,
    /// File offset of the child block's length prefix.
    pub offset: u64,
    /// `true` if the child is a leaf data block rather than another index
    /// block.
    pub is_leaf: bool,
}

impl IndexRecord {
    /// Builds a record naming a child block.
    #[must_use]
    pub fn new(start_key: Key, offset: u64, is_leaf: bool) -> Self {
        Self {
            start_key,
            offset,
            is_leaf,
        }
    }

    fn to_entry(&self) -> Entry {
        let mut payload = Vec::with_capacity(9);
        payload.extend_from_slice(&self.offset.to_le_bytes());
        payload.push(u8::from(self.is_leaf));
        Entry::new(self.start_key.clone(), Value::new(payload))
    }

    fn from_entry(entry: Entry) -> Result<Self> {
        let payload = entry.value.as_bytes();
        if payload.len() != 9 {
            return Err(FormatError::MalformedVarint);
        }
        let offset = u64::from_le_bytes(
            payload[0..8]
                .try_into()
                .expect("payload.len() == 9, checked above"),
        );
        let is_leaf = payload[8] != 0;
        Ok(Self {
            start_key: entry.key,
            offset,
            is_leaf,
        })
    }
}

/// Accumulates `IndexRecord`s for one level of the index tree.
pub struct IndexBlockBuilder {
    inner: SbmBuilder,
    start_record: Option<IndexRecord>,
}

impl IndexBlockBuilder {
    /// Starts an empty builder.
    #[must_use]
    pub fn new(allocator: Allocator) -> Self {
        Self {
            inner: SbmBuilder::new(allocator),
            start_record: None,
        }
    }

    /// Appends `record`. Records must be added in strictly ascending
    /// `start_key` order (see [`SbmBuilder::add`]).
    pub fn add_record(&mut self, record: IndexRecord) -> Result<()> {
        if self.start_record.is_none() {
            self.start_record = Some(record.clone());
        }
        self.inner.add(record.to_entry())
    }

    /// Current serialized size upper bound — the exact size the block would
    /// occupy if built right now.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.inner.size_bytes()
    }

    /// The first record added, used to propagate the start key upward when
    /// this block itself gets flushed as a child of the next level.
    #[must_use]
    pub fn start_record(&self) -> Option<&IndexRecord> {
        self.start_record.as_ref()
    }

    /// `true` if no records have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Freezes the builder into an [`IndexBlock`] owning one `MemoryRegion`.
    pub fn build(self) -> Result<IndexBlock> {
        let start_record = self
            .start_record
            .expect("IndexBlockBuilder::build called with no records");
        let sbm = self.inner.build()?;
        Ok(IndexBlock { sbm, start_record })
    }
}

/// A frozen, immutable block of `IndexRecord`s, reusing the SBM wire layout.
pub struct IndexBlock {
    sbm: Sbm,
    start_record: IndexRecord,
}

impl IndexBlock {
    /// Wraps an already-decoded `Sbm` as an index block, re-deriving the
    /// start record from its first entry. Used by the reader, which opens
    /// blocks without having gone through `IndexBlockBuilder`.
    pub fn from_sbm(sbm: Sbm) -> Result<Self> {
        let start_record = IndexRecord::from_entry(sbm.get(0)?)?;
        Ok(Self { sbm, start_record })
    }

    /// Number of records in the block.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.sbm.entry_count()
    }

    /// The block's first record.
    #[must_use]
    pub fn start_record(&self) -> &IndexRecord {
        &self.start_record
    }

    /// Reconstructs record `i`.
    pub fn get(&self, i: usize) -> Result<IndexRecord> {
        IndexRecord::from_entry(self.sbm.get(i)?)
    }

    /// Largest index `i` with `record[i].start_key <= query`, or `-1`.
    pub fn floor_index(&self, query: &Key) -> Result<i64> {
        self.sbm.floor_index(query)
    }

    /// Smallest index `i` with `record[i].start_key >= query`, or
    /// `entry_count()`.
    pub fn ceiling_index(&self, query: &Key) -> Result<usize> {
        self.sbm.ceiling_index(query)
    }

    /// Iterates records ascending by start key.
    pub fn ascending_iter(&self) -> Result<SbmIter<'_>> {
        self.sbm.ascending_iter(None)
    }

    /// Borrows the block's serialized bytes, as written to the table file.
    pub fn serialized_bytes(&self) -> Result<&[u8]> {
        self.sbm.region_bytes()
    }

    /// Releases the block's backing memory region.
    pub fn release(&self) -> Result<()> {
        self.sbm.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    fn alloc() -> Allocator {
        Allocator::new(8)
    }

    #[test]
    fn round_trips_records() {
        let mut b = IndexBlockBuilder::new(alloc());
        b.add_record(IndexRecord::new(Key::new(b"a".to_vec(), 0), 0, true))
            .unwrap();
        b.add_record(IndexRecord::new(Key::new(b"m".to_vec(), 0), 40, true))
            .unwrap();
        assert_eq!(
            b.start_record().unwrap().start_key.bytes,
            b"a".to_vec()
        );
        let block = b.build().unwrap();
        assert_eq!(block.entry_count(), 2);
        let r0 = block.get(0).unwrap();
        assert_eq!(r0.offset, 0);
        assert!(r0.is_leaf);
        let r1 = block.get(1).unwrap();
        assert_eq!(r1.offset, 40);
        assert_eq!(r1.start_key.bytes, b"m".to_vec());
    }

    #[test]
    fn start_record_tracks_first_add() {
        let mut b = IndexBlockBuilder::new(alloc());
        assert!(b.start_record().is_none());
        b.add_record(IndexRecord::new(Key::new(b"z".to_vec(), 0), 7, false))
            .unwrap();
        assert_eq!(b.start_record().unwrap().offset, 7);
    }

    #[test]
    fn non_leaf_meta_record_round_trips() {
        let mut b = IndexBlockBuilder::new(alloc());
        b.add_record(IndexRecord::new(Key::new(b"root".to_vec(), 0), 1024, false))
            .unwrap();
        let block = b.build().unwrap();
        let r = block.get(0).unwrap();
        assert!(!r.is_leaf);
        assert_eq!(r.offset, 1024);
    }
}
