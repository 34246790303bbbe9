//! # sstable
//!
//! On-disk table format for an LSM-tree key-value store: a binary-searchable,
//! prefix-compressed, off-heap sorted block (the Sorted Byte Map) and a
//! hierarchical index writer that cascades such blocks into a balanced
//! pointer tree over a sequential append-only file.
//!
//! ## File layout
//!
//! ```text
//! [dataBlock_0_lenU32][dataBlock_0_bytes]
//! ...
//! [dataBlock_M_lenU32][dataBlock_M_bytes]
//! [indexBlock_level1_0_lenU32][bytes] ...
//! [indexBlock_level2_0_lenU32][bytes] ...
//! ...
//! [indexBlock_root_lenU32][bytes]
//! u64 rootOffset            // footer: 8 bytes at end of file
//! ```
//!
//! All multi-byte integers are little-endian. Writing starts with
//! [`DataBlockWriter`]; reading with [`TableReader`].
//!
//! ## What this crate does not do
//!
//! Compaction, the memtable/WAL, snapshot management, and the higher-level
//! read path all live above this crate. The bloom filter is treated as an
//! external collaborator via [`BloomSink`] — `crates/bloom` supplies the one
//! concrete implementation used in this workspace.

mod bloom_sink;
mod error;
mod index_block;
mod key;
mod memory;
mod sbm;
mod reader;
mod varint;
mod writer;

pub use bloom_sink::BloomSink;
pub use error::{FormatError, Result};
pub use index_block::{IndexBlock, IndexBlockBuilder, IndexRecord};
pub use key::{Entry, Key, Value};
pub use memory::{Allocator, MemoryRegion};
pub use reader::TableReader;
pub use sbm::{Sbm, SbmBuilder, SbmIter};
pub use writer::{AppendSink, DataBlockWriter, FileSink, IndexWriter};
