//! The Index Writer: a streaming builder that produces leaf data blocks and
//! a balanced index tree over them, appending both to a sequential
//! append-only file and finalizing with a single root-offset footer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, trace};

use crate::bloom_sink::BloomSink;
use crate::error::Result;
use crate::index_block::{IndexBlock, IndexBlockBuilder, IndexRecord};
use crate::key::Entry;
use crate::memory::Allocator;
use crate::sbm::SbmBuilder;

/// An append-only byte sink, supplied by the host.
///
/// Every method reports the file offset at which its write began, so
/// callers can record pointers into the blocks they just appended.
pub trait AppendSink {
    /// Writes 4 bytes little-endian, returns the pre-write file size.
    fn append_u32(&mut self, v: u32) -> Result<u64>;
    /// Writes 8 bytes little-endian, returns the pre-write file size.
    fn append_u64(&mut self, v: u64) -> Result<u64>;
    /// Writes `bytes` verbatim, returns the pre-write file size.
    fn append(&mut self, bytes: &[u8]) -> Result<u64>;
    /// Flushes and closes the sink. Subsequent operations fail.
    fn close(&mut self) -> Result<()>;
}

/// The default `AppendSink`: a buffered, exclusively-owned file handle.
pub struct FileSink {
    writer: BufWriter<File>,
    position: u64,
}

impl FileSink {
    /// Creates (or truncates) `path` and wraps it as an append-only sink.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            position: 0,
        })
    }
}

impl AppendSink for FileSink {
    fn append_u32(&mut self, v: u32) -> Result<u64> {
        let offset = self.position;
        self.writer.write_u32::<LittleEndian>(v)?;
        self.position += 4;
        Ok(offset)
    }

    fn append_u64(&mut self, v: u64) -> Result<u64> {
        let offset = self.position;
        self.writer.write_u64::<LittleEndian>(v)?;
        self.position += 8;
        Ok(offset)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.position;
        self.writer.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(offset)
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Builds the hierarchical index tree: `write` cascades a leaf-pointing
/// record up through open levels, promoting at most one level per call;
/// `finish` closes out every remaining level bottom-up and writes the root
/// offset footer.
///
/// `L[0]` is the lowest (leaf-pointing) level, the last element of `levels`
/// is the highest currently-open level.
pub struct IndexWriter<S: AppendSink> {
    sink: S,
    levels: Vec<IndexBlockBuilder>,
    allocator: Allocator,
    max_index_block_size_bytes: u64,
}

impl<S: AppendSink> IndexWriter<S> {
    /// Starts a writer over `sink`, sized per `config`.
    pub fn new(sink: S, config: &config::Config) -> Self {
        Self {
            sink,
            levels: Vec::new(),
            allocator: Allocator::new(config.allocator_alignment),
            max_index_block_size_bytes: config.max_index_block_size_bytes,
        }
    }

    fn append_length_prefixed(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.sink.append_u32(bytes.len() as u32)?;
        self.sink.append(bytes)?;
        Ok(offset)
    }

    /// Appends an already-serialized leaf data block and returns the offset
    /// of its length prefix, for use by a [`DataBlockWriter`].
    pub fn append_data_block(&mut self, bytes: &[u8]) -> Result<u64> {
        self.append_length_prefixed(bytes)
    }

    fn write_index_block(&mut self, block: IndexBlock) -> Result<IndexRecord> {
        let bytes = block.serialized_bytes()?.to_vec();
        let offset = self.append_length_prefixed(&bytes)?;
        block.release()?;
        trace!("flushed index block at offset {offset} ({} bytes)", bytes.len());
        Ok(IndexRecord::new(
            block.start_record().start_key.clone(),
            offset,
            false,
        ))
    }

    /// Cascades `record` up through open levels, promoting at most one level.
    pub fn write(&mut self, record: IndexRecord) -> Result<()> {
        let mut pending = Some(record);
        let mut i = 0usize;
        while pending.is_some() && i < self.levels.len() {
            let rec = pending.take().expect("checked Some above");
            if self.levels[i].size_bytes() as u64 >= self.max_index_block_size_bytes {
                let full = std::mem::replace(&mut self.levels[i], IndexBlockBuilder::new(self.allocator));
                let built = full.build()?;
                let meta = self.write_index_block(built)?;
                debug!("level {i} full, promoting one record to level {}", i + 1);
                self.levels[i].add_record(rec)?;
                pending = Some(meta);
            } else {
                self.levels[i].add_record(rec)?;
                pending = None;
            }
            i += 1;
        }
        if let Some(rec) = pending {
            let mut new_top = IndexBlockBuilder::new(self.allocator);
            new_top.add_record(rec)?;
            debug!("growing index tree to height {}", self.levels.len() + 1);
            self.levels.push(new_top);
        }
        Ok(())
    }

    /// Closes out every remaining level bottom-up, writes the 8-byte
    /// root-offset footer, and closes the sink. Returns the root offset.
    pub fn finish(mut self) -> Result<u64> {
        let mut pending: Option<IndexRecord> = None;
        let levels = std::mem::take(&mut self.levels);
        for mut level in levels {
            if let Some(rec) = pending.take() {
                level.add_record(rec)?;
            }
            let built = level.build()?;
            pending = Some(self.write_index_block(built)?);
        }
        let root = pending.ok_or(crate::error::FormatError::EmptyTable)?;
        self.sink.append_u64(root.offset)?;
        self.sink.close()?;
        debug!("table finished, root offset {}", root.offset);
        Ok(root.offset)
    }
}

/// The top-level streaming builder: accumulates entries into leaf data
/// blocks, forwards each flushed leaf to an [`IndexWriter`], and feeds every
/// key to a [`BloomSink`] collaborator.
pub struct DataBlockWriter<S: AppendSink, B: BloomSink> {
    index_writer: IndexWriter<S>,
    current: SbmBuilder,
    allocator: Allocator,
    bloom: B,
    max_block_size_bytes: u64,
}

impl<S: AppendSink, B: BloomSink> DataBlockWriter<S, B> {
    /// Starts a writer over `sink`, collaborating with `bloom`.
    pub fn new(sink: S, bloom: B, config: &config::Config) -> Self {
        let allocator = Allocator::new(config.allocator_alignment);
        Self {
            index_writer: IndexWriter::new(sink, config),
            current: SbmBuilder::new(allocator),
            allocator,
            bloom,
            max_block_size_bytes: config.max_index_block_size_bytes,
        }
    }

    /// Adds an entry, in ascending key order, to the table under
    /// construction. May flush the current leaf block.
    pub fn add_entry(&mut self, entry: Entry) -> Result<()> {
        self.bloom.put(&entry.key.bytes);
        self.current.add(entry)?;
        if self.current.size_bytes() as u64 >= self.max_block_size_bytes {
            self.flush_leaf()?;
        }
        Ok(())
    }

    fn flush_leaf(&mut self) -> Result<()> {
        if self.current.is_empty() {
            return Ok(());
        }
        let start_key = self
            .current
            .first_key()
            .cloned()
            .expect("non-empty builder has a first key");
        let builder = std::mem::replace(&mut self.current, SbmBuilder::new(self.allocator));
        let sbm = builder.build()?;
        let bytes = sbm.region_bytes()?.to_vec();
        let offset = self.index_writer.append_data_block(&bytes)?;
        sbm.release()?;
        trace!("flushed leaf data block at offset {offset} ({} bytes)", bytes.len());
        self.index_writer.write(IndexRecord::new(start_key, offset, true))
    }

    /// Flushes any partial leaf block, closes out the index tree, and
    /// returns `(root_offset, bloom_filter_blob)`.
    pub fn finish(mut self) -> Result<(u64, Vec<u8>)> {
        self.flush_leaf()?;
        let root_offset = self.index_writer.finish()?;
        let bloom_blob = self.bloom.finish()?;
        Ok((root_offset, bloom_blob))
    }
}
