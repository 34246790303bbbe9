//! Error taxonomy for the on-disk table format.
//!
//! Every variant here corresponds to a named failure mode in the format's
//! design: decoding failures, programmer-error misuse of an already-freed
//! `MemoryRegion`, out-of-order builder input, and propagated I/O failures.
//! None of these are retried at this layer — a corrupt block or a failed
//! writer is the caller's problem to discard and recompact.

use thiserror::Error;

/// Errors raised by the varint codec, the Sorted Byte Map, and the Index
/// Writer.
#[derive(Debug, Error)]
pub enum FormatError {
    /// A varint consumed more bytes than its type allows without a
    /// terminator byte (5 for a 32-bit value, 10 for a 64-bit value), or the
    /// buffer ran out before a terminator was found.
    #[error("malformed varint")]
    MalformedVarint,

    /// `Sbm::get`/`IndexBlock::get` was called with an index outside
    /// `[0, entry_count())`.
    #[error("index {index} out of bounds (entry count {len})")]
    IndexOutOfBounds {
        /// The offending index.
        index: usize,
        /// The block's entry count.
        len: usize,
    },

    /// A read was attempted on a `MemoryRegion` after it was released.
    #[error("memory region used after release")]
    UseAfterFree,

    /// `MemoryRegion::release` was called on a region that was already
    /// released.
    #[error("memory region released twice")]
    DoubleFree,

    /// `SbmBuilder::add` (or `IndexBlockBuilder::add_record`) received a key
    /// that does not sort strictly after the previously added key.
    #[error("builder.add called with non-ascending key")]
    OrderingViolation,

    /// The underlying append-only sink or file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The allocator could not satisfy a request for `size` bytes.
    #[error("allocation failed ({size} bytes requested)")]
    AllocationFailed {
        /// The requested size, in bytes.
        size: usize,
    },

    /// `DataBlockWriter::finish`/`IndexWriter::finish` was called without a
    /// single entry ever having been added.
    #[error("refusing to write an empty table (no entries)")]
    EmptyTable,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FormatError>;
