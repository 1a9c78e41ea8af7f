//! # Table - sorted key/tag store
//!
//! The on-disk container every segment table is written in. A table is an
//! immutable run of `(key, tag)` records in strictly increasing key order,
//! followed by a sparse block index and a footer. Tables are written once,
//! front to back, and read back either sequentially ([`TableCursor`]) or by
//! point lookup ([`TableReader::get`]).
//!
//! ## Table layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA SECTION (sorted key/tag records)                          │
//! │                                                               │
//! │ crc32 (u32) | key_len (u32) | key | flags (u8)                 │
//! │ tag_len (u32) | tag                                           │
//! │                                                               │
//! │ flags bit 0 = tag is zstd-compressed. The CRC32 covers        │
//! │ everything after itself in the record.                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX SECTION (one entry per block)                            │
//! │                                                               │
//! │ key_len (u32) | first key of block | data_offset (u64)         │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (20 bytes)                                              │
//! │                                                               │
//! │ entry_count (u64 LE) | index_offset (u64 LE)                   │
//! │ magic (u32 LE) "SGT1"                                         │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Offsets are relative to the table's first byte, which need not be the
//! start of the file: single-file segments place several tables back to
//! back. A table is located by its [`RootInfo`] (start offset plus footer
//! position), which the owning segment stores in its version record.
//!
//! Block size only decides how often an index entry is emitted; records
//! are never split or padded.

mod buffered;
mod format;
mod reader;
mod writer;

pub use buffered::{BufferedFile, BUFFER_SIZE};
pub use format::{RootInfo, FOOTER_BYTES, MAX_KEY_BYTES, TABLE_MAGIC};
pub use reader::{TableCursor, TableReader};
pub use writer::{sync_parent_dir, TableFile, TableSettings, TableWriter};

use std::io;
use thiserror::Error;

/// Errors from writing or reading a table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The bytes on disk do not form a valid table.
    #[error("corrupt table: {0}")]
    Corrupt(String),

    #[error("key {key:?} added after {previous:?}; keys must strictly increase")]
    OutOfOrder { previous: Vec<u8>, key: Vec<u8> },

    #[error("key of {0} bytes exceeds the maximum key size")]
    KeyTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, TableError>;

#[cfg(test)]
mod tests;
