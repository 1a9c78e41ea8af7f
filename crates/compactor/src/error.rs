use codec::DecodeError;
use std::io;
use table::TableError;
use thiserror::Error;

/// Errors from a compaction.
///
/// Nothing is retried: the first error aborts the compaction, temporary
/// files are removed and the destination's previous version record is left
/// as it was.
#[derive(Debug, Error)]
pub enum CompactError {
    /// An input segment's bytes violate the table or key format.
    #[error("corrupt input: {0}")]
    CorruptInput(String),

    /// The input is valid but uses something this engine cannot express,
    /// such as a document length needing more than 32 bits.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Another compaction or writer holds the destination lock.
    #[error("destination locked: {0}")]
    LockContention(String),

    /// A merged count no longer fits its integer type.
    #[error("overflow: {0}")]
    Overflow(String),

    /// Bad caller input: mismatched offsets, offsets that push docids past
    /// the docid range or make sources overlap, `last_docid` below the
    /// merged document count.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<DecodeError> for CompactError {
    fn from(e: DecodeError) -> Self {
        CompactError::CorruptInput(e.to_string())
    }
}

impl From<TableError> for CompactError {
    fn from(e: TableError) -> Self {
        match e {
            TableError::Io(e) => CompactError::Io(e),
            TableError::Corrupt(msg) => CompactError::CorruptInput(msg),
            TableError::OutOfOrder { previous, key } => CompactError::CorruptInput(format!(
                "merged keys out of order: {:?} after {:?}",
                key, previous
            )),
            TableError::KeyTooLarge(n) => {
                CompactError::Unsupported(format!("key of {} bytes is too large", n))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CompactError>;

/// Shorthand for a [`CompactError::CorruptInput`] with a formatted message.
pub(crate) fn corrupt(msg: impl Into<String>) -> CompactError {
    CompactError::CorruptInput(msg.into())
}

/// The error for a source docid that its offset pushes past the docid range.
pub(crate) fn docid_out_of_range(did: impl std::fmt::Display, offset: u32) -> CompactError {
    CompactError::InvalidArgument(format!(
        "docid {} plus offset {} exceeds the docid range",
        did, offset
    ))
}
