//! # Codec - binary encodings for segment tables
//!
//! Every byte the compactor reads from or writes into a segment table goes
//! through this crate. It has no I/O of its own; all functions work on byte
//! slices and `Vec<u8>` buffers.
//!
//! ## Encodings
//!
//! | Module       | Encoding                                                   |
//! |--------------|------------------------------------------------------------|
//! | [`varint`]   | 7-bit varints, length-less trailing ints, length-prefixed strings |
//! | [`sortable`] | Order-preserving integers and strings for use inside keys  |
//! | [`keys`]     | Postlist key layouts (current + legacy) and classification |
//! | [`chunk`]    | Posting-chunk headers and bodies, fixed-width doclen chunks |
//! | [`words`]    | Word-list tag formats used by the spelling/synonym tables  |
//!
//! ## Decoding convention
//!
//! Decoders take `&mut &[u8]` and advance the slice past whatever they
//! consumed, so a sequence of fields is read by calling decoders in order on
//! the same cursor:
//!
//! ```rust
//! use codec::{pack_uint, unpack_uint};
//!
//! let mut buf = Vec::new();
//! pack_uint(&mut buf, 300u32);
//! pack_uint(&mut buf, 7u32);
//!
//! let mut p = buf.as_slice();
//! assert_eq!(unpack_uint::<u32>(&mut p).unwrap(), 300);
//! assert_eq!(unpack_uint::<u32>(&mut p).unwrap(), 7);
//! assert!(p.is_empty());
//! ```

pub mod chunk;
pub mod keys;
pub mod sortable;
pub mod varint;
pub mod words;

pub use chunk::{
    decode_continuation_header, decode_delta_body, decode_initial_header, decode_posting_body,
    encode_continuation_header, encode_delta_body, encode_initial_header, encode_posting_body,
    doclen_chunk_span, pack_doclen_chunk, pack_sparse_doclen_chunk, unpack_doclen_chunk, DoclenWidth,
    InitialHeader, Posting, DOCLEN_SENTINEL,
};
pub use keys::{classify_key, KeyType};
pub use sortable::{
    pack_string_preserving_sort, pack_uint_preserving_sort, unpack_string_preserving_sort,
    unpack_uint_preserving_sort,
};
pub use varint::{pack_string, pack_uint, pack_uint_last, unpack_string, unpack_uint, unpack_uint_last};
pub use words::{ByteLengthPrefixedWriter, ByteLengthPrefixedWords, PrefixCompressedWords, PrefixCompressedWriter};

use thiserror::Error;

/// Document identifier. Docids start at 1; 0 is never a valid docid.
pub type DocId = u32;
/// Within-document and collection frequencies.
pub type TermCount = u32;
/// Number of documents.
pub type DocCount = u32;
/// Value slot number.
pub type ValueSlot = u32;

/// Errors produced while decoding bytes.
///
/// `OutOfData` and `Overflow` are kept apart so callers can report a
/// truncated buffer differently from a value too wide for its target type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended in the middle of a value.
    #[error("out of data")]
    OutOfData,

    /// The encoded value does not fit the destination integer type.
    #[error("value overflows target type")]
    Overflow,

    /// The bytes are structurally wrong for the encoding being read.
    #[error("invalid encoding: {0}")]
    Invalid(String),
}

/// Shorthand for results of decoding functions.
pub type DecodeResult<T> = Result<T, DecodeError>;
