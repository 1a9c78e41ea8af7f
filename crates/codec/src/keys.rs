//! Postlist-table key layouts.
//!
//! The postlist table holds five kinds of entry, distinguished by the first
//! one or two bytes of the key. Their prefixes sort in the same order the
//! merge processes them, so one ascending walk visits each class as a single
//! contiguous run.
//!
//! ## Current layout
//!
//! ```text
//! 00 00 <name>                               user metadata
//! 00 <n=1..4> <slot, n bytes big-endian>     value statistics
//! 00 d8 <varint slot> <sortable did>         value chunk
//! 00 e0 [<sortable first did>]               doclen chunk (omitted when first did == 1)
//! <sortable term>                            initial posting chunk
//! <sortable term> <sortable chunk last did>  continuation posting chunk
//! ```
//!
//! Terms beginning with a zero byte are escaped to `00 ff`, so any key whose
//! first byte is nonzero, or whose second byte is `ff`, is a posting key.
//!
//! ## Legacy layout
//!
//! See [`legacy`]. Metadata and value statistics use different prefixes and
//! continuation posting keys carry the chunk's *first* docid.

use crate::sortable::{
    pack_string_preserving_sort, pack_uint_preserving_sort, unpack_string_preserving_sort,
    unpack_uint_preserving_sort,
};
use crate::varint::{pack_uint, unpack_uint};
use crate::{DecodeError, DecodeResult, DocId, ValueSlot};

/// Class of a postlist-table key, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyType {
    UserMetadata,
    ValueStats,
    ValueChunk,
    DoclenChunk,
    PostingChunk,
}

pub const USER_METADATA_PREFIX: [u8; 2] = [0x00, 0x00];
pub const VALUE_CHUNK_PREFIX: [u8; 2] = [0x00, 0xd8];
pub const DOCLEN_CHUNK_PREFIX: [u8; 2] = [0x00, 0xe0];

/// Classifies a current-layout postlist key.
///
/// # Errors
///
/// Returns [`DecodeError::Invalid`] for an empty key, a bare `00` byte, a
/// metadata key with an empty name, or an unrecognized `00 xx` prefix.
pub fn classify_key(key: &[u8]) -> DecodeResult<KeyType> {
    match key {
        [] => Err(DecodeError::Invalid("empty postlist key".into())),
        [first, ..] if *first != 0 => Ok(KeyType::PostingChunk),
        [_] => Err(DecodeError::Invalid("truncated postlist key".into())),
        [_, 0x00] => Err(DecodeError::Invalid("user metadata key with empty name".into())),
        [_, 0x00, ..] => Ok(KeyType::UserMetadata),
        [_, 0x01..=0x04, ..] => Ok(KeyType::ValueStats),
        [_, 0xd8, ..] => Ok(KeyType::ValueChunk),
        [_, 0xe0, ..] => Ok(KeyType::DoclenChunk),
        [_, 0xff, ..] => Ok(KeyType::PostingChunk),
        [_, other, ..] => Err(DecodeError::Invalid(format!(
            "unrecognized postlist key prefix 00 {:02x}",
            other
        ))),
    }
}

pub fn user_metadata_key(name: &[u8]) -> Vec<u8> {
    let mut key = USER_METADATA_PREFIX.to_vec();
    key.extend_from_slice(name);
    key
}

/// Value statistics key: `00`, byte count, big-endian slot bytes.
pub fn value_stats_key(slot: ValueSlot) -> Vec<u8> {
    let bytes = slot.to_be_bytes();
    let skip = (slot.leading_zeros() as usize / 8).min(3);
    let mut key = Vec::with_capacity(2 + 4 - skip);
    key.push(0x00);
    key.push((4 - skip) as u8);
    key.extend_from_slice(&bytes[skip..]);
    key
}

pub fn parse_value_stats_key(key: &[u8]) -> DecodeResult<ValueSlot> {
    match key {
        [0x00, n @ 0x01..=0x04, rest @ ..] if rest.len() == usize::from(*n) => {
            Ok(rest.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
        }
        _ => Err(DecodeError::Invalid("bad value stats key".into())),
    }
}

pub fn value_chunk_key(slot: ValueSlot, did: DocId) -> Vec<u8> {
    let mut key = VALUE_CHUNK_PREFIX.to_vec();
    pack_uint(&mut key, slot);
    pack_uint_preserving_sort(&mut key, did);
    key
}

/// Splits a value chunk key into `(slot, first did)`.
pub fn parse_value_chunk_key(key: &[u8]) -> DecodeResult<(ValueSlot, DocId)> {
    let mut p = key
        .strip_prefix(&VALUE_CHUNK_PREFIX[..])
        .ok_or_else(|| DecodeError::Invalid("bad value chunk key".into()))?;
    let slot = unpack_uint(&mut p)?;
    let did = unpack_uint_preserving_sort(&mut p)?;
    if !p.is_empty() {
        return Err(DecodeError::Invalid("trailing bytes in value chunk key".into()));
    }
    Ok((slot, did))
}

/// Doclen chunk key; the docid suffix is left off when `first_did` is 1.
pub fn doclen_chunk_key(first_did: DocId) -> Vec<u8> {
    let mut key = DOCLEN_CHUNK_PREFIX.to_vec();
    if first_did != 1 {
        pack_uint_preserving_sort(&mut key, first_did);
    }
    key
}

pub fn parse_doclen_chunk_key(key: &[u8]) -> DecodeResult<DocId> {
    let mut p = key
        .strip_prefix(&DOCLEN_CHUNK_PREFIX[..])
        .ok_or_else(|| DecodeError::Invalid("bad doclen chunk key".into()))?;
    if p.is_empty() {
        return Ok(1);
    }
    let did = unpack_uint_preserving_sort(&mut p)?;
    if !p.is_empty() || did == 0 {
        return Err(DecodeError::Invalid("bad doclen chunk key".into()));
    }
    Ok(did)
}

/// Key of a term's initial posting chunk.
pub fn posting_key(term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + 2);
    pack_string_preserving_sort(&mut key, term);
    key
}

/// Key of a continuation chunk, keyed by the chunk's last docid.
pub fn posting_continuation_key(term: &[u8], chunk_last: DocId) -> Vec<u8> {
    let mut key = posting_key(term);
    pack_uint_preserving_sort(&mut key, chunk_last);
    key
}

/// Splits a posting key into the term and, for continuation chunks, the
/// docid suffix. Returns the length of the initial-chunk key prefix too, so
/// callers can cut the suffix off without re-encoding the term.
pub fn parse_posting_key(key: &[u8]) -> DecodeResult<(Vec<u8>, usize, Option<DocId>)> {
    let mut p = key;
    let term = unpack_string_preserving_sort(&mut p)?;
    if term.is_empty() {
        return Err(DecodeError::Invalid("posting key with empty term".into()));
    }
    let prefix_len = key.len() - p.len();
    if p.is_empty() {
        return Ok((term, prefix_len, None));
    }
    let did = unpack_uint_preserving_sort(&mut p)?;
    if !p.is_empty() || did == 0 {
        return Err(DecodeError::Invalid("bad posting continuation key".into()));
    }
    Ok((term, prefix_len, Some(did)))
}

/// Key layout of the previous on-disk generation.
///
/// ```text
/// 00 c0 <name>                                 user metadata
/// 00 d0 <uint_last slot>                       value statistics
/// 00 d8 <varint slot> <sortable did>           value chunk (unchanged)
/// 00 e0 [<sortable first did>]                 doclen chunk (unchanged)
/// <sortable term>                              initial posting chunk
/// <sortable term> <sortable chunk first did>   continuation posting chunk
/// ```
pub mod legacy {
    use super::*;
    use crate::varint::{pack_uint_last, unpack_uint_last};

    pub const USER_METADATA_PREFIX: [u8; 2] = [0x00, 0xc0];
    pub const VALUE_STATS_PREFIX: [u8; 2] = [0x00, 0xd0];

    pub fn classify_key(key: &[u8]) -> DecodeResult<KeyType> {
        match key {
            [] => Err(DecodeError::Invalid("empty postlist key".into())),
            [first, ..] if *first != 0 => Ok(KeyType::PostingChunk),
            [_] => Err(DecodeError::Invalid("truncated postlist key".into())),
            [_, 0xc0, ..] => Ok(KeyType::UserMetadata),
            [_, 0xd0, ..] => Ok(KeyType::ValueStats),
            [_, 0xd8, ..] => Ok(KeyType::ValueChunk),
            [_, 0xe0, ..] => Ok(KeyType::DoclenChunk),
            [_, 0xff, ..] => Ok(KeyType::PostingChunk),
            [_, other, ..] => Err(DecodeError::Invalid(format!(
                "unrecognized legacy postlist key prefix 00 {:02x}",
                other
            ))),
        }
    }

    pub fn user_metadata_key(name: &[u8]) -> Vec<u8> {
        let mut key = USER_METADATA_PREFIX.to_vec();
        key.extend_from_slice(name);
        key
    }

    pub fn value_stats_key(slot: ValueSlot) -> Vec<u8> {
        let mut key = VALUE_STATS_PREFIX.to_vec();
        pack_uint_last(&mut key, slot);
        key
    }

    pub fn parse_value_stats_key(key: &[u8]) -> DecodeResult<ValueSlot> {
        let p = key
            .strip_prefix(&VALUE_STATS_PREFIX[..])
            .ok_or_else(|| DecodeError::Invalid("bad legacy value stats key".into()))?;
        unpack_uint_last(p)
    }

    /// Continuation chunk key, keyed by the chunk's first docid.
    pub fn posting_continuation_key(term: &[u8], chunk_first: DocId) -> Vec<u8> {
        let mut key = posting_key(term);
        pack_uint_preserving_sort(&mut key, chunk_first);
        key
    }
}
