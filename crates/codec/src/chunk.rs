//! Posting-chunk headers, posting bodies and fixed-width doclen chunks.
//!
//! ## Posting chunks
//!
//! ```text
//! initial tag       varint tf | varint cf | varint (first - 1) | varint (last - first)
//!                   | varint first_wdf | body (only when tf > 2)
//! continuation tag  varint (chunk_last - chunk_first) | varint first_wdf | body
//! boolean cont.     varint (chunk_last - chunk_first) | delta body
//! body              repeated: varint (did - prev - 1) | varint wdf
//! delta body        repeated: varint (did - prev - 1)
//! ```
//!
//! `first`/`last` in the initial header are the term's first and last
//! docids over the whole posting list. A term with `tf == 2` never has a
//! body: the second posting is `last`, with wdf `cf - first_wdf`.
//!
//! ## Doclen chunks
//!
//! ```text
//! width(u8 = 8|16|24|32) | one big-endian entry per docid from the key's first did
//! ```
//!
//! An all-ones entry marks a docid with no document. It never appears first
//! or last in a chunk.

use byteorder::{BigEndian, ByteOrder};

use crate::varint::{pack_uint, unpack_uint};
use crate::{DecodeError, DecodeResult, DocCount, DocId, TermCount};

/// One (docid, wdf) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub did: DocId,
    pub wdf: TermCount,
}

/// Decoded header of a term's initial posting chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialHeader {
    pub tf: DocCount,
    pub cf: TermCount,
    pub first: DocId,
    pub last: DocId,
    pub first_wdf: TermCount,
}

fn invalid(msg: &str) -> DecodeError {
    DecodeError::Invalid(msg.to_string())
}

pub fn encode_initial_header(out: &mut Vec<u8>, header: &InitialHeader) {
    debug_assert!(header.tf > 0 && header.first > 0 && header.last >= header.first);
    pack_uint(out, header.tf);
    pack_uint(out, header.cf);
    pack_uint(out, header.first - 1);
    pack_uint(out, header.last - header.first);
    pack_uint(out, header.first_wdf);
}

/// Decodes an initial-chunk header, advancing `data` to the start of the body.
///
/// # Errors
///
/// Besides truncation and overflow, rejects `tf == 0`, a docid range that
/// leaves `1..=u32::MAX`, and a `first..=last` range too small to hold `tf`
/// distinct docids.
pub fn decode_initial_header(data: &mut &[u8]) -> DecodeResult<InitialHeader> {
    let tf: DocCount = unpack_uint(data)?;
    let cf: TermCount = unpack_uint(data)?;
    let first_minus_one: DocId = unpack_uint(data)?;
    let span: DocId = unpack_uint(data)?;
    let first_wdf: TermCount = unpack_uint(data)?;

    if tf == 0 {
        return Err(invalid("initial chunk with zero termfreq"));
    }
    let first = first_minus_one
        .checked_add(1)
        .ok_or_else(|| invalid("first docid out of range"))?;
    let last = first
        .checked_add(span)
        .ok_or_else(|| invalid("last docid out of range"))?;
    if u64::from(span) + 1 < u64::from(tf) {
        return Err(invalid("docid range too small for termfreq"));
    }
    if tf == 1 && span != 0 {
        return Err(invalid("single posting with distinct first and last docid"));
    }
    Ok(InitialHeader {
        tf,
        cf,
        first,
        last,
        first_wdf,
    })
}

/// Writes a continuation header. `first_wdf` is `None` for boolean terms.
pub fn encode_continuation_header(
    out: &mut Vec<u8>,
    chunk_first: DocId,
    chunk_last: DocId,
    first_wdf: Option<TermCount>,
) {
    debug_assert!(chunk_first <= chunk_last);
    pack_uint(out, chunk_last - chunk_first);
    if let Some(wdf) = first_wdf {
        pack_uint(out, wdf);
    }
}

/// Decodes a continuation header for a chunk whose last docid (taken from
/// its key) is `chunk_last`. Returns `(chunk_first, first_wdf)`; the wdf is 0
/// when `weighted` is false.
pub fn decode_continuation_header(
    data: &mut &[u8],
    chunk_last: DocId,
    weighted: bool,
) -> DecodeResult<(DocId, TermCount)> {
    let span: DocId = unpack_uint(data)?;
    let first = chunk_last
        .checked_sub(span)
        .filter(|&d| d != 0)
        .ok_or_else(|| invalid("continuation chunk starts before docid 1"))?;
    let first_wdf = if weighted { unpack_uint(data)? } else { 0 };
    Ok((first, first_wdf))
}

/// Appends the body for `rest`, the postings following a chunk's first
/// posting at `first`.
pub fn encode_posting_body(out: &mut Vec<u8>, first: DocId, rest: &[Posting]) {
    let mut prev = first;
    for p in rest {
        debug_assert!(p.did > prev);
        pack_uint(out, p.did - prev - 1);
        pack_uint(out, p.wdf);
        prev = p.did;
    }
}

/// Decodes a whole chunk, including its first posting, from the header
/// values and the body bytes.
pub fn decode_posting_body(
    first: DocId,
    first_wdf: TermCount,
    mut body: &[u8],
) -> DecodeResult<Vec<Posting>> {
    let mut postings = vec![Posting {
        did: first,
        wdf: first_wdf,
    }];
    let mut prev = first;
    while !body.is_empty() {
        let gap: DocId = unpack_uint(&mut body)?;
        let wdf: TermCount = unpack_uint(&mut body)?;
        prev = next_did(prev, gap)?;
        postings.push(Posting { did: prev, wdf });
    }
    Ok(postings)
}

/// Appends a delta-only body for the docids following `first`.
pub fn encode_delta_body(out: &mut Vec<u8>, first: DocId, rest: &[DocId]) {
    let mut prev = first;
    for &did in rest {
        debug_assert!(did > prev);
        pack_uint(out, did - prev - 1);
        prev = did;
    }
}

/// Decodes a delta-only body into the docids following `first`.
pub fn decode_delta_body(first: DocId, mut body: &[u8]) -> DecodeResult<Vec<DocId>> {
    let mut dids = Vec::new();
    let mut prev = first;
    while !body.is_empty() {
        let gap: DocId = unpack_uint(&mut body)?;
        prev = next_did(prev, gap)?;
        dids.push(prev);
    }
    Ok(dids)
}

/// Last docid covered by a body of (gap, wdf) pairs starting at `first`.
pub fn posting_body_last(first: DocId, mut body: &[u8]) -> DecodeResult<DocId> {
    let mut prev = first;
    while !body.is_empty() {
        let gap: DocId = unpack_uint(&mut body)?;
        let _wdf: TermCount = unpack_uint(&mut body)?;
        prev = next_did(prev, gap)?;
    }
    Ok(prev)
}

/// Re-encodes a (gap, wdf) body as a delta-only body.
pub fn strip_wdfs(mut body: &[u8]) -> DecodeResult<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len() / 2);
    while !body.is_empty() {
        let gap: DocId = unpack_uint(&mut body)?;
        let _wdf: TermCount = unpack_uint(&mut body)?;
        pack_uint(&mut out, gap);
    }
    Ok(out)
}

/// Re-encodes a delta-only body as (gap, 0) pairs.
pub fn add_zero_wdfs(mut body: &[u8]) -> DecodeResult<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len() * 2);
    while !body.is_empty() {
        let gap: DocId = unpack_uint(&mut body)?;
        pack_uint(&mut out, gap);
        out.push(0);
    }
    Ok(out)
}

fn next_did(prev: DocId, gap: DocId) -> DecodeResult<DocId> {
    prev.checked_add(gap)
        .and_then(|d| d.checked_add(1))
        .ok_or_else(|| invalid("docid gap overflows"))
}

/// Byte width of each entry in a doclen chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DoclenWidth {
    W8,
    W16,
    W24,
    W32,
}

/// The all-ones value at the widest entry size.
pub const DOCLEN_SENTINEL: u32 = u32::MAX;

impl DoclenWidth {
    /// Narrowest width whose all-ones sentinel is still above `max`.
    /// Returns `None` when `max` needs more than 32 bits to stay below the
    /// sentinel.
    #[must_use]
    pub fn for_max(max: u64) -> Option<Self> {
        match max {
            m if m < 0xff => Some(DoclenWidth::W8),
            m if m < 0xffff => Some(DoclenWidth::W16),
            m if m < 0xff_ffff => Some(DoclenWidth::W24),
            m if m < 0xffff_ffff => Some(DoclenWidth::W32),
            _ => None,
        }
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            DoclenWidth::W8 => 8,
            DoclenWidth::W16 => 16,
            DoclenWidth::W24 => 24,
            DoclenWidth::W32 => 32,
        }
    }

    #[must_use]
    pub fn bytes(self) -> usize {
        usize::from(self.bits() / 8)
    }

    pub fn from_bits(bits: u8) -> DecodeResult<Self> {
        match bits {
            8 => Ok(DoclenWidth::W8),
            16 => Ok(DoclenWidth::W16),
            24 => Ok(DoclenWidth::W24),
            32 => Ok(DoclenWidth::W32),
            other => Err(DecodeError::Invalid(format!("bad doclen chunk width {}", other))),
        }
    }

    fn sentinel(self) -> u32 {
        match self {
            DoclenWidth::W32 => DOCLEN_SENTINEL,
            w => (1u32 << w.bits()) - 1,
        }
    }
}

/// Encodes consecutive doclens (`None` = no document with that docid).
///
/// Every `Some` value must be below the width's sentinel and the first and
/// last entries must be `Some`.
pub fn pack_doclen_chunk(width: DoclenWidth, entries: &[Option<TermCount>]) -> Vec<u8> {
    debug_assert!(matches!(entries.first(), Some(Some(_))));
    debug_assert!(matches!(entries.last(), Some(Some(_))));
    let present = entries
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.map(|v| (i, v)));
    pack_sparse_doclen_chunk(width, entries.len(), present)
}

/// Encodes a doclen chunk covering `span` docids from `(index, doclen)`
/// pairs. Slots not named stay unused; indexes past `span` are ignored.
pub fn pack_sparse_doclen_chunk<I>(width: DoclenWidth, span: usize, present: I) -> Vec<u8>
where
    I: IntoIterator<Item = (usize, TermCount)>,
{
    let n = width.bytes();
    // Unused slots hold the all-ones sentinel.
    let mut out = vec![0xffu8; 1 + span * n];
    out[0] = width.bits();
    for (i, v) in present {
        debug_assert!(v < width.sentinel());
        if let Some(slot) = out.get_mut(1 + i * n..1 + (i + 1) * n) {
            BigEndian::write_uint(slot, u64::from(v), n);
        }
    }
    out
}

/// Checks a doclen chunk tag and returns its width and the number of
/// docids it covers, without decoding the entries.
pub fn doclen_chunk_span(tag: &[u8]) -> DecodeResult<(DoclenWidth, usize)> {
    let (&bits, body) = tag.split_first().ok_or(DecodeError::OutOfData)?;
    let width = DoclenWidth::from_bits(bits)?;
    let n = width.bytes();
    if body.is_empty() || body.len() % n != 0 {
        return Err(invalid("doclen chunk length is not a multiple of its width"));
    }
    let unused = |c: &[u8]| BigEndian::read_uint(c, n) == u64::from(width.sentinel());
    if unused(&body[..n]) || unused(&body[body.len() - n..]) {
        return Err(invalid("doclen chunk starts or ends with an unused slot"));
    }
    Ok((width, body.len() / n))
}

/// Decodes a doclen chunk tag into its width and per-docid entries.
pub fn unpack_doclen_chunk(tag: &[u8]) -> DecodeResult<(DoclenWidth, Vec<Option<TermCount>>)> {
    let (width, _) = doclen_chunk_span(tag)?;
    let n = width.bytes();
    let entries = tag[1..]
        .chunks_exact(n)
        .map(|c| {
            // At most four bytes, so the value fits.
            let v = BigEndian::read_uint(c, n) as u32;
            (v != width.sentinel()).then_some(v)
        })
        .collect();
    Ok((width, entries))
}
