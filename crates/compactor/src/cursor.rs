//! Cursors that present input tables to the merge in one canonical form.
//!
//! A [`PostlistCursor`] walks a postlist table and yields every entry with
//! its key in the current layout, docids already shifted by the source's
//! offset, and tags stripped of anything the merge re-encodes:
//!
//! | Key type       | Presented key          | Presented tag                     |
//! |----------------|------------------------|-----------------------------------|
//! | UserMetadata   | `00 00 <name>`         | stored value                      |
//! | ValueStats     | `00 <n> <slot>`        | stored stats                      |
//! | ValueChunk     | re-keyed by offset     | stored chunk                      |
//! | DoclenChunk    | `00 e0` (first docid in [`ChunkInfo`]) | fixed-width doclens |
//! | PostingChunk   | bare term key          | (gap, wdf) pairs after the first posting |
//!
//! Every posting chunk of a term shares the bare term key, so a heap
//! ordered by key and then first docid yields a term's chunks from all
//! sources in docid order. A term whose two postings sit in one chunk is
//! presented as two single-posting chunks, which is how a merged table
//! stores a two-posting term; re-merging a merged table then reproduces the
//! chunking of a direct merge.
//!
//! [`CurrentCursor`] and [`LegacyCursor`] differ only in how they decode
//! the stored layout. [`open_postlist_cursor`] picks one from the
//! segment's format.

use codec::chunk::{add_zero_wdfs, posting_body_last};
use codec::keys::{
    self, legacy, parse_doclen_chunk_key, parse_posting_key, parse_value_chunk_key,
    value_chunk_key, DOCLEN_CHUNK_PREFIX,
};
use codec::{
    decode_continuation_header, decode_initial_header, decode_posting_body, doclen_chunk_span,
    pack_sparse_doclen_chunk, pack_string_preserving_sort, pack_uint_preserving_sort,
    unpack_string_preserving_sort, unpack_uint, unpack_uint_preserving_sort, DocCount, DocId,
    DoclenWidth, KeyType, TermCount,
};
use std::collections::VecDeque;
use table::{TableCursor, TableReader};

use crate::error::{corrupt, docid_out_of_range, CompactError, Result};
use crate::segment::Format;

/// Docid range and header values of the presented posting or doclen chunk.
///
/// `tf` is nonzero only for a term's initial chunk; `cf` is meaningful
/// only there. For doclen chunks only the docid range is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkInfo {
    pub firstdid: DocId,
    pub chunk_lastdid: DocId,
    pub tf: DocCount,
    pub cf: TermCount,
    pub first_wdf: TermCount,
}

/// Forward cursor over a postlist table in canonical form.
pub trait PostlistCursor {
    /// Moves to the next entry. Returns `false` once the table is done.
    fn next(&mut self) -> Result<bool>;
    fn key(&self) -> &[u8];
    fn key_type(&self) -> KeyType;
    fn tag(&self) -> &[u8];
    fn chunk(&self) -> &ChunkInfo;
}

/// Opens the cursor matching `format` over `table`, shifting docids by
/// `offset`. The cursor starts before the first entry.
pub fn open_postlist_cursor(
    table: &TableReader,
    format: Format,
    offset: DocId,
) -> Result<Box<dyn PostlistCursor>> {
    let input = table.cursor()?;
    Ok(match format {
        Format::Current => Box::new(CurrentCursor::new(input, offset)),
        Format::Legacy => Box::new(LegacyCursor::new(input, offset)),
    })
}

/// One presented entry.
#[derive(Debug, Clone)]
struct Entry {
    key: Vec<u8>,
    key_type: KeyType,
    tag: Vec<u8>,
    chunk: ChunkInfo,
}

impl Entry {
    fn plain(key: Vec<u8>, key_type: KeyType, tag: Vec<u8>) -> Self {
        Self {
            key,
            key_type,
            tag,
            chunk: ChunkInfo::default(),
        }
    }

    fn posting(key: Vec<u8>, chunk: ChunkInfo, tag: Vec<u8>) -> Self {
        Self {
            key,
            key_type: KeyType::PostingChunk,
            tag,
            chunk,
        }
    }
}

/// State shared by both cursor kinds: the entry being presented and any
/// entries already decoded but not yet presented.
#[derive(Debug)]
struct Presenter {
    current: Entry,
    queue: VecDeque<Entry>,
    offset: DocId,
}

impl Presenter {
    fn new(offset: DocId) -> Self {
        Self {
            current: Entry::plain(Vec::new(), KeyType::UserMetadata, Vec::new()),
            queue: VecDeque::new(),
            offset,
        }
    }

    fn advance(&mut self) -> bool {
        match self.queue.pop_front() {
            Some(e) => {
                self.current = e;
                true
            }
            None => false,
        }
    }

    fn shift(&self, did: DocId) -> Result<DocId> {
        did.checked_add(self.offset)
            .ok_or_else(|| docid_out_of_range(did, self.offset))
    }

    fn push_value_chunk(&mut self, key: &[u8], tag: Vec<u8>) -> Result<()> {
        let (slot, did) = parse_value_chunk_key(key)?;
        let key = value_chunk_key(slot, self.shift(did)?);
        self.queue.push_back(Entry::plain(key, KeyType::ValueChunk, tag));
        Ok(())
    }

    fn push_doclen_chunk(&mut self, first: DocId, tag: Vec<u8>) -> Result<()> {
        let (_, count) = doclen_chunk_span(&tag)?;
        let span = DocId::try_from(count - 1)
            .map_err(|_| corrupt("doclen chunk covers too many docids"))?;
        let firstdid = self.shift(first)?;
        let chunk = ChunkInfo {
            firstdid,
            chunk_lastdid: firstdid
                .checked_add(span)
                .ok_or_else(|| docid_out_of_range(format!("{}+{}", first, span), self.offset))?,
            ..ChunkInfo::default()
        };
        self.queue.push_back(Entry {
            key: DOCLEN_CHUNK_PREFIX.to_vec(),
            key_type: KeyType::DoclenChunk,
            tag,
            chunk,
        });
        Ok(())
    }

    /// Queues a term's initial chunk, splitting a two-posting chunk in two.
    /// `rest` holds the postings after the first as (gap, wdf) pairs.
    fn push_initial(
        &mut self,
        key: &[u8],
        tf: DocCount,
        cf: TermCount,
        first: (DocId, TermCount),
        chunk_last: DocId,
        rest: Vec<u8>,
    ) -> Result<()> {
        let firstdid = self.shift(first.0)?;
        if tf == 2 && chunk_last != first.0 {
            let second_wdf = cf.checked_sub(first.1).ok_or_else(|| {
                corrupt("first wdf exceeds collection frequency of a two-posting term")
            })?;
            let second = self.shift(chunk_last)?;
            self.queue.push_back(Entry::posting(
                key.to_vec(),
                ChunkInfo {
                    firstdid,
                    chunk_lastdid: firstdid,
                    tf,
                    cf,
                    first_wdf: first.1,
                },
                Vec::new(),
            ));
            self.queue.push_back(Entry::posting(
                key.to_vec(),
                ChunkInfo {
                    firstdid: second,
                    chunk_lastdid: second,
                    tf: 0,
                    cf: 0,
                    first_wdf: second_wdf,
                },
                Vec::new(),
            ));
            return Ok(());
        }
        self.queue.push_back(Entry::posting(
            key.to_vec(),
            ChunkInfo {
                firstdid,
                chunk_lastdid: self.shift(chunk_last)?,
                tf,
                cf,
                first_wdf: first.1,
            },
            rest,
        ));
        Ok(())
    }

    fn push_continuation(
        &mut self,
        key: &[u8],
        first: (DocId, TermCount),
        chunk_last: DocId,
        rest: Vec<u8>,
    ) -> Result<()> {
        let chunk = ChunkInfo {
            firstdid: self.shift(first.0)?,
            chunk_lastdid: self.shift(chunk_last)?,
            tf: 0,
            cf: 0,
            first_wdf: first.1,
        };
        self.queue.push_back(Entry::posting(key.to_vec(), chunk, rest));
        Ok(())
    }
}

/// Postings seen so far for the term being read.
#[derive(Debug)]
struct TermState {
    key: Vec<u8>,
    cf: TermCount,
    /// Last docid the term's postings may reach, if the format records it.
    last: Option<DocId>,
    /// Last docid of the previous chunk.
    prev_last: DocId,
    /// A further chunk may follow.
    more: bool,
}

impl TermState {
    /// Checks a continuation chunk covering `first..=last` and records it.
    fn accept(&mut self, first: DocId, last: DocId) -> Result<()> {
        if !self.more {
            return Err(corrupt("continuation chunk after the term's final chunk"));
        }
        if first <= self.prev_last || last < first {
            return Err(corrupt(format!(
                "continuation chunk {}..={} overlaps previous chunk ending at {}",
                first, last, self.prev_last
            )));
        }
        if self.last.is_some_and(|l| last > l) {
            return Err(corrupt("continuation chunk runs past the term's last docid"));
        }
        self.prev_last = last;
        Ok(())
    }
}

fn expect_term<'a>(term: &'a mut Option<TermState>, key: &[u8]) -> Result<&'a mut TermState> {
    term.as_mut()
        .filter(|t| t.key == key)
        .ok_or_else(|| corrupt("continuation chunk without an initial chunk"))
}

// -------------------- Current layout --------------------

/// Cursor over a postlist table in the current layout.
pub struct CurrentCursor {
    input: TableCursor,
    out: Presenter,
    term: Option<TermState>,
}

impl CurrentCursor {
    pub fn new(input: TableCursor, offset: DocId) -> Self {
        Self {
            input,
            out: Presenter::new(offset),
            term: None,
        }
    }

    fn read_posting(&mut self, key: &[u8], tag: &[u8]) -> Result<()> {
        let (_, prefix_len, suffix) = parse_posting_key(key)?;
        let bare = &key[..prefix_len];
        let mut p = tag;

        let Some(chunk_last) = suffix else {
            let h = decode_initial_header(&mut p)?;
            let chunk_last = if h.tf <= 2 {
                if !p.is_empty() {
                    return Err(corrupt("posting body on a term with at most two postings"));
                }
                h.last
            } else {
                posting_body_last(h.first, p)?
            };
            if chunk_last > h.last {
                return Err(corrupt("initial chunk runs past the term's last docid"));
            }
            self.term = Some(TermState {
                key: bare.to_vec(),
                cf: h.cf,
                last: Some(h.last),
                prev_last: chunk_last,
                more: chunk_last != h.last,
            });
            let rest = if h.tf <= 2 { Vec::new() } else { p.to_vec() };
            return self
                .out
                .push_initial(bare, h.tf, h.cf, (h.first, h.first_wdf), chunk_last, rest);
        };

        let term = expect_term(&mut self.term, bare)?;
        let weighted = term.cf != 0;
        let (first, first_wdf) = decode_continuation_header(&mut p, chunk_last, weighted)?;
        let rest = if weighted { p.to_vec() } else { add_zero_wdfs(p)? };
        if posting_body_last(first, &rest)? != chunk_last {
            return Err(corrupt("continuation chunk body disagrees with its key"));
        }
        term.accept(first, chunk_last)?;
        term.more = Some(chunk_last) != term.last;
        self.out
            .push_continuation(bare, (first, first_wdf), chunk_last, rest)
    }

    fn read_entry(&mut self) -> Result<bool> {
        if !self.input.next()? {
            return Ok(false);
        }
        let key = self.input.key().to_vec();
        let tag = self.input.read_tag()?.into_owned();
        match keys::classify_key(&key)? {
            kt @ (KeyType::UserMetadata | KeyType::ValueStats) => {
                self.out.queue.push_back(Entry::plain(key, kt, tag));
            }
            KeyType::ValueChunk => self.out.push_value_chunk(&key, tag)?,
            KeyType::DoclenChunk => {
                let first = parse_doclen_chunk_key(&key)?;
                self.out.push_doclen_chunk(first, tag)?;
            }
            KeyType::PostingChunk => self.read_posting(&key, &tag)?,
        }
        Ok(true)
    }
}

impl PostlistCursor for CurrentCursor {
    fn next(&mut self) -> Result<bool> {
        while self.out.queue.is_empty() {
            if !self.read_entry()? {
                return Ok(false);
            }
        }
        Ok(self.out.advance())
    }

    fn key(&self) -> &[u8] {
        &self.out.current.key
    }

    fn key_type(&self) -> KeyType {
        self.out.current.key_type
    }

    fn tag(&self) -> &[u8] {
        &self.out.current.tag
    }

    fn chunk(&self) -> &ChunkInfo {
        &self.out.current.chunk
    }
}

// -------------------- Legacy layout --------------------

/// A legacy chunk body, decoded up to its (gap, value) pairs.
///
/// ```text
/// u8 is_last_chunk | varint (chunk_last - first) | varint first_value | pairs
/// ```
struct LegacyBody<'a> {
    is_last: bool,
    chunk_last: DocId,
    first_value: u64,
    pairs: &'a [u8],
}

fn parse_legacy_body(first: DocId, body: &[u8]) -> Result<LegacyBody<'_>> {
    let (&flag, mut p) = body
        .split_first()
        .ok_or_else(|| corrupt("empty legacy chunk body"))?;
    if flag > 1 {
        return Err(corrupt(format!("bad legacy last-chunk flag {}", flag)));
    }
    let span: DocId = unpack_uint(&mut p)?;
    let first_value: u64 = unpack_uint(&mut p)?;
    let chunk_last = first
        .checked_add(span)
        .ok_or_else(|| corrupt("legacy chunk runs past the docid range"))?;
    Ok(LegacyBody {
        is_last: flag == 1,
        chunk_last,
        first_value,
        pairs: p,
    })
}

fn legacy_wdf(v: u64) -> Result<TermCount> {
    TermCount::try_from(v).map_err(|_| corrupt("legacy wdf exceeds 32 bits"))
}

/// Cursor over a postlist table in the legacy layout, translating every
/// entry to the current one on the fly.
pub struct LegacyCursor {
    input: TableCursor,
    out: Presenter,
    term: Option<TermState>,
}

impl LegacyCursor {
    pub fn new(input: TableCursor, offset: DocId) -> Self {
        Self {
            input,
            out: Presenter::new(offset),
            term: None,
        }
    }

    /// Re-encodes a legacy doclen chunk at fixed width.
    fn read_doclens(&mut self, key: &[u8], tag: &[u8]) -> Result<()> {
        let first = parse_doclen_chunk_key(key)?;
        let body = parse_legacy_body(first, tag)?;
        let span = usize::try_from(body.chunk_last - first)
            .ok()
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| corrupt("legacy doclen chunk too long"))?;

        // Only the documents present are held; unused slots are filled in
        // when packing.
        let mut present: Vec<(usize, u64)> = vec![(0, body.first_value)];
        let mut p = body.pairs;
        let mut did = first;
        let mut max = body.first_value;
        while !p.is_empty() {
            let gap: DocId = unpack_uint(&mut p)?;
            let doclen: u64 = unpack_uint(&mut p)?;
            did = did
                .checked_add(gap)
                .and_then(|d| d.checked_add(1))
                .filter(|&d| d <= body.chunk_last)
                .ok_or_else(|| corrupt("legacy doclen chunk docid out of range"))?;
            present.push(((did - first) as usize, doclen));
            max = max.max(doclen);
        }
        if did != body.chunk_last {
            return Err(corrupt("legacy doclen chunk ends before its last docid"));
        }

        let width = DoclenWidth::for_max(max).ok_or_else(|| {
            CompactError::Unsupported(format!("document length {} needs more than 32 bits", max))
        })?;
        // Every value is below 0xffffffff here, so the conversion is lossless.
        let tag = pack_sparse_doclen_chunk(
            width,
            span,
            present.into_iter().map(|(i, v)| (i, v as TermCount)),
        );
        self.out.push_doclen_chunk(first, tag)
    }

    fn read_posting(&mut self, key: &[u8], tag: &[u8]) -> Result<()> {
        let (_, prefix_len, suffix) = parse_posting_key(key)?;
        let bare = &key[..prefix_len];

        let Some(chunk_first) = suffix else {
            let mut p = tag;
            let tf: DocCount = unpack_uint(&mut p)?;
            let cf: TermCount = unpack_uint(&mut p)?;
            let first_minus_one: DocId = unpack_uint(&mut p)?;
            if tf == 0 {
                return Err(corrupt("legacy initial chunk with zero termfreq"));
            }
            let first = first_minus_one
                .checked_add(1)
                .ok_or_else(|| corrupt("legacy first docid out of range"))?;
            let body = parse_legacy_body(first, p)?;
            let first_wdf = legacy_wdf(body.first_value)?;
            if posting_body_last(first, body.pairs)? != body.chunk_last {
                return Err(corrupt("legacy chunk body disagrees with its header"));
            }
            if tf <= 2 && decode_posting_body(first, first_wdf, body.pairs)?.len() > tf as usize {
                return Err(corrupt("legacy chunk holds more postings than its termfreq"));
            }
            self.term = Some(TermState {
                key: bare.to_vec(),
                cf,
                last: None,
                prev_last: body.chunk_last,
                more: !body.is_last,
            });
            return self.out.push_initial(
                bare,
                tf,
                cf,
                (first, first_wdf),
                body.chunk_last,
                body.pairs.to_vec(),
            );
        };

        let term = expect_term(&mut self.term, bare)?;
        let body = parse_legacy_body(chunk_first, tag)?;
        let first_wdf = legacy_wdf(body.first_value)?;
        if posting_body_last(chunk_first, body.pairs)? != body.chunk_last {
            return Err(corrupt("legacy chunk body disagrees with its header"));
        }
        term.accept(chunk_first, body.chunk_last)?;
        term.more = !body.is_last;
        self.out.push_continuation(
            bare,
            (chunk_first, first_wdf),
            body.chunk_last,
            body.pairs.to_vec(),
        )
    }

    /// Reads the whole run of legacy value-stats entries starting with
    /// the one just read, and queues them re-keyed in slot order. Legacy
    /// slot suffixes do not sort numerically, so the run has to be sorted.
    fn read_value_stats(&mut self, first_key: &[u8], first_tag: Vec<u8>) -> Result<()> {
        let mut stats = vec![(
            keys::value_stats_key(legacy::parse_value_stats_key(first_key)?),
            first_tag,
        )];
        loop {
            if !self.input.next()? {
                break;
            }
            let key = self.input.key().to_vec();
            let tag = self.input.read_tag()?.into_owned();
            if legacy::classify_key(&key)? != KeyType::ValueStats {
                stats.sort_by(|a, b| a.0.cmp(&b.0));
                for (k, t) in stats.drain(..) {
                    self.out.queue.push_back(Entry::plain(k, KeyType::ValueStats, t));
                }
                return self.convert(key, tag);
            }
            stats.push((keys::value_stats_key(legacy::parse_value_stats_key(&key)?), tag));
        }
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        for (k, t) in stats {
            self.out.queue.push_back(Entry::plain(k, KeyType::ValueStats, t));
        }
        Ok(())
    }

    fn convert(&mut self, key: Vec<u8>, tag: Vec<u8>) -> Result<()> {
        match legacy::classify_key(&key)? {
            KeyType::UserMetadata => {
                let name = &key[legacy::USER_METADATA_PREFIX.len()..];
                if name.is_empty() {
                    return Err(corrupt("user metadata key with empty name"));
                }
                self.out.queue.push_back(Entry::plain(
                    keys::user_metadata_key(name),
                    KeyType::UserMetadata,
                    tag,
                ));
                Ok(())
            }
            KeyType::ValueStats => self.read_value_stats(&key, tag),
            KeyType::ValueChunk => self.out.push_value_chunk(&key, tag),
            KeyType::DoclenChunk => self.read_doclens(&key, &tag),
            KeyType::PostingChunk => self.read_posting(&key, &tag),
        }
    }

    fn read_entry(&mut self) -> Result<bool> {
        if !self.input.next()? {
            return Ok(false);
        }
        let key = self.input.key().to_vec();
        let tag = self.input.read_tag()?.into_owned();
        self.convert(key, tag)?;
        Ok(true)
    }
}

impl PostlistCursor for LegacyCursor {
    fn next(&mut self) -> Result<bool> {
        while self.out.queue.is_empty() {
            if !self.read_entry()? {
                return Ok(false);
            }
        }
        Ok(self.out.advance())
    }

    fn key(&self) -> &[u8] {
        &self.out.current.key
    }

    fn key_type(&self) -> KeyType {
        self.out.current.key_type
    }

    fn tag(&self) -> &[u8] {
        &self.out.current.tag
    }

    fn chunk(&self) -> &ChunkInfo {
        &self.out.current.chunk
    }
}

// -------------------- Docid-keyed tables --------------------

/// How a re-keyed table embeds its docid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    /// Position table: `sortable term | sortable docid`.
    TermThenDocid,
    /// Docdata and termlist tables: `sortable docid | rest`, any bytes after
    /// the docid kept as they are.
    DocidFirst,
}

/// Cursor over a table whose keys embed a docid, re-keying each key by the
/// source's offset. Tags are passed through in their stored form.
pub struct RekeyedCursor {
    input: TableCursor,
    layout: KeyLayout,
    offset: DocId,
    key: Vec<u8>,
}

impl RekeyedCursor {
    pub fn new(table: &TableReader, layout: KeyLayout, offset: DocId) -> Result<Self> {
        Ok(Self {
            input: table.cursor()?,
            layout,
            offset,
            key: Vec::new(),
        })
    }

    pub fn next(&mut self) -> Result<bool> {
        if !self.input.next()? {
            return Ok(false);
        }
        let mut p = self.input.key();
        self.key.clear();
        match self.layout {
            KeyLayout::TermThenDocid => {
                let term = unpack_string_preserving_sort(&mut p)?;
                let did: DocId = unpack_uint_preserving_sort(&mut p)?;
                if !p.is_empty() || term.is_empty() {
                    return Err(corrupt("bad position key"));
                }
                let did = did
                    .checked_add(self.offset)
                    .ok_or_else(|| docid_out_of_range(did, self.offset))?;
                pack_string_preserving_sort(&mut self.key, &term);
                pack_uint_preserving_sort(&mut self.key, did);
            }
            KeyLayout::DocidFirst => {
                let did: DocId = unpack_uint_preserving_sort(&mut p)
                    .map_err(|e| corrupt(format!("bad docid key: {}", e)))?;
                let did = did
                    .checked_add(self.offset)
                    .ok_or_else(|| docid_out_of_range(did, self.offset))?;
                pack_uint_preserving_sort(&mut self.key, did);
                self.key.extend_from_slice(p);
            }
        }
        Ok(true)
    }

    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    #[must_use]
    pub fn raw_tag(&self) -> (&[u8], bool) {
        self.input.raw_tag()
    }
}
