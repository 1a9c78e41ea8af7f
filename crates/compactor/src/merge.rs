//! N-way streaming merges for the postlist, position and docid-keyed
//! tables.
//!
//! The postlist merge walks the key classes in a fixed order, one phase per
//! class:
//!
//! ```text
//! user metadata -> value stats -> value chunks -> doclen chunks -> postings
//! ```
//!
//! Every input presents its entries through a [`PostlistCursor`], so the
//! merge never sees the stored layout or the source offsets. An entry of an
//! earlier class turning up after a later class has started means an input
//! is corrupt.

use codec::chunk::strip_wdfs;
use codec::keys::doclen_chunk_key;
use codec::{
    encode_continuation_header, encode_initial_header, pack_string, pack_uint,
    pack_uint_preserving_sort, unpack_string, unpack_uint, DocCount,
    DocId, InitialHeader, KeyType, TermCount,
};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use table::{TableReader, TableWriter};

use crate::cursor::{ChunkInfo, KeyLayout, PostlistCursor, RekeyedCursor};
use crate::error::{corrupt, CompactError, Result};
use crate::hooks::CompactHooks;

/// A live postlist cursor from one source, ordered for the merge heap.
struct HeapEntry {
    cursor: Box<dyn PostlistCursor>,
    /// Position of the source in the input list.
    source: usize,
}

impl HeapEntry {
    fn sort_key(&self) -> (&[u8], DocId, usize) {
        (self.cursor.key(), self.cursor.chunk().firstdid, self.source)
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key pops first.
        // Equal keys fall back to first docid, then source index.
        other.sort_key().cmp(&self.sort_key())
    }
}

struct PostlistHeap {
    heap: BinaryHeap<HeapEntry>,
}

impl PostlistHeap {
    fn new(cursors: Vec<Box<dyn PostlistCursor>>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (source, mut cursor) in cursors.into_iter().enumerate() {
            if cursor.next()? {
                heap.push(HeapEntry { cursor, source });
            }
        }
        Ok(Self { heap })
    }

    fn pop(&mut self) -> Option<HeapEntry> {
        self.heap.pop()
    }

    /// Advances `entry` and puts it back unless its source is exhausted.
    fn advance(&mut self, mut entry: HeapEntry) -> Result<()> {
        if entry.cursor.next()? {
            self.heap.push(entry);
        }
        Ok(())
    }

    /// Pops every entry whose key equals `key`, collecting their tags.
    fn drain_key(&mut self, key: &[u8], tags: &mut Vec<Vec<u8>>) -> Result<()> {
        while self.heap.peek().is_some_and(|e| e.cursor.key() == key) {
            if let Some(entry) = self.heap.pop() {
                tags.push(entry.cursor.tag().to_vec());
                self.advance(entry)?;
            }
        }
        Ok(())
    }
}

/// Postings of one term gathered from every source.
struct TermMerge {
    key: Vec<u8>,
    tf: DocCount,
    cf: TermCount,
    chunks: Vec<(ChunkInfo, Vec<u8>)>,
}

impl TermMerge {
    fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            tf: 0,
            cf: 0,
            chunks: Vec::new(),
        }
    }

    fn push(&mut self, chunk: ChunkInfo, body: Vec<u8>) -> Result<()> {
        if let Some((prev, _)) = self.chunks.last() {
            if chunk.firstdid <= prev.chunk_lastdid {
                return Err(CompactError::InvalidArgument(format!(
                    "postings for docid {} overlap another source; check the docid offsets",
                    chunk.firstdid
                )));
            }
        }
        if chunk.tf != 0 {
            self.tf = self.tf.checked_add(chunk.tf).ok_or_else(|| {
                CompactError::Overflow(format!("termfreq of {:?}", self.key))
            })?;
            self.cf = self.cf.checked_add(chunk.cf).ok_or_else(|| {
                CompactError::Overflow(format!("collection frequency of {:?}", self.key))
            })?;
        }
        self.chunks.push((chunk, body));
        Ok(())
    }

    /// Writes the merged initial chunk and, for terms with more than two
    /// postings, one continuation chunk per remaining input chunk.
    fn write(self, out: &mut TableWriter) -> Result<()> {
        let (first, first_body) = match self.chunks.first() {
            Some((info, body)) if info.tf != 0 => (info, body),
            _ => return Err(corrupt("posting list does not start with an initial chunk")),
        };
        let last = self.chunks.last().map_or(first.chunk_lastdid, |(c, _)| c.chunk_lastdid);

        if self.tf <= 2 {
            let consistent = self.chunks.len() == self.tf as usize
                && self.chunks.iter().all(|(c, b)| b.is_empty() && c.firstdid == c.chunk_lastdid);
            if !consistent {
                return Err(corrupt(format!(
                    "termfreq {} disagrees with the postings stored for {:?}",
                    self.tf, self.key
                )));
            }
        }

        let mut tag = Vec::new();
        encode_initial_header(
            &mut tag,
            &InitialHeader {
                tf: self.tf,
                cf: self.cf,
                first: first.firstdid,
                last,
                first_wdf: first.first_wdf,
            },
        );
        if self.tf > 2 {
            tag.extend_from_slice(first_body);
        }
        out.add(&self.key, &tag)?;
        if self.tf <= 2 {
            return Ok(());
        }

        let weighted = self.cf != 0;
        for (info, body) in &self.chunks[1..] {
            let mut key = self.key.clone();
            pack_uint_preserving_sort(&mut key, info.chunk_lastdid);
            tag.clear();
            encode_continuation_header(
                &mut tag,
                info.firstdid,
                info.chunk_lastdid,
                weighted.then_some(info.first_wdf),
            );
            if weighted {
                tag.extend_from_slice(body);
            } else {
                tag.extend_from_slice(&strip_wdfs(body)?);
            }
            out.add(&key, &tag)?;
        }
        Ok(())
    }
}

/// Merges postlist tables into `out`.
///
/// `cursors` must be unstarted and in source order; ties between equal
/// keys are broken by first docid and then by that order.
///
/// # Errors
///
/// [`CompactError::CorruptInput`] for out-of-phase keys or inconsistent
/// chunks, [`CompactError::Overflow`] if a merged count overflows, and any
/// error from the cursors or the writer.
pub fn merge_postlists(
    hooks: &mut dyn CompactHooks,
    out: &mut TableWriter,
    cursors: Vec<Box<dyn PostlistCursor>>,
) -> Result<()> {
    let mut heap = PostlistHeap::new(cursors)?;
    let mut phase = KeyType::UserMetadata;
    let mut term: Option<TermMerge> = None;
    let mut last_doclen: Option<DocId> = None;

    while let Some(top) = heap.pop() {
        let key_type = top.cursor.key_type();
        if key_type < phase {
            return Err(corrupt(format!(
                "{:?} entry {:?} after {:?} entries",
                key_type,
                top.cursor.key(),
                phase
            )));
        }
        phase = key_type;

        match key_type {
            KeyType::UserMetadata => {
                let key = top.cursor.key().to_vec();
                let mut tags = vec![top.cursor.tag().to_vec()];
                heap.advance(top)?;
                heap.drain_key(&key, &mut tags)?;
                let tag = match tags.len() {
                    1 => tags.swap_remove(0),
                    _ => hooks.resolve_duplicate_metadata(&key, &tags),
                };
                out.add(&key, &tag)?;
            }
            KeyType::ValueStats => {
                let key = top.cursor.key().to_vec();
                let mut tags = vec![top.cursor.tag().to_vec()];
                heap.advance(top)?;
                heap.drain_key(&key, &mut tags)?;
                out.add(&key, &merge_value_stats(&tags)?)?;
            }
            KeyType::ValueChunk => {
                out.add(top.cursor.key(), top.cursor.tag())?;
                heap.advance(top)?;
            }
            KeyType::DoclenChunk => {
                let chunk = *top.cursor.chunk();
                if last_doclen.is_some_and(|l| chunk.firstdid <= l) {
                    return Err(CompactError::InvalidArgument(format!(
                        "document lengths for docid {} overlap another source; check the docid offsets",
                        chunk.firstdid
                    )));
                }
                last_doclen = Some(chunk.chunk_lastdid);
                out.add(&doclen_chunk_key(chunk.firstdid), top.cursor.tag())?;
                heap.advance(top)?;
            }
            KeyType::PostingChunk => {
                if term.as_ref().is_some_and(|t| t.key != top.cursor.key()) {
                    if let Some(done) = term.take() {
                        done.write(out)?;
                    }
                }
                let t = term.get_or_insert_with(|| TermMerge::new(top.cursor.key().to_vec()));
                t.push(*top.cursor.chunk(), top.cursor.tag().to_vec())?;
                heap.advance(top)?;
            }
        }
    }

    if let Some(done) = term {
        done.write(out)?;
    }
    Ok(())
}

/// Combines value statistics for one slot.
///
/// Each tag is `varint freq | string lower | upper`, with an empty upper
/// meaning "same as lower". Frequencies add; the bounds widen, ignoring
/// empty lower bounds.
pub fn merge_value_stats(tags: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut freq: DocCount = 0;
    let mut lower: Option<Vec<u8>> = None;
    let mut upper: Vec<u8> = Vec::new();

    for tag in tags {
        let mut p = tag.as_slice();
        let f: DocCount = unpack_uint(&mut p)?;
        let l = unpack_string(&mut p)?;
        let u = if p.is_empty() { l } else { p };

        freq = freq
            .checked_add(f)
            .ok_or_else(|| CompactError::Overflow("value statistics frequency".into()))?;
        if !l.is_empty() && lower.as_deref().map_or(true, |cur| l < cur) {
            lower = Some(l.to_vec());
        }
        if u > upper.as_slice() {
            upper = u.to_vec();
        }
    }

    let lower = lower.unwrap_or_default();
    let mut out = Vec::with_capacity(8 + lower.len() + upper.len());
    pack_uint(&mut out, freq);
    pack_string(&mut out, &lower);
    if upper != lower {
        out.extend_from_slice(&upper);
    }
    Ok(out)
}

/// Merges position tables by re-keyed key. Tags are copied in their stored
/// form.
pub fn merge_positions(out: &mut TableWriter, inputs: &[(TableReader, DocId)]) -> Result<()> {
    merge_rekeyed(out, inputs, KeyLayout::TermThenDocid)
}

/// Merges tables keyed by a leading sortable docid (docdata, termlist),
/// shifting each key's docid by its source's offset. Any bytes after the
/// docid are kept, and tags are copied in their stored form. Offsets may
/// come in any order.
pub fn merge_docid_keyed(out: &mut TableWriter, inputs: &[(TableReader, DocId)]) -> Result<()> {
    merge_rekeyed(out, inputs, KeyLayout::DocidFirst)
}

fn merge_rekeyed(out: &mut TableWriter, inputs: &[(TableReader, DocId)], layout: KeyLayout) -> Result<()> {
    struct Entry {
        cursor: RekeyedCursor,
        source: usize,
    }
    impl PartialEq for Entry {
        fn eq(&self, other: &Self) -> bool {
            self.cmp(other) == Ordering::Equal
        }
    }
    impl Eq for Entry {}
    impl PartialOrd for Entry {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for Entry {
        fn cmp(&self, other: &Self) -> Ordering {
            other
                .cursor
                .key()
                .cmp(self.cursor.key())
                .then_with(|| other.source.cmp(&self.source))
        }
    }

    let mut heap = BinaryHeap::with_capacity(inputs.len());
    for (source, (table, offset)) in inputs.iter().enumerate() {
        let mut cursor = RekeyedCursor::new(table, layout, *offset)?;
        if cursor.next()? {
            heap.push(Entry { cursor, source });
        }
    }
    let mut last: Option<Vec<u8>> = None;
    while let Some(mut top) = heap.pop() {
        if last.as_deref() == Some(top.cursor.key()) {
            return Err(CompactError::InvalidArgument(format!(
                "two sources hold key {:?} after offsetting; check the docid offsets",
                top.cursor.key()
            )));
        }
        let (tag, compressed) = top.cursor.raw_tag();
        out.add_raw(top.cursor.key(), tag, compressed)?;
        if let Some(key) = last.as_mut() {
            key.clear();
            key.extend_from_slice(top.cursor.key());
        } else {
            last = Some(top.cursor.key().to_vec());
        }
        if top.cursor.next()? {
            heap.push(top);
        }
    }
    Ok(())
}
