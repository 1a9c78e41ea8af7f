//! Merges for the spelling and synonym tables.
//!
//! A key held by one input only is copied across untouched, compressed or
//! not. A key held by several inputs has its tags combined:
//!
//! | Table    | Key               | Combined as                          |
//! |----------|-------------------|--------------------------------------|
//! | spelling | `W<word>`         | frequencies summed                   |
//! | spelling | any other prefix  | prefix-compressed word list, unioned |
//! | synonym  | any               | length-prefixed word list, unioned   |

use codec::{
    pack_uint_last, unpack_uint_last, DecodeResult, ByteLengthPrefixedWords, ByteLengthPrefixedWriter,
    PrefixCompressedWords, PrefixCompressedWriter, TermCount,
};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use table::{TableCursor, TableReader, TableWriter};

use crate::error::{corrupt, CompactError, Result};

/// Leading byte of a spelling-table word frequency key.
pub const SPELLING_WORD_PREFIX: u8 = b'W';

/// Raw cursor over one word-list table, ordered for the merge heap.
struct MergeCursor {
    cursor: TableCursor,
    source: usize,
}

impl PartialEq for MergeCursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeCursor {}

impl PartialOrd for MergeCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cursor
            .key()
            .cmp(self.cursor.key())
            .then_with(|| other.source.cmp(&self.source))
    }
}

fn merge_wordlists<F>(out: &mut TableWriter, inputs: &[TableReader], mut combine: F) -> Result<()>
where
    F: FnMut(&[u8], &[Vec<u8>]) -> Result<Vec<u8>>,
{
    let mut heap = BinaryHeap::with_capacity(inputs.len());
    for (source, table) in inputs.iter().enumerate() {
        let mut cursor = table.cursor()?;
        if cursor.next()? {
            heap.push(MergeCursor { cursor, source });
        }
    }

    let mut tags = Vec::new();
    while let Some(mut top) = heap.pop() {
        let shared = heap.peek().is_some_and(|next| next.cursor.key() == top.cursor.key());
        if !shared {
            let (tag, compressed) = top.cursor.raw_tag();
            out.add_raw(top.cursor.key(), tag, compressed)?;
            if top.cursor.next()? {
                heap.push(top);
            }
            continue;
        }

        let key = top.cursor.key().to_vec();
        tags.clear();
        tags.push(top.cursor.read_tag()?.into_owned());
        if top.cursor.next()? {
            heap.push(top);
        }
        while heap.peek().is_some_and(|next| next.cursor.key() == key.as_slice()) {
            if let Some(mut dup) = heap.pop() {
                tags.push(dup.cursor.read_tag()?.into_owned());
                if dup.cursor.next()? {
                    heap.push(dup);
                }
            }
        }
        out.add(&key, &combine(&key, &tags)?)?;
    }
    Ok(())
}

/// Merges spelling tables.
pub fn merge_spellings(out: &mut TableWriter, inputs: &[TableReader]) -> Result<()> {
    merge_wordlists(out, inputs, |key, tags| {
        if key.first() == Some(&SPELLING_WORD_PREFIX) {
            sum_frequencies(tags)
        } else {
            union_prefix_compressed(tags)
        }
    })
}

/// Merges synonym tables.
pub fn merge_synonyms(out: &mut TableWriter, inputs: &[TableReader]) -> Result<()> {
    merge_wordlists(out, inputs, |_, tags| union_length_prefixed(tags))
}

fn sum_frequencies(tags: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut total: TermCount = 0;
    for tag in tags {
        let freq: TermCount = unpack_uint_last(tag)?;
        if freq == 0 {
            return Err(corrupt("zero spelling frequency"));
        }
        total = total
            .checked_add(freq)
            .ok_or_else(|| CompactError::Overflow("spelling frequency".into()))?;
    }
    let mut out = Vec::with_capacity(4);
    pack_uint_last(&mut out, total);
    Ok(out)
}

/// The current word of one input list, ordered for the union heap.
struct WordHead<I> {
    word: Vec<u8>,
    source: usize,
    rest: I,
}

impl<I> PartialEq for WordHead<I> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<I> Eq for WordHead<I> {}

impl<I> PartialOrd for WordHead<I> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<I> Ord for WordHead<I> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .word
            .cmp(&self.word)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Streams the sorted union of `lists` into `append`, one word at a time.
/// Each list must be strictly ascending.
fn union_words<I, W>(lists: Vec<I>, mut append: W) -> Result<()>
where
    I: Iterator<Item = DecodeResult<Vec<u8>>>,
    W: FnMut(&[u8]) -> DecodeResult<()>,
{
    let mut heap = BinaryHeap::with_capacity(lists.len());
    for (source, mut rest) in lists.into_iter().enumerate() {
        if let Some(word) = rest.next() {
            heap.push(WordHead {
                word: word?,
                source,
                rest,
            });
        }
    }

    let mut last: Option<Vec<u8>> = None;
    while let Some(mut top) = heap.pop() {
        if last.as_deref() != Some(top.word.as_slice()) {
            append(&top.word)?;
            last = Some(top.word.clone());
        }
        if let Some(next) = top.rest.next() {
            let next = next?;
            if next <= top.word {
                return Err(corrupt(format!(
                    "word list out of order: {:?} after {:?}",
                    next, top.word
                )));
            }
            top.word = next;
            heap.push(top);
        }
    }
    Ok(())
}

fn union_prefix_compressed(tags: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut writer = PrefixCompressedWriter::new();
    let lists = tags.iter().map(|t| PrefixCompressedWords::new(t)).collect();
    union_words(lists, |word| writer.append(word))?;
    Ok(writer.finish())
}

fn union_length_prefixed(tags: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut writer = ByteLengthPrefixedWriter::new();
    let lists = tags.iter().map(|t| ByteLengthPrefixedWords::new(t)).collect();
    union_words(lists, |word| writer.append(word))?;
    Ok(writer.finish())
}
