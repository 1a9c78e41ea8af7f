use crate::version::{write_embedded, VERSION_MAX_SIZE};
use crate::*;
use anyhow::Result;
use codec::chunk::add_zero_wdfs;
use codec::keys::{doclen_chunk_key, legacy, parse_posting_key, posting_continuation_key, posting_key};
use codec::{
    decode_continuation_header, decode_initial_header, decode_posting_body, encode_continuation_header,
    encode_initial_header, encode_posting_body, pack_doclen_chunk, pack_string,
    pack_string_preserving_sort, pack_uint, pack_uint_preserving_sort, DocId, DoclenWidth, InitialHeader,
    Posting, TermCount,
};
use std::fs::{self, OpenOptions};
use std::path::Path;
use table::{BufferedFile, TableFile, TableReader, TableSettings, TableWriter};

pub type Entries = Vec<(Vec<u8>, Vec<u8>)>;

/// Tables to write into a fixture segment, one entry list per kind.
#[derive(Debug, Default, Clone)]
pub struct Fixture {
    pub format: Option<Format>,
    pub stats: SegmentStats,
    pub tables: Vec<(TableKind, Entries)>,
}

impl Fixture {
    pub fn new(doccount: u32) -> Self {
        Self {
            format: None,
            stats: SegmentStats {
                doccount,
                last_docid: doccount,
                ..SegmentStats::default()
            },
            tables: Vec::new(),
        }
    }

    pub fn legacy(mut self) -> Self {
        self.format = Some(Format::Legacy);
        self
    }

    pub fn table(mut self, kind: TableKind, mut entries: Entries) -> Self {
        entries.sort();
        self.tables.push((kind, entries));
        self
    }

    fn record(&self) -> VersionRecord {
        let mut record = VersionRecord::new(self.format.unwrap_or(Format::Current), 8192);
        record.revision = 1;
        record.stats = self.stats.clone();
        record
    }

    /// Writes the fixture as a segment directory and opens it.
    pub fn write_dir(&self, dir: &Path) -> Result<Segment> {
        fs::create_dir_all(dir)?;
        let mut record = self.record();
        for (kind, entries) in &self.tables {
            let path = dir.join(table_file_name(*kind, record.revision));
            let mut file = TableFile::create(&path, TableSettings::new(8192))?;
            for (k, v) in entries {
                file.writer().add(k, v)?;
            }
            record.set_root(*kind, file.commit(false)?);
        }
        fs::write(dir.join(VERSION_FILE), record.serialise())?;
        Ok(Segment::open_dir(dir)?)
    }

    /// Writes the fixture as a single-file segment and opens it.
    pub fn write_file(&self, path: &Path) -> Result<Segment> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut record = self.record();
        let mut pos = VERSION_MAX_SIZE;
        for (kind, entries) in &self.tables {
            let mut writer = TableWriter::new(BufferedFile::new(file.try_clone()?, pos)?, TableSettings::new(8192));
            for (k, v) in entries {
                writer.add(k, v)?;
            }
            let (root, out) = writer.finish()?;
            pos = out.position();
            record.set_root(*kind, root);
        }
        write_embedded(&mut file, 0, &record, SyncMode::None)?;
        Ok(Segment::open_file(path)?)
    }
}

pub fn read_all(table: &TableReader) -> Result<Entries> {
    let mut out = Vec::new();
    let mut cursor = table.cursor()?;
    while cursor.next()? {
        out.push((cursor.key().to_vec(), cursor.read_tag()?.into_owned()));
    }
    Ok(out)
}

/// All entries of table `kind` in `segment`, empty when it has none.
pub fn table_entries(segment: &Segment, kind: TableKind) -> Result<Entries> {
    match segment.table(kind)? {
        Some(table) => read_all(&table),
        None => Ok(Vec::new()),
    }
}

pub fn options() -> CompactOptions {
    CompactOptions::new(8192, CompactionLevel::Standard, CompactFlags::default())
}

pub fn dir_dest(path: &Path) -> Destination {
    Destination::Dir(path.to_path_buf())
}

/// Hooks recording every status call.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    pub statuses: Vec<(String, String)>,
}

impl CompactHooks for RecordingHooks {
    fn set_status(&mut self, table: &str, status: &str) {
        self.statuses.push((table.to_string(), status.to_string()));
    }
}

impl RecordingHooks {
    /// The last non-empty status reported for `table`.
    pub fn last(&self, table: &str) -> Option<&str> {
        self.statuses
            .iter()
            .rev()
            .find(|(t, s)| t == table && !s.is_empty())
            .map(|(_, s)| s.as_str())
    }
}

// -------------------- Postlist entries --------------------

fn postings(list: &[(DocId, TermCount)]) -> Vec<Posting> {
    list.iter().map(|&(did, wdf)| Posting { did, wdf }).collect()
}

/// A term's whole posting list, stored in `chunks` (current layout).
pub fn term_chunks(term: &[u8], chunks: &[&[(DocId, TermCount)]]) -> Entries {
    let all: Vec<(DocId, TermCount)> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
    let tf = all.len() as u32;
    let cf: TermCount = all.iter().map(|p| p.1).sum();
    let first = all[0];
    let last = all[all.len() - 1].0;

    let mut tag = Vec::new();
    encode_initial_header(
        &mut tag,
        &InitialHeader {
            tf,
            cf,
            first: first.0,
            last,
            first_wdf: first.1,
        },
    );
    if tf > 2 {
        encode_posting_body(&mut tag, first.0, &postings(&chunks[0][1..]));
    }
    let mut out = vec![(posting_key(term), tag)];
    for chunk in &chunks[1..] {
        let (cfirst, cwdf) = chunk[0];
        let clast = chunk[chunk.len() - 1].0;
        let mut tag = Vec::new();
        encode_continuation_header(&mut tag, cfirst, clast, (cf != 0).then_some(cwdf));
        let mut body = Vec::new();
        encode_posting_body(&mut body, cfirst, &postings(&chunk[1..]));
        if cf != 0 {
            tag.extend_from_slice(&body);
        } else {
            tag.extend_from_slice(&codec::chunk::strip_wdfs(&body).unwrap());
        }
        out.push((posting_continuation_key(term, clast), tag));
    }
    out
}

/// A term's posting list in a single chunk.
pub fn term(term: &[u8], list: &[(DocId, TermCount)]) -> Entries {
    term_chunks(term, &[list])
}

pub fn doclens(first: DocId, lens: &[Option<u32>]) -> (Vec<u8>, Vec<u8>) {
    let max = lens.iter().flatten().copied().max().unwrap_or(0);
    let width = DoclenWidth::for_max(u64::from(max)).unwrap();
    (doclen_chunk_key(first), pack_doclen_chunk(width, lens))
}

pub fn metadata(name: &[u8], value: &[u8]) -> (Vec<u8>, Vec<u8>) {
    (codec::keys::user_metadata_key(name), value.to_vec())
}

pub fn value_stats_tag(freq: u32, lower: &[u8], upper: &[u8]) -> Vec<u8> {
    let mut tag = Vec::new();
    pack_uint(&mut tag, freq);
    pack_string(&mut tag, lower);
    if upper != lower {
        tag.extend_from_slice(upper);
    }
    tag
}

/// Key of a docdata or termlist entry.
pub fn did_key(did: DocId) -> Vec<u8> {
    let mut key = Vec::new();
    pack_uint_preserving_sort(&mut key, did);
    key
}

pub fn position_key(term: &[u8], did: DocId) -> Vec<u8> {
    let mut key = Vec::new();
    pack_string_preserving_sort(&mut key, term);
    pack_uint_preserving_sort(&mut key, did);
    key
}

// -------------------- Legacy entries --------------------

/// Legacy chunk body: last-chunk flag, span, first value, (gap, value) pairs.
pub fn legacy_body(is_last: bool, list: &[(DocId, u64)]) -> Vec<u8> {
    let first = list[0].0;
    let mut out = vec![u8::from(is_last)];
    pack_uint(&mut out, list[list.len() - 1].0 - first);
    pack_uint(&mut out, list[0].1);
    let mut prev = first;
    for &(did, v) in &list[1..] {
        pack_uint(&mut out, did - prev - 1);
        pack_uint(&mut out, v);
        prev = did;
    }
    out
}

/// A legacy term stored in `chunks`; continuations are keyed by first docid.
pub fn legacy_term_chunks(term: &[u8], chunks: &[&[(DocId, TermCount)]]) -> Entries {
    let widen = |c: &[(DocId, TermCount)]| -> Vec<(DocId, u64)> {
        c.iter().map(|&(d, w)| (d, u64::from(w))).collect()
    };
    let tf = chunks.iter().map(|c| c.len() as u32).sum::<u32>();
    let cf = chunks.iter().flat_map(|c| c.iter()).map(|p| p.1).sum::<u32>();
    let n = chunks.len();

    let mut tag = Vec::new();
    pack_uint(&mut tag, tf);
    pack_uint(&mut tag, cf);
    pack_uint(&mut tag, chunks[0][0].0 - 1);
    tag.extend_from_slice(&legacy_body(n == 1, &widen(chunks[0])));
    let mut out = vec![(posting_key(term), tag)];
    for (i, chunk) in chunks.iter().enumerate().skip(1) {
        out.push((
            legacy::posting_continuation_key(term, chunk[0].0),
            legacy_body(i == n - 1, &widen(chunk)),
        ));
    }
    out
}

/// A legacy doclen chunk starting at `first`.
pub fn legacy_doclens(first: DocId, list: &[(DocId, u64)]) -> (Vec<u8>, Vec<u8>) {
    (doclen_chunk_key(first), legacy_body(true, list))
}

// -------------------- Decoding output --------------------

/// Decodes `term`'s postings from a current-layout postlist: (tf, cf,
/// postings, number of chunks).
pub fn decode_term(entries: &Entries, term: &[u8]) -> Result<(u32, u32, Vec<Posting>, usize)> {
    let initial = posting_key(term);
    let (_, tag) = entries
        .iter()
        .find(|(k, _)| *k == initial)
        .ok_or_else(|| anyhow::anyhow!("no initial chunk for {:?}", term))?;
    let mut p = tag.as_slice();
    let h = decode_initial_header(&mut p)?;
    let mut out = if h.tf <= 2 {
        let mut v = vec![Posting {
            did: h.first,
            wdf: h.first_wdf,
        }];
        if h.tf == 2 {
            v.push(Posting {
                did: h.last,
                wdf: h.cf - h.first_wdf,
            });
        }
        v
    } else {
        decode_posting_body(h.first, h.first_wdf, p)?
    };

    let mut chunks = 1;
    for (key, tag) in entries {
        if key.len() <= initial.len() || !key.starts_with(&initial) {
            continue;
        }
        let (name, _, suffix) = parse_posting_key(key)?;
        if name != term {
            continue;
        }
        let chunk_last = suffix.ok_or_else(|| anyhow::anyhow!("bad continuation key"))?;
        let mut p = tag.as_slice();
        let (first, wdf) = decode_continuation_header(&mut p, chunk_last, h.cf != 0)?;
        let body = if h.cf != 0 { p.to_vec() } else { add_zero_wdfs(p)? };
        out.extend(decode_posting_body(first, wdf, &body)?);
        chunks += 1;
    }
    Ok((h.tf, h.cf, out, chunks))
}

pub fn pairs(list: &[Posting]) -> Vec<(DocId, TermCount)> {
    list.iter().map(|p| (p.did, p.wdf)).collect()
}

/// Writes each fixture as a directory segment under `root` and compacts
/// them into `root/out`.
pub fn compact_fixtures(
    root: &Path,
    fixtures: &[Fixture],
    offsets: &[DocId],
    last_docid: DocId,
    hooks: &mut dyn CompactHooks,
) -> crate::Result<(CompactReport, Segment)> {
    let sources = fixtures
        .iter()
        .enumerate()
        .map(|(i, f)| f.write_dir(&root.join(format!("src{}", i))))
        .collect::<Result<Vec<_>>>()
        .map_err(|e| CompactError::InvalidArgument(format!("fixture: {}", e)))?;
    let out = root.join("out");
    let report = compact(&sources, offsets, dir_dest(&out), &options(), last_docid, hooks)?;
    Ok((report, Segment::open_dir(&out)?))
}
