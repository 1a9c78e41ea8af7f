use super::helpers::*;
use crate::*;
use anyhow::Result;
use codec::keys::{legacy, posting_key, user_metadata_key, value_stats_key, DOCLEN_CHUNK_PREFIX};
use codec::{pack_uint, unpack_doclen_chunk, DoclenWidth, KeyType};
use std::path::Path;
use table::{TableFile, TableReader, TableSettings};
use tempfile::tempdir;

fn postlist(dir: &Path, mut entries: Entries) -> Result<TableReader> {
    entries.sort();
    let path = dir.join("postlist.tbl");
    let mut file = TableFile::create(&path, TableSettings::new(8192))?;
    for (k, v) in &entries {
        file.writer().add(k, v)?;
    }
    let root = file.commit(false)?;
    Ok(TableReader::open(&path, root)?)
}

/// Every presented entry: key, key type, chunk info, tag.
fn present(table: &TableReader, format: Format, offset: u32) -> crate::Result<Vec<(Vec<u8>, KeyType, ChunkInfo, Vec<u8>)>> {
    let mut cursor = open_postlist_cursor(table, format, offset)?;
    let mut out = Vec::new();
    while cursor.next()? {
        out.push((
            cursor.key().to_vec(),
            cursor.key_type(),
            *cursor.chunk(),
            cursor.tag().to_vec(),
        ));
    }
    Ok(out)
}

// -------------------- Current layout --------------------

#[test]
fn single_chunk_term_is_presented_with_its_body() -> Result<()> {
    let dir = tempdir()?;
    let table = postlist(dir.path(), term(b"fig", &[(2, 1), (5, 3), (9, 2)]))?;
    let entries = present(&table, Format::Current, 0)?;

    assert_eq!(entries.len(), 1);
    let (key, kt, chunk, tag) = &entries[0];
    assert_eq!(key, &posting_key(b"fig"));
    assert_eq!(*kt, KeyType::PostingChunk);
    assert_eq!(
        *chunk,
        ChunkInfo {
            firstdid: 2,
            chunk_lastdid: 9,
            tf: 3,
            cf: 6,
            first_wdf: 1,
        }
    );
    // (gap, wdf) pairs for 5 and 9
    assert_eq!(tag, &vec![2, 3, 3, 2]);
    Ok(())
}

#[test]
fn two_posting_term_is_split_into_two_chunks() -> Result<()> {
    let dir = tempdir()?;
    let table = postlist(dir.path(), term(b"pear", &[(3, 2), (7, 5)]))?;
    let entries = present(&table, Format::Current, 10)?;

    let chunks: Vec<ChunkInfo> = entries.iter().map(|e| e.2).collect();
    assert_eq!(
        chunks,
        vec![
            ChunkInfo {
                firstdid: 13,
                chunk_lastdid: 13,
                tf: 2,
                cf: 7,
                first_wdf: 2,
            },
            ChunkInfo {
                firstdid: 17,
                chunk_lastdid: 17,
                tf: 0,
                cf: 0,
                first_wdf: 5,
            },
        ]
    );
    assert!(entries.iter().all(|e| e.0 == posting_key(b"pear") && e.3.is_empty()));
    Ok(())
}

#[test]
fn continuation_chunks_share_the_bare_term_key() -> Result<()> {
    let dir = tempdir()?;
    let table = postlist(dir.path(), term_chunks(b"kiwi", &[&[(1, 1), (2, 1)], &[(6, 2), (8, 1)]]))?;
    let entries = present(&table, Format::Current, 0)?;

    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.0 == posting_key(b"kiwi")));
    assert_eq!((entries[1].2.firstdid, entries[1].2.chunk_lastdid), (6, 8));
    assert_eq!(entries[1].2.tf, 0);
    assert_eq!(entries[1].2.first_wdf, 2);
    assert_eq!(entries[1].3, vec![1, 1]);
    Ok(())
}

#[test]
fn boolean_continuation_gets_zero_wdfs() -> Result<()> {
    let dir = tempdir()?;
    let table = postlist(dir.path(), term_chunks(b"flag", &[&[(1, 0), (2, 0)], &[(4, 0), (9, 0)]]))?;
    let entries = present(&table, Format::Current, 0)?;
    assert_eq!(entries[1].3, vec![4, 0]);
    Ok(())
}

#[test]
fn doclen_chunk_is_presented_under_the_bare_prefix() -> Result<()> {
    let dir = tempdir()?;
    let table = postlist(dir.path(), vec![doclens(4, &[Some(3), None, Some(5)])])?;
    let entries = present(&table, Format::Current, 100)?;

    assert_eq!(entries[0].0, DOCLEN_CHUNK_PREFIX.to_vec());
    assert_eq!(entries[0].1, KeyType::DoclenChunk);
    assert_eq!((entries[0].2.firstdid, entries[0].2.chunk_lastdid), (104, 106));
    Ok(())
}

#[test]
fn unknown_key_prefix_is_corrupt() -> Result<()> {
    let dir = tempdir()?;
    let table = postlist(dir.path(), vec![(vec![0x00, 0x50, 0x01], b"x".to_vec())])?;
    assert!(matches!(
        present(&table, Format::Current, 0),
        Err(CompactError::CorruptInput(_))
    ));
    Ok(())
}

#[test]
fn continuation_without_initial_chunk_is_corrupt() -> Result<()> {
    let dir = tempdir()?;
    let mut entries = term_chunks(b"lime", &[&[(1, 1), (2, 1)], &[(5, 1), (6, 1)]]);
    entries.remove(0);
    let table = postlist(dir.path(), entries)?;
    assert!(matches!(
        present(&table, Format::Current, 0),
        Err(CompactError::CorruptInput(_))
    ));
    Ok(())
}

#[test]
fn offset_past_docid_range_is_invalid() -> Result<()> {
    let dir = tempdir()?;
    let table = postlist(dir.path(), term(b"big", &[(5, 1)]))?;
    assert!(matches!(
        present(&table, Format::Current, u32::MAX - 2),
        Err(CompactError::InvalidArgument(_))
    ));
    Ok(())
}

// -------------------- Legacy layout --------------------

fn legacy_doclen_width(len: u64) -> crate::Result<(DoclenWidth, usize)> {
    let dir = tempdir()?;
    let table = postlist(dir.path(), vec![legacy_doclens(1, &[(1, len)])])
        .map_err(|e| CompactError::InvalidArgument(e.to_string()))?;
    let entries = present(&table, Format::Legacy, 0)?;
    let (width, values) = unpack_doclen_chunk(&entries[0].3)?;
    assert_eq!(values, vec![Some(len as u32)]);
    Ok((width, entries[0].3.len() - 1))
}

#[test]
fn legacy_doclens_use_the_narrowest_width() -> Result<()> {
    assert_eq!(legacy_doclen_width(250)?, (DoclenWidth::W8, 1));
    assert_eq!(legacy_doclen_width(1_000)?, (DoclenWidth::W16, 2));
    assert_eq!(legacy_doclen_width(1_000_000)?, (DoclenWidth::W24, 3));
    assert_eq!(legacy_doclen_width(17_000_000)?, (DoclenWidth::W32, 4));
    Ok(())
}

#[test]
fn legacy_doclen_too_large_is_unsupported() {
    assert!(matches!(
        legacy_doclen_width(0xffff_ffff),
        Err(CompactError::Unsupported(_))
    ));
}

#[test]
fn legacy_doclen_gaps_become_unused_slots() -> Result<()> {
    let dir = tempdir()?;
    let table = postlist(dir.path(), vec![legacy_doclens(1, &[(1, 5), (3, 7)])])?;
    let entries = present(&table, Format::Legacy, 0)?;
    assert_eq!(entries[0].3, vec![8, 5, 0xff, 7]);
    assert_eq!((entries[0].2.firstdid, entries[0].2.chunk_lastdid), (1, 3));
    Ok(())
}

#[test]
fn sparse_legacy_doclen_chunk_spans_its_whole_range() -> Result<()> {
    let dir = tempdir()?;
    let table = postlist(dir.path(), vec![legacy_doclens(1, &[(1, 9), (70_000, 300)])])?;
    let entries = present(&table, Format::Legacy, 0)?;
    let tag = &entries[0].3;

    assert_eq!(tag.len(), 1 + 70_000 * 2);
    assert_eq!(&tag[..3], &[16, 0x00, 0x09]);
    assert_eq!(&tag[tag.len() - 2..], &[0x01, 0x2c]);
    assert!(tag[3..tag.len() - 2].iter().all(|&b| b == 0xff));
    assert_eq!((entries[0].2.firstdid, entries[0].2.chunk_lastdid), (1, 70_000));
    Ok(())
}

#[test]
fn legacy_postings_are_rekeyed_by_chunk() -> Result<()> {
    let dir = tempdir()?;
    let table = postlist(
        dir.path(),
        legacy_term_chunks(b"dog", &[&[(1, 1), (2, 1)], &[(5, 1), (7, 1)]]),
    )?;
    let entries = present(&table, Format::Legacy, 0)?;

    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.0 == posting_key(b"dog")));
    assert_eq!(
        entries[0].2,
        ChunkInfo {
            firstdid: 1,
            chunk_lastdid: 2,
            tf: 4,
            cf: 4,
            first_wdf: 1,
        }
    );
    assert_eq!(entries[0].3, vec![0, 1]);
    assert_eq!((entries[1].2.firstdid, entries[1].2.chunk_lastdid), (5, 7));
    assert_eq!(entries[1].3, vec![1, 1]);
    Ok(())
}

#[test]
fn legacy_metadata_and_value_stats_are_rekeyed_in_order() -> Result<()> {
    let dir = tempdir()?;
    let stats = value_stats_tag(1, b"a", b"b");
    let mut entries = vec![
        (legacy::user_metadata_key(b"name"), b"v".to_vec()),
        (legacy::value_stats_key(256), stats.clone()),
        (legacy::value_stats_key(1), stats.clone()),
    ];
    entries.extend(legacy_term_chunks(b"t", &[&[(1, 1)]]));
    let table = postlist(dir.path(), entries)?;
    let keys: Vec<Vec<u8>> = present(&table, Format::Legacy, 0)?
        .into_iter()
        .map(|e| e.0)
        .collect();

    assert_eq!(
        keys,
        vec![
            user_metadata_key(b"name"),
            value_stats_key(1),
            value_stats_key(256),
            posting_key(b"t"),
        ]
    );
    Ok(())
}

#[test]
fn legacy_tf_disagreeing_with_postings_is_corrupt() -> Result<()> {
    let dir = tempdir()?;
    let mut tag = Vec::new();
    pack_uint(&mut tag, 1u32);
    pack_uint(&mut tag, 2u32);
    pack_uint(&mut tag, 0u32);
    tag.extend_from_slice(&legacy_body(true, &[(1, 1), (3, 1)]));
    let table = postlist(dir.path(), vec![(posting_key(b"odd"), tag)])?;
    assert!(matches!(
        present(&table, Format::Legacy, 0),
        Err(CompactError::CorruptInput(_))
    ));
    Ok(())
}
