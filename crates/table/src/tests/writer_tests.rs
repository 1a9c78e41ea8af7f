use super::write_table;
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

// -------------------- Ordering --------------------

#[test]
fn rejects_out_of_order_keys() -> Result<()> {
    let dir = tempdir()?;
    let mut tf = TableFile::create(&dir.path().join("t.tbl"), TableSettings::new(8192))?;
    tf.writer().add(b"b", b"1")?;
    assert!(matches!(tf.writer().add(b"a", b"2"), Err(TableError::OutOfOrder { .. })));
    assert!(matches!(tf.writer().add(b"b", b"2"), Err(TableError::OutOfOrder { .. })));
    Ok(())
}

#[test]
fn rejects_oversized_keys() -> Result<()> {
    let dir = tempdir()?;
    let mut tf = TableFile::create(&dir.path().join("t.tbl"), TableSettings::new(8192))?;
    let key = vec![b'k'; MAX_KEY_BYTES + 1];
    assert!(matches!(tf.writer().add(&key, b""), Err(TableError::KeyTooLarge(_))));
    Ok(())
}

// -------------------- Commit --------------------

#[test]
fn commit_renames_tmp_into_place() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.tbl");
    let root = write_table(&path, TableSettings::new(8192), &[(b"a", b"1"), (b"b", b"2")])?;
    assert!(path.exists());
    assert!(!dir.path().join("t.tbl.tmp").exists());
    assert_eq!(root.num_entries, 2);
    assert!(!root.root_is_fake);
    assert_eq!(root.offset, 0);
    assert_eq!(std::fs::metadata(&path)?.len(), root.size_bytes());
    Ok(())
}

#[test]
fn dropped_table_file_removes_tmp() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.tbl");
    {
        let mut tf = TableFile::create(&path, TableSettings::new(8192))?;
        tf.writer().add(b"a", b"1")?;
    }
    assert!(!path.exists());
    assert!(!dir.path().join("t.tbl.tmp").exists());
    Ok(())
}

#[test]
fn empty_table_has_fake_root() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.tbl");
    let root = write_table(&path, TableSettings::new(4096), &[])?;
    assert!(root.root_is_fake);
    assert_eq!(root.num_entries, 0);
    assert_eq!(root.size_bytes(), 0);
    assert_eq!(std::fs::metadata(&path)?.len(), 0);
    Ok(())
}

// -------------------- Blocks & compression --------------------

#[test]
fn fullest_level_indexes_every_entry() -> Result<()> {
    let dir = tempdir()?;
    let keys: Vec<Vec<u8>> = (0..50u32).map(|i| format!("key{:03}", i).into_bytes()).collect();
    let entries: Vec<(&[u8], &[u8])> = keys.iter().map(|k| (k.as_slice(), &b"v"[..])).collect();

    let mut settings = TableSettings::new(8192);
    let path = dir.path().join("std.tbl");
    let root = write_table(&path, settings, &entries)?;
    assert_eq!(TableReader::open(&path, root)?.block_count(), 1);

    settings.full_blocks = true;
    settings.max_item_size = Some(1);
    let path = dir.path().join("fullest.tbl");
    let root = write_table(&path, settings, &entries)?;
    assert_eq!(TableReader::open(&path, root)?.block_count(), 50);
    Ok(())
}

#[test]
fn small_blocks_split_the_index() -> Result<()> {
    let dir = tempdir()?;
    let tag = vec![7u8; 300];
    let keys: Vec<Vec<u8>> = (0..40u32).map(|i| format!("k{:02}", i).into_bytes()).collect();
    let entries: Vec<(&[u8], &[u8])> = keys.iter().map(|k| (k.as_slice(), tag.as_slice())).collect();
    let mut settings = TableSettings::new(2048);
    settings.compress = false;
    let path = dir.path().join("t.tbl");
    let root = write_table(&path, settings, &entries)?;
    let reader = TableReader::open(&path, root)?;
    assert!(reader.block_count() > 4, "got {} blocks", reader.block_count());
    for k in &keys {
        assert_eq!(reader.get(k)?, Some(tag.clone()));
    }
    Ok(())
}

#[test]
fn compressible_tags_are_stored_compressed() -> Result<()> {
    let dir = tempdir()?;
    let tag = vec![b'z'; 4000];
    let path = dir.path().join("t.tbl");
    let root = write_table(&path, TableSettings::new(8192), &[(b"big", &tag), (b"small", b"tiny")])?;
    assert!(root.size_bytes() < 1000);

    let mut cur = TableReader::open(&path, root)?.cursor()?;
    assert!(cur.next()?);
    assert!(cur.raw_tag().1);
    assert_eq!(cur.read_tag()?.as_ref(), tag.as_slice());
    assert!(cur.next()?);
    assert!(!cur.raw_tag().1);
    assert_eq!(cur.read_tag()?.as_ref(), b"tiny");
    Ok(())
}

#[test]
fn compression_can_be_disabled() -> Result<()> {
    let dir = tempdir()?;
    let tag = vec![b'z'; 4000];
    let mut settings = TableSettings::new(65536);
    settings.compress = false;
    let path = dir.path().join("t.tbl");
    let root = write_table(&path, settings, &[(b"big", &tag)])?;
    let mut cur = TableReader::open(&path, root)?.cursor()?;
    assert!(cur.next()?);
    assert_eq!(cur.raw_tag(), (tag.as_slice(), false));
    Ok(())
}
