use super::open_rw;
use crate::*;
use anyhow::Result;
use std::io::{Read, Write};
use tempfile::tempdir;

// -------------------- Write then read back --------------------

#[test]
fn write_rewind_read() -> Result<()> {
    let dir = tempdir()?;
    let mut bf = BufferedFile::new(open_rw(&dir.path().join("buf"))?, 0)?;
    bf.write_all(b"hello ")?;
    bf.write_all(b"world")?;
    assert_eq!(bf.position(), 11);

    bf.rewind()?;
    let mut out = String::new();
    bf.read_to_string(&mut out)?;
    assert_eq!(out, "hello world");
    assert_eq!(bf.position(), 11);
    Ok(())
}

#[test]
fn large_writes_span_buffers() -> Result<()> {
    let dir = tempdir()?;
    let data: Vec<u8> = (0..(BUFFER_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
    let mut bf = BufferedFile::new(open_rw(&dir.path().join("buf"))?, 0)?;
    for chunk in data.chunks(1000) {
        bf.write_all(chunk)?;
    }
    bf.write_all(&data)?;

    bf.rewind()?;
    let mut back = vec![0u8; data.len() * 2];
    bf.read_exact(&mut back)?;
    assert_eq!(&back[..data.len()], &data[..]);
    assert_eq!(&back[data.len()..], &data[..]);
    Ok(())
}

#[test]
fn write_at_base_offset_and_seek() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("buf");
    std::fs::write(&path, b"HEADER")?;

    let mut bf = BufferedFile::new(open_rw(&path)?, 6)?;
    bf.write_all(b"body")?;
    bf.seek_to(2)?;
    let mut four = [0u8; 4];
    bf.read_exact(&mut four)?;
    assert_eq!(&four, b"ADER");

    // switching back to writing continues at the logical position
    bf.write_all(b"XY")?;
    bf.flush()?;
    drop(bf);
    assert_eq!(std::fs::read(&path)?, b"HEADERXYdy");
    Ok(())
}

#[test]
fn into_file_flushes() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("buf");
    let mut bf = BufferedFile::new(open_rw(&path)?, 0)?;
    bf.write_all(b"pending")?;
    let _file = bf.into_file()?;
    assert_eq!(std::fs::read(&path)?, b"pending");
    Ok(())
}
