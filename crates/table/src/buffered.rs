//! Sequential buffered reader/writer over a single file handle.
//!
//! Unlike `BufReader`/`BufWriter`, one [`BufferedFile`] can switch between
//! writing and reading the same handle: a merge pass writes a temporary
//! table, rewinds, and the next pass reads it back through the same buffer.
//! The logical position is tracked here so the OS file offset only has to be
//! corrected when the direction changes or on an explicit seek.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Size of the in-memory buffer in both directions.
pub const BUFFER_SIZE: usize = 4096;

#[derive(Debug)]
pub struct BufferedFile {
    file: File,
    /// Write mode: bytes not yet written, destined for `pos - buf.len()`.
    /// Read mode: read-ahead bytes, `buf[read_pos..]` still unconsumed.
    buf: Vec<u8>,
    read_pos: usize,
    reading: bool,
    /// Logical position of the next byte written or read.
    pos: u64,
}

impl BufferedFile {
    /// Wraps `file`, positioned for writing at `start`.
    pub fn new(mut file: File, start: u64) -> io::Result<Self> {
        file.seek(SeekFrom::Start(start))?;
        Ok(Self {
            file,
            buf: Vec::with_capacity(BUFFER_SIZE),
            read_pos: 0,
            reading: false,
            pos: start,
        })
    }

    /// Wraps `file`, positioned for reading at `start`.
    pub fn for_reading(file: File, start: u64) -> io::Result<Self> {
        let mut bf = Self::new(file, start)?;
        bf.reading = true;
        Ok(bf)
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Flushes pending writes and moves the logical position to `pos`,
    /// ready for reading.
    pub fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.flush_buf()?;
        self.file.seek(SeekFrom::Start(pos))?;
        self.buf.clear();
        self.read_pos = 0;
        self.reading = true;
        self.pos = pos;
        Ok(())
    }

    /// Shorthand for `seek_to(0)`.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.seek_to(0)
    }

    /// Flushes and `fsync`s data and metadata.
    pub fn sync_all(&mut self) -> io::Result<()> {
        self.flush()?;
        self.file.sync_all()
    }

    /// Flushes and `fdatasync`s.
    pub fn sync_data(&mut self) -> io::Result<()> {
        self.flush()?;
        self.file.sync_data()
    }

    /// Flushes and gives back the underlying handle.
    pub fn into_file(mut self) -> io::Result<File> {
        self.flush_buf()?;
        // Drop would flush again; take the handle out first.
        let file = self.file.try_clone()?;
        self.buf.clear();
        Ok(file)
    }

    fn flush_buf(&mut self) -> io::Result<()> {
        if !self.reading && !self.buf.is_empty() {
            self.file.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    fn start_writing(&mut self) -> io::Result<()> {
        if self.reading {
            self.file.seek(SeekFrom::Start(self.pos))?;
            self.buf.clear();
            self.read_pos = 0;
            self.reading = false;
        }
        Ok(())
    }

    fn start_reading(&mut self) -> io::Result<()> {
        if !self.reading {
            self.flush_buf()?;
            self.read_pos = 0;
            self.reading = true;
        }
        Ok(())
    }
}

impl Write for BufferedFile {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.start_writing()?;
        if self.buf.len() + data.len() > BUFFER_SIZE {
            self.flush_buf()?;
            if data.len() >= BUFFER_SIZE {
                self.file.write_all(data)?;
                self.pos += data.len() as u64;
                return Ok(data.len());
            }
        }
        self.buf.extend_from_slice(data);
        self.pos += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buf()?;
        self.file.flush()
    }
}

impl Read for BufferedFile {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.start_reading()?;
        if self.read_pos == self.buf.len() {
            self.buf.resize(BUFFER_SIZE, 0);
            let n = self.file.read(&mut self.buf)?;
            self.buf.truncate(n);
            self.read_pos = 0;
            if n == 0 {
                return Ok(0);
            }
        }
        let n = out.len().min(self.buf.len() - self.read_pos);
        out[..n].copy_from_slice(&self.buf[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Drop for BufferedFile {
    fn drop(&mut self) {
        let _ = self.flush_buf();
    }
}
