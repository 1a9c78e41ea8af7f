use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use std::borrow::Cow;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::buffered::BufferedFile;
use crate::format::{
    read_footer, RootInfo, FLAG_COMPRESSED, FOOTER_BYTES, MAX_KEY_BYTES, MAX_TAG_BYTES,
    TABLE_MAGIC,
};
use crate::{Result, TableError};

/// An opened table: its root, its sparse index and where to find it.
///
/// Holds no file handle between calls; each [`cursor`](TableReader::cursor)
/// opens its own, so several cursors over one table never share a file
/// offset.
#[derive(Debug, Clone)]
pub struct TableReader {
    path: PathBuf,
    root: RootInfo,
    /// First key of each block and its offset relative to the table start.
    index: Vec<(Vec<u8>, u64)>,
    index_offset: u64,
}

impl TableReader {
    /// Opens the table described by `root` inside the file at `path`.
    ///
    /// A fake root yields an empty table without touching the file.
    ///
    /// # Errors
    ///
    /// [`TableError::Corrupt`] if the footer magic or entry count disagree
    /// with `root`, or if the index is malformed; I/O errors otherwise.
    pub fn open<P: AsRef<Path>>(path: P, root: RootInfo) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if root.root_is_fake {
            return Ok(Self {
                path,
                root,
                index: Vec::new(),
                index_offset: 0,
            });
        }

        let mut f = File::open(&path)?;
        let footer_pos = root.offset + root.root;
        let filesize = f.metadata()?.len();
        if footer_pos + FOOTER_BYTES > filesize {
            return Err(TableError::Corrupt(format!(
                "footer at {} lies past end of file ({} bytes)",
                footer_pos, filesize
            )));
        }
        f.seek(SeekFrom::Start(footer_pos))?;
        let (entry_count, index_offset, magic) = read_footer(&mut f)?;
        if magic != TABLE_MAGIC {
            return Err(TableError::Corrupt(format!("bad table magic {:#010x}", magic)));
        }
        if entry_count != root.num_entries {
            return Err(TableError::Corrupt(format!(
                "footer says {} entries, root says {}",
                entry_count, root.num_entries
            )));
        }
        if index_offset > root.root {
            return Err(TableError::Corrupt("index offset past footer".into()));
        }

        let mut input = BufferedFile::for_reading(f, root.offset + index_offset)?;
        let mut index = Vec::new();
        while input.position() < footer_pos {
            let key_len = input.read_u32::<LittleEndian>()? as usize;
            if key_len > MAX_KEY_BYTES {
                return Err(TableError::Corrupt(format!(
                    "index key_len {} exceeds maximum {}",
                    key_len, MAX_KEY_BYTES
                )));
            }
            let mut key = vec![0u8; key_len];
            input.read_exact(&mut key)?;
            let data_offset = input.read_u64::<LittleEndian>()?;
            index.push((key, data_offset));
        }

        Ok(Self {
            path,
            root,
            index,
            index_offset,
        })
    }

    #[must_use]
    pub fn root_info(&self) -> &RootInfo {
        &self.root
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.root.num_entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.num_entries == 0
    }

    /// Bytes the table occupies on disk.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.root.size_bytes()
    }

    /// Number of sparse index entries (blocks).
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Cursor positioned before the first entry.
    pub fn cursor(&self) -> Result<TableCursor> {
        if self.is_empty() {
            return Ok(TableCursor::empty());
        }
        let f = File::open(&self.path)?;
        let start = self.root.offset;
        let input = BufferedFile::for_reading(f, start)?;
        Ok(TableCursor::new(input, start + self.index_offset))
    }

    /// Point lookup: returns the decompressed tag for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let block = match self.index.partition_point(|(k, _)| k.as_slice() <= key) {
            0 => return Ok(None),
            n => n - 1,
        };
        let f = File::open(&self.path)?;
        let start = self.root.offset + self.index[block].1;
        let input = BufferedFile::for_reading(f, start)?;
        let mut cursor = TableCursor::new(input, self.root.offset + self.index_offset);
        while cursor.next()? {
            match cursor.key().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(cursor.read_tag()?.into_owned())),
                std::cmp::Ordering::Greater => break,
            }
        }
        Ok(None)
    }
}

/// Forward-only cursor over a table's entries in key order.
#[derive(Debug)]
pub struct TableCursor {
    input: Option<BufferedFile>,
    data_end: u64,
    key: Vec<u8>,
    tag: Vec<u8>,
    compressed: bool,
}

impl TableCursor {
    fn new(input: BufferedFile, data_end: u64) -> Self {
        Self {
            input: Some(input),
            data_end,
            key: Vec::new(),
            tag: Vec::new(),
            compressed: false,
        }
    }

    fn empty() -> Self {
        Self {
            input: None,
            data_end: 0,
            key: Vec::new(),
            tag: Vec::new(),
            compressed: false,
        }
    }

    /// Advances to the next entry. Returns `false` at the end.
    ///
    /// # Errors
    ///
    /// [`TableError::Corrupt`] on a CRC mismatch or an oversized length
    /// field; I/O errors otherwise.
    pub fn next(&mut self) -> Result<bool> {
        let input = match self.input.as_mut() {
            Some(i) if i.position() < self.data_end => i,
            _ => return Ok(false),
        };
        let offset = input.position();

        let stored_crc = input.read_u32::<LittleEndian>()?;
        let key_len = input.read_u32::<LittleEndian>()? as usize;
        if key_len > MAX_KEY_BYTES {
            return Err(TableError::Corrupt(format!(
                "key_len {} exceeds maximum {} at offset {}",
                key_len, MAX_KEY_BYTES, offset
            )));
        }
        self.key.resize(key_len, 0);
        input.read_exact(&mut self.key)?;
        let flags = input.read_u8()?;
        let tag_len = input.read_u32::<LittleEndian>()? as usize;
        if tag_len > MAX_TAG_BYTES {
            return Err(TableError::Corrupt(format!(
                "tag_len {} exceeds maximum {} at offset {}",
                tag_len, MAX_TAG_BYTES, offset
            )));
        }
        self.tag.resize(tag_len, 0);
        input.read_exact(&mut self.tag)?;

        let mut hasher = Crc32::new();
        hasher.update(&(key_len as u32).to_le_bytes());
        hasher.update(&self.key);
        hasher.update(&[flags]);
        hasher.update(&(tag_len as u32).to_le_bytes());
        hasher.update(&self.tag);
        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            return Err(TableError::Corrupt(format!(
                "CRC32 mismatch at offset {}: expected {:#010x}, got {:#010x}",
                offset, stored_crc, actual_crc
            )));
        }

        self.compressed = flags & FLAG_COMPRESSED != 0;
        Ok(true)
    }

    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The tag as stored, with whether it is compressed.
    #[must_use]
    pub fn raw_tag(&self) -> (&[u8], bool) {
        (&self.tag, self.compressed)
    }

    /// The tag, decompressed if needed.
    pub fn read_tag(&self) -> Result<Cow<'_, [u8]>> {
        if self.compressed {
            let tag = zstd::decode_all(self.tag.as_slice())
                .map_err(|e| TableError::Corrupt(format!("tag decompression failed: {}", e)))?;
            Ok(Cow::Owned(tag))
        } else {
            Ok(Cow::Borrowed(&self.tag))
        }
    }
}
