use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::buffered::BufferedFile;
use crate::format::{write_footer, RootInfo, FLAG_COMPRESSED, MAX_KEY_BYTES};
use crate::{Result, TableError};

/// Tags shorter than this are never worth compressing.
const COMPRESS_MIN_TAG: usize = 64;
/// zstd level used for tag compression.
const COMPRESS_LEVEL: i32 = 3;

/// Layout knobs for an output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSettings {
    pub block_size: usize,
    /// Fill each block completely instead of leaving a quarter free.
    pub full_blocks: bool,
    /// Cap on entries per index block.
    pub max_item_size: Option<usize>,
    pub compress: bool,
}

impl TableSettings {
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            full_blocks: false,
            max_item_size: None,
            compress: true,
        }
    }

    fn block_threshold(&self) -> usize {
        if self.full_blocks {
            self.block_size
        } else {
            self.block_size / 4 * 3
        }
    }
}

/// Appends sorted entries to a table starting at the current position of a
/// [`BufferedFile`].
///
/// # Layout
///
/// ```text
/// [DATA]   repeated: crc32(u32) | key_len(u32) | key | flags(u8) | tag_len(u32) | tag
/// [INDEX]  repeated: key_len(u32) | key | data_offset(u64)   (one per block)
/// [FOOTER] entry_count(u64) | index_offset(u64) | magic(u32 = "SGT1")
/// ```
///
/// All offsets are relative to the table's start. A table with no entries
/// writes nothing and finishes with a fake root.
pub struct TableWriter {
    out: BufferedFile,
    base: u64,
    settings: TableSettings,
    /// Sparse index: first key of each block and its data offset.
    index: Vec<(Vec<u8>, u64)>,
    last_key: Option<Vec<u8>>,
    entries: u64,
    block_bytes: usize,
    block_items: usize,
    record_buf: Vec<u8>,
}

impl TableWriter {
    pub fn new(out: BufferedFile, settings: TableSettings) -> Self {
        let base = out.position();
        Self {
            out,
            base,
            settings,
            index: Vec::new(),
            last_key: None,
            entries: 0,
            block_bytes: 0,
            block_items: 0,
            record_buf: Vec::with_capacity(256),
        }
    }

    /// Adds an entry, compressing the tag if that makes it smaller.
    ///
    /// # Errors
    ///
    /// [`TableError::OutOfOrder`] if `key` is not strictly greater than the
    /// previous key, [`TableError::KeyTooLarge`] for oversized keys, or any
    /// I/O failure.
    pub fn add(&mut self, key: &[u8], tag: &[u8]) -> Result<()> {
        if self.settings.compress && tag.len() >= COMPRESS_MIN_TAG {
            if let Ok(packed) = zstd::encode_all(tag, COMPRESS_LEVEL) {
                if packed.len() < tag.len() {
                    return self.add_raw(key, &packed, true);
                }
            }
        }
        self.add_raw(key, tag, false)
    }

    /// Adds an entry whose tag is stored exactly as given. `compressed`
    /// says whether `tag` is already zstd-compressed.
    pub fn add_raw(&mut self, key: &[u8], tag: &[u8], compressed: bool) -> Result<()> {
        if key.len() > MAX_KEY_BYTES {
            return Err(TableError::KeyTooLarge(key.len()));
        }
        if let Some(last) = &self.last_key {
            if key <= last.as_slice() {
                return Err(TableError::OutOfOrder {
                    previous: last.clone(),
                    key: key.to_vec(),
                });
            }
        }

        self.record_buf.clear();
        self.record_buf.write_u32::<LittleEndian>(key.len() as u32)?;
        self.record_buf.extend_from_slice(key);
        self.record_buf
            .write_u8(if compressed { FLAG_COMPRESSED } else { 0 })?;
        self.record_buf.write_u32::<LittleEndian>(tag.len() as u32)?;
        self.record_buf.extend_from_slice(tag);

        let mut hasher = Crc32::new();
        hasher.update(&self.record_buf);
        let crc = hasher.finalize();

        let block_full = self.block_bytes >= self.settings.block_threshold()
            || self
                .settings
                .max_item_size
                .is_some_and(|max| self.block_items >= max);
        if self.index.is_empty() || block_full {
            self.index.push((key.to_vec(), self.out.position() - self.base));
            self.block_bytes = 0;
            self.block_items = 0;
        }

        self.out.write_u32::<LittleEndian>(crc)?;
        self.out.write_all(&self.record_buf)?;

        self.block_bytes += 4 + self.record_buf.len();
        self.block_items += 1;
        self.entries += 1;
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.entries
    }

    /// Writes the index and footer and hands back the output handle,
    /// positioned just past the table. Does not sync.
    pub fn finish(mut self) -> Result<(RootInfo, BufferedFile)> {
        let block_size = self.settings.block_size as u32;
        if self.entries == 0 {
            self.out.flush()?;
            return Ok((RootInfo::empty(self.base, block_size), self.out));
        }

        let index_offset = self.out.position() - self.base;
        for (key, data_offset) in &self.index {
            self.out.write_u32::<LittleEndian>(key.len() as u32)?;
            self.out.write_all(key)?;
            self.out.write_u64::<LittleEndian>(*data_offset)?;
        }
        let root = self.out.position() - self.base;
        write_footer(&mut self.out, self.entries, index_offset)?;
        self.out.flush()?;

        let info = RootInfo {
            offset: self.base,
            root,
            level: 1,
            num_entries: self.entries,
            block_size,
            sequential: true,
            root_is_fake: false,
            free_list: Vec::new(),
        };
        Ok((info, self.out))
    }
}

/// A table being written as its own file.
///
/// Data goes to `<path>.tmp`; [`commit`](TableFile::commit) syncs it,
/// renames it into place and syncs the parent directory. Dropping an
/// uncommitted `TableFile` removes the temporary file.
pub struct TableFile {
    writer: TableWriter,
    tmp: TmpGuard,
    path: PathBuf,
}

/// Removes a temporary file on drop unless disarmed.
struct TmpGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for TmpGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl TableFile {
    pub fn create(path: &Path, settings: TableSettings) -> Result<Self> {
        let tmp_path = tmp_path_for(path);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let tmp = TmpGuard {
            path: tmp_path,
            armed: true,
        };
        let out = BufferedFile::new(file, 0)?;
        Ok(Self {
            writer: TableWriter::new(out, settings),
            tmp,
            path: path.to_path_buf(),
        })
    }

    pub fn writer(&mut self) -> &mut TableWriter {
        &mut self.writer
    }

    /// Finishes the table and moves it to its final path. `sync` controls
    /// whether the data is fsynced before the rename.
    pub fn commit(self, sync: bool) -> Result<RootInfo> {
        let TableFile {
            writer,
            mut tmp,
            path,
        } = self;
        let (info, mut out) = writer.finish()?;
        if sync {
            out.sync_all()?;
        }
        drop(out);

        fs::rename(&tmp.path, &path)?;
        tmp.armed = false;
        if sync {
            sync_parent_dir(&path);
        }
        Ok(info)
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Fsyncs the directory containing `path` so a rename into it is durable.
/// Best effort: some platforms cannot open directories.
pub fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            if let Err(e) = dir.sync_all() {
                tracing::debug!(dir = %parent.display(), error = %e, "directory fsync failed");
            }
        }
    }
}
