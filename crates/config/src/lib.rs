//! # Config - compaction options
//!
//! Plain data describing how a compaction should lay out and persist its
//! output. Nothing here touches the filesystem.
//!
//! ## Environment overrides
//!
//! [`CompactOptions::from_env`] starts from the defaults and applies any of
//! the following variables that are set:
//!
//! ```text
//! SEGCOMPACT_BLOCK_SIZE   output block size in bytes       (default: 8192)
//! SEGCOMPACT_LEVEL        standard | full | fullest        (default: standard)
//! SEGCOMPACT_SINGLE_FILE  write a single-file segment      (default: false)
//! SEGCOMPACT_DANGEROUS    overwrite the version in place   (default: false)
//! SEGCOMPACT_NO_SYNC      skip fsync entirely              (default: false)
//! SEGCOMPACT_FULL_SYNC    use full fsync                   (default: false)
//! SEGCOMPACT_MULTIPASS    bound merge fan-in               (default: false)
//! SEGCOMPACT_TMP_DIR      directory for temporary tables   (default: destination)
//! ```
//!
//! Unparseable values fall back to the default, matching how the rest of
//! the workspace treats environment configuration.

use std::path::PathBuf;

/// Smallest block size an output table may use.
pub const MIN_BLOCK_SIZE: usize = 2048;
/// Largest block size an output table may use.
pub const MAX_BLOCK_SIZE: usize = 65536;
/// Block size used when the requested one is out of range.
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// How hard to pack the output tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionLevel {
    /// Leave slack in each block.
    #[default]
    Standard,
    /// Fill blocks completely.
    Full,
    /// Fill blocks and use the smallest item size, one entry per index block.
    /// A tunable trading index size for seek granularity, not a correctness
    /// setting.
    Fullest,
}

impl CompactionLevel {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(CompactionLevel::Standard),
            "full" => Some(CompactionLevel::Full),
            "fullest" => Some(CompactionLevel::Fullest),
            _ => None,
        }
    }
}

/// How the commit step makes data durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// `sync_all`: data and metadata.
    Full,
    /// `sync_data`: data only.
    Normal,
    /// No sync at all.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactFlags {
    pub single_file: bool,
    /// Write the version record over the live one instead of renaming a
    /// temporary file into place.
    pub dangerous: bool,
    pub no_sync: bool,
    pub full_sync: bool,
    pub multipass: bool,
}

impl CompactFlags {
    /// `no_sync` wins over `full_sync`.
    #[must_use]
    pub fn sync_mode(&self) -> SyncMode {
        if self.no_sync {
            SyncMode::None
        } else if self.full_sync {
            SyncMode::Full
        } else {
            SyncMode::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactOptions {
    block_size: usize,
    pub level: CompactionLevel,
    pub flags: CompactFlags,
    /// Where multipass temporaries go. `None` means the destination
    /// directory (or the single file's parent).
    pub tmp_dir: Option<PathBuf>,
}

impl Default for CompactOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            level: CompactionLevel::default(),
            flags: CompactFlags::default(),
            tmp_dir: None,
        }
    }
}

/// Replaces a block size that is not a power of two within
/// [`MIN_BLOCK_SIZE`]..=[`MAX_BLOCK_SIZE`] with [`DEFAULT_BLOCK_SIZE`].
#[must_use]
pub fn normalize_block_size(block_size: usize) -> usize {
    if (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) && block_size.is_power_of_two() {
        block_size
    } else {
        DEFAULT_BLOCK_SIZE
    }
}

impl CompactOptions {
    pub fn new(block_size: usize, level: CompactionLevel, flags: CompactFlags) -> Self {
        Self {
            block_size: normalize_block_size(block_size),
            level,
            flags,
            tmp_dir: None,
        }
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.block_size = normalize_block_size(block_size);
    }

    /// Whether output blocks should be filled completely.
    #[must_use]
    pub fn full_blocks(&self) -> bool {
        self.level != CompactionLevel::Standard
    }

    /// Largest number of entries that may share one index block, if capped.
    #[must_use]
    pub fn max_item_size(&self) -> Option<usize> {
        match self.level {
            CompactionLevel::Fullest => Some(1),
            _ => None,
        }
    }

    /// Defaults overlaid with `SEGCOMPACT_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value if set.
    #[must_use]
    pub fn overlay<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str, default: bool| -> bool {
            lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        };

        if let Some(bs) = lookup("SEGCOMPACT_BLOCK_SIZE").and_then(|v| v.trim().parse().ok()) {
            self.set_block_size(bs);
        }
        if let Some(level) = lookup("SEGCOMPACT_LEVEL").and_then(|v| CompactionLevel::parse(&v)) {
            self.level = level;
        }
        self.flags.single_file = flag("SEGCOMPACT_SINGLE_FILE", self.flags.single_file);
        self.flags.dangerous = flag("SEGCOMPACT_DANGEROUS", self.flags.dangerous);
        self.flags.no_sync = flag("SEGCOMPACT_NO_SYNC", self.flags.no_sync);
        self.flags.full_sync = flag("SEGCOMPACT_FULL_SYNC", self.flags.full_sync);
        self.flags.multipass = flag("SEGCOMPACT_MULTIPASS", self.flags.multipass);
        if let Some(dir) = lookup("SEGCOMPACT_TMP_DIR").filter(|v| !v.is_empty()) {
            self.tmp_dir = Some(PathBuf::from(dir));
        }
        self
    }
}

#[cfg(test)]
mod tests;
