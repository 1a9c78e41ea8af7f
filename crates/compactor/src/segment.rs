//! Handles on existing segments.
//!
//! A segment is either a directory
//!
//! ```text
//! <dir>/VERSION
//! <dir>/postlist.<rev>.tbl
//! <dir>/termlist.<rev>.tbl
//! ...                           one file per present table
//! ```
//!
//! or a single file with the version record at a base offset and every
//! table stored after it. Either way the version record names the format
//! generation and holds a [`RootInfo`] per table kind.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use table::{RootInfo, TableReader};

use crate::error::{corrupt, Result};
use crate::version::{Revision, SegmentStats, VersionRecord};

/// On-disk generation of a segment's tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// The previous layout, read through the legacy cursor.
    Legacy,
    Current,
}

impl Format {
    pub(crate) fn tag(self) -> u16 {
        match self {
            Format::Legacy => 1,
            Format::Current => 2,
        }
    }

    pub(crate) fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(Format::Legacy),
            2 => Some(Format::Current),
            _ => None,
        }
    }
}

/// The tables of a segment, in the order a compaction processes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableKind {
    Postlist,
    Docdata,
    Termlist,
    Position,
    Spelling,
    Synonym,
}

impl TableKind {
    pub const COUNT: usize = 6;

    pub const ALL: [TableKind; TableKind::COUNT] = [
        TableKind::Postlist,
        TableKind::Docdata,
        TableKind::Termlist,
        TableKind::Position,
        TableKind::Spelling,
        TableKind::Synonym,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            TableKind::Postlist => "postlist",
            TableKind::Docdata => "docdata",
            TableKind::Termlist => "termlist",
            TableKind::Position => "position",
            TableKind::Spelling => "spelling",
            TableKind::Synonym => "synonym",
        }
    }

    /// A lazy table is only created once something is stored in it, so its
    /// absence from a segment is normal.
    #[must_use]
    pub fn is_lazy(self) -> bool {
        !matches!(self, TableKind::Postlist | TableKind::Termlist)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// File name of a table in a segment directory at `revision`.
#[must_use]
pub fn table_file_name(kind: TableKind, revision: Revision) -> String {
    format!("{}.{}.tbl", kind.name(), revision)
}

#[derive(Debug, Clone)]
enum Location {
    Dir(PathBuf),
    File { path: PathBuf, base: u64 },
}

/// An opened segment: where it lives plus its version record.
#[derive(Debug, Clone)]
pub struct Segment {
    location: Location,
    version: VersionRecord,
}

impl Segment {
    /// Opens the segment directory `dir`.
    pub fn open_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let version = VersionRecord::read_dir(&dir)?;
        Ok(Self {
            location: Location::Dir(dir),
            version,
        })
    }

    /// Opens a single-file segment whose version record is at offset 0.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_file_at(path, 0)
    }

    /// Opens a single-file segment embedded at `base` within `path`.
    pub fn open_file_at<P: AsRef<Path>>(path: P, base: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut f = File::open(&path)?;
        let version = VersionRecord::read_embedded(&mut f, base)?;
        Ok(Self {
            location: Location::File { path, base },
            version,
        })
    }

    #[must_use]
    pub fn version(&self) -> &VersionRecord {
        &self.version
    }

    #[must_use]
    pub fn format(&self) -> Format {
        self.version.format
    }

    #[must_use]
    pub fn stats(&self) -> &SegmentStats {
        &self.version.stats
    }

    #[must_use]
    pub fn is_single_file(&self) -> bool {
        matches!(self.location, Location::File { .. })
    }

    /// Offset of the version record within a single file; 0 for a
    /// directory.
    #[must_use]
    pub fn base_offset(&self) -> u64 {
        match self.location {
            Location::Dir(_) => 0,
            Location::File { base, .. } => base,
        }
    }

    /// Path of the file holding table `kind`.
    #[must_use]
    pub fn table_path(&self, kind: TableKind) -> PathBuf {
        match &self.location {
            Location::Dir(dir) => dir.join(table_file_name(kind, self.version.revision)),
            Location::File { path, .. } => path.clone(),
        }
    }

    fn root(&self, kind: TableKind) -> &RootInfo {
        self.version.root(kind)
    }

    /// Whether the segment has table `kind` at all.
    ///
    /// In a directory that is whether the table file exists. A single file
    /// cannot tell an absent table from an empty one, so there a table with
    /// a fake root counts as absent.
    #[must_use]
    pub fn has_table(&self, kind: TableKind) -> bool {
        match &self.location {
            Location::Dir(_) => self.table_path(kind).exists(),
            Location::File { .. } => !self.root(kind).root_is_fake,
        }
    }

    /// On-disk size of table `kind`, when it can be known.
    ///
    /// `Ok(None)` for a missing table or a single-file segment.
    pub fn table_size(&self, kind: TableKind) -> io::Result<Option<u64>> {
        match &self.location {
            Location::Dir(_) => match fs::metadata(self.table_path(kind)) {
                Ok(meta) => Ok(Some(meta.len())),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            },
            Location::File { .. } => Ok(None),
        }
    }

    /// Opens table `kind`, or `None` if the segment does not have it.
    pub fn table(&self, kind: TableKind) -> Result<Option<TableReader>> {
        if !self.has_table(kind) {
            if !self.root(kind).root_is_fake {
                return Err(corrupt(format!(
                    "{} table {} is missing",
                    kind.name(),
                    self.table_path(kind).display()
                )));
            }
            return Ok(None);
        }
        let root = self.root(kind).clone();
        Ok(Some(TableReader::open(self.table_path(kind), root)?))
    }
}
