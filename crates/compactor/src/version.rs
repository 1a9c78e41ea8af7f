//! Segment version record and the atomic commit that installs it.
//!
//! ## Record layout
//!
//! ```text
//! magic (14 bytes) "\x0f\x0dRiptideIndex"
//! format (u16 BE)  1 = legacy, 2 = current
//! uuid (16 bytes)
//! varint revision
//! RootInfo x 6     postlist, docdata, termlist, position, spelling, synonym
//! varint doccount | varint (last_docid - doccount) | varint doclen_lbound
//! | varint wdf_ubound | varint (doclen_ubound - wdf_ubound)
//! | varint oldest_changeset | varint total_doclen
//! ```
//!
//! A directory segment keeps the record in `VERSION`. A single-file segment
//! keeps it at the file's base offset, inside a reserved region of
//! [`VERSION_MAX_SIZE`] bytes that the tables follow.
//!
//! ## Commit
//!
//! The record is written to `VERSION.tmp`, synced and renamed over
//! `VERSION`, so a crash leaves either the old record or the new one. All
//! filesystem calls go through [`VersionIo`].

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use codec::{pack_uint, unpack_uint, DocCount, DocId, TermCount};
use config::SyncMode;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use table::{sync_parent_dir, RootInfo};
use uuid::Uuid;

use crate::error::{corrupt, CompactError, Result};
use crate::segment::{Format, TableKind};

/// Magic bytes opening every version record.
pub const VERSION_MAGIC: &[u8; 14] = b"\x0f\x0dRiptideIndex";
/// Bytes reserved for the version record at the start of a single file.
pub const VERSION_MAX_SIZE: u64 = 1024;
/// Name of the version record in a segment directory.
pub const VERSION_FILE: &str = "VERSION";
const VERSION_TMP_FILE: &str = "VERSION.tmp";

/// Commit counter of a segment. 0 means never written.
pub type Revision = u64;

/// Segment-wide statistics carried in the version record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentStats {
    pub doccount: DocCount,
    pub last_docid: DocId,
    /// Smallest nonzero document length, 0 if unknown.
    pub doclen_lbound: TermCount,
    pub doclen_ubound: TermCount,
    pub wdf_ubound: TermCount,
    pub oldest_changeset: u64,
    pub total_doclen: u64,
}

impl SegmentStats {
    /// Folds `other` into these statistics.
    ///
    /// Document counts and total lengths add, bounds widen, and zero lower
    /// bounds are ignored. `last_docid` and `oldest_changeset` are left for
    /// the caller to decide.
    ///
    /// # Errors
    ///
    /// [`CompactError::Overflow`] if the document count or total length
    /// overflows.
    pub fn merge(&mut self, other: &SegmentStats) -> Result<()> {
        self.doccount = self
            .doccount
            .checked_add(other.doccount)
            .ok_or_else(|| CompactError::Overflow("merged document count".into()))?;
        self.total_doclen = self
            .total_doclen
            .checked_add(other.total_doclen)
            .ok_or_else(|| CompactError::Overflow("merged total document length".into()))?;

        if other.doclen_lbound != 0
            && (self.doclen_lbound == 0 || other.doclen_lbound < self.doclen_lbound)
        {
            self.doclen_lbound = other.doclen_lbound;
        }
        self.doclen_ubound = self.doclen_ubound.max(other.doclen_ubound);
        self.wdf_ubound = self.wdf_ubound.max(other.wdf_ubound);
        Ok(())
    }

    fn serialise(&self, out: &mut Vec<u8>) {
        pack_uint(out, self.doccount);
        pack_uint(out, self.last_docid.saturating_sub(self.doccount));
        pack_uint(out, self.doclen_lbound);
        pack_uint(out, self.wdf_ubound);
        pack_uint(out, self.doclen_ubound.saturating_sub(self.wdf_ubound));
        pack_uint(out, self.oldest_changeset);
        pack_uint(out, self.total_doclen);
    }

    fn parse(data: &mut &[u8]) -> Result<Self> {
        let doccount: DocCount = unpack_uint(data)?;
        let spare: DocId = unpack_uint(data)?;
        let doclen_lbound = unpack_uint(data)?;
        let wdf_ubound: TermCount = unpack_uint(data)?;
        let doclen_extra: TermCount = unpack_uint(data)?;
        let oldest_changeset = unpack_uint(data)?;
        let total_doclen = unpack_uint(data)?;
        Ok(Self {
            doccount,
            last_docid: doccount
                .checked_add(spare)
                .ok_or_else(|| corrupt("last docid in version record overflows"))?,
            doclen_lbound,
            doclen_ubound: wdf_ubound
                .checked_add(doclen_extra)
                .ok_or_else(|| corrupt("doclen upper bound in version record overflows"))?,
            wdf_ubound,
            oldest_changeset,
            total_doclen,
        })
    }
}

/// The root of a segment: format, identity, revision, one [`RootInfo`]
/// per table kind and the segment statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub format: Format,
    pub uuid: Uuid,
    pub revision: Revision,
    roots: [RootInfo; TableKind::COUNT],
    pub stats: SegmentStats,
}

impl VersionRecord {
    /// A never-written record: revision 0, all tables fake.
    pub fn new(format: Format, block_size: u32) -> Self {
        Self {
            format,
            uuid: Uuid::new_v4(),
            revision: 0,
            roots: std::array::from_fn(|_| RootInfo::empty(0, block_size)),
            stats: SegmentStats::default(),
        }
    }

    /// Record for a compaction output: current format, a fresh UUID, and
    /// the revision after `previous` (1 if there is none).
    pub fn new_for_compaction(previous: Option<&VersionRecord>, block_size: u32) -> Self {
        let mut record = Self::new(Format::Current, block_size);
        record.revision = previous.map_or(1, |p| p.revision + 1);
        record
    }

    #[must_use]
    pub fn root(&self, kind: TableKind) -> &RootInfo {
        &self.roots[kind.index()]
    }

    pub fn set_root(&mut self, kind: TableKind, root: RootInfo) {
        self.roots[kind.index()] = root;
    }

    pub fn merge_stats(&mut self, other: &SegmentStats) -> Result<()> {
        self.stats.merge(other)
    }

    /// # Errors
    ///
    /// [`CompactError::InvalidArgument`] if `last_docid` is below the
    /// document count.
    pub fn set_last_docid(&mut self, last_docid: DocId) -> Result<()> {
        if last_docid < self.stats.doccount {
            return Err(CompactError::InvalidArgument(format!(
                "last docid {} is below document count {}",
                last_docid, self.stats.doccount
            )));
        }
        self.stats.last_docid = last_docid;
        Ok(())
    }

    pub fn serialise(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(VERSION_MAGIC);
        // Writes into a Vec cannot fail.
        let _ = out.write_u16::<BigEndian>(self.format.tag());
        out.extend_from_slice(self.uuid.as_bytes());
        pack_uint(&mut out, self.revision);
        for root in &self.roots {
            root.serialise(&mut out);
        }
        self.stats.serialise(&mut out);
        out
    }

    /// Parses a record from the front of `data`, advancing past it.
    pub fn parse(data: &mut &[u8]) -> Result<Self> {
        let rest = data
            .strip_prefix(&VERSION_MAGIC[..])
            .ok_or_else(|| corrupt("bad version record magic"))?;
        *data = rest;
        let tag = data
            .read_u16::<BigEndian>()
            .map_err(|_| corrupt("truncated version record"))?;
        let format = Format::from_tag(tag)
            .ok_or_else(|| CompactError::Unsupported(format!("segment format {}", tag)))?;
        if data.len() < 16 {
            return Err(corrupt("truncated version record"));
        }
        let (uuid_bytes, rest) = data.split_at(16);
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(uuid_bytes);
        *data = rest;

        let revision = unpack_uint(data)?;
        let mut roots: [RootInfo; TableKind::COUNT] =
            std::array::from_fn(|_| RootInfo::empty(0, 0));
        for root in &mut roots {
            *root = RootInfo::parse(data)?;
        }
        let stats = SegmentStats::parse(data)?;
        Ok(Self {
            format,
            uuid: Uuid::from_bytes(uuid),
            revision,
            roots,
            stats,
        })
    }

    /// Parses a record that must occupy all of `data`.
    pub fn from_bytes(mut data: &[u8]) -> Result<Self> {
        let record = Self::parse(&mut data)?;
        if !data.is_empty() {
            return Err(corrupt("trailing bytes after version record"));
        }
        Ok(record)
    }

    /// Reads the `VERSION` file of the segment directory `dir`.
    pub fn read_dir(dir: &Path) -> Result<Self> {
        Self::from_bytes(&fs::read(dir.join(VERSION_FILE))?)
    }

    /// Reads the record embedded at `base` in a single-file segment.
    pub fn read_embedded(file: &mut File, base: u64) -> Result<Self> {
        file.seek(SeekFrom::Start(base))?;
        let mut buf = Vec::with_capacity(VERSION_MAX_SIZE as usize);
        (&mut *file).take(VERSION_MAX_SIZE).read_to_end(&mut buf)?;
        Self::parse(&mut buf.as_slice())
    }
}

/// Filesystem operations used to install a version record.
pub trait VersionIo {
    /// Creates or truncates `path`, writes `data` and syncs per `sync`.
    fn write(&mut self, path: &Path, data: &[u8], sync: SyncMode) -> io::Result<()>;
    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove(&mut self, path: &Path) -> io::Result<()>;
}

/// [`VersionIo`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdVersionIo;

impl VersionIo for StdVersionIo {
    fn write(&mut self, path: &Path, data: &[u8], sync: SyncMode) -> io::Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        f.write_all(data)?;
        sync_file(&f, sync)
    }

    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove(&mut self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

pub(crate) fn sync_file(f: &File, sync: SyncMode) -> io::Result<()> {
    match sync {
        SyncMode::Full => f.sync_all(),
        SyncMode::Normal => f.sync_data(),
        SyncMode::None => Ok(()),
    }
}

/// Installs `record` as the `VERSION` of segment directory `dir`.
///
/// With `dangerous` set the record overwrites `VERSION` directly, so a
/// crash mid-write can leave the segment unreadable.
///
/// # Errors
///
/// Any write, sync or rename failure. The temporary file is removed and
/// the previous `VERSION` is untouched.
pub fn install_version(
    io: &mut dyn VersionIo,
    dir: &Path,
    record: &VersionRecord,
    sync: SyncMode,
    dangerous: bool,
) -> Result<()> {
    let data = record.serialise();
    let target = dir.join(VERSION_FILE);

    if dangerous {
        io.write(&target, &data, sync)?;
    } else {
        let tmp: PathBuf = dir.join(VERSION_TMP_FILE);
        if let Err(e) = io.write(&tmp, &data, sync) {
            discard_tmp(io, &tmp);
            return Err(e.into());
        }
        if let Err(e) = io.rename(&tmp, &target) {
            // Some networked filesystems report a failed rename that
            // actually happened. Only a temporary file that is verifiably
            // gone counts as installed.
            match io.remove(&tmp) {
                Err(gone) if gone.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(
                        path = %target.display(),
                        error = %e,
                        "rename reported failure but the temporary version file is gone; assuming it succeeded"
                    );
                }
                Err(other) => {
                    tracing::warn!(path = %tmp.display(), error = %other, "failed to remove temporary version file");
                    return Err(e.into());
                }
                Ok(()) => return Err(e.into()),
            }
        }
    }

    if sync != SyncMode::None {
        sync_parent_dir(&target);
    }
    tracing::info!(
        dir = %dir.display(),
        revision = record.revision,
        doccount = record.stats.doccount,
        "installed version record"
    );
    Ok(())
}

fn discard_tmp(io: &mut dyn VersionIo, tmp: &Path) {
    if let Err(e) = io.remove(tmp) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %tmp.display(), error = %e, "failed to remove temporary version file");
        }
    }
}

/// Writes `record` into the reserved region at `base` of a single-file
/// segment.
///
/// # Errors
///
/// [`CompactError::Overflow`] if the record does not fit in
/// [`VERSION_MAX_SIZE`] bytes; I/O errors otherwise.
pub fn write_embedded(file: &mut File, base: u64, record: &VersionRecord, sync: SyncMode) -> Result<()> {
    let data = record.serialise();
    if data.len() as u64 > VERSION_MAX_SIZE {
        return Err(CompactError::Overflow(format!(
            "version record of {} bytes exceeds the {} bytes reserved for it",
            data.len(),
            VERSION_MAX_SIZE
        )));
    }
    file.seek(SeekFrom::Start(base))?;
    file.write_all(&data)?;
    sync_file(file, sync)?;
    tracing::info!(base, revision = record.revision, "wrote embedded version record");
    Ok(())
}
