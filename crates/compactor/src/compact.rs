//! The compaction driver: locks the destination, merges every table kind
//! and commits the new version record.

use codec::DocId;
use config::{CompactOptions, SyncMode};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use table::{BufferedFile, RootInfo, TableFile, TableReader, TableSettings, TableWriter};
use uuid::Uuid;

use crate::cursor::open_postlist_cursor;
use crate::error::{CompactError, Result};
use crate::hooks::CompactHooks;
use crate::lock::DestinationLock;
use crate::merge::{merge_docid_keyed, merge_positions, merge_postlists};
use crate::multipass::{multimerge_postlists, PostlistInput, MAX_FAN_IN};
use crate::segment::{table_file_name, Segment, TableKind};
use crate::version::{
    install_version, write_embedded, Revision, SegmentStats, StdVersionIo, VersionIo,
    VersionRecord, VERSION_MAX_SIZE,
};
use crate::wordlist::{merge_spellings, merge_synonyms};

/// Where the compacted segment goes.
#[derive(Debug)]
pub enum Destination {
    /// A segment directory, created if missing.
    Dir(PathBuf),
    /// A single-file segment at this path, created or truncated.
    File(PathBuf),
    /// A single-file segment written at the descriptor's current position.
    Fd(File),
}

impl Destination {
    /// A directory or a single file at `path`, per the options' flags.
    pub fn from_path(path: impl Into<PathBuf>, options: &CompactOptions) -> Self {
        if options.flags.single_file {
            Destination::File(path.into())
        } else {
            Destination::Dir(path.into())
        }
    }
}

/// Byte totals over every table, in and out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeTotals {
    pub in_bytes: u64,
    pub out_bytes: u64,
}

impl SizeTotals {
    /// Adds one table's sizes; `None` on overflow.
    #[must_use]
    pub fn add(self, in_bytes: u64, out_bytes: u64) -> Option<Self> {
        Some(Self {
            in_bytes: self.in_bytes.checked_add(in_bytes)?,
            out_bytes: self.out_bytes.checked_add(out_bytes)?,
        })
    }
}

/// What happened to one table kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub kind: TableKind,
    /// The final status passed to [`CompactHooks::set_status`].
    pub status: String,
    /// Bytes read from the inputs, `None` when some input's size is unknown.
    pub in_bytes: Option<u64>,
    pub out_bytes: Option<u64>,
}

/// Summary of a finished compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactReport {
    pub revision: Revision,
    pub uuid: Uuid,
    pub stats: SegmentStats,
    pub tables: Vec<TableReport>,
    /// `None` when some table's sizes are unknown.
    pub totals: Option<SizeTotals>,
}

impl CompactReport {
    #[must_use]
    pub fn status(&self, kind: TableKind) -> Option<&str> {
        self.tables
            .iter()
            .find(|t| t.kind == kind)
            .map(|t| t.status.as_str())
    }
}

const DOES_NOT_EXIST: &str = "doesn't exist";
const SUPPRESSED: &str = "so suppressing output";
const SINGLE_FILE_INPUT: &str = "Done (table sizes unknown for single file input)";

/// Status line comparing input and output sizes in KiB.
#[must_use]
pub fn size_change_status(in_k: u64, out_k: u64) -> String {
    if in_k == out_k {
        return format!("Size unchanged ({}K)", out_k);
    }
    let (word, delta) = if out_k < in_k {
        ("Reduced by", in_k - out_k)
    } else {
        ("INCREASED by", out_k - in_k)
    };
    let percent = if in_k == 0 {
        String::new()
    } else {
        format!("{}% ", delta.saturating_mul(100) / in_k)
    };
    format!("{} {}{}K ({}K -> {}K)", word, percent, delta, in_k, out_k)
}

/// Compacts `sources` into `dest`.
///
/// `offsets[i]` is added to every docid of `sources[i]`; the caller picks
/// offsets so the shifted docid ranges do not overlap. `last_docid` is the
/// highest docid of the output.
///
/// # Errors
///
/// See [`CompactError`]. On error the destination's previous version
/// record is untouched and this call's temporary files are removed.
pub fn compact(
    sources: &[Segment],
    offsets: &[DocId],
    dest: Destination,
    options: &CompactOptions,
    last_docid: DocId,
    hooks: &mut dyn CompactHooks,
) -> Result<CompactReport> {
    compact_with_io(sources, offsets, dest, options, last_docid, hooks, &mut StdVersionIo)
}

/// [`compact`], with the version commit going through `io`.
pub fn compact_with_io(
    sources: &[Segment],
    offsets: &[DocId],
    dest: Destination,
    options: &CompactOptions,
    last_docid: DocId,
    hooks: &mut dyn CompactHooks,
    io: &mut dyn VersionIo,
) -> Result<CompactReport> {
    if sources.is_empty() {
        return Err(CompactError::InvalidArgument("no source segments".into()));
    }
    if offsets.len() != sources.len() {
        return Err(CompactError::InvalidArgument(format!(
            "{} offsets for {} sources",
            offsets.len(),
            sources.len()
        )));
    }

    let block_size = options.block_size() as u32;
    let mut plan = Plan {
        sources,
        offsets,
        options,
        settings: TableSettings {
            full_blocks: options.full_blocks(),
            max_item_size: options.max_item_size(),
            ..TableSettings::new(options.block_size())
        },
        tmp_dir: options.tmp_dir.clone(),
        reports: Vec::with_capacity(TableKind::COUNT),
    };

    match dest {
        Destination::Dir(dir) => {
            fs::create_dir_all(&dir)?;
            let _lock = DestinationLock::acquire(&dir)?;
            let previous = read_previous(&dir);
            let mut record = VersionRecord::new_for_compaction(previous.as_ref(), block_size);
            merge_source_stats(&mut record, sources, last_docid)?;
            if plan.tmp_dir.is_none() {
                plan.tmp_dir = Some(dir.clone());
            }
            let mut outputs = NewTables::default();
            for kind in TableKind::ALL {
                let path = dir.join(table_file_name(kind, record.revision));
                let written = plan.table(kind, hooks, |plan, hooks, inputs| {
                    let mut file = TableFile::create(&path, plan.settings)?;
                    outputs.paths.push(path.clone());
                    plan.merge(kind, hooks, file.writer(), inputs)?;
                    let root = file.commit(options.flags.sync_mode() != SyncMode::None)?;
                    Ok((root, fs::metadata(&path)?.len()))
                })?;
                if let Some((root, _)) = written {
                    record.set_root(kind, root);
                }
            }
            install_version(
                io,
                &dir,
                &record,
                options.flags.sync_mode(),
                options.flags.dangerous,
            )?;
            outputs.paths.clear();
            remove_stale_tables(&dir, record.revision);
            Ok(plan.finish(hooks, record))
        }
        Destination::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(true)
                .open(&path)?;
            if plan.tmp_dir.is_none() {
                plan.tmp_dir = path.parent().map(Path::to_path_buf);
            }
            let record = plan.single_file(file, hooks, block_size, last_docid)?;
            Ok(plan.finish(hooks, record))
        }
        Destination::Fd(file) => {
            if plan.tmp_dir.is_none() && options.flags.multipass && sources.len() > MAX_FAN_IN {
                return Err(CompactError::InvalidArgument(
                    "multipass output to a file descriptor needs a tmp_dir for intermediate tables".into(),
                ));
            }
            let record = plan.single_file(file, hooks, block_size, last_docid)?;
            Ok(plan.finish(hooks, record))
        }
    }
}

fn read_previous(dir: &Path) -> Option<VersionRecord> {
    match VersionRecord::read_dir(dir) {
        Ok(record) => Some(record),
        Err(CompactError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "ignoring unreadable version record in destination");
            None
        }
    }
}

fn merge_source_stats(record: &mut VersionRecord, sources: &[Segment], last_docid: DocId) -> Result<()> {
    for source in sources {
        record.merge_stats(source.stats())?;
    }
    record.set_last_docid(last_docid)
}

/// Table files written by this compaction, deleted on drop unless the
/// version record naming them was installed.
#[derive(Debug, Default)]
struct NewTables {
    paths: Vec<PathBuf>,
}

impl Drop for NewTables {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove output table");
                }
            }
        }
    }
}

/// Deletes table files in `dir` left over from revisions other than
/// `revision`.
fn remove_stale_tables(dir: &Path, revision: Revision) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot list destination for cleanup");
            return;
        }
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let stale = TableKind::ALL.iter().any(|kind| {
            name.strip_prefix(kind.name())
                .and_then(|r| r.strip_prefix('.'))
                .and_then(|r| r.strip_suffix(".tbl"))
                .and_then(|r| r.parse::<Revision>().ok())
                .is_some_and(|r| r != revision)
        });
        if stale {
            if let Err(e) = fs::remove_file(entry.path()) {
                tracing::warn!(file = name, error = %e, "failed to remove stale table");
            } else {
                tracing::debug!(file = name, "removed stale table");
            }
        }
    }
}

/// A present input table and the offset for its docids.
struct Input {
    source: usize,
    table: TableReader,
}

/// Shared state of one compaction run.
struct Plan<'a> {
    sources: &'a [Segment],
    offsets: &'a [DocId],
    options: &'a CompactOptions,
    settings: TableSettings,
    tmp_dir: Option<PathBuf>,
    reports: Vec<TableReport>,
}

impl Plan<'_> {
    /// Decides whether table `kind` is output, and if so opens its inputs
    /// and calls `write`, which returns the output's root and size.
    fn table<F>(
        &mut self,
        kind: TableKind,
        hooks: &mut dyn CompactHooks,
        write: F,
    ) -> Result<Option<(RootInfo, u64)>>
    where
        F: FnOnce(&Self, &mut dyn CompactHooks, &[Input]) -> Result<(RootInfo, u64)>,
    {
        let name = kind.name();
        hooks.set_status(name, "");

        let mut will_exist = !kind.is_lazy();
        let mut single_file_in = false;
        let mut in_bytes = 0u64;
        let mut in_k = 0u64;
        let mut present = 0usize;
        for source in self.sources {
            if source.is_single_file() {
                if source.has_table(kind) {
                    single_file_in = true;
                    will_exist = true;
                    present += 1;
                }
            } else if let Some(size) = source.table_size(kind)? {
                in_bytes = in_bytes.saturating_add(size);
                in_k += size / 1024;
                will_exist = true;
                present += 1;
            }
        }
        let known_in = (!single_file_in).then_some(in_bytes);

        if kind == TableKind::Termlist && present != self.sources.len() {
            if present != 0 {
                let status = format!(
                    "{} of {} inputs present, {}",
                    present,
                    self.sources.len(),
                    SUPPRESSED
                );
                self.skip(kind, hooks, status, known_in);
                return Ok(None);
            }
            will_exist = false;
        }
        if !will_exist {
            self.skip(kind, hooks, DOES_NOT_EXIST.to_string(), known_in);
            return Ok(None);
        }

        let mut inputs = Vec::with_capacity(present);
        for (i, source) in self.sources.iter().enumerate() {
            if let Some(table) = source.table(kind)? {
                inputs.push(Input { source: i, table });
            }
        }
        tracing::debug!(table = name, inputs = inputs.len(), "merging table");
        let (root, out_bytes) = write(self, hooks, &inputs)?;

        let status = if single_file_in {
            SINGLE_FILE_INPUT.to_string()
        } else {
            size_change_status(in_k, out_bytes / 1024)
        };
        hooks.set_status(name, &status);
        self.reports.push(TableReport {
            kind,
            status,
            in_bytes: known_in,
            out_bytes: Some(out_bytes),
        });
        Ok(Some((root, out_bytes)))
    }

    fn skip(&mut self, kind: TableKind, hooks: &mut dyn CompactHooks, status: String, in_bytes: Option<u64>) {
        hooks.set_status(kind.name(), &status);
        self.reports.push(TableReport {
            kind,
            status,
            in_bytes,
            out_bytes: Some(0),
        });
    }

    /// Runs the merge for `kind` from `inputs` into `out`.
    fn merge(
        &self,
        kind: TableKind,
        hooks: &mut dyn CompactHooks,
        out: &mut TableWriter,
        inputs: &[Input],
    ) -> Result<()> {
        match kind {
            TableKind::Postlist => {
                let multipass = self.options.flags.multipass && inputs.len() > MAX_FAN_IN;
                match (&self.tmp_dir, multipass) {
                    (Some(tmp_dir), true) => {
                        let inputs = inputs
                            .iter()
                            .map(|i| PostlistInput {
                                table: i.table.clone(),
                                format: self.sources[i.source].format(),
                                offset: self.offsets[i.source],
                            })
                            .collect();
                        multimerge_postlists(hooks, out, tmp_dir, inputs)
                    }
                    _ => {
                        let cursors = inputs
                            .iter()
                            .map(|i| {
                                open_postlist_cursor(
                                    &i.table,
                                    self.sources[i.source].format(),
                                    self.offsets[i.source],
                                )
                            })
                            .collect::<Result<Vec<_>>>()?;
                        merge_postlists(hooks, out, cursors)
                    }
                }
            }
            TableKind::Spelling => merge_spellings(out, &self.tables(inputs)),
            TableKind::Synonym => merge_synonyms(out, &self.tables(inputs)),
            TableKind::Position => merge_positions(out, &self.with_offsets(inputs)),
            TableKind::Docdata | TableKind::Termlist => {
                merge_docid_keyed(out, &self.with_offsets(inputs))
            }
        }
    }

    fn tables(&self, inputs: &[Input]) -> Vec<TableReader> {
        inputs.iter().map(|i| i.table.clone()).collect()
    }

    fn with_offsets(&self, inputs: &[Input]) -> Vec<(TableReader, DocId)> {
        inputs
            .iter()
            .map(|i| (i.table.clone(), self.offsets[i.source]))
            .collect()
    }

    /// Writes every table back to back into `file` after the reserved
    /// version region, then the version record itself.
    fn single_file(
        &mut self,
        mut file: File,
        hooks: &mut dyn CompactHooks,
        block_size: u32,
        last_docid: DocId,
    ) -> Result<VersionRecord> {
        let base = file.stream_position()?;
        let mut record = VersionRecord::new_for_compaction(None, block_size);
        merge_source_stats(&mut record, self.sources, last_docid)?;

        let mut pos = base + VERSION_MAX_SIZE;
        for kind in TableKind::ALL {
            let written = self.table(kind, hooks, |plan, hooks, inputs| {
                let out = BufferedFile::new(file.try_clone()?, pos)?;
                let mut writer = TableWriter::new(out, plan.settings);
                plan.merge(kind, hooks, &mut writer, inputs)?;
                let (root, out) = writer.finish()?;
                let end = out.position();
                Ok((root, end - pos))
            })?;
            if let Some((root, size)) = written {
                pos += size;
                record.set_root(kind, root);
            }
        }

        // An output whose tables are all empty is padded to one block so
        // it is not mistaken for a stub.
        let min_len = base + u64::from(block_size);
        if file.metadata()?.len() < min_len {
            file.set_len(min_len)?;
        }
        write_embedded(&mut file, base, &record, self.options.flags.sync_mode())?;
        file.seek(SeekFrom::Start(pos.max(min_len)))?;
        Ok(record)
    }

    /// Emits the total status and builds the report.
    fn finish(self, hooks: &mut dyn CompactHooks, record: VersionRecord) -> CompactReport {
        let totals = self.reports.iter().try_fold(SizeTotals::default(), |acc, t| {
            acc.add(t.in_bytes?, t.out_bytes?)
        });
        if let Some(totals) = totals {
            hooks.set_status(
                "Total",
                &size_change_status(totals.in_bytes / 1024, totals.out_bytes / 1024),
            );
        }
        CompactReport {
            revision: record.revision,
            uuid: record.uuid,
            stats: record.stats,
            tables: self.reports,
            totals,
        }
    }
}
