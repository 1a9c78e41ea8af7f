//! Bounded fan-in for postlist merges with many inputs.
//!
//! Instead of one merge over N cursors, inputs are merged in groups of two
//! (three for the last group when a single input would be left over) into
//! temporary tables, and the temporaries are merged again until at most
//! three remain. Those go into the real output.
//!
//! ```text
//! 7 inputs:  [a b] [c d] [e f g]  ->  tmp0_0 tmp0_1 tmp0_2  ->  output
//! ```
//!
//! The result is byte-identical to a direct merge: temporaries are read
//! back through the current-layout cursor, which presents them exactly as
//! their inputs were presented.

use codec::DocId;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use table::{BufferedFile, TableReader, TableSettings, TableWriter};

use crate::cursor::{open_postlist_cursor, PostlistCursor};
use crate::error::Result;
use crate::hooks::CompactHooks;
use crate::merge::merge_postlists;
use crate::segment::Format;

/// Largest number of inputs merged directly.
pub const MAX_FAN_IN: usize = 3;

/// Block size of temporary tables. They are read once, front to back.
const TEMP_BLOCK_SIZE: usize = 65536;

/// A postlist table taking part in a merge.
#[derive(Debug, Clone)]
pub struct PostlistInput {
    pub table: TableReader,
    pub format: Format,
    pub offset: DocId,
}

impl PostlistInput {
    fn cursor(&self) -> Result<Box<dyn PostlistCursor>> {
        open_postlist_cursor(&self.table, self.format, self.offset)
    }
}

/// Identifies a temporary table: the pass that wrote it and its group.
pub type TempId = (usize, usize);

/// Tracks temporary tables so each is deleted as soon as it has been
/// consumed, and everything left over is deleted when the registry drops.
#[derive(Debug)]
pub struct TempRegistry {
    dir: PathBuf,
    tables: BTreeMap<TempId, PathBuf>,
}

impl TempRegistry {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            tables: BTreeMap::new(),
        }
    }

    /// Registers and returns the path for temporary `id`.
    pub fn create(&mut self, id: TempId) -> PathBuf {
        let path = self.dir.join(format!("tmp{}_{}", id.0, id.1));
        self.tables.insert(id, path.clone());
        path
    }

    /// Deletes temporary `id`.
    pub fn release(&mut self, id: TempId) {
        if let Some(path) = self.tables.remove(&id) {
            remove_temp(&path);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Drop for TempRegistry {
    fn drop(&mut self) {
        for path in self.tables.values() {
            remove_temp(path);
        }
    }
}

fn remove_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove temporary table");
        }
    }
}

/// Sizes of the groups one pass splits `n` inputs into.
#[must_use]
pub fn group_sizes(n: usize) -> Vec<usize> {
    let mut sizes = vec![2; n / 2];
    if n % 2 == 1 {
        if let Some(last) = sizes.last_mut() {
            *last = 3;
        } else {
            sizes.push(1);
        }
    }
    sizes
}

/// Merges `inputs` into `out`, never opening more than [`MAX_FAN_IN`]
/// cursors at once. Temporary tables are written under `tmp_dir`.
pub fn multimerge_postlists(
    hooks: &mut dyn CompactHooks,
    out: &mut TableWriter,
    tmp_dir: &Path,
    inputs: Vec<PostlistInput>,
) -> Result<()> {
    let mut registry = TempRegistry::new(tmp_dir);
    let mut current: Vec<(PostlistInput, Option<TempId>)> =
        inputs.into_iter().map(|i| (i, None)).collect();

    let mut pass = 0;
    while current.len() > MAX_FAN_IN {
        tracing::debug!(pass, inputs = current.len(), "postlist merge pass");
        let mut next = Vec::new();
        let mut rest = current.into_iter();
        for (group, size) in group_sizes(rest.len()).into_iter().enumerate() {
            let members: Vec<_> = rest.by_ref().take(size).collect();
            let id = (pass, group);
            let path = registry.create(id);
            let table = merge_to_temp(hooks, &path, &members)?;
            for temp in members.into_iter().filter_map(|(_, temp)| temp) {
                registry.release(temp);
            }
            let input = PostlistInput {
                table,
                format: Format::Current,
                offset: 0,
            };
            next.push((input, Some(id)));
        }
        current = next;
        pass += 1;
    }

    let cursors = current
        .iter()
        .map(|(input, _)| input.cursor())
        .collect::<Result<Vec<_>>>()?;
    merge_postlists(hooks, out, cursors)?;
    for temp in current.into_iter().filter_map(|(_, temp)| temp) {
        registry.release(temp);
    }
    Ok(())
}

fn merge_to_temp(
    hooks: &mut dyn CompactHooks,
    path: &Path,
    members: &[(PostlistInput, Option<TempId>)],
) -> Result<TableReader> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    let settings = TableSettings {
        compress: false,
        ..TableSettings::new(TEMP_BLOCK_SIZE)
    };
    let mut writer = TableWriter::new(BufferedFile::new(file, 0)?, settings);
    let cursors = members
        .iter()
        .map(|(input, _)| input.cursor())
        .collect::<Result<Vec<_>>>()?;
    merge_postlists(hooks, &mut writer, cursors)?;
    let (root, _) = writer.finish()?;
    Ok(TableReader::open(path, root)?)
}
