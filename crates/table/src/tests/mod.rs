mod buffered_tests;
mod writer_tests;

use crate::*;
use std::fs::OpenOptions;
use std::path::Path;

/// Writes `entries` as a standalone table file at `path`.
pub(crate) fn write_table(path: &Path, settings: TableSettings, entries: &[(&[u8], &[u8])]) -> Result<RootInfo> {
    let mut tf = TableFile::create(path, settings)?;
    for (k, v) in entries {
        tf.writer().add(k, v)?;
    }
    tf.commit(false)
}

pub(crate) fn open_rw(path: &Path) -> std::io::Result<std::fs::File> {
    OpenOptions::new().create(true).read(true).write(true).open(path)
}
