//! Exclusive advisory lock on a destination directory.
//!
//! Held for the whole of a multi-file compaction so two compactions (or a
//! compaction and a writer) never target the same directory. Acquisition
//! fails fast instead of waiting. The lock lives on `<dir>/LOCK` and is
//! released when the [`DestinationLock`] is dropped or the process exits.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{CompactError, Result};

/// Name of the lock file inside a segment directory.
pub const LOCK_FILE: &str = "LOCK";

#[derive(Debug)]
pub struct DestinationLock {
    file: File,
    path: PathBuf,
}

impl DestinationLock {
    /// Takes the lock on `dir`, creating the lock file if needed.
    ///
    /// # Errors
    ///
    /// [`CompactError::LockContention`] if someone else holds it; I/O
    /// errors if the lock file cannot be opened.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        try_lock(&file, &path)?;
        tracing::debug!(path = %path.display(), "acquired destination lock");
        Ok(Self { file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock(file: &File, path: &Path) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and open for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Err(CompactError::LockContention(format!(
            "{} is held by another process or compaction",
            path.display()
        )));
    }
    Err(CompactError::Io(err))
}

#[cfg(not(unix))]
fn try_lock(_file: &File, _path: &Path) -> Result<()> {
    Ok(())
}

impl Drop for DestinationLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: as in `try_lock`.
            unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        }
        tracing::debug!(path = %self.path.display(), "released destination lock");
    }
}
