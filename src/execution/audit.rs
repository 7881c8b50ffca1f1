//! Audit Log
//!
//! Append-only record of every file routed to a valid destination, one file
//! name per line. Exception-routed files are never written here.
//!
//! ## Concurrency Safety
//! Appends are serialized by an in-process mutex and, across processes, by an
//! exclusive fs2 advisory lock on the log file itself. Each line goes out in a
//! single `write_all` on an `O_APPEND` handle, so lines never interleave.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::locks;

/// Shared handle on the audit log
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
    appended: AtomicUsize,
}

impl AuditLog {
    /// Open the log for appending, creating it (and its parent) if absent
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            appended: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry for a routed file
    pub fn append(&self, file_name: &str) -> io::Result<()> {
        let line = format!("{}\n", file_name);

        let file = locks::acquire(&self.file);
        FileExt::lock_exclusive(&*file)?;
        let result = (&*file).write_all(line.as_bytes());
        let unlocked = FileExt::unlock(&*file);
        result?;
        unlocked?;

        self.appended.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Entries appended through this handle during the run
    pub fn appended(&self) -> usize {
        self.appended.load(Ordering::Relaxed)
    }
}

/// Read every entry currently in a log file
pub fn read_entries(path: &Path) -> io::Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.lines().map(str::to_string).collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}
