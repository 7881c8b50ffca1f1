//! Source directory access.
//!
//! The orchestrator only needs three things from the incoming batch: the
//! names waiting in it, a path for each, and the bytes behind a name.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::classify::TEXT_SUFFIX;

/// Flat directory of incoming text files
pub trait SourceDirectory: Send + Sync + fmt::Debug {
    fn root(&self) -> &Path;

    /// Text file names currently present, sorted lexicographically
    fn list_names(&self) -> io::Result<Vec<String>>;

    /// Full path of a listed name
    fn path_of(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    fn read_body(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_of(name))
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.path_of(name))
    }

    /// Total size in bytes of the listed names; unreadable entries count as zero
    fn total_bytes(&self, names: &[String]) -> u64 {
        names
            .iter()
            .filter_map(|name| fs::metadata(self.path_of(name)).ok())
            .map(|meta| meta.len())
            .sum()
    }
}

/// `SourceDirectory` backed by a real directory
#[derive(Debug, Clone)]
pub struct FsSourceDirectory {
    root: PathBuf,
}

impl FsSourceDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceDirectory for FsSourceDirectory {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list_names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            // Non-UTF-8 names cannot carry a key and are left alone
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(TEXT_SUFFIX) && !name.starts_with('.') {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}
