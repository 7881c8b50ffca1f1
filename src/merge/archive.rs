//! Archive packaging for merged artifacts.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Bundles one named artifact into an addressable archive
pub trait ArchivePackager: Send + Sync {
    /// Package `artifact` as `entry_name` inside the archive at `archive`,
    /// replacing any previous archive at that path.
    fn package(&self, artifact: &Path, entry_name: &str, archive: &Path) -> io::Result<()>;

    /// File extension of produced archives, without the dot
    fn extension(&self) -> &'static str;
}

/// Plain (uncompressed) tar archives
#[derive(Debug, Clone, Copy, Default)]
pub struct TarPackager;

impl TarPackager {
    fn temp_path(archive: &Path) -> PathBuf {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "archive".to_string());
        archive.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
    }
}

impl ArchivePackager for TarPackager {
    fn package(&self, artifact: &Path, entry_name: &str, archive: &Path) -> io::Result<()> {
        let temp_path = Self::temp_path(archive);

        let result = write_tar(&temp_path, artifact, entry_name)
            .and_then(|()| fs::rename(&temp_path, archive));

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn extension(&self) -> &'static str {
        "tar"
    }
}

fn write_tar(path: &Path, artifact: &Path, entry_name: &str) -> io::Result<()> {
    let file = File::create(path)?;
    let mut builder = tar::Builder::new(file);
    builder.append_path_with_name(artifact, entry_name)?;
    let file = builder.into_inner()?;
    file.sync_all()
}
