//! Merge/Archive Stage
//!
//! Groups whitelisted records by key, concatenates each group's bodies in
//! discovery order into one artifact named after the key and the batch stamp,
//! and packages that artifact into an archive named after the key alone so
//! reruns update the same archive.

pub mod archive;

pub use archive::*;

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::classify::{ClassificationKey, FileRecord, FILENAME_DELIMITER, TEXT_SUFFIX};
use crate::source::SourceDirectory;

/// Line written between two merged bodies
pub const MERGE_SEPARATOR: &str = "\n---------------------------\n";

/// All records sharing one key, in discovery order
#[derive(Debug, Clone)]
pub struct MergeGroup {
    pub key: ClassificationKey,
    pub members: Vec<FileRecord>,
}

/// Group classified records by key.
///
/// Groups appear in order of their first member; members keep discovery
/// order. Excepted records are ignored.
pub fn group_records<I>(records: I) -> Vec<MergeGroup>
where
    I: IntoIterator<Item = FileRecord>,
{
    let mut index: HashMap<ClassificationKey, usize> = HashMap::new();
    let mut groups: Vec<MergeGroup> = Vec::new();

    for record in records {
        let Some(key) = record.key().cloned() else {
            continue;
        };

        match index.get(&key) {
            Some(&position) => groups[position].members.push(record),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(MergeGroup {
                    key,
                    members: vec![record],
                });
            }
        }
    }

    groups
}

/// Join bodies with the separator between each pair
pub fn join_bodies<B: AsRef<[u8]>>(bodies: &[B]) -> Vec<u8> {
    let mut merged = Vec::new();
    for (i, body) in bodies.iter().enumerate() {
        if i > 0 {
            merged.extend_from_slice(MERGE_SEPARATOR.as_bytes());
        }
        merged.extend_from_slice(body.as_ref());
    }
    merged
}

/// Whether `name` is a merged artifact of `key`, i.e. `<label>_<stamp>.txt`.
///
/// Artifact names carry only the key label, so they cannot be decoded back
/// through the naming scheme that produced the key.
pub fn is_artifact_of(name: &str, key: &ClassificationKey) -> bool {
    name.strip_suffix(TEXT_SUFFIX)
        .and_then(|stem| stem.strip_prefix(key.label().as_str()))
        .and_then(|rest| rest.strip_prefix(FILENAME_DELIMITER))
        .is_some_and(|stamp| !stamp.is_empty() && stamp.bytes().all(|b| b.is_ascii_digit()))
}

/// One consolidated document produced from a merge group
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedArtifact {
    pub key: ClassificationKey,
    /// File name, `<key label>_<stamp>.txt`
    pub name: String,
    /// Location in the staging directory
    pub path: PathBuf,
    /// Archive holding the artifact, when packaging succeeded
    pub archive: Option<PathBuf>,
    /// Members whose bodies made it into the artifact
    pub members_merged: usize,
}

/// Aggregate result of the merge stage
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub artifacts: Vec<MergedArtifact>,
    /// Members that vanished between discovery and merge
    pub source_missing: Vec<String>,
    /// Members that could not be read for other reasons
    pub unreadable: Vec<String>,
    pub archives_written: usize,
    /// Human-readable diagnostics for everything that went wrong
    pub faults: Vec<String>,
}

/// Merges groups into staged artifacts and archives
#[derive(Clone)]
pub struct MergeStage {
    staging_dir: PathBuf,
    stamp: String,
    packager: Arc<dyn ArchivePackager>,
    remove_sources: bool,
}

impl std::fmt::Debug for MergeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeStage")
            .field("staging_dir", &self.staging_dir)
            .field("stamp", &self.stamp)
            .field("archive_extension", &self.packager.extension())
            .field("remove_sources", &self.remove_sources)
            .finish()
    }
}

impl MergeStage {
    pub fn new(staging_dir: PathBuf, stamp: impl Into<String>) -> Self {
        Self {
            staging_dir,
            stamp: stamp.into(),
            packager: Arc::new(TarPackager),
            remove_sources: false,
        }
    }

    /// Use a different archive container
    pub fn with_packager(mut self, packager: Arc<dyn ArchivePackager>) -> Self {
        self.packager = packager;
        self
    }

    /// Delete member sources once their bodies are merged and archived
    pub fn with_remove_sources(mut self, remove: bool) -> Self {
        self.remove_sources = remove;
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Artifact name for a key in this batch
    pub fn artifact_name(&self, key: &ClassificationKey) -> String {
        format!("{}_{}.txt", key.label(), self.stamp)
    }

    /// Archive path for a key; independent of the batch stamp
    pub fn archive_path(&self, key: &ClassificationKey) -> PathBuf {
        self.staging_dir
            .join(format!("{}.{}", key.label(), self.packager.extension()))
    }

    /// Merge every group, reading member bodies from `source`. Fails only
    /// when the staging directory itself cannot be created.
    pub fn run(
        &self,
        source: &dyn SourceDirectory,
        groups: &[MergeGroup],
    ) -> std::io::Result<MergeReport> {
        let mut report = MergeReport::default();
        if groups.is_empty() {
            return Ok(report);
        }

        fs::create_dir_all(&self.staging_dir)?;

        for group in groups {
            if let Some(artifact) = self.merge_group(source, group, &mut report) {
                if artifact.archive.is_some() {
                    report.archives_written += 1;
                }
                report.artifacts.push(artifact);
            }
        }

        tracing::info!(
            groups = groups.len(),
            artifacts = report.artifacts.len(),
            archives = report.archives_written,
            missing = report.source_missing.len(),
            "Merge stage complete"
        );

        Ok(report)
    }

    /// Merge one group; `None` when no member body could be read
    fn merge_group(
        &self,
        source: &dyn SourceDirectory,
        group: &MergeGroup,
        report: &mut MergeReport,
    ) -> Option<MergedArtifact> {
        let mut bodies = Vec::with_capacity(group.members.len());
        let mut merged_names: Vec<&str> = Vec::with_capacity(group.members.len());

        for member in &group.members {
            match source.read_body(&member.raw_name) {
                Ok(body) => {
                    bodies.push(body);
                    merged_names.push(&member.raw_name);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!(file = %member.raw_name, key = %group.key, "Merge member vanished");
                    report.source_missing.push(member.raw_name.clone());
                    report
                        .faults
                        .push(format!("Source file does not exist: {}", member.source.display()));
                }
                Err(e) => {
                    tracing::warn!(file = %member.raw_name, error = %e, "Merge member unreadable");
                    report.unreadable.push(member.raw_name.clone());
                    report.faults.push(format!(
                        "Failed to read {}: {}",
                        member.source.display(),
                        e
                    ));
                }
            }
        }

        if bodies.is_empty() {
            return None;
        }

        let name = self.artifact_name(&group.key);
        let path = self.staging_dir.join(&name);

        if let Err(e) = write_atomic(&path, &join_bodies(&bodies)) {
            tracing::warn!(artifact = %name, error = %e, "Failed to write merged artifact");
            report
                .unreadable
                .extend(merged_names.iter().map(|name| name.to_string()));
            report
                .faults
                .push(format!("Failed to write merged file {}: {}", path.display(), e));
            return None;
        }

        let archive_path = self.archive_path(&group.key);
        let archive = match self.packager.package(&path, &name, &archive_path) {
            Ok(()) => Some(archive_path),
            Err(e) => {
                tracing::warn!(artifact = %name, error = %e, "Failed to package archive");
                report.faults.push(format!(
                    "Failed to create archive {}: {}",
                    archive_path.display(),
                    e
                ));
                None
            }
        };

        if self.remove_sources {
            for name in &merged_names {
                if let Err(e) = source.remove(name) {
                    if e.kind() != ErrorKind::NotFound {
                        report.faults.push(format!(
                            "Failed to remove {}: {}",
                            source.path_of(name).display(),
                            e
                        ));
                    }
                }
            }
        }

        tracing::debug!(
            key = %group.key,
            artifact = %name,
            members = bodies.len(),
            "Merged group"
        );

        Some(MergedArtifact {
            key: group.key.clone(),
            name,
            path,
            archive,
            members_merged: bodies.len(),
        })
    }
}

/// Write through a temp file in the same directory, then rename into place
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    let result = fs::write(&temp_path, contents).and_then(|()| fs::rename(&temp_path, path));
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{KeyExtractor, NamingScheme};
    use crate::source::FsSourceDirectory;
    use tempfile::tempdir;

    fn records(dir: &Path, names: &[&str]) -> Vec<FileRecord> {
        let extractor = KeyExtractor::new(NamingScheme::Positional);
        names.iter().map(|n| extractor.extract(dir, n)).collect()
    }

    #[test]
    fn test_group_records_keeps_discovery_order() {
        let recs = records(
            Path::new("src"),
            &["b_gb_x_art_1.txt", "a_gb_x_art_1.txt", "short.txt", "b_GB_x_ART_2.txt"],
        );

        let groups = group_records(recs);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key.first(), "b");
        let members: Vec<_> = groups[0].members.iter().map(|m| m.raw_name.as_str()).collect();
        assert_eq!(members, ["b_gb_x_art_1.txt", "b_GB_x_ART_2.txt"]);
        assert_eq!(groups[1].members.len(), 1);
    }

    #[test]
    fn test_artifact_names_match_their_key_label() {
        let key = KeyExtractor::new(NamingScheme::Extended)
            .key_of("ABC_gb_0_art_0_0_ces_12.txt")
            .unwrap();

        assert!(is_artifact_of("ABC_GB_CES_ART_240506071500.txt", &key));
        assert!(is_artifact_of("ABC_GB_CES_ART_240506151500.txt", &key));
        assert!(!is_artifact_of("ABC_GB_CES_VOC_240506071500.txt", &key));
        assert!(!is_artifact_of("ABC_GB_CES_ART_.txt", &key));
        assert!(!is_artifact_of("ABC_GB_CES_ART_notes.txt", &key));
        assert!(!is_artifact_of("ABC_GB_CES_ART_240506071500.tar", &key));
    }

    #[test]
    fn test_join_bodies_separates_each_pair() {
        let merged = join_bodies(&["one", "two", "three"]);
        assert_eq!(
            String::from_utf8(merged).unwrap(),
            format!("one{sep}two{sep}three", sep = MERGE_SEPARATOR)
        );
        assert!(join_bodies::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_merge_round_trip_in_discovery_order() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        let names = ["k_gb_x_art_2.txt", "k_gb_x_art_1.txt", "k_gb_x_art_3.txt"];
        for (i, name) in names.iter().enumerate() {
            fs::write(source.join(name), format!("body {}", i)).unwrap();
        }

        let groups = group_records(records(&source, &names));
        let stage = MergeStage::new(dir.path().join("staging"), "240101071500");
        let report = stage.run(&FsSourceDirectory::new(&source), &groups).unwrap();

        assert_eq!(report.artifacts.len(), 1);
        let artifact = &report.artifacts[0];
        assert_eq!(artifact.name, "k_GB_x_ART_240101071500.txt");
        assert_eq!(artifact.members_merged, 3);
        assert_eq!(
            fs::read_to_string(&artifact.path).unwrap(),
            format!("body 0{sep}body 1{sep}body 2", sep = MERGE_SEPARATOR)
        );
        assert_eq!(
            artifact.archive.as_deref(),
            Some(dir.path().join("staging/k_GB_x_ART.tar").as_path())
        );
        assert_eq!(report.archives_written, 1);
        // Sources are retained by default
        assert!(source.join(names[0]).exists());
    }

    #[test]
    fn test_singleton_group_still_produces_artifact_and_archive() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("k_gb_x_art.txt"), "only").unwrap();

        let groups = group_records(records(dir.path(), &["k_gb_x_art.txt"]));
        let report = MergeStage::new(dir.path().join("staging"), "stamp")
            .run(&FsSourceDirectory::new(dir.path()), &groups)
            .unwrap();

        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(fs::read_to_string(&report.artifacts[0].path).unwrap(), "only");
        assert!(report.artifacts[0].archive.is_some());
    }

    #[test]
    fn test_vanished_member_is_skipped_and_rest_merges() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("k_gb_x_art_1.txt"), "kept").unwrap();

        let groups = group_records(records(dir.path(), &["k_gb_x_art_1.txt", "k_gb_x_art_2.txt"]));
        let report = MergeStage::new(dir.path().join("staging"), "stamp")
            .run(&FsSourceDirectory::new(dir.path()), &groups)
            .unwrap();

        assert_eq!(report.source_missing, vec!["k_gb_x_art_2.txt".to_string()]);
        assert_eq!(report.artifacts[0].members_merged, 1);
        assert_eq!(fs::read_to_string(&report.artifacts[0].path).unwrap(), "kept");
    }

    #[test]
    fn test_group_with_no_readable_member_produces_nothing() {
        let dir = tempdir().unwrap();
        let groups = group_records(records(dir.path(), &["k_gb_x_art_1.txt"]));

        let report = MergeStage::new(dir.path().join("staging"), "stamp")
            .run(&FsSourceDirectory::new(dir.path()), &groups)
            .unwrap();

        assert!(report.artifacts.is_empty());
        assert_eq!(report.archives_written, 0);
        assert_eq!(report.source_missing.len(), 1);
    }

    #[test]
    fn test_remove_sources_deletes_merged_members() {
        let dir = tempdir().unwrap();
        let names = ["k_gb_x_art_1.txt", "k_gb_x_art_2.txt"];
        for name in names {
            fs::write(dir.path().join(name), name).unwrap();
        }

        let groups = group_records(records(dir.path(), &names));
        MergeStage::new(dir.path().join("staging"), "stamp")
            .with_remove_sources(true)
            .run(&FsSourceDirectory::new(dir.path()), &groups)
            .unwrap();

        for name in names {
            assert!(!dir.path().join(name).exists());
        }
    }
}
