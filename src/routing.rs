//! Routing Policy
//!
//! Pure decision from a classified record (or merged artifact) and the
//! whitelist to a destination directory. Nothing here touches the filesystem.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::classify::{Classification, ClassificationKey, DomainWhitelist, FileRecord};
use crate::merge::MergedArtifact;

/// How valid destinations are laid out beneath the valid root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteLayout {
    /// One directory level per key field, then the tag
    #[default]
    KeyTree,
    /// Only the first key field; used for merged-artifact runs
    FirstField,
}

impl std::str::FromStr for RouteLayout {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "key_tree" | "tree" => Ok(Self::KeyTree),
            "first_field" | "first" => Ok(Self::FirstField),
            other => Err(format!("unknown route layout '{}'", other)),
        }
    }
}

/// Where a single file goes. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    /// Current location of the body
    pub source: PathBuf,
    /// Directory the file is moved into
    pub destination_dir: PathBuf,
    /// Name the file keeps at the destination
    pub file_name: String,
    pub is_exception: bool,
    /// Key of the routed file, absent for exceptions
    pub key: Option<ClassificationKey>,
    /// Source files this move accounts for (more than one for merged artifacts)
    pub represents: usize,
}

impl RoutingDecision {
    pub fn destination_path(&self) -> PathBuf {
        self.destination_dir.join(&self.file_name)
    }
}

/// Maps keys onto the destination tree
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    valid_root: PathBuf,
    exception_dir: PathBuf,
    layout: RouteLayout,
}

impl RoutingPolicy {
    pub fn new(valid_root: PathBuf, exception_dir: PathBuf, layout: RouteLayout) -> Self {
        Self {
            valid_root,
            exception_dir,
            layout,
        }
    }

    pub fn valid_root(&self) -> &Path {
        &self.valid_root
    }

    pub fn exception_dir(&self) -> &Path {
        &self.exception_dir
    }

    /// Directory a validated key routes to
    pub fn destination_for(&self, key: &ClassificationKey) -> PathBuf {
        match self.layout {
            RouteLayout::KeyTree => key
                .segments()
                .fold(self.valid_root.clone(), |path, segment| path.join(segment)),
            RouteLayout::FirstField => self.valid_root.join(key.first()),
        }
    }

    /// Route one source record
    pub fn decide(&self, record: &FileRecord, whitelist: &DomainWhitelist) -> RoutingDecision {
        let key = match &record.classification {
            Classification::Classified(key) if whitelist.contains(key) => Some(key.clone()),
            Classification::Classified(key) => {
                tracing::debug!(
                    file = %record.raw_name,
                    key = %key,
                    position = ?whitelist.first_miss(key),
                    "Key not in domain whitelist"
                );
                None
            }
            Classification::Excepted => {
                tracing::debug!(file = %record.raw_name, "Malformed filename");
                None
            }
        };

        self.build(record.source.clone(), record.raw_name.clone(), key, 1)
    }

    /// Route a merged artifact by its group key
    pub fn decide_artifact(
        &self,
        artifact: &MergedArtifact,
        whitelist: &DomainWhitelist,
    ) -> RoutingDecision {
        let key = whitelist
            .contains(&artifact.key)
            .then(|| artifact.key.clone());

        self.build(
            artifact.path.clone(),
            artifact.name.clone(),
            key,
            artifact.members_merged,
        )
    }

    fn build(
        &self,
        source: PathBuf,
        file_name: String,
        key: Option<ClassificationKey>,
        represents: usize,
    ) -> RoutingDecision {
        let (destination_dir, is_exception) = match &key {
            Some(key) => (self.destination_for(key), false),
            None => (self.exception_dir.clone(), true),
        };

        RoutingDecision {
            source,
            destination_dir,
            file_name,
            is_exception,
            key,
            represents,
        }
    }
}
