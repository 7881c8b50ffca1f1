//! Concurrent Mover
//!
//! Executes routing decisions against the filesystem with a bounded pool of
//! workers. Every decision runs its blocking I/O inside `spawn_blocking`;
//! a semaphore caps how many run at once.
//!
//! Shared state lives in one `MoverShared` handle cloned into each worker:
//! per-directory locks, the audit log, and the immutable configuration.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::audit::AuditLog;
use super::locks::{self, PathLocks};
use crate::classify::{ClassificationKey, KeyExtractor, NamingScheme, TEXT_SUFFIX};
use crate::merge::{is_artifact_of, MERGE_SEPARATOR};
use crate::routing::RoutingDecision;

/// Policy for a same-named file already present at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Never overwrite. The source stays put, or goes to the exception
    /// directory when `redirect_to_exception` is set.
    OverwriteReject { redirect_to_exception: bool },
    /// Append incoming bodies into the existing artifact and compact the
    /// destination down to a single text artifact after each move
    AppendMerge,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self::OverwriteReject {
            redirect_to_exception: false,
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" | "overwrite_reject" => Ok(Self::OverwriteReject {
                redirect_to_exception: false,
            }),
            "reject_to_exception" | "redirect" => Ok(Self::OverwriteReject {
                redirect_to_exception: true,
            }),
            "append_merge" | "append" | "merge" => Ok(Self::AppendMerge),
            other => Err(format!("unknown conflict policy '{}'", other)),
        }
    }
}

/// Which artifacts in a destination directory are compacted together
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeScope {
    /// Every text artifact in the directory
    #[default]
    Directory,
    /// Only artifacts of the incoming file's key: names that decode to it,
    /// plus merged artifacts labelled with it
    SameKey,
}

impl std::str::FromStr for MergeScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "directory" | "dir" => Ok(Self::Directory),
            "same_key" | "key" => Ok(Self::SameKey),
            other => Err(format!("unknown merge scope '{}'", other)),
        }
    }
}

/// Configuration for the move stage
#[derive(Debug, Clone)]
pub struct MoverConfig {
    pub conflict_policy: ConflictPolicy,
    pub merge_scope: MergeScope,
    /// Upper bound on concurrently executing moves
    pub max_workers: usize,
    /// Scheme used to decode artifact names for `MergeScope::SameKey`
    pub scheme: NamingScheme,
    /// Redirect target for `OverwriteReject { redirect_to_exception: true }`
    pub exception_dir: PathBuf,
}

impl MoverConfig {
    pub fn new(exception_dir: PathBuf) -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            merge_scope: MergeScope::default(),
            max_workers: 10,
            scheme: NamingScheme::default(),
            exception_dir,
        }
    }
}

/// Outcome of executing one routing decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MoveOutcome {
    /// Placed under a valid destination and logged
    Routed {
        /// File now holding the body (may differ from the decision's target
        /// after append-merge compaction)
        destination: PathBuf,
        conflicts_resolved: usize,
        /// Non-fatal problem after the move (audit or compaction failure)
        warning: Option<String>,
    },
    /// Placed in the exception directory; never logged
    Excepted { destination: PathBuf },
    /// Source vanished before the move
    SourceMissing,
    /// A same-named artifact blocked the move; the source stays in place
    Rejected { reason: String },
    /// The move failed; the source stays in place
    Failed { error: String },
}

/// A decision paired with its outcome
#[derive(Debug, Clone)]
pub struct MoveResult {
    pub decision: RoutingDecision,
    pub outcome: MoveOutcome,
}

/// Outcomes of a whole move stage, in submission order
#[derive(Debug, Clone, Default)]
pub struct MoveReport {
    pub results: Vec<MoveResult>,
}

impl MoveReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Total conflicts resolved by append-merge
    pub fn conflicts_resolved(&self) -> usize {
        self.results
            .iter()
            .map(|r| match &r.outcome {
                MoveOutcome::Routed {
                    conflicts_resolved, ..
                } => *conflicts_resolved,
                _ => 0,
            })
            .sum()
    }
}

/// State shared by every worker of one run
#[derive(Debug)]
pub struct MoverShared {
    pub config: MoverConfig,
    pub locks: PathLocks,
    pub audit: AuditLog,
}

/// Bounded parallel executor for routing decisions
#[derive(Debug, Clone)]
pub struct ConcurrentMover {
    shared: Arc<MoverShared>,
}

impl ConcurrentMover {
    pub fn new(config: MoverConfig, audit: AuditLog) -> Self {
        Self {
            shared: Arc::new(MoverShared {
                config,
                locks: PathLocks::new(),
                audit,
            }),
        }
    }

    pub fn shared(&self) -> &Arc<MoverShared> {
        &self.shared
    }

    /// Execute every decision and collect all outcomes.
    ///
    /// A failing or panicking worker never stops its siblings; the queue
    /// always drains.
    pub async fn execute(&self, decisions: Vec<RoutingDecision>) -> MoveReport {
        let total = decisions.len();
        if total == 0 {
            return MoveReport::default();
        }

        let max_workers = self.shared.config.max_workers.max(1);
        let semaphore = Arc::new(Semaphore::new(max_workers));
        let mut futures = FuturesUnordered::new();

        tracing::debug!(decisions = total, max_workers, "Starting move stage");

        for (index, decision) in decisions.iter().cloned().enumerate() {
            let sem = Arc::clone(&semaphore);
            let shared = Arc::clone(&self.shared);

            futures.push(tokio::spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            MoveOutcome::Failed {
                                error: "Worker pool closed".to_string(),
                            },
                        )
                    }
                };

                let outcome = tokio::task::spawn_blocking(move || route_file(&decision, &shared))
                    .await
                    .unwrap_or_else(|e| MoveOutcome::Failed {
                        error: format!("Worker task failed: {}", e),
                    });

                (index, outcome)
            }));
        }

        let mut outcomes: Vec<Option<MoveOutcome>> = vec![None; total];
        while let Some(task_result) = futures.next().await {
            match task_result {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => tracing::warn!(error = %e, "Move task panicked"),
            }
        }

        let results: Vec<MoveResult> = decisions
            .into_iter()
            .zip(outcomes)
            .map(|(decision, outcome)| MoveResult {
                outcome: outcome.unwrap_or_else(|| MoveOutcome::Failed {
                    error: "Worker task failed before reporting".to_string(),
                }),
                decision,
            })
            .collect();

        for result in &results {
            match &result.outcome {
                MoveOutcome::SourceMissing => tracing::warn!(
                    file = %result.decision.source.display(),
                    "Source file does not exist"
                ),
                MoveOutcome::Rejected { reason } => {
                    tracing::warn!(file = %result.decision.file_name, %reason, "Move rejected")
                }
                MoveOutcome::Failed { error } => {
                    tracing::warn!(file = %result.decision.file_name, %error, "Move failed")
                }
                MoveOutcome::Routed {
                    warning: Some(warning),
                    ..
                } => tracing::warn!(file = %result.decision.file_name, %warning, "Routed with warning"),
                _ => {}
            }
        }

        MoveReport { results }
    }
}

/// Internal result of placing a file into one directory
enum Placement {
    Moved {
        destination: PathBuf,
        conflicts: usize,
        warning: Option<String>,
    },
    Collision(PathBuf),
    Missing,
    Failed(String),
}

/// Execute one decision (blocking)
pub fn route_file(decision: &RoutingDecision, shared: &MoverShared) -> MoveOutcome {
    let placement = place(
        &decision.source,
        &decision.destination_dir,
        &decision.file_name,
        decision.is_exception,
        decision.key.as_ref(),
        shared,
    );

    let placement = match placement {
        Placement::Collision(existing) => match shared.config.conflict_policy {
            ConflictPolicy::OverwriteReject {
                redirect_to_exception: true,
            } if !decision.is_exception => {
                tracing::debug!(
                    file = %decision.file_name,
                    existing = %existing.display(),
                    "Destination exists, redirecting to exception directory"
                );
                let redirected = place(
                    &decision.source,
                    &shared.config.exception_dir,
                    &decision.file_name,
                    true,
                    None,
                    shared,
                );
                return match redirected {
                    Placement::Moved { destination, .. } => MoveOutcome::Excepted { destination },
                    Placement::Collision(existing) => MoveOutcome::Rejected {
                        reason: format!(
                            "Destination and exception copies already exist: {}",
                            existing.display()
                        ),
                    },
                    Placement::Missing => MoveOutcome::SourceMissing,
                    Placement::Failed(error) => MoveOutcome::Failed { error },
                };
            }
            _ => {
                return MoveOutcome::Rejected {
                    reason: format!("Destination already exists: {}", existing.display()),
                }
            }
        },
        other => other,
    };

    match placement {
        Placement::Moved {
            destination,
            conflicts,
            warning,
        } => {
            if decision.is_exception {
                tracing::debug!(file = %decision.file_name, "Moved to exception directory");
                return MoveOutcome::Excepted { destination };
            }

            let mut warning = warning;
            if let Err(e) = shared.audit.append(&decision.file_name) {
                let audit_warning = format!("Failed to append audit entry: {}", e);
                warning = Some(match warning {
                    Some(previous) => format!("{}; {}", previous, audit_warning),
                    None => audit_warning,
                });
            }

            tracing::debug!(
                file = %decision.file_name,
                destination = %destination.display(),
                conflicts,
                "Moved file"
            );

            MoveOutcome::Routed {
                destination,
                conflicts_resolved: conflicts,
                warning,
            }
        }
        Placement::Missing => MoveOutcome::SourceMissing,
        Placement::Failed(error) => MoveOutcome::Failed { error },
        Placement::Collision(existing) => MoveOutcome::Rejected {
            reason: format!("Destination already exists: {}", existing.display()),
        },
    }
}

/// Move `source` into `dir` under the directory's lock
fn place(
    source: &Path,
    dir: &Path,
    file_name: &str,
    is_exception: bool,
    key: Option<&ClassificationKey>,
    shared: &MoverShared,
) -> Placement {
    let lock = shared.locks.lock_for(dir);
    let _guard = locks::acquire(&lock);

    if let Err(e) = fs::create_dir_all(dir) {
        return Placement::Failed(format!(
            "Failed to create destination directory {}: {}",
            dir.display(),
            e
        ));
    }

    match fs::symlink_metadata(source) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Placement::Missing,
        Err(e) => {
            return Placement::Failed(format!("Failed to inspect {}: {}", source.display(), e))
        }
    }

    let compacting =
        shared.config.conflict_policy == ConflictPolicy::AppendMerge && !is_exception;
    let destination = dir.join(file_name);
    let mut conflicts = 0;

    if destination.exists() {
        if !compacting {
            return Placement::Collision(destination);
        }
        if let Err(e) = append_into(&destination, source).and_then(|()| fs::remove_file(source)) {
            return Placement::Failed(format!(
                "Failed to merge {} into {}: {}",
                source.display(),
                destination.display(),
                e
            ));
        }
        conflicts += 1;
    } else {
        match perform_move(source, &destination) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound && !source.exists() => {
                return Placement::Missing
            }
            Err(e) => {
                return Placement::Failed(format!(
                    "Failed to move {} to {}: {}",
                    source.display(),
                    destination.display(),
                    e
                ))
            }
        }
    }

    let mut warning = None;
    let mut holder = destination.clone();
    if compacting {
        let extractor = KeyExtractor::new(shared.config.scheme);
        let scope_key = match shared.config.merge_scope {
            MergeScope::Directory => None,
            MergeScope::SameKey => key,
        };
        match compact_directory(dir, scope_key, &extractor) {
            Ok(Some((survivor, folds))) => {
                conflicts += folds;
                if !holder.exists() {
                    holder = survivor;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warning = Some(format!("Failed to compact {}: {}", dir.display(), e));
            }
        }
    }

    Placement::Moved {
        destination: holder,
        conflicts,
        warning,
    }
}

/// Rename, falling back to copy through a temp name when rename fails
/// (for example across filesystems). The final name never holds a partial
/// file.
fn perform_move(source: &Path, destination: &Path) -> io::Result<()> {
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }

    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path =
        destination.with_file_name(format!(".{}.{}.partial", file_name, Uuid::new_v4()));

    let copied = fs::copy(source, &temp_path).and_then(|_| fs::rename(&temp_path, destination));
    if let Err(e) = copied {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::remove_file(source)
}

/// Append the separator and `source`'s body to `target`
fn append_into(target: &Path, source: &Path) -> io::Result<()> {
    let mut body = Vec::new();
    File::open(source)?.read_to_end(&mut body)?;

    let mut chunk = Vec::with_capacity(MERGE_SEPARATOR.len() + body.len());
    chunk.extend_from_slice(MERGE_SEPARATOR.as_bytes());
    chunk.extend_from_slice(&body);

    let mut file = OpenOptions::new().append(true).open(target)?;
    file.write_all(&chunk)?;
    file.sync_data()
}

/// Text artifacts in `dir` eligible for compaction, sorted by name
fn text_artifacts(
    dir: &Path,
    scope_key: Option<&ClassificationKey>,
    extractor: &KeyExtractor,
) -> io::Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(TEXT_SUFFIX) || name.starts_with('.') {
            continue;
        }
        if let Some(key) = scope_key {
            if extractor.key_of(&name).as_ref() != Some(key) && !is_artifact_of(&name, key) {
                continue;
            }
        }
        names.push(name);
    }

    names.sort();
    Ok(names)
}

/// Fold every eligible artifact into the lexicographically first one.
///
/// Returns the survivor and the number of folds, or `None` when fewer than
/// two artifacts were eligible.
fn compact_directory(
    dir: &Path,
    scope_key: Option<&ClassificationKey>,
    extractor: &KeyExtractor,
) -> io::Result<Option<(PathBuf, usize)>> {
    let names = text_artifacts(dir, scope_key, extractor)?;
    if names.len() < 2 {
        return Ok(None);
    }

    let survivor = dir.join(&names[0]);
    let mut folds = 0;

    for name in &names[1..] {
        let other = dir.join(name);
        append_into(&survivor, &other)?;
        fs::remove_file(&other)?;
        folds += 1;
        tracing::debug!(
            merged = %other.display(),
            into = %survivor.display(),
            "Merged destination artifact"
        );
    }

    Ok(Some((survivor, folds)))
}
