//! Run Orchestrator
//!
//! Drives one batch through every stage. Each stage is a barrier: discovery
//! (listing and domain load side by side), validation and the optional
//! merge, routing, the move fan-out, then the summary.

pub mod stamp;
pub mod summary;

pub use stamp::*;
pub use summary::*;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::classify::{DomainWhitelist, FileRecord, KeyExtractor};
use crate::config::{DomainPolicy, RouterConfig};
use crate::error::{Result, RouterError};
use crate::execution::{AuditLog, ConcurrentMover, MoverConfig};
use crate::merge::{group_records, write_atomic, MergeStage};
use crate::routing::{RoutingDecision, RoutingPolicy};
use crate::source::{FsSourceDirectory, SourceDirectory};

/// Runs batches according to one configuration
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: RouterConfig,
    source: Arc<dyn SourceDirectory>,
    stamp: Option<RunStamp>,
}

impl Orchestrator {
    pub fn new(config: RouterConfig) -> Self {
        let source: Arc<dyn SourceDirectory> =
            Arc::new(FsSourceDirectory::new(config.source_dir.clone()));
        Self {
            config,
            source,
            stamp: None,
        }
    }

    /// Read the batch from another source directory implementation
    pub fn with_source(mut self, source: Arc<dyn SourceDirectory>) -> Self {
        self.source = source;
        self
    }

    /// Pin the batch stamp instead of deriving it from the clock
    pub fn with_stamp(mut self, stamp: RunStamp) -> Self {
        self.stamp = Some(stamp);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Process the whole source directory once.
    ///
    /// Only configuration faults return `Err`; everything that goes wrong
    /// with an individual file is counted in the summary.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let config = &self.config;

        if !config.valid_root.is_dir() {
            tracing::error!(
                valid_root = %config.valid_root.display(),
                "Destination root does not exist, aborting run"
            );
            return Err(RouterError::DestinationRootMissing(config.valid_root.clone()));
        }

        let stamp = self.stamp.clone().unwrap_or_else(RunStamp::now);
        let valid_root = if config.run_folders {
            stamp.run_folder(&config.valid_root)
        } else {
            config.valid_root.clone()
        };
        let exception_dir = config.exception_dir_under(&valid_root);

        // Discovery: listing + extraction alongside the domain load
        let extractor = KeyExtractor::new(config.naming_scheme);
        let listing = {
            let source = Arc::clone(&self.source);
            tokio::task::spawn_blocking(move || discover(source.as_ref(), &extractor))
        };
        let domain = {
            let path = config.domain_file.clone();
            let scheme = config.naming_scheme;
            tokio::task::spawn_blocking(move || DomainWhitelist::load(&path, scheme))
        };
        let (listing, domain) = tokio::join!(listing, domain);

        let (records, source_bytes) = match listing? {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(error = %e, "Source directory unavailable, aborting run");
                return Err(e);
            }
        };

        let whitelist = match domain? {
            Ok(whitelist) => whitelist,
            Err(e) => match config.domain_policy {
                DomainPolicy::Abort => {
                    tracing::error!(error = %e, "Domain reference unavailable, aborting run");
                    return Err(e);
                }
                DomainPolicy::FailClosed => {
                    tracing::warn!(
                        error = %e,
                        "Domain reference unavailable, continuing with an empty whitelist"
                    );
                    DomainWhitelist::empty(config.naming_scheme)
                }
            },
        };
        if whitelist.is_empty() {
            tracing::warn!("Domain whitelist is empty; every file routes to the exception directory");
        }

        tracing::info!(
            stamp = %stamp,
            files = records.len(),
            bytes = source_bytes,
            domain_sets = ?whitelist.set_sizes(),
            "Discovery complete"
        );

        // Nothing below may touch the tree before the audit log is writable
        let audit = if records.is_empty() {
            None
        } else {
            match AuditLog::open(&config.audit_log) {
                Ok(audit) => Some(audit),
                Err(e) => {
                    tracing::error!(
                        audit_log = %config.audit_log.display(),
                        error = %e,
                        "Audit log unavailable, aborting run"
                    );
                    return Err(e.into());
                }
            }
        };

        let mut summary = RunSummary::new(stamp.as_str(), records.len());
        summary.source_bytes = source_bytes;

        // Validation, optional merge, routing
        let policy = RoutingPolicy::new(valid_root.clone(), exception_dir.clone(), config.route_layout);
        let decisions: Vec<RoutingDecision> = if config.merge.enabled {
            let (valid, invalid): (Vec<FileRecord>, Vec<FileRecord>) = records
                .into_iter()
                .partition(|record| record.key().is_some_and(|key| whitelist.contains(key)));

            let mut decisions: Vec<RoutingDecision> = invalid
                .iter()
                .map(|record| policy.decide(record, &whitelist))
                .collect();

            let groups = group_records(valid);
            let stage = MergeStage::new(config.merge.staging_dir.join(stamp.as_str()), stamp.as_str())
                .with_remove_sources(config.merge.remove_sources);
            let source = Arc::clone(&self.source);
            let report =
                tokio::task::spawn_blocking(move || stage.run(source.as_ref(), &groups)).await??;
            summary.record_merge(&report);

            decisions.extend(
                report
                    .artifacts
                    .iter()
                    .map(|artifact| policy.decide_artifact(artifact, &whitelist)),
            );
            decisions
        } else {
            records
                .iter()
                .map(|record| policy.decide(record, &whitelist))
                .collect()
        };

        // Fan out
        if let Some(audit) = audit.filter(|_| !decisions.is_empty()) {
            let mover = ConcurrentMover::new(
                MoverConfig {
                    conflict_policy: config.conflict_policy,
                    merge_scope: config.merge_scope,
                    max_workers: config.max_workers,
                    scheme: config.naming_scheme,
                    exception_dir: exception_dir.clone(),
                },
                audit,
            );

            let report = mover.execute(decisions).await;
            for result in &report.results {
                summary.record_move(result);
            }
            summary.audit_entries = mover.shared().audit.appended();
        }

        summary.census = {
            let valid_root = valid_root.clone();
            let source_dir = self.source.root().to_path_buf();
            tokio::task::spawn_blocking(move || Census::take(&valid_root, &exception_dir, &source_dir))
                .await?
        };
        summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if !summary.is_balanced() {
            tracing::warn!(
                discovered = summary.discovered,
                accounted = summary.accounted(),
                "Outcome totals do not match discovered files"
            );
        }

        tracing::info!(
            discovered = summary.discovered,
            routed = summary.routed,
            routed_sources = summary.routed_sources,
            exceptioned = summary.exceptioned,
            conflicts_resolved = summary.merge_conflicts_resolved,
            missing = summary.source_missing,
            rejected = summary.rejected,
            failed = summary.failed,
            elapsed_ms = summary.elapsed_ms,
            "Run complete"
        );

        if let Some(path) = &config.summary_path {
            write_summary(path, &summary)?;
        }

        Ok(summary)
    }
}

/// List the source directory, total its size and decode every name
fn discover(
    source: &dyn SourceDirectory,
    extractor: &KeyExtractor,
) -> Result<(Vec<FileRecord>, u64)> {
    let names = source
        .list_names()
        .map_err(|e| RouterError::SourceUnavailable {
            path: source.root().to_path_buf(),
            source: e,
        })?;
    let bytes = source.total_bytes(&names);
    Ok((extractor.extract_all(source.root(), &names), bytes))
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_vec_pretty(summary)?;
    write_atomic(path, &json)?;
    Ok(())
}
