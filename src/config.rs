//! Router configuration.
//!
//! Values come from `CDR_*` environment variables (a `.env` file is loaded
//! first when present). Unset variables fall back to the batch layout
//! defaults.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::classify::NamingScheme;
use crate::execution::{ConflictPolicy, MergeScope};
use crate::routing::RouteLayout;

/// What to do when the domain reference file cannot be read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DomainPolicy {
    /// Stop the run with a configuration error
    #[default]
    Abort,
    /// Continue with an empty whitelist, sending every file to exception
    FailClosed,
}

impl FromStr for DomainPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "fail_closed" | "failclosed" | "closed" => Ok(Self::FailClosed),
            other => Err(format!("unknown domain policy '{}'", other)),
        }
    }
}

/// Top-level configuration for one routing run.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub source_dir: PathBuf,
    /// Root of the valid destination tree; must exist before the run
    pub valid_root: PathBuf,
    /// Exception bucket. Relative paths resolve under the effective valid root.
    pub exception_dir: PathBuf,
    pub domain_file: PathBuf,
    pub audit_log: PathBuf,
    pub naming_scheme: NamingScheme,
    pub route_layout: RouteLayout,
    pub conflict_policy: ConflictPolicy,
    pub merge_scope: MergeScope,
    pub domain_policy: DomainPolicy,
    pub max_workers: usize,
    pub merge: MergeConfig,
    /// Route into `valid_root/<stamp>/<shift>` instead of `valid_root`
    pub run_folders: bool,
    /// Where to write the JSON run summary, if anywhere
    pub summary_path: Option<PathBuf>,
    pub telemetry: TelemetryConfig,
}

/// Merge/archive stage controls.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub enabled: bool,
    pub staging_dir: PathBuf,
    /// Delete member sources once their bodies are in a staged artifact
    pub remove_sources: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            staging_dir: PathBuf::from("lab/metadata"),
            remove_sources: false,
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "warn,cdr_router=info".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("CDR_MAX_WORKERS must be at least 1")]
    NoWorkers,
}

impl RouterConfig {
    /// Configuration with defaults for everything but the four core paths
    pub fn new(
        source_dir: impl Into<PathBuf>,
        valid_root: impl Into<PathBuf>,
        domain_file: impl Into<PathBuf>,
        audit_log: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            valid_root: valid_root.into(),
            exception_dir: PathBuf::from("_Exception"),
            domain_file: domain_file.into(),
            audit_log: audit_log.into(),
            naming_scheme: NamingScheme::default(),
            route_layout: RouteLayout::default(),
            conflict_policy: ConflictPolicy::default(),
            merge_scope: MergeScope::default(),
            domain_policy: DomainPolicy::default(),
            max_workers: 10,
            merge: MergeConfig::default(),
            run_folders: false,
            summary_path: None,
            telemetry: TelemetryConfig::default(),
        }
    }

    /// Load `.env` (if present) and read `CDR_*` variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |key: &str, default: &str| {
            PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()))
        };

        let mut config = Self::new(
            path("CDR_SOURCE_DIR", "txtFiles"),
            path("CDR_VALID_ROOT", "destFolders"),
            path("CDR_DOMAIN_FILE", "input/domain_file.txt"),
            path("CDR_AUDIT_LOG", "resource/processed_files_log.txt"),
        );
        config.exception_dir = path("CDR_EXCEPTION_DIR", "_Exception");

        if let Some(value) = lookup("CDR_NAMING_SCHEME") {
            config.naming_scheme = parse("CDR_NAMING_SCHEME", &value)?;
        }
        if let Some(value) = lookup("CDR_ROUTE_LAYOUT") {
            config.route_layout = parse("CDR_ROUTE_LAYOUT", &value)?;
        }
        if let Some(value) = lookup("CDR_CONFLICT_POLICY") {
            config.conflict_policy = parse("CDR_CONFLICT_POLICY", &value)?;
        }
        if let Some(value) = lookup("CDR_MERGE_SCOPE") {
            config.merge_scope = parse("CDR_MERGE_SCOPE", &value)?;
        }
        if let Some(value) = lookup("CDR_DOMAIN_POLICY") {
            config.domain_policy = parse("CDR_DOMAIN_POLICY", &value)?;
        }
        if let Some(value) = lookup("CDR_MAX_WORKERS") {
            config.max_workers = value
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "CDR_MAX_WORKERS",
                    value: value.clone(),
                    reason: e.to_string(),
                })?;
        }
        if let Some(value) = lookup("CDR_MERGE") {
            config.merge.enabled = parse_flag("CDR_MERGE", &value)?;
        }
        if let Some(value) = lookup("CDR_MERGE_STAGING_DIR") {
            config.merge.staging_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("CDR_MERGE_REMOVE_SOURCES") {
            config.merge.remove_sources = parse_flag("CDR_MERGE_REMOVE_SOURCES", &value)?;
        }
        if let Some(value) = lookup("CDR_RUN_FOLDERS") {
            config.run_folders = parse_flag("CDR_RUN_FOLDERS", &value)?;
        }
        config.summary_path = lookup("CDR_SUMMARY_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        if let Some(value) = lookup("CDR_LOG_LEVEL") {
            config.telemetry.log_level = value;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    /// Exception directory for a run whose valid tree hangs off `valid_root`
    pub fn exception_dir_under(&self, valid_root: &Path) -> PathBuf {
        if self.exception_dir.is_absolute() {
            self.exception_dir.clone()
        } else {
            valid_root.join(&self.exception_dir)
        }
    }

    pub fn with_exception_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exception_dir = dir.into();
        self
    }

    pub fn with_naming_scheme(mut self, scheme: NamingScheme) -> Self {
        self.naming_scheme = scheme;
        self
    }

    pub fn with_route_layout(mut self, layout: RouteLayout) -> Self {
        self.route_layout = layout;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_merge_scope(mut self, scope: MergeScope) -> Self {
        self.merge_scope = scope;
        self
    }

    pub fn with_domain_policy(mut self, policy: DomainPolicy) -> Self {
        self.domain_policy = policy;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_merge(mut self, staging_dir: impl Into<PathBuf>, remove_sources: bool) -> Self {
        self.merge = MergeConfig {
            enabled: true,
            staging_dir: staging_dir.into(),
            remove_sources,
        };
        self
    }

    pub fn with_run_folders(mut self, enabled: bool) -> Self {
        self.run_folders = enabled;
        self
    }

    pub fn with_summary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary_path = Some(path.into());
        self
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr<Err = String>,
{
    value.parse::<T>().map_err(|reason| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason,
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
