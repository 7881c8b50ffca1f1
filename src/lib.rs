//! Filename-driven router for CDR text batches.
//!
//! Decodes a classification key from each file name, checks it against the
//! domain whitelist, optionally merges same-key files into archived
//! artifacts, and moves everything into the destination tree or the
//! exception bucket.

pub mod classify;
pub mod config;
pub mod error;
pub mod execution;
pub mod merge;
pub mod routing;
pub mod run;
pub mod source;
pub mod telemetry;

pub use config::RouterConfig;
pub use error::{Result, RouterError};
pub use run::{Orchestrator, RunSummary};
