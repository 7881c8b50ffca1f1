use cdr_router::config::RouterConfig;
use cdr_router::{telemetry, Orchestrator};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match RouterConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = telemetry::init(&config.telemetry) {
        eprintln!("failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    match Orchestrator::new(config).run().await {
        Ok(summary) => {
            if !summary.faults.is_empty() {
                tracing::warn!(faults = summary.faults.len(), "Run finished with per-file faults");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Run aborted");
            ExitCode::FAILURE
        }
    }
}
