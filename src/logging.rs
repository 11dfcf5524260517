use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt};

/// Overrides the configured level when set, e.g. `HASHGRAPH_LOG=hashgraph=debug`.
pub const LOG_ENV: &str = "HASHGRAPH_LOG";
pub const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter `{filter}`: {reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("logging already initialized")]
    AlreadyInitialized,
}

pub fn resolve_filter(configured: Option<&str>) -> String {
    std::env::var(LOG_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| configured.map(ToOwned::to_owned))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

/// Installs the global subscriber. Logs go to stderr; stdout carries JSON.
pub fn init_logging(configured: Option<&str>) -> Result<(), LoggingError> {
    let filter = resolve_filter(configured);
    let env_filter = EnvFilter::try_new(&filter).map_err(|err| LoggingError::InvalidFilter {
        filter: filter.clone(),
        reason: err.to_string(),
    })?;
    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}
