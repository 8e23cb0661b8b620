//! Errors surfaced to application code.

use actors::EngineError;
use db::DbError;

/// Errors from a job definition.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The engine accepted the send but created no job, e.g. because a live
    /// job already holds the singleton key.
    #[error("Failed to emit job on '{0}'")]
    EmitFailed(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Invalid process configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown timezone '{0}'")]
    InvalidTimezone(String),

    #[error("Invalid poll interval '{0}': expected milliseconds")]
    InvalidPollInterval(String),

    #[error("{0} is set but {1} is not")]
    IncompleteCredentials(&'static str, &'static str),
}

/// Startup failures.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database initialisation failed: {0}")]
    Database(#[from] DbError),

    #[error("Engine failed to start: {0}")]
    Engine(#[from] EngineError),
}
