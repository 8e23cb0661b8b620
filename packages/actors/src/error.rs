//! Engine error type.

use db::DbError;
use queue_core::ScheduleError;

/// Errors surfaced to producers calling the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Failed to enqueue job on '{queue}': {reason}")]
    EnqueueFailed { queue: String, reason: String },

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(#[from] ScheduleError),

    #[error("Queue '{0}' already has a registered handler")]
    HandlerAlreadyRegistered(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Engine is shut down")]
    Shutdown,
}

impl<T> From<ractor::MessagingErr<T>> for EngineError {
    fn from(err: ractor::MessagingErr<T>) -> Self {
        EngineError::Actor(err.to_string())
    }
}
