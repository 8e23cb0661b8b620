//! Application-facing API for the job queue system.
//!
//! This crate contains everything application code needs:
//! - Typed job definitions (emit, schedule, cancel, list, work)
//! - The idempotency gate for inbound events
//! - Configuration and startup

mod config;
mod error;
mod idempotency;
mod init;
mod jobs;

pub use config::AppConfig;
pub use error::{ConfigError, InitError, JobError};
pub use idempotency::IdempotencyGate;
pub use init::{init_job_queue, init_tracing};
pub use jobs::{JobDefinition, TypedJob};

// Re-export core types for convenience
pub use actors::{Engine, EngineConfig};
pub use queue_core::{
    ClaimOutcome, JobEvent, JobId, JobOptions, JobState, QueueConfig, Schedule, ScheduleOptions,
};
