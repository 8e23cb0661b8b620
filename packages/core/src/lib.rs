//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job and JobState for work items
//! - Queue and QueueConfig for job lanes
//! - Schedule for recurring triggers
//! - ProcessedEvent for idempotent event handling
//! - Events for lifecycle notifications

mod events;
mod job;
mod options;
mod processed;
mod queue;
mod schedule;

pub use events::JobEvent;
pub use job::{FailureOutcome, Job, JobId, JobPhase, JobResult, JobState};
pub use options::{JobOptions, ScheduleOptions, StartAfter};
pub use processed::{ClaimOutcome, ProcessedEvent};
pub use queue::{Queue, QueueConfig, QueueStats};
pub use schedule::{Schedule, ScheduleError, parse_cron, parse_timezone};
