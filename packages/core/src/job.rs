//! Job domain types for work items in the queue.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{JobOptions, QueueConfig, StartAfter};

/// Unique identifier for a job (UUIDv7, so ids sort by creation time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persistent state of a job.
///
/// Transitions only move forward:
/// `created -> active -> (completed | failed | retry -> active ...)`, and
/// `created`/`retry` may also move to `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Retry,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// States a dispatcher may claim from.
    pub const ELIGIBLE: [JobState; 2] = [JobState::Created, JobState::Retry];

    /// States a job can be cancelled from.
    pub const CANCELLABLE: [JobState; 2] = [JobState::Created, JobState::Retry];

    /// States shown as "live" to application code.
    pub const LIVE: [JobState; 2] = [JobState::Created, JobState::Active];

    /// Terminal states; nothing moves a job out of these.
    pub const TERMINAL: [JobState; 3] = [JobState::Completed, JobState::Failed, JobState::Cancelled];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Retry => "retry",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Check if the job is waiting for a dispatcher.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Created | JobState::Retry)
    }

    /// Collapse the storage state into the coarser lifecycle phase.
    pub fn phase(&self) -> JobPhase {
        match self {
            JobState::Created | JobState::Retry => JobPhase::Pending,
            JobState::Active => JobPhase::Running,
            JobState::Completed => JobPhase::Done,
            JobState::Failed => JobPhase::Dead,
            JobState::Cancelled => JobPhase::Cancelled,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobState::Created),
            "retry" => Ok(JobState::Retry),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

/// Lifecycle phase as seen by application code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Pending,
    Running,
    Done,
    Dead,
    Cancelled,
}

/// Result of a completed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Human-readable summary of the result.
    pub summary: String,
    /// Optional structured output data as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl JobResult {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            output: None,
        }
    }

    pub fn with_output(summary: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            summary: summary.into(),
            output: Some(output),
        }
    }
}

/// What happens to an active job after its handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to `retry`, eligible again at `start_after`.
    Retry {
        retry_count: u32,
        start_after: DateTime<Utc>,
    },
    /// Retries exhausted; terminally `failed`.
    Failed,
}

/// A job represents a unit of work to be executed by the queue system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// The queue (lane) this job belongs to.
    pub queue_name: String,
    /// Job payload as JSON, opaque to the engine.
    pub payload: serde_json::Value,
    /// Current state.
    pub state: JobState,
    /// Higher is dispatched first among jobs with the same `start_after`.
    pub priority: i32,
    /// Failures so far.
    pub retry_count: u32,
    /// Failures tolerated before the job becomes `failed`.
    pub retry_limit: u32,
    /// Base delay before a retry.
    pub retry_delay_secs: u64,
    /// Double the delay for every previous retry.
    pub retry_backoff: bool,
    /// Not eligible for dispatch before this instant.
    pub start_after: DateTime<Utc>,
    /// When the current (or last) attempt started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_on: Option<DateTime<Utc>>,
    /// When an active attempt is presumed dead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_on: Option<DateTime<Utc>>,
    /// At most one non-terminal job per queue carries a given key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub singleton_key: Option<String>,
    /// How long an active attempt may run.
    pub expire_in_secs: u64,
    pub created_on: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_on: Option<DateTime<Utc>>,
    /// Terminal jobs are archived after this instant.
    pub keep_until: DateTime<Utc>,
    /// Handler output on success, error details on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl Job {
    /// Create a new job in `created` state using the queue's defaults.
    pub fn new(queue_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::from_options(
            queue_name,
            payload,
            &QueueConfig::default(),
            &JobOptions::default(),
            Utc::now(),
        )
    }

    /// Build a job from queue defaults overridden by per-send options.
    pub fn from_options(
        queue_name: impl Into<String>,
        payload: serde_json::Value,
        config: &QueueConfig,
        options: &JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let start_after = match options.start_after {
            Some(StartAfter::Delay { secs }) => now + secs_to_duration(secs),
            Some(StartAfter::At(at)) => at,
            None => now,
        };
        let retention_secs = options.retention_secs.unwrap_or(config.retention_secs);

        Self {
            id: JobId::new(),
            queue_name: queue_name.into(),
            payload,
            state: JobState::Created,
            priority: options.priority.unwrap_or(0),
            retry_count: 0,
            retry_limit: options.retry_limit.unwrap_or(config.retry_limit),
            retry_delay_secs: options.retry_delay_secs.unwrap_or(config.retry_delay_secs),
            retry_backoff: options.retry_backoff.unwrap_or(config.retry_backoff),
            start_after,
            started_on: None,
            expire_on: None,
            singleton_key: options.singleton_key.clone(),
            expire_in_secs: options.expire_in_secs.unwrap_or(config.expire_in_secs),
            created_on: now,
            completed_on: None,
            keep_until: start_after
                .checked_add_signed(secs_to_duration(retention_secs))
                .unwrap_or(start_after),
            output: None,
        }
    }

    /// Decide the next state after a failed attempt at `now`.
    ///
    /// The k-th retry (counting from zero) waits `retry_delay * 2^k` with
    /// backoff, `retry_delay` without.
    pub fn failure_outcome(&self, now: DateTime<Utc>) -> FailureOutcome {
        if self.retry_count >= self.retry_limit {
            return FailureOutcome::Failed;
        }

        let factor = if self.retry_backoff {
            2u64.saturating_pow(self.retry_count)
        } else {
            1
        };
        let delay = self.retry_delay_secs.saturating_mul(factor);

        FailureOutcome::Retry {
            retry_count: self.retry_count + 1,
            start_after: now + secs_to_duration(delay),
        }
    }

    /// Whether a dispatcher may claim this job at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state.is_pending() && self.start_after <= now
    }
}

/// Upper bound for any delay or retention (100 years).
const MAX_SECS: u64 = 100 * 365 * 24 * 60 * 60;

pub(crate) fn secs_to_duration(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_SECS) as i64)
}
