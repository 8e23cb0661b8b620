//! Event types broadcast by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobId, Queue};

/// Events emitted by the job engine as jobs move through their lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A queue was created.
    QueueCreated {
        queue: Queue,
        timestamp: DateTime<Utc>,
    },

    /// A new job was persisted.
    JobEnqueued { job: Job, timestamp: DateTime<Utc> },
    /// A worker claimed a job.
    JobStarted {
        job_id: JobId,
        queue_name: String,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A handler returned successfully.
    JobCompleted {
        job_id: JobId,
        queue_name: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A handler failed or timed out.
    JobFailed {
        job_id: JobId,
        queue_name: String,
        error: String,
        retry_count: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// A failed job went back to `retry`.
    JobRetrying {
        job_id: JobId,
        queue_name: String,
        retry_count: u32,
        start_after: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    /// A pending job was cancelled.
    JobCancelled {
        job_id: JobId,
        queue_name: String,
        timestamp: DateTime<Utc>,
    },
    /// An active job outlived its expiry and was failed by maintenance.
    JobExpired {
        job_id: JobId,
        queue_name: String,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },

    /// A schedule was created or replaced.
    ScheduleRegistered {
        queue_name: String,
        cron: String,
        timezone: String,
        timestamp: DateTime<Utc>,
    },
    /// A schedule occurrence fired. `job_id` is `None` when a singleton
    /// key suppressed the job.
    ScheduleFired {
        queue_name: String,
        occurrence: DateTime<Utc>,
        job_id: Option<JobId>,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::QueueCreated { timestamp, .. }
            | JobEvent::JobEnqueued { timestamp, .. }
            | JobEvent::JobStarted { timestamp, .. }
            | JobEvent::JobCompleted { timestamp, .. }
            | JobEvent::JobFailed { timestamp, .. }
            | JobEvent::JobRetrying { timestamp, .. }
            | JobEvent::JobCancelled { timestamp, .. }
            | JobEvent::JobExpired { timestamp, .. }
            | JobEvent::ScheduleRegistered { timestamp, .. }
            | JobEvent::ScheduleFired { timestamp, .. } => *timestamp,
        }
    }

    /// Name of the queue this event concerns.
    pub fn queue_name(&self) -> &str {
        match self {
            JobEvent::QueueCreated { queue, .. } => &queue.name,
            JobEvent::JobEnqueued { job, .. } => &job.queue_name,
            JobEvent::JobStarted { queue_name, .. }
            | JobEvent::JobCompleted { queue_name, .. }
            | JobEvent::JobFailed { queue_name, .. }
            | JobEvent::JobRetrying { queue_name, .. }
            | JobEvent::JobCancelled { queue_name, .. }
            | JobEvent::JobExpired { queue_name, .. }
            | JobEvent::ScheduleRegistered { queue_name, .. }
            | JobEvent::ScheduleFired { queue_name, .. } => queue_name,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobEnqueued { job, .. } => Some(job.id),
            JobEvent::JobStarted { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobRetrying { job_id, .. }
            | JobEvent::JobCancelled { job_id, .. }
            | JobEvent::JobExpired { job_id, .. } => Some(*job_id),
            JobEvent::ScheduleFired { job_id, .. } => *job_id,
            JobEvent::QueueCreated { .. } | JobEvent::ScheduleRegistered { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::QueueCreated { queue, .. } => format!("Queue '{}' created", queue.name),
            JobEvent::JobEnqueued { job, .. } => {
                format!("Job {} enqueued on '{}'", job.id, job.queue_name)
            }
            JobEvent::JobStarted {
                job_id, worker_id, ..
            } => format!("Job {} started by {}", job_id, worker_id),
            JobEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::JobFailed {
                job_id,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("Job {} failed: {}{}", job_id, error, retry)
            }
            JobEvent::JobRetrying {
                job_id,
                retry_count,
                start_after,
                ..
            } => format!(
                "Job {} retrying (retry {}) after {}",
                job_id, retry_count, start_after
            ),
            JobEvent::JobCancelled { job_id, .. } => format!("Job {} cancelled", job_id),
            JobEvent::JobExpired { job_id, .. } => format!("Job {} expired", job_id),
            JobEvent::ScheduleRegistered {
                queue_name, cron, ..
            } => format!("Schedule '{}' registered for '{}'", cron, queue_name),
            JobEvent::ScheduleFired {
                queue_name, job_id, ..
            } => match job_id {
                Some(id) => format!("Schedule for '{}' fired job {}", queue_name, id),
                None => format!("Schedule for '{}' fired, job suppressed", queue_name),
            },
        }
    }

    /// Whether this event ends a job's attempt.
    pub fn is_terminal_for_attempt(&self) -> bool {
        matches!(
            self,
            JobEvent::JobCompleted { .. } | JobEvent::JobFailed { .. } | JobEvent::JobExpired { .. }
        )
    }
}
