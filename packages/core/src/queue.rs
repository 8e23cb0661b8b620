//! Queue domain types for job lanes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobState;

/// Configuration for queue behavior.
///
/// Every job sent to the queue inherits these unless the send overrides them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Failures tolerated before a job becomes `failed`.
    pub retry_limit: u32,
    /// Base delay before a retry (seconds).
    pub retry_delay_secs: u64,
    /// Double the retry delay on every retry.
    pub retry_backoff: bool,
    /// How long an attempt may stay active before it is presumed dead (seconds).
    pub expire_in_secs: u64,
    /// How long terminal jobs are kept before archiving (seconds).
    pub retention_secs: u64,
    /// Number of concurrent workers for this queue.
    pub concurrency: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            retry_delay_secs: 0,
            retry_backoff: false,
            expire_in_secs: 15 * 60,
            retention_secs: 14 * 24 * 60 * 60,
            concurrency: 1,
        }
    }
}

impl QueueConfig {
    pub fn with_retry(mut self, limit: u32, delay_secs: u64, backoff: bool) -> Self {
        self.retry_limit = limit;
        self.retry_delay_secs = delay_secs;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_expire_in(mut self, secs: u64) -> Self {
        self.expire_in_secs = secs;
        self
    }

    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Workers to run and attempts allowed in flight. A stored `0` means one.
    pub fn worker_count(&self) -> usize {
        self.concurrency.max(1) as usize
    }
}

/// Job counts per state for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub created: u64,
    pub retry: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl QueueStats {
    /// Add `count` jobs in `state`.
    pub fn record(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Created => self.created += count,
            JobState::Retry => self.retry += count,
            JobState::Active => self.active += count,
            JobState::Completed => self.completed += count,
            JobState::Failed => self.failed += count,
            JobState::Cancelled => self.cancelled += count,
        }
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> u64 {
        self.created + self.retry
    }
}

/// A named lane of jobs with its own retry and expiry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    /// Unique name; also the queue's identity.
    pub name: String,
    /// Optional description of what this queue is for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Queue configuration.
    pub config: QueueConfig,
    /// When the queue was created.
    pub created_at: DateTime<Utc>,
    /// When the queue was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Queue {
    /// Create a new queue with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            config: QueueConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description for this queue.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the configuration for this queue.
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }
}
