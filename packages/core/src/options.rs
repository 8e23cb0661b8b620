//! Per-send and per-schedule options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When a job becomes eligible for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartAfter {
    /// Relative to the moment of enqueueing.
    Delay { secs: u64 },
    /// Absolute instant ("send at").
    At(DateTime<Utc>),
}

/// Options for a single send. Unset fields fall back to the queue config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_after: Option<StartAfter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub singleton_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_in_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_secs: Option<u64>,
}

impl JobOptions {
    /// Delay dispatch by `secs` seconds.
    pub fn delayed(secs: u64) -> Self {
        Self {
            start_after: Some(StartAfter::Delay { secs }),
            ..Default::default()
        }
    }

    /// Dispatch no earlier than `at`.
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            start_after: Some(StartAfter::At(at)),
            ..Default::default()
        }
    }

    /// Layer `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merge(&self, overrides: &JobOptions) -> JobOptions {
        JobOptions {
            priority: overrides.priority.or(self.priority),
            retry_limit: overrides.retry_limit.or(self.retry_limit),
            retry_delay_secs: overrides.retry_delay_secs.or(self.retry_delay_secs),
            retry_backoff: overrides.retry_backoff.or(self.retry_backoff),
            start_after: overrides.start_after.or(self.start_after),
            singleton_key: overrides
                .singleton_key
                .clone()
                .or_else(|| self.singleton_key.clone()),
            expire_in_secs: overrides.expire_in_secs.or(self.expire_in_secs),
            retention_secs: overrides.retention_secs.or(self.retention_secs),
        }
    }
}

/// Options for a recurring schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    /// IANA timezone the cron expression is evaluated in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Options applied to every job the schedule fires.
    pub job: JobOptions,
}

impl ScheduleOptions {
    pub fn in_timezone(timezone: impl Into<String>) -> Self {
        Self {
            timezone: Some(timezone.into()),
            ..Default::default()
        }
    }

    /// Layer `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merge(&self, overrides: &ScheduleOptions) -> ScheduleOptions {
        ScheduleOptions {
            timezone: overrides.timezone.clone().or_else(|| self.timezone.clone()),
            job: self.job.merge(&overrides.job),
        }
    }
}
