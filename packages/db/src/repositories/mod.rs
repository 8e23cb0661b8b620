//! Repository implementations for database operations.

mod job_repo;
mod processed_event_repo;
mod queue_repo;
mod schedule_repo;

pub use job_repo::JobRepository;
pub use processed_event_repo::ProcessedEventRepository;
pub use queue_repo::QueueRepository;
pub use schedule_repo::ScheduleRepository;

use chrono::{DateTime, Utc};

use crate::DbError;

pub(crate) fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::Serialization(format!("timestamp out of range: {}", ms)))
}

pub(crate) fn from_opt_ms(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, DbError> {
    ms.map(from_ms).transpose()
}

pub(crate) fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, DbError> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, DbError> {
    Ok(serde_json::from_str(text)?)
}
