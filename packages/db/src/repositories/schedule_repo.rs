//! Schedule repository. At most one schedule per queue; the record id is the
//! queue name.

use chrono::{DateTime, Utc};
use queue_core::{Schedule, ScheduleOptions};
use serde::{Deserialize, Serialize};

use super::{decode_json, encode_json, from_ms, from_opt_ms, to_ms};
use crate::{Database, DbError};

/// Repository for recurring triggers.
#[derive(Clone)]
pub struct ScheduleRepository {
    db: Database,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScheduleRecord {
    queue_name: String,
    cron: String,
    timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    options: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_fired_ms: Option<i64>,
    created_on_ms: i64,
    updated_on_ms: i64,
}

impl ScheduleRecord {
    fn from_schedule(schedule: &Schedule) -> Result<Self, DbError> {
        Ok(Self {
            queue_name: schedule.queue_name.clone(),
            cron: schedule.cron.clone(),
            timezone: schedule.timezone.clone(),
            payload: schedule.payload.as_ref().map(encode_json).transpose()?,
            options: encode_json(&schedule.options)?,
            last_fired_ms: schedule.last_fired.map(to_ms),
            created_on_ms: to_ms(schedule.created_on),
            updated_on_ms: to_ms(schedule.updated_on),
        })
    }

    fn into_schedule(self) -> Result<Schedule, DbError> {
        Ok(Schedule {
            queue_name: self.queue_name,
            cron: self.cron,
            timezone: self.timezone,
            payload: self.payload.as_deref().map(decode_json).transpose()?,
            options: decode_json::<ScheduleOptions>(&self.options)?,
            last_fired: from_opt_ms(self.last_fired_ms)?,
            created_on: from_ms(self.created_on_ms)?,
            updated_on: from_ms(self.updated_on_ms)?,
        })
    }
}

impl ScheduleRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create or replace the queue's schedule.
    ///
    /// Replacing keeps the original creation time and the last fired
    /// occurrence, so re-registering on every start never re-fires a tick.
    pub async fn upsert(&self, schedule: &Schedule) -> Result<Schedule, DbError> {
        let mut record = ScheduleRecord::from_schedule(schedule)?;

        if let Some(existing) = self.get(&schedule.queue_name).await? {
            record.created_on_ms = to_ms(existing.created_on);
            record.last_fired_ms = existing.last_fired.map(to_ms);
        }

        let stored: Option<ScheduleRecord> = self
            .db
            .upsert(("schedule", schedule.queue_name.clone()))
            .content(record)
            .await?;

        stored
            .ok_or_else(|| DbError::Query(format!("Failed to store schedule: {}", schedule.queue_name)))?
            .into_schedule()
    }

    /// Get the schedule of a queue.
    pub async fn get(&self, queue_name: &str) -> Result<Option<Schedule>, DbError> {
        let record: Option<ScheduleRecord> =
            self.db.select(("schedule", queue_name.to_string())).await?;

        record.map(ScheduleRecord::into_schedule).transpose()
    }

    /// All schedules ordered by queue name.
    pub async fn list(&self) -> Result<Vec<Schedule>, DbError> {
        let mut result = self.db.query("SELECT * FROM schedule ORDER BY queue_name ASC").await?;

        let records: Vec<ScheduleRecord> = result.take(0)?;

        records.into_iter().map(ScheduleRecord::into_schedule).collect()
    }

    /// Remove a queue's schedule. Returns whether one existed.
    pub async fn delete(&self, queue_name: &str) -> Result<bool, DbError> {
        let deleted: Option<ScheduleRecord> =
            self.db.delete(("schedule", queue_name.to_string())).await?;

        Ok(deleted.is_some())
    }

    /// Record `occurrence` as fired. Returns `false` when this or a later
    /// occurrence was already recorded, so each occurrence is claimed once.
    pub async fn claim_tick(&self, queue_name: &str, occurrence: DateTime<Utc>) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                UPDATE type::thing('schedule', $id)
                SET last_fired_ms = $tick
                WHERE last_fired_ms = NONE OR last_fired_ms < $tick
                RETURN AFTER
                "#,
            )
            .bind(("id", queue_name.to_string()))
            .bind(("tick", to_ms(occurrence)))
            .await?;

        let records: Vec<ScheduleRecord> = result.take(0)?;

        Ok(!records.is_empty())
    }
}
