//! Processed-event markers backing the idempotency gate.

use chrono::{DateTime, Utc};
use queue_core::ProcessedEvent;
use serde::{Deserialize, Serialize};

use super::{decode_json, encode_json, from_ms, to_ms};
use crate::{Database, DbError};

/// Repository for processed-event markers. The record id is the event id.
#[derive(Clone)]
pub struct ProcessedEventRepository {
    db: Database,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProcessedEventRecord {
    event_id: String,
    processed_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ProcessedEventRecord {
    fn into_event(self) -> Result<ProcessedEvent, DbError> {
        Ok(ProcessedEvent {
            event_id: self.event_id,
            processed_at: from_ms(self.processed_at_ms)?,
            details: match self.details {
                Some(text) => decode_json(&text)?,
                None => serde_json::Map::new(),
            },
        })
    }
}

impl ProcessedEventRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a marker for `event_id`.
    ///
    /// Returns `true` if this call created it, `false` if it already existed.
    /// Primary-key uniqueness makes exactly one concurrent caller win.
    pub async fn insert(&self, event_id: &str, now: DateTime<Utc>) -> Result<bool, DbError> {
        let created: Result<Option<ProcessedEventRecord>, surrealdb::Error> = self
            .db
            .create(("processed_event", event_id.to_string()))
            .content(ProcessedEventRecord {
                event_id: event_id.to_string(),
                processed_at_ms: to_ms(now),
                details: None,
            })
            .await;

        match created {
            Ok(_) => Ok(true),
            Err(err) => {
                if self.get(event_id).await?.is_some() {
                    Ok(false)
                } else {
                    Err(err.into())
                }
            }
        }
    }

    /// Get the marker for `event_id`.
    pub async fn get(&self, event_id: &str) -> Result<Option<ProcessedEvent>, DbError> {
        let record: Option<ProcessedEventRecord> =
            self.db.select(("processed_event", event_id.to_string())).await?;

        record.map(ProcessedEventRecord::into_event).transpose()
    }

    /// Merge `details` into the marker's details.
    pub async fn annotate(
        &self,
        event_id: &str,
        details: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ProcessedEvent, DbError> {
        let mut event = self
            .get(event_id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Processed event not found: {}", event_id)))?;

        event.details.extend(details);

        let mut result = self
            .db
            .query("UPDATE type::thing('processed_event', $id) SET details = $details RETURN AFTER")
            .bind(("id", event_id.to_string()))
            .bind(("details", encode_json(&event.details)?))
            .await?;

        let records: Vec<ProcessedEventRecord> = result.take(0)?;

        records
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Processed event not found: {}", event_id)))?
            .into_event()
    }
}
