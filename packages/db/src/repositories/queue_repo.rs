//! Queue repository.

use queue_core::{Queue, QueueConfig};
use serde::{Deserialize, Serialize};

use super::{from_ms, to_ms};
use crate::{Database, DbError};

/// Repository for queue persistence operations.
#[derive(Clone)]
pub struct QueueRepository {
    db: Database,
}

/// Stored shape of a queue; the record id is the queue name.
#[derive(Debug, Serialize, Deserialize)]
struct QueueRecord {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    config: QueueConfig,
    created_on_ms: i64,
    updated_on_ms: i64,
}

impl QueueRecord {
    fn from_queue(queue: &Queue) -> Self {
        Self {
            name: queue.name.clone(),
            description: queue.description.clone(),
            config: queue.config.clone(),
            created_on_ms: to_ms(queue.created_at),
            updated_on_ms: to_ms(queue.updated_at),
        }
    }

    fn into_queue(self) -> Result<Queue, DbError> {
        Ok(Queue {
            name: self.name,
            description: self.description,
            config: self.config,
            created_at: from_ms(self.created_on_ms)?,
            updated_at: from_ms(self.updated_on_ms)?,
        })
    }
}

impl QueueRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert the queue unless one with the same name exists.
    ///
    /// Returns the stored queue and whether this call created it.
    pub async fn create_if_absent(&self, queue: &Queue) -> Result<(Queue, bool), DbError> {
        let created: Result<Option<QueueRecord>, surrealdb::Error> = self
            .db
            .create(("queue", queue.name.clone()))
            .content(QueueRecord::from_queue(queue))
            .await;

        match created {
            Ok(Some(record)) => Ok((record.into_queue()?, true)),
            Ok(None) => Err(DbError::Query(format!("Failed to create queue: {}", queue.name))),
            Err(err) => match self.get(&queue.name).await? {
                Some(existing) => Ok((existing, false)),
                None => Err(err.into()),
            },
        }
    }

    /// Replace description and config of an existing queue.
    pub async fn update(&self, queue: &Queue) -> Result<Queue, DbError> {
        let mut result = self
            .db
            .query(
                "UPDATE type::thing('queue', $name) SET description = $description, config = $config, updated_on_ms = $now RETURN AFTER",
            )
            .bind(("name", queue.name.clone()))
            .bind(("description", queue.description.clone()))
            .bind(("config", queue.config.clone()))
            .bind(("now", to_ms(chrono::Utc::now())))
            .await?;

        let records: Vec<QueueRecord> = result.take(0)?;

        records
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Queue not found: {}", queue.name)))?
            .into_queue()
    }

    /// Get a queue by name.
    pub async fn get(&self, name: &str) -> Result<Option<Queue>, DbError> {
        let record: Option<QueueRecord> = self.db.select(("queue", name.to_string())).await?;

        record.map(QueueRecord::into_queue).transpose()
    }

    /// List all queues ordered by name.
    pub async fn list(&self) -> Result<Vec<Queue>, DbError> {
        let mut result = self.db.query("SELECT * FROM queue ORDER BY name ASC").await?;

        let records: Vec<QueueRecord> = result.take(0)?;

        records.into_iter().map(QueueRecord::into_queue).collect()
    }

    /// Delete a queue. Jobs are left untouched.
    pub async fn delete(&self, name: &str) -> Result<bool, DbError> {
        let deleted: Option<QueueRecord> = self.db.delete(("queue", name.to_string())).await?;

        Ok(deleted.is_some())
    }
}
