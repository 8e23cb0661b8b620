//! At-most-once gate for inbound events.

use chrono::Utc;
use db::repositories::ProcessedEventRepository;
use db::{Database, DbError};
use queue_core::{ClaimOutcome, ProcessedEvent};

/// Marks event ids as handled before their side effect runs.
///
/// Concurrent claims of one id resolve to a single winner. A claim is never
/// released, so a side effect that fails after claiming is not retried.
#[derive(Clone)]
pub struct IdempotencyGate {
    events: ProcessedEventRepository,
}

impl IdempotencyGate {
    pub fn new(db: Database) -> Self {
        Self {
            events: ProcessedEventRepository::new(db),
        }
    }

    /// Claim `event_id`. Only the caller that sees `already_claimed == false`
    /// may run the side effect.
    pub async fn claim(&self, event_id: &str) -> Result<ClaimOutcome, DbError> {
        if self.events.insert(event_id, Utc::now()).await? {
            tracing::debug!(event_id = %event_id, "Event claimed");
            Ok(ClaimOutcome::claimed())
        } else {
            tracing::info!(event_id = %event_id, "Event already processed, skipping");
            Ok(ClaimOutcome::duplicate())
        }
    }

    /// Attach the side effect's result to a claimed event.
    pub async fn annotate(
        &self,
        event_id: &str,
        details: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ProcessedEvent, DbError> {
        self.events.annotate(event_id, details).await
    }

    pub async fn is_claimed(&self, event_id: &str) -> Result<bool, DbError> {
        Ok(self.events.get(event_id).await?.is_some())
    }

    pub async fn get(&self, event_id: &str) -> Result<Option<ProcessedEvent>, DbError> {
        self.events.get(event_id).await
    }
}
