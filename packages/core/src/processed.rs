//! Records of external events that have already been handled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable marker that an external event id was claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub processed_at: DateTime<Utc>,
    /// Free-form notes attached after processing (e.g. a transcript).
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ProcessedEvent {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            processed_at: Utc::now(),
            details: serde_json::Map::new(),
        }
    }
}

/// Result of claiming an event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// `true` when some earlier caller already holds the claim.
    pub already_claimed: bool,
}

impl ClaimOutcome {
    pub fn claimed() -> Self {
        Self {
            already_claimed: false,
        }
    }

    pub fn duplicate() -> Self {
        Self {
            already_claimed: true,
        }
    }
}
