//! Collaborators the jobs talk to.
//!
//! Implementations live with the application; jobs only see these traits.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A failed call to an external service.
#[derive(Debug, thiserror::Error)]
#[error("{service}: {message}")]
pub struct ServiceError {
    pub service: &'static str,
    pub message: String,
}

impl ServiceError {
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Chat network client.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_text(&self, room_id: &str, body: &str) -> ServiceResult<()>;

    /// Post `body` as a reply to `event_id`. `html` is the formatted variant.
    async fn send_reply(&self, room_id: &str, event_id: &str, body: &str, html: &str) -> ServiceResult<()>;

    /// Annotate `event_id` with a reaction.
    async fn react(&self, room_id: &str, event_id: &str, key: &str) -> ServiceResult<()>;

    async fn room_name(&self, room_id: &str) -> Option<String>;

    async fn room_last_active(&self, room_id: &str) -> Option<DateTime<Utc>>;

    async fn user_display_name(&self, user_id: &str) -> Option<String>;

    /// Authenticated HTTP URL for a media content URL.
    async fn media_url(&self, content_url: &str) -> Option<String>;
}

/// Tags understood by the push service.
pub mod tags {
    pub const LOUDSPEAKER: &str = "loudspeaker";
}

/// A push notification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub tags: Vec<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> ServiceResult<()>;
}

/// A coupon promotion offered by the loyalty programme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponPromotion {
    pub id: String,
    pub source: String,
    pub is_activated: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl CouponPromotion {
    /// Not yet activated and strictly inside its validity window.
    pub fn should_activate(&self, now: DateTime<Utc>) -> bool {
        !self.is_activated && self.valid_from < now && self.valid_until > now
    }
}

/// A purchase receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub store: String,
    pub total: f64,
    pub purchased_at: DateTime<Utc>,
}

#[async_trait]
pub trait LoyaltyClient: Send + Sync {
    async fn coupon_promotions(&self) -> ServiceResult<Vec<CouponPromotion>>;

    async fn activate_promotion(&self, id: &str, source: &str) -> ServiceResult<()>;

    async fn receipts(&self) -> ServiceResult<Vec<Receipt>>;
}

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn known_receipt_ids(&self) -> ServiceResult<HashSet<String>>;

    /// Store receipts. Returns how many were written.
    async fn insert_receipts(&self, receipts: &[Receipt]) -> ServiceResult<usize>;
}

/// Per-room preferences.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomSettings {
    pub room_id: String,
    pub transcription_enabled: bool,
    /// Remind when the room has been quiet this long.
    pub reminder_interval_secs: Option<u64>,
}

#[async_trait]
pub trait RoomSettingsStore: Send + Sync {
    async fn list(&self) -> ServiceResult<Vec<RoomSettings>>;

    async fn get(&self, room_id: &str) -> ServiceResult<Option<RoomSettings>>;

    /// Create the room's settings if missing and set the flag.
    async fn set_transcription(&self, room_id: &str, enabled: bool) -> ServiceResult<()>;
}

/// Speech to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_url: &str) -> ServiceResult<String>;
}
