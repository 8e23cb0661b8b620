#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobs::Services;
use jobs::services::{
    ChatClient, CouponPromotion, LoyaltyClient, Notification, Notifier, Receipt, ReceiptStore,
    RoomSettings, RoomSettingsStore, ServiceError, ServiceResult, Transcriber,
};

#[derive(Default)]
pub struct MockChat {
    pub rooms: HashMap<String, (String, Option<DateTime<Utc>>)>,
    pub users: HashMap<String, String>,
    pub texts: Mutex<Vec<(String, String)>>,
    pub replies: Mutex<Vec<(String, String, String)>>,
    pub reactions: Mutex<Vec<(String, String, String)>>,
}

impl MockChat {
    pub fn with_room(mut self, id: &str, name: &str, last_active: Option<DateTime<Utc>>) -> Self {
        self.rooms.insert(id.into(), (name.into(), last_active));
        self
    }

    pub fn with_user(mut self, id: &str, name: &str) -> Self {
        self.users.insert(id.into(), name.into());
        self
    }
}

#[async_trait]
impl ChatClient for MockChat {
    async fn send_text(&self, room_id: &str, body: &str) -> ServiceResult<()> {
        self.texts.lock().unwrap().push((room_id.into(), body.into()));
        Ok(())
    }

    async fn send_reply(&self, room_id: &str, event_id: &str, body: &str, _html: &str) -> ServiceResult<()> {
        self.replies
            .lock()
            .unwrap()
            .push((room_id.into(), event_id.into(), body.into()));
        Ok(())
    }

    async fn react(&self, room_id: &str, event_id: &str, key: &str) -> ServiceResult<()> {
        self.reactions
            .lock()
            .unwrap()
            .push((room_id.into(), event_id.into(), key.into()));
        Ok(())
    }

    async fn room_name(&self, room_id: &str) -> Option<String> {
        self.rooms.get(room_id).map(|(name, _)| name.clone())
    }

    async fn room_last_active(&self, room_id: &str) -> Option<DateTime<Utc>> {
        self.rooms.get(room_id).and_then(|(_, at)| *at)
    }

    async fn user_display_name(&self, user_id: &str) -> Option<String> {
        self.users.get(user_id).cloned()
    }

    async fn media_url(&self, content_url: &str) -> Option<String> {
        content_url
            .strip_prefix("mxc://")
            .map(|rest| format!("https://media.example/{}", rest))
    }
}

#[derive(Default)]
pub struct MockNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, notification: Notification) -> ServiceResult<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockLoyalty {
    pub promotions: Vec<CouponPromotion>,
    pub broken: HashSet<String>,
    pub receipts: Vec<Receipt>,
    pub activated: Mutex<Vec<String>>,
}

#[async_trait]
impl LoyaltyClient for MockLoyalty {
    async fn coupon_promotions(&self) -> ServiceResult<Vec<CouponPromotion>> {
        Ok(self.promotions.clone())
    }

    async fn activate_promotion(&self, id: &str, _source: &str) -> ServiceResult<()> {
        if self.broken.contains(id) {
            return Err(ServiceError::new("loyalty", "activation rejected"));
        }
        self.activated.lock().unwrap().push(id.into());
        Ok(())
    }

    async fn receipts(&self) -> ServiceResult<Vec<Receipt>> {
        Ok(self.receipts.clone())
    }
}

#[derive(Default)]
pub struct MockReceipts {
    pub known: Mutex<HashSet<String>>,
    pub inserts: Mutex<usize>,
}

#[async_trait]
impl ReceiptStore for MockReceipts {
    async fn known_receipt_ids(&self) -> ServiceResult<HashSet<String>> {
        Ok(self.known.lock().unwrap().clone())
    }

    async fn insert_receipts(&self, receipts: &[Receipt]) -> ServiceResult<usize> {
        *self.inserts.lock().unwrap() += 1;
        let mut known = self.known.lock().unwrap();
        Ok(receipts.iter().filter(|r| known.insert(r.id.clone())).count())
    }
}

#[derive(Default)]
pub struct MockRooms {
    pub settings: Mutex<HashMap<String, RoomSettings>>,
}

impl MockRooms {
    pub fn with(settings: Vec<RoomSettings>) -> Self {
        Self {
            settings: Mutex::new(settings.into_iter().map(|s| (s.room_id.clone(), s)).collect()),
        }
    }
}

#[async_trait]
impl RoomSettingsStore for MockRooms {
    async fn list(&self) -> ServiceResult<Vec<RoomSettings>> {
        let mut all: Vec<_> = self.settings.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        Ok(all)
    }

    async fn get(&self, room_id: &str) -> ServiceResult<Option<RoomSettings>> {
        Ok(self.settings.lock().unwrap().get(room_id).cloned())
    }

    async fn set_transcription(&self, room_id: &str, enabled: bool) -> ServiceResult<()> {
        self.settings
            .lock()
            .unwrap()
            .entry(room_id.to_string())
            .or_insert_with(|| RoomSettings {
                room_id: room_id.to_string(),
                ..Default::default()
            })
            .transcription_enabled = enabled;
        Ok(())
    }
}

pub struct MockTranscriber {
    pub result: Result<String, String>,
    pub calls: Mutex<Vec<String>>,
}

impl MockTranscriber {
    pub fn saying(text: &str) -> Self {
        Self {
            result: Ok(text.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err("model unavailable".into()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, audio_url: &str) -> ServiceResult<String> {
        self.calls.lock().unwrap().push(audio_url.into());
        self.result
            .clone()
            .map_err(|e| ServiceError::new("transcriber", e))
    }
}

/// Collaborators for the scheduled jobs, with handles kept for assertions.
pub struct Fixture {
    pub chat: Arc<MockChat>,
    pub notifier: Arc<MockNotifier>,
    pub loyalty: Arc<MockLoyalty>,
    pub receipts: Arc<MockReceipts>,
    pub rooms: Arc<MockRooms>,
}

impl Fixture {
    pub fn new(chat: MockChat, loyalty: MockLoyalty, receipts: MockReceipts, rooms: MockRooms) -> Self {
        Self {
            chat: Arc::new(chat),
            notifier: Arc::new(MockNotifier::default()),
            loyalty: Arc::new(loyalty),
            receipts: Arc::new(receipts),
            rooms: Arc::new(rooms),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            chat: self.chat.clone(),
            notifier: self.notifier.clone(),
            loyalty: self.loyalty.clone(),
            receipts: self.receipts.clone(),
            rooms: self.rooms.clone(),
        }
    }
}
