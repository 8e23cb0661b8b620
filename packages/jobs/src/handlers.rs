//! Job bodies. Each takes the collaborators explicitly so it can run outside
//! the engine.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::services::{
    ChatClient, LoyaltyClient, Notification, Notifier, ReceiptStore, RoomSettingsStore,
    ServiceResult, tags,
};

/// Collaborators shared by all jobs.
#[derive(Clone)]
pub struct Services {
    pub chat: Arc<dyn ChatClient>,
    pub notifier: Arc<dyn Notifier>,
    pub loyalty: Arc<dyn LoyaltyClient>,
    pub receipts: Arc<dyn ReceiptStore>,
    pub rooms: Arc<dyn RoomSettingsStore>,
}

/// Payload of `scheduleMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessage {
    pub room_id: String,
    pub message: String,
}

/// Post the message, then tell the owner it went out.
pub async fn send_scheduled_message(services: &Services, job: ScheduledMessage) -> ServiceResult<()> {
    let room_name = services
        .chat
        .room_name(&job.room_id)
        .await
        .unwrap_or_else(|| job.room_id.clone());

    services.chat.send_text(&job.room_id, &job.message).await?;

    services
        .notifier
        .notify(Notification {
            title: format!("{} dostał info", room_name),
            message: job.message.clone(),
            tags: vec![tags::LOUDSPEAKER.to_string()],
        })
        .await?;

    tracing::info!(room_id = %job.room_id, "Scheduled message sent");
    Ok(())
}

/// Activate every promotion that is live and not yet active. Returns how
/// many were activated; a promotion that fails to activate is skipped.
pub async fn enable_coupons(services: &Services, now: DateTime<Utc>) -> ServiceResult<usize> {
    let promotions = services.loyalty.coupon_promotions().await?;
    let mut activated = 0;

    for promotion in promotions.iter().filter(|p| p.should_activate(now)) {
        match services
            .loyalty
            .activate_promotion(&promotion.id, &promotion.source)
            .await
        {
            Ok(()) => activated += 1,
            Err(e) => {
                tracing::warn!(promotion_id = %promotion.id, error = %e, "Failed to activate promotion");
            }
        }
    }

    tracing::info!(available = promotions.len(), activated, "Coupon activation finished");
    Ok(activated)
}

/// Store receipts not seen before. Returns how many were new.
pub async fn sync_receipts(services: &Services) -> ServiceResult<usize> {
    let receipts = services.loyalty.receipts().await?;
    let known = services.receipts.known_receipt_ids().await?;

    let fresh: Vec<_> = receipts
        .into_iter()
        .filter(|r| !known.contains(&r.id))
        .collect();

    if fresh.is_empty() {
        tracing::debug!("No new receipts");
        return Ok(0);
    }

    let stored = services.receipts.insert_receipts(&fresh).await?;
    tracing::info!(new = fresh.len(), stored, "Receipts synced");
    Ok(fresh.len())
}

/// Nudge the owner about rooms that have been quiet longer than their
/// reminder interval. Returns how many reminders went out.
pub async fn remind_quiet_rooms(services: &Services, now: DateTime<Utc>) -> ServiceResult<usize> {
    let mut sent = 0;

    for settings in services.rooms.list().await? {
        let Some(interval) = settings.reminder_interval_secs.filter(|s| *s > 0) else {
            continue;
        };
        let Some(last_active) = services.chat.room_last_active(&settings.room_id).await else {
            continue;
        };
        let Some(name) = services.chat.room_name(&settings.room_id).await else {
            continue;
        };

        let due = i64::try_from(interval)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|d| last_active.checked_add_signed(d));
        if due.is_some_and(|due| due < now) {
            services
                .notifier
                .notify(Notification {
                    title: "Przypomnienie".to_string(),
                    message: format!("Napisz do {}!", name),
                    tags: Vec::new(),
                })
                .await?;
            sent += 1;
        }
    }

    Ok(sent)
}
