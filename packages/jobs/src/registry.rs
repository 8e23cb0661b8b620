//! The application's job definitions and their schedules.

use api::{Engine, JobDefinition, JobError};
use chrono::Utc;

use crate::handlers::{
    ScheduledMessage, Services, enable_coupons, remind_quiet_rooms, send_scheduled_message,
    sync_receipts,
};

pub const SCHEDULE_MESSAGE: &str = "scheduleMessage";
pub const ENABLE_LIDL_COUPONS: &str = "enableLidlCoupons";
pub const SYNC_LIDL_RECEIPTS: &str = "syncLidlReceipts";
pub const SCHEDULE_NOTIFICATION: &str = "scheduleNotification";

/// Daily reminder check.
pub const NOTIFICATION_CRON: &str = "0 10 * * *";
/// Hourly loyalty programme sync.
pub const LIDL_CRON: &str = "5 * * * *";

/// All job definitions, bound to one engine.
pub struct Jobs {
    pub schedule_message: JobDefinition<ScheduledMessage>,
    pub enable_lidl_coupons: JobDefinition<()>,
    pub sync_lidl_receipts: JobDefinition<()>,
    pub schedule_notification: JobDefinition<()>,
}

impl Jobs {
    /// Define every job. Schedules are evaluated in the engine's zone.
    pub fn new(engine: &Engine, services: Services) -> Self {
        let s = services.clone();
        let schedule_message = JobDefinition::new(engine.clone(), SCHEDULE_MESSAGE, move |job: ScheduledMessage| {
            let s = s.clone();
            async move { send_scheduled_message(&s, job).await }
        });

        let s = services.clone();
        let enable_lidl_coupons = JobDefinition::new(engine.clone(), ENABLE_LIDL_COUPONS, move |_: ()| {
            let s = s.clone();
            async move { enable_coupons(&s, Utc::now()).await.map(|_| ()) }
        });

        let s = services.clone();
        let sync_lidl_receipts = JobDefinition::new(engine.clone(), SYNC_LIDL_RECEIPTS, move |_: ()| {
            let s = s.clone();
            async move { sync_receipts(&s).await.map(|_| ()) }
        });

        let s = services;
        let schedule_notification =
            JobDefinition::new(engine.clone(), SCHEDULE_NOTIFICATION, move |_: ()| {
                let s = s.clone();
                async move { remind_quiet_rooms(&s, Utc::now()).await.map(|_| ()) }
            });

        Self {
            schedule_message,
            enable_lidl_coupons,
            sync_lidl_receipts,
            schedule_notification,
        }
    }

    /// Start consuming every queue and install the recurring schedules.
    pub async fn register_all(&self) -> Result<(), JobError> {
        self.schedule_message.work().await?;
        self.enable_lidl_coupons.work().await?;
        self.sync_lidl_receipts.work().await?;
        self.schedule_notification.work().await?;

        self.schedule_notification.schedule(NOTIFICATION_CRON, ()).await?;
        self.enable_lidl_coupons.schedule(LIDL_CRON, ()).await?;
        self.sync_lidl_receipts.schedule(LIDL_CRON, ()).await?;

        tracing::info!("Jobs registered");
        Ok(())
    }
}
