//! Application jobs and the chat event pipeline.
//!
//! - `scheduleMessage` - post a message to a room at a later time
//! - `enableLidlCoupons` - activate live loyalty coupons
//! - `syncLidlReceipts` - store new purchase receipts
//! - `scheduleNotification` - remind about quiet rooms
//! - [`TranscriptionPipeline`] - transcribe voice messages exactly once

mod handlers;
mod registry;
pub mod services;
mod transcription;

pub use handlers::{
    ScheduledMessage, Services, enable_coupons, remind_quiet_rooms, send_scheduled_message,
    sync_receipts,
};
pub use registry::{
    ENABLE_LIDL_COUPONS, Jobs, LIDL_CRON, NOTIFICATION_CRON, SCHEDULE_MESSAGE,
    SCHEDULE_NOTIFICATION, SYNC_LIDL_RECEIPTS,
};
pub use transcription::{
    DISABLE_COMMAND, ENABLE_COMMAND, MessageContent, Outcome, PipelineError, RoomEvent,
    TranscriptionPipeline,
};
