//! Engine timing and provisioning settings.

use std::time::Duration;

use chrono_tz::Tz;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often an idle worker asks its queue for work.
    pub poll_interval: Duration,
    /// How often expired active jobs are swept and terminal jobs archived.
    pub maintenance_interval: Duration,
    /// How often schedules are evaluated.
    pub cron_interval: Duration,
    /// How long archived jobs are kept.
    pub archive_retention: Duration,
    /// Create queues with default config on first send.
    pub auto_create_queues: bool,
    /// Zone cron expressions are evaluated in when a schedule names none.
    pub timezone: Tz,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            maintenance_interval: Duration::from_secs(60),
            cron_interval: Duration::from_secs(30),
            archive_retention: Duration::from_secs(7 * 24 * 60 * 60),
            auto_create_queues: true,
            timezone: Tz::UTC,
        }
    }
}

impl EngineConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_cron_interval(mut self, interval: Duration) -> Self {
        self.cron_interval = interval;
        self
    }

    pub fn with_archive_retention(mut self, retention: Duration) -> Self {
        self.archive_retention = retention;
        self
    }

    pub fn with_auto_create_queues(mut self, enabled: bool) -> Self {
        self.auto_create_queues = enabled;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Look-back window for schedule evaluation. Occurrences older than this
    /// when a tick runs are skipped, not caught up.
    pub fn cron_window(&self) -> chrono::Duration {
        let window = (self.cron_interval * 2).max(Duration::from_secs(60));
        chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(60))
    }
}
