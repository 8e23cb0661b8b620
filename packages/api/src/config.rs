//! Process configuration from the environment.

use std::time::Duration;

use actors::EngineConfig;
use chrono_tz::Tz;
use db::DbConfig;

use crate::error::ConfigError;

/// Everything needed to bring up the job subsystem.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DbConfig,
    /// Engine timing; its `timezone` is the default zone for every schedule.
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DbConfig::memory(),
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read the configuration from process environment variables.
    ///
    /// | Variable                 | Default      |
    /// |--------------------------|--------------|
    /// | `DATABASE_URL`           | `mem://`     |
    /// | `DATABASE_NAMESPACE`     | `jobqueue`   |
    /// | `DATABASE_NAME`          | `main`       |
    /// | `DATABASE_USER`          | unset        |
    /// | `DATABASE_PASSWORD`      | unset        |
    /// | `JOBS_TIMEZONE`          | `UTC`        |
    /// | `JOBS_POLL_INTERVAL_MS`  | `2000`       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`AppConfig::from_env`] with an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("DATABASE_URL") {
            config.database = config.database.with_endpoint(url);
        }
        if let Some(namespace) = get("DATABASE_NAMESPACE") {
            config.database = config.database.with_namespace(namespace);
        }
        if let Some(name) = get("DATABASE_NAME") {
            config.database = config.database.with_database(name);
        }

        match (get("DATABASE_USER"), get("DATABASE_PASSWORD")) {
            (Some(user), Some(password)) => {
                config.database = config.database.with_credentials(user, password);
            }
            (Some(_), None) => {
                return Err(ConfigError::IncompleteCredentials("DATABASE_USER", "DATABASE_PASSWORD"));
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompleteCredentials("DATABASE_PASSWORD", "DATABASE_USER"));
            }
            (None, None) => {}
        }

        if let Some(zone) = get("JOBS_TIMEZONE") {
            let timezone = zone
                .trim()
                .parse::<Tz>()
                .map_err(|_| ConfigError::InvalidTimezone(zone.clone()))?;
            config.engine = config.engine.with_timezone(timezone);
        }

        if let Some(raw) = get("JOBS_POLL_INTERVAL_MS") {
            let millis = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| ConfigError::InvalidPollInterval(raw.clone()))?;
            config.engine = config
                .engine
                .with_poll_interval(Duration::from_millis(millis));
        }

        Ok(config)
    }
}
