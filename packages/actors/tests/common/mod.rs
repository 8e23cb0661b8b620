#![allow(dead_code)]

use std::time::Duration;

use actors::{Engine, EngineConfig};
use db::{Database, DbConfig};
use queue_core::JobEvent;
use tokio::sync::broadcast;

/// Engine over a fresh in-memory database. Background ticks are slow so
/// tests drive cron and maintenance explicitly.
pub async fn start_engine() -> Result<(Engine, Database), Box<dyn std::error::Error>> {
    start_engine_with(test_config()).await
}

pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_cron_interval(Duration::from_secs(3600))
        .with_maintenance_interval(Duration::from_secs(3600))
}

pub async fn start_engine_with(
    config: EngineConfig,
) -> Result<(Engine, Database), Box<dyn std::error::Error>> {
    let db = db::init(DbConfig::memory()).await?;
    let engine = Engine::start(db.clone(), config).await?;
    Ok((engine, db))
}

/// First event matching `pred` within five seconds.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<JobEvent>, mut pred: F) -> Option<JobEvent>
where
    F: FnMut(&JobEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
