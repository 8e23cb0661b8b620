use std::time::Duration;

use api::{AppConfig, Engine, JobEvent, init_job_queue};
use tokio::sync::broadcast;

/// Engine over a fresh in-memory database with fast polling.
pub async fn start_engine() -> Result<Engine, Box<dyn std::error::Error>> {
    let mut config = AppConfig::default();
    config.engine = config
        .engine
        .with_poll_interval(Duration::from_millis(20))
        .with_cron_interval(Duration::from_secs(3600))
        .with_maintenance_interval(Duration::from_secs(3600));
    Ok(init_job_queue(&config).await?)
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
