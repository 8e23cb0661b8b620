//! Process initialization for the job subsystem.

use actors::Engine;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::error::InitError;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` filter. Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Connect the database, apply the schema and start the engine.
///
/// This should be called once at startup; the returned handle is cloned into
/// every job definition.
pub async fn init_job_queue(config: &AppConfig) -> Result<Engine, InitError> {
    tracing::info!("Initializing job queue system...");

    let db = db::init(config.database.clone()).await?;
    let engine = Engine::start(db, config.engine.clone()).await?;

    tracing::info!(timezone = %config.engine.timezone, "Job queue system initialized");
    Ok(engine)
}
