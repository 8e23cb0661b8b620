//! Database schema definitions using SurrealQL.
//!
//! Tables are schemaless; the repositories own the record shapes. Timestamps
//! are stored as epoch milliseconds and caller-supplied JSON (payloads,
//! outputs, options, annotations) as JSON text, so values round-trip exactly.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables and indexes. Safe to run repeatedly.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    for statement in [
        QUEUE_SCHEMA,
        JOB_SCHEMA,
        SINGLETON_SCHEMA,
        ARCHIVE_SCHEMA,
        SCHEDULE_SCHEMA,
        PROCESSED_EVENT_SCHEMA,
    ] {
        db.query(statement).await?.check()?;
    }

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Queue table; record id is the queue name.
const QUEUE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS queue SCHEMALESS;
"#;

/// Job table; record id is the job UUID.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE INDEX IF NOT EXISTS job_queue ON job FIELDS queue_name;
DEFINE INDEX IF NOT EXISTS job_state ON job FIELDS state;
DEFINE INDEX IF NOT EXISTS job_start_after ON job FIELDS start_after_ms;

-- Compound index for dispatch polling
DEFINE INDEX IF NOT EXISTS job_queue_eligible ON job FIELDS queue_name, state, start_after_ms;
"#;

/// Singleton slots; record id is "<queue>/<key>".
const SINGLETON_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_singleton SCHEMALESS;
"#;

/// Terminal jobs moved out of the hot table.
const ARCHIVE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_archive SCHEMALESS;

DEFINE INDEX IF NOT EXISTS archive_queue ON job_archive FIELDS queue_name;
DEFINE INDEX IF NOT EXISTS archive_archived ON job_archive FIELDS archived_on_ms;
"#;

/// Recurring triggers; record id is the queue name.
const SCHEDULE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS schedule SCHEMALESS;
"#;

/// Idempotency markers; record id is the external event id.
const PROCESSED_EVENT_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS processed_event SCHEMALESS;
"#;
