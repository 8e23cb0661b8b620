use db::{Database, DbConfig, DbError};

/// Fresh in-memory database with the schema applied. Every call gets its own
/// datastore, so tests never share rows.
pub async fn setup_db() -> Result<Database, DbError> {
    db::init(DbConfig::memory()).await
}
