//! Database schema definitions using SurrealQL.

use crate::{Database, StoreError};

/// Initialize the database schema.
///
/// This creates all necessary tables and indexes. Safe to run from every
/// process at startup.
pub async fn init_schema(db: &Database) -> Result<(), StoreError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(LOG_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// One record per job; `state` places it in exactly one of the queue, the
/// processing set or the dead-letter set.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

-- Compound index for queue polling (queued jobs by priority, then FIFO)
DEFINE INDEX IF NOT EXISTS job_kind_state ON job FIELDS kind, state, priority, enqueued_at;
DEFINE INDEX IF NOT EXISTS job_handle ON job FIELDS kind, handle;
"#;

/// Append-only log tables.
const LOG_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS log_entry SCHEMALESS;
DEFINE TABLE IF NOT EXISTS log_seq SCHEMALESS;

DEFINE INDEX IF NOT EXISTS log_entry_seq ON log_entry FIELDS log, seq UNIQUE;
"#;
