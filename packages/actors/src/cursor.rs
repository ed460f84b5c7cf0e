//! File-based persistence of log consumer offsets.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use scout_core::{LogId, LogName};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// On-disk record for one consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCursor {
    pub log: LogName,
    pub last_read_id: LogId,
    pub saved_at: DateTime<Utc>,
}

/// Stores `last_read_id` per consumer so a restart resumes where it left off.
pub struct CursorStore {
    /// Base directory for cursor files.
    base_dir: PathBuf,
}

impl CursorStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Ensure the base directory exists.
    pub async fn init(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    fn path(&self, consumer: &str) -> PathBuf {
        self.base_dir.join(format!("{}.cursor.json", consumer))
    }

    /// Save a consumer's offset.
    pub async fn save(
        &self,
        consumer: &str,
        log: LogName,
        last_read_id: LogId,
    ) -> Result<(), PersistenceError> {
        let path = self.path(consumer);
        let record = SavedCursor {
            log,
            last_read_id,
            saved_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record)?;

        // Write to temp file first, then rename
        let temp_path = self.base_dir.join(format!("{}.cursor.json.tmp", consumer));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &path).await?;

        tracing::debug!("Saved cursor {} at {} to {:?}", consumer, last_read_id, path);
        Ok(())
    }

    /// Load a consumer's offset, `None` if it never saved one for `log`.
    pub async fn load(
        &self,
        consumer: &str,
        log: LogName,
    ) -> Result<Option<LogId>, PersistenceError> {
        let path = self.path(consumer);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let json = fs::read_to_string(&path).await?;
        let record: SavedCursor = serde_json::from_str(&json)?;
        if record.log != log {
            tracing::warn!(
                "Cursor {} was saved for {} not {}, ignoring",
                consumer,
                record.log,
                log
            );
            return Ok(None);
        }
        Ok(Some(record.last_read_id))
    }
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
