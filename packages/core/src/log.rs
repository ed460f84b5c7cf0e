//! Append-only log names and entries for the command/telemetry bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic position inside one log. `0` means "before the first entry".
pub type LogId = u64;

/// The three named logs shared by every process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogName {
    /// Commands from operators plus alert notifications.
    Notifications,
    /// Job and lifecycle telemetry.
    Status,
    /// Host and process health samples.
    Health,
}

impl LogName {
    pub const ALL: [LogName; 3] = [LogName::Notifications, LogName::Status, LogName::Health];

    /// Store key for this log.
    pub fn key(self) -> &'static str {
        match self {
            LogName::Notifications => "notifications",
            LogName::Status => "status",
            LogName::Health => "system:health",
        }
    }
}

impl std::fmt::Display for LogName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// One appended record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogId,
    pub appended_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}
