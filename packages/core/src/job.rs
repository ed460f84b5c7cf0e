//! Job domain types for scheduled scrape/extract work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
///
/// A handle may be enqueued more than once; each enqueue mints its own id so
/// duplicates coexist as distinct jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The independent pipelines sharing the same queue mechanics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Scraper,
    Event,
    Log,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [QueueKind::Scraper, QueueKind::Event, QueueKind::Log];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueKind::Scraper => "scraper",
            QueueKind::Event => "event",
            QueueKind::Log => "log",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown queue kind: {0}")]
pub struct UnknownQueueKind(pub String);

impl std::str::FromStr for QueueKind {
    type Err = UnknownQueueKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scraper" | "scrape" => Ok(QueueKind::Scraper),
            "event" | "events" => Ok(QueueKind::Event),
            "log" | "logs" => Ok(QueueKind::Log),
            other => Err(UnknownQueueKind(other.to_string())),
        }
    }
}

/// Where a job currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the priority queue.
    Queued,
    /// Delivered to a worker and not yet acked or failed.
    Processing,
    /// Dead-lettered after exhausting its attempts.
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Failed => "failed",
        }
    }
}

/// A unit of scheduled work identified by a target handle and queue kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: QueueKind,
    /// Target profile handle.
    pub handle: String,
    pub enqueued_at: DateTime<Utc>,
    /// Incremented on every delivery, not only on failure.
    pub attempts: u32,
    /// Lower is more urgent.
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a fresh job with zero attempts.
    pub fn new(
        kind: QueueKind,
        handle: impl Into<String>,
        priority: i64,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            kind,
            handle: handle.into(),
            enqueued_at,
            attempts: 0,
            priority,
            processing_started_at: None,
            error: None,
            failed_at: None,
        }
    }

    /// Ordering key inside a queue: priority, then FIFO by enqueue time.
    pub fn queue_order(&self) -> (i64, DateTime<Utc>, JobId) {
        (self.priority, self.enqueued_at, self.id)
    }

    /// Whether this in-flight job has been processing longer than `timeout`.
    pub fn is_stalled(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.processing_started_at
            .is_some_and(|started| now - started > timeout)
    }

    /// Convert to the external payload shape shared with the API and bots.
    pub fn to_payload(&self) -> JobPayload {
        JobPayload {
            instagram_handle: self.handle.clone(),
            enqueued_at: to_epoch_secs(self.enqueued_at),
            attempts: self.attempts,
            priority: Some(self.priority),
            processing_started: self.processing_started_at.map(to_epoch_secs),
            error: self.error.clone(),
            failed_at: self.failed_at.map(to_epoch_secs),
        }
    }
}

/// Job payload as exchanged with out-of-process collaborators.
///
/// Timestamps are float seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(alias = "handle")]
    pub instagram_handle: String,
    pub enqueued_at: f64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<f64>,
}

fn to_epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
