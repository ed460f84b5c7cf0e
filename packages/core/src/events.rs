//! Telemetry events appended to the status log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, QueueKind, RunState};

/// Events emitted by the workers and orchestrator for out-of-process observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    // Job events
    /// A new job was enqueued.
    JobEnqueued {
        kind: QueueKind,
        job_id: JobId,
        handle: String,
        priority: i64,
        timestamp: DateTime<Utc>,
    },
    /// A worker took a job into processing.
    JobStarted {
        kind: QueueKind,
        job_id: JobId,
        handle: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully.
    JobCompleted {
        kind: QueueKind,
        job_id: JobId,
        handle: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job failed and was either re-queued or dead-lettered.
    JobFailed {
        kind: QueueKind,
        job_id: JobId,
        handle: String,
        error: String,
        attempts: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// A job exhausted its attempts and now needs an operator.
    JobDeadLettered {
        kind: QueueKind,
        job_id: JobId,
        handle: String,
        error: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    /// A rate-limited job was put back without consuming an attempt.
    JobReleased {
        kind: QueueKind,
        job_id: JobId,
        handle: String,
        timestamp: DateTime<Utc>,
    },
    /// Stalled jobs were moved back to the queue.
    JobsReclaimed {
        kind: QueueKind,
        count: usize,
        timestamp: DateTime<Utc>,
    },
    /// Queued jobs were discarded by an operator.
    QueueFlushed {
        kind: QueueKind,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    // Rate limiting
    /// The scraped target answered with a rate limit.
    RateLimitSignal {
        kind: QueueKind,
        handle: String,
        timestamp: DateTime<Utc>,
    },
    /// Scraping is suspended until `until`.
    CooldownStarted {
        level: String,
        signals: usize,
        until: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    /// The cooldown window passed.
    CooldownEnded { timestamp: DateTime<Utc> },

    // Orchestrator events
    /// The orchestrator moved between lifecycle states.
    StateChanged {
        old_state: RunState,
        new_state: RunState,
        timestamp: DateTime<Utc>,
    },
    /// A bus command was executed.
    CommandHandled {
        command: String,
        source: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },
    /// A bus payload was not acted on.
    CommandIgnored {
        command: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl StatusEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            StatusEvent::JobEnqueued { timestamp, .. }
            | StatusEvent::JobStarted { timestamp, .. }
            | StatusEvent::JobCompleted { timestamp, .. }
            | StatusEvent::JobFailed { timestamp, .. }
            | StatusEvent::JobDeadLettered { timestamp, .. }
            | StatusEvent::JobReleased { timestamp, .. }
            | StatusEvent::JobsReclaimed { timestamp, .. }
            | StatusEvent::QueueFlushed { timestamp, .. }
            | StatusEvent::RateLimitSignal { timestamp, .. }
            | StatusEvent::CooldownStarted { timestamp, .. }
            | StatusEvent::CooldownEnded { timestamp }
            | StatusEvent::StateChanged { timestamp, .. }
            | StatusEvent::CommandHandled { timestamp, .. }
            | StatusEvent::CommandIgnored { timestamp, .. } => *timestamp,
        }
    }

    /// Whether this is the signal the rate gate counts.
    pub fn is_rate_limit_signal(&self) -> bool {
        matches!(self, StatusEvent::RateLimitSignal { .. })
    }

    /// Encode for appending to the status log.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Decode a status-log payload; `None` for foreign payloads.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            StatusEvent::JobEnqueued { kind, handle, .. } => {
                format!("{} job for {} enqueued", kind, handle)
            }
            StatusEvent::JobStarted {
                kind,
                handle,
                attempt,
                ..
            } => format!("{} job for {} started (attempt {})", kind, handle, attempt),
            StatusEvent::JobCompleted {
                kind,
                handle,
                duration_ms,
                ..
            } => format!("{} job for {} completed in {}ms", kind, handle, duration_ms),
            StatusEvent::JobFailed {
                kind,
                handle,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("{} job for {} failed: {}{}", kind, handle, error, retry)
            }
            StatusEvent::JobDeadLettered {
                kind,
                handle,
                error,
                attempts,
                ..
            } => format!(
                "{} job for {} dead-lettered after {} attempts: {}",
                kind, handle, attempts, error
            ),
            StatusEvent::JobReleased { kind, handle, .. } => {
                format!("{} job for {} released after rate limit", kind, handle)
            }
            StatusEvent::JobsReclaimed { kind, count, .. } => {
                format!("{} stalled {} jobs reclaimed", count, kind)
            }
            StatusEvent::QueueFlushed { kind, count, .. } => {
                format!("{} queue flushed ({} jobs)", kind, count)
            }
            StatusEvent::RateLimitSignal { handle, .. } => {
                format!("Rate limited while scraping {}", handle)
            }
            StatusEvent::CooldownStarted { level, until, .. } => {
                format!("{} cooldown until {}", level, until.to_rfc3339())
            }
            StatusEvent::CooldownEnded { .. } => "Cooldown ended".to_string(),
            StatusEvent::StateChanged {
                old_state,
                new_state,
                ..
            } => format!("Orchestrator {} -> {}", old_state, new_state),
            StatusEvent::CommandHandled {
                command, detail, ..
            } => format!("Command {}: {}", command, detail),
            StatusEvent::CommandIgnored {
                command, reason, ..
            } => format!("Command {} ignored: {}", command, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_tagged_by_event_name() {
        let event = StatusEvent::RateLimitSignal {
            kind: QueueKind::Scraper,
            handle: "club_a".into(),
            timestamp: Utc::now(),
        };
        let payload = event.to_payload();
        assert_eq!(payload["event"], "rate_limit_signal");
        assert_eq!(StatusEvent::from_payload(&payload), Some(event));
        assert_eq!(StatusEvent::from_payload(&serde_json::json!({"cpu": 3})), None);
    }
}
