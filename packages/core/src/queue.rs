//! Queue policy and status types.

use serde::{Deserialize, Serialize};

/// Retry and reclamation policy shared by every queue kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuePolicy {
    /// Deliveries allowed before a failing job is dead-lettered.
    pub max_attempts: u32,
    /// Priority given to fresh enqueues when the caller has no preference.
    pub default_priority: i64,
    /// Priority for retried jobs; served ahead of fresh backlog.
    pub retry_priority: i64,
    /// Priority for jobs reclaimed from a stalled worker.
    pub stall_priority: i64,
    /// In-flight age after which a job counts as stalled (seconds).
    pub stall_timeout_secs: u64,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            default_priority: 0,
            retry_priority: -10,
            stall_priority: -5,
            stall_timeout_secs: 1800,
        }
    }
}

impl QueuePolicy {
    pub fn stall_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stall_timeout_secs as i64)
    }
}

/// Point-in-time counts for one queue kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStatus {
    pub queued: u64,
    pub processing: u64,
    pub failed: u64,
}

impl QueueStatus {
    /// Jobs not yet finished (queued + processing).
    pub fn active(&self) -> u64 {
        self.queued + self.processing
    }

    pub fn is_idle(&self) -> bool {
        self.active() == 0
    }
}
