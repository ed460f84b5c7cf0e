//! Orchestrator lifecycle state and its read-only snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, QueueKind};

/// Lifecycle of the worker process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No workers are running.
    #[default]
    Stopped,
    /// Workers are consuming queues.
    Running,
    /// Workers idle until resumed.
    Paused,
    /// Scraping is suspended until the cooldown passes; other workers continue.
    RateLimited,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Stopped => write!(f, "stopped"),
            RunState::Running => write!(f, "running"),
            RunState::Paused => write!(f, "paused"),
            RunState::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Cumulative outcome counters for one queue kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobCounters {
    pub completed: u64,
    pub failed: u64,
    pub rate_limited: u64,
}

/// The job a worker currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentJob {
    pub job_id: JobId,
    pub handle: String,
    pub started_at: DateTime<Utc>,
}

/// Read-only copy of the orchestrator state handed to workers and callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSnapshot {
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_jobs: BTreeMap<QueueKind, CurrentJob>,
    #[serde(default)]
    pub counters: BTreeMap<QueueKind, JobCounters>,
}

impl OrchestratorSnapshot {
    /// Whether a worker of `kind` may take a new job.
    ///
    /// Pausing halts every worker. A rate-limit cooldown only halts scraping,
    /// until the orchestrator ends it and moves back to `Running`.
    pub fn may_dequeue(&self, kind: QueueKind) -> bool {
        match self.state {
            RunState::Running => true,
            RunState::Stopped | RunState::Paused => false,
            RunState::RateLimited => kind != QueueKind::Scraper,
        }
    }

    pub fn counters_for(&self, kind: QueueKind) -> JobCounters {
        self.counters.get(&kind).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cooldown_blocks_only_the_scraper() {
        let now = Utc.timestamp_opt(10_000, 0).unwrap();
        let mut snapshot = OrchestratorSnapshot {
            state: RunState::RateLimited,
            rate_limited_until: Some(now + chrono::Duration::hours(12)),
            ..Default::default()
        };

        assert!(!snapshot.may_dequeue(QueueKind::Scraper));
        assert!(snapshot.may_dequeue(QueueKind::Event));
        assert!(snapshot.may_dequeue(QueueKind::Log));

        // A passed deadline alone does not reopen scraping
        snapshot.rate_limited_until = Some(now - chrono::Duration::seconds(1));
        assert!(!snapshot.may_dequeue(QueueKind::Scraper));

        snapshot.state = RunState::Running;
        assert!(snapshot.may_dequeue(QueueKind::Scraper));
    }

    #[test]
    fn paused_blocks_everyone() {
        let snapshot = OrchestratorSnapshot {
            state: RunState::Paused,
            ..Default::default()
        };
        for kind in QueueKind::ALL {
            assert!(!snapshot.may_dequeue(kind));
        }
    }
}
