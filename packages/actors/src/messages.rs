//! Message types for actor communication.

use chrono::{DateTime, Utc};
use ractor::RpcReplyPort;
use scout_core::{CommandEnvelope, JobId, LogId, OrchestratorSnapshot, QueueKind};

/// How a worker finished with a delivered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Handed to `fail`, retried or dead-lettered.
    Failed,
    /// Put back after a rate limit without using an attempt.
    Released,
    /// Left in processing after a store error; stall reclamation recovers it.
    Abandoned,
}

/// Messages for the Orchestrator.
#[derive(Debug)]
pub enum OrchestratorMessage {
    /// Spawn the workers and enter `Running`.
    Start {
        reply: RpcReplyPort<Result<(), String>>,
    },

    /// Execute an operator command.
    Dispatch { envelope: Box<CommandEnvelope> },

    /// A worker took a job.
    JobStarted {
        kind: QueueKind,
        job_id: JobId,
        handle: String,
        started_at: DateTime<Utc>,
    },

    /// A worker is done with its current job.
    JobFinished {
        kind: QueueKind,
        job_id: JobId,
        outcome: JobOutcome,
    },

    /// The monitor has dispatched every command up to `through`.
    CommandsRead { through: LogId },

    /// The scraper hit a rate limit; re-evaluate the gate.
    RateLimited { handle: String },

    /// Get a copy of the current state.
    GetSnapshot {
        reply: RpcReplyPort<OrchestratorSnapshot>,
    },

    /// Periodic tick for cooldown expiry.
    Tick,
}

/// Error type for orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Failed to spawn orchestrator: {0}")]
    Spawn(String),

    #[error("Orchestrator unreachable: {0}")]
    Messaging(String),

    #[error("Orchestrator did not answer in time")]
    Timeout,

    #[error("Orchestrator refused: {0}")]
    Rejected(String),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] crate::collaborators::CollaboratorError),

    #[error("Store error: {0}")]
    Store(#[from] scout_db::StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}
