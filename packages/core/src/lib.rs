//! Core domain types for the scrape coordination layer.
//!
//! This crate contains shared types used across all packages:
//! - Job, QueueKind and QueuePolicy for work items
//! - Log names, commands and status events for the command bus
//! - Orchestrator state snapshots and health samples

mod clock;
mod command;
mod events;
mod health;
mod job;
mod log;
mod queue;
mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandEnvelope, CommandParseError};
pub use events::StatusEvent;
pub use health::{HealthAlert, HealthSample, HealthThresholds};
pub use job::{Job, JobId, JobPayload, JobState, QueueKind, UnknownQueueKind};
pub use log::{LogEntry, LogId, LogName};
pub use queue::{QueuePolicy, QueueStatus};
pub use state::{CurrentJob, JobCounters, OrchestratorSnapshot, RunState};
