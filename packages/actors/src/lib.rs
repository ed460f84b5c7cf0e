//! Worker-process runtime for the scrape coordination layer.
//!
//! This crate provides the Ractor-based orchestrator and the worker loops it
//! drives, plus the collaborator contracts those loops call out to.
//!
//! # Architecture
//!
//! - `Orchestrator` - actor owning the run state (stopped, running, paused,
//!   rate limited) and the worker tasks
//! - Queue workers - scraper, event and log loops over the shared `JobQueue`
//! - Monitor - stall reclamation, maintenance and command intake from the bus
//! - Health monitor - host samples into the health log
//!
//! # Usage
//!
//! ```ignore
//! use scout_actors::{OrchestratorArgs, OrchestratorConfig, start_orchestrator};
//!
//! let args = OrchestratorArgs::new(store, collaborators, OrchestratorConfig::from_env()?);
//! let orchestrator = start_orchestrator(args).await?;
//! orchestrator.start().await?;
//! orchestrator.wait_stopped().await;
//! ```

mod collaborators;
mod config;
mod cursor;
mod messages;
mod orchestrator;
mod sampler;
mod workers;

pub use collaborators::{
    ClubDirectory, CollaboratorError, CollaboratorFuture, Collaborators, EventExtractor,
    ExtractOutcome, HostSampler, ScrapeOutcome, ScrapeProvider,
};
pub use config::{ConfigError, OrchestratorConfig};
pub use cursor::{CursorStore, PersistenceError, SavedCursor};
pub use messages::{JobOutcome, OrchestratorError, OrchestratorMessage};
pub use orchestrator::{
    Orchestrator, OrchestratorArgs, OrchestratorHandle, OrchestratorState, start_orchestrator,
};
pub use sampler::SysinfoSampler;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
