//! Shared-store coordination for the scrape pipeline.
//!
//! This crate provides the substrate every process talks to, and the job
//! queue, command bus and rate gate built on top of it.
//!
//! # Features
//!
//! - `memory` (default): In-memory SurrealDB engine for tests and local runs
//! - `remote`: WebSocket client for a shared SurrealDB server
//! - `rocksdb`: RocksDB for persistent file-based storage

mod command_bus;
mod connection;
mod control;
mod job_queue;
mod rate_gate;
mod schema;
pub mod store;

pub use command_bus::{CommandBus, DEFAULT_BATCH, LogCursor, StartPosition};
pub use connection::{Database, DbConfig, StoreError, open};
pub use control::ControlClient;
pub use job_queue::{FailOutcome, JobQueue};
pub use rate_gate::{RateGate, RateGateConfig, RateLevel};
pub use schema::init_schema;
pub use store::{MemoryStore, Requeue, SharedStore, SurrealStore};

/// Connect to the configured SurrealDB and make sure the schema exists.
///
/// This should be called once per process at startup.
pub async fn connect(config: &DbConfig) -> Result<SurrealStore, StoreError> {
    SurrealStore::connect(config).await
}
