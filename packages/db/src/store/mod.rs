//! The shared coordination substrate.
//!
//! Every process (API, chat-ops bots, workers) talks to the same store. Job
//! state transitions are exposed as single atomic operations so callers never
//! have to compose a remove and an insert themselves.

mod memory;
mod surreal;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use scout_core::{Job, JobId, JobState, LogEntry, LogId, LogName, QueueKind, QueueStatus};

use crate::StoreError;

pub use memory::MemoryStore;
pub use surreal::SurrealStore;

/// Result type for store futures.
pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, StoreError>>;

/// How an in-flight job goes back to the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Requeue {
    pub priority: i64,
    pub attempts: u32,
    /// Only move the job if it is still the delivery that started at this instant.
    pub only_if_started_at: Option<DateTime<Utc>>,
}

/// Substrate operations needed by the job queue and the command bus.
pub trait SharedStore: Send + Sync + 'static {
    /// Look up a job by id in whichever set it currently belongs to.
    fn get_job(&self, id: JobId) -> StoreFuture<'_, Option<(JobState, Job)>>;

    /// Insert a job into the queue of its kind.
    fn insert_queued<'a>(&'a self, job: &'a Job) -> StoreFuture<'a, ()>;

    /// Move the most urgent queued job into processing.
    ///
    /// Sets `processing_started_at = now` and increments `attempts`. Two
    /// concurrent claims never return the same job.
    fn claim_next(&self, kind: QueueKind, now: DateTime<Utc>) -> StoreFuture<'_, Option<Job>>;

    /// Remove an in-flight job. `None` if it was not in processing.
    fn remove_processing(&self, kind: QueueKind, id: JobId) -> StoreFuture<'_, Option<Job>>;

    /// Move an in-flight job back to the queue. `None` if it was not in processing.
    fn requeue_processing(
        &self,
        kind: QueueKind,
        id: JobId,
        requeue: Requeue,
    ) -> StoreFuture<'_, Option<Job>>;

    /// Move an in-flight job to the dead-letter set. `None` if it was not in processing.
    fn dead_letter_processing<'a>(
        &'a self,
        kind: QueueKind,
        id: JobId,
        error: &'a str,
        failed_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Option<Job>>;

    /// List jobs of a kind in a state, most urgent first.
    fn list_jobs(&self, kind: QueueKind, state: JobState) -> StoreFuture<'_, Vec<Job>>;

    /// Delete jobs of a kind in a state, optionally only those for `handle`.
    fn remove_jobs<'a>(
        &'a self,
        kind: QueueKind,
        state: JobState,
        handle: Option<&'a str>,
    ) -> StoreFuture<'a, Vec<Job>>;

    fn counts(&self, kind: QueueKind) -> StoreFuture<'_, QueueStatus>;

    /// Append to a log and return the entry with its new monotonic id.
    fn append_log(
        &self,
        log: LogName,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, LogEntry>;

    /// Entries strictly after `after`, ascending, at most `limit`.
    fn read_log(&self, log: LogName, after: LogId, limit: usize) -> StoreFuture<'_, Vec<LogEntry>>;

    /// Id of the newest entry, `0` for an empty log.
    fn last_log_id(&self, log: LogName) -> StoreFuture<'_, LogId>;
}
