//! Contracts for the out-of-process systems the workers drive.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scout_core::HealthSample;

/// Future type for collaborator calls.
pub type CollaboratorFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors from a collaborator call that is not a scrape outcome.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Collaborator returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid collaborator response: {0}")]
    Decode(String),
}

/// Result of scraping one profile.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrapeOutcome {
    Success(serde_json::Value),
    /// The target pushed back; the session should be replaced.
    RateLimited,
    TransientError(String),
}

/// Result of extracting events for one profile.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractOutcome {
    Success,
    TransientError(String),
}

/// Browser-automation scraping of a profile.
pub trait ScrapeProvider: Send + Sync + 'static {
    fn scrape<'a>(&'a self, handle: &'a str) -> CollaboratorFuture<'a, ScrapeOutcome>;

    /// Drop the current automation session and open a fresh one.
    fn reset_session(&self, rotate: bool) -> CollaboratorFuture<'_, Result<(), CollaboratorError>>;
}

/// Event-date extraction from scraped posts.
pub trait EventExtractor: Send + Sync + 'static {
    fn extract<'a>(&'a self, handle: &'a str) -> CollaboratorFuture<'a, ExtractOutcome>;
}

/// The relational club store.
pub trait ClubDirectory: Send + Sync + 'static {
    /// Handles that are due for a scrape, most overdue first.
    fn due_handles(
        &self,
        limit: Option<u32>,
    ) -> CollaboratorFuture<'_, Result<Vec<String>, CollaboratorError>>;

    fn mark_last_processed<'a>(
        &'a self,
        handle: &'a str,
        at: DateTime<Utc>,
    ) -> CollaboratorFuture<'a, Result<(), CollaboratorError>>;

    /// Scheduled cleanup of stale records. Returns how many were removed.
    fn clean(&self) -> CollaboratorFuture<'_, Result<u64, CollaboratorError>>;
}

/// Host and process metrics source.
pub trait HostSampler: Send + Sync + 'static {
    fn sample(&self) -> CollaboratorFuture<'_, Result<HealthSample, CollaboratorError>>;
}

/// Every collaborator the orchestrator and its workers use.
#[derive(Clone)]
pub struct Collaborators {
    pub scraper: Arc<dyn ScrapeProvider>,
    pub extractor: Arc<dyn EventExtractor>,
    pub directory: Arc<dyn ClubDirectory>,
    pub sampler: Arc<dyn HostSampler>,
}
