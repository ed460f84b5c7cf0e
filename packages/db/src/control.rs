//! Entry points used by the API and chat-ops processes.

use std::sync::Arc;

use scout_core::{
    Clock, CommandEnvelope, Job, JobPayload, LogEntry, LogId, QueueKind, QueuePolicy,
    QueueStatus, StatusEvent, SystemClock,
};

use crate::store::SharedStore;
use crate::{CommandBus, JobQueue, StoreError};

/// Queue and bus access for processes that do not run workers.
#[derive(Clone)]
pub struct ControlClient {
    queue: JobQueue,
    bus: CommandBus,
}

impl ControlClient {
    pub fn new(store: Arc<dyn SharedStore>, policy: QueuePolicy) -> Self {
        Self::with_clock(store, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn SharedStore>,
        policy: QueuePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue: JobQueue::with_clock(store.clone(), policy, clock.clone()),
            bus: CommandBus::with_clock(store, clock),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn bus(&self) -> &CommandBus {
        &self.bus
    }

    /// Enqueue a job and record it on the status log.
    pub async fn enqueue(
        &self,
        kind: QueueKind,
        handle: &str,
        priority: Option<i64>,
    ) -> Result<Job, StoreError> {
        let job = self.queue.enqueue(kind, handle, priority).await?;
        let event = StatusEvent::JobEnqueued {
            kind,
            job_id: job.id,
            handle: job.handle.clone(),
            priority: job.priority,
            timestamp: job.enqueued_at,
        };
        if let Err(e) = self.bus.publish_event(&event).await {
            tracing::warn!("Failed to publish enqueue event for {}: {}", job.id, e);
        }
        Ok(job)
    }

    pub async fn queue_status(&self, kind: QueueKind) -> Result<QueueStatus, StoreError> {
        self.queue.status(kind).await
    }

    /// Dead-letter entries of `kind` with their causing errors, in payload form.
    pub async fn dead_letters(&self, kind: QueueKind) -> Result<Vec<JobPayload>, StoreError> {
        let jobs = self.queue.list_dead_letter(kind).await?;
        Ok(jobs.iter().map(Job::to_payload).collect())
    }

    pub async fn publish_command(&self, envelope: &CommandEnvelope) -> Result<LogEntry, StoreError> {
        self.bus.publish_command(envelope).await
    }

    pub async fn read_status(&self, after: LogId, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        self.bus.read_status(after, limit).await
    }
}
