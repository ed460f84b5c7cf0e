//! Worker loops driven by the orchestrator.
//!
//! Every worker is a tokio task holding a [`WorkerContext`] and a
//! cancellation token. Workers never share job data in memory: each handoff
//! goes through the shared store.

mod event;
mod health;
mod log_processor;
mod monitor;
mod scraper;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use rand::Rng;
use ractor::ActorRef;
use scout_core::{Job, LogId, OrchestratorSnapshot, QueueKind, StatusEvent};
use scout_db::{CommandBus, FailOutcome, JobQueue, StoreError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{CollaboratorError, Collaborators};
use crate::config::OrchestratorConfig;
use crate::messages::{JobOutcome, OrchestratorMessage};

pub(crate) use event::EventWorker;
pub(crate) use log_processor::LogProcessor;
pub(crate) use monitor::CONSUMER as COMMAND_CONSUMER;
pub(crate) use scraper::ScraperWorker;

/// Everything a worker loop needs, cheap to clone.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub queue: JobQueue,
    pub bus: CommandBus,
    pub collaborators: Collaborators,
    pub config: Arc<OrchestratorConfig>,
    pub orchestrator: ActorRef<OrchestratorMessage>,
    pub snapshot: watch::Receiver<OrchestratorSnapshot>,
}

impl WorkerContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.queue.now()
    }

    pub fn may_dequeue(&self, kind: QueueKind) -> bool {
        self.snapshot.borrow().may_dequeue(kind)
    }

    /// Append a status event; telemetry failures are logged only.
    pub async fn publish(&self, event: StatusEvent) {
        if let Err(e) = self.bus.publish_event(&event).await {
            tracing::warn!("Failed to publish status event ({}): {}", event.description(), e);
        }
    }

    pub fn notify(&self, message: OrchestratorMessage) {
        if let Err(e) = self.orchestrator.send_message(message) {
            tracing::debug!("Orchestrator gone, dropping notification: {}", e);
        }
    }

    /// Settle a transient failure through the queue's retry policy.
    pub async fn settle_failure(&self, job: &Job, error: &str) -> Result<JobOutcome, StoreError> {
        let now = self.now();
        match self.queue.fail_delivery(job, error).await? {
            FailOutcome::Retrying(retried) => {
                self.publish(StatusEvent::JobFailed {
                    kind: job.kind,
                    job_id: job.id,
                    handle: job.handle.clone(),
                    error: error.to_string(),
                    attempts: retried.attempts,
                    will_retry: true,
                    timestamp: now,
                })
                .await;
            }
            FailOutcome::DeadLettered(dead) => {
                self.publish(StatusEvent::JobFailed {
                    kind: job.kind,
                    job_id: job.id,
                    handle: job.handle.clone(),
                    error: error.to_string(),
                    attempts: dead.attempts,
                    will_retry: false,
                    timestamp: now,
                })
                .await;
                self.publish(StatusEvent::JobDeadLettered {
                    kind: job.kind,
                    job_id: job.id,
                    handle: dead.handle,
                    error: error.to_string(),
                    attempts: dead.attempts,
                    timestamp: now,
                })
                .await;
            }
            FailOutcome::NotInFlight => {
                tracing::warn!(
                    kind = %job.kind,
                    job_id = %job.id,
                    "Job left processing before it could be failed"
                );
            }
        }
        Ok(JobOutcome::Failed)
    }

    /// Ack a finished job and record the completion.
    pub async fn complete(&self, job: &Job) -> Result<JobOutcome, StoreError> {
        self.queue.ack(job.kind, job.id).await?;
        let now = self.now();
        let duration_ms = job
            .processing_started_at
            .map_or(0, |started| (now - started).num_milliseconds().max(0) as u64);
        self.publish(StatusEvent::JobCompleted {
            kind: job.kind,
            job_id: job.id,
            handle: job.handle.clone(),
            duration_ms,
            timestamp: now,
        })
        .await;
        Ok(JobOutcome::Completed)
    }

    /// Reclaim stalled jobs of `kind` with the policy timeout.
    pub async fn reclaim_stalled(&self, kind: QueueKind) -> Result<usize, StoreError> {
        let count = self.queue.requeue_stalled_default(kind).await?;
        if count > 0 {
            tracing::info!(%kind, count, "Requeued stalled jobs");
            self.publish(StatusEvent::JobsReclaimed {
                kind,
                count,
                timestamp: self.now(),
            })
            .await;
        }
        Ok(count)
    }

    /// Run the directory cleanup. Returns the number of removed records.
    pub async fn run_maintenance(&self) -> Result<u64, CollaboratorError> {
        let removed = self.collaborators.directory.clean().await?;
        tracing::info!(removed, "Maintenance cleanup finished");
        Ok(removed)
    }
}

/// Processing for one queue kind.
pub(crate) trait JobProcessor: Send + Sync + 'static {
    fn kind(&self) -> QueueKind;

    /// Whether this worker periodically reclaims stalled jobs of its own kind.
    fn reclaims_stalled(&self) -> bool {
        false
    }

    /// Run the collaborator for `job` and settle it in the queue.
    fn process<'a>(
        &'a self,
        ctx: &'a WorkerContext,
        job: &'a Job,
    ) -> BoxFuture<'a, Result<JobOutcome, StoreError>>;
}

/// A spawned worker task.
pub(crate) struct WorkerHandle {
    pub name: &'static str,
    pub handle: JoinHandle<()>,
}

/// Spawn every worker for one run of the orchestrator.
///
/// `commands_read` is the command offset reached by an earlier run.
pub(crate) fn spawn_all(
    ctx: &WorkerContext,
    cancel: &CancellationToken,
    commands_read: Option<LogId>,
) -> Vec<WorkerHandle> {
    vec![
        WorkerHandle {
            name: "scraper",
            handle: tokio::spawn(run_queue_worker(ScraperWorker, ctx.clone(), cancel.clone())),
        },
        WorkerHandle {
            name: "event",
            handle: tokio::spawn(run_queue_worker(EventWorker, ctx.clone(), cancel.clone())),
        },
        WorkerHandle {
            name: "log",
            handle: tokio::spawn(run_queue_worker(LogProcessor, ctx.clone(), cancel.clone())),
        },
        WorkerHandle {
            name: "monitor",
            handle: tokio::spawn(monitor::run(ctx.clone(), cancel.clone(), commands_read)),
        },
        WorkerHandle {
            name: "health",
            handle: tokio::spawn(health::run(ctx.clone(), cancel.clone())),
        },
    ]
}

/// The dequeue/process/settle loop shared by the queue workers.
pub(crate) async fn run_queue_worker<P: JobProcessor>(
    processor: P,
    ctx: WorkerContext,
    cancel: CancellationToken,
) {
    let kind = processor.kind();
    tracing::info!(%kind, "Worker started");
    let mut last_reclaim = Instant::now();

    while !cancel.is_cancelled() {
        if !ctx.may_dequeue(kind) {
            if !sleep_or_cancel(&cancel, ctx.config.idle_interval).await {
                break;
            }
            continue;
        }

        if processor.reclaims_stalled() && last_reclaim.elapsed() >= ctx.config.stall_check_interval {
            if let Err(e) = ctx.reclaim_stalled(kind).await {
                tracing::error!(%kind, "Stall check failed: {}", e);
            }
            last_reclaim = Instant::now();
        }

        let delay = match ctx.queue.dequeue(kind).await {
            Ok(Some(job)) => match run_one(&processor, &ctx, job).await {
                Ok(()) => jittered(ctx.config.poll_interval, ctx.config.jitter),
                Err(e) => {
                    tracing::error!(%kind, "Failed to settle job: {}", e);
                    ctx.config.error_backoff
                }
            },
            Ok(None) => jittered(ctx.config.idle_interval, ctx.config.jitter),
            Err(e) => {
                tracing::error!(%kind, "Failed to dequeue: {}", e);
                ctx.config.error_backoff
            }
        };

        if !sleep_or_cancel(&cancel, delay).await {
            break;
        }
    }

    tracing::info!(%kind, "Worker stopped");
}

async fn run_one<P: JobProcessor>(
    processor: &P,
    ctx: &WorkerContext,
    job: Job,
) -> Result<(), StoreError> {
    let started_at = job.processing_started_at.unwrap_or_else(|| ctx.now());
    tracing::debug!(kind = %job.kind, job_id = %job.id, handle = %job.handle, attempt = job.attempts, "Processing job");
    ctx.notify(OrchestratorMessage::JobStarted {
        kind: job.kind,
        job_id: job.id,
        handle: job.handle.clone(),
        started_at,
    });
    ctx.publish(StatusEvent::JobStarted {
        kind: job.kind,
        job_id: job.id,
        handle: job.handle.clone(),
        attempt: job.attempts,
        timestamp: started_at,
    })
    .await;

    let result = processor.process(ctx, &job).await;
    let outcome = match &result {
        Ok(outcome) => *outcome,
        Err(_) => JobOutcome::Abandoned,
    };
    ctx.notify(OrchestratorMessage::JobFinished {
        kind: job.kind,
        job_id: job.id,
        outcome,
    });
    result.map(|_| ())
}

/// Sleep unless cancelled first. Returns `false` when cancelled.
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// `base` plus a uniformly random extra of up to `jitter`.
pub(crate) fn jittered(base: Duration, jitter: Duration) -> Duration {
    let max = jitter.as_millis() as u64;
    if max == 0 {
        return base;
    }
    base + Duration::from_millis(rand::rng().random_range(0..=max))
}
