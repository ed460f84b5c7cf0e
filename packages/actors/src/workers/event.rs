use futures_util::future::BoxFuture;
use scout_core::{Job, QueueKind, StatusEvent};
use scout_db::StoreError;

use super::{JobProcessor, WorkerContext};
use crate::collaborators::ExtractOutcome;
use crate::messages::JobOutcome;

/// Extracts event dates for scraped profiles.
pub(crate) struct EventWorker;

impl JobProcessor for EventWorker {
    fn kind(&self) -> QueueKind {
        QueueKind::Event
    }

    fn process<'a>(
        &'a self,
        ctx: &'a WorkerContext,
        job: &'a Job,
    ) -> BoxFuture<'a, Result<JobOutcome, StoreError>> {
        Box::pin(async move {
            match ctx.collaborators.extractor.extract(&job.handle).await {
                ExtractOutcome::Success => {
                    // Hand off before the ack; a failed handoff leaves the
                    // event job in flight for stall reclamation
                    let next = ctx.queue.enqueue(QueueKind::Log, &job.handle, None).await?;
                    ctx.publish(StatusEvent::JobEnqueued {
                        kind: QueueKind::Log,
                        job_id: next.id,
                        handle: next.handle.clone(),
                        priority: next.priority,
                        timestamp: next.enqueued_at,
                    })
                    .await;
                    ctx.complete(job).await
                }
                ExtractOutcome::TransientError(reason) => {
                    tracing::warn!(handle = %job.handle, "Extraction failed: {}", reason);
                    ctx.settle_failure(job, &reason).await
                }
            }
        })
    }
}
