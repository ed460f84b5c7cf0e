use futures_util::future::BoxFuture;
use scout_core::{Job, QueueKind, StatusEvent};
use scout_db::StoreError;

use super::{JobProcessor, WorkerContext};
use crate::collaborators::ScrapeOutcome;
use crate::messages::{JobOutcome, OrchestratorMessage};

/// Scrapes profiles from the Scraper queue and feeds the Event queue.
pub(crate) struct ScraperWorker;

impl JobProcessor for ScraperWorker {
    fn kind(&self) -> QueueKind {
        QueueKind::Scraper
    }

    fn reclaims_stalled(&self) -> bool {
        true
    }

    fn process<'a>(
        &'a self,
        ctx: &'a WorkerContext,
        job: &'a Job,
    ) -> BoxFuture<'a, Result<JobOutcome, StoreError>> {
        Box::pin(async move {
            match ctx.collaborators.scraper.scrape(&job.handle).await {
                ScrapeOutcome::Success(_profile) => {
                    let next = ctx.queue.enqueue(QueueKind::Event, &job.handle, None).await?;
                    ctx.publish(StatusEvent::JobEnqueued {
                        kind: QueueKind::Event,
                        job_id: next.id,
                        handle: next.handle.clone(),
                        priority: next.priority,
                        timestamp: next.enqueued_at,
                    })
                    .await;
                    ctx.complete(job).await
                }
                ScrapeOutcome::RateLimited => rate_limited(ctx, job).await,
                ScrapeOutcome::TransientError(reason) => {
                    tracing::warn!(handle = %job.handle, "Scrape failed: {}", reason);
                    ctx.settle_failure(job, &reason).await
                }
            }
        })
    }
}

async fn rate_limited(ctx: &WorkerContext, job: &Job) -> Result<JobOutcome, StoreError> {
    tracing::warn!(handle = %job.handle, "Rate limited while scraping");
    let now = ctx.now();
    ctx.publish(StatusEvent::RateLimitSignal {
        kind: job.kind,
        handle: job.handle.clone(),
        timestamp: now,
    })
    .await;

    if ctx.queue.release(job).await?.is_some() {
        ctx.publish(StatusEvent::JobReleased {
            kind: job.kind,
            job_id: job.id,
            handle: job.handle.clone(),
            timestamp: now,
        })
        .await;
    }

    if let Err(e) = ctx
        .collaborators
        .scraper
        .reset_session(ctx.config.rotate_sessions)
        .await
    {
        tracing::error!("Failed to reset scrape session: {}", e);
    }

    ctx.notify(OrchestratorMessage::RateLimited {
        handle: job.handle.clone(),
    });
    Ok(JobOutcome::Released)
}
