use futures_util::future::BoxFuture;
use scout_core::{Job, QueueKind};
use scout_db::StoreError;

use super::{JobProcessor, WorkerContext};
use crate::messages::JobOutcome;

/// Records the processing time of each handle that made it through extraction.
pub(crate) struct LogProcessor;

impl JobProcessor for LogProcessor {
    fn kind(&self) -> QueueKind {
        QueueKind::Log
    }

    fn process<'a>(
        &'a self,
        ctx: &'a WorkerContext,
        job: &'a Job,
    ) -> BoxFuture<'a, Result<JobOutcome, StoreError>> {
        Box::pin(async move {
            let now = ctx.now();
            match ctx
                .collaborators
                .directory
                .mark_last_processed(&job.handle, now)
                .await
            {
                Ok(()) => ctx.complete(job).await,
                Err(e) => ctx.settle_failure(job, &e.to_string()).await,
            }
        })
    }
}
