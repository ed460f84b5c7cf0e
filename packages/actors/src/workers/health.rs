use scout_core::LogName;
use tokio_util::sync::CancellationToken;

use super::{WorkerContext, sleep_or_cancel};

const SOURCE: &str = "health_monitor";

/// Sample host metrics into the health log and raise threshold alerts.
pub(crate) async fn run(ctx: WorkerContext, cancel: CancellationToken) {
    tracing::info!(interval = ?ctx.config.health_interval, "Health monitor started");

    loop {
        sample_once(&ctx).await;
        if !sleep_or_cancel(&cancel, ctx.config.health_interval).await {
            break;
        }
    }

    tracing::info!("Health monitor stopped");
}

async fn sample_once(ctx: &WorkerContext) {
    let sample = match ctx.collaborators.sampler.sample().await {
        Ok(sample) => sample,
        Err(e) => {
            tracing::warn!("Health sample failed: {}", e);
            return;
        }
    };

    match serde_json::to_value(&sample) {
        Ok(payload) => {
            if let Err(e) = ctx.bus.publish(LogName::Health, payload).await {
                tracing::error!("Failed to append health sample: {}", e);
            }
        }
        Err(e) => tracing::error!("Failed to encode health sample: {}", e),
    }

    let now = ctx.now();
    for alert in ctx.config.health_thresholds.check(&sample) {
        tracing::warn!(?alert, "Health threshold exceeded");
        if let Err(e) = ctx
            .bus
            .publish(LogName::Notifications, alert.to_payload(SOURCE, now))
            .await
        {
            tracing::error!("Failed to publish health alert: {}", e);
        }
    }
}
