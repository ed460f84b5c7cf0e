//! Stall reclamation, scheduled maintenance and command intake.
//!
//! The monitor keeps running while the orchestrator is paused or rate
//! limited: it is the only path by which a `resume` can arrive.

use scout_core::{
    CommandEnvelope, CommandParseError, LogEntry, LogId, LogName, QueueKind, StatusEvent,
};
use scout_db::{LogCursor, StartPosition};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{WorkerContext, sleep_or_cancel};
use crate::cursor::CursorStore;
use crate::messages::OrchestratorMessage;

/// Name the command cursor is persisted under.
pub(crate) const CONSUMER: &str = "monitor";

/// Run until cancelled. `resume_after` is the last command offset this
/// process already consumed, if any.
pub(crate) async fn run(ctx: WorkerContext, cancel: CancellationToken, resume_after: Option<LogId>) {
    tracing::info!("Monitor started");

    let Some(mut cursor) = open_cursor(&ctx, resume_after, &cancel).await else {
        tracing::info!("Monitor stopped");
        return;
    };
    tracing::info!(after = cursor.last_read_id(), "Consuming commands");
    ctx.notify(OrchestratorMessage::CommandsRead {
        through: cursor.last_read_id(),
    });

    reclaim_all(&ctx).await;
    let mut last_reclaim = Instant::now();
    let mut last_maintenance = Instant::now();

    while !cancel.is_cancelled() {
        if last_reclaim.elapsed() >= ctx.config.stall_check_interval {
            reclaim_all(&ctx).await;
            last_reclaim = Instant::now();
        }
        if last_maintenance.elapsed() >= ctx.config.maintenance_interval {
            if let Err(e) = ctx.run_maintenance().await {
                tracing::error!("Maintenance cleanup failed: {}", e);
            }
            last_maintenance = Instant::now();
        }

        let delay = match cursor.next_batch().await {
            Ok(entries) => {
                if !entries.is_empty() {
                    for entry in &entries {
                        dispatch(&ctx, entry).await;
                    }
                    // Queued behind the dispatches, so the orchestrator has
                    // run them by the time it records the offset
                    ctx.notify(OrchestratorMessage::CommandsRead {
                        through: cursor.last_read_id(),
                    });
                }
                ctx.config.command_poll_interval
            }
            Err(e) => {
                tracing::error!("Failed to read notifications: {}", e);
                ctx.config.error_backoff
            }
        };

        if !sleep_or_cancel(&cancel, delay).await {
            break;
        }
    }

    tracing::info!("Monitor stopped");
}

/// Resume from this process's own offset, then a persisted one, else the
/// configured start.
async fn open_cursor(
    ctx: &WorkerContext,
    resume_after: Option<LogId>,
    cancel: &CancellationToken,
) -> Option<LogCursor> {
    let start = match resume_after {
        Some(id) => StartPosition::After(id),
        None => persisted_start(ctx).await.unwrap_or(ctx.config.command_start),
    };

    loop {
        match ctx.bus.cursor(LogName::Notifications, start).await {
            Ok(cursor) => return Some(cursor),
            Err(e) => {
                tracing::error!("Failed to open command cursor: {}", e);
                if !sleep_or_cancel(cancel, ctx.config.error_backoff).await {
                    return None;
                }
            }
        }
    }
}

async fn persisted_start(ctx: &WorkerContext) -> Option<StartPosition> {
    let cursors = CursorStore::new(ctx.config.cursor_dir.as_ref()?);
    if let Err(e) = cursors.init().await {
        tracing::error!("Cannot create cursor directory: {}", e);
    }
    match cursors.load(CONSUMER, LogName::Notifications).await {
        Ok(saved) => saved.map(StartPosition::After),
        Err(e) => {
            tracing::warn!("Ignoring unreadable command cursor: {}", e);
            None
        }
    }
}

async fn reclaim_all(ctx: &WorkerContext) {
    for kind in QueueKind::ALL {
        if let Err(e) = ctx.reclaim_stalled(kind).await {
            tracing::error!(%kind, "Stall check failed: {}", e);
        }
    }
}

async fn dispatch(ctx: &WorkerContext, entry: &LogEntry) {
    match CommandEnvelope::parse(&entry.payload) {
        Ok(envelope) => {
            tracing::info!(
                id = entry.id,
                command = envelope.command.name(),
                source = %envelope.source,
                "Received command"
            );
            ctx.notify(OrchestratorMessage::Dispatch {
                envelope: Box::new(envelope),
            });
        }
        // Alerts and other non-command traffic share the log.
        Err(CommandParseError::NotACommand) => {}
        Err(e) => {
            tracing::warn!(id = entry.id, "Ignoring command: {}", e);
            let command = entry
                .payload
                .get("command")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            ctx.publish(StatusEvent::CommandIgnored {
                command,
                reason: e.to_string(),
                timestamp: ctx.now(),
            })
            .await;
        }
    }
}
