//! Long-running worker process: scrapes, extracts and logs clubs from the
//! shared queues until told to stop.

mod http;

use std::sync::Arc;
use std::time::Duration;

use scout_actors::{
    Collaborators, ConfigError, OrchestratorArgs, OrchestratorConfig, SysinfoSampler,
    start_orchestrator,
};
use scout_core::{Command, CommandEnvelope};
use scout_db::DbConfig;
use tracing_subscriber::EnvFilter;

use crate::http::HttpCollaborator;

const DEFAULT_COLLABORATOR_TIMEOUT_SECS: u64 = 600;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting scout worker");

    let config = OrchestratorConfig::from_env()?;
    let db_config = DbConfig::from_env();
    if std::env::var("SCOUT_DB_ENDPOINT").is_err() {
        tracing::warn!("SCOUT_DB_ENDPOINT not set, using a process-local in-memory store");
    }

    // No store, no worker
    let store = scout_db::connect(&db_config).await?;
    tracing::info!("Connected to shared store");

    let collaborator_url = std::env::var("SCOUT_COLLABORATOR_URL")
        .map_err(|_| ConfigError::Missing("SCOUT_COLLABORATOR_URL".into()))?;
    let timeout = collaborator_timeout(|key| std::env::var(key).ok())?;
    let http = Arc::new(HttpCollaborator::new(collaborator_url, timeout)?);

    let collaborators = Collaborators {
        scraper: http.clone(),
        extractor: http.clone(),
        directory: http,
        sampler: Arc::new(SysinfoSampler::new()),
    };

    let args = OrchestratorArgs::new(Arc::new(store), collaborators, config).with_name("orchestrator");
    let orchestrator = start_orchestrator(args).await?;
    orchestrator.start().await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
            }
            tracing::info!("Shutdown requested");
            orchestrator.dispatch(CommandEnvelope::new(Command::Stop, "signal"))?;
            orchestrator.wait_stopped().await;
        }
        _ = orchestrator.wait_stopped() => {
            tracing::info!("Stopped by command");
        }
    }

    orchestrator.shutdown().await;
    tracing::info!("Scout worker exited");
    Ok(())
}

/// Request timeout for collaborator calls, `SCOUT_COLLABORATOR_TIMEOUT_SECS`.
fn collaborator_timeout(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Duration, ConfigError> {
    const KEY: &str = "SCOUT_COLLABORATOR_TIMEOUT_SECS";
    let Some(value) = lookup(KEY).filter(|v| !v.trim().is_empty()) else {
        return Ok(Duration::from_secs(DEFAULT_COLLABORATOR_TIMEOUT_SECS));
    };
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        Ok(_) => Err(ConfigError::Invalid {
            key: KEY.into(),
            value,
            reason: "must be greater than zero".into(),
        }),
        Err(e) => Err(ConfigError::Invalid {
            key: KEY.into(),
            value,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_timeout_defaults_when_unset() {
        assert_eq!(collaborator_timeout(|_| None).unwrap(), Duration::from_secs(600));
        assert_eq!(
            collaborator_timeout(|_| Some("  ".into())).unwrap(),
            Duration::from_secs(600)
        );
        assert_eq!(
            collaborator_timeout(|_| Some(" 45 ".into())).unwrap(),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn collaborator_timeout_rejects_bad_values() {
        for bad in ["ten", "-5", "0"] {
            assert!(matches!(
                collaborator_timeout(|_| Some(bad.into())),
                Err(ConfigError::Invalid { key, .. }) if key == "SCOUT_COLLABORATOR_TIMEOUT_SECS"
            ));
        }
    }
}
