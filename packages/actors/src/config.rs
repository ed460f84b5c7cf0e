//! Orchestrator configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use scout_core::{HealthThresholds, QueuePolicy};
use scout_db::{RateGateConfig, StartPosition};

/// Invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}={value}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("missing required setting {0}")]
    Missing(String),
}

/// Everything the orchestrator and its workers are tuned by.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub policy: QueuePolicy,
    pub rate_gate: RateGateConfig,
    /// Rotate to an alternate session/credential after a rate limit.
    pub rotate_sessions: bool,
    /// Where command consumption starts when no offset was persisted.
    pub command_start: StartPosition,
    /// Directory for persisted log offsets; in-memory offsets when unset.
    pub cursor_dir: Option<PathBuf>,
    pub health_interval: Duration,
    pub health_thresholds: HealthThresholds,
    /// Bound on waiting for each worker to exit on stop.
    pub join_timeout: Duration,
    /// Base pause between worker iterations.
    pub poll_interval: Duration,
    /// Upper bound of the random extra pause added to every iteration.
    pub jitter: Duration,
    /// Pause when a queue is empty or the worker is gated.
    pub idle_interval: Duration,
    /// Pause after a store error.
    pub error_backoff: Duration,
    pub stall_check_interval: Duration,
    pub maintenance_interval: Duration,
    pub command_poll_interval: Duration,
    /// How often the orchestrator checks for an expired cooldown.
    pub tick_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            policy: QueuePolicy::default(),
            rate_gate: RateGateConfig::default(),
            rotate_sessions: false,
            command_start: StartPosition::Latest,
            cursor_dir: None,
            health_interval: Duration::from_secs(60),
            health_thresholds: HealthThresholds::default(),
            join_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            jitter: Duration::from_secs(3),
            idle_interval: Duration::from_secs(10),
            error_backoff: Duration::from_secs(15),
            stall_check_interval: Duration::from_secs(30 * 60),
            maintenance_interval: Duration::from_secs(24 * 60 * 60),
            command_poll_interval: Duration::from_secs(2),
            tick_interval: Duration::from_secs(5),
        }
    }
}

impl OrchestratorConfig {
    /// Build from `SCOUT_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let mut config = Self::default();

        let policy = &mut config.policy;
        env.set("SCOUT_MAX_ATTEMPTS", &mut policy.max_attempts)?;
        env.set("SCOUT_RETRY_PRIORITY", &mut policy.retry_priority)?;
        env.set("SCOUT_STALL_PRIORITY", &mut policy.stall_priority)?;
        env.set("SCOUT_STALL_TIMEOUT_SECS", &mut policy.stall_timeout_secs)?;
        if policy.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "SCOUT_MAX_ATTEMPTS".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let gate = &mut config.rate_gate;
        env.set("SCOUT_RATE_WINDOW_SECS", &mut gate.window_secs)?;
        env.set("SCOUT_RATE_MILD_THRESHOLD", &mut gate.mild_threshold)?;
        env.set("SCOUT_RATE_SEVERE_THRESHOLD", &mut gate.severe_threshold)?;
        env.set("SCOUT_MILD_COOLDOWN_SECS", &mut gate.mild_cooldown_secs)?;
        env.set("SCOUT_SEVERE_COOLDOWN_SECS", &mut gate.severe_cooldown_secs)?;
        if gate.mild_threshold == 0 || gate.severe_threshold < gate.mild_threshold {
            return Err(ConfigError::Invalid {
                key: "SCOUT_RATE_SEVERE_THRESHOLD".into(),
                value: gate.severe_threshold.to_string(),
                reason: format!(
                    "thresholds must satisfy 1 <= mild ({}) <= severe",
                    gate.mild_threshold
                ),
            });
        }

        if let Some(rotate) = env.parse_bool("SCOUT_ROTATE_SESSIONS")? {
            config.rotate_sessions = rotate;
        }
        if let Some(value) = env.get("SCOUT_COMMAND_START") {
            config.command_start = value.parse().map_err(|reason| ConfigError::Invalid {
                key: "SCOUT_COMMAND_START".into(),
                value: value.clone(),
                reason,
            })?;
        }
        config.cursor_dir = env.get("SCOUT_CURSOR_DIR").map(PathBuf::from);

        env.set_secs("SCOUT_HEALTH_INTERVAL_SECS", &mut config.health_interval)?;
        env.set_secs("SCOUT_JOIN_TIMEOUT_SECS", &mut config.join_timeout)?;
        env.set_secs("SCOUT_POLL_INTERVAL_SECS", &mut config.poll_interval)?;
        env.set_secs("SCOUT_STALL_CHECK_INTERVAL_SECS", &mut config.stall_check_interval)?;
        env.set_secs("SCOUT_MAINTENANCE_INTERVAL_SECS", &mut config.maintenance_interval)?;

        let thresholds = &mut config.health_thresholds;
        env.set("SCOUT_ALERT_CPU_PERCENT", &mut thresholds.cpu_percent)?;
        env.set("SCOUT_ALERT_MEMORY_PERCENT", &mut thresholds.memory_percent)?;
        env.set("SCOUT_ALERT_RSS_BYTES", &mut thresholds.process_rss_bytes)?;

        Ok(config)
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).and_then(non_empty)
    }

    fn set<T>(&self, key: &str, target: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.get(key) {
            *target = value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn set_secs(&self, key: &str, target: &mut Duration) -> Result<(), ConfigError> {
        let mut secs = target.as_secs();
        self.set(key, &mut secs)?;
        *target = Duration::from_secs(secs);
        Ok(())
    }

    fn parse_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let parsed = match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" => true,
            "0" | "false" | "no" | "n" => false,
            _ => {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    value,
                    reason: "expected true/false".into(),
                });
            }
        };
        Ok(Some(parsed))
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<OrchestratorConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OrchestratorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_env() {
        let config = config(&[]).unwrap();
        assert_eq!(config.policy.max_attempts, 3);
        assert_eq!(config.policy.retry_priority, -10);
        assert_eq!(config.policy.stall_priority, -5);
        assert_eq!(config.policy.stall_timeout_secs, 1800);
        assert_eq!(config.rate_gate.mild_cooldown_secs, 21_600);
        assert_eq!(config.rate_gate.severe_cooldown_secs, 43_200);
        assert_eq!(config.command_start, StartPosition::Latest);
        assert!(!config.rotate_sessions);
        assert!(config.cursor_dir.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("SCOUT_MAX_ATTEMPTS", "5"),
            ("SCOUT_SEVERE_COOLDOWN_SECS", "60"),
            ("SCOUT_ROTATE_SESSIONS", "yes"),
            ("SCOUT_COMMAND_START", "beginning"),
            ("SCOUT_CURSOR_DIR", " /var/lib/scout "),
            ("SCOUT_JOIN_TIMEOUT_SECS", "3"),
            ("SCOUT_RETRY_PRIORITY", ""),
        ])
        .unwrap();
        assert_eq!(config.policy.max_attempts, 5);
        assert_eq!(config.policy.retry_priority, -10);
        assert_eq!(config.rate_gate.severe_cooldown_secs, 60);
        assert!(config.rotate_sessions);
        assert_eq!(config.command_start, StartPosition::Beginning);
        assert_eq!(config.cursor_dir, Some(PathBuf::from("/var/lib/scout")));
        assert_eq!(config.join_timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config(&[("SCOUT_MAX_ATTEMPTS", "three")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(config(&[("SCOUT_MAX_ATTEMPTS", "0")]).is_err());
        assert!(config(&[("SCOUT_ROTATE_SESSIONS", "sometimes")]).is_err());
        assert!(config(&[("SCOUT_RATE_SEVERE_THRESHOLD", "0")]).is_err());
    }
}
