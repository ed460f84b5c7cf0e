//! Host and process health samples with alert thresholds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One health observation appended to the health log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub process_rss_bytes: u64,
    pub thread_count: u64,
    pub connection_count: u64,
    pub host_uptime_secs: u64,
    pub sampled_at: DateTime<Utc>,
}

/// Limits above which a sample raises an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub process_rss_bytes: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 90.0,
            memory_percent: 90.0,
            process_rss_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// A single threshold breach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum HealthAlert {
    Cpu { value: f32, limit: f32 },
    Memory { value: f32, limit: f32 },
    ProcessRss { value: u64, limit: u64 },
}

impl HealthThresholds {
    /// Every breached threshold, in a stable order.
    pub fn check(&self, sample: &HealthSample) -> Vec<HealthAlert> {
        let mut alerts = Vec::new();
        if sample.cpu_percent > self.cpu_percent {
            alerts.push(HealthAlert::Cpu {
                value: sample.cpu_percent,
                limit: self.cpu_percent,
            });
        }
        if sample.memory_percent > self.memory_percent {
            alerts.push(HealthAlert::Memory {
                value: sample.memory_percent,
                limit: self.memory_percent,
            });
        }
        if sample.process_rss_bytes > self.process_rss_bytes {
            alerts.push(HealthAlert::ProcessRss {
                value: sample.process_rss_bytes,
                limit: self.process_rss_bytes,
            });
        }
        alerts
    }
}

impl HealthAlert {
    /// Notification-log payload, `{type:"alert", metric, value, limit, ...}`.
    pub fn to_payload(&self, source: &str, at: DateTime<Utc>) -> serde_json::Value {
        let mut payload = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        payload.insert("type".into(), "alert".into());
        payload.insert("source".into(), source.into());
        payload.insert("timestamp".into(), at.to_rfc3339().into());
        serde_json::Value::Object(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f32, mem: f32, rss: u64) -> HealthSample {
        HealthSample {
            cpu_percent: cpu,
            memory_percent: mem,
            disk_percent: 40.0,
            process_rss_bytes: rss,
            thread_count: 12,
            connection_count: 3,
            host_uptime_secs: 3600,
            sampled_at: Utc::now(),
        }
    }

    #[test]
    fn thresholds_are_exclusive() {
        let thresholds = HealthThresholds::default();
        assert!(thresholds.check(&sample(90.0, 90.0, 2 * 1024 * 1024 * 1024)).is_empty());

        let alerts = thresholds.check(&sample(95.5, 91.0, 3 * 1024 * 1024 * 1024));
        assert_eq!(alerts.len(), 3);
        assert!(matches!(alerts[0], HealthAlert::Cpu { .. }));
        assert!(matches!(alerts[2], HealthAlert::ProcessRss { .. }));
    }

    #[test]
    fn alert_payload_is_not_a_command() {
        let payload = HealthAlert::Cpu {
            value: 97.0,
            limit: 90.0,
        }
        .to_payload("health_monitor", Utc::now());
        assert_eq!(payload["type"], "alert");
        assert_eq!(payload["metric"], "cpu");
    }
}
