//! Rate-limit signal classification over the status log.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use scout_core::{LogId, LogName, StatusEvent};
use serde::{Deserialize, Serialize};

use crate::command_bus::DEFAULT_BATCH;
use crate::{CommandBus, StoreError};

/// How hard the target is pushing back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLevel {
    None,
    Mild,
    Severe,
}

impl RateLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RateLevel::None => "none",
            RateLevel::Mild => "mild",
            RateLevel::Severe => "severe",
        }
    }
}

impl std::fmt::Display for RateLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window, thresholds and cooldowns for the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateGateConfig {
    pub window_secs: u64,
    /// Signals needed for `Mild`.
    pub mild_threshold: usize,
    /// Signals needed for `Severe`.
    pub severe_threshold: usize,
    pub mild_cooldown_secs: u64,
    pub severe_cooldown_secs: u64,
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            window_secs: 30 * 60,
            mild_threshold: 1,
            severe_threshold: 3,
            mild_cooldown_secs: 6 * 60 * 60,
            severe_cooldown_secs: 12 * 60 * 60,
        }
    }
}

impl RateGateConfig {
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }
}

/// Counts rate-limit signals inside a trailing window.
///
/// Signals are learned from `rate_limit_signal` events on the status log, so
/// every process that refreshes the gate sees the same history.
#[derive(Debug, Clone)]
pub struct RateGate {
    config: RateGateConfig,
    signals: VecDeque<DateTime<Utc>>,
    scanned_through: LogId,
}

impl RateGate {
    pub fn new(config: RateGateConfig) -> Self {
        Self {
            config,
            signals: VecDeque::new(),
            scanned_through: 0,
        }
    }

    pub fn config(&self) -> &RateGateConfig {
        &self.config
    }

    /// Record a signal directly.
    pub fn observe(&mut self, at: DateTime<Utc>) {
        let pos = self.signals.partition_point(|t| *t <= at);
        self.signals.insert(pos, at);
    }

    /// Pull new signals from the status log.
    ///
    /// Returns how many signals were added.
    pub async fn refresh(&mut self, bus: &CommandBus) -> Result<usize, StoreError> {
        let mut added = 0;
        loop {
            let entries = bus
                .read(LogName::Status, self.scanned_through, DEFAULT_BATCH)
                .await?;
            let Some(last) = entries.last() else {
                break;
            };
            self.scanned_through = last.id;
            for entry in &entries {
                if let Some(event) = StatusEvent::from_payload(&entry.payload)
                    && event.is_rate_limit_signal()
                {
                    self.observe(event.timestamp());
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    /// Signals in `(now - window, now]`.
    pub fn signals_in_window(&self, now: DateTime<Utc>) -> usize {
        let edge = now - self.config.window();
        self.signals
            .iter()
            .filter(|t| **t > edge && **t <= now)
            .count()
    }

    pub fn classify(&mut self, now: DateTime<Utc>) -> RateLevel {
        self.prune(now);
        let count = self.signals_in_window(now);
        if count >= self.config.severe_threshold {
            RateLevel::Severe
        } else if count >= self.config.mild_threshold && count > 0 {
            RateLevel::Mild
        } else {
            RateLevel::None
        }
    }

    /// Cooldown for a level, `None` when scraping may continue.
    pub fn cooldown(&self, level: RateLevel) -> Option<Duration> {
        match level {
            RateLevel::None => None,
            RateLevel::Mild => Some(Duration::seconds(self.config.mild_cooldown_secs as i64)),
            RateLevel::Severe => Some(Duration::seconds(self.config.severe_cooldown_secs as i64)),
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let edge = now - self.config.window();
        while self.signals.front().is_some_and(|t| *t <= edge) {
            self.signals.pop_front();
        }
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(RateGateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::TimeZone;
    use scout_core::QueueKind;
    use std::sync::Arc;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn classification_boundaries() {
        let mut gate = RateGate::default();
        assert_eq!(gate.classify(t(0)), RateLevel::None);

        gate.observe(t(10));
        assert_eq!(gate.classify(t(20)), RateLevel::Mild);
        gate.observe(t(11));
        assert_eq!(gate.classify(t(20)), RateLevel::Mild);
        gate.observe(t(12));
        assert_eq!(gate.classify(t(20)), RateLevel::Severe);
    }

    #[test]
    fn signal_on_the_outer_edge_is_excluded() {
        let mut gate = RateGate::default();
        gate.observe(t(0));
        assert_eq!(gate.signals_in_window(t(1799)), 1);
        assert_eq!(gate.signals_in_window(t(1800)), 0);
        assert_eq!(gate.classify(t(1800)), RateLevel::None);
    }

    #[test]
    fn future_signals_are_not_counted_yet() {
        let mut gate = RateGate::default();
        gate.observe(t(100));
        assert_eq!(gate.classify(t(50)), RateLevel::None);
        assert_eq!(gate.classify(t(100)), RateLevel::Mild);
    }

    #[test]
    fn cooldowns_follow_config() {
        let gate = RateGate::new(RateGateConfig {
            mild_cooldown_secs: 60,
            severe_cooldown_secs: 120,
            ..RateGateConfig::default()
        });
        assert_eq!(gate.cooldown(RateLevel::None), None);
        assert_eq!(gate.cooldown(RateLevel::Mild), Some(Duration::seconds(60)));
        assert_eq!(gate.cooldown(RateLevel::Severe), Some(Duration::seconds(120)));
    }

    #[tokio::test]
    async fn refresh_reads_signals_from_status_log() {
        let bus = CommandBus::new(Arc::new(MemoryStore::new()));
        for secs in [0, 60, 120] {
            let event = StatusEvent::RateLimitSignal {
                kind: QueueKind::Scraper,
                handle: format!("club_{secs}"),
                timestamp: t(secs),
            };
            bus.publish_event(&event).await.unwrap();
        }
        bus.publish_event(&StatusEvent::CooldownEnded { timestamp: t(130) })
            .await
            .unwrap();

        let mut gate = RateGate::default();
        assert_eq!(gate.refresh(&bus).await.unwrap(), 3);
        assert_eq!(gate.refresh(&bus).await.unwrap(), 0);
        assert_eq!(gate.classify(t(200)), RateLevel::Severe);
        assert_eq!(gate.classify(t(1850)), RateLevel::Mild);
    }
}
