//! Append-only command and telemetry logs with per-consumer offsets.

use std::str::FromStr;
use std::sync::Arc;

use scout_core::{
    Clock, CommandEnvelope, LogEntry, LogId, LogName, StatusEvent, SystemClock,
};

use crate::StoreError;
use crate::store::SharedStore;

/// Default page size for cursor reads.
pub const DEFAULT_BATCH: usize = 100;

/// Where a new consumer starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Replay the whole log.
    Beginning,
    /// Only entries appended from now on.
    #[default]
    Latest,
    /// Resume after a previously persisted id.
    After(LogId),
}

impl FromStr for StartPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginning" | "start" | "0" => Ok(StartPosition::Beginning),
            "latest" | "new" | "now" => Ok(StartPosition::Latest),
            other => other
                .parse::<LogId>()
                .map(StartPosition::After)
                .map_err(|_| format!("invalid start position: {}", other)),
        }
    }
}

/// Handle to the three shared logs.
#[derive(Clone)]
pub struct CommandBus {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
}

impl CommandBus {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn SharedStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append a raw payload and return the stored entry.
    pub async fn publish(
        &self,
        log: LogName,
        payload: serde_json::Value,
    ) -> Result<LogEntry, StoreError> {
        self.store.append_log(log, payload, self.clock.now()).await
    }

    /// Append a telemetry event to the status log.
    pub async fn publish_event(&self, event: &StatusEvent) -> Result<LogEntry, StoreError> {
        tracing::debug!("{}", event.description());
        self.publish(LogName::Status, event.to_payload()).await
    }

    /// Append an operator command to the notifications log.
    pub async fn publish_command(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<LogEntry, StoreError> {
        tracing::info!(
            command = envelope.command.name(),
            source = %envelope.source,
            "Publishing command"
        );
        self.publish(LogName::Notifications, envelope.to_payload())
            .await
    }

    /// Entries strictly after `after`, ascending, at most `limit`.
    pub async fn read(
        &self,
        log: LogName,
        after: LogId,
        limit: usize,
    ) -> Result<Vec<LogEntry>, StoreError> {
        self.store.read_log(log, after, limit).await
    }

    pub async fn read_status(
        &self,
        after: LogId,
        limit: usize,
    ) -> Result<Vec<LogEntry>, StoreError> {
        self.read(LogName::Status, after, limit).await
    }

    /// Id of the newest entry, `0` when the log is empty.
    pub async fn latest_id(&self, log: LogName) -> Result<LogId, StoreError> {
        self.store.last_log_id(log).await
    }

    /// Open a consumer positioned according to `start`.
    pub async fn cursor(&self, log: LogName, start: StartPosition) -> Result<LogCursor, StoreError> {
        let last_read_id = match start {
            StartPosition::Beginning => 0,
            StartPosition::Latest => self.latest_id(log).await?,
            StartPosition::After(id) => id,
        };
        Ok(LogCursor {
            bus: self.clone(),
            log,
            last_read_id,
            batch: DEFAULT_BATCH,
        })
    }
}

/// A single consumer's position in one log.
pub struct LogCursor {
    bus: CommandBus,
    log: LogName,
    last_read_id: LogId,
    batch: usize,
}

impl LogCursor {
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    pub fn log(&self) -> LogName {
        self.log
    }

    pub fn last_read_id(&self) -> LogId {
        self.last_read_id
    }

    /// Read the next page and advance past it.
    ///
    /// The offset only moves when the read succeeds, so a failed read is
    /// simply retried on the next call.
    pub async fn next_batch(&mut self) -> Result<Vec<LogEntry>, StoreError> {
        let entries = self
            .bus
            .read(self.log, self.last_read_id, self.batch)
            .await?;
        if let Some(last) = entries.last() {
            self.last_read_id = last.id;
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use scout_core::Command;
    use serde_json::json;

    fn bus() -> CommandBus {
        CommandBus::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn ids_are_monotonic_per_log() {
        let bus = bus();
        let a = bus.publish(LogName::Status, json!({"n": 1})).await.unwrap();
        let b = bus.publish(LogName::Status, json!({"n": 2})).await.unwrap();
        let other = bus.publish(LogName::Health, json!({"cpu": 1.0})).await.unwrap();

        assert!(b.id > a.id);
        assert_eq!(other.id, 1);
        assert_eq!(bus.latest_id(LogName::Status).await.unwrap(), b.id);
        assert_eq!(bus.latest_id(LogName::Notifications).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_is_strictly_after_and_limited() {
        let bus = bus();
        for n in 1..=5 {
            bus.publish(LogName::Status, json!({ "n": n })).await.unwrap();
        }
        let entries = bus.read(LogName::Status, 2, 2).await.unwrap();
        let ns: Vec<_> = entries.iter().map(|e| e.payload["n"].clone()).collect();
        assert_eq!(ns, [json!(3), json!(4)]);
        assert!(bus.read(LogName::Status, 5, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_cursor_skips_history() {
        let bus = bus();
        bus.publish(LogName::Notifications, json!({"old": true})).await.unwrap();

        let mut cursor = bus
            .cursor(LogName::Notifications, StartPosition::Latest)
            .await
            .unwrap();
        assert!(cursor.next_batch().await.unwrap().is_empty());

        let envelope = CommandEnvelope::new(Command::Pause, "api");
        bus.publish_command(&envelope).await.unwrap();
        let batch = cursor.next_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(CommandEnvelope::parse(&batch[0].payload).unwrap(), envelope);
    }

    #[tokio::test]
    async fn resumed_cursor_sees_each_entry_once() {
        let bus = bus();
        for n in 1..=3 {
            bus.publish(LogName::Notifications, json!({ "n": n })).await.unwrap();
        }

        let mut first = bus
            .cursor(LogName::Notifications, StartPosition::Beginning)
            .await
            .unwrap()
            .with_batch(2);
        let seen = first.next_batch().await.unwrap();
        assert_eq!(seen.len(), 2);
        let persisted = first.last_read_id();

        for n in 4..=6 {
            bus.publish(LogName::Notifications, json!({ "n": n })).await.unwrap();
        }

        let mut resumed = bus
            .cursor(LogName::Notifications, StartPosition::After(persisted))
            .await
            .unwrap()
            .with_batch(2);
        let mut replayed = Vec::new();
        loop {
            let batch = resumed.next_batch().await.unwrap();
            if batch.is_empty() {
                break;
            }
            replayed.extend(batch.into_iter().map(|e| e.payload["n"].as_i64().unwrap()));
        }
        assert_eq!(replayed, [3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn failed_read_keeps_the_offset() {
        let store = Arc::new(MemoryStore::new());
        let bus = CommandBus::new(store.clone());
        bus.publish(LogName::Status, json!({"n": 1})).await.unwrap();
        let mut cursor = bus.cursor(LogName::Status, StartPosition::Beginning).await.unwrap();

        store.set_available(false);
        assert!(cursor.next_batch().await.is_err());
        assert_eq!(cursor.last_read_id(), 0);

        store.set_available(true);
        assert_eq!(cursor.next_batch().await.unwrap().len(), 1);
        assert_eq!(cursor.last_read_id(), 1);
    }

    #[test]
    fn start_position_parses() {
        assert_eq!("latest".parse::<StartPosition>(), Ok(StartPosition::Latest));
        assert_eq!("Beginning".parse::<StartPosition>(), Ok(StartPosition::Beginning));
        assert_eq!("42".parse::<StartPosition>(), Ok(StartPosition::After(42)));
        assert!("tomorrow".parse::<StartPosition>().is_err());
    }
}
