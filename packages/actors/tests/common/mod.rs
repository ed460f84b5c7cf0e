use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use scout_actors::{
    ClubDirectory, CollaboratorError, CollaboratorFuture, Collaborators, EventExtractor,
    ExtractOutcome, HostSampler, OrchestratorArgs, OrchestratorConfig, OrchestratorHandle,
    ScrapeOutcome, ScrapeProvider, start_orchestrator,
};
use scout_core::{
    HealthSample, Job, JobId, JobState, LogEntry, LogId, LogName, ManualClock, QueueKind,
    QueueStatus, StatusEvent,
};
use scout_db::store::StoreFuture;
use scout_db::{
    CommandBus, JobQueue, MemoryStore, Requeue, SharedStore, StartPosition, StoreError,
};
use tokio::sync::Semaphore;

pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// Scrape provider that replays scripted outcomes, then a default.
pub struct ScriptedScraper {
    script: Mutex<VecDeque<ScrapeOutcome>>,
    fallback: ScrapeOutcome,
    hang: bool,
    pub calls: AtomicUsize,
    pub resets: AtomicUsize,
}

impl ScriptedScraper {
    pub fn always(outcome: ScrapeOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: outcome,
            hang: false,
            calls: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::always(ScrapeOutcome::Success(serde_json::json!({"posts": []})))
    }

    /// Never returns from a scrape.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::succeeding()
        }
    }

    pub fn then(self, outcome: ScrapeOutcome) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ScrapeProvider for ScriptedScraper {
    fn scrape<'a>(&'a self, _handle: &'a str) -> CollaboratorFuture<'a, ScrapeOutcome> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        })
    }

    fn reset_session(&self, _rotate: bool) -> CollaboratorFuture<'_, Result<(), CollaboratorError>> {
        Box::pin(async move {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct CountingExtractor {
    pub calls: AtomicUsize,
}

impl EventExtractor for CountingExtractor {
    fn extract<'a>(&'a self, _handle: &'a str) -> CollaboratorFuture<'a, ExtractOutcome> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ExtractOutcome::Success
        })
    }
}

#[derive(Default)]
pub struct RecordingDirectory {
    pub due: Vec<String>,
    pub processed: Mutex<Vec<String>>,
    pub cleans: AtomicUsize,
    pub due_calls: AtomicUsize,
    /// When set, `due_handles` waits for a permit.
    pub gate: Option<Arc<Semaphore>>,
}

impl RecordingDirectory {
    pub fn processed(&self) -> Vec<String> {
        self.processed.lock().unwrap().clone()
    }
}

impl ClubDirectory for RecordingDirectory {
    fn due_handles(
        &self,
        limit: Option<u32>,
    ) -> CollaboratorFuture<'_, Result<Vec<String>, CollaboratorError>> {
        Box::pin(async move {
            self.due_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            let limit = limit.map_or(self.due.len(), |l| l as usize);
            Ok(self.due.iter().take(limit).cloned().collect())
        })
    }

    fn mark_last_processed<'a>(
        &'a self,
        handle: &'a str,
        _at: DateTime<Utc>,
    ) -> CollaboratorFuture<'a, Result<(), CollaboratorError>> {
        Box::pin(async move {
            self.processed.lock().unwrap().push(handle.to_string());
            Ok(())
        })
    }

    fn clean(&self) -> CollaboratorFuture<'_, Result<u64, CollaboratorError>> {
        Box::pin(async move {
            self.cleans.fetch_add(1, Ordering::SeqCst);
            Ok(4)
        })
    }
}

/// Memory store whose next `failures` queue inserts of `kind` fail.
pub struct FlakyStore {
    inner: MemoryStore,
    kind: QueueKind,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_inserts(kind: QueueKind, failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            kind,
            failures: AtomicUsize::new(failures),
        }
    }

    pub fn remaining_failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl SharedStore for FlakyStore {
    fn get_job(&self, id: JobId) -> StoreFuture<'_, Option<(JobState, Job)>> {
        self.inner.get_job(id)
    }

    fn insert_queued<'a>(&'a self, job: &'a Job) -> StoreFuture<'a, ()> {
        let fail = job.kind == self.kind
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if fail {
            let error = StoreError::Unavailable("connection reset".into());
            return Box::pin(async move { Err::<(), _>(error) });
        }
        self.inner.insert_queued(job)
    }

    fn claim_next(&self, kind: QueueKind, now: DateTime<Utc>) -> StoreFuture<'_, Option<Job>> {
        self.inner.claim_next(kind, now)
    }

    fn remove_processing(&self, kind: QueueKind, id: JobId) -> StoreFuture<'_, Option<Job>> {
        self.inner.remove_processing(kind, id)
    }

    fn requeue_processing(
        &self,
        kind: QueueKind,
        id: JobId,
        requeue: Requeue,
    ) -> StoreFuture<'_, Option<Job>> {
        self.inner.requeue_processing(kind, id, requeue)
    }

    fn dead_letter_processing<'a>(
        &'a self,
        kind: QueueKind,
        id: JobId,
        error: &'a str,
        failed_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Option<Job>> {
        self.inner.dead_letter_processing(kind, id, error, failed_at)
    }

    fn list_jobs(&self, kind: QueueKind, state: JobState) -> StoreFuture<'_, Vec<Job>> {
        self.inner.list_jobs(kind, state)
    }

    fn remove_jobs<'a>(
        &'a self,
        kind: QueueKind,
        state: JobState,
        handle: Option<&'a str>,
    ) -> StoreFuture<'a, Vec<Job>> {
        self.inner.remove_jobs(kind, state, handle)
    }

    fn counts(&self, kind: QueueKind) -> StoreFuture<'_, QueueStatus> {
        self.inner.counts(kind)
    }

    fn append_log(
        &self,
        log: LogName,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, LogEntry> {
        self.inner.append_log(log, payload, at)
    }

    fn read_log(&self, log: LogName, after: LogId, limit: usize) -> StoreFuture<'_, Vec<LogEntry>> {
        self.inner.read_log(log, after, limit)
    }

    fn last_log_id(&self, log: LogName) -> StoreFuture<'_, LogId> {
        self.inner.last_log_id(log)
    }
}

pub struct FixedSampler(pub HealthSample);

impl HostSampler for FixedSampler {
    fn sample(&self) -> CollaboratorFuture<'_, Result<HealthSample, CollaboratorError>> {
        let sample = self.0.clone();
        Box::pin(async move { Ok(sample) })
    }
}

pub fn calm_sample() -> HealthSample {
    HealthSample {
        cpu_percent: 12.0,
        memory_percent: 30.0,
        disk_percent: 40.0,
        process_rss_bytes: 64 * 1024 * 1024,
        thread_count: 8,
        connection_count: 2,
        host_uptime_secs: 3600,
        sampled_at: epoch(),
    }
}

/// Millisecond-scale timings so tests settle quickly.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        command_start: StartPosition::Beginning,
        health_interval: Duration::from_millis(50),
        join_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(5),
        jitter: Duration::ZERO,
        idle_interval: Duration::from_millis(10),
        error_backoff: Duration::from_millis(20),
        command_poll_interval: Duration::from_millis(10),
        tick_interval: Duration::from_millis(10),
        ..OrchestratorConfig::default()
    }
}

pub struct Harness {
    pub clock: ManualClock,
    pub queue: JobQueue,
    pub bus: CommandBus,
    pub scraper: Arc<ScriptedScraper>,
    pub extractor: Arc<CountingExtractor>,
    pub directory: Arc<RecordingDirectory>,
    pub orchestrator: OrchestratorHandle,
}

pub async fn harness(scraper: ScriptedScraper, directory: RecordingDirectory) -> Harness {
    harness_with(scraper, directory, calm_sample(), fast_config()).await
}

pub async fn harness_with(
    scraper: ScriptedScraper,
    directory: RecordingDirectory,
    sample: HealthSample,
    config: OrchestratorConfig,
) -> Harness {
    harness_on(Arc::new(MemoryStore::new()), scraper, directory, sample, config).await
}

pub async fn harness_on(
    store: Arc<dyn SharedStore>,
    scraper: ScriptedScraper,
    directory: RecordingDirectory,
    sample: HealthSample,
    config: OrchestratorConfig,
) -> Harness {
    let clock = ManualClock::new(epoch());
    let queue = JobQueue::with_clock(store.clone(), config.policy.clone(), Arc::new(clock.clone()));
    let bus = CommandBus::with_clock(store.clone(), Arc::new(clock.clone()));

    let scraper = Arc::new(scraper);
    let extractor = Arc::new(CountingExtractor::default());
    let directory = Arc::new(directory);
    let collaborators = Collaborators {
        scraper: scraper.clone(),
        extractor: extractor.clone(),
        directory: directory.clone(),
        sampler: Arc::new(FixedSampler(sample)),
    };

    let args = OrchestratorArgs::new(store, collaborators, config).with_clock(Arc::new(clock.clone()));
    let orchestrator = start_orchestrator(args).await.unwrap();

    Harness {
        clock,
        queue,
        bus,
        scraper,
        extractor,
        directory,
        orchestrator,
    }
}

impl Harness {
    /// Every status event appended so far.
    pub async fn status_events(&self) -> Vec<StatusEvent> {
        self.bus
            .read_status(0, 10_000)
            .await
            .unwrap()
            .iter()
            .filter_map(|entry| StatusEvent::from_payload(&entry.payload))
            .collect()
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
