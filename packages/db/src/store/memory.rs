//! In-process store backed by a lock-protected priority index.
//!
//! Only visible inside one process; use it for tests and single-process
//! development. Cross-process deployments use [`SurrealStore`](super::SurrealStore).

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use scout_core::{Job, JobId, JobState, LogEntry, LogId, LogName, QueueKind, QueueStatus};

use super::{Requeue, SharedStore, StoreFuture};
use crate::StoreError;

type QueueKey = (i64, DateTime<Utc>, JobId);

#[derive(Default)]
struct Inner {
    /// Every job with the set it currently belongs to.
    jobs: HashMap<JobId, (JobState, Job)>,
    /// Queued jobs per kind, ordered by priority then enqueue time.
    queues: HashMap<QueueKind, BTreeSet<QueueKey>>,
    logs: HashMap<LogName, Vec<LogEntry>>,
}

impl Inner {
    fn push_queued(&mut self, job: Job) {
        self.queues
            .entry(job.kind)
            .or_default()
            .insert(job.queue_order());
        self.jobs.insert(job.id, (JobState::Queued, job));
    }

    /// Take an in-flight job of `kind` out of the map.
    fn take_processing(&mut self, kind: QueueKind, id: JobId) -> Option<Job> {
        match self.jobs.get(&id) {
            Some((JobState::Processing, job)) if job.kind == kind => {
                self.jobs.remove(&id).map(|(_, job)| job)
            }
            _ => None,
        }
    }
}

/// Lock-protected in-memory [`SharedStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable (or reachable again).
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

fn ready<'a, T: Send + 'a>(value: Result<T, StoreError>) -> StoreFuture<'a, T> {
    Box::pin(std::future::ready(value))
}

impl SharedStore for MemoryStore {
    fn get_job(&self, id: JobId) -> StoreFuture<'_, Option<(JobState, Job)>> {
        ready(self.lock().map(|inner| inner.jobs.get(&id).cloned()))
    }

    fn insert_queued<'a>(&'a self, job: &'a Job) -> StoreFuture<'a, ()> {
        ready(self.lock().map(|mut inner| {
            let mut job = job.clone();
            job.processing_started_at = None;
            inner.push_queued(job);
        }))
    }

    fn claim_next(&self, kind: QueueKind, now: DateTime<Utc>) -> StoreFuture<'_, Option<Job>> {
        ready(self.lock().map(|mut inner| {
            let key = inner.queues.get_mut(&kind)?.pop_first()?;
            let (state, job) = inner.jobs.get_mut(&key.2)?;
            *state = JobState::Processing;
            job.attempts = job.attempts.saturating_add(1);
            job.processing_started_at = Some(now);
            Some(job.clone())
        }))
    }

    fn remove_processing(&self, kind: QueueKind, id: JobId) -> StoreFuture<'_, Option<Job>> {
        ready(self.lock().map(|mut inner| inner.take_processing(kind, id)))
    }

    fn requeue_processing(
        &self,
        kind: QueueKind,
        id: JobId,
        requeue: Requeue,
    ) -> StoreFuture<'_, Option<Job>> {
        ready(self.lock().map(|mut inner| {
            if let Some(started) = requeue.only_if_started_at {
                let current = inner.jobs.get(&id).and_then(|(_, j)| j.processing_started_at);
                if current != Some(started) {
                    return None;
                }
            }
            let mut job = inner.take_processing(kind, id)?;
            job.priority = requeue.priority;
            job.attempts = requeue.attempts;
            job.processing_started_at = None;
            inner.push_queued(job.clone());
            Some(job)
        }))
    }

    fn dead_letter_processing<'a>(
        &'a self,
        kind: QueueKind,
        id: JobId,
        error: &'a str,
        failed_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Option<Job>> {
        ready(self.lock().map(|mut inner| {
            let mut job = inner.take_processing(kind, id)?;
            job.error = Some(error.to_string());
            job.failed_at = Some(failed_at);
            inner.jobs.insert(id, (JobState::Failed, job.clone()));
            Some(job)
        }))
    }

    fn list_jobs(&self, kind: QueueKind, state: JobState) -> StoreFuture<'_, Vec<Job>> {
        ready(self.lock().map(|inner| {
            let mut jobs: Vec<Job> = inner
                .jobs
                .values()
                .filter(|(s, job)| *s == state && job.kind == kind)
                .map(|(_, job)| job.clone())
                .collect();
            jobs.sort_by_key(Job::queue_order);
            jobs
        }))
    }

    fn remove_jobs<'a>(
        &'a self,
        kind: QueueKind,
        state: JobState,
        handle: Option<&'a str>,
    ) -> StoreFuture<'a, Vec<Job>> {
        ready(self.lock().map(|mut inner| {
            let ids: Vec<JobId> = inner
                .jobs
                .iter()
                .filter(|(_, (s, job))| {
                    *s == state && job.kind == kind && handle.is_none_or(|h| job.handle == h)
                })
                .map(|(id, _)| *id)
                .collect();

            let mut removed = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some((_, job)) = inner.jobs.remove(&id) {
                    if state == JobState::Queued
                        && let Some(queue) = inner.queues.get_mut(&kind)
                    {
                        queue.remove(&job.queue_order());
                    }
                    removed.push(job);
                }
            }
            removed.sort_by_key(Job::queue_order);
            removed
        }))
    }

    fn counts(&self, kind: QueueKind) -> StoreFuture<'_, QueueStatus> {
        ready(self.lock().map(|inner| {
            let mut status = QueueStatus::default();
            for (state, job) in inner.jobs.values() {
                if job.kind != kind {
                    continue;
                }
                match state {
                    JobState::Queued => status.queued += 1,
                    JobState::Processing => status.processing += 1,
                    JobState::Failed => status.failed += 1,
                }
            }
            status
        }))
    }

    fn append_log(
        &self,
        log: LogName,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, LogEntry> {
        ready(self.lock().map(|mut inner| {
            let entries = inner.logs.entry(log).or_default();
            let entry = LogEntry {
                id: entries.last().map_or(1, |last| last.id + 1),
                appended_at: at,
                payload,
            };
            entries.push(entry.clone());
            entry
        }))
    }

    fn read_log(&self, log: LogName, after: LogId, limit: usize) -> StoreFuture<'_, Vec<LogEntry>> {
        ready(self.lock().map(|inner| {
            inner
                .logs
                .get(&log)
                .map(|entries| {
                    // ids are dense and start at 1
                    let start = (after as usize).min(entries.len());
                    entries[start..].iter().take(limit).cloned().collect()
                })
                .unwrap_or_default()
        }))
    }

    fn last_log_id(&self, log: LogName) -> StoreFuture<'_, LogId> {
        ready(self.lock().map(|inner| {
            inner
                .logs
                .get(&log)
                .and_then(|entries| entries.last())
                .map_or(0, |entry| entry.id)
        }))
    }
}
