//! Priority job queue with retry, dead-lettering and stall reclamation.
//!
//! The queue holds no state of its own: every operation is one or two calls
//! into the [`SharedStore`], so any number of processes can drive the same
//! queues concurrently.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use scout_core::{Clock, Job, JobId, JobState, QueueKind, QueuePolicy, QueueStatus, SystemClock};

use crate::StoreError;
use crate::store::{Requeue, SharedStore};

/// What `fail` did with the job.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Back in the queue at the retry priority.
    Retrying(Job),
    /// Attempts exhausted; now in the dead-letter set.
    DeadLettered(Job),
    /// The job was not in flight (already acked, reclaimed or purged).
    NotInFlight,
}

/// Job queue operations for every [`QueueKind`] over one shared store.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn SharedStore>,
    policy: QueuePolicy,
    clock: Arc<dyn Clock>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn SharedStore>, policy: QueuePolicy) -> Self {
        Self::with_clock(store, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn SharedStore>,
        policy: QueuePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Insert a fresh job with zero attempts.
    ///
    /// Duplicate handles are allowed; each call creates a distinct job.
    pub async fn enqueue(
        &self,
        kind: QueueKind,
        handle: &str,
        priority: Option<i64>,
    ) -> Result<Job, StoreError> {
        let priority = priority.unwrap_or(self.policy.default_priority);
        let job = Job::new(kind, handle, priority, self.clock.now());
        self.store.insert_queued(&job).await?;
        tracing::debug!(%kind, job_id = %job.id, handle, priority, "Job enqueued");
        Ok(job)
    }

    /// Move the most urgent queued job into processing.
    pub async fn dequeue(&self, kind: QueueKind) -> Result<Option<Job>, StoreError> {
        self.store.claim_next(kind, self.clock.now()).await
    }

    /// Terminal success. Returns the removed job, `None` if it was not in flight.
    pub async fn ack(&self, kind: QueueKind, id: JobId) -> Result<Option<Job>, StoreError> {
        let job = self.store.remove_processing(kind, id).await?;
        if job.is_none() {
            tracing::warn!(%kind, job_id = %id, "Ack for a job that is not in flight");
        }
        Ok(job)
    }

    /// Record a failed delivery: retry while attempts remain, otherwise dead-letter.
    pub async fn fail(
        &self,
        kind: QueueKind,
        id: JobId,
        error: &str,
    ) -> Result<FailOutcome, StoreError> {
        match self.in_flight(kind, id).await? {
            Some(job) => self.settle_failed(&job, error).await,
            None => Ok(FailOutcome::NotInFlight),
        }
    }

    /// [`fail`](Self::fail) for the delivery a worker holds.
    ///
    /// A job reclaimed and delivered again since `delivery` was taken is left
    /// to its new consumer.
    pub async fn fail_delivery(
        &self,
        delivery: &Job,
        error: &str,
    ) -> Result<FailOutcome, StoreError> {
        self.settle_failed(delivery, error).await
    }

    async fn settle_failed(&self, delivery: &Job, error: &str) -> Result<FailOutcome, StoreError> {
        let (kind, id) = (delivery.kind, delivery.id);
        if delivery.attempts < self.policy.max_attempts {
            let requeue = Requeue {
                priority: self.policy.retry_priority,
                attempts: delivery.attempts,
                only_if_started_at: delivery.processing_started_at,
            };
            let outcome = self
                .store
                .requeue_processing(kind, id, requeue)
                .await?
                .map_or(FailOutcome::NotInFlight, FailOutcome::Retrying);
            return Ok(outcome);
        }

        match self.in_flight(kind, id).await? {
            Some(current) if current.processing_started_at == delivery.processing_started_at => {}
            _ => return Ok(FailOutcome::NotInFlight),
        }
        let outcome = self
            .store
            .dead_letter_processing(kind, id, error, self.clock.now())
            .await?
            .map_or(FailOutcome::NotInFlight, FailOutcome::DeadLettered);
        if let FailOutcome::DeadLettered(job) = &outcome {
            tracing::warn!(
                %kind,
                job_id = %id,
                handle = %job.handle,
                attempts = job.attempts,
                "Job dead-lettered: {}",
                error
            );
        }
        Ok(outcome)
    }

    /// Put a rate-limited delivery back without consuming an attempt.
    ///
    /// `None` if the delivery is no longer in flight.
    pub async fn release(&self, delivery: &Job) -> Result<Option<Job>, StoreError> {
        let requeue = Requeue {
            priority: self.policy.retry_priority,
            attempts: delivery.attempts.saturating_sub(1),
            only_if_started_at: delivery.processing_started_at,
        };
        self.store
            .requeue_processing(delivery.kind, delivery.id, requeue)
            .await
    }

    /// In-flight jobs that have been processing longer than `timeout`.
    pub async fn list_stalled(
        &self,
        kind: QueueKind,
        timeout: Duration,
    ) -> Result<Vec<Job>, StoreError> {
        let now = self.clock.now();
        let processing = self.store.list_jobs(kind, JobState::Processing).await?;
        Ok(processing
            .into_iter()
            .filter(|job| job.is_stalled(now, timeout))
            .collect())
    }

    /// Move stalled jobs back to the queue with attempts unchanged.
    ///
    /// A job that was acked or failed between the scan and the move is skipped.
    pub async fn requeue_stalled(
        &self,
        kind: QueueKind,
        timeout: Duration,
    ) -> Result<usize, StoreError> {
        let stalled = self.list_stalled(kind, timeout).await?;
        let mut reclaimed = 0;
        for job in stalled {
            let requeue = Requeue {
                priority: self.policy.stall_priority,
                attempts: job.attempts,
                only_if_started_at: job.processing_started_at,
            };
            if self
                .store
                .requeue_processing(kind, job.id, requeue)
                .await?
                .is_some()
            {
                tracing::info!(%kind, job_id = %job.id, handle = %job.handle, "Reclaimed stalled job");
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    /// [`requeue_stalled`](Self::requeue_stalled) with the policy timeout.
    pub async fn requeue_stalled_default(&self, kind: QueueKind) -> Result<usize, StoreError> {
        self.requeue_stalled(kind, self.policy.stall_timeout()).await
    }

    pub async fn status(&self, kind: QueueKind) -> Result<QueueStatus, StoreError> {
        self.store.counts(kind).await
    }

    /// Jobs of a kind in one state, most urgent first.
    pub async fn list(&self, kind: QueueKind, state: JobState) -> Result<Vec<Job>, StoreError> {
        self.store.list_jobs(kind, state).await
    }

    pub async fn list_dead_letter(&self, kind: QueueKind) -> Result<Vec<Job>, StoreError> {
        self.store.list_jobs(kind, JobState::Failed).await
    }

    /// Discard every queued job of a kind. In-flight jobs are untouched.
    pub async fn flush(&self, kind: QueueKind) -> Result<usize, StoreError> {
        let removed = self.store.remove_jobs(kind, JobState::Queued, None).await?;
        Ok(removed.len())
    }

    /// Take a handle's dead-letter entries out and enqueue it fresh.
    ///
    /// Returns `None` when the handle had no dead-letter entry.
    pub async fn revive(&self, kind: QueueKind, handle: &str) -> Result<Option<Job>, StoreError> {
        let removed = self
            .store
            .remove_jobs(kind, JobState::Failed, Some(handle))
            .await?;
        if removed.is_empty() {
            return Ok(None);
        }
        let job = self
            .enqueue(kind, handle, Some(self.policy.retry_priority))
            .await?;
        tracing::info!(%kind, handle, revived = removed.len(), "Dead-letter entry revived");
        Ok(Some(job))
    }

    /// Purge dead-letter entries of a kind, optionally only for one handle.
    pub async fn bury(&self, kind: QueueKind, handle: Option<&str>) -> Result<usize, StoreError> {
        let removed = self.store.remove_jobs(kind, JobState::Failed, handle).await?;
        Ok(removed.len())
    }

    async fn in_flight(&self, kind: QueueKind, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(match self.store.get_job(id).await? {
            Some((JobState::Processing, job)) if job.kind == kind => Some(job),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::TimeZone;
    use scout_core::ManualClock;

    fn queue() -> (JobQueue, ManualClock) {
        let clock = ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        let queue = JobQueue::with_clock(
            Arc::new(MemoryStore::new()),
            QueuePolicy::default(),
            Arc::new(clock.clone()),
        );
        (queue, clock)
    }

    #[tokio::test]
    async fn dequeue_moves_job_into_processing() {
        let (queue, clock) = queue();
        queue.enqueue(QueueKind::Scraper, "club_a", Some(0)).await.unwrap();

        let job = queue.dequeue(QueueKind::Scraper).await.unwrap().unwrap();
        assert_eq!(job.handle, "club_a");
        assert_eq!(job.attempts, 1);
        assert_eq!(job.processing_started_at, Some(clock.now()));

        let status = queue.status(QueueKind::Scraper).await.unwrap();
        assert_eq!(status.queued, 0);
        assert_eq!(status.processing, 1);
    }

    #[tokio::test]
    async fn empty_queue_dequeues_nothing() {
        let (queue, _) = queue();
        assert!(queue.dequeue(QueueKind::Scraper).await.unwrap().is_none());
        assert_eq!(
            queue.status(QueueKind::Scraper).await.unwrap(),
            QueueStatus::default()
        );
    }

    #[tokio::test]
    async fn dequeue_prefers_lower_priority_then_older() {
        let (queue, clock) = queue();
        queue.enqueue(QueueKind::Scraper, "late_fresh", Some(0)).await.unwrap();
        clock.advance(Duration::seconds(1));
        queue.enqueue(QueueKind::Scraper, "first_retry", Some(-10)).await.unwrap();
        clock.advance(Duration::seconds(1));
        queue.enqueue(QueueKind::Scraper, "second_retry", Some(-10)).await.unwrap();
        queue.enqueue(QueueKind::Scraper, "stalled", Some(-5)).await.unwrap();

        let mut order = Vec::new();
        while let Some(job) = queue.dequeue(QueueKind::Scraper).await.unwrap() {
            order.push(job.handle);
        }
        assert_eq!(order, ["first_retry", "second_retry", "stalled", "late_fresh"]);
    }

    #[tokio::test]
    async fn queue_kinds_are_independent() {
        let (queue, _) = queue();
        queue.enqueue(QueueKind::Event, "club_a", None).await.unwrap();

        assert!(queue.dequeue(QueueKind::Scraper).await.unwrap().is_none());
        assert!(queue.dequeue(QueueKind::Event).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_handles_coexist() {
        let (queue, _) = queue();
        let first = queue.enqueue(QueueKind::Scraper, "club_a", None).await.unwrap();
        let second = queue.enqueue(QueueKind::Scraper, "club_a", None).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(queue.status(QueueKind::Scraper).await.unwrap().queued, 2);
    }

    #[tokio::test]
    async fn ack_removes_the_job() {
        let (queue, _) = queue();
        queue.enqueue(QueueKind::Event, "club_a", None).await.unwrap();
        let job = queue.dequeue(QueueKind::Event).await.unwrap().unwrap();

        assert!(queue.ack(QueueKind::Event, job.id).await.unwrap().is_some());
        assert!(queue.ack(QueueKind::Event, job.id).await.unwrap().is_none());
        assert_eq!(
            queue.status(QueueKind::Event).await.unwrap(),
            QueueStatus::default()
        );
    }

    #[tokio::test]
    async fn third_failure_dead_letters() {
        let (queue, clock) = queue();
        let original = queue.enqueue(QueueKind::Scraper, "club_a", Some(0)).await.unwrap();

        for expected_attempts in 1..=2 {
            let job = queue.dequeue(QueueKind::Scraper).await.unwrap().unwrap();
            clock.advance(Duration::seconds(5));
            match queue.fail(QueueKind::Scraper, job.id, "network error").await.unwrap() {
                FailOutcome::Retrying(job) => {
                    assert_eq!(job.attempts, expected_attempts);
                    assert_eq!(job.priority, -10);
                    assert_eq!(job.enqueued_at, original.enqueued_at);
                }
                other => panic!("expected retry, got {:?}", other),
            }
            let status = queue.status(QueueKind::Scraper).await.unwrap();
            assert_eq!((status.queued, status.processing), (1, 0));
        }

        let job = queue.dequeue(QueueKind::Scraper).await.unwrap().unwrap();
        let outcome = queue.fail(QueueKind::Scraper, job.id, "network error").await.unwrap();
        let FailOutcome::DeadLettered(dead) = outcome else {
            panic!("expected dead letter, got {:?}", outcome);
        };
        assert_eq!(dead.attempts, 3);
        assert_eq!(dead.error.as_deref(), Some("network error"));
        assert_eq!(dead.failed_at, Some(clock.now()));

        let status = queue.status(QueueKind::Scraper).await.unwrap();
        assert_eq!(status, QueueStatus { queued: 0, processing: 0, failed: 1 });
        assert!(queue.dequeue(QueueKind::Scraper).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fail_on_unknown_job_is_not_in_flight() {
        let (queue, _) = queue();
        let job = queue.enqueue(QueueKind::Scraper, "club_a", None).await.unwrap();
        assert_eq!(
            queue.fail(QueueKind::Scraper, job.id, "boom").await.unwrap(),
            FailOutcome::NotInFlight
        );
        assert_eq!(queue.status(QueueKind::Scraper).await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn stalled_jobs_return_with_attempts_unchanged() {
        let (queue, clock) = queue();
        let timeout = Duration::seconds(1800);
        queue.enqueue(QueueKind::Scraper, "club_a", None).await.unwrap();
        queue.enqueue(QueueKind::Scraper, "club_b", None).await.unwrap();
        queue.dequeue(QueueKind::Scraper).await.unwrap().unwrap();
        clock.advance(Duration::seconds(1));
        queue.dequeue(QueueKind::Scraper).await.unwrap().unwrap();

        // club_a is 1801s old, club_b exactly 1800s old
        clock.advance(Duration::seconds(1800));
        let stalled = queue.list_stalled(QueueKind::Scraper, timeout).await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].handle, "club_a");

        assert_eq!(queue.requeue_stalled(QueueKind::Scraper, timeout).await.unwrap(), 1);
        let queued = queue.list(QueueKind::Scraper, JobState::Queued).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].handle, "club_a");
        assert_eq!(queued[0].attempts, 1);
        assert_eq!(queued[0].priority, -5);
        assert!(queued[0].processing_started_at.is_none());

        let processing = queue.list(QueueKind::Scraper, JobState::Processing).await.unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].handle, "club_b");
    }

    #[tokio::test]
    async fn release_refunds_the_attempt() {
        let (queue, _) = queue();
        queue.enqueue(QueueKind::Scraper, "club_a", None).await.unwrap();
        let job = queue.dequeue(QueueKind::Scraper).await.unwrap().unwrap();

        let released = queue.release(&job).await.unwrap().unwrap();
        assert_eq!(released.attempts, 0);
        assert_eq!(released.priority, -10);
        assert!(queue.release(&job).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn late_settlement_leaves_a_redelivery_alone() {
        let (queue, clock) = queue();
        queue.enqueue(QueueKind::Scraper, "club_a", None).await.unwrap();
        let first = queue.dequeue(QueueKind::Scraper).await.unwrap().unwrap();

        clock.advance(Duration::seconds(1801));
        assert_eq!(queue.requeue_stalled_default(QueueKind::Scraper).await.unwrap(), 1);
        clock.advance(Duration::seconds(5));
        let second = queue.dequeue(QueueKind::Scraper).await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);

        // The original consumer reports back after the reclaim
        assert_eq!(
            queue.fail_delivery(&first, "timeout").await.unwrap(),
            FailOutcome::NotInFlight
        );
        assert!(queue.release(&first).await.unwrap().is_none());

        let processing = queue.list(QueueKind::Scraper, JobState::Processing).await.unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].processing_started_at, second.processing_started_at);
        assert_eq!(processing[0].attempts, 2);

        // The current consumer still settles normally
        assert!(matches!(
            queue.fail_delivery(&second, "boom").await.unwrap(),
            FailOutcome::Retrying(_)
        ));
    }

    #[tokio::test]
    async fn exhausted_late_delivery_is_not_dead_lettered() {
        let (queue, clock) = queue();
        queue.enqueue(QueueKind::Event, "club_a", None).await.unwrap();
        let mut stale = None;
        for _ in 0..3 {
            stale = queue.dequeue(QueueKind::Event).await.unwrap();
            clock.advance(Duration::seconds(1801));
            queue.requeue_stalled_default(QueueKind::Event).await.unwrap();
        }
        let stale = stale.unwrap();
        assert_eq!(stale.attempts, 3);
        let current = queue.dequeue(QueueKind::Event).await.unwrap().unwrap();
        assert_eq!(current.attempts, 4);

        assert_eq!(
            queue.fail_delivery(&stale, "late").await.unwrap(),
            FailOutcome::NotInFlight
        );
        assert!(queue.list_dead_letter(QueueKind::Event).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revive_and_bury_act_on_dead_letters() {
        let policy = QueuePolicy {
            max_attempts: 1,
            ..QueuePolicy::default()
        };
        let queue = JobQueue::new(Arc::new(MemoryStore::new()), policy);
        for handle in ["club_a", "club_b"] {
            queue.enqueue(QueueKind::Event, handle, None).await.unwrap();
            let job = queue.dequeue(QueueKind::Event).await.unwrap().unwrap();
            queue.fail(QueueKind::Event, job.id, "bad page").await.unwrap();
        }
        assert_eq!(queue.list_dead_letter(QueueKind::Event).await.unwrap().len(), 2);

        let revived = queue.revive(QueueKind::Event, "club_a").await.unwrap().unwrap();
        assert_eq!(revived.attempts, 0);
        assert!(queue.revive(QueueKind::Event, "club_a").await.unwrap().is_none());

        assert_eq!(queue.bury(QueueKind::Event, None).await.unwrap(), 1);
        let status = queue.status(QueueKind::Event).await.unwrap();
        assert_eq!(status, QueueStatus { queued: 1, processing: 0, failed: 0 });
    }

    #[tokio::test]
    async fn flush_leaves_in_flight_jobs() {
        let (queue, _) = queue();
        for handle in ["club_a", "club_b", "club_c"] {
            queue.enqueue(QueueKind::Scraper, handle, None).await.unwrap();
        }
        queue.dequeue(QueueKind::Scraper).await.unwrap().unwrap();

        assert_eq!(queue.flush(QueueKind::Scraper).await.unwrap(), 2);
        let status = queue.status(QueueKind::Scraper).await.unwrap();
        assert_eq!((status.queued, status.processing), (0, 1));
    }

    #[tokio::test]
    async fn concurrent_dequeues_never_share_a_job() {
        let (queue, _) = queue();
        for i in 0..50 {
            queue
                .enqueue(QueueKind::Scraper, &format!("club_{i}"), None)
                .await
                .unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Some(job) = queue.dequeue(QueueKind::Scraper).await.unwrap() {
                    taken.push(job.id);
                }
                taken
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            all.extend(task.await.unwrap());
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 50);
        assert_eq!(all.len(), 50);
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_error() {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::new(store.clone(), QueuePolicy::default());
        store.set_available(false);
        assert!(matches!(
            queue.dequeue(QueueKind::Scraper).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert!(queue.dequeue(QueueKind::Scraper).await.unwrap().is_none());
    }
}
