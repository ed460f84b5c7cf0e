//! SurrealDB-backed store shared by every process.

use chrono::{DateTime, TimeZone, Utc};
use scout_core::{Job, JobId, JobState, LogEntry, LogId, LogName, QueueKind, QueueStatus};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use super::{Requeue, SharedStore, StoreFuture};
use crate::{Database, DbConfig, StoreError, connection, schema};

/// Candidates fetched per claim round.
const CLAIM_BATCH: usize = 8;
/// Claim rounds before giving up on a contended queue.
const CLAIM_ROUNDS: usize = 4;
/// Retries for an append that lost a write conflict on the sequence counter.
const APPEND_RETRIES: usize = 5;

/// Internal record type for SurrealDB.
///
/// Timestamps are epoch milliseconds so ordering and comparison happen on
/// plain integers inside the database.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    job_id: String,
    kind: QueueKind,
    handle: String,
    state: JobState,
    priority: i64,
    enqueued_at: i64,
    attempts: u32,
    #[serde(default)]
    processing_started_at: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    failed_at: Option<i64>,
}

impl JobRecord {
    fn from_job(job: &Job, state: JobState) -> Self {
        Self {
            id: None,
            job_id: job.id.to_string(),
            kind: job.kind,
            handle: job.handle.clone(),
            state,
            priority: job.priority,
            enqueued_at: job.enqueued_at.timestamp_millis(),
            attempts: job.attempts,
            processing_started_at: job.processing_started_at.map(|t| t.timestamp_millis()),
            error: job.error.clone(),
            failed_at: job.failed_at.map(|t| t.timestamp_millis()),
        }
    }

    fn into_job(self) -> Result<Job, StoreError> {
        let id = JobId::parse(&self.job_id)
            .map_err(|e| StoreError::Serialization(format!("bad job id {}: {}", self.job_id, e)))?;
        Ok(Job {
            id,
            kind: self.kind,
            handle: self.handle,
            enqueued_at: from_millis(self.enqueued_at),
            attempts: self.attempts,
            priority: self.priority,
            processing_started_at: self.processing_started_at.map(from_millis),
            error: self.error,
            failed_at: self.failed_at.map(from_millis),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StateCount {
    state: String,
    count: i64,
}

#[derive(Debug, Deserialize)]
struct LogRecord {
    seq: i64,
    appended_at: i64,
    /// JSON text of the payload.
    payload: String,
}

impl LogRecord {
    fn into_entry(self) -> Result<LogEntry, StoreError> {
        Ok(LogEntry {
            id: self.seq.max(0) as LogId,
            appended_at: from_millis(self.appended_at),
            payload: serde_json::from_str(&self.payload)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SeqRecord {
    #[serde(default)]
    value: Option<i64>,
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn records_into_jobs(records: Vec<JobRecord>) -> Result<Vec<Job>, StoreError> {
    records.into_iter().map(JobRecord::into_job).collect()
}

fn first_job(records: Vec<JobRecord>) -> Result<Option<Job>, StoreError> {
    records.into_iter().next().map(JobRecord::into_job).transpose()
}

/// [`SharedStore`] on a SurrealDB connection.
#[derive(Clone)]
pub struct SurrealStore {
    db: Database,
}

impl SurrealStore {
    /// Connect, select namespace/database and make sure the schema exists.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let db = connection::open(config).await?;
        schema::init_schema(&db).await?;
        Ok(Self { db })
    }

    /// Wrap an already opened connection. The schema must exist.
    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn try_claim(&self, job_id: String, now: i64) -> Result<Option<Job>, StoreError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = 'processing', attempts += 1, processing_started_at = $now
                WHERE state = 'queued'
                RETURN AFTER
                "#,
            )
            .bind(("id", job_id))
            .bind(("now", now))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;
        first_job(records)
    }

    async fn append_once(
        &self,
        log: LogName,
        payload: String,
        at: i64,
    ) -> Result<LogRecord, StoreError> {
        // The counter bump and the insert run in one statement, so two
        // appenders conflict on the counter instead of sharing a sequence.
        let mut response = self
            .db
            .query(
                r#"
                CREATE log_entry CONTENT {
                    log: $log,
                    seq: (UPSERT type::thing('log_seq', $log) SET value += 1 RETURN AFTER)[0].value,
                    appended_at: $at,
                    payload: $payload
                } RETURN seq, appended_at, payload
                "#,
            )
            .bind(("log", log.key()))
            .bind(("at", at))
            .bind(("payload", payload))
            .await?;
        let records: Vec<LogRecord> = response.take(0)?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Query(format!("append to {} returned nothing", log)))
    }
}

fn is_retryable_conflict(error: &StoreError) -> bool {
    let message = error.to_string();
    message.contains("conflict") || message.contains("can be retried")
}

impl SharedStore for SurrealStore {
    fn get_job(&self, id: JobId) -> StoreFuture<'_, Option<(JobState, Job)>> {
        Box::pin(async move {
            let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;
            record
                .map(|record| {
                    let state = record.state;
                    record.into_job().map(|job| (state, job))
                })
                .transpose()
        })
    }

    fn insert_queued<'a>(&'a self, job: &'a Job) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut record = JobRecord::from_job(job, JobState::Queued);
            record.processing_started_at = None;
            let created: Option<JobRecord> = self
                .db
                .create(("job", job.id.to_string()))
                .content(record)
                .await?;
            created
                .map(|_| ())
                .ok_or_else(|| StoreError::Query(format!("Failed to create job {}", job.id)))
        })
    }

    fn claim_next(&self, kind: QueueKind, now: DateTime<Utc>) -> StoreFuture<'_, Option<Job>> {
        Box::pin(async move {
            let now = now.timestamp_millis();
            for _ in 0..CLAIM_ROUNDS {
                let mut response = self
                    .db
                    .query(
                        r#"
                        SELECT job_id, priority, enqueued_at FROM job
                        WHERE kind = $kind AND state = 'queued'
                        ORDER BY priority ASC, enqueued_at ASC, job_id ASC
                        LIMIT $limit
                        "#,
                    )
                    .bind(("kind", kind.as_str()))
                    .bind(("limit", CLAIM_BATCH as i64))
                    .await?;
                let candidates: Vec<Candidate> = response.take(0)?;
                if candidates.is_empty() {
                    return Ok(None);
                }

                // Another process may claim a candidate between the select and
                // the conditional update; losing just moves on to the next one.
                for candidate in candidates {
                    if let Some(job) = self.try_claim(candidate.job_id, now).await? {
                        return Ok(Some(job));
                    }
                }
            }
            tracing::debug!(%kind, "claim lost every race, reporting empty");
            Ok(None)
        })
    }

    fn remove_processing(&self, kind: QueueKind, id: JobId) -> StoreFuture<'_, Option<Job>> {
        Box::pin(async move {
            let mut response = self
                .db
                .query(
                    r#"
                    DELETE type::thing('job', $id)
                    WHERE state = 'processing' AND kind = $kind
                    RETURN BEFORE
                    "#,
                )
                .bind(("id", id.to_string()))
                .bind(("kind", kind.as_str()))
                .await?;
            let records: Vec<JobRecord> = response.take(0)?;
            first_job(records)
        })
    }

    fn requeue_processing(
        &self,
        kind: QueueKind,
        id: JobId,
        requeue: Requeue,
    ) -> StoreFuture<'_, Option<Job>> {
        Box::pin(async move {
            let guard = if requeue.only_if_started_at.is_some() {
                "AND processing_started_at = $started"
            } else {
                ""
            };
            let query = format!(
                r#"
                UPDATE type::thing('job', $id)
                SET state = 'queued', priority = $priority, attempts = $attempts,
                    processing_started_at = NONE
                WHERE state = 'processing' AND kind = $kind {}
                RETURN AFTER
                "#,
                guard
            );
            let mut response = self
                .db
                .query(query)
                .bind(("id", id.to_string()))
                .bind(("kind", kind.as_str()))
                .bind(("priority", requeue.priority))
                .bind(("attempts", i64::from(requeue.attempts)))
                .bind((
                    "started",
                    requeue.only_if_started_at.map(|t| t.timestamp_millis()),
                ))
                .await?;
            let records: Vec<JobRecord> = response.take(0)?;
            first_job(records)
        })
    }

    fn dead_letter_processing<'a>(
        &'a self,
        kind: QueueKind,
        id: JobId,
        error: &'a str,
        failed_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Option<Job>> {
        Box::pin(async move {
            let mut response = self
                .db
                .query(
                    r#"
                    UPDATE type::thing('job', $id)
                    SET state = 'failed', error = $error, failed_at = $failed_at
                    WHERE state = 'processing' AND kind = $kind
                    RETURN AFTER
                    "#,
                )
                .bind(("id", id.to_string()))
                .bind(("kind", kind.as_str()))
                .bind(("error", error.to_string()))
                .bind(("failed_at", failed_at.timestamp_millis()))
                .await?;
            let records: Vec<JobRecord> = response.take(0)?;
            first_job(records)
        })
    }

    fn list_jobs(&self, kind: QueueKind, state: JobState) -> StoreFuture<'_, Vec<Job>> {
        Box::pin(async move {
            let mut response = self
                .db
                .query(
                    r#"
                    SELECT * FROM job
                    WHERE kind = $kind AND state = $state
                    ORDER BY priority ASC, enqueued_at ASC, job_id ASC
                    "#,
                )
                .bind(("kind", kind.as_str()))
                .bind(("state", state.as_str()))
                .await?;
            let records: Vec<JobRecord> = response.take(0)?;
            records_into_jobs(records)
        })
    }

    fn remove_jobs<'a>(
        &'a self,
        kind: QueueKind,
        state: JobState,
        handle: Option<&'a str>,
    ) -> StoreFuture<'a, Vec<Job>> {
        Box::pin(async move {
            let filter = if handle.is_some() {
                "AND handle = $handle"
            } else {
                ""
            };
            let query = format!(
                "DELETE job WHERE kind = $kind AND state = $state {} RETURN BEFORE",
                filter
            );
            let mut response = self
                .db
                .query(query)
                .bind(("kind", kind.as_str()))
                .bind(("state", state.as_str()))
                .bind(("handle", handle.map(str::to_string)))
                .await?;
            let records: Vec<JobRecord> = response.take(0)?;
            let mut jobs = records_into_jobs(records)?;
            jobs.sort_by_key(Job::queue_order);
            Ok(jobs)
        })
    }

    fn counts(&self, kind: QueueKind) -> StoreFuture<'_, QueueStatus> {
        Box::pin(async move {
            let mut response = self
                .db
                .query(
                    r#"
                    SELECT state, count() AS count
                    FROM job
                    WHERE kind = $kind
                    GROUP BY state
                    "#,
                )
                .bind(("kind", kind.as_str()))
                .await?;
            let counts: Vec<StateCount> = response.take(0)?;

            let mut status = QueueStatus::default();
            for count in counts {
                let n = count.count.max(0) as u64;
                match count.state.as_str() {
                    "queued" => status.queued = n,
                    "processing" => status.processing = n,
                    "failed" => status.failed = n,
                    other => tracing::warn!(%kind, state = other, "unexpected job state"),
                }
            }
            Ok(status)
        })
    }

    fn append_log(
        &self,
        log: LogName,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, LogEntry> {
        Box::pin(async move {
            let text = serde_json::to_string(&payload)?;
            let at = at.timestamp_millis();
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.append_once(log, text.clone(), at).await {
                    Ok(record) => return record.into_entry(),
                    Err(e) if attempt < APPEND_RETRIES && is_retryable_conflict(&e) => {
                        tracing::debug!(%log, attempt, "append conflicted, retrying");
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }

    fn read_log(&self, log: LogName, after: LogId, limit: usize) -> StoreFuture<'_, Vec<LogEntry>> {
        Box::pin(async move {
            let mut response = self
                .db
                .query(
                    r#"
                    SELECT seq, appended_at, payload FROM log_entry
                    WHERE log = $log AND seq > $after
                    ORDER BY seq ASC
                    LIMIT $limit
                    "#,
                )
                .bind(("log", log.key()))
                .bind(("after", after as i64))
                .bind(("limit", limit as i64))
                .await?;
            let records: Vec<LogRecord> = response.take(0)?;
            records.into_iter().map(LogRecord::into_entry).collect()
        })
    }

    fn last_log_id(&self, log: LogName) -> StoreFuture<'_, LogId> {
        Box::pin(async move {
            let mut response = self
                .db
                .query("SELECT value FROM type::thing('log_seq', $log)")
                .bind(("log", log.key()))
                .await?;
            let records: Vec<SeqRecord> = response.take(0)?;
            Ok(records
                .into_iter()
                .next()
                .and_then(|r| r.value)
                .map_or(0, |v| v.max(0) as LogId))
        })
    }
}
