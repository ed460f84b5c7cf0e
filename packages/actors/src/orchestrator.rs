//! Orchestrator actor: owns the worker tasks and the run-state machine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use scout_core::{
    Clock, Command, CommandEnvelope, CurrentJob, LogId, LogName, OrchestratorSnapshot,
    QueueKind, RunState, StatusEvent, SystemClock,
};
use scout_db::{CommandBus, JobQueue, RateGate, SharedStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborators::Collaborators;
use crate::config::OrchestratorConfig;
use crate::cursor::CursorStore;
use crate::messages::{JobOutcome, OrchestratorError, OrchestratorMessage};
use crate::workers::{self, COMMAND_CONSUMER, WorkerContext, WorkerHandle};

/// How long callers wait for an orchestrator reply.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to spawn the orchestrator.
pub struct OrchestratorArgs {
    store: Arc<dyn SharedStore>,
    collaborators: Collaborators,
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
    name: Option<String>,
    snapshot_tx: watch::Sender<OrchestratorSnapshot>,
}

impl OrchestratorArgs {
    pub fn new(
        store: Arc<dyn SharedStore>,
        collaborators: Collaborators,
        config: OrchestratorConfig,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(OrchestratorSnapshot::default());
        Self {
            store,
            collaborators,
            config,
            clock: Arc::new(SystemClock),
            name: None,
            snapshot_tx,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register the actor under a process-wide name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// State for the orchestrator actor.
pub struct OrchestratorState {
    snapshot: OrchestratorSnapshot,
    snapshot_tx: watch::Sender<OrchestratorSnapshot>,
    ctx: WorkerContext,
    gate: RateGate,
    workers: Vec<WorkerHandle>,
    cancel: Option<CancellationToken>,
    /// Last command log offset whose commands have all run.
    commands_read: Option<LogId>,
    cursors: Option<CursorStore>,
}

impl OrchestratorState {
    fn now(&self) -> DateTime<Utc> {
        self.ctx.now()
    }

    fn broadcast(&self) {
        self.snapshot_tx.send_replace(self.snapshot.clone());
    }

    async fn set_state(&mut self, new_state: RunState) {
        let old_state = self.snapshot.state;
        if old_state == new_state {
            return;
        }
        self.snapshot.state = new_state;
        tracing::info!("Orchestrator {} -> {}", old_state, new_state);
        self.ctx
            .publish(StatusEvent::StateChanged {
                old_state,
                new_state,
                timestamp: self.now(),
            })
            .await;
        self.broadcast();
    }

    fn cooldown_active(&self, now: DateTime<Utc>) -> bool {
        self.snapshot.rate_limited_until.is_some_and(|until| now <= until)
    }

    async fn start(&mut self) -> Result<(), String> {
        if self.snapshot.state != RunState::Stopped {
            return Err(format!("orchestrator is already {}", self.snapshot.state));
        }
        let next = if self.cooldown_active(self.now()) {
            RunState::RateLimited
        } else {
            RunState::Running
        };
        self.set_state(next).await;

        let cancel = CancellationToken::new();
        self.workers = workers::spawn_all(&self.ctx, &cancel, self.commands_read);
        self.cancel = Some(cancel);
        tracing::info!(workers = self.workers.len(), "Workers started");
        Ok(())
    }

    /// Cancel the workers and join each with a bounded timeout.
    async fn stop_workers(&mut self) -> usize {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        let join_timeout = self.ctx.config.join_timeout;
        let count = self.workers.len();
        for mut worker in self.workers.drain(..) {
            match tokio::time::timeout(join_timeout, &mut worker.handle).await {
                Ok(Ok(())) => tracing::debug!(worker = worker.name, "Worker joined"),
                Ok(Err(e)) => tracing::error!(worker = worker.name, "Worker panicked: {}", e),
                Err(_) => {
                    tracing::warn!(
                        worker = worker.name,
                        "Worker did not exit within {:?}, aborting",
                        join_timeout
                    );
                    worker.handle.abort();
                }
            }
        }
        self.snapshot.current_jobs.clear();
        count
    }

    async fn dispatch(&mut self, envelope: CommandEnvelope) {
        let name = envelope.command.name();
        let result = self.execute(envelope.command).await;
        let now = self.now();
        match result {
            Ok(detail) => {
                tracing::info!(command = name, source = %envelope.source, "{}", detail);
                self.ctx
                    .publish(StatusEvent::CommandHandled {
                        command: name.to_string(),
                        source: envelope.source,
                        detail,
                        timestamp: now,
                    })
                    .await;
            }
            Err(e) => {
                tracing::warn!(command = name, source = %envelope.source, "Command not executed: {}", e);
                self.ctx
                    .publish(StatusEvent::CommandIgnored {
                        command: name.to_string(),
                        reason: e.to_string(),
                        timestamp: now,
                    })
                    .await;
            }
        }
    }

    async fn execute(&mut self, command: Command) -> Result<String, OrchestratorError> {
        match command {
            Command::Stop => {
                if self.snapshot.state == RunState::Stopped {
                    return Err(OrchestratorError::Rejected("already stopped".into()));
                }
                let joined = self.stop_workers().await;
                self.set_state(RunState::Stopped).await;
                Ok(format!("stopped {} workers", joined))
            }

            Command::Pause => match self.snapshot.state {
                RunState::Running | RunState::RateLimited => {
                    self.set_state(RunState::Paused).await;
                    Ok("paused".into())
                }
                state => Err(OrchestratorError::Rejected(format!("cannot pause while {}", state))),
            },

            Command::Resume => {
                if self.snapshot.state != RunState::Paused {
                    return Err(OrchestratorError::Rejected(format!(
                        "cannot resume while {}",
                        self.snapshot.state
                    )));
                }
                let next = if self.cooldown_active(self.now()) {
                    RunState::RateLimited
                } else {
                    RunState::Running
                };
                self.set_state(next).await;
                Ok(format!("resumed into {}", next))
            }

            Command::PopulateQueue { limit } => {
                let handles = self.ctx.collaborators.directory.due_handles(limit).await?;
                for handle in &handles {
                    self.enqueue(QueueKind::Scraper, handle, None).await?;
                }
                Ok(format!("enqueued {} clubs", handles.len()))
            }

            Command::RequeueStalled => {
                let mut total = 0;
                for kind in QueueKind::ALL {
                    total += self.ctx.reclaim_stalled(kind).await?;
                }
                Ok(format!("requeued {} stalled jobs", total))
            }

            Command::FlushQueue { queue_type } => {
                let count = self.ctx.queue.flush(queue_type).await?;
                self.ctx
                    .publish(StatusEvent::QueueFlushed {
                        kind: queue_type,
                        count,
                        timestamp: self.now(),
                    })
                    .await;
                Ok(format!("flushed {} {} jobs", count, queue_type))
            }

            Command::AddClub {
                instagram_handle,
                priority,
            } => {
                self.enqueue(QueueKind::Scraper, &instagram_handle, priority)
                    .await?;
                Ok(format!("enqueued {}", instagram_handle))
            }

            Command::RequeueJob {
                instagram_handle,
                job_type,
            } => {
                let job = match self.ctx.queue.revive(job_type, &instagram_handle).await? {
                    Some(job) => job,
                    None => {
                        let priority = self.ctx.queue.policy().retry_priority;
                        self.ctx
                            .queue
                            .enqueue(job_type, &instagram_handle, Some(priority))
                            .await?
                    }
                };
                self.ctx
                    .publish(StatusEvent::JobEnqueued {
                        kind: job.kind,
                        job_id: job.id,
                        handle: job.handle.clone(),
                        priority: job.priority,
                        timestamp: job.enqueued_at,
                    })
                    .await;
                Ok(format!("requeued {} on {}", instagram_handle, job_type))
            }

            Command::TriggerClean => {
                let removed = self.ctx.run_maintenance().await?;
                Ok(format!("cleanup removed {} records", removed))
            }

            Command::PurgeFailed {
                job_type,
                instagram_handle,
            } => {
                let count = self
                    .ctx
                    .queue
                    .bury(job_type, instagram_handle.as_deref())
                    .await?;
                Ok(format!("purged {} dead-letter {} jobs", count, job_type))
            }
        }
    }

    async fn enqueue(
        &self,
        kind: QueueKind,
        handle: &str,
        priority: Option<i64>,
    ) -> Result<(), OrchestratorError> {
        let job = self.ctx.queue.enqueue(kind, handle, priority).await?;
        self.ctx
            .publish(StatusEvent::JobEnqueued {
                kind,
                job_id: job.id,
                handle: job.handle,
                priority: job.priority,
                timestamp: job.enqueued_at,
            })
            .await;
        Ok(())
    }

    async fn on_commands_read(&mut self, through: LogId) {
        if self.commands_read.is_some_and(|read| read >= through) {
            return;
        }
        self.commands_read = Some(through);
        if let Some(cursors) = &self.cursors {
            if let Err(e) = cursors
                .save(COMMAND_CONSUMER, LogName::Notifications, through)
                .await
            {
                tracing::warn!("Failed to persist command cursor: {}", e);
            }
        }
    }

    /// Re-evaluate the gate after a rate-limit signal.
    async fn on_rate_limited(&mut self, handle: &str) {
        // A lapsed cooldown ends before a new one can start
        self.end_expired_cooldown().await;
        if let Err(e) = self.gate.refresh(&self.ctx.bus).await {
            tracing::warn!("Failed to refresh rate-limit signals: {}", e);
        }
        let now = self.now();
        let level = self.gate.classify(now);
        let signals = self.gate.signals_in_window(now);
        let Some(cooldown) = self.gate.cooldown(level) else {
            tracing::debug!(handle, "Rate limit below threshold");
            return;
        };

        let until = match self.snapshot.rate_limited_until {
            Some(current) if current > now + cooldown => current,
            _ => now + cooldown,
        };
        if self.snapshot.rate_limited_until != Some(until) {
            self.snapshot.rate_limited_until = Some(until);
            tracing::warn!(%level, signals, %until, "Scraping cooldown started");
            self.ctx
                .publish(StatusEvent::CooldownStarted {
                    level: level.to_string(),
                    signals,
                    until,
                    timestamp: now,
                })
                .await;
        }

        if self.snapshot.state == RunState::Running {
            self.set_state(RunState::RateLimited).await;
        }
    }

    /// Leave the cooldown once `rate_limited_until` has passed.
    async fn end_expired_cooldown(&mut self) {
        let now = self.now();
        let expired = self
            .snapshot
            .rate_limited_until
            .is_some_and(|until| now > until);
        if !expired {
            return;
        }
        self.snapshot.rate_limited_until = None;
        tracing::info!("Scraping cooldown ended");
        self.ctx
            .publish(StatusEvent::CooldownEnded { timestamp: now })
            .await;
        if self.snapshot.state == RunState::RateLimited {
            self.set_state(RunState::Running).await;
        }
    }

    fn on_job_finished(&mut self, kind: QueueKind, job_id: scout_core::JobId, outcome: JobOutcome) {
        if self
            .snapshot
            .current_jobs
            .get(&kind)
            .is_some_and(|current| current.job_id == job_id)
        {
            self.snapshot.current_jobs.remove(&kind);
        }
        let counters = self.snapshot.counters.entry(kind).or_default();
        match outcome {
            JobOutcome::Completed => counters.completed += 1,
            JobOutcome::Failed => counters.failed += 1,
            JobOutcome::Released => counters.rate_limited += 1,
            JobOutcome::Abandoned => {}
        }
    }
}

/// Orchestrator actor for one worker process.
pub struct Orchestrator;

impl Actor for Orchestrator {
    type Msg = OrchestratorMessage;
    type State = OrchestratorState;
    type Arguments = OrchestratorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting orchestrator");
        let config = Arc::new(args.config);

        // Periodic tick for cooldown expiry
        let tick_interval = config.tick_interval.max(Duration::from_millis(1));
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            loop {
                interval.tick().await;
                if myself_clone.send_message(OrchestratorMessage::Tick).is_err() {
                    break;
                }
            }
        });

        let ctx = WorkerContext {
            queue: JobQueue::with_clock(args.store.clone(), config.policy.clone(), args.clock.clone()),
            bus: CommandBus::with_clock(args.store, args.clock),
            collaborators: args.collaborators,
            config: config.clone(),
            orchestrator: myself,
            snapshot: args.snapshot_tx.subscribe(),
        };

        let snapshot = args.snapshot_tx.borrow().clone();
        Ok(OrchestratorState {
            snapshot,
            snapshot_tx: args.snapshot_tx,
            ctx,
            gate: RateGate::new(config.rate_gate.clone()),
            workers: Vec::new(),
            cancel: None,
            commands_read: None,
            cursors: config.cursor_dir.as_ref().map(CursorStore::new),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            OrchestratorMessage::Start { reply } => {
                let result = state.start().await;
                let _ = reply.send(result);
            }

            OrchestratorMessage::Dispatch { envelope } => {
                state.dispatch(*envelope).await;
            }

            OrchestratorMessage::JobStarted {
                kind,
                job_id,
                handle,
                started_at,
            } => {
                state.snapshot.current_jobs.insert(
                    kind,
                    CurrentJob {
                        job_id,
                        handle,
                        started_at,
                    },
                );
            }

            OrchestratorMessage::JobFinished {
                kind,
                job_id,
                outcome,
            } => {
                state.on_job_finished(kind, job_id, outcome);
            }

            OrchestratorMessage::CommandsRead { through } => {
                state.on_commands_read(through).await;
            }

            OrchestratorMessage::RateLimited { handle } => {
                state.on_rate_limited(&handle).await;
            }

            OrchestratorMessage::GetSnapshot { reply } => {
                let _ = reply.send(state.snapshot.clone());
                return Ok(());
            }

            OrchestratorMessage::Tick => {
                state.end_expired_cooldown().await;
            }
        }

        state.broadcast();
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if !state.workers.is_empty() {
            state.stop_workers().await;
        }
        state.snapshot.state = RunState::Stopped;
        state.broadcast();
        tracing::info!("Orchestrator stopped");
        Ok(())
    }
}

/// Caller-side handle to a running orchestrator.
pub struct OrchestratorHandle {
    actor: ActorRef<OrchestratorMessage>,
    join: JoinHandle<()>,
    snapshot: watch::Receiver<OrchestratorSnapshot>,
}

impl OrchestratorHandle {
    pub fn actor(&self) -> &ActorRef<OrchestratorMessage> {
        &self.actor
    }

    /// Spawn the workers and enter `Running`.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        let result = ractor::rpc::call(
            &self.actor,
            |reply| OrchestratorMessage::Start { reply },
            Some(CALL_TIMEOUT),
        )
        .await
        .map_err(|e| OrchestratorError::Messaging(e.to_string()))?;
        match result {
            ractor::rpc::CallResult::Success(Ok(())) => Ok(()),
            ractor::rpc::CallResult::Success(Err(reason)) => Err(OrchestratorError::Rejected(reason)),
            ractor::rpc::CallResult::Timeout => Err(OrchestratorError::Timeout),
            ractor::rpc::CallResult::SenderError => {
                Err(OrchestratorError::Messaging("reply dropped".into()))
            }
        }
    }

    /// Queue a command for execution, as if it arrived on the bus.
    pub fn dispatch(&self, envelope: CommandEnvelope) -> Result<(), OrchestratorError> {
        self.actor
            .send_message(OrchestratorMessage::Dispatch {
                envelope: Box::new(envelope),
            })
            .map_err(|e| OrchestratorError::Messaging(e.to_string()))
    }

    /// The most recently published state.
    pub fn snapshot(&self) -> OrchestratorSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Ask the actor for its state, ordered after every earlier message.
    pub async fn query(&self) -> Result<OrchestratorSnapshot, OrchestratorError> {
        match ractor::rpc::call(
            &self.actor,
            |reply| OrchestratorMessage::GetSnapshot { reply },
            Some(CALL_TIMEOUT),
        )
        .await
        .map_err(|e| OrchestratorError::Messaging(e.to_string()))?
        {
            ractor::rpc::CallResult::Success(snapshot) => Ok(snapshot),
            ractor::rpc::CallResult::Timeout => Err(OrchestratorError::Timeout),
            ractor::rpc::CallResult::SenderError => {
                Err(OrchestratorError::Messaging("reply dropped".into()))
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorSnapshot> {
        self.snapshot.clone()
    }

    /// Resolve once the orchestrator reaches `Stopped`.
    pub async fn wait_stopped(&self) {
        let mut rx = self.snapshot.clone();
        let _ = rx.wait_for(|s| s.state == RunState::Stopped).await;
    }

    /// Stop the actor itself, joining any workers still running.
    pub async fn shutdown(self) {
        self.actor.stop(None);
        if let Err(e) = self.join.await {
            tracing::error!("Orchestrator task failed: {}", e);
        }
    }
}

/// Spawn the orchestrator actor in the `Stopped` state.
pub async fn start_orchestrator(args: OrchestratorArgs) -> Result<OrchestratorHandle, OrchestratorError> {
    let snapshot = args.snapshot_tx.subscribe();
    let name = args.name.clone();
    let (actor, join) = Actor::spawn(name, Orchestrator, args)
        .await
        .map_err(|e| OrchestratorError::Spawn(e.to_string()))?;
    Ok(OrchestratorHandle {
        actor,
        join,
        snapshot,
    })
}
