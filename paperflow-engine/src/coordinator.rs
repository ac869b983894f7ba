//! Lifecycle coordinator: the façade that ties the engine together.
//!
//! Enqueue, cancel, query, subscribe, and dead-letter reprocessing all go
//! through here. The coordinator owns the worker pools and the two
//! background loops (liveness watchdog, retention sweeper) and enforces the
//! formal state machine: illegal transitions are rejected as logged no-ops,
//! never surfaced to callers as errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dlq::DeadLetterStore;
use crate::error::EngineError;
use crate::events::EventLog;
use crate::idempotency::{IdempotencyIndex, Reservation};
use crate::queue::{Dispatcher, QueueSettings};
use crate::retry::{RetryController, RetryPolicy};
use crate::store::{JobMutation, JobStore, MemoryJobStore};
use crate::types::{
    DeadLetterRecord, Job, JobError, JobEvent, JobFilter, JobId, JobStatus, JobType,
};
use crate::worker::{stages, Executor, HandlerRegistry};

/// Fixed worker pool size per job type.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSlots {
    pub convert: usize,
    pub export: usize,
    pub ai: usize,
}

impl Default for WorkerSlots {
    fn default() -> Self {
        Self {
            convert: 2,
            export: 2,
            ai: 2,
        }
    }
}

impl WorkerSlots {
    pub fn for_type(&self, job_type: JobType) -> usize {
        match job_type {
            JobType::Convert => self.convert,
            JobType::Export => self.export,
            JobType::Ai => self.ai,
        }
    }
}

/// Soft execution timeouts per job type, plus the liveness window after
/// which a silent worker is declared lost.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSettings {
    pub convert: Duration,
    pub export: Duration,
    pub ai: Duration,
    pub liveness: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            convert: Duration::from_secs(60),
            export: Duration::from_secs(45),
            ai: Duration::from_secs(30),
            liveness: Duration::from_secs(30),
        }
    }
}

impl TimeoutSettings {
    pub fn for_type(&self, job_type: JobType) -> Duration {
        match job_type {
            JobType::Convert => self.convert,
            JobType::Export => self.export,
            JobType::Ai => self.ai,
        }
    }
}

/// Retention windows for the event log, the idempotency index, and
/// finished job records.
#[derive(Debug, Clone, Copy)]
pub struct RetentionSettings {
    pub event_ttl: Duration,
    pub idempotency_ttl: Duration,
    pub finished_jobs_cap: usize,
    pub sweep_interval: Duration,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            event_ttl: Duration::from_secs(24 * 3600),
            idempotency_ttl: Duration::from_secs(24 * 3600),
            finished_jobs_cap: 1000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub queue: QueueSettings,
    pub slots: WorkerSlots,
    pub timeouts: TimeoutSettings,
    pub retry: HashMap<JobType, RetryPolicy>,
    pub retention: RetentionSettings,
    /// Idle poll cadence of worker slots.
    pub poll_interval: Duration,
    /// Cadence of the liveness watchdog.
    pub watchdog_interval: Duration,
    /// Fixed RNG seed for backoff jitter; deterministic when set.
    pub retry_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue: QueueSettings::default(),
            slots: WorkerSlots::default(),
            timeouts: TimeoutSettings::default(),
            retry: JobType::ALL
                .iter()
                .map(|t| (*t, RetryPolicy::default_for(*t)))
                .collect(),
            retention: RetentionSettings::default(),
            poll_interval: Duration::from_millis(50),
            watchdog_interval: Duration::from_secs(5),
            retry_seed: None,
        }
    }
}

/// A request to enqueue work.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub job_type: JobType,
    pub payload: Value,
    pub idempotency_key: Option<String>,
    pub requested_by: String,
}

/// The engine façade. Construct with [`Coordinator::start`]; it spawns the
/// per-type worker pools and background loops and runs until
/// [`Coordinator::shutdown`].
pub struct Coordinator {
    store: Arc<dyn JobStore>,
    events: Arc<EventLog>,
    dispatcher: Arc<Dispatcher>,
    dlq: Arc<DeadLetterStore>,
    idempotency: Arc<IdempotencyIndex>,
    executor: Arc<Executor>,
    /// Serializes keyed submissions so reserve/create/bind is atomic.
    submit_lock: Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    config: EngineConfig,
}

impl Coordinator {
    pub fn start(config: EngineConfig, handlers: HandlerRegistry) -> Arc<Self> {
        let events = Arc::new(EventLog::new(config.retention.event_ttl));
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new(
            events.clone(),
            config.retention.finished_jobs_cap,
        ));
        let dispatcher = Arc::new(Dispatcher::new(config.queue.clone()));
        let retry = Arc::new(match config.retry_seed {
            Some(seed) => RetryController::with_seed(config.retry.clone(), seed),
            None => RetryController::new(config.retry.clone()),
        });
        let dlq = Arc::new(DeadLetterStore::new());
        let idempotency = Arc::new(IdempotencyIndex::new(config.retention.idempotency_ttl));

        let timeouts = JobType::ALL
            .iter()
            .map(|t| (*t, config.timeouts.for_type(*t)))
            .collect();
        let executor = Arc::new(Executor {
            store: store.clone(),
            dispatcher: dispatcher.clone(),
            retry,
            dlq: dlq.clone(),
            handlers: Arc::new(handlers),
            timeouts,
            poll_interval: config.poll_interval,
        });

        let (shutdown_tx, _) = watch::channel(false);

        let coordinator = Arc::new(Self {
            store,
            events,
            dispatcher,
            dlq,
            idempotency,
            executor,
            submit_lock: Mutex::new(()),
            shutdown_tx,
            config,
        });

        coordinator.spawn_workers();
        coordinator.spawn_watchdog();
        coordinator.spawn_sweeper();
        coordinator
    }

    fn spawn_workers(&self) {
        for job_type in JobType::ALL {
            for slot in 0..self.config.slots.for_type(job_type).max(1) {
                let executor = self.executor.clone();
                let shutdown = self.shutdown_tx.subscribe();
                tokio::spawn(executor.run_worker(job_type, slot, shutdown));
            }
        }
    }

    /// Liveness watchdog. Running jobs whose last store update is older
    /// than the liveness window are treated as `worker_lost` and routed
    /// through the retry controller; stale pending jobs that fell out of
    /// the queue are requeued.
    fn spawn_watchdog(&self) {
        let store = self.store.clone();
        let dispatcher = self.dispatcher.clone();
        let executor = self.executor.clone();
        let interval = self.config.watchdog_interval;
        let liveness = self.config.timeouts.liveness;
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }

                let cutoff = chrono::Utc::now()
                    - chrono::Duration::from_std(liveness)
                        .unwrap_or_else(|_| chrono::Duration::seconds(30));

                let filter = JobFilter {
                    status: Some(JobStatus::Running),
                    job_type: None,
                };
                if let Ok((jobs, _)) = store.list(filter, usize::MAX, 0).await {
                    for job in jobs {
                        if job.updated_at >= cutoff {
                            continue;
                        }
                        // Jobs waiting out a backoff are not lost.
                        if job.stage.as_deref() == Some(stages::AWAITING_RETRY) {
                            continue;
                        }
                        warn!(job_id = %job.id, "worker lost, reclaiming job");
                        if let Some(delay) =
                            executor.fail_or_retry(&job, JobError::worker_lost()).await
                        {
                            let executor = executor.clone();
                            tokio::spawn(async move {
                                executor.backoff_and_requeue(&job, delay).await;
                            });
                        }
                    }
                }

                // Heals queue/store divergence: a stale pending job absent
                // from its queue gets requeued. Backlogged jobs still queued
                // are left in place.
                for job_type in JobType::ALL {
                    let Ok(pending) = store.list_pending_for_type(job_type, usize::MAX).await
                    else {
                        continue;
                    };
                    for job in pending {
                        if job.updated_at < cutoff && !dispatcher.contains(job_type, job.id) {
                            dispatcher.requeue(job_type, job.id);
                            debug!(job_id = %job.id, "requeued orphaned pending job");
                        }
                    }
                }
            }
        });
    }

    /// Retention sweeper: prunes expired events and idempotency entries.
    fn spawn_sweeper(&self) {
        let events = self.events.clone();
        let idempotency = self.idempotency.clone();
        let interval = self.config.retention.sweep_interval;
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
                let expired_events = events.prune_expired().await;
                let expired_keys = idempotency.prune_expired().await;
                if expired_events + expired_keys > 0 {
                    debug!(expired_events, expired_keys, "retention sweep");
                }
            }
        });
    }

    /// Enqueue a job. Duplicate submissions bearing the same idempotency
    /// key and payload return the original job; admission failures surface
    /// as `QueueOverloaded`, `ResourceBusy`, or `RateLimited`.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Job, EngineError> {
        if request.requested_by.trim().is_empty() {
            return Err(EngineError::InvalidPayload(
                "requestedBy must not be empty".into(),
            ));
        }
        if matches!(request.job_type, JobType::Convert | JobType::Export)
            && request
                .payload
                .get("documentId")
                .and_then(Value::as_str)
                .is_none()
        {
            return Err(EngineError::InvalidPayload(format!(
                "{} payloads require a documentId",
                request.job_type
            )));
        }

        match request.idempotency_key.as_deref() {
            Some(key) => {
                let fingerprint = IdempotencyIndex::fingerprint(&request.payload);
                let _guard = self.submit_lock.lock().await;
                match self.idempotency.reserve(key, &fingerprint).await? {
                    Reservation::Existing(job_id) => match self.store.get(job_id).await {
                        Ok(job) => {
                            debug!(%job_id, key, "idempotent replay, returning existing job");
                            Ok(job)
                        }
                        // The job was evicted but the index entry survived;
                        // treat the key as fresh.
                        Err(EngineError::NotFound(_)) => {
                            let job = self.enqueue_new(&request).await?;
                            self.idempotency.bind(key, &fingerprint, job.id).await;
                            Ok(job)
                        }
                        Err(e) => Err(e),
                    },
                    Reservation::New => {
                        let job = self.enqueue_new(&request).await?;
                        self.idempotency.bind(key, &fingerprint, job.id).await;
                        Ok(job)
                    }
                }
            }
            None => self.enqueue_new(&request).await,
        }
    }

    async fn enqueue_new(&self, request: &SubmitRequest) -> Result<Job, EngineError> {
        let max_attempts = self
            .config
            .retry
            .get(&request.job_type)
            .map(|p| p.max_attempts)
            .unwrap_or_else(|| RetryPolicy::default_for(request.job_type).max_attempts);

        let mut job = Job::new(
            request.job_type,
            request.payload.clone(),
            request.requested_by.clone(),
            max_attempts,
        );
        job.idempotency_key = request.idempotency_key.clone();

        // Admission first: a rejected job must never reach the store.
        self.dispatcher.admit(&job).await?;
        let job = self.store.create(job).await?;
        self.dispatcher.push(&job);
        info!(job_id = %job.id, job_type = %job.job_type, requested_by = %job.requested_by, "job enqueued");
        Ok(job)
    }

    pub async fn get(&self, id: JobId) -> Result<Job, EngineError> {
        self.store.get(id).await
    }

    pub async fn list(
        &self,
        filter: JobFilter,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Job>, usize), EngineError> {
        self.store.list(filter, limit, offset).await
    }

    /// Cancel a job. Pending jobs are pulled from the queue and canceled
    /// immediately; running jobs get a cooperative flag honored at the next
    /// stage boundary. Cancel against a terminal job is a logged no-op.
    pub async fn cancel(&self, id: JobId) -> Result<Job, EngineError> {
        let job = self.store.get(id).await?;

        if job.status.is_terminal() {
            warn!(job_id = %id, status = %job.status, "cancel of terminal job ignored");
            return Ok(job);
        }

        if job.status == JobStatus::Pending {
            self.dispatcher.remove(job.job_type, job.id);
            let mutation = JobMutation::status(JobStatus::Canceled)
                .with_stage(stages::CANCELED)
                .with_message("canceled before dispatch");
            match self
                .store
                .compare_and_swap(id, JobStatus::Pending, mutation)
                .await
            {
                Ok(canceled) => {
                    info!(job_id = %id, "pending job canceled");
                    self.dispatcher.release(&canceled);
                    return Ok(canceled);
                }
                // Raced a dispatch; fall through to the running path.
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }

        let mutation = JobMutation {
            status: Some(JobStatus::Running),
            cancel_requested: Some(true),
            message: Some("cancel requested".into()),
            ..JobMutation::default()
        };
        match self
            .store
            .compare_and_swap(id, JobStatus::Running, mutation)
            .await
        {
            Ok(job) => {
                info!(job_id = %id, "cancel requested, honored at next stage boundary");
                Ok(job)
            }
            Err(e) if e.is_conflict() => {
                // Went terminal while we raced; report the outcome as-is.
                let job = self.store.get(id).await?;
                warn!(job_id = %id, status = %job.status, "cancel raced a terminal transition");
                Ok(job)
            }
            Err(e) => Err(e),
        }
    }

    /// Replayable event stream: everything persisted so far plus a live
    /// receiver for subsequent events.
    pub async fn subscribe(
        &self,
        id: JobId,
    ) -> Result<(Vec<JobEvent>, broadcast::Receiver<JobEvent>), EngineError> {
        // Surface unknown ids instead of an eternally-silent stream.
        self.store.get(id).await?;
        Ok(self.events.subscribe(id).await)
    }

    pub async fn replay(&self, id: JobId) -> Result<Vec<JobEvent>, EngineError> {
        self.store.get(id).await?;
        Ok(self.events.replay(id).await)
    }

    pub async fn dead_letters(
        &self,
        limit: usize,
        offset: usize,
    ) -> (Vec<DeadLetterRecord>, usize) {
        self.dlq.list(limit, offset).await
    }

    pub async fn dead_letter(&self, id: Uuid) -> Result<DeadLetterRecord, EngineError> {
        self.dlq.get(id).await
    }

    /// Reprocess a dead letter: create a brand-new job pointing back at the
    /// snapshot. The original record stays as a permanent audit trail.
    pub async fn reprocess(&self, dlq_id: Uuid) -> Result<Job, EngineError> {
        let record = self.dlq.get(dlq_id).await?;
        if let Some(existing) = record.reprocessed_as {
            return Err(EngineError::AlreadyReprocessed(dlq_id, existing));
        }

        let max_attempts = self
            .config
            .retry
            .get(&record.job_type)
            .map(|p| p.max_attempts)
            .unwrap_or_else(|| RetryPolicy::default_for(record.job_type).max_attempts);
        let mut job = Job::new(
            record.job_type,
            record.payload.clone(),
            record.requested_by.clone(),
            max_attempts,
        );
        job.parent_job_id = Some(record.job_id);

        self.dispatcher.admit(&job).await?;
        let job = self.store.create(job).await?;
        self.dispatcher.push(&job);
        self.dlq.mark_reprocessed(dlq_id, job.id).await?;
        info!(job_id = %job.id, parent = %record.job_id, "dead letter reprocessed");
        Ok(job)
    }

    /// Current backlog depth for a job type (used by readiness probes).
    pub fn queue_depth(&self, job_type: JobType) -> usize {
        self.dispatcher.depth(job_type)
    }

    /// Stop worker pools and background loops. In-flight handler calls run
    /// to completion; queued jobs stay queued.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
