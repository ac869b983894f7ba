//! Worker executor: pulls jobs, invokes task handlers, resolves outcomes.
//!
//! Task handlers are the external collaborators (parser, exporter, AI
//! client); the executor owns everything around them: claiming the job via
//! CAS, forwarding progress, enforcing the soft execution timeout, honoring
//! cooperative cancellation at stage boundaries, and routing failures
//! through the retry controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::dlq::DeadLetterStore;
use crate::error::EngineError;
use crate::queue::Dispatcher;
use crate::retry::{RetryController, RetryDecision};
use crate::store::{JobMutation, JobStore};
use crate::types::{ErrorClass, Job, JobError, JobId, JobStatus, JobType};

/// Stage names the engine itself writes. Handlers pick their own stage
/// vocabulary; these mark engine-driven transitions.
pub mod stages {
    pub const QUEUED: &str = "queued";
    pub const STARTING: &str = "starting";
    pub const RETRYING: &str = "retrying";
    /// Set while a job waits out its backoff delay; the liveness watchdog
    /// must not treat this as a lost worker.
    pub const AWAITING_RETRY: &str = "awaiting_retry";
    pub const CANCELED: &str = "canceled";
    pub const DONE: &str = "done";
}

/// Failure surface for task handlers. Handlers classify their own errors;
/// the engine never guesses.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{message}")]
    Classified {
        code: String,
        message: String,
        class: ErrorClass,
    },
    /// Raised by [`ProgressReporter::report`] when a cancel request is
    /// observed at a stage boundary. Handlers propagate it with `?`.
    #[error("job canceled at a stage boundary")]
    Canceled,
    /// Raised when another attempt took the job over (heartbeat expiry and
    /// re-dispatch). The stale worker abandons silently.
    #[error("job was taken over by a newer attempt")]
    Superseded,
}

impl TaskError {
    pub fn classified(
        code: impl Into<String>,
        message: impl Into<String>,
        class: ErrorClass,
    ) -> Self {
        Self::Classified {
            code: code.into(),
            message: message.into(),
            class,
        }
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::classified(code, message, ErrorClass::Validation)
    }

    pub fn resource(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::classified(code, message, ErrorClass::Resource)
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::classified(code, message, ErrorClass::Transient)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::classified(code, message, ErrorClass::InternalBug)
    }

    fn to_job_error(&self) -> Option<JobError> {
        match self {
            Self::Classified {
                code,
                message,
                class,
            } => Some(JobError::new(code.clone(), message.clone(), *class)),
            Self::Canceled | Self::Superseded => None,
        }
    }
}

/// Trait implemented by the type-specific task handlers.
///
/// A handler is a pure function of `(payload, reporter)`: it reports
/// stage/progress at its internal checkpoints and returns either an opaque
/// result reference or a classified error.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The job type this handler executes.
    fn job_type(&self) -> JobType;

    async fn execute(&self, payload: Value, reporter: &ProgressReporter)
        -> Result<Value, TaskError>;
}

/// Registry of task handlers, one per job type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: TaskHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.job_type(), Arc::new(handler));
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&job_type).cloned()
    }
}

/// Handle through which a running handler reports progress.
///
/// Each report is a CAS against the store (so the event stream and job
/// record move together), doubles as the heartbeat for liveness detection,
/// and is the stage boundary at which cancellation is honored. Progress
/// decreases are clamped by the store, never applied.
pub struct ProgressReporter {
    store: Arc<dyn JobStore>,
    job_id: JobId,
    attempt: u32,
}

impl ProgressReporter {
    /// Build a reporter bound to one attempt of one job. The engine builds
    /// these itself; handler tests use this to exercise a handler against a
    /// store directly.
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId, attempt: u32) -> Self {
        Self {
            store,
            job_id,
            attempt,
        }
    }

    pub async fn report(
        &self,
        stage: &str,
        progress: u8,
        message: Option<&str>,
    ) -> Result<(), TaskError> {
        let job = self
            .store
            .get(self.job_id)
            .await
            .map_err(|e| TaskError::internal("store_error", e.to_string()))?;
        if job.cancel_requested {
            return Err(TaskError::Canceled);
        }

        let mutation = JobMutation {
            stage: Some(stage.to_string()),
            progress: Some(progress),
            message: message.map(str::to_string),
            guard_attempt: Some(self.attempt),
            ..JobMutation::default()
        };
        match self
            .store
            .compare_and_swap(self.job_id, JobStatus::Running, mutation)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => Err(TaskError::Superseded),
            Err(e) => Err(TaskError::internal("store_error", e.to_string())),
        }
    }
}

/// Everything a worker slot needs to execute jobs.
pub(crate) struct Executor {
    pub store: Arc<dyn JobStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub retry: Arc<RetryController>,
    pub dlq: Arc<DeadLetterStore>,
    pub handlers: Arc<HandlerRegistry>,
    /// Soft execution timeout per job type.
    pub timeouts: HashMap<JobType, Duration>,
    /// Idle poll cadence when the queue is empty.
    pub poll_interval: Duration,
}

impl Executor {
    /// One worker slot: pull a job, run it, repeat until shutdown.
    pub(crate) async fn run_worker(
        self: Arc<Self>,
        job_type: JobType,
        slot: usize,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(%job_type, slot, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.dispatcher.dequeue(job_type) {
                Some(job_id) => {
                    if let Err(e) = self.execute_one(job_type, job_id).await {
                        warn!(%job_type, %job_id, error = %e, "job execution errored");
                    }
                }
                None => {
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = sleep(self.poll_interval) => {}
                    }
                }
            }
        }
        debug!(%job_type, slot, "worker stopped");
    }

    async fn execute_one(&self, job_type: JobType, job_id: JobId) -> Result<(), EngineError> {
        let job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(EngineError::NotFound(_)) => {
                warn!(%job_id, "dequeued job missing from store, skipping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if job.status.is_terminal() {
            debug!(%job_id, status = %job.status, "skipping already-terminal job");
            return Ok(());
        }
        if job.cancel_requested {
            return self.resolve_canceled(&job).await;
        }

        // Claim. First attempt starts the job; a retry claim keeps it
        // running and bumps the attempt counter.
        let claim = match job.status {
            JobStatus::Pending => JobMutation {
                status: Some(JobStatus::Running),
                stage: Some(stages::STARTING.into()),
                increment_attempts: true,
                ..JobMutation::default()
            },
            JobStatus::Running => JobMutation {
                status: Some(JobStatus::Running),
                stage: Some(stages::RETRYING.into()),
                increment_attempts: true,
                guard_attempt: Some(job.attempts),
                ..JobMutation::default()
            },
            _ => return Ok(()),
        };
        let job = match self.store.compare_and_swap(job_id, job.status, claim).await {
            Ok(job) => job,
            Err(e) if e.is_conflict() => {
                warn!(%job_id, error = %e, "lost claim race, skipping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        info!(%job_id, %job_type, attempt = job.attempts, "executing job");

        let Some(handler) = self.handlers.get(job_type) else {
            // Engine misconfiguration, not a handler fault.
            let error = JobError::new(
                "no_handler",
                format!("no task handler registered for {job_type}"),
                ErrorClass::InternalBug,
            );
            if let Some(delay) = self.fail_or_retry(&job, error).await {
                self.backoff_and_requeue(&job, delay).await;
            }
            return Ok(());
        };

        let reporter = ProgressReporter {
            store: self.store.clone(),
            job_id,
            attempt: job.attempts,
        };
        let limit = self
            .timeouts
            .get(&job_type)
            .copied()
            .unwrap_or(Duration::from_secs(60));

        let outcome = timeout(limit, handler.execute(job.payload.clone(), &reporter)).await;
        match outcome {
            Ok(Ok(result)) => self.resolve_success(&job, result).await,
            Ok(Err(TaskError::Canceled)) => self.resolve_canceled(&job).await,
            Ok(Err(TaskError::Superseded)) => {
                warn!(%job_id, attempt = job.attempts, "stale attempt abandoned");
                Ok(())
            }
            Ok(Err(failure)) => {
                let error = failure
                    .to_job_error()
                    .unwrap_or_else(|| JobError::new("unknown", "unclassified", ErrorClass::InternalBug));
                if let Some(delay) = self.fail_or_retry(&job, error).await {
                    self.backoff_and_requeue(&job, delay).await;
                }
                Ok(())
            }
            Err(_elapsed) => {
                let error = JobError::timeout(limit.as_secs());
                if let Some(delay) = self.fail_or_retry(&job, error).await {
                    self.backoff_and_requeue(&job, delay).await;
                }
                Ok(())
            }
        }
    }

    async fn resolve_success(&self, job: &Job, result: Value) -> Result<(), EngineError> {
        let mutation = JobMutation {
            status: Some(JobStatus::Succeeded),
            stage: Some(stages::DONE.into()),
            result: Some(result),
            guard_attempt: Some(job.attempts),
            ..JobMutation::default()
        };
        match self
            .store
            .compare_and_swap(job.id, JobStatus::Running, mutation)
            .await
        {
            Ok(done) => {
                info!(job_id = %job.id, attempts = done.attempts, "job succeeded");
                self.dispatcher.release(&done);
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                warn!(job_id = %job.id, error = %e, "duplicate completion signal ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_canceled(&self, job: &Job) -> Result<(), EngineError> {
        let mutation = JobMutation::status(JobStatus::Canceled)
            .with_stage(stages::CANCELED)
            .with_message("cancellation honored at stage boundary");
        match self
            .store
            .compare_and_swap(job.id, job.status, mutation)
            .await
        {
            Ok(canceled) => {
                info!(job_id = %job.id, "job canceled");
                self.dispatcher.release(&canceled);
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                warn!(job_id = %job.id, error = %e, "cancel raced a terminal transition, ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Route a failed attempt through the retry controller. Terminal
    /// failures are snapshotted to the dead-letter store here; retryable
    /// ones are marked `awaiting_retry` and the backoff delay is returned
    /// for the caller to wait out.
    pub(crate) async fn fail_or_retry(&self, job: &Job, error: JobError) -> Option<Duration> {
        match self.retry.on_failure(job, &error) {
            RetryDecision::Retry { delay } => {
                let mutation = JobMutation {
                    status: Some(JobStatus::Running),
                    stage: Some(stages::AWAITING_RETRY.into()),
                    error: Some(error.clone()),
                    guard_attempt: Some(job.attempts),
                    message: Some(format!(
                        "attempt {}/{} failed ({}), retrying in {}ms",
                        job.attempts,
                        job.max_attempts,
                        error.code,
                        delay.as_millis()
                    )),
                    ..JobMutation::default()
                };
                match self
                    .store
                    .compare_and_swap(job.id, JobStatus::Running, mutation)
                    .await
                {
                    Ok(_) => {
                        warn!(job_id = %job.id, attempt = job.attempts, code = %error.code, "attempt failed, will retry");
                        Some(delay)
                    }
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "retry bookkeeping lost a race, dropping");
                        None
                    }
                }
            }
            RetryDecision::Fail => {
                let mutation = JobMutation {
                    status: Some(JobStatus::Failed),
                    error: Some(error.clone()),
                    guard_attempt: Some(job.attempts),
                    message: Some(format!("failed terminally: {}", error.code)),
                    ..JobMutation::default()
                };
                match self
                    .store
                    .compare_and_swap(job.id, JobStatus::Running, mutation)
                    .await
                {
                    Ok(failed) => {
                        warn!(job_id = %failed.id, attempts = failed.attempts, code = %error.code, "job failed terminally");
                        self.dlq.record(&failed).await;
                        self.dispatcher.release(&failed);
                    }
                    Err(e) if e.is_conflict() => {
                        warn!(job_id = %job.id, error = %e, "terminal failure raced another transition, ignored");
                    }
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "failed to persist terminal failure");
                    }
                }
                None
            }
        }
    }

    /// Wait out the backoff (the worker slot blocks during the wait) and
    /// put the job back on its queue, unless a cancel arrived meanwhile.
    pub(crate) async fn backoff_and_requeue(&self, job: &Job, delay: Duration) {
        sleep(delay).await;
        match self.store.get(job.id).await {
            Ok(current) if current.cancel_requested => {
                let _ = self.resolve_canceled(&current).await;
            }
            Ok(current) if current.status == JobStatus::Running => {
                self.dispatcher.requeue(current.job_type, current.id);
            }
            Ok(current) => {
                debug!(job_id = %current.id, status = %current.status, "skipping requeue");
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "job vanished before requeue");
            }
        }
    }
}
