//! Durable-record contract for jobs, plus the in-memory implementation.
//!
//! All status transitions go through an atomic compare-and-swap on the
//! current status so two workers can never double-process the same job.
//! Every successful mutation appends a [`JobEvent`](crate::types::JobEvent)
//! inside the same critical section, so the event stream and the job record
//! never diverge.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;

use crate::error::EngineError;
use crate::events::{EventDraft, EventLog};
use crate::types::{Job, JobError, JobFilter, JobId, JobStatus, JobType};

/// A single CAS application against a job record. Fields left `None` are
/// untouched. Progress decreases are clamped, never applied.
#[derive(Debug, Clone, Default)]
pub struct JobMutation {
    pub status: Option<JobStatus>,
    pub stage: Option<String>,
    pub progress: Option<u8>,
    pub error: Option<JobError>,
    pub result: Option<serde_json::Value>,
    pub cancel_requested: Option<bool>,
    /// Bumped once per execution attempt, at dispatch time.
    pub increment_attempts: bool,
    /// When set, the CAS additionally requires the job's attempt counter to
    /// match. Lets a worker detect that another attempt superseded it;
    /// mismatches surface as `Conflict`.
    pub guard_attempt: Option<u32>,
    /// Human-readable annotation carried on the appended event.
    pub message: Option<String>,
}

impl JobMutation {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: JobError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Persistence contract the engine requires from a job store.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> Result<Job, EngineError>;

    async fn get(&self, id: JobId) -> Result<Job, EngineError>;

    /// Apply `mutation` only if the job's current status equals `expected`.
    /// A `Conflict` result means the caller must refetch and retry or
    /// abandon; mutations against terminal states are always rejected.
    async fn compare_and_swap(
        &self,
        id: JobId,
        expected: JobStatus,
        mutation: JobMutation,
    ) -> Result<Job, EngineError>;

    async fn list_pending_for_type(
        &self,
        job_type: JobType,
        limit: usize,
    ) -> Result<Vec<Job>, EngineError>;

    /// Jobs matching `filter`, most recent first, with the total match count.
    async fn list(
        &self,
        filter: JobFilter,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Job>, usize), EngineError>;
}

/// Internal storage optimized for both FIFO iteration and lookup by id.
#[derive(Default)]
struct StoreState {
    /// Insertion order, oldest first.
    order: VecDeque<JobId>,
    jobs: HashMap<JobId, Job>,
}

impl StoreState {
    /// Evict the oldest terminal jobs once the store grows past `cap`.
    /// Live jobs are never evicted.
    fn trim(&mut self, cap: usize) {
        if self.jobs.len() <= cap {
            return;
        }
        let mut excess = self.jobs.len() - cap;
        self.order.retain(|id| {
            if excess == 0 {
                return true;
            }
            let terminal = self
                .jobs
                .get(id)
                .map(|j| j.status.is_terminal())
                .unwrap_or(true);
            if terminal {
                self.jobs.remove(id);
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

/// In-memory job store. Satisfies the CAS and append-in-same-transaction
/// guarantees so the rest of the engine can be wired together and exercised
/// without provisioning durable storage.
pub struct MemoryJobStore {
    state: RwLock<StoreState>,
    events: Arc<EventLog>,
    finished_cap: usize,
}

impl MemoryJobStore {
    pub fn new(events: Arc<EventLog>, finished_cap: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            events,
            finished_cap,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: Job) -> Result<Job, EngineError> {
        let mut state = self.state.write().await;
        state.order.push_back(job.id);
        state.jobs.insert(job.id, job.clone());
        state.trim(self.finished_cap);
        self.events
            .append(
                job.id,
                EventDraft {
                    stage: Some("queued".into()),
                    progress: 0,
                    message: None,
                    attempt: 0,
                    metadata: Some(json!({ "status": job.status })),
                },
            )
            .await;
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, EngineError> {
        let state = self.state.read().await;
        state.jobs.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    async fn compare_and_swap(
        &self,
        id: JobId,
        expected: JobStatus,
        mutation: JobMutation,
    ) -> Result<Job, EngineError> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(&id).ok_or(EngineError::NotFound(id))?;

        if job.status != expected {
            return Err(EngineError::Conflict {
                id,
                expected,
                actual: job.status,
            });
        }
        if let Some(guard) = mutation.guard_attempt {
            if job.attempts != guard {
                return Err(EngineError::Conflict {
                    id,
                    expected,
                    actual: job.status,
                });
            }
        }
        if job.status.is_terminal() {
            // No transition leaves a terminal state.
            return Err(EngineError::IllegalTransition {
                id,
                from: job.status,
                to: mutation.status.unwrap_or(job.status),
            });
        }
        if let Some(next) = mutation.status {
            if !job.status.can_transition_to(next) {
                return Err(EngineError::IllegalTransition {
                    id,
                    from: job.status,
                    to: next,
                });
            }
        }

        let now = Utc::now();
        let previous = job.status;

        if mutation.increment_attempts {
            job.attempts += 1;
        }
        if let Some(stage) = mutation.stage {
            job.stage = Some(stage);
        }
        if let Some(progress) = mutation.progress {
            job.progress = job.progress.max(progress.min(100));
        }
        if let Some(error) = mutation.error {
            job.error = Some(error);
        }
        if let Some(result) = mutation.result {
            job.result = Some(result);
        }
        if let Some(flag) = mutation.cancel_requested {
            job.cancel_requested = flag;
        }
        if let Some(next) = mutation.status {
            job.status = next;
            if previous == JobStatus::Pending && job.started_at.is_none() {
                job.started_at = Some(now);
            }
            if next.is_terminal() {
                job.completed_at = Some(now);
            }
            if next == JobStatus::Succeeded {
                job.progress = 100;
            }
        }
        job.updated_at = now;

        let updated = job.clone();
        let status_changed = mutation.status.is_some_and(|next| next != previous);

        // Same logical transaction: the event lands while the store lock is
        // still held, so event order always matches mutation order.
        self.events
            .append(
                id,
                EventDraft {
                    stage: updated.stage.clone(),
                    progress: updated.progress,
                    message: mutation.message,
                    attempt: updated.attempts,
                    metadata: status_changed.then(|| json!({ "status": updated.status })),
                },
            )
            .await;

        Ok(updated)
    }

    async fn list_pending_for_type(
        &self,
        job_type: JobType,
        limit: usize,
    ) -> Result<Vec<Job>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter(|j| j.status == JobStatus::Pending && j.job_type == job_type)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        filter: JobFilter,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Job>, usize), EngineError> {
        let state = self.state.read().await;
        let total = state.jobs.values().filter(|j| filter.matches(j)).count();
        let items = state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.jobs.get(id))
            .filter(|j| filter.matches(j))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((items, total))
    }
}
