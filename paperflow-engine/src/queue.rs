//! Per-type queues with admission control.
//!
//! Admission enforces three things before a job is ever stored:
//! - queue-depth shedding: once a type's backlog stays above the high
//!   watermark for a sustained window, new enqueues are rejected instead
//!   of accepted and starved;
//! - per-document caps: one active `convert` per source document, up to a
//!   configurable count of active `export` jobs per document;
//! - per-caller rate limiting for `ai` jobs (token bucket).
//!
//! Dequeue is fair FIFO per type; there are no priority classes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::EngineError;
use crate::types::{Job, JobId, JobType};

/// Queue and admission tunables. Watermark values are configuration; the
/// defaults are deliberately conservative.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Backlog depth at which a type's queue is considered overloaded.
    pub high_watermark: usize,
    /// How long the backlog must stay above the watermark before shedding.
    pub shed_window: Duration,
    /// Active `export` jobs allowed per source document.
    pub export_per_document: usize,
    /// Token refill rate for per-caller `ai` admission.
    pub ai_rate_per_sec: f64,
    /// Token bucket capacity for per-caller `ai` admission.
    pub ai_burst: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            high_watermark: 100,
            shed_window: Duration::from_secs(5),
            export_per_document: 2,
            ai_rate_per_sec: 1.0,
            ai_burst: 5,
        }
    }
}

/// A simple token-bucket instance.
#[derive(Clone)]
struct TokenBucket {
    inner: Arc<tokio::sync::Mutex<TokenBucketInner>>,
}

struct TokenBucketInner {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_check: Instant,
}

impl TokenBucket {
    fn new(capacity: usize, refill_per_sec: f64) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(TokenBucketInner {
                capacity: capacity as f64,
                tokens: capacity as f64,
                refill_per_sec,
                last_check: Instant::now(),
            })),
        }
    }

    async fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_check).as_secs_f64();
        if elapsed > 0.0 {
            inner.tokens = (inner.tokens + elapsed * inner.refill_per_sec).min(inner.capacity);
            inner.last_check = now;
        }
        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-caller token buckets for `ai` admission.
struct CallerRateLimiter {
    buckets: DashMap<String, TokenBucket>,
    rate_per_sec: f64,
    burst: usize,
}

impl CallerRateLimiter {
    fn new(rate_per_sec: f64, burst: usize) -> Self {
        Self {
            buckets: DashMap::new(),
            rate_per_sec,
            burst,
        }
    }

    async fn try_acquire_for(&self, caller: &str) -> bool {
        let bucket = self
            .buckets
            .entry(caller.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst, self.rate_per_sec))
            .clone();
        bucket.try_acquire().await
    }
}

#[derive(Default)]
struct DispatchState {
    queues: HashMap<JobType, VecDeque<JobId>>,
    /// Active (pending + running) job count per resource key.
    resources: HashMap<String, usize>,
    /// When each type's backlog first exceeded the watermark.
    overloaded_since: HashMap<JobType, Instant>,
}

/// Per-type FIFO queues with admission control. Resource counters use one
/// short critical section apiece, the same discipline as the job store's
/// CAS; no distributed lock is involved.
pub struct Dispatcher {
    state: Mutex<DispatchState>,
    settings: QueueSettings,
    ai_limiter: CallerRateLimiter,
}

impl Dispatcher {
    pub fn new(settings: QueueSettings) -> Self {
        let ai_limiter = CallerRateLimiter::new(settings.ai_rate_per_sec, settings.ai_burst);
        Self {
            state: Mutex::new(DispatchState::default()),
            settings,
            ai_limiter,
        }
    }

    /// Run admission checks and reserve the job's resource slot. Does not
    /// queue the job; callers persist it first and then [`push`](Self::push)
    /// it, so a worker can never dequeue a job the store does not know.
    pub async fn admit(&self, job: &Job) -> Result<(), EngineError> {
        if job.job_type == JobType::Ai
            && !self.ai_limiter.try_acquire_for(&job.requested_by).await
        {
            return Err(EngineError::RateLimited {
                caller: job.requested_by.clone(),
            });
        }

        let mut state = self.state.lock().expect("dispatcher lock poisoned");

        let depth = state
            .queues
            .get(&job.job_type)
            .map(VecDeque::len)
            .unwrap_or(0);
        if depth >= self.settings.high_watermark {
            let since = state
                .overloaded_since
                .entry(job.job_type)
                .or_insert_with(Instant::now);
            if since.elapsed() >= self.settings.shed_window {
                return Err(EngineError::QueueOverloaded {
                    job_type: job.job_type,
                });
            }
        } else {
            state.overloaded_since.remove(&job.job_type);
        }

        if let Some(key) = job.resource_key() {
            let cap = match job.job_type {
                JobType::Convert => 1,
                JobType::Export => self.settings.export_per_document,
                JobType::Ai => usize::MAX,
            };
            let active = state.resources.get(&key).copied().unwrap_or(0);
            if active >= cap {
                return Err(EngineError::ResourceBusy {
                    job_type: job.job_type,
                    resource: key,
                });
            }
            *state.resources.entry(key).or_insert(0) += 1;
        }

        Ok(())
    }

    /// Queue an admitted, persisted job for dispatch.
    pub fn push(&self, job: &Job) {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        state
            .queues
            .entry(job.job_type)
            .or_default()
            .push_back(job.id);
    }

    /// Re-queue a job after a backoff wait. Bypasses admission: the job
    /// still holds its resource slot from the original enqueue.
    pub fn requeue(&self, job_type: JobType, job_id: JobId) {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        state.queues.entry(job_type).or_default().push_back(job_id);
    }

    /// Pop the oldest queued job of `job_type`.
    pub fn dequeue(&self, job_type: JobType) -> Option<JobId> {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        state.queues.get_mut(&job_type).and_then(VecDeque::pop_front)
    }

    /// Remove a still-queued job (pending cancel). Returns whether the job
    /// was found in the queue.
    pub fn remove(&self, job_type: JobType, job_id: JobId) -> bool {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        if let Some(queue) = state.queues.get_mut(&job_type) {
            if let Some(pos) = queue.iter().position(|id| *id == job_id) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }

    /// Whether a job is currently sitting in its type's queue.
    pub fn contains(&self, job_type: JobType, job_id: JobId) -> bool {
        let state = self.state.lock().expect("dispatcher lock poisoned");
        state
            .queues
            .get(&job_type)
            .map(|q| q.iter().any(|id| *id == job_id))
            .unwrap_or(false)
    }

    /// Release the resource slot a terminal job was holding. Called exactly
    /// once per job, by whoever wins the terminal CAS.
    pub fn release(&self, job: &Job) {
        let Some(key) = job.resource_key() else {
            return;
        };
        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        if let Some(count) = state.resources.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.resources.remove(&key);
            }
        }
    }

    pub fn depth(&self, job_type: JobType) -> usize {
        let state = self.state.lock().expect("dispatcher lock poisoned");
        state
            .queues
            .get(&job_type)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}
