//! Retry decisions and exponential backoff with full jitter.
//!
//! Retryable failures wait `min(cap, base * 2^attempt) * random(0..1)`
//! before requeueing. Non-retryable failures, and retryable failures that
//! exhausted their attempts, terminate the job; every terminal failure is
//! snapshotted to the dead-letter store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{Job, JobError, JobType};

/// Per-type backoff policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Defaults: convert/export retry up to 3 attempts with a 2s base
    /// and 30s cap; ai retries up to 2 attempts with a 1s base and 10s cap.
    pub fn default_for(job_type: JobType) -> Self {
        match job_type {
            JobType::Convert | JobType::Export => Self {
                base: Duration::from_secs(2),
                cap: Duration::from_secs(30),
                max_attempts: 3,
            },
            JobType::Ai => Self {
                base: Duration::from_secs(1),
                cap: Duration::from_secs(10),
                max_attempts: 2,
            },
        }
    }

    /// Upper bound of the backoff delay for the given attempt number.
    pub fn delay_ceiling(&self, attempt: u32) -> Duration {
        // 2^20 already dwarfs any sane cap; clamp to avoid overflow.
        let factor = 1u32 << attempt.min(20);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue after the backoff delay; attempts are bumped at dispatch.
    Retry { delay: Duration },
    /// Terminal failure; the coordinator records a dead letter.
    Fail,
}

/// Decides retry-vs-fail and computes jittered backoff delays.
pub struct RetryController {
    policies: HashMap<JobType, RetryPolicy>,
    rng: Mutex<StdRng>,
}

impl RetryController {
    pub fn new(policies: HashMap<JobType, RetryPolicy>) -> Self {
        Self {
            policies,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic variant for tests and reproduction runs.
    pub fn with_seed(policies: HashMap<JobType, RetryPolicy>, seed: u64) -> Self {
        Self {
            policies,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn policy(&self, job_type: JobType) -> RetryPolicy {
        self.policies
            .get(&job_type)
            .copied()
            .unwrap_or_else(|| RetryPolicy::default_for(job_type))
    }

    pub fn max_attempts(&self, job_type: JobType) -> u32 {
        self.policy(job_type).max_attempts
    }

    /// Decide the fate of a failed attempt. The handler already classified
    /// the error; the engine never guesses.
    pub fn on_failure(&self, job: &Job, error: &JobError) -> RetryDecision {
        if !error.retryable {
            return RetryDecision::Fail;
        }
        let policy = self.policy(job.job_type);
        if job.attempts >= policy.max_attempts {
            return RetryDecision::Fail;
        }
        RetryDecision::Retry {
            delay: self.jittered_delay(policy, job.attempts),
        }
    }

    /// Full jitter: a uniform draw from zero up to the exponential ceiling.
    fn jittered_delay(&self, policy: RetryPolicy, attempt: u32) -> Duration {
        let ceiling = policy.delay_ceiling(attempt);
        let factor: f64 = self.rng.lock().expect("rng lock poisoned").random();
        ceiling.mul_f64(factor)
    }
}
