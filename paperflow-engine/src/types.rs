//! Core types for the job lifecycle engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier of a job.
pub type JobId = Uuid;

/// The kind of work a job performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Convert,
    Export,
    Ai,
}

impl JobType {
    /// All job types, used when spawning per-type worker pools.
    pub const ALL: [JobType; 3] = [JobType::Convert, JobType::Export, JobType::Ai];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::Export => "export",
            Self::Ai => "ai",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "convert" => Ok(Self::Convert),
            "export" => Ok(Self::Export),
            "ai" => Ok(Self::Ai),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    /// Returns true if this status represents a terminal state.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Whether the state machine defines an edge from `self` to `next`.
    ///
    /// `Running -> Running` is the retry edge: the job stays running while
    /// it waits out its backoff and is handed to another worker slot.
    pub const fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Canceled)
                | (Self::Running, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Canceled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        })
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Error taxonomy. Task handlers classify their own failures into one of
/// these classes; the engine never guesses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad input. Never retried.
    Validation,
    /// Missing entity or permission. Never retried.
    Resource,
    /// Storage/network/provider overload. Retried per policy.
    Transient,
    /// Heartbeat expiry. Retried as transient.
    WorkerLost,
    /// Escalated immediately, never retried.
    InternalBug,
}

impl ErrorClass {
    #[inline]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::WorkerLost)
    }
}

/// Classified error descriptor attached to a failed or retried job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    pub code: String,
    pub message: String,
    pub class: ErrorClass,
    pub retryable: bool,
}

impl JobError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, class: ErrorClass) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            class,
            retryable: class.is_retryable(),
        }
    }

    /// The error recorded when a worker stops heartbeating.
    pub fn worker_lost() -> Self {
        Self::new(
            "worker_lost",
            "worker stopped reporting before completion",
            ErrorClass::WorkerLost,
        )
    }

    /// The error recorded when a job exceeds its soft execution timeout.
    pub fn timeout(limit_secs: u64) -> Self {
        Self::new(
            "job_timeout",
            format!("execution exceeded the {limit_secs}s soft timeout"),
            ErrorClass::Transient,
        )
    }
}

/// The unit of asynchronous work tracked through the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    /// Free-form sub-phase within `running` (e.g. `extracting`).
    pub stage: Option<String>,
    /// 0-100, monotonically non-decreasing while non-terminal.
    pub progress: u8,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Opaque type-specific input, immutable after creation.
    pub payload: Value,
    /// Opaque type-specific output reference, set only on success.
    pub result: Option<Value>,
    /// Last classified error, set on failure or on a retried attempt.
    pub error: Option<JobError>,
    pub requested_by: String,
    pub idempotency_key: Option<String>,
    /// Set when this job was created by reprocessing a dead letter.
    pub parent_job_id: Option<JobId>,
    /// Cooperative-cancel flag, honored at stage boundaries.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job. Timestamps come from the server clock;
    /// worker clocks are never authoritative.
    pub fn new(
        job_type: JobType,
        payload: Value,
        requested_by: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type,
            status: JobStatus::Pending,
            stage: None,
            progress: 0,
            attempts: 0,
            max_attempts,
            payload,
            result: None,
            error: None,
            requested_by: requested_by.into(),
            idempotency_key: None,
            parent_job_id: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// The shared-resource key this job holds while active, if any.
    ///
    /// `convert` and `export` jobs are scoped to their source document;
    /// `ai` jobs are limited per caller instead.
    pub fn resource_key(&self) -> Option<String> {
        match self.job_type {
            JobType::Convert | JobType::Export => self
                .payload
                .get("documentId")
                .and_then(Value::as_str)
                .map(|s| format!("{}:{}", self.job_type, s)),
            JobType::Ai => None,
        }
    }
}

/// Immutable append-only progress record.
///
/// Ordered by `(job_id, seq)`; consumers may replay from a snapshot plus
/// subsequent events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub id: Uuid,
    pub job_id: JobId,
    /// Position in the job's event stream, assigned by the store's
    /// logical clock.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub stage: Option<String>,
    pub progress: u8,
    pub message: Option<String>,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Mapping from a caller-supplied idempotency key to an existing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub key: String,
    pub payload_fingerprint: String,
    pub job_id: JobId,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of a terminally-failed job, retained for manual inspection
/// and reprocessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub job_id: JobId,
    pub job_type: JobType,
    pub payload: Value,
    pub attempts: u32,
    pub last_error: Option<JobError>,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    /// Id of the replacement job if this record was reprocessed.
    pub reprocessed_as: Option<JobId>,
}

impl DeadLetterRecord {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            job_type: job.job_type,
            payload: job.payload.clone(),
            attempts: job.attempts,
            last_error: job.error.clone(),
            requested_by: job.requested_by.clone(),
            created_at: job.created_at,
            failed_at: Utc::now(),
            reprocessed_as: None,
        }
    }
}

/// Filter for job listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.job_type.map_or(true, |t| job.job_type == t)
    }
}
