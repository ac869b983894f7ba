//! Error types for the job lifecycle engine.

use thiserror::Error;
use uuid::Uuid;

use crate::types::{JobStatus, JobType};

/// Errors surfaced by the engine to callers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("status conflict for job {id}: expected {expected}, found {actual}")]
    Conflict {
        id: Uuid,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("transition from {from} to {to} is not defined for job {id}")]
    IllegalTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("{job_type} queue is overloaded, enqueue rejected")]
    QueueOverloaded { job_type: JobType },

    #[error("resource {resource} already holds the maximum number of active {job_type} jobs")]
    ResourceBusy {
        job_type: JobType,
        resource: String,
    },

    #[error("ai request rate exceeded for caller {caller}")]
    RateLimited { caller: String },

    #[error("idempotency key {key} was reused with a different payload")]
    IdempotencyConflict { key: String },

    #[error("no task handler registered for job type {0}")]
    NoHandler(JobType),

    #[error("dead letter not found: {0}")]
    DeadLetterNotFound(Uuid),

    #[error("dead letter {0} was already reprocessed as job {1}")]
    AlreadyReprocessed(Uuid, Uuid),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl EngineError {
    /// True for CAS losses that callers should treat as a logged no-op
    /// rather than an error (e.g. duplicate completion signals).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::IllegalTransition { .. }
        )
    }
}
