//! Job lifecycle engine for document processing work.
//!
//! This crate accepts long-running jobs (`convert`, `export`, `ai`), tracks
//! them through a formal state machine, and drives them to a terminal state
//! through fixed-size per-type worker pools. The in-memory store satisfies
//! the engine's compare-and-swap contract so the whole pipeline can be wired
//! together and exercised without provisioning durable infrastructure.
//!
//! # Architecture
//!
//! - [`Coordinator`] - The engine façade: submit, cancel, query, subscribe,
//!   dead-letter reprocessing
//! - [`TaskHandler`] - Trait implemented by type-specific task handlers
//! - [`JobStore`] - Persistence contract; [`MemoryJobStore`] is the bundled
//!   implementation
//! - [`EventLog`] - Append-only progress stream with live fan-out
//! - [`RetryController`] - Classified-error retry with full-jitter backoff
//! - [`DeadLetterStore`] - Snapshots of terminally-failed jobs
//!
//! # Example
//!
//! ```rust,no_run
//! use paperflow_engine::{
//!     Coordinator, EngineConfig, HandlerRegistry, JobType, ProgressReporter,
//!     SubmitRequest, TaskError, TaskHandler,
//! };
//! use serde_json::{json, Value};
//! use async_trait::async_trait;
//!
//! struct EchoHandler;
//!
//! #[async_trait]
//! impl TaskHandler for EchoHandler {
//!     fn job_type(&self) -> JobType {
//!         JobType::Convert
//!     }
//!
//!     async fn execute(
//!         &self,
//!         payload: Value,
//!         reporter: &ProgressReporter,
//!     ) -> Result<Value, TaskError> {
//!         reporter.report("echoing", 50, None).await?;
//!         Ok(payload)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut handlers = HandlerRegistry::new();
//!     handlers.register(EchoHandler);
//!
//!     let engine = Coordinator::start(EngineConfig::default(), handlers);
//!     let job = engine
//!         .submit(SubmitRequest {
//!             job_type: JobType::Convert,
//!             payload: json!({"documentId": "doc-1"}),
//!             idempotency_key: None,
//!             requested_by: "user-1".into(),
//!         })
//!         .await
//!         .unwrap();
//!     println!("enqueued job: {}", job.id);
//! }
//! ```

mod coordinator;
mod dlq;
mod error;
mod events;
mod idempotency;
mod queue;
mod retry;
mod store;
mod types;
mod worker;

pub use coordinator::{
    Coordinator, EngineConfig, RetentionSettings, SubmitRequest, TimeoutSettings, WorkerSlots,
};
pub use dlq::DeadLetterStore;
pub use error::EngineError;
pub use events::{EventDraft, EventLog};
pub use idempotency::{IdempotencyIndex, Reservation};
pub use queue::{Dispatcher, QueueSettings};
pub use retry::{RetryController, RetryDecision, RetryPolicy};
pub use store::{JobMutation, JobStore, MemoryJobStore};
pub use types::{
    DeadLetterRecord, ErrorClass, Job, JobError, JobEvent, JobFilter, JobId, JobStatus, JobType,
};
pub use worker::{stages, HandlerRegistry, ProgressReporter, TaskError, TaskHandler};

// Re-export async_trait for convenience when implementing TaskHandler
pub use async_trait::async_trait;
