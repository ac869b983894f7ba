//! HTTP surface of the paperflow job engine.
//!
//! Exposes the coordinator over a small JSON API: job submission, status,
//! listing, cancellation, a server-sent-events progress stream, and the
//! dead-letter endpoints.

pub mod app;
pub mod error;
pub mod handlers;
pub mod state;
