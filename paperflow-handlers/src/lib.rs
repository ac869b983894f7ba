//! Concrete task handlers for the paperflow engine.
//!
//! This crate provides implementations of the
//! [`TaskHandler`](paperflow_engine::TaskHandler) trait for the job types
//! the engine dispatches.
//!
//! # Job Types
//!
//! - `convert` - Convert a source document into a target format
//! - `export` - Bundle a document and its assets into an export artifact
//! - `ai` - Run an AI operation (summarize, rewrite) over a document
//!
//! # Usage
//!
//! ```rust,no_run
//! use paperflow_engine::{Coordinator, EngineConfig, HandlerRegistry};
//! use paperflow_handlers::register_all_handlers;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut handlers = HandlerRegistry::new();
//!     register_all_handlers(&mut handlers);
//!     let engine = Coordinator::start(EngineConfig::default(), handlers);
//!     let _ = engine;
//! }
//! ```

mod ai;
mod convert;
mod export;

pub use ai::AiHandler;
pub use convert::ConvertHandler;
pub use export::ExportHandler;

use paperflow_engine::HandlerRegistry;

/// Register all available task handlers with the registry.
pub fn register_all_handlers(registry: &mut HandlerRegistry) {
    registry.register(ConvertHandler::new());
    registry.register(ExportHandler::new());
    registry.register(AiHandler::new());
}
