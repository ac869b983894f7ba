//! AI operation handler.

use async_trait::async_trait;
use paperflow_engine::{JobType, ProgressReporter, TaskError, TaskHandler};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// Payload for `ai` jobs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiPayload {
    pub prompt: String,
    pub document_id: Option<String>,
    pub operation: Option<String>,
}

const SUPPORTED_OPERATIONS: &[&str] = &["summarize", "rewrite", "outline"];

/// Handler for `ai` jobs.
///
/// Runs an AI operation over a prompt (optionally grounded in a document)
/// and relays the provider's streamed output as ordinary progress events,
/// so AI jobs look exactly like any other job to consumers. The provider
/// client is stubbed with a canned response.
#[derive(Debug, Default)]
pub struct AiHandler {
    // In a real deployment this holds the provider client and its
    // credentials.
}

impl AiHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskHandler for AiHandler {
    fn job_type(&self) -> JobType {
        JobType::Ai
    }

    async fn execute(
        &self,
        payload: Value,
        reporter: &ProgressReporter,
    ) -> Result<Value, TaskError> {
        let parsed: AiPayload = serde_json::from_value(payload)
            .map_err(|e| TaskError::validation("invalid_payload", e.to_string()))?;
        if parsed.prompt.trim().is_empty() {
            return Err(TaskError::validation(
                "missing_prompt",
                "prompt must not be empty",
            ));
        }
        let operation = parsed.operation.as_deref().unwrap_or("summarize");
        if !SUPPORTED_OPERATIONS.contains(&operation) {
            return Err(TaskError::validation(
                "unsupported_operation",
                format!("unknown ai operation {operation}"),
            ));
        }

        info!(
            operation,
            document_id = ?parsed.document_id,
            "executing ai job"
        );

        reporter.report("prompting", 10, None).await?;

        // Each streamed chunk becomes one progress event; consumers follow
        // the same stream they would for a convert job.
        let chunks = ["The document ", "covers three topics ", "in detail."];
        let mut completion = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            completion.push_str(chunk);
            let progress = 20 + (60 * (i as u8 + 1) / chunks.len() as u8);
            reporter
                .report("streaming", progress, Some(chunk.trim_end()))
                .await?;
        }

        Ok(json!({
            "operation": operation,
            "completion": completion.trim_end(),
            "chunks": chunks.len(),
        }))
    }
}
