//! Document conversion handler.

use async_trait::async_trait;
use paperflow_engine::{JobType, ProgressReporter, TaskError, TaskHandler};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// Payload for `convert` jobs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertPayload {
    pub document_id: String,
    pub source_format: Option<String>,
    pub target_format: Option<String>,
}

const SUPPORTED_TARGETS: &[&str] = &["pdf", "docx", "html", "markdown"];

/// Handler for `convert` jobs.
///
/// Walks the conversion pipeline (extract, convert, finalize) and returns a
/// reference to the produced artifact. The real conversion backend is
/// injected behind this seam; this implementation produces a deterministic
/// output reference so the pipeline can be exercised end to end.
#[derive(Debug, Default)]
pub struct ConvertHandler {
    // In a real deployment this holds the conversion backend client and
    // the artifact storage handle.
}

impl ConvertHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskHandler for ConvertHandler {
    fn job_type(&self) -> JobType {
        JobType::Convert
    }

    async fn execute(
        &self,
        payload: Value,
        reporter: &ProgressReporter,
    ) -> Result<Value, TaskError> {
        let parsed: ConvertPayload = serde_json::from_value(payload)
            .map_err(|e| TaskError::validation("invalid_payload", e.to_string()))?;
        if parsed.document_id.trim().is_empty() {
            return Err(TaskError::validation(
                "missing_document",
                "documentId must not be empty",
            ));
        }
        let target = parsed.target_format.as_deref().unwrap_or("pdf");
        if !SUPPORTED_TARGETS.contains(&target) {
            return Err(TaskError::validation(
                "unsupported_format",
                format!("cannot convert to {target}"),
            ));
        }

        info!(
            document_id = %parsed.document_id,
            source_format = ?parsed.source_format,
            target_format = target,
            "executing convert job"
        );

        reporter.report("extracting", 20, None).await?;
        reporter.report("converting", 55, None).await?;
        reporter.report("finalizing", 85, None).await?;

        Ok(json!({
            "outputRef": format!("converted/{}.{target}", parsed.document_id),
            "targetFormat": target,
        }))
    }
}
