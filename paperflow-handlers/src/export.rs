//! Document export handler.

use async_trait::async_trait;
use paperflow_engine::{JobType, ProgressReporter, TaskError, TaskHandler};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// Payload for `export` jobs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub document_id: String,
    pub format: Option<String>,
    #[serde(default)]
    pub include_assets: bool,
}

const SUPPORTED_FORMATS: &[&str] = &["pdf", "epub", "zip"];

/// Handler for `export` jobs.
///
/// Collects a document and (optionally) its assets and bundles them into a
/// downloadable artifact. Bundling and upload are stubbed; the handler
/// still walks every stage so progress and cancellation behave as in
/// production.
#[derive(Debug, Default)]
pub struct ExportHandler {}

impl ExportHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskHandler for ExportHandler {
    fn job_type(&self) -> JobType {
        JobType::Export
    }

    async fn execute(
        &self,
        payload: Value,
        reporter: &ProgressReporter,
    ) -> Result<Value, TaskError> {
        let parsed: ExportPayload = serde_json::from_value(payload)
            .map_err(|e| TaskError::validation("invalid_payload", e.to_string()))?;
        if parsed.document_id.trim().is_empty() {
            return Err(TaskError::validation(
                "missing_document",
                "documentId must not be empty",
            ));
        }
        let format = parsed.format.as_deref().unwrap_or("pdf");
        if !SUPPORTED_FORMATS.contains(&format) {
            return Err(TaskError::validation(
                "unsupported_format",
                format!("cannot export as {format}"),
            ));
        }

        info!(
            document_id = %parsed.document_id,
            format,
            include_assets = parsed.include_assets,
            "executing export job"
        );

        reporter.report("collecting", 20, None).await?;
        if parsed.include_assets {
            reporter
                .report("collecting", 40, Some("including linked assets"))
                .await?;
        }
        reporter.report("bundling", 60, None).await?;
        reporter.report("uploading", 85, None).await?;

        Ok(json!({
            "outputRef": format!("exports/{}.{format}", parsed.document_id),
            "format": format,
            "includesAssets": parsed.include_assets,
        }))
    }
}
