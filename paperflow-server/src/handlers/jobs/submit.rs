use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use paperflow_engine::{Job, JobType, SubmitRequest};
use serde::Deserialize;
use serde_json::Value;

use crate::handlers::utils::requested_by;
use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// POST /jobs
/// Enqueue a job. Replays of the same idempotency key and payload return
/// the original job.
pub async fn submit(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SubmitBody>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job_type: JobType = body
        .job_type
        .parse()
        .map_err(|e: String| ApiError::bad_request(e))?;

    let job = state
        .engine
        .submit(SubmitRequest {
            job_type,
            payload: body.payload,
            idempotency_key: body.idempotency_key,
            requested_by: requested_by(&headers),
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(job)))
}
