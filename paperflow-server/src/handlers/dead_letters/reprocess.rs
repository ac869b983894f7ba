use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;
use paperflow_engine::Job;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// POST /dead-letters/{id}/reprocess
/// Create a fresh job from the dead-letter snapshot. Each record can be
/// reprocessed once; the replacement carries `parentJobId`.
pub async fn reprocess(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = state.engine.reprocess(id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}
