use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::Json;
use paperflow_engine::Job;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// GET /jobs/{id}
pub async fn get_job(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let job = state.engine.get(id).await?;
    Ok(Json(job))
}
