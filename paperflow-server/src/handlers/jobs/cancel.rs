use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::Json;
use paperflow_engine::Job;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// POST /jobs/{id}/cancel
/// Pending jobs cancel immediately; running jobs cancel cooperatively at
/// the next stage boundary; canceling a terminal job returns it unchanged.
pub async fn cancel(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let job = state.engine.cancel(id).await?;
    Ok(Json(job))
}
