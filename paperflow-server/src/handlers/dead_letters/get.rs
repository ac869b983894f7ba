use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::Json;
use paperflow_engine::DeadLetterRecord;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// GET /dead-letters/{id}
pub async fn get_dead_letter(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeadLetterRecord>, ApiError> {
    let record = state.engine.dead_letter(id).await?;
    Ok(Json(record))
}
