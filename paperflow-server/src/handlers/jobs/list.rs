use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Query};
use axum::Json;
use paperflow_engine::JobFilter;
use serde_json::{json, Value};

use crate::handlers::utils::parse_positive_usize;
use crate::{error::ApiError, state::AppState};

/// GET /jobs
/// List jobs, most recent first, with optional status/type filters and
/// pagination.
pub async fn list(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let page = parse_positive_usize(params.get("page"), 1, "page")?;
    let per_page = parse_positive_usize(params.get("perPage"), 20, "perPage")?;
    let offset = (page - 1) * per_page;

    let mut filter = JobFilter::default();
    if let Some(raw) = params.get("status") {
        filter.status = Some(
            raw.parse()
                .map_err(|e: String| ApiError::bad_request(e))?,
        );
    }
    if let Some(raw) = params.get("type") {
        filter.job_type = Some(
            raw.parse()
                .map_err(|e: String| ApiError::bad_request(e))?,
        );
    }

    let (items, total) = state.engine.list(filter, per_page, offset).await?;

    Ok(Json(json!({
        "items": items,
        "pagination": {
            "page": page,
            "perPage": per_page,
            "total": total,
        },
    })))
}
