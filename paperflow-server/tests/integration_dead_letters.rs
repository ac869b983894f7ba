use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use paperflow_engine::{Coordinator, EngineConfig, HandlerRegistry, JobStatus};
use paperflow_handlers::register_all_handlers;
use paperflow_server::handlers::{dead_letters, jobs};
use paperflow_server::state::AppState;
use serde_json::json;
use uuid::Uuid;

fn test_state() -> Arc<AppState> {
    let mut handlers = HandlerRegistry::new();
    register_all_handlers(&mut handlers);

    let mut config = EngineConfig::default();
    config.poll_interval = Duration::from_millis(5);
    for policy in config.retry.values_mut() {
        policy.base = Duration::from_millis(1);
        policy.cap = Duration::from_millis(5);
    }

    Arc::new(AppState::new(Coordinator::start(config, handlers)))
}

/// An unsupported target format fails validation on the first attempt and
/// goes straight to the dead-letter store.
async fn submit_doomed(state: &Arc<AppState>, doc: &str) -> paperflow_engine::Job {
    let body: jobs::submit::SubmitBody = serde_json::from_value(json!({
        "type": "convert",
        "payload": {"documentId": doc, "targetFormat": "wav"},
    }))
    .unwrap();
    let (_, axum::Json(job)) =
        jobs::submit::submit(Extension(state.clone()), HeaderMap::new(), axum::Json(body))
            .await
            .unwrap();

    let started = tokio::time::Instant::now();
    loop {
        let current = state.engine.get(job.id).await.unwrap();
        if current.status.is_terminal() {
            assert_eq!(current.status, JobStatus::Failed);
            return current;
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn failed_jobs_appear_in_the_dead_letter_listing() {
    let state = test_state();
    let job = submit_doomed(&state, "doc-1").await;

    let axum::Json(listing) = dead_letters::list::list(Extension(state.clone()), Query(Default::default()))
        .await
        .unwrap();
    assert_eq!(listing["pagination"]["total"], json!(1));
    let record = &listing["items"][0];
    assert_eq!(record["jobId"], json!(job.id));
    assert_eq!(record["attempts"], json!(1));

    let record_id: Uuid = serde_json::from_value(record["id"].clone()).unwrap();
    let axum::Json(fetched) =
        dead_letters::get::get_dead_letter(Extension(state.clone()), Path(record_id))
            .await
            .unwrap();
    assert_eq!(fetched.job_id, job.id);
    assert_eq!(
        fetched.last_error.as_ref().map(|e| e.code.as_str()),
        Some("unsupported_format")
    );

    state.engine.shutdown();
}

#[tokio::test]
async fn reprocess_links_the_replacement_and_runs_once() {
    let state = test_state();
    let job = submit_doomed(&state, "doc-2").await;

    let axum::Json(listing) = dead_letters::list::list(Extension(state.clone()), Query(Default::default()))
        .await
        .unwrap();
    let record_id: Uuid = serde_json::from_value(listing["items"][0]["id"].clone()).unwrap();

    let (status, axum::Json(replacement)) =
        dead_letters::reprocess::reprocess(Extension(state.clone()), Path(record_id))
            .await
            .unwrap();
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(replacement.parent_job_id, Some(job.id));

    // A second reprocess conflicts.
    let err = dead_letters::reprocess::reprocess(Extension(state.clone()), Path(record_id))
        .await
        .unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

    state.engine.shutdown();
}

#[tokio::test]
async fn unknown_record_maps_to_not_found() {
    let state = test_state();

    let err = dead_letters::get::get_dead_letter(Extension(state.clone()), Path(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

    state.engine.shutdown();
}
