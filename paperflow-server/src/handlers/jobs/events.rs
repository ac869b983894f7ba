use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use paperflow_engine::JobEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// GET /jobs/{id}/events
/// Server-sent progress stream: the retained event history first, then
/// live events until the job reaches a terminal state.
pub async fn events(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (snapshot, rx) = state.engine.subscribe(id).await?;

    // A job that already finished gets its history and a closed stream.
    let already_done = snapshot.iter().any(is_terminal_event);
    let replay = stream::iter(snapshot.into_iter().map(|e| sse_event(&e)));

    let live = if already_done {
        stream::empty().boxed()
    } else {
        stream::unfold((rx, false), |(mut rx, done)| async move {
            if done {
                return None;
            }
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let terminal = is_terminal_event(&event);
                        return Some((sse_event(&event), (rx, terminal)));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sse subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    };

    let stream = replay.chain(live).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &JobEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(event.seq.to_string())
        .event("progress")
        .data(data)
}

fn is_terminal_event(event: &JobEvent) -> bool {
    event
        .metadata
        .as_ref()
        .and_then(|m| m.get("status"))
        .and_then(|s| s.as_str())
        .is_some_and(|s| matches!(s, "succeeded" | "failed" | "canceled"))
}
