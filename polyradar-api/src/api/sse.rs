//! Server-Sent Events for live analysis views
//!
//! GET /api/analyses/:id/events streams `AnalysisSnapshot` events carrying
//! the full view JSON, then one `AnalysisSettled` event before closing.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use polyradar_common::db::analyses;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::services::AnalysisWatcher;
use crate::AppState;

/// GET /api/analyses/:id/events
pub async fn analysis_event_stream(
    State(state): State<AppState>,
    Path(analysis_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if !analyses::analysis_exists(&state.db, analysis_id).await? {
        return Err(ApiError::NotFound(format!(
            "Analysis not found: {}",
            analysis_id
        )));
    }

    info!(analysis_id = %analysis_id, "SSE client connected");
    let views = AnalysisWatcher::from_state(&state).watch(analysis_id);

    let stream = async_stream::stream! {
        futures::pin_mut!(views);

        while let Some(item) = views.next().await {
            match item {
                Ok(view) => {
                    match serde_json::to_string(&view) {
                        Ok(data) => {
                            debug!(analysis_id = %analysis_id, "SSE: sending snapshot");
                            yield Ok(Event::default().event("AnalysisSnapshot").data(data));
                        }
                        Err(e) => {
                            warn!(analysis_id = %analysis_id, error = %e, "SSE: failed to serialize view");
                            continue;
                        }
                    }

                    if view.progress.settled {
                        let settled = json!({
                            "analysis_id": analysis_id,
                            "status": view.analysis.status,
                        });
                        yield Ok(Event::default().event("AnalysisSettled").data(settled.to_string()));
                    }
                }
                Err(e) => {
                    let error = json!({ "message": e.to_string() });
                    yield Ok(Event::default().event("error").data(error.to_string()));
                }
            }
        }

        info!(analysis_id = %analysis_id, "SSE stream closed");
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}
