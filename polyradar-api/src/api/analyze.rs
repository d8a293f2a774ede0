//! Analysis creation and read endpoints
//!
//! POST /api/analyze, GET /api/analyses/:id, GET /api/analyses/:id/events

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use polyradar_common::db::{analyses, users, AnalysisView, NewAnalysis};
use polyradar_common::event_url::parse_event_url;
use polyradar_common::events::RadarEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{json_body, sse};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /api/analyze request
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub event_url: String,
    /// Existing user to charge
    pub user_id: Option<Uuid>,
    /// Wallet to charge; the user is created on first use
    pub wallet_address: Option<String>,
}

/// POST /api/analyze response
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub analysis_id: Uuid,
    pub event_title: Option<String>,
    pub message: String,
}

/// POST /api/analyze
///
/// Stores the analysis with its placeholders, then fires the webhooks in the
/// background. The response does not wait for any webhook.
pub async fn create_analysis(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let request = json_body(payload)?;
    let event = parse_event_url(&request.event_url)?;

    let user_id = resolve_user(&state, &request).await?;
    let model_names = state.config.model_names();

    let analysis = analyses::create_analysis(
        &state.db,
        &NewAnalysis {
            event_url: event.as_str(),
            event_title: event.title.as_deref(),
            user_id,
            model_names: &model_names,
            cost: state.config.billing.analysis_cost,
        },
    )
    .await?;

    info!(
        analysis_id = %analysis.id,
        event_url = %analysis.event_url,
        user_id = ?analysis.user_id,
        "Analysis created"
    );

    state.event_bus.emit_lossy(RadarEvent::AnalysisCreated {
        analysis_id: analysis.id,
        event_url: analysis.event_url.clone(),
        event_title: analysis.event_title.clone(),
        timestamp: Utc::now(),
    });

    // Fire and forget; results arrive through the callback endpoints
    let _fanout = state.dispatcher.dispatch(
        state.db.clone(),
        Arc::clone(&state.event_bus),
        &analysis,
    );

    Ok(Json(AnalyzeResponse {
        success: true,
        analysis_id: analysis.id,
        event_title: analysis.event_title,
        message: format!(
            "Analysis started: {} models, timeline and insights requested",
            model_names.len()
        ),
    }))
}

/// Explicit user id wins over wallet address; neither means anonymous
async fn resolve_user(state: &AppState, request: &AnalyzeRequest) -> ApiResult<Option<Uuid>> {
    if let Some(user_id) = request.user_id {
        let user = users::get_user(&state.db, user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("User not found: {}", user_id)))?;
        return Ok(Some(user.id));
    }

    match request.wallet_address.as_deref().map(str::trim) {
        Some(wallet) if !wallet.is_empty() => {
            let user = users::get_or_create_user(
                &state.db,
                wallet,
                state.config.billing.initial_balance,
            )
            .await?;
            Ok(Some(user.id))
        }
        _ => Ok(None),
    }
}

/// GET /api/analyses/:id
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<Uuid>,
) -> ApiResult<Json<AnalysisView>> {
    analyses::load_view(&state.db, analysis_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Analysis not found: {}", analysis_id)))
}

/// Build analysis routes
pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/api/analyze", post(create_analysis))
        .route("/api/analyses/:id", get(get_analysis))
        .route("/api/analyses/:id/events", get(sse::analysis_event_stream))
}
