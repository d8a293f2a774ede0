//! Webhook callback endpoints
//!
//! Automation scenarios POST their results here. Each payload is validated,
//! upserted (forward-only) into its table with the full body kept as
//! `raw_response`, announced on the event bus and then reconciled into the
//! analysis status.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    middleware,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use polyradar_common::config::is_valid_model_name;
use polyradar_common::db::{
    analyses, results, Analysis, AnalysisStatus, Consensus, Insights, InsightsUpdate,
    ModelPrediction, Opportunity, Outcome, PredictionUpdate, ResultKind, ResultStatus, Risk,
    Sources, Timeline, TimelineEvent, TimelineUpdate, Trend,
};
use polyradar_common::events::RadarEvent;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use super::{auth, json_body};
use crate::error::{ApiError, ApiResult};
use crate::services::reconcile;
use crate::AppState;

const DEFAULT_FAILURE_MESSAGE: &str = "Analysis failed";

/// Body of every successful callback response
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> WebhookResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictionCallback {
    pub analysis_id: Uuid,
    pub model_name: Option<String>,
    pub status: ResultStatus,
    pub outcome: Option<Outcome>,
    pub confidence_percent: Option<f64>,
    pub reasoning: Option<String>,
    pub sources_count: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineCallback {
    pub analysis_id: Uuid,
    pub status: ResultStatus,
    pub events: Option<Vec<TimelineEvent>>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InsightsCallback {
    pub analysis_id: Uuid,
    pub status: ResultStatus,
    pub consensus: Option<Consensus>,
    pub risks: Option<Vec<Risk>>,
    pub opportunities: Option<Vec<Opportunity>>,
    pub trends: Option<Vec<Trend>>,
    pub content: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SourcesCallback {
    pub analysis_id: Uuid,
    pub links: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisResultCallback {
    pub analysis_id: Uuid,
    #[serde(default = "default_result_status")]
    pub status: AnalysisStatus,
    pub error_message: Option<String>,
}

fn default_result_status() -> AnalysisStatus {
    AnalysisStatus::Completed
}

#[derive(Debug, Deserialize)]
pub struct AnalysisErrorCallback {
    pub analysis_id: Uuid,
    pub error_message: Option<String>,
}

/// Parse the typed callback while keeping the raw body
fn decode<T: DeserializeOwned>(
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(T, Value)> {
    let raw = json_body(payload)?;
    let callback = serde_json::from_value(raw.clone())
        .map_err(|e| ApiError::BadRequest(format!("Invalid payload: {}", e)))?;
    Ok((callback, raw))
}

fn check_percent(field: &str, value: Option<f64>) -> ApiResult<()> {
    match value {
        Some(v) if !(0.0..=100.0).contains(&v) => Err(ApiError::BadRequest(format!(
            "{} must be between 0 and 100, got {}",
            field, v
        ))),
        _ => Ok(()),
    }
}

/// Announce a result write and settle the analysis if it is due
///
/// Reconcile failures are logged; the callback itself already succeeded.
async fn after_result_write(
    state: &AppState,
    analysis_id: Uuid,
    kind: ResultKind,
    model_name: Option<String>,
    status: ResultStatus,
) {
    state.event_bus.emit_lossy(RadarEvent::ResultUpdated {
        analysis_id,
        kind,
        model_name,
        status,
        timestamp: Utc::now(),
    });

    if let Err(e) = reconcile::reconcile(&state.db, &state.event_bus, analysis_id).await {
        error!(analysis_id = %analysis_id, error = %e, "Reconcile after callback failed");
    }
}

/// POST /api/webhooks/predictions/:model
pub async fn receive_prediction(
    State(state): State<AppState>,
    Path(model): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<WebhookResponse<ModelPrediction>>> {
    let (callback, raw): (PredictionCallback, Value) = decode(payload)?;

    if let Some(named) = callback.model_name.as_deref() {
        if named != model {
            return Err(ApiError::BadRequest(format!(
                "model_name '{}' does not match path model '{}'",
                named, model
            )));
        }
    }
    if !is_valid_model_name(&model) || !state.config.model_names().contains(&model) {
        return Err(ApiError::BadRequest(format!("Unknown model '{}'", model)));
    }
    check_percent("confidence_percent", callback.confidence_percent)?;
    if matches!(callback.sources_count, Some(n) if n < 0) {
        return Err(ApiError::BadRequest(
            "sources_count must not be negative".to_string(),
        ));
    }

    let update = PredictionUpdate {
        outcome: callback.outcome,
        confidence_percent: callback.confidence_percent,
        reasoning: callback.reasoning,
        sources_count: callback.sources_count,
        error: callback.error,
        raw_response: Some(raw),
    };

    let prediction = results::upsert_prediction(
        &state.db,
        callback.analysis_id,
        &model,
        callback.status,
        &update,
    )
    .await?;

    info!(
        analysis_id = %prediction.analysis_id,
        model = %prediction.model_name,
        status = %prediction.status,
        "Prediction received"
    );

    after_result_write(
        &state,
        prediction.analysis_id,
        ResultKind::Prediction,
        Some(prediction.model_name.clone()),
        prediction.status,
    )
    .await;

    Ok(WebhookResponse::ok(prediction))
}

/// POST /api/webhooks/timeline
pub async fn receive_timeline(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<WebhookResponse<Timeline>>> {
    let (callback, raw): (TimelineCallback, Value) = decode(payload)?;

    let update = TimelineUpdate {
        events: callback.events,
        error: callback.error,
        raw_response: Some(raw),
    };

    let timeline =
        results::upsert_timeline(&state.db, callback.analysis_id, callback.status, &update).await?;

    info!(
        analysis_id = %timeline.analysis_id,
        status = %timeline.status,
        events = timeline.events.len(),
        "Timeline received"
    );

    after_result_write(
        &state,
        timeline.analysis_id,
        ResultKind::Timeline,
        None,
        timeline.status,
    )
    .await;

    Ok(WebhookResponse::ok(timeline))
}

/// POST /api/webhooks/insights
pub async fn receive_insights(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<WebhookResponse<Insights>>> {
    let (callback, raw): (InsightsCallback, Value) = decode(payload)?;

    check_percent(
        "consensus.confidence_percent",
        callback.consensus.as_ref().map(|c| c.confidence_percent),
    )?;

    let update = InsightsUpdate {
        consensus: callback.consensus,
        risks: callback.risks,
        opportunities: callback.opportunities,
        trends: callback.trends,
        content: callback.content,
        error: callback.error,
        raw_response: Some(raw),
    };

    let insights =
        results::upsert_insights(&state.db, callback.analysis_id, callback.status, &update).await?;

    info!(
        analysis_id = %insights.analysis_id,
        status = %insights.status,
        "Insights received"
    );

    after_result_write(
        &state,
        insights.analysis_id,
        ResultKind::Insights,
        None,
        insights.status,
    )
    .await;

    Ok(WebhookResponse::ok(insights))
}

/// POST /api/webhooks/sources
pub async fn receive_sources(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<WebhookResponse<Sources>>> {
    let (callback, raw): (SourcesCallback, Value) = decode(payload)?;

    for link in &callback.links {
        let valid = Url::parse(link)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !valid {
            return Err(ApiError::BadRequest(format!(
                "links must be http(s) URLs, got '{}'",
                link
            )));
        }
    }

    let sources =
        results::upsert_sources(&state.db, callback.analysis_id, &callback.links, Some(&raw))
            .await?;

    info!(
        analysis_id = %sources.analysis_id,
        links = sources.links.len(),
        "Sources received"
    );

    // Sources never gate completion, but watchers still want the update
    after_result_write(
        &state,
        sources.analysis_id,
        ResultKind::Sources,
        None,
        sources.status,
    )
    .await;

    Ok(WebhookResponse::ok(sources))
}

/// POST /api/webhooks/analysis-result
pub async fn receive_analysis_result(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<WebhookResponse<Analysis>>> {
    let (callback, _raw): (AnalysisResultCallback, Value) = decode(payload)?;

    if !callback.status.is_terminal() {
        return Err(ApiError::BadRequest(
            "status must be 'completed' or 'failed'".to_string(),
        ));
    }

    reconcile::apply_transition(
        &state.db,
        &state.event_bus,
        callback.analysis_id,
        callback.status,
        callback.error_message.as_deref(),
    )
    .await?;

    let analysis = analyses::get_analysis(&state.db, callback.analysis_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Analysis not found: {}", callback.analysis_id)))?;

    Ok(WebhookResponse::ok(analysis))
}

/// POST /api/webhooks/analysis-error
///
/// Fails the analysis and every result still waiting for a callback.
pub async fn receive_analysis_error(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<WebhookResponse<Analysis>>> {
    let (callback, _raw): (AnalysisErrorCallback, Value) = decode(payload)?;

    let message = callback
        .error_message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_FAILURE_MESSAGE)
        .to_string();

    reconcile::apply_transition(
        &state.db,
        &state.event_bus,
        callback.analysis_id,
        AnalysisStatus::Failed,
        Some(&message),
    )
    .await?;

    let failed = results::fail_unfinished(&state.db, callback.analysis_id, &message).await?;
    for result in failed {
        state.event_bus.emit_lossy(RadarEvent::ResultUpdated {
            analysis_id: result.analysis_id,
            kind: result.kind,
            model_name: result.model_name,
            status: ResultStatus::Error,
            timestamp: Utc::now(),
        });
    }

    info!(analysis_id = %callback.analysis_id, error = %message, "Analysis failed by callback");

    let analysis = analyses::get_analysis(&state.db, callback.analysis_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Analysis not found: {}", callback.analysis_id)))?;

    Ok(WebhookResponse::ok(analysis))
}

/// Build webhook routes, guarded by the shared secret
pub fn webhook_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/webhooks/predictions/:model", post(receive_prediction))
        .route("/api/webhooks/timeline", post(receive_timeline))
        .route("/api/webhooks/insights", post(receive_insights))
        .route("/api/webhooks/sources", post(receive_sources))
        .route("/api/webhooks/analysis-result", post(receive_analysis_result))
        .route("/api/webhooks/analysis-error", post(receive_analysis_error))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::webhook_secret_middleware,
        ))
}
