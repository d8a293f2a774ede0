//! HTTP API handlers for polyradar-api

pub mod analyze;
pub mod auth;
pub mod health;
pub mod sse;
pub mod users;
pub mod webhooks;

pub use analyze::analysis_routes;
pub use auth::webhook_secret_middleware;
pub use health::health_routes;
pub use sse::analysis_event_stream;
pub use users::user_routes;
pub use webhooks::webhook_routes;

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::{ApiError, ApiResult};

/// Unwrap a JSON body, turning extractor rejections into 400 responses
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}
