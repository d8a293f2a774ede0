//! polyradar-api library interface
//!
//! HTTP service for PolyRadar analyses: creation and webhook fan-out,
//! callback ingestion, reconciliation and live views over SSE.

pub mod api;
pub mod error;
pub mod logging;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use polyradar_common::config::TomlConfig;
use polyradar_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::fanout::WebhookDispatcher;

/// Application state shared across handlers and background tasks
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Change notifications for SSE subscribers and watchers
    pub event_bus: Arc<EventBus>,
    pub config: Arc<TomlConfig>,
    /// Outbound webhook triggers
    pub dispatcher: Arc<WebhookDispatcher>,
    /// Service startup timestamp
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: TomlConfig) -> polyradar_common::Result<Self> {
        let event_bus = Arc::new(EventBus::new(config.lifecycle.event_bus_capacity));
        let dispatcher = Arc::new(WebhookDispatcher::from_config(&config)?);

        Ok(Self {
            db,
            event_bus,
            config: Arc::new(config),
            dispatcher,
            startup_time: Utc::now(),
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::analysis_routes())
        .merge(api::user_routes())
        .merge(api::webhook_routes(state.clone()))
        .merge(api::health_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
