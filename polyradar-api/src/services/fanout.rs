//! Outbound webhook fan-out
//!
//! Each new analysis triggers one POST per configured model plus the
//! timeline and insights scenarios. Triggers run concurrently in a spawned
//! task; failures are logged and never retried. Results come back later
//! through the callback endpoints.

use chrono::Utc;
use futures::future::join_all;
use polyradar_common::config::TomlConfig;
use polyradar_common::db::{results, Analysis, ResultKind, ResultStatus};
use polyradar_common::events::{EventBus, RadarEvent};
use polyradar_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::auth::WEBHOOK_SECRET_HEADER;

const USER_AGENT: &str = concat!("polyradar/", env!("CARGO_PKG_VERSION"));

/// One external automation endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub kind: ResultKind,
    /// Set for prediction targets
    pub model_name: Option<String>,
    pub url: String,
}

impl WebhookTarget {
    /// Short name used in logs and events, e.g. `prediction:model1`
    pub fn label(&self) -> String {
        match &self.model_name {
            Some(model) => format!("{}:{}", self.kind, model),
            None => self.kind.to_string(),
        }
    }

    /// Path of the endpoint the scenario calls back
    fn callback_path(&self) -> String {
        match (&self.model_name, self.kind) {
            (Some(model), _) => format!("/api/webhooks/predictions/{}", model),
            (None, kind) => format!("/api/webhooks/{}", kind),
        }
    }
}

/// Body POSTed to every target
#[derive(Debug, Clone, Serialize)]
pub struct TriggerPayload {
    pub analysis_id: Uuid,
    pub event_url: String,
    pub callback_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_data: Option<EventData>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventData {
    pub title: String,
}

/// Outcome of one trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerReport {
    pub target: String,
    pub delivered: bool,
    /// HTTP status, when a response arrived
    pub status: Option<u16>,
    pub error: Option<String>,
}

pub struct WebhookDispatcher {
    http_client: reqwest::Client,
    targets: Vec<WebhookTarget>,
    public_base_url: String,
    shared_secret: Option<String>,
}

impl WebhookDispatcher {
    pub fn from_config(config: &TomlConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("HTTP client setup failed: {}", e)))?;

        let mut targets: Vec<WebhookTarget> = config
            .webhooks
            .models
            .iter()
            .map(|model| WebhookTarget {
                kind: ResultKind::Prediction,
                model_name: Some(model.name.clone()),
                url: model.url.clone(),
            })
            .collect();
        targets.push(WebhookTarget {
            kind: ResultKind::Timeline,
            model_name: None,
            url: config.webhooks.timeline_url.clone(),
        });
        targets.push(WebhookTarget {
            kind: ResultKind::Insights,
            model_name: None,
            url: config.webhooks.insights_url.clone(),
        });

        Ok(Self {
            http_client,
            targets,
            public_base_url: config.server.public_base_url.trim_end_matches('/').to_string(),
            shared_secret: config.webhooks.shared_secret.clone(),
        })
    }

    pub fn targets(&self) -> &[WebhookTarget] {
        &self.targets
    }

    pub fn callback_url(&self, target: &WebhookTarget) -> String {
        format!("{}{}", self.public_base_url, target.callback_path())
    }

    /// Fire every trigger for `analysis` in the background
    ///
    /// The returned handle resolves to one report per target once all
    /// requests finished; callers are free to drop it.
    pub fn dispatch(
        self: &Arc<Self>,
        db: SqlitePool,
        event_bus: Arc<EventBus>,
        analysis: &Analysis,
    ) -> JoinHandle<Vec<TriggerReport>> {
        let dispatcher = Arc::clone(self);
        let analysis = analysis.clone();

        tokio::spawn(async move {
            let triggers = dispatcher
                .targets
                .iter()
                .map(|target| dispatcher.trigger(&db, &event_bus, &analysis, target));
            let reports = join_all(triggers).await;

            let delivered = reports.iter().filter(|r| r.delivered).count();
            info!(
                analysis_id = %analysis.id,
                delivered,
                total = reports.len(),
                "Webhook fan-out finished"
            );

            reports
        })
    }

    async fn trigger(
        &self,
        db: &SqlitePool,
        event_bus: &EventBus,
        analysis: &Analysis,
        target: &WebhookTarget,
    ) -> TriggerReport {
        let payload = TriggerPayload {
            analysis_id: analysis.id,
            event_url: analysis.event_url.clone(),
            callback_url: self.callback_url(target),
            event_data: analysis
                .event_title
                .clone()
                .map(|title| EventData { title }),
        };
        let label = target.label();

        debug!(analysis_id = %analysis.id, target = %label, url = %target.url, "Triggering webhook");

        let mut request = self.http_client.post(&target.url).json(&payload);
        if let Some(secret) = &self.shared_secret {
            request = request.header(WEBHOOK_SECRET_HEADER, secret);
        }

        let report = match request.send().await {
            Ok(response) if response.status().is_success() => TriggerReport {
                target: label.clone(),
                delivered: true,
                status: Some(response.status().as_u16()),
                error: None,
            },
            Ok(response) => {
                let status = response.status();
                warn!(
                    analysis_id = %analysis.id,
                    target = %label,
                    status = %status,
                    "Webhook rejected trigger"
                );
                TriggerReport {
                    target: label.clone(),
                    delivered: false,
                    status: Some(status.as_u16()),
                    error: Some(format!("HTTP {}", status)),
                }
            }
            Err(e) => {
                warn!(analysis_id = %analysis.id, target = %label, error = %e, "Webhook trigger failed");
                TriggerReport {
                    target: label.clone(),
                    delivered: false,
                    status: None,
                    error: Some(e.to_string()),
                }
            }
        };

        if report.delivered {
            let moved = results::mark_processing(
                db,
                analysis.id,
                target.kind,
                target.model_name.as_deref(),
            )
            .await;
            match moved {
                Ok(true) => event_bus.emit_lossy(RadarEvent::ResultUpdated {
                    analysis_id: analysis.id,
                    kind: target.kind,
                    model_name: target.model_name.clone(),
                    status: ResultStatus::Processing,
                    timestamp: Utc::now(),
                }),
                Ok(false) => {}
                Err(e) => {
                    warn!(analysis_id = %analysis.id, target = %label, error = %e, "Failed to mark result processing")
                }
            }
        }

        event_bus.emit_lossy(RadarEvent::WebhookTriggered {
            analysis_id: analysis.id,
            target: label,
            delivered: report.delivered,
            timestamp: Utc::now(),
        });

        report
    }
}
