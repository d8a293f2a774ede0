//! Analysis status reconciliation
//!
//! Once every gating result (predictions, timeline, insights) is terminal,
//! the analysis becomes `completed` if any of them succeeded and `failed`
//! otherwise. Failed analyses are refunded once.

use chrono::Utc;
use polyradar_common::db::{analyses, derive_analysis_status, users, AnalysisStatus};
use polyradar_common::events::{EventBus, RadarEvent};
use polyradar_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ALL_RESULTS_FAILED: &str = "All analysis results failed";

/// Apply the derived status to a `processing` analysis, if one is due
///
/// Returns the status the analysis moved to, or `None` when nothing changed.
pub async fn reconcile(
    db: &SqlitePool,
    event_bus: &EventBus,
    analysis_id: Uuid,
) -> Result<Option<AnalysisStatus>> {
    let view = analyses::load_view(db, analysis_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Analysis not found: {}", analysis_id)))?;

    if view.analysis.status.is_terminal() {
        return Ok(None);
    }

    let Some(status) = derive_analysis_status(&view.gating_statuses()) else {
        return Ok(None);
    };

    let error_message = (status == AnalysisStatus::Failed).then_some(ALL_RESULTS_FAILED);

    match apply_transition(db, event_bus, analysis_id, status, error_message).await {
        Ok(true) => Ok(Some(status)),
        Ok(false) => Ok(None),
        // Another writer settled the analysis first
        Err(Error::InvalidTransition { from, .. }) => {
            debug!(analysis_id = %analysis_id, current = %from, "Analysis already settled");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Move an analysis to a terminal status, announce it and refund on failure
///
/// Returns false when the analysis already held `status`.
pub async fn apply_transition(
    db: &SqlitePool,
    event_bus: &EventBus,
    analysis_id: Uuid,
    status: AnalysisStatus,
    error_message: Option<&str>,
) -> Result<bool> {
    let changed = analyses::transition_status(db, analysis_id, status, error_message).await?;
    if !changed {
        return Ok(false);
    }

    info!(analysis_id = %analysis_id, status = %status, "Analysis settled");

    event_bus.emit_lossy(RadarEvent::AnalysisStatusChanged {
        analysis_id,
        old_status: AnalysisStatus::Processing,
        new_status: status,
        timestamp: Utc::now(),
    });

    if status == AnalysisStatus::Failed {
        if let Err(e) = users::refund_analysis(db, analysis_id).await {
            warn!(analysis_id = %analysis_id, error = %e, "Refund failed");
        }
    }

    Ok(true)
}
