//! Timeout sweeper
//!
//! Results whose callback never arrives would keep an analysis `processing`
//! forever. The sweeper times them out after `lifecycle.result_timeout_secs`
//! so that reconciliation can settle the analysis.

use chrono::Utc;
use polyradar_common::db::{results, ResultStatus};
use polyradar_common::events::{EventBus, RadarEvent};
use polyradar_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::services::reconcile;

/// Run one sweep: time out stale results and reconcile their analyses
///
/// Returns the number of results that were timed out.
pub async fn sweep_once(
    db: &SqlitePool,
    event_bus: &EventBus,
    result_timeout: Duration,
) -> Result<usize> {
    let timeout = chrono::Duration::from_std(result_timeout)
        .map_err(|e| Error::Config(format!("Result timeout out of range: {}", e)))?;
    let cutoff = Utc::now() - timeout;
    let message = format!("No response within {} seconds", result_timeout.as_secs());

    let expired = results::expire_stale(db, cutoff, &message).await?;
    if expired.is_empty() {
        return Ok(0);
    }

    let mut touched = BTreeSet::<Uuid>::new();
    for result in &expired {
        info!(
            analysis_id = %result.analysis_id,
            kind = %result.kind,
            model = result.model_name.as_deref().unwrap_or("-"),
            "Result timed out"
        );
        event_bus.emit_lossy(RadarEvent::ResultUpdated {
            analysis_id: result.analysis_id,
            kind: result.kind,
            model_name: result.model_name.clone(),
            status: ResultStatus::Timeout,
            timestamp: Utc::now(),
        });
        touched.insert(result.analysis_id);
    }

    for analysis_id in touched {
        if let Err(e) = reconcile::reconcile(db, event_bus, analysis_id).await {
            error!(analysis_id = %analysis_id, error = %e, "Reconcile after timeout failed");
        }
    }

    Ok(expired.len())
}

/// Spawn the periodic sweeper; it stops when `shutdown` is cancelled
pub fn spawn_sweeper(
    db: SqlitePool,
    event_bus: Arc<EventBus>,
    interval: Duration,
    result_timeout: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            timeout_secs = result_timeout.as_secs(),
            "Timeout sweeper started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Timeout sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match sweep_once(&db, &event_bus, result_timeout).await {
                        Ok(0) => debug!("Sweep found no stale results"),
                        Ok(count) => info!(count, "Sweep timed out stale results"),
                        Err(e) => error!(error = %e, "Sweep failed"),
                    }
                }
            }
        }
    })
}
