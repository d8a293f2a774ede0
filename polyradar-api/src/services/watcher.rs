//! Live analysis views: event-bus push with a polling fallback
//!
//! A watcher re-reads the joined view whenever the bus announces a change
//! for its analysis, whenever its subscription lagged, and on every poll
//! tick. Identical consecutive views are dropped. The stream ends after the
//! first settled view.

use futures::Stream;
use polyradar_common::db::{analyses, AnalysisView};
use polyradar_common::events::EventBus;
use polyradar_common::{Error, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::AppState;

#[derive(Clone)]
pub struct AnalysisWatcher {
    db: SqlitePool,
    event_bus: Arc<EventBus>,
    poll_interval: Duration,
}

impl AnalysisWatcher {
    pub fn new(db: SqlitePool, event_bus: Arc<EventBus>, poll_interval: Duration) -> Self {
        Self {
            db,
            event_bus,
            poll_interval,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.db.clone(),
            Arc::clone(&state.event_bus),
            state.config.poll_interval(),
        )
    }

    /// Stream views of one analysis until it settles
    ///
    /// The first item is the current view. A missing analysis or a database
    /// error is yielded as the final `Err` item.
    pub fn watch(&self, analysis_id: Uuid) -> impl Stream<Item = Result<AnalysisView>> + Send + 'static {
        let db = self.db.clone();
        let poll_interval = self.poll_interval;
        // Subscribe before the first read so no change slips in between
        let mut rx = self.event_bus.subscribe();

        async_stream::stream! {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            let mut last: Option<AnalysisView> = None;
            let mut push_open = true;
            let mut refresh = true;

            loop {
                if refresh {
                    match analyses::load_view(&db, analysis_id).await {
                        Ok(Some(view)) => {
                            let settled = view.progress.settled;
                            if last.as_ref() != Some(&view) {
                                last = Some(view.clone());
                                yield Ok(view);
                            }
                            if settled {
                                debug!(analysis_id = %analysis_id, "Analysis settled, watcher done");
                                break;
                            }
                        }
                        Ok(None) => {
                            yield Err(Error::NotFound(format!("Analysis not found: {}", analysis_id)));
                            break;
                        }
                        Err(e) => {
                            warn!(analysis_id = %analysis_id, error = %e, "Watcher read failed");
                            yield Err(e);
                            break;
                        }
                    }
                }

                refresh = tokio::select! {
                    received = rx.recv(), if push_open => match received {
                        Ok(event) => event.analysis_id() == analysis_id,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(analysis_id = %analysis_id, skipped, "Watcher lagged, re-reading");
                            true
                        }
                        Err(RecvError::Closed) => {
                            push_open = false;
                            false
                        }
                    },
                    _ = ticker.tick() => true,
                };
            }
        }
    }
}
