//! Analysis lifecycle events and the in-process EventBus
//!
//! Every state change of an analysis or one of its results is announced on
//! the bus. Subscribers (the SSE stream, the watcher) use events only as a
//! hint to re-read the store; the store stays the source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::{AnalysisStatus, ResultKind, ResultStatus};

/// PolyRadar event types
///
/// Serialized with a `type` tag, e.g. `{"type":"ResultUpdated",...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RadarEvent {
    /// A new analysis was stored and its webhooks are about to fire
    AnalysisCreated {
        analysis_id: Uuid,
        event_url: String,
        event_title: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A child result changed status or content
    ResultUpdated {
        analysis_id: Uuid,
        kind: ResultKind,
        /// Set for predictions only
        model_name: Option<String>,
        status: ResultStatus,
        timestamp: DateTime<Utc>,
    },

    /// The analysis itself reached a terminal status
    AnalysisStatusChanged {
        analysis_id: Uuid,
        old_status: AnalysisStatus,
        new_status: AnalysisStatus,
        timestamp: DateTime<Utc>,
    },

    /// One outbound webhook trigger finished (delivered or not)
    WebhookTriggered {
        analysis_id: Uuid,
        target: String,
        delivered: bool,
        timestamp: DateTime<Utc>,
    },
}

impl RadarEvent {
    pub fn analysis_id(&self) -> Uuid {
        match self {
            RadarEvent::AnalysisCreated { analysis_id, .. }
            | RadarEvent::ResultUpdated { analysis_id, .. }
            | RadarEvent::AnalysisStatusChanged { analysis_id, .. }
            | RadarEvent::WebhookTriggered { analysis_id, .. } => *analysis_id,
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            RadarEvent::AnalysisCreated { .. } => "AnalysisCreated",
            RadarEvent::ResultUpdated { .. } => "ResultUpdated",
            RadarEvent::AnalysisStatusChanged { .. } => "AnalysisStatusChanged",
            RadarEvent::WebhookTriggered { .. } => "WebhookTriggered",
        }
    }
}

/// Broadcast bus shared by request handlers and background tasks
///
/// Slow subscribers lose the oldest events (`RecvError::Lagged`) rather
/// than blocking publishers.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<RadarEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RadarEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the number of receivers, or `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: RadarEvent) -> Result<usize, broadcast::error::SendError<RadarEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the case where nobody is listening
    pub fn emit_lossy(&self, event: RadarEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
