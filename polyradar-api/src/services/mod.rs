//! Background services: fan-out, reconciliation, timeouts and watchers

pub mod fanout;
pub mod reconcile;
pub mod sweeper;
pub mod watcher;

pub use fanout::{TriggerReport, WebhookDispatcher, WebhookTarget};
pub use sweeper::spawn_sweeper;
pub use watcher::AnalysisWatcher;
