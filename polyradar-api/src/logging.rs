//! Log filter setup
//!
//! The subscriber is installed before the config file is read, so the
//! filter starts at `info` and is swapped for the configured level once the
//! config is known. An explicit `RUST_LOG` always wins.

use tracing::warn;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Default directives for the PolyRadar crates at `level`
pub fn log_filter(level: &str) -> String {
    format!(
        "polyradar_api={level},polyradar_common={level},tower_http=info",
        level = level
    )
}

/// Handle for applying the configured level after startup
pub struct LogLevelControl {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogLevelControl {
    /// Switch to the configured level unless `RUST_LOG` chose the filter
    ///
    /// Returns true when the filter was replaced.
    pub fn apply_configured(&self, level: &str) -> bool {
        if self.from_env {
            return false;
        }
        match self.handle.reload(EnvFilter::new(log_filter(level))) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, level, "Failed to apply configured log level");
                false
            }
        }
    }
}

/// Reloadable filter layer: `rust_log` directives if given, `info` otherwise
pub fn filter_layer(rust_log: Option<&str>) -> (reload::Layer<EnvFilter, Registry>, LogLevelControl) {
    let from_env = rust_log.map_or(false, |directives| !directives.trim().is_empty());
    let filter = match rust_log {
        Some(directives) if from_env => EnvFilter::new(directives),
        _ => EnvFilter::new(log_filter("info")),
    };
    let (layer, handle) = reload::Layer::new(filter);

    (layer, LogLevelControl { handle, from_env })
}
