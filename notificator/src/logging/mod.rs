//! Logging setup.
//!
//! Console output (text or JSON) with local timezone timestamps, plus an
//! optional daily rolling log file.

mod panic_hook;

pub use panic_hook::install as install_panic_hook;

use std::path::PathBuf;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Base name of the rolling log file.
pub(crate) const LOG_FILE_NAME: &str = "notificator.log";

/// Default level of the crate's own events.
const DEFAULT_LEVEL: &str = "info";

/// `[log]` section of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level (`debug`) or a full filter directive (`notificator=debug,reqwest=warn`).
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_level")]
    pub level: String,
    /// Directory of the daily rolling log file. Console only when unset.
    pub dir: Option<PathBuf>,
    /// Emit JSON lines on the console.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    DEFAULT_LEVEL.to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
            json: false,
        }
    }
}

impl LogConfig {
    /// Filter directive derived from `level`.
    pub fn directive(&self) -> String {
        if self.level.contains('=') || self.level.contains(',') {
            self.level.clone()
        } else {
            format!("notificator={},tower_http=info,reqwest=warn", self.level)
        }
    }
}

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the lifetime of the process, dropping it
/// flushes the file writer.
pub fn init_logging(config: &LogConfig) -> crate::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directive()))
        .map_err(|e| crate::Error::config(format!("Invalid log level '{}': {e}", config.level)))?;

    let console = if config.json {
        fmt::layer().json().with_timer(LocalTimer).boxed()
    } else {
        fmt::layer().with_ansi(true).with_timer(LocalTimer).boxed()
    };

    let (file, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}
