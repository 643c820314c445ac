//! Process-wide `tracing` setup: a formatted stderr layer plus an optional
//! SQLite layer that keeps warnings and errors queryable after the fact.

mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Target of the structured record emitted once per finished turn.
pub const TURN_LOG_TARGET: &str = "sqlpilot::turn_log";

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives such as `"info,sqlpilot_llm=debug"`.
    /// `RUST_LOG` wins when set.
    pub filter: String,
    /// One JSON object per line instead of human-readable output.
    pub json: bool,
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            json: true,
            log_to_sqlite: false,
            log_db_path: PathBuf::from("./data/logs.db"),
        }
    }
}

impl TelemetryConfig {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Returned by [`init_telemetry`]; gives access to persisted log rows.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

/// Install the global subscriber. Later calls leave the first one in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let stderr = if config.json {
        fmt::layer()
            .json()
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let log_sink = config
        .log_to_sqlite
        .then(|| SqliteLogSink::new(&config.log_db_path))
        .and_then(|opened| match opened {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                // The subscriber is not up yet, so this cannot go through tracing.
                eprintln!("log database {} unavailable: {e}", config.log_db_path.display());
                None
            }
        });

    let _ = tracing_subscriber::registry()
        .with(stderr.with_filter(config.env_filter()))
        .with(log_sink.clone().map(SqliteLogLayer::new))
        .try_init();

    TelemetryGuard { log_sink }
}
