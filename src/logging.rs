//! Tracing subscriber setup.
//!
//! Human-readable output goes to stderr; a JSON copy of every event is
//! appended to a daily file under `.onboard/logs/`.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "ONBOARD_LOG";
const LOG_FILE_PREFIX: &str = "onboard.log";

/// Install the global subscriber. Keep the returned guard alive for the
/// whole process or buffered file output is lost.
///
/// `ONBOARD_LOG` takes the usual `EnvFilter` syntax and wins over `verbose`.
pub fn init(verbose: bool, log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter(verbose)),
        )
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_filter(filter(true)),
        );

    if subscriber.try_init().is_err() {
        tracing::debug!("Global tracing subscriber already initialized");
    }

    Ok(guard)
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "onboard=debug" } else { "onboard=info" })
    })
}
