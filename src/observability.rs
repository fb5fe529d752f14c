// SPDX-License-Identifier: Apache-2.0

//! Logging and observability helpers.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub use mill_core::Sensitive;

use crate::config::LoggingSettings;

const LOG_FILE_PREFIX: &str = "mill.log";

/// Installs the global subscriber. `RUST_LOG` wins over the configured
/// filter. With a log directory, output goes to daily rolling JSON files;
/// otherwise to stdout.
pub fn init_tracing(settings: &LoggingSettings) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &settings.directory {
        Some(log_dir) => {
            let _ = fs::create_dir_all(log_dir);
            let retention = retention_period(settings.retention_days);
            if let Err(e) = cleanup_old_logs(log_dir, retention) {
                eprintln!("Failed to clean up old logs: {}", e);
            }

            let file_appender: RollingFileAppender =
                tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(file_appender)
                .json()
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_current_span(true)
                .with_span_list(true)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .try_init();
        }
        None if settings.json => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .json()
                .with_current_span(true)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .try_init();
        }
    }

    install_panic_hook();
    tracing::info!(directory = ?settings.directory, "Tracing initialized");
}

fn install_panic_hook() {
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("PANIC: {}", s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("PANIC: {}", s)
        } else {
            "PANIC: unknown cause".to_string()
        };

        tracing::error!(target: "panic", location = %location, message = %msg, "Service panicked");
        previous_hook(panic_info);
    }));
}

fn retention_period(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(24 * 60 * 60))
}

/// Removes `.log` files last modified longer than `retention` ago
pub fn cleanup_old_logs(log_dir: &Path, retention: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX) || n.ends_with(".log"));
        if !is_log {
            continue;
        }

        let age = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > retention) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("Failed to remove old log file {:?}: {}", path, e),
            }
        }
    }
    Ok(removed)
}
