//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber from `[logging]`
//! - Write to stdout, a log file, or both
//!
//! # Design Decisions
//! - `RUST_LOG` takes precedence over the configured verbosity
//! - The file layer never emits ANSI escapes

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::LoggingConfig;

/// Errors initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(verbosity: &str) -> String {
    format!("filter_proxy={}", verbosity.trim().to_ascii_lowercase())
}

/// Install the global subscriber. Call once, before the runtime starts
/// accepting connections.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.verbosity)));

    let console = config.console.then(tracing_subscriber::fmt::layer);

    let file = match &config.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_targets_crate() {
        assert_eq!(default_directive("warn"), "filter_proxy=warn");
        assert_eq!(default_directive(" DEBUG "), "filter_proxy=debug");
    }

    #[test]
    fn unwritable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            console: false,
            logfile: Some(dir.path().join("missing/dir/proxy.log").display().to_string()),
            verbosity: "info".into(),
        };
        assert!(matches!(init_logging(&config), Err(LoggingError::LogFile { .. })));
    }
}
