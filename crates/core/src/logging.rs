//! Structured logging infrastructure for Keywarden.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.
//! Key material never reaches a log line; components log key ids and
//! master-key fingerprints only. Output goes to stderr so command output
//! on stdout stays machine-readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the logging system with structured output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use keywarden_core::logging;
///
/// logging::init();
/// tracing::info!("Keyring started");
/// ```
pub fn init() {
    init_with_level("info");
}

/// Initialize the logging system with JSON output for production environments.
///
/// This format is suitable for log aggregation systems and structured log analysis.
/// Log level can be configured via the `RUST_LOG` environment variable.
pub fn init_json() {
    init_json_with_level("info");
}

/// Initialize logging from the `[logging]` config section.
///
/// `RUST_LOG` still takes precedence over the configured level.
pub fn init_from_config(config: &LoggingConfig) {
    if config.json {
        init_json_with_level(&config.level);
    } else {
        init_with_level(&config.level);
    }
}

fn init_with_level(default_level: &str) {
    let filter = build_filter(default_level);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init();
}

fn init_json_with_level(default_level: &str) {
    let filter = build_filter(default_level);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init();
}

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
