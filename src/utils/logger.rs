//! Logging setup
//!
//! Logs go to stderr so `stream` output on stdout stays machine-readable.
//! `RUST_LOG`, when set, replaces the configured level.

use anyhow::{anyhow, Result};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown log level {0:?} (expected trace, debug, info, warn or error)")]
pub struct UnknownLevel(String);

/// Parse a configured level. `warning` is accepted for `warn`.
pub fn parse_level(s: &str) -> Result<Level, UnknownLevel> {
    match s.trim().to_ascii_lowercase().as_str() {
        "warning" => Ok(Level::WARN),
        level @ ("trace" | "debug" | "info" | "warn" | "error") => {
            level.parse().map_err(|_| UnknownLevel(s.to_string()))
        }
        _ => Err(UnknownLevel(s.to_string())),
    }
}

fn filter_directive(level: Level) -> String {
    format!("{}={}", env!("CARGO_CRATE_NAME"), level)
}

/// Install the global subscriber
pub fn init_logger(level: Level) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))
}
