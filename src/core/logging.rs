//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level when set.

use crate::core::config::LoggingConfig;
use crate::core::error::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Build the filter for the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber
pub fn init(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(config));

    let installed = match config.format.as_str() {
        "json" => builder.json().with_current_span(false).try_init(),
        _ => builder.try_init(),
    };

    installed.map_err(|e| Error::config(format!("Failed to install logger: {}", e)))
}
