//! Configuration management for the document relay
//!
//! Defaults, then an optional TOML file, then environment overrides, then
//! validation. Every field has a default so an empty environment still serves.

use crate::core::error::{Error, Result};
use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "doc-relay.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Relay tuning
    pub relay: RelayConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// External persistence collaborator
    pub persistence: PersistenceConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: IpAddr,

    /// Listen port
    pub port: u16,

    /// Only origin allowed for cross-origin requests
    pub frontend_origin: String,
}

/// Relay tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Quiet period before a pending delta is broadcast
    pub debounce_window_ms: u64,

    /// Outbound frames buffered per connection before deliveries are dropped
    pub outbound_buffer: usize,

    /// Delete a room once its last member leaves
    pub reclaim_empty_rooms: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

/// Persistence collaborator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Service-account JSON; unset means persistence is not configured
    pub credentials_json: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 5000,
            frontend_origin: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 500,
            outbound_buffer: 256,
            reclaim_empty_rooms: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ServerConfig {
    /// Socket address to bind
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl RelayConfig {
    /// Debounce window as a duration
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }
}

impl Config {
    /// Load configuration from the default file (if present) and the process environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from an explicit file, falling back to the default file
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Config::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment-style overrides from the given lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| Error::config(format!("Invalid PORT {:?}: {}", port, e)))?;
        }

        if let Some(origin) = lookup("FRONTEND_URL") {
            self.server.frontend_origin = origin;
        }

        if let Some(host) = lookup("RELAY_HOST") {
            self.server.host = host
                .parse()
                .map_err(|e| Error::config(format!("Invalid RELAY_HOST {:?}: {}", host, e)))?;
        }

        if let Some(window) = lookup("RELAY_DEBOUNCE_MS") {
            self.relay.debounce_window_ms = window.parse().map_err(|e| {
                Error::config(format!("Invalid RELAY_DEBOUNCE_MS {:?}: {}", window, e))
            })?;
        }

        if let Some(level) = lookup("RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("RELAY_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Some(credentials) = lookup("FIREBASE_ADMIN_SDK_JSON") {
            self.persistence.credentials_json = Some(credentials);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.relay.debounce_window_ms == 0 {
            return Err(Error::config("Debounce window must be greater than zero"));
        }

        if self.relay.outbound_buffer == 0 {
            return Err(Error::config("Outbound buffer must hold at least one frame"));
        }

        if HeaderValue::from_str(&self.server.frontend_origin).is_err() {
            return Err(Error::config(format!(
                "Invalid frontend origin: {}",
                self.server.frontend_origin
            )));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(Error::config(format!("Invalid log level: {}", other))),
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => return Err(Error::config(format!("Invalid log format: {}", other))),
        }

        Ok(())
    }
}
