//! Application State Management
//!
//! This module defines the central AppState shared by every HTTP handler and
//! connection task, and the factory that builds it from configuration.

use std::sync::Arc;

use tracing::info;

use crate::core::config::Config;
use crate::core::credentials::{self, PersistenceStatus};
use crate::core::error::Result;
use crate::relay::registry::ConnectionRegistry;
use crate::relay::rooms::RoomRouter;
use crate::system::metrics::RelayMetrics;

/// Central application state holding all relay services
pub struct AppState {
    /// Application configuration
    pub config: Config,

    /// Live connections and their outbound queues
    pub registry: Arc<ConnectionRegistry>,

    /// Document rooms
    pub rooms: Arc<RoomRouter>,

    /// Prometheus metrics
    pub metrics: Arc<RelayMetrics>,

    /// Result of the persistence credential check
    pub persistence: PersistenceStatus,
}

impl AppState {
    /// Assemble state from already-built services
    pub fn new(config: Config, metrics: Arc<RelayMetrics>, persistence: PersistenceStatus) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.relay.outbound_buffer));
        let rooms = Arc::new(RoomRouter::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            config.relay.reclaim_empty_rooms,
        ));

        Self {
            config,
            registry,
            rooms,
            metrics,
            persistence,
        }
    }
}

/// Build the shared state, failing on malformed persistence credentials
pub fn create_app_state(config: Config) -> Result<Arc<AppState>> {
    let persistence = credentials::check(config.persistence.credentials_json.as_deref())?;
    match &persistence {
        PersistenceStatus::Configured(account) => {
            info!(project_id = %account.project_id, "persistence credentials verified");
        }
        PersistenceStatus::Disabled => info!("persistence not configured"),
    }

    let metrics = Arc::new(RelayMetrics::new()?);
    Ok(Arc::new(AppState::new(config, metrics, persistence)))
}
