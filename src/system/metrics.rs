//! Metrics collection for the relay
//!
//! Counters are registered on a per-instance Prometheus registry so that
//! several relays (and tests) can live in one process. Updates on the hot
//! path are plain atomic increments.

use crate::core::error::Result;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Connection lifecycle metrics
pub struct ConnectionMetrics {
    /// Total number of connections accepted
    pub opened: IntCounter,
    /// Total number of connections closed
    pub closed: IntCounter,
    /// Number of currently open connections
    pub active: IntGauge,
}

/// Room and delta flow metrics
pub struct RelayFlowMetrics {
    /// Successful joins
    pub joins: IntCounter,
    /// Rejected joins
    pub join_failures: IntCounter,
    /// Deltas accepted into a debouncer
    pub deltas_received: IntCounter,
    /// Pending deltas overwritten by a newer one in the same burst
    pub deltas_coalesced: IntCounter,
    /// Debounced broadcasts fired
    pub broadcasts: IntCounter,
    /// Frames delivered to room members
    pub deliveries: IntCounter,
    /// Frames dropped because a member's outbound queue was full or closed
    pub dropped_deliveries: IntCounter,
    /// Client events rejected by validation
    pub validation_errors: IntCounter,
}

/// Centralized metrics for the relay
pub struct RelayMetrics {
    registry: Registry,
    /// Connection lifecycle
    pub connections: ConnectionMetrics,
    /// Room and delta flow
    pub flow: RelayFlowMetrics,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl RelayMetrics {
    /// Create and register all relay metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let active = IntGauge::new("relay_connections_active", "Currently open connections")?;
        registry.register(Box::new(active.clone()))?;

        let connections = ConnectionMetrics {
            opened: counter(&registry, "relay_connections_opened_total", "Connections accepted")?,
            closed: counter(&registry, "relay_connections_closed_total", "Connections closed")?,
            active,
        };

        let flow = RelayFlowMetrics {
            joins: counter(&registry, "relay_joins_total", "Successful document joins")?,
            join_failures: counter(
                &registry,
                "relay_join_failures_total",
                "Rejected document joins",
            )?,
            deltas_received: counter(
                &registry,
                "relay_deltas_received_total",
                "Deltas accepted for debouncing",
            )?,
            deltas_coalesced: counter(
                &registry,
                "relay_deltas_coalesced_total",
                "Pending deltas overwritten within a burst",
            )?,
            broadcasts: counter(&registry, "relay_broadcasts_total", "Debounced broadcasts fired")?,
            deliveries: counter(
                &registry,
                "relay_deliveries_total",
                "Frames delivered to room members",
            )?,
            dropped_deliveries: counter(
                &registry,
                "relay_dropped_deliveries_total",
                "Frames dropped on full or closed queues",
            )?,
            validation_errors: counter(
                &registry,
                "relay_validation_errors_total",
                "Client events rejected by validation",
            )?,
        };

        Ok(Self {
            registry,
            connections,
            flow,
        })
    }

    /// Record an accepted connection
    pub fn connection_opened(&self) {
        self.connections.opened.inc();
        self.connections.active.inc();
    }

    /// Record a closed connection
    pub fn connection_closed(&self) {
        self.connections.closed.inc();
        self.connections.active.dec();
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
