//! Doc Relay - Realtime change relay for collaborative documents
//!
//! Clients join a room per document over a WebSocket and send incremental
//! edits. Each connection's edits are debounced and the latest one is relayed
//! to every other participant in the room. The relay only transports deltas;
//! it never stores, merges or interprets them.
#![warn(missing_docs)]

// Core foundational modules
pub mod core;

// Main functional modules
pub mod api;
pub mod relay;
pub mod system;

// Re-export commonly used items for convenience
pub use crate::core::{Config, Error, Result};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
