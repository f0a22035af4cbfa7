//! Core system foundations
//!
//! Error handling, configuration, logging setup, the startup credential
//! check and the shared application state.

pub mod app_state;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;

// Re-export commonly used items
pub use app_state::{create_app_state, AppState};
pub use config::Config;
pub use error::{Error, Result};
