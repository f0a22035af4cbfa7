//! Startup check for the persistence collaborator's service-account credentials.
//!
//! The relay never talks to the persistence layer itself. When credentials are
//! configured they must still be well formed, otherwise startup aborts; when
//! they are absent the relay serves without them.

use crate::core::error::{Error, Result};
use serde::Deserialize;

/// Fields of a service-account key the collaborator cannot start without
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    /// Owning project
    pub project_id: String,
    /// Service account identity
    pub client_email: String,
    /// PEM private key
    pub private_key: String,
}

/// Outcome of the startup check
#[derive(Debug, Clone)]
pub enum PersistenceStatus {
    /// No credentials configured
    Disabled,
    /// Credentials parsed and complete
    Configured(ServiceAccount),
}

impl ServiceAccount {
    /// Parse a service-account JSON document
    pub fn from_json(raw: &str) -> Result<Self> {
        let account: ServiceAccount = serde_json::from_str(raw)
            .map_err(|e| Error::credentials(format!("Malformed service account JSON: {}", e)))?;

        for (field, value) in [
            ("project_id", &account.project_id),
            ("client_email", &account.client_email),
            ("private_key", &account.private_key),
        ] {
            if value.trim().is_empty() {
                return Err(Error::credentials(format!("Service account {} is empty", field)));
            }
        }

        Ok(account)
    }
}

/// Check the optional credentials from configuration
pub fn check(credentials_json: Option<&str>) -> Result<PersistenceStatus> {
    match credentials_json {
        None => Ok(PersistenceStatus::Disabled),
        Some(raw) => ServiceAccount::from_json(raw).map(PersistenceStatus::Configured),
    }
}
