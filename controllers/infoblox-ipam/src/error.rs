//! Controller-specific error types.
//!
//! Errors that can surface from a reconcile. `is_not_found()` separates "the object is not
//! there (yet)" from real failures: the former is a wait, the latter is retried with backoff.

use infoblox_client::InfobloxError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Infoblox IPAM Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Infoblox API error
    #[error("Infoblox error: {0}")]
    Infoblox(#[from] InfobloxError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Referenced object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Pool, instance or credentials are not usable
    #[error("Pool not ready: {0}")]
    PoolNotReady(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No subnet could provide an address
    #[error("IP allocation failed: {0}")]
    AllocationFailed(String),

    /// Hostname could not be derived from the owner graph
    #[error("Hostname resolution failed: {0}")]
    Hostname(String),

    /// Address is controlled by something other than its claim
    #[error("Ownership conflict: {0}")]
    OwnershipConflict(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether the error means a referenced object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kube(KubeError::Api(response)) => response.code == 404,
            Self::Infoblox(e) => e.is_not_found(),
            Self::NotFound(_) => true,
            _ => false,
        }
    }
}
