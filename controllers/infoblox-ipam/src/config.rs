//! Controller configuration from the environment

use crate::error::ControllerError;
use std::env;

/// Runtime configuration, read once at startup
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub watch_namespace: Option<String>,
    /// Namespace holding the instances' credentials secrets
    pub operator_namespace: String,
    /// Only claims labelled `cluster.x-k8s.io/watch-filter=<value>` are handled when set
    pub watch_filter: Option<String>,
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let operator_namespace = get("NAMESPACE").ok_or_else(|| {
            ControllerError::InvalidConfig("NAMESPACE environment variable is required".to_string())
        })?;

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            operator_namespace,
            watch_filter: get("WATCH_FILTER"),
        })
    }
}
