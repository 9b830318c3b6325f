//! Client registry
//!
//! Keeps one [`IpamClient`] per Infoblox instance, keyed by instance identity. A cached client
//! is reused while the instance's connection config and credentials are unchanged and
//! rebuilt as soon as they differ. Instances that change or go away are evicted explicitly.

use crate::addresses::{HostRecordIpam, IpamClient};
use crate::client::InfobloxClient;
use crate::config::Config;
use crate::error::InfobloxError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Builds a client for a configuration
pub type ClientFactory = Arc<dyn Fn(&Config) -> Result<Arc<dyn IpamClient>, InfobloxError> + Send + Sync>;

struct CachedClient {
    config: Config,
    client: Arc<dyn IpamClient>,
}

/// Keyed registry of backend clients
pub struct ClientManager {
    factory: ClientFactory,
    clients: Mutex<HashMap<String, CachedClient>>,
}

impl std::fmt::Debug for ClientManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientManager")
            .field("clients", &self.lock().keys().cloned().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ClientManager {
    /// Registry building clients with `factory`
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Registry building real WAPI clients
    pub fn with_wapi_clients() -> Self {
        Self::new(Arc::new(|config: &Config| -> Result<Arc<dyn IpamClient>, InfobloxError> {
            let client = InfobloxClient::new(config)?;
            Ok(Arc::new(HostRecordIpam::new(client)) as Arc<dyn IpamClient>)
        }))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedClient>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Client for `key`, built (or rebuilt) when `config` differs from the cached one
    pub fn get_or_create(&self, key: &str, config: &Config) -> Result<Arc<dyn IpamClient>, InfobloxError> {
        let mut clients = self.lock();
        if let Some(cached) = clients.get(key) {
            if cached.config == *config {
                return Ok(Arc::clone(&cached.client));
            }
            debug!("Configuration of Infoblox instance {} changed, rebuilding client", key);
        }

        let client = (self.factory)(config)?;
        clients.insert(
            key.to_string(),
            CachedClient {
                config: config.clone(),
                client: Arc::clone(&client),
            },
        );
        Ok(client)
    }

    /// Drop the cached client for `key`, returning whether one was cached
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.lock().remove(key).is_some();
        if removed {
            debug!("Evicted cached client for Infoblox instance {}", key);
        }
        removed
    }

    /// Number of cached clients
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no client is cached
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
