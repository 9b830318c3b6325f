//! Main controller implementation.
//!
//! Wires the Kubernetes client, the Infoblox client registry and the lookup index into a
//! [`Reconciler`], then runs the claim, pool and instance controllers plus the index feeders
//! as background tasks.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::index::PoolIndex;
use crate::kube_client::KubeClient;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::{IPAddress, IPAddressClaim, InfobloxIPPool, InfobloxInstance};
use infoblox_client::ClientManager;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

type WatcherHandle = JoinHandle<Result<(), ControllerError>>;

/// Main controller for Infoblox IPAM.
#[derive(Debug)]
pub struct Controller {
    claim_watcher: WatcherHandle,
    pool_watcher: WatcherHandle,
    instance_watcher: WatcherHandle,
    claim_index: WatcherHandle,
    address_index: WatcherHandle,
}

/// Namespaced API, or all namespaces when no namespace is configured
fn namespaced_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Infoblox IPAM Controller");

        let kube_client = Client::try_default().await?;

        let namespace = config.watch_namespace.as_deref();
        let claim_api: Api<IPAddressClaim> = namespaced_api(&kube_client, namespace);
        let address_api: Api<IPAddress> = namespaced_api(&kube_client, namespace);
        let pool_api: Api<InfobloxIPPool> = namespaced_api(&kube_client, namespace);
        let instance_api: Api<InfobloxInstance> = Api::all(kube_client.clone());

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeClient::new(kube_client)),
            Arc::new(ClientManager::with_wapi_clients()),
            Arc::new(PoolIndex::new()),
            config,
        ));

        let watcher = Arc::new(Watcher::new(reconciler, claim_api, address_api, pool_api, instance_api));

        // index feeders first so pool deletions see a synced index as early as possible
        let claim_index = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.index_claims().await })
        };
        let address_index = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.index_addresses().await })
        };
        let claim_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_claims().await })
        };
        let pool_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_pools().await })
        };
        let instance_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_instances().await })
        };

        Ok(Self {
            claim_watcher,
            pool_watcher,
            instance_watcher,
            claim_index,
            address_index,
        })
    }

    /// Runs until any watcher exits; they are expected to run forever.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Infoblox IPAM Controller running");

        tokio::select! {
            result = &mut self.claim_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("IPAddressClaim watcher panicked: {}", e)))??;
            }
            result = &mut self.pool_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("InfobloxIPPool watcher panicked: {}", e)))??;
            }
            result = &mut self.instance_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("InfobloxInstance watcher panicked: {}", e)))??;
            }
            result = &mut self.claim_index => {
                result.map_err(|e| ControllerError::Watch(format!("IPAddressClaim index panicked: {}", e)))??;
            }
            result = &mut self.address_index => {
                result.map_err(|e| ControllerError::Watch(format!("IPAddress index panicked: {}", e)))??;
            }
        }

        Err(ControllerError::Watch("a watcher exited unexpectedly".to_string()))
    }
}
