//! Test utilities for unit testing reconcilers
//!
//! Fixtures for the IPAM resources and an in-memory [`KubeClientTrait`] that behaves like an
//! API server where it matters: objects with finalizers are only marked for deletion and
//! disappear once their last finalizer is removed.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::index::PoolIndex;
use crate::kube_client::KubeClientTrait;
use crate::reconciler::Reconciler;
use async_trait::async_trait;
use crds::*;
use infoblox_client::{ClientManager, Config, HostRecordIpam, InfobloxError, IpamClient, MockInfobloxClient};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const OPERATOR_NAMESPACE: &str = "infoblox-system";

/// A fixed deletion timestamp
pub fn deletion_timestamp() -> Option<Time> {
    serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).ok()
}

/// Owner reference without controller flags
pub fn owner_ref(api_version: &str, kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}", name),
        ..Default::default()
    }
}

/// Helper to create test IPAddressClaim referencing an InfobloxIPPool
pub fn create_test_claim(name: &str, namespace: &str, pool: &str) -> IPAddressClaim {
    IPAddressClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uuid::Uuid::new_v4().to_string()),
            ..Default::default()
        },
        spec: IPAddressClaimSpec {
            pool_ref: TypedLocalObjectReference::new(IPAM_GROUP, INFOBLOX_POOL_KIND, pool),
        },
        status: None,
    }
}

/// Helper to create test IPAddress bound to the claim of the same name
pub fn create_test_address(name: &str, namespace: &str, pool: &str) -> IPAddress {
    IPAddress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: IPAddressSpec {
            claim_ref: LocalObjectReference::new(name),
            pool_ref: TypedLocalObjectReference::new(IPAM_GROUP, INFOBLOX_POOL_KIND, pool),
            address: "10.0.0.2".to_string(),
            prefix: 24,
            gateway: Some("10.0.0.1".to_string()),
        },
    }
}

/// Helper to create test InfobloxIPPool with `(cidr, gateway)` subnets
pub fn create_test_pool(name: &str, namespace: &str, instance: &str, subnets: &[(&str, Option<&str>)]) -> InfobloxIPPool {
    InfobloxIPPool {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uuid::Uuid::new_v4().to_string()),
            ..Default::default()
        },
        spec: InfobloxIPPoolSpec {
            instance: LocalObjectReference::new(instance),
            subnets: subnets
                .iter()
                .map(|(cidr, gateway)| Subnet {
                    cidr: cidr.to_string(),
                    gateway: gateway.map(str::to_string),
                })
                .collect(),
            network_view: None,
            dns_view: None,
            dns_zone: None,
        },
        status: None,
    }
}

/// Helper to create test InfobloxInstance
pub fn create_test_instance(name: &str, secret: &str) -> InfobloxInstance {
    InfobloxInstance {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: InfobloxInstanceSpec {
            host: "ib.example.com".to_string(),
            port: "443".to_string(),
            credentials_secret_ref: LocalObjectReference::new(secret),
            ..Default::default()
        },
        status: None,
    }
}

/// Secret data with username/password credentials
pub fn create_test_secret_data(username: &str, password: &str) -> BTreeMap<String, Vec<u8>> {
    BTreeMap::from([
        ("username".to_string(), username.as_bytes().to_vec()),
        ("password".to_string(), password.as_bytes().to_vec()),
    ])
}

/// Client registry that hands out `HostRecordIpam` over a shared mock grid
pub fn mock_client_manager(grid: &MockInfobloxClient) -> ClientManager {
    let grid = grid.clone();
    ClientManager::new(Arc::new(move |_config: &Config| -> Result<Arc<dyn IpamClient>, InfobloxError> {
        Ok(Arc::new(HostRecordIpam::new(grid.clone())) as Arc<dyn IpamClient>)
    }))
}

/// Mock grid with the default views and the given networks
pub fn create_test_grid(networks: &[&str]) -> MockInfobloxClient {
    let grid = MockInfobloxClient::new("https://ib.example.com:443/wapi/v2.12");
    grid.add_network_view("default");
    grid.add_dns_view("default");
    for cidr in networks {
        grid.add_network("default", cidr);
    }
    grid
}

/// Reconciler over a mock cluster and a mock grid
pub fn create_test_reconciler(kube: &MockKubeClient, grid: &MockInfobloxClient) -> Reconciler {
    Reconciler::new(
        Arc::new(kube.clone()),
        Arc::new(mock_client_manager(grid)),
        Arc::new(PoolIndex::new()),
        ControllerConfig {
            watch_namespace: None,
            operator_namespace: OPERATOR_NAMESPACE.to_string(),
            watch_filter: None,
        },
    )
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn not_found(kind: &str, namespace: &str, name: &str) -> ControllerError {
    ControllerError::NotFound(format!("{} {}/{}", kind, namespace, name))
}

fn finalizers_empty(meta: &ObjectMeta) -> bool {
    meta.finalizers.as_ref().is_none_or(Vec::is_empty)
}

#[derive(Debug, Default)]
struct MockKubeState {
    claims: HashMap<Key, IPAddressClaim>,
    addresses: HashMap<Key, IPAddress>,
    pools: HashMap<Key, InfobloxIPPool>,
    instances: HashMap<String, InfobloxInstance>,
    secrets: HashMap<Key, BTreeMap<String, Vec<u8>>>,
    clusters: HashMap<Key, Cluster>,
    // (namespace, apiVersion, kind, name)
    owners: HashMap<(String, String, String, String), Vec<OwnerReference>>,
    claim_patches: usize,
    address_writes: usize,
    address_deletes: usize,
}

/// In-memory Kubernetes API
#[derive(Debug, Clone, Default)]
pub struct MockKubeClient {
    state: Arc<Mutex<MockKubeState>>,
}

impl MockKubeClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockKubeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_claim(&self, claim: &IPAddressClaim) {
        let k = key(&claim.metadata.namespace.clone().unwrap_or_default(), &claim.metadata.name.clone().unwrap_or_default());
        self.lock().claims.insert(k, claim.clone());
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<IPAddressClaim> {
        self.lock().claims.get(&key(namespace, name)).cloned()
    }

    /// Mark a stored claim for deletion and return it
    pub fn mark_claim_deleted(&self, namespace: &str, name: &str) -> Option<IPAddressClaim> {
        let mut state = self.lock();
        let claim = state.claims.get_mut(&key(namespace, name))?;
        claim.metadata.deletion_timestamp = deletion_timestamp();
        Some(claim.clone())
    }

    pub fn add_address(&self, address: &IPAddress) {
        let k = key(&address.metadata.namespace.clone().unwrap_or_default(), &address.metadata.name.clone().unwrap_or_default());
        self.lock().addresses.insert(k, address.clone());
    }

    pub fn address(&self, namespace: &str, name: &str) -> Option<IPAddress> {
        self.lock().addresses.get(&key(namespace, name)).cloned()
    }

    pub fn add_pool(&self, pool: &InfobloxIPPool) {
        let k = key(&pool.metadata.namespace.clone().unwrap_or_default(), &pool.metadata.name.clone().unwrap_or_default());
        self.lock().pools.insert(k, pool.clone());
    }

    pub fn pool(&self, namespace: &str, name: &str) -> Option<InfobloxIPPool> {
        self.lock().pools.get(&key(namespace, name)).cloned()
    }

    pub fn add_instance(&self, instance: &InfobloxInstance) {
        let name = instance.metadata.name.clone().unwrap_or_default();
        self.lock().instances.insert(name, instance.clone());
    }

    pub fn instance(&self, name: &str) -> Option<InfobloxInstance> {
        self.lock().instances.get(name).cloned()
    }

    pub fn add_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, Vec<u8>>) {
        self.lock().secrets.insert(key(namespace, name), data);
    }

    pub fn add_cluster(&self, namespace: &str, name: &str, paused: bool) {
        let cluster = Cluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: ClusterSpec { paused },
        };
        self.lock().clusters.insert(key(namespace, name), cluster);
    }

    /// Register an arbitrary object by its owner references
    pub fn add_owner(&self, namespace: &str, api_version: &str, kind: &str, name: &str, owners: Vec<OwnerReference>) {
        self.lock().owners.insert(
            (namespace.to_string(), api_version.to_string(), kind.to_string(), name.to_string()),
            owners,
        );
    }

    /// Number of claim metadata and status patches
    pub fn claim_patch_count(&self) -> usize {
        self.lock().claim_patches
    }

    /// Number of address creates and patches
    pub fn address_write_count(&self) -> usize {
        self.lock().address_writes
    }

    pub fn address_delete_count(&self) -> usize {
        self.lock().address_deletes
    }
}

#[async_trait]
impl KubeClientTrait for MockKubeClient {
    async fn patch_claim_metadata(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        let mut state = self.lock();
        state.claim_patches += 1;
        let k = key(namespace, name);
        let claim = state
            .claims
            .get_mut(&k)
            .ok_or_else(|| not_found("IPAddressClaim", namespace, name))?;
        claim.metadata.finalizers = Some(finalizers.to_vec());
        claim
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations.clone());
        if claim.metadata.deletion_timestamp.is_some() && finalizers_empty(&claim.metadata) {
            state.claims.remove(&k);
        }
        Ok(())
    }

    async fn patch_claim_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IPAddressClaimStatus,
    ) -> Result<(), ControllerError> {
        let mut state = self.lock();
        state.claim_patches += 1;
        let claim = state
            .claims
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found("IPAddressClaim", namespace, name))?;
        claim.status = Some(status.clone());
        Ok(())
    }

    async fn get_address(&self, namespace: &str, name: &str) -> Result<Option<IPAddress>, ControllerError> {
        Ok(self.address(namespace, name))
    }

    async fn create_address(&self, address: &IPAddress) -> Result<IPAddress, ControllerError> {
        let namespace = address.metadata.namespace.clone().unwrap_or_default();
        let name = address.metadata.name.clone().unwrap_or_default();
        let mut state = self.lock();
        let k = key(&namespace, &name);
        if state.addresses.contains_key(&k) {
            return Err(ControllerError::OwnershipConflict(format!(
                "IPAddress {}/{} already exists",
                namespace, name
            )));
        }
        let mut created = address.clone();
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        state.address_writes += 1;
        state.addresses.insert(k, created.clone());
        Ok(created)
    }

    async fn patch_address(&self, address: &IPAddress) -> Result<IPAddress, ControllerError> {
        let namespace = address.metadata.namespace.clone().unwrap_or_default();
        let name = address.metadata.name.clone().unwrap_or_default();
        let mut state = self.lock();
        state.address_writes += 1;
        let stored = state
            .addresses
            .get_mut(&key(&namespace, &name))
            .ok_or_else(|| not_found("IPAddress", &namespace, &name))?;
        stored.metadata.owner_references = address.metadata.owner_references.clone();
        stored.metadata.finalizers = address.metadata.finalizers.clone();
        stored.metadata.labels = address.metadata.labels.clone();
        stored.spec = address.spec.clone();
        Ok(stored.clone())
    }

    async fn patch_address_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ControllerError> {
        let mut state = self.lock();
        let k = key(namespace, name);
        let address = state
            .addresses
            .get_mut(&k)
            .ok_or_else(|| not_found("IPAddress", namespace, name))?;
        address.metadata.finalizers = Some(finalizers.to_vec());
        if address.metadata.deletion_timestamp.is_some() && finalizers_empty(&address.metadata) {
            state.addresses.remove(&k);
        }
        Ok(())
    }

    async fn delete_address(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let mut state = self.lock();
        let k = key(namespace, name);
        let Some(address) = state.addresses.get_mut(&k) else {
            return Ok(());
        };
        if finalizers_empty(&address.metadata) {
            state.addresses.remove(&k);
        } else {
            address.metadata.deletion_timestamp = deletion_timestamp();
        }
        state.address_deletes += 1;
        Ok(())
    }

    async fn get_pool(&self, namespace: &str, name: &str) -> Result<Option<InfobloxIPPool>, ControllerError> {
        Ok(self.pool(namespace, name))
    }

    async fn patch_pool_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ControllerError> {
        let mut state = self.lock();
        let k = key(namespace, name);
        let pool = state
            .pools
            .get_mut(&k)
            .ok_or_else(|| not_found("InfobloxIPPool", namespace, name))?;
        pool.metadata.finalizers = Some(finalizers.to_vec());
        if pool.metadata.deletion_timestamp.is_some() && finalizers_empty(&pool.metadata) {
            state.pools.remove(&k);
        }
        Ok(())
    }

    async fn patch_pool_status(
        &self,
        namespace: &str,
        name: &str,
        status: &InfobloxIPPoolStatus,
    ) -> Result<(), ControllerError> {
        let mut state = self.lock();
        let pool = state
            .pools
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found("InfobloxIPPool", namespace, name))?;
        pool.status = Some(status.clone());
        Ok(())
    }

    async fn get_instance(&self, name: &str) -> Result<Option<InfobloxInstance>, ControllerError> {
        Ok(self.instance(name))
    }

    async fn patch_instance_status(&self, name: &str, status: &InfobloxInstanceStatus) -> Result<(), ControllerError> {
        let mut state = self.lock();
        let instance = state
            .instances
            .get_mut(name)
            .ok_or_else(|| not_found("InfobloxInstance", "", name))?;
        instance.status = Some(status.clone());
        Ok(())
    }

    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ControllerError> {
        Ok(self.lock().secrets.get(&key(namespace, name)).cloned())
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ControllerError> {
        Ok(self.lock().clusters.get(&key(namespace, name)).cloned())
    }

    async fn get_owner_references(
        &self,
        namespace: &str,
        api_version: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<Vec<OwnerReference>>, ControllerError> {
        Ok(self
            .lock()
            .owners
            .get(&(namespace.to_string(), api_version.to_string(), kind.to_string(), name.to_string()))
            .cloned())
    }
}
