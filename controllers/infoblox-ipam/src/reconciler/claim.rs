//! IPAddressClaim state machine
//!
//! Provider-independent lifecycle of a claim and the IPAddress bound to it. The provider
//! plugs in through [`ProviderAdapter`], which hands out a [`ClaimHandler`] per reconcile.
//!
//! Claim metadata and status are written back on every exit path, errors included, and only
//! when they changed. An IPAddress is never deleted while its claim still exists.

use super::{add_finalizer, finalizers_of, has_finalizer, ignore_not_found, remove_finalizer};
use crate::error::ControllerError;
use crate::kube_client::KubeClientTrait;
use async_trait::async_trait;
use crds::{
    CLUSTER_NAME_LABEL, IPAddress, IPAddressClaim, IPAddressClaimStatus, IPAddressSpec, LocalObjectReference,
    PROTECT_ADDRESS_FINALIZER, RELEASE_ADDRESS_FINALIZER, TypedLocalObjectReference, WATCH_FILTER_LABEL,
    has_paused_annotation,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Integration point of an IPAM provider
pub trait ProviderAdapter: Send + Sync {
    type Handler: ClaimHandler;

    /// API group and kind of the pools this provider serves
    fn pool_group_kind(&self) -> (&'static str, &'static str);

    /// Handler for a single reconcile of `claim`
    fn claim_handler_for(&self, claim: &IPAddressClaim) -> Self::Handler;
}

/// Allocates and releases addresses for one claim
#[async_trait]
pub trait ClaimHandler: Send {
    type Pool: Resource<DynamicType = ()> + Send + Sync;

    /// Resolve the claim's pool and whatever the provider needs to serve it
    ///
    /// `Ok(false)` means the pool does not exist.
    async fn fetch_pool(&mut self, claim: &mut IPAddressClaim) -> Result<bool, ControllerError>;

    /// Fill `address` with an address for the claim, allocating one if needed
    async fn ensure_address(
        &mut self,
        claim: &mut IPAddressClaim,
        address: &mut IPAddress,
    ) -> Result<(), ControllerError>;

    /// Give the claim's address back to the provider
    async fn release_address(&mut self, claim: &mut IPAddressClaim) -> Result<(), ControllerError>;

    /// Pool resolved by the last `fetch_pool`
    fn pool(&self) -> Option<&Self::Pool>;
}

/// Where a reconcile left the claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimState {
    /// Not ours (foreign pool kind or watch filter)
    Skipped,
    PausedByClaim,
    PausedByCluster,
    PausedByPool,
    /// The cluster named by the claim's label does not exist
    WaitingForCluster,
    /// The referenced pool does not exist
    PoolUnresolved,
    /// The claim is bound to an IPAddress holding this address
    Bound(String),
    /// Cleanup finished; the claim can go away
    Released,
}

/// Claim metadata and status as last written to the API server
#[derive(Debug)]
struct ClaimSnapshot {
    namespace: String,
    name: String,
    finalizers: Vec<String>,
    annotations: BTreeMap<String, String>,
    status: Option<IPAddressClaimStatus>,
}

impl ClaimSnapshot {
    fn of(claim: &IPAddressClaim) -> Self {
        Self {
            namespace: claim.namespace().unwrap_or_default(),
            name: claim.name_any(),
            finalizers: finalizers_of(&claim.metadata),
            annotations: claim.annotations().clone(),
            status: claim.status.clone(),
        }
    }

    /// Write changed status, then changed metadata
    ///
    /// Status goes first: dropping the last finalizer may delete the claim.
    async fn persist(&mut self, kube: &dyn KubeClientTrait, claim: &IPAddressClaim) -> Result<(), ControllerError> {
        if claim.status != self.status {
            if let Some(status) = &claim.status {
                debug!("Patching status of IPAddressClaim {}/{}", self.namespace, self.name);
                ignore_not_found(kube.patch_claim_status(&self.namespace, &self.name, status).await)?;
            }
            self.status = claim.status.clone();
        }

        let finalizers = finalizers_of(&claim.metadata);
        if finalizers != self.finalizers || *claim.annotations() != self.annotations {
            debug!("Patching metadata of IPAddressClaim {}/{}", self.namespace, self.name);
            ignore_not_found(
                kube.patch_claim_metadata(&self.namespace, &self.name, &finalizers, claim.annotations())
                    .await,
            )?;
            self.finalizers = finalizers;
            self.annotations = claim.annotations().clone();
        }
        Ok(())
    }
}

/// Drives claims through their lifecycle using a provider adapter
pub struct ClaimReconciler<A> {
    kube: Arc<dyn KubeClientTrait>,
    adapter: A,
    watch_filter: Option<String>,
}

impl<A: ProviderAdapter> ClaimReconciler<A> {
    pub fn new(kube: Arc<dyn KubeClientTrait>, adapter: A, watch_filter: Option<String>) -> Self {
        Self {
            kube,
            adapter,
            watch_filter,
        }
    }

    /// Claims this reconciler leaves alone, and why
    fn skip_reason(&self, claim: &IPAddressClaim) -> Option<ClaimState> {
        let (group, kind) = self.adapter.pool_group_kind();
        if !claim.spec.pool_ref.is_group_kind(group, kind) {
            return Some(ClaimState::Skipped);
        }
        if has_paused_annotation(claim) {
            return Some(ClaimState::PausedByClaim);
        }
        if let Some(filter) = &self.watch_filter {
            if claim.labels().get(WATCH_FILTER_LABEL) != Some(filter) {
                return Some(ClaimState::Skipped);
            }
        }
        None
    }

    /// Reconcile one claim and persist whatever changed on it
    pub async fn reconcile(&self, claim: &IPAddressClaim) -> Result<ClaimState, ControllerError> {
        if let Some(state) = self.skip_reason(claim) {
            debug!(
                "Skipping IPAddressClaim {}/{}: {:?}",
                claim.namespace().unwrap_or_default(),
                claim.name_any(),
                state
            );
            return Ok(state);
        }

        let mut snapshot = ClaimSnapshot::of(claim);
        let mut claim = claim.clone();
        info!("Reconciling IPAddressClaim {}/{}", snapshot.namespace, snapshot.name);

        let result = self.reconcile_claim(&mut claim, &mut snapshot).await;
        let persisted = snapshot.persist(self.kube.as_ref(), &claim).await;

        match (result, persisted) {
            (Ok(state), Ok(())) => Ok(state),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(persist_error)) => {
                warn!(
                    "Failed to persist IPAddressClaim {}/{} after error: {}",
                    snapshot.namespace, snapshot.name, persist_error
                );
                Err(e)
            }
        }
    }

    async fn reconcile_claim(
        &self,
        claim: &mut IPAddressClaim,
        snapshot: &mut ClaimSnapshot,
    ) -> Result<ClaimState, ControllerError> {
        let namespace = snapshot.namespace.clone();
        let name = snapshot.name.clone();
        let deleting = claim.metadata.deletion_timestamp.is_some();

        if deleting && !has_finalizer(&claim.metadata, RELEASE_ADDRESS_FINALIZER) {
            debug!("IPAddressClaim {}/{} is being deleted and already released", namespace, name);
            return Ok(ClaimState::Released);
        }

        // the finalizer must be on the claim before anything is allocated for it
        if !deleting && add_finalizer(&mut claim.metadata, RELEASE_ADDRESS_FINALIZER) {
            snapshot.persist(self.kube.as_ref(), claim).await?;
        }

        if let Some(cluster_name) = claim.labels().get(CLUSTER_NAME_LABEL).cloned() {
            match self.kube.get_cluster(&namespace, &cluster_name).await? {
                None => {
                    info!(
                        "IPAddressClaim {}/{} is linked to cluster {} which does not exist, waiting",
                        namespace, name, cluster_name
                    );
                    return Ok(ClaimState::WaitingForCluster);
                }
                Some(cluster) if cluster.is_paused() => {
                    info!(
                        "IPAddressClaim {}/{} is linked to paused cluster {}, skipping",
                        namespace, name, cluster_name
                    );
                    return Ok(ClaimState::PausedByCluster);
                }
                Some(_) => {}
            }
        }

        let mut handler = self.adapter.claim_handler_for(claim);
        let pool_found = match handler.fetch_pool(claim).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };
        if !pool_found {
            if deleting {
                info!(
                    "Pool {} of IPAddressClaim {}/{} is gone, cleaning up without release",
                    claim.spec.pool_ref.name, namespace, name
                );
                return self.reconcile_delete(claim, &namespace, &name).await;
            }
            info!(
                "Pool {} of IPAddressClaim {}/{} not found, waiting",
                claim.spec.pool_ref.name, namespace, name
            );
            return Ok(ClaimState::PoolUnresolved);
        }

        if handler.pool().is_some_and(has_paused_annotation) {
            info!(
                "IPAddressClaim {}/{} references paused pool {}, skipping",
                namespace, name, claim.spec.pool_ref.name
            );
            return Ok(ClaimState::PausedByPool);
        }

        if deleting {
            handler.release_address(claim).await?;
            return self.reconcile_delete(claim, &namespace, &name).await;
        }

        let pool_owner = handler.pool().map(owner_reference);
        let existing = self.kube.get_address(&namespace, &name).await?;
        let mut address = match &existing {
            Some(address) => address.clone(),
            None => new_address(claim, &namespace, &name),
        };

        handler.ensure_address(claim, &mut address).await?;

        ensure_owner_references(&mut address, owner_reference(&*claim), pool_owner)?;
        add_finalizer(&mut address.metadata, PROTECT_ADDRESS_FINALIZER);
        if let Some(cluster_name) = claim.labels().get(CLUSTER_NAME_LABEL) {
            address
                .labels_mut()
                .insert(CLUSTER_NAME_LABEL.to_string(), cluster_name.clone());
        }

        let address = match existing {
            None => {
                let created = self.kube.create_address(&address).await?;
                info!(
                    "IPAddress {}/{} ({}) has been created",
                    namespace, name, created.spec.address
                );
                created
            }
            Some(previous) if address_changed(&previous, &address) => {
                let patched = self.kube.patch_address(&address).await?;
                info!(
                    "IPAddress {}/{} ({}) has been updated",
                    namespace, name, patched.spec.address
                );
                patched
            }
            Some(_) => address,
        };

        if address.metadata.deletion_timestamp.is_some() {
            info!(
                "IPAddress {}/{} is marked for deletion, deletion is held until the claim is deleted",
                namespace, name
            );
        }

        claim.status.get_or_insert_with(Default::default).address_ref =
            Some(LocalObjectReference::new(address.name_any()));

        Ok(ClaimState::Bound(address.spec.address))
    }

    /// Drop the address and the claim's finalizer once the backend has been released
    async fn reconcile_delete(
        &self,
        claim: &mut IPAddressClaim,
        namespace: &str,
        name: &str,
    ) -> Result<ClaimState, ControllerError> {
        if let Some(mut address) = self.kube.get_address(namespace, name).await? {
            if remove_finalizer(&mut address.metadata, PROTECT_ADDRESS_FINALIZER) {
                ignore_not_found(
                    self.kube
                        .patch_address_finalizers(namespace, name, &finalizers_of(&address.metadata))
                        .await,
                )?;
            }
            self.kube.delete_address(namespace, name).await?;
            info!("IPAddress {}/{} has been deleted", namespace, name);
        }

        remove_finalizer(&mut claim.metadata, RELEASE_ADDRESS_FINALIZER);
        Ok(ClaimState::Released)
    }
}

/// Address named after its claim, referencing the claim and its pool
fn new_address(claim: &IPAddressClaim, namespace: &str, name: &str) -> IPAddress {
    let pool_ref = &claim.spec.pool_ref;
    IPAddress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: IPAddressSpec {
            claim_ref: LocalObjectReference::new(name),
            pool_ref: TypedLocalObjectReference::new(&pool_ref.api_group, &pool_ref.kind, &pool_ref.name),
            ..Default::default()
        },
    }
}

/// Plain (non-controller) owner reference to `obj`
fn owner_reference<K: Resource<DynamicType = ()>>(obj: &K) -> OwnerReference {
    OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: obj.name_any(),
        uid: obj.uid().unwrap_or_default(),
        ..Default::default()
    }
}

fn same_owner(a: &OwnerReference, b: &OwnerReference) -> bool {
    let group = |api_version: &str| api_version.split_once('/').map(|(g, _)| g.to_string()).unwrap_or_default();
    a.kind == b.kind && a.name == b.name && group(&a.api_version) == group(&b.api_version)
}

fn upsert_owner(references: &mut Vec<OwnerReference>, reference: OwnerReference) {
    match references.iter_mut().find(|r| same_owner(r, &reference)) {
        Some(existing) => *existing = reference,
        None => references.push(reference),
    }
}

/// Make the claim the address's controller and the pool a plain owner
///
/// Unrelated owner references are kept. An address controlled by anything but its claim is
/// left untouched.
fn ensure_owner_references(
    address: &mut IPAddress,
    mut claim_owner: OwnerReference,
    pool_owner: Option<OwnerReference>,
) -> Result<(), ControllerError> {
    let references = address.metadata.owner_references.get_or_insert_with(Vec::new);

    if let Some(other) = references
        .iter()
        .find(|r| r.controller == Some(true) && !same_owner(r, &claim_owner))
    {
        return Err(ControllerError::OwnershipConflict(format!(
            "IPAddress {} is already controlled by {} {}",
            address.metadata.name.as_deref().unwrap_or_default(),
            other.kind,
            other.name
        )));
    }

    claim_owner.controller = Some(true);
    claim_owner.block_owner_deletion = Some(true);
    upsert_owner(references, claim_owner);
    if let Some(pool_owner) = pool_owner {
        upsert_owner(references, pool_owner);
    }
    Ok(())
}

fn address_changed(before: &IPAddress, after: &IPAddress) -> bool {
    before.spec != after.spec
        || before.metadata.owner_references != after.metadata.owner_references
        || before.metadata.finalizers != after.metadata.finalizers
        || before.metadata.labels != after.metadata.labels
}
