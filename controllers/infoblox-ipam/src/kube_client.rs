//! Kubernetes API access used by the reconcilers.
//!
//! All reads and writes go through [`KubeClientTrait`] so the claim state machine and the pool
//! reconciler can be exercised against an in-memory cluster in unit tests.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{
    Cluster, IPAddress, IPAddressClaim, IPAddressClaimStatus, InfobloxIPPool, InfobloxIPPoolStatus, InfobloxInstance,
    InfobloxInstanceStatus,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// Field manager used for all patches
pub const FIELD_MANAGER: &str = "infoblox-ipam-controller";

/// Kubernetes operations needed by the controller.
#[async_trait]
pub trait KubeClientTrait: Send + Sync {
    /// Replace the claim's finalizers and merge its annotations
    async fn patch_claim_metadata(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError>;

    async fn patch_claim_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IPAddressClaimStatus,
    ) -> Result<(), ControllerError>;

    async fn get_address(&self, namespace: &str, name: &str) -> Result<Option<IPAddress>, ControllerError>;

    async fn create_address(&self, address: &IPAddress) -> Result<IPAddress, ControllerError>;

    /// Patch owner references, finalizers, labels and spec of an existing address
    async fn patch_address(&self, address: &IPAddress) -> Result<IPAddress, ControllerError>;

    async fn patch_address_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ControllerError>;

    /// Delete an address; an address that is already gone is not an error
    async fn delete_address(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    async fn get_pool(&self, namespace: &str, name: &str) -> Result<Option<InfobloxIPPool>, ControllerError>;

    async fn patch_pool_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ControllerError>;

    async fn patch_pool_status(
        &self,
        namespace: &str,
        name: &str,
        status: &InfobloxIPPoolStatus,
    ) -> Result<(), ControllerError>;

    async fn get_instance(&self, name: &str) -> Result<Option<InfobloxInstance>, ControllerError>;

    async fn patch_instance_status(&self, name: &str, status: &InfobloxInstanceStatus) -> Result<(), ControllerError>;

    /// Raw data of a Secret
    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ControllerError>;

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ControllerError>;

    /// Owner references of an arbitrary namespaced object, `None` when it does not exist
    async fn get_owner_references(
        &self,
        namespace: &str,
        api_version: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<Vec<OwnerReference>>, ControllerError>;
}

/// [`KubeClientTrait`] backed by the API server.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient").finish_non_exhaustive()
    }
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn claims(&self, namespace: &str) -> Api<IPAddressClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn addresses(&self, namespace: &str) -> Api<IPAddress> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pools(&self, namespace: &str) -> Api<InfobloxIPPool> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn instances(&self) -> Api<InfobloxInstance> {
        Api::all(self.client.clone())
    }
}

fn patch_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER)
}

fn is_api_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl KubeClientTrait for KubeClient {
    async fn patch_claim_metadata(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "annotations": annotations,
            }
        });
        self.claims(namespace)
            .patch(name, &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_claim_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IPAddressClaimStatus,
    ) -> Result<(), ControllerError> {
        let patch = json!({ "status": status });
        self.claims(namespace)
            .patch_status(name, &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_address(&self, namespace: &str, name: &str) -> Result<Option<IPAddress>, ControllerError> {
        Ok(self.addresses(namespace).get_opt(name).await?)
    }

    async fn create_address(&self, address: &IPAddress) -> Result<IPAddress, ControllerError> {
        let namespace = address.namespace().unwrap_or_default();
        Ok(self
            .addresses(&namespace)
            .create(&PostParams::default(), address)
            .await?)
    }

    async fn patch_address(&self, address: &IPAddress) -> Result<IPAddress, ControllerError> {
        let namespace = address.namespace().unwrap_or_default();
        let patch = json!({
            "metadata": {
                "ownerReferences": address.metadata.owner_references,
                "finalizers": address.metadata.finalizers,
                "labels": address.metadata.labels,
            },
            "spec": address.spec,
        });
        Ok(self
            .addresses(&namespace)
            .patch(&address.name_any(), &patch_params(), &Patch::Merge(&patch))
            .await?)
    }

    async fn patch_address_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ControllerError> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.addresses(namespace)
            .patch(name, &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_address(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        match self.addresses(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_api_not_found(&e) => {
                debug!("IPAddress {}/{} already deleted", namespace, name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_pool(&self, namespace: &str, name: &str) -> Result<Option<InfobloxIPPool>, ControllerError> {
        Ok(self.pools(namespace).get_opt(name).await?)
    }

    async fn patch_pool_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ControllerError> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.pools(namespace)
            .patch(name, &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_pool_status(
        &self,
        namespace: &str,
        name: &str,
        status: &InfobloxIPPoolStatus,
    ) -> Result<(), ControllerError> {
        let patch = json!({ "status": status });
        self.pools(namespace)
            .patch_status(name, &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_instance(&self, name: &str) -> Result<Option<InfobloxInstance>, ControllerError> {
        Ok(self.instances().get_opt(name).await?)
    }

    async fn patch_instance_status(&self, name: &str, status: &InfobloxInstanceStatus) -> Result<(), ControllerError> {
        let patch = json!({ "status": status });
        self.instances()
            .patch_status(name, &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ControllerError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(secrets.get_opt(name).await?.map(|secret| {
            secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, value.0))
                .collect()
        }))
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ControllerError> {
        let clusters: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(clusters.get_opt(name).await?)
    }

    async fn get_owner_references(
        &self,
        namespace: &str,
        api_version: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<Vec<OwnerReference>>, ControllerError> {
        let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind));
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &resource);
        Ok(api
            .get_opt(name)
            .await?
            .map(|obj| obj.metadata.owner_references.unwrap_or_default()))
    }
}
