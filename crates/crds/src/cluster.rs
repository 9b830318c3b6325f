//! Cluster API `Cluster`
//!
//! Only the fields the IPAM controller reads. The full type is owned by Cluster API; this
//! resource is never installed from this crate.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(group = "cluster.x-k8s.io", version = "v1beta1", kind = "Cluster", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Pauses reconciliation of all objects belonging to the cluster
    #[serde(default)]
    pub paused: bool,
}
