//! Infoblox IPAM CRD Definitions
//!
//! Kubernetes Custom Resource Definitions used by the Infoblox IPAM controller, plus the
//! Cluster API resources it reads.

pub mod cluster;
pub mod conditions;
pub mod instance;
pub mod ip_address;
pub mod ip_claim;
pub mod ip_pool;
pub mod references;

pub use cluster::*;
pub use conditions::*;
pub use instance::*;
pub use ip_address::*;
pub use ip_claim::*;
pub use ip_pool::*;
pub use references::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{CustomResourceExt, Resource, ResourceExt};

/// API group of the IPAM resources
pub const IPAM_GROUP: &str = "ipam.cluster.x-k8s.io";
/// API group of Cluster API core resources
pub const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";
/// Kind of the pool handled by this provider
pub const INFOBLOX_POOL_KIND: &str = "InfobloxIPPool";

/// Finalizer on claims, removed once the address has been released
pub const RELEASE_ADDRESS_FINALIZER: &str = "ipam.cluster.x-k8s.io/ReleaseAddress";
/// Finalizer on addresses, removed only by the claim's deletion path
pub const PROTECT_ADDRESS_FINALIZER: &str = "ipam.cluster.x-k8s.io/ProtectAddress";
/// Finalizer on pools, removed once no claim references the pool
pub const PROTECT_POOL_FINALIZER: &str = "ipam.cluster.x-k8s.io/ProtectPool";

/// Annotation holding the hostname snapshotted at first allocation
pub const HOSTNAME_ANNOTATION: &str = "ipam.cluster.x-k8s.io/hostname";
/// Cluster API pause annotation
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";
/// Label naming the cluster an object belongs to
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";
/// Label restricting which controller instance handles an object
pub const WATCH_FILTER_LABEL: &str = "cluster.x-k8s.io/watch-filter";

/// CRDs installed with this provider; IPAddressClaim and IPAddress come from Cluster API
pub fn provider_crds() -> Vec<CustomResourceDefinition> {
    vec![InfobloxInstance::crd(), InfobloxIPPool::crd()]
}

/// Whether the object carries the pause annotation (any value)
pub fn has_paused_annotation<K: Resource>(obj: &K) -> bool {
    obj.annotations().contains_key(PAUSED_ANNOTATION)
}

impl Cluster {
    /// Paused via `spec.paused` or the pause annotation
    pub fn is_paused(&self) -> bool {
        self.spec.paused || has_paused_annotation(self)
    }
}
