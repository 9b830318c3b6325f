//! IPAddressClaim CRD
//!
//! Cluster API request for a single IP address from a pool.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Condition, HasConditions};
use crate::references::{LocalObjectReference, TypedLocalObjectReference};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ipam.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "IPAddressClaim",
    namespaced,
    status = "IPAddressClaimStatus",
    shortname = "ipc"
)]
#[serde(rename_all = "camelCase")]
pub struct IPAddressClaimSpec {
    /// Pool the address is claimed from
    pub pool_ref: TypedLocalObjectReference,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IPAddressClaimStatus {
    /// IPAddress created for this claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_ref: Option<LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HasConditions for IPAddressClaim {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default()
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl IPAddressClaim {
    /// Name recorded in `status.addressRef`, if any
    pub fn address_ref_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.address_ref.as_ref())
            .map(|r| r.name.as_str())
            .filter(|n| !n.is_empty())
    }
}
