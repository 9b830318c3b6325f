//! IPAddress CRD
//!
//! A single allocated address, bound to exactly one IPAddressClaim of the same name.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::{LocalObjectReference, TypedLocalObjectReference};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "ipam.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "IPAddress",
    namespaced,
    shortname = "ipa"
)]
#[serde(rename_all = "camelCase")]
pub struct IPAddressSpec {
    /// Claim this address was allocated for
    pub claim_ref: LocalObjectReference,

    /// Pool this address was allocated from
    pub pool_ref: TypedLocalObjectReference,

    /// Allocated address, without prefix
    pub address: String,

    /// Prefix length of the subnet the address belongs to
    pub prefix: i32,

    /// Gateway of the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}
