//! InfobloxIPPool CRD
//!
//! Pool of subnets managed by an Infoblox instance. Subnets are tried in declared order.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Condition, HasConditions};
use crate::instance::InfobloxInstance;
use crate::references::LocalObjectReference;

/// Network view used when neither the pool nor the instance names one
pub const DEFAULT_NETWORK_VIEW: &str = "default";
/// DNS view paired with the default network view
pub const DEFAULT_DNS_VIEW: &str = "default";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "ipam.cluster.x-k8s.io",
    version = "v1alpha1",
    kind = "InfobloxIPPool",
    namespaced,
    status = "InfobloxIPPoolStatus",
    shortname = "ibpool"
)]
#[serde(rename_all = "camelCase")]
pub struct InfobloxIPPoolSpec {
    /// Cluster-scoped InfobloxInstance serving this pool
    pub instance: LocalObjectReference,

    /// Subnets to allocate from, in priority order
    #[serde(default)]
    pub subnets: Vec<Subnet>,

    /// Infoblox network view (defaults to the instance's default view)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_view: Option<String>,

    /// Infoblox DNS view (derived from the network view when unset)
    #[serde(default, rename = "dnsView", skip_serializing_if = "Option::is_none")]
    pub dns_view: Option<String>,

    /// DNS zone appended to hostnames; host records are DNS-enabled only when set
    #[serde(default, rename = "dnsZone", skip_serializing_if = "Option::is_none")]
    pub dns_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    /// Subnet in CIDR notation (e.g., "10.0.0.0/24")
    pub cidr: String,

    /// Gateway handed out with addresses from this subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfobloxIPPoolStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HasConditions for InfobloxIPPool {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default()
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl InfobloxIPPool {
    /// DNS zone, if one is configured
    pub fn dns_zone(&self) -> Option<&str> {
        self.spec.dns_zone.as_deref().filter(|z| !z.is_empty())
    }

    /// Effective network view: pool, then instance default, then `default`
    pub fn network_view(&self, instance: &InfobloxInstance) -> String {
        non_empty(self.spec.network_view.as_deref())
            .or_else(|| non_empty(instance.spec.default_network_view.as_deref()))
            .unwrap_or(DEFAULT_NETWORK_VIEW)
            .to_string()
    }

    /// Effective DNS view: pool, then instance default, then derived from the network view
    ///
    /// Infoblox names the DNS view of a non-default network view `default.<networkView>`.
    pub fn dns_view(&self, instance: &InfobloxInstance) -> String {
        if let Some(view) = non_empty(self.spec.dns_view.as_deref())
            .or_else(|| non_empty(instance.spec.default_dns_view.as_deref()))
        {
            return view.to_string();
        }
        dns_view_for_network_view(&self.network_view(instance))
    }
}

/// DNS view Infoblox creates alongside a network view
///
/// The default network view pairs with the `default` DNS view; any other view `nv` pairs
/// with `default.nv`.
pub fn dns_view_for_network_view(network_view: &str) -> String {
    if network_view.is_empty() || network_view == DEFAULT_NETWORK_VIEW {
        DEFAULT_DNS_VIEW.to_string()
    } else {
        format!("default.{}", network_view)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InfobloxInstanceSpec;

    fn pool(network_view: Option<&str>, dns_view: Option<&str>) -> InfobloxIPPool {
        InfobloxIPPool::new(
            "pool",
            InfobloxIPPoolSpec {
                instance: LocalObjectReference::new("ib"),
                subnets: vec![],
                network_view: network_view.map(str::to_string),
                dns_view: dns_view.map(str::to_string),
                dns_zone: None,
            },
        )
    }

    fn instance(network_view: Option<&str>, dns_view: Option<&str>) -> InfobloxInstance {
        InfobloxInstance::new(
            "ib",
            InfobloxInstanceSpec {
                host: "infoblox.example.com".to_string(),
                default_network_view: network_view.map(str::to_string),
                default_dns_view: dns_view.map(str::to_string),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_network_view_defaults() {
        assert_eq!(pool(Some("nv"), None).network_view(&instance(Some("other"), None)), "nv");
        assert_eq!(pool(None, None).network_view(&instance(Some("other"), None)), "other");
        assert_eq!(pool(Some(""), None).network_view(&instance(None, None)), "default");
    }

    #[test]
    fn test_dns_view_determination() {
        assert_eq!(pool(None, Some("internal")).dns_view(&instance(None, Some("ext"))), "internal");
        assert_eq!(pool(None, None).dns_view(&instance(None, Some("ext"))), "ext");
        assert_eq!(pool(None, None).dns_view(&instance(None, None)), "default");
        assert_eq!(pool(Some("lab"), None).dns_view(&instance(None, None)), "default.lab");
    }
}
