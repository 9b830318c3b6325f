//! InfobloxInstance CRD
//!
//! Cluster-scoped connection settings for an Infoblox grid. Credentials live in a Secret in
//! the operator namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Condition, HasConditions};
use crate::ip_pool::{DEFAULT_NETWORK_VIEW, dns_view_for_network_view};
use crate::references::LocalObjectReference;

/// WAPI version used when the instance does not pin one
pub const DEFAULT_WAPI_VERSION: &str = "2.12";

fn default_port() -> String {
    "443".to_string()
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "ipam.cluster.x-k8s.io",
    version = "v1alpha1",
    kind = "InfobloxInstance",
    status = "InfobloxInstanceStatus",
    shortname = "ibinst"
)]
#[serde(rename_all = "camelCase")]
pub struct InfobloxInstanceSpec {
    /// Grid master hostname or address
    pub host: String,

    /// HTTPS port
    #[serde(default = "default_port")]
    pub port: String,

    /// WAPI version (e.g., "2.12")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wapi_version: Option<String>,

    /// Secret holding `username`/`password` or `clientCert`/`clientKey`
    #[serde(default)]
    pub credentials_secret_ref: LocalObjectReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_network_view: Option<String>,

    #[serde(default, rename = "defaultDNSView", skip_serializing_if = "Option::is_none")]
    pub default_dns_view: Option<String>,

    /// Skip server certificate verification
    #[serde(default, rename = "disableTLSVerification")]
    pub disable_tls_verification: bool,

    /// Path to a PEM CA bundle used to verify the grid certificate
    #[serde(default, rename = "customCAPath", skip_serializing_if = "Option::is_none")]
    pub custom_ca_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfobloxInstanceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HasConditions for InfobloxInstance {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default()
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl InfobloxInstance {
    /// Configured WAPI version, or the default
    pub fn wapi_version(&self) -> &str {
        self.spec
            .wapi_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_WAPI_VERSION)
    }

    /// Network view used by pools that do not name one
    pub fn default_network_view(&self) -> &str {
        self.spec
            .default_network_view
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_NETWORK_VIEW)
    }

    /// DNS view used by pools that do not name one, derived from the default network view
    /// when unset
    pub fn default_dns_view(&self) -> String {
        match self.spec.default_dns_view.as_deref().filter(|v| !v.is_empty()) {
            Some(view) => view.to_string(),
            None => dns_view_for_network_view(self.default_network_view()),
        }
    }
}
