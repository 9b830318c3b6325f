//! Kubernetes object references shared by the IPAM CRDs
//!
//! Mirrors the core `LocalObjectReference` and `TypedLocalObjectReference` shapes so the
//! CRDs can derive `JsonSchema` without pulling schema support from k8s-openapi.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to an object by name in the same namespace (or cluster scope)
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    /// Name of the referenced object
    #[serde(default)]
    pub name: String,
}

impl LocalObjectReference {
    /// Create a reference to the named object
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Typed reference to an object in the same namespace
///
/// This follows the Kubernetes `TypedLocalObjectReference` pattern:
/// - `apiGroup`: API group of the referenced resource (e.g., "ipam.cluster.x-k8s.io")
/// - `kind`: kind of the referenced resource (e.g., "InfobloxIPPool")
/// - `name`: name of the referenced resource
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TypedLocalObjectReference {
    /// API group of the referenced resource
    #[serde(default)]
    pub api_group: String,

    /// Kind of the referenced resource
    pub kind: String,

    /// Name of the referenced resource
    pub name: String,
}

impl TypedLocalObjectReference {
    /// Create a new reference with apiGroup, kind, and name
    pub fn new(api_group: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_group: api_group.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Whether this reference points at the given group and kind
    pub fn is_group_kind(&self, group: &str, kind: &str) -> bool {
        self.api_group == group && self.kind == kind
    }
}
