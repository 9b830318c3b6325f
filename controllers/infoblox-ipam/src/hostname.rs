//! Hostname resolution from the owner graph.
//!
//! Claims are usually created by an infrastructure provider on behalf of a Cluster API
//! `Machine`; the machine's name is what ends up in DNS. Two strategies find it:
//!
//! - [`ChainResolver`] follows a fixed sequence of owner kinds (e.g. Metal3Data → Metal3Machine
//!   → Machine) and fails on the first missing hop.
//! - [`SearchResolver`] walks owner references breadth-first up to a depth bound and returns
//!   the first reference of the target kind.
//!
//! Nothing is cached; every call reads the owner graph fresh.

use crate::error::ControllerError;
use crate::kube_client::KubeClientTrait;
use async_trait::async_trait;
use crds::{CLUSTER_API_GROUP, IPAddressClaim};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use std::collections::{HashSet, VecDeque};

/// API group of Cluster API infrastructure providers
pub const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// Default depth bound of [`SearchResolver`]
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// An API group and kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupKind {
    pub group: &'static str,
    pub kind: &'static str,
}

impl GroupKind {
    pub const fn new(group: &'static str, kind: &'static str) -> Self {
        Self { group, kind }
    }

    fn matches(&self, reference: &OwnerReference) -> bool {
        reference.kind == self.kind && api_group(&reference.api_version) == self.group
    }
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind, self.group)
    }
}

/// Group part of an `apiVersion` (empty for the core group)
fn api_group(api_version: &str) -> &str {
    api_version.split_once('/').map(|(group, _)| group).unwrap_or_default()
}

/// Derives the short hostname of a claim
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    async fn resolve(&self, kube: &dyn KubeClientTrait, claim: &IPAddressClaim) -> Result<String, ControllerError>;
}

/// Follows a fixed owner chain and returns the name of its last hop
#[derive(Debug, Clone)]
pub struct ChainResolver {
    chain: Vec<GroupKind>,
}

impl ChainResolver {
    pub fn new(chain: Vec<GroupKind>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl HostnameResolver for ChainResolver {
    async fn resolve(&self, kube: &dyn KubeClientTrait, claim: &IPAddressClaim) -> Result<String, ControllerError> {
        let namespace = claim.namespace().unwrap_or_default();
        let mut owners = claim.owner_references().to_vec();

        for (position, hop) in self.chain.iter().enumerate() {
            let reference = owners.iter().find(|r| hop.matches(r)).cloned().ok_or_else(|| {
                ControllerError::Hostname(format!(
                    "failed to find owner reference with kind '{}' for claim {}/{}",
                    hop,
                    namespace,
                    claim.name_any()
                ))
            })?;

            if position + 1 == self.chain.len() {
                return Ok(reference.name);
            }

            owners = kube
                .get_owner_references(&namespace, &reference.api_version, &reference.kind, &reference.name)
                .await?
                .ok_or_else(|| {
                    ControllerError::Hostname(format!(
                        "failed to fetch next owner in chain: {} {}/{} not found",
                        reference.kind, namespace, reference.name
                    ))
                })?;
        }

        Err(ControllerError::Hostname(format!(
            "empty owner chain for claim {}/{}",
            namespace,
            claim.name_any()
        )))
    }
}

/// Breadth-first search of the owner graph for a target kind
#[derive(Debug, Clone)]
pub struct SearchResolver {
    target: GroupKind,
    max_depth: usize,
}

impl SearchResolver {
    pub fn new(target: GroupKind, max_depth: usize) -> Self {
        Self {
            target,
            max_depth: if max_depth == 0 { DEFAULT_MAX_DEPTH } else { max_depth },
        }
    }
}

/// Machine-like kinds first, then infrastructure references, otherwise stable
fn explore_order(references: &mut [OwnerReference]) {
    references.sort_by_key(|r| {
        (
            !r.kind.contains("Machine"),
            !r.api_version.starts_with("infrastructure"),
        )
    });
}

#[async_trait]
impl HostnameResolver for SearchResolver {
    async fn resolve(&self, kube: &dyn KubeClientTrait, claim: &IPAddressClaim) -> Result<String, ControllerError> {
        let namespace = claim.namespace().unwrap_or_default();
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        let mut queue: VecDeque<(Vec<OwnerReference>, usize)> = VecDeque::new();
        queue.push_back((claim.owner_references().to_vec(), 1));

        while let Some((mut references, depth)) = queue.pop_front() {
            if let Some(found) = references.iter().find(|r| self.target.matches(r)) {
                return Ok(found.name.clone());
            }
            if depth >= self.max_depth {
                continue;
            }

            explore_order(&mut references);
            for reference in references {
                let identity = (reference.api_version.clone(), reference.kind.clone(), reference.name.clone());
                if !seen.insert(identity) {
                    continue;
                }
                // owners that vanished are dead ends, not failures
                if let Some(next) = kube
                    .get_owner_references(&namespace, &reference.api_version, &reference.kind, &reference.name)
                    .await?
                {
                    queue.push_back((next, depth + 1));
                }
            }
        }

        Err(ControllerError::Hostname(format!(
            "failed to find owner reference with kind '{}' within {} levels for claim {}/{}",
            self.target,
            self.max_depth,
            namespace,
            claim.name_any()
        )))
    }
}

/// Resolver for a claim, picked by the kind of its first owner
pub fn resolver_for(claim: &IPAddressClaim) -> Box<dyn HostnameResolver> {
    let machine = GroupKind::new(CLUSTER_API_GROUP, "Machine");
    match claim.owner_references().first().map(|r| r.kind.as_str()) {
        Some("Metal3Data") => Box::new(ChainResolver::new(vec![
            GroupKind::new(INFRASTRUCTURE_GROUP, "Metal3Data"),
            GroupKind::new(INFRASTRUCTURE_GROUP, "Metal3Machine"),
            machine,
        ])),
        Some("VSphereVM") => Box::new(ChainResolver::new(vec![
            GroupKind::new(INFRASTRUCTURE_GROUP, "VSphereVM"),
            GroupKind::new(INFRASTRUCTURE_GROUP, "VSphereMachine"),
            machine,
        ])),
        _ => Box::new(SearchResolver::new(machine, DEFAULT_MAX_DEPTH)),
    }
}
