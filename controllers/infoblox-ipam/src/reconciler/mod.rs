//! Reconciliation logic for the IPAM resources.
//!
//! - `claim`: the provider-independent claim → address state machine
//! - `provider`: the Infoblox claim handler plugged into it
//! - `pool`: pool readiness and deletion protection
//! - `instance`: instance credential and view validation
//! - `connection`: building backend clients for an instance

pub mod claim;
pub mod connection;
pub mod instance;
pub mod pool;
pub mod provider;

#[cfg(test)]
mod pool_test;

use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::index::PoolIndex;
use crate::kube_client::KubeClientTrait;
use claim::{ClaimReconciler, ClaimState};
use crds::IPAddressClaim;
use infoblox_client::ClientManager;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use provider::InfobloxProviderAdapter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::default(),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles claims, pools and instances.
pub struct Reconciler {
    pub(crate) kube: Arc<dyn KubeClientTrait>,
    pub(crate) clients: Arc<ClientManager>,
    pub(crate) index: Arc<PoolIndex>,
    pub(crate) config: ControllerConfig,
    claims: ClaimReconciler<InfobloxProviderAdapter>,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("clients", &self.clients)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        kube: Arc<dyn KubeClientTrait>,
        clients: Arc<ClientManager>,
        index: Arc<PoolIndex>,
        config: ControllerConfig,
    ) -> Self {
        let adapter = InfobloxProviderAdapter::new(
            Arc::clone(&kube),
            Arc::clone(&clients),
            config.operator_namespace.clone(),
        );
        let claims = ClaimReconciler::new(Arc::clone(&kube), adapter, config.watch_filter.clone());
        Self {
            kube,
            clients,
            index,
            config,
            claims,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run the claim state machine for one claim
    pub async fn reconcile_claim(&self, claim: &IPAddressClaim) -> Result<ClaimState, ControllerError> {
        self.claims.reconcile(claim).await
    }

    /// Next backoff for a failing resource, with its error count
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                let backoff_seconds = state.backoff.next_backoff_seconds();
                (backoff_seconds, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (crate::backoff::MIN_BACKOFF_SECONDS, 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new)
                .increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}

pub(crate) fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Add a finalizer, returning whether it was missing
pub(crate) fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    if has_finalizer(meta, finalizer) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Remove a finalizer, returning whether it was present
pub(crate) fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    before != finalizers.len()
}

pub(crate) fn finalizers_of(meta: &ObjectMeta) -> Vec<String> {
    meta.finalizers.clone().unwrap_or_default()
}

/// Kubernetes writes against objects that vanished meanwhile are not failures
pub(crate) fn ignore_not_found(result: Result<(), ControllerError>) -> Result<(), ControllerError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
