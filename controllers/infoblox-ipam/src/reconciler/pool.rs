//! InfobloxIPPool reconciler
//!
//! Keeps a pool from being deleted while claims still reference it and reports whether the
//! pool can serve allocations: instance reachable with valid credentials, network view, DNS
//! view and every subnet's network present.

use super::connection::connect_instance;
use super::{Reconciler, add_finalizer, finalizers_of, has_finalizer, ignore_not_found, remove_finalizer};
use crate::error::ControllerError;
use crds::{
    AUTHENTICATION_FAILED_REASON, ConditionSeverity, DNS_VIEW_NOT_FOUND_REASON, HasConditions, InfobloxIPPool,
    NETWORK_NOT_FOUND_REASON, NETWORK_VIEW_NOT_FOUND_REASON, PROTECT_POOL_FINALIZER, READY_REASON,
};
use ipnet::IpNet;
use kube::ResourceExt;
use tracing::{error, info, warn};

/// Outcome of a pool reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Ready,
    /// A readiness check failed; the reason is on the Ready condition
    NotReady,
    /// Deletion is held until no claim references the pool
    WaitingForClaims,
    /// Finalizer removed; the pool can go away
    Released,
}

impl Reconciler {
    pub async fn reconcile_pool(&self, pool: &InfobloxIPPool) -> Result<PoolState, ControllerError> {
        let namespace = pool.namespace().unwrap_or_default();
        let name = pool.name_any();
        info!("Reconciling InfobloxIPPool {}/{}", namespace, name);

        let mut pool = pool.clone();
        if pool.metadata.deletion_timestamp.is_some() {
            return self.reconcile_pool_delete(&mut pool, &namespace, &name).await;
        }

        if add_finalizer(&mut pool.metadata, PROTECT_POOL_FINALIZER) {
            self.kube
                .patch_pool_finalizers(&namespace, &name, &finalizers_of(&pool.metadata))
                .await?;
        }

        let previous_status = pool.status.clone();
        let result = self.validate_pool(&mut pool, &namespace).await;
        if pool.status != previous_status {
            if let Some(status) = &pool.status {
                ignore_not_found(self.kube.patch_pool_status(&namespace, &name, status).await)?;
            }
        }
        result
    }

    async fn reconcile_pool_delete(
        &self,
        pool: &mut InfobloxIPPool,
        namespace: &str,
        name: &str,
    ) -> Result<PoolState, ControllerError> {
        if !has_finalizer(&pool.metadata, PROTECT_POOL_FINALIZER) {
            return Ok(PoolState::Released);
        }

        // an empty answer means nothing until the first list has completed
        if !self.index.claims_synced() {
            info!("Claim index not synced yet, holding deletion of InfobloxIPPool {}/{}", namespace, name);
            return Ok(PoolState::WaitingForClaims);
        }

        let claims = self.index.claims_for_pool(namespace, name);
        if !claims.is_empty() {
            info!(
                "InfobloxIPPool {}/{} is still referenced by claims: {}",
                namespace,
                name,
                claims.join(", ")
            );
            return Ok(PoolState::WaitingForClaims);
        }

        if self.index.addresses_synced() {
            let addresses = self.index.addresses_for_pool(namespace, name);
            if !addresses.is_empty() {
                warn!(
                    "Releasing InfobloxIPPool {}/{} while addresses still reference it: {}",
                    namespace,
                    name,
                    addresses.join(", ")
                );
            }
        }

        remove_finalizer(&mut pool.metadata, PROTECT_POOL_FINALIZER);
        ignore_not_found(
            self.kube
                .patch_pool_finalizers(namespace, name, &finalizers_of(&pool.metadata))
                .await,
        )?;
        info!("InfobloxIPPool {}/{} released", namespace, name);
        Ok(PoolState::Released)
    }

    /// Run the readiness checks in order and set the Ready condition from the first failure
    async fn validate_pool(&self, pool: &mut InfobloxIPPool, namespace: &str) -> Result<PoolState, ControllerError> {
        let instance_name = pool.spec.instance.name.clone();
        let (instance, client) = match connect_instance(
            self.kube.as_ref(),
            &self.clients,
            &instance_name,
            &self.config.operator_namespace,
        )
        .await
        {
            Ok(connection) => connection,
            Err(e) => {
                error!("Client creation failed for InfobloxIPPool {}/{}: {}", namespace, pool.name_any(), e);
                pool.mark_not_ready(
                    AUTHENTICATION_FAILED_REASON,
                    ConditionSeverity::Error,
                    format!("client creation failed for instance {:?}: {}", instance_name, e),
                );
                return Err(e);
            }
        };

        let network_view = pool.network_view(&instance);
        match client.check_network_view_exists(&network_view).await {
            Ok(true) => {}
            Ok(false) => {
                pool.mark_not_ready(
                    NETWORK_VIEW_NOT_FOUND_REASON,
                    ConditionSeverity::Error,
                    format!("could not find network view {:?}", network_view),
                );
                return Ok(PoolState::NotReady);
            }
            Err(e) => {
                pool.mark_not_ready(
                    NETWORK_VIEW_NOT_FOUND_REASON,
                    ConditionSeverity::Warning,
                    format!("could not look up network view {:?}: {}", network_view, e),
                );
                return Err(e.into());
            }
        }

        let dns_view = pool.dns_view(&instance);
        match client.check_dns_view_exists(&dns_view).await {
            Ok(true) => {}
            Ok(false) => {
                pool.mark_not_ready(
                    DNS_VIEW_NOT_FOUND_REASON,
                    ConditionSeverity::Error,
                    format!("could not find DNS view {:?}", dns_view),
                );
                return Ok(PoolState::NotReady);
            }
            Err(e) => {
                pool.mark_not_ready(
                    DNS_VIEW_NOT_FOUND_REASON,
                    ConditionSeverity::Warning,
                    format!("could not look up DNS view {:?}: {}", dns_view, e),
                );
                return Err(e.into());
            }
        }

        let subnets: Vec<String> = pool.spec.subnets.iter().map(|s| s.cidr.clone()).collect();
        for cidr in subnets {
            let subnet: IpNet = match cidr.parse() {
                Ok(subnet) => subnet,
                Err(e) => {
                    let message = format!("invalid subnet {:?}: {}", cidr, e);
                    pool.mark_not_ready(NETWORK_NOT_FOUND_REASON, ConditionSeverity::Error, message.clone());
                    return Err(ControllerError::InvalidConfig(message));
                }
            };
            match client.check_network_exists(&network_view, &subnet).await {
                Ok(true) => {}
                Ok(false) => {
                    pool.mark_not_ready(
                        NETWORK_NOT_FOUND_REASON,
                        ConditionSeverity::Error,
                        format!("could not find network {:?} in view {:?}", cidr, network_view),
                    );
                    return Ok(PoolState::NotReady);
                }
                Err(e) => {
                    pool.mark_not_ready(
                        NETWORK_NOT_FOUND_REASON,
                        ConditionSeverity::Warning,
                        format!("could not look up network {:?} in view {:?}: {}", cidr, network_view, e),
                    );
                    return Err(e.into());
                }
            }
        }

        pool.mark_ready(Some(READY_REASON), Some("pool is ready".to_string()));
        Ok(PoolState::Ready)
    }
}
