//! Infoblox claim handler
//!
//! Binds a claim to its `InfobloxIPPool`, the pool's `InfobloxInstance` and a backend client,
//! then allocates from the pool's subnets in declared order. The first subnet that yields an
//! address wins; a failing subnet is logged and the next one is tried. A bound claim's own subnet
//! goes first. Release finds the host record by the hostname annotation written at allocation.

use super::claim::{ClaimHandler, ProviderAdapter};
use super::connection::connect_instance;
use crate::error::ControllerError;
use crate::hostname::resolver_for;
use crate::kube_client::KubeClientTrait;
use async_trait::async_trait;
use crds::{
    ADDRESS_ALLOCATION_FAILED_REASON, ConditionSeverity, HOSTNAME_ANNOTATION, HasConditions, INFOBLOX_POOL_KIND,
    IPAM_GROUP, IPAddress, IPAddressClaim, InfobloxIPPool, InfobloxInstance, POOL_NOT_READY_REASON,
};
use infoblox_client::{ClientManager, IpamClient};
use ipnet::IpNet;
use kube::ResourceExt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Serves claims that reference an `InfobloxIPPool`
pub struct InfobloxProviderAdapter {
    kube: Arc<dyn KubeClientTrait>,
    clients: Arc<ClientManager>,
    operator_namespace: String,
}

impl InfobloxProviderAdapter {
    pub fn new(kube: Arc<dyn KubeClientTrait>, clients: Arc<ClientManager>, operator_namespace: String) -> Self {
        Self {
            kube,
            clients,
            operator_namespace,
        }
    }
}

impl ProviderAdapter for InfobloxProviderAdapter {
    type Handler = InfobloxClaimHandler;

    fn pool_group_kind(&self) -> (&'static str, &'static str) {
        (IPAM_GROUP, INFOBLOX_POOL_KIND)
    }

    fn claim_handler_for(&self, _claim: &IPAddressClaim) -> InfobloxClaimHandler {
        InfobloxClaimHandler {
            kube: Arc::clone(&self.kube),
            clients: Arc::clone(&self.clients),
            operator_namespace: self.operator_namespace.clone(),
            pool: None,
            connection: None,
        }
    }
}

/// Per-reconcile handler; holds what `fetch_pool` resolved
pub struct InfobloxClaimHandler {
    kube: Arc<dyn KubeClientTrait>,
    clients: Arc<ClientManager>,
    operator_namespace: String,
    pool: Option<InfobloxIPPool>,
    connection: Option<(InfobloxInstance, Arc<dyn IpamClient>)>,
}

impl InfobloxClaimHandler {
    fn connected(&self) -> Result<(&InfobloxIPPool, &InfobloxInstance, &dyn IpamClient), ControllerError> {
        match (&self.pool, &self.connection) {
            (Some(pool), Some((instance, client))) => Ok((pool, instance, client.as_ref())),
            _ => Err(ControllerError::PoolNotReady("pool has not been fetched".to_string())),
        }
    }

    /// Annotation first; the claim name when DNS is off; otherwise `<machine>.<zone>`
    async fn hostname(&self, claim: &IPAddressClaim, pool: &InfobloxIPPool) -> Result<String, ControllerError> {
        if let Some(hostname) = claim.annotations().get(HOSTNAME_ANNOTATION).filter(|h| !h.is_empty()) {
            return Ok(hostname.clone());
        }
        let Some(zone) = pool.dns_zone() else {
            return Ok(claim.name_any());
        };
        let short = resolver_for(claim).resolve(self.kube.as_ref(), claim).await?;
        Ok(format!("{}.{}", short, zone))
    }
}

#[async_trait]
impl ClaimHandler for InfobloxClaimHandler {
    type Pool = InfobloxIPPool;

    async fn fetch_pool(&mut self, claim: &mut IPAddressClaim) -> Result<bool, ControllerError> {
        let namespace = claim.namespace().unwrap_or_default();
        let pool_name = claim.spec.pool_ref.name.clone();

        let Some(pool) = self.kube.get_pool(&namespace, &pool_name).await? else {
            return Ok(false);
        };

        let connected = connect_instance(
            self.kube.as_ref(),
            &self.clients,
            &pool.spec.instance.name,
            &self.operator_namespace,
        )
        .await;
        self.pool = Some(pool);

        match connected {
            Ok(connection) => {
                self.connection = Some(connection);
                Ok(true)
            }
            Err(e) => {
                let message = format!("pool {}/{} is not ready: {}", namespace, pool_name, e);
                warn!("IPAddressClaim {}/{}: {}", namespace, claim.name_any(), message);
                claim.mark_not_ready(POOL_NOT_READY_REASON, ConditionSeverity::Error, message.clone());
                Err(ControllerError::PoolNotReady(message))
            }
        }
    }

    async fn ensure_address(
        &mut self,
        claim: &mut IPAddressClaim,
        address: &mut IPAddress,
    ) -> Result<(), ControllerError> {
        let (pool, instance, client) = self.connected()?;
        let hostname = self.hostname(claim, pool).await?;
        let zone = pool.dns_zone();
        let network_view = pool.network_view(instance);
        let dns_view = pool.dns_view(instance);

        // a bound claim keeps the subnet it already has an address in
        let current: Option<IpAddr> = address.spec.address.parse().ok();
        let mut subnets: Vec<_> = pool.spec.subnets.iter().collect();
        subnets.sort_by_key(|subnet| {
            let holds_current = subnet
                .cidr
                .parse::<IpNet>()
                .is_ok_and(|cidr| current.is_some_and(|ip| cidr.contains(&ip)));
            !holds_current
        });

        let mut last_error = None;
        for subnet in subnets {
            let cidr: IpNet = match subnet.cidr.parse() {
                Ok(cidr) => cidr,
                Err(e) => {
                    warn!("Skipping invalid subnet {} of pool {}: {}", subnet.cidr, pool.name_any(), e);
                    last_error = Some(format!("invalid subnet {}: {}", subnet.cidr, e));
                    continue;
                }
            };

            match client
                .get_or_allocate_address(&network_view, &dns_view, &cidr, &hostname, zone)
                .await
            {
                Ok(ip) => {
                    address.spec.address = ip.to_string();
                    address.spec.prefix = i32::from(cidr.prefix_len());
                    address.spec.gateway = subnet.gateway.clone();

                    // release looks the host record up by this name only
                    claim
                        .annotations_mut()
                        .insert(HOSTNAME_ANNOTATION.to_string(), hostname.clone());
                    claim.mark_ready(None, None);
                    info!("Allocated {}/{} for host {} from subnet {}", ip, cidr.prefix_len(), hostname, cidr);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Could not allocate address for host {} in subnet {}: {}", hostname, cidr, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        let message = format!(
            "could not allocate address: {}",
            last_error.unwrap_or_else(|| "pool has no subnets".to_string())
        );
        claim.mark_not_ready(ADDRESS_ALLOCATION_FAILED_REASON, ConditionSeverity::Error, message.clone());
        Err(ControllerError::AllocationFailed(message))
    }

    async fn release_address(&mut self, claim: &mut IPAddressClaim) -> Result<(), ControllerError> {
        let (pool, instance, client) = self.connected()?;
        let Some(hostname) = claim
            .annotations()
            .get(HOSTNAME_ANNOTATION)
            .filter(|h| !h.is_empty())
            .cloned()
        else {
            debug!(
                "IPAddressClaim {}/{} has no hostname annotation, nothing was allocated",
                claim.namespace().unwrap_or_default(),
                claim.name_any()
            );
            return Ok(());
        };
        let network_view = pool.network_view(instance);
        let dns_view = pool.dns_view(instance);

        let mut last_error = None;
        for subnet in &pool.spec.subnets {
            let Ok(cidr) = subnet.cidr.parse::<IpNet>() else {
                warn!("Skipping invalid subnet {} of pool {}", subnet.cidr, pool.name_any());
                continue;
            };
            match client.release_address(&network_view, &dns_view, &cidr, &hostname).await {
                Ok(()) => info!("Released address of host {} in subnet {}", hostname, cidr),
                Err(e) if e.is_not_found() => {
                    debug!("No address of host {} in subnet {}", hostname, cidr);
                }
                Err(e) => {
                    error!("Failed to release address of host {} in subnet {}: {}", hostname, cidr, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e.context(format!("unable to release address of host {}", hostname)).into()),
            None => Ok(()),
        }
    }

    fn pool(&self) -> Option<&InfobloxIPPool> {
        self.pool.as_ref()
    }
}
