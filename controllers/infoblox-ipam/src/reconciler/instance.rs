//! InfobloxInstance reconciler
//!
//! Validates credentials and default views of an instance and keeps the client registry in
//! step with it: the cached client is evicted when the instance goes away or stops working.

use super::connection::client_for_instance;
use super::{Reconciler, ignore_not_found};
use crate::error::ControllerError;
use crds::{
    AUTHENTICATION_FAILED_REASON, CONFIGURATION_VALID_REASON, ConditionSeverity, DNS_VIEW_NOT_FOUND_REASON,
    HasConditions, InfobloxInstance, NETWORK_VIEW_NOT_FOUND_REASON,
};
use kube::ResourceExt;
use tracing::{info, warn};

/// Outcome of an instance reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Ready,
    /// Validation failed; the reason is on the Ready condition
    NotReady,
    Deleted,
}

impl Reconciler {
    pub async fn reconcile_instance(&self, instance: &InfobloxInstance) -> Result<InstanceState, ControllerError> {
        let name = instance.name_any();
        info!("Reconciling InfobloxInstance {}", name);

        if instance.metadata.deletion_timestamp.is_some() {
            self.clients.invalidate(&name);
            return Ok(InstanceState::Deleted);
        }

        let mut instance = instance.clone();
        let previous_status = instance.status.clone();
        let result = self.validate_instance(&mut instance).await;
        if !matches!(result, Ok(InstanceState::Ready)) {
            self.clients.invalidate(&name);
        }

        if instance.status != previous_status {
            if let Some(status) = &instance.status {
                ignore_not_found(self.kube.patch_instance_status(&name, status).await)?;
            }
        }
        result
    }

    async fn validate_instance(&self, instance: &mut InfobloxInstance) -> Result<InstanceState, ControllerError> {
        let name = instance.name_any();
        let client = match client_for_instance(
            self.kube.as_ref(),
            &self.clients,
            instance,
            &self.config.operator_namespace,
        )
        .await
        {
            Ok(client) => client,
            // missing or incomplete credentials only change when the Secret does
            Err(e) if e.is_not_found() || matches!(e, ControllerError::Infoblox(_)) => {
                warn!("InfobloxInstance {} has unusable credentials: {}", name, e);
                instance.mark_not_ready(AUTHENTICATION_FAILED_REASON, ConditionSeverity::Error, e.to_string());
                return Ok(InstanceState::NotReady);
            }
            Err(e) => return Err(e),
        };

        let network_view = instance.default_network_view().to_string();
        match client.check_network_view_exists(&network_view).await {
            Ok(true) => {}
            Ok(false) => {
                instance.mark_not_ready(
                    NETWORK_VIEW_NOT_FOUND_REASON,
                    ConditionSeverity::Error,
                    format!("could not find network view {:?}", network_view),
                );
                return Ok(InstanceState::NotReady);
            }
            Err(e) if e.is_authentication() => {
                instance.mark_not_ready(AUTHENTICATION_FAILED_REASON, ConditionSeverity::Error, e.to_string());
                return Ok(InstanceState::NotReady);
            }
            Err(e) => return Err(e.into()),
        }

        let dns_view = instance.default_dns_view();
        match client.check_dns_view_exists(&dns_view).await {
            Ok(true) => {}
            Ok(false) => {
                instance.mark_not_ready(
                    DNS_VIEW_NOT_FOUND_REASON,
                    ConditionSeverity::Error,
                    format!("could not find DNS view {:?}", dns_view),
                );
                return Ok(InstanceState::NotReady);
            }
            Err(e) => return Err(e.into()),
        }

        instance.mark_ready(Some(CONFIGURATION_VALID_REASON), None);
        Ok(InstanceState::Ready)
    }
}
