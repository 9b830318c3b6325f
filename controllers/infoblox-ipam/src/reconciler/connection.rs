//! Backend connections for InfobloxInstances
//!
//! Turns an instance and its credentials Secret into a client [`Config`] and fetches the
//! matching client from the [`ClientManager`], keyed by instance name.

use crate::error::ControllerError;
use crate::kube_client::KubeClientTrait;
use crds::InfobloxInstance;
use infoblox_client::{ClientManager, Config, HostConfig, IpamClient, auth_config_from_secret_data};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Client configuration for an instance with the given credentials Secret data
pub fn config_for_instance(
    instance: &InfobloxInstance,
    secret_data: &BTreeMap<String, Vec<u8>>,
) -> Result<Config, ControllerError> {
    let auth = auth_config_from_secret_data(secret_data)?;
    Ok(Config {
        host: HostConfig {
            host: instance.spec.host.clone(),
            port: Some(instance.spec.port.clone()),
            version: instance.wapi_version().to_string(),
            disable_tls_verification: instance.spec.disable_tls_verification,
            custom_ca_path: instance.spec.custom_ca_path.clone().filter(|p| !p.is_empty()),
        },
        auth,
    })
}

/// Client for `instance`, reusing the cached one while its configuration is unchanged
pub async fn client_for_instance(
    kube: &dyn KubeClientTrait,
    clients: &ClientManager,
    instance: &InfobloxInstance,
    operator_namespace: &str,
) -> Result<Arc<dyn IpamClient>, ControllerError> {
    let secret_name = &instance.spec.credentials_secret_ref.name;
    let data = kube
        .get_secret_data(operator_namespace, secret_name)
        .await?
        .ok_or_else(|| {
            ControllerError::NotFound(format!(
                "credentials secret {}/{} of InfobloxInstance {}",
                operator_namespace,
                secret_name,
                instance.name_any()
            ))
        })?;
    let config = config_for_instance(instance, &data)?;
    Ok(clients.get_or_create(&instance.name_any(), &config)?)
}

/// Fetch the named instance and a client for it
pub async fn connect_instance(
    kube: &dyn KubeClientTrait,
    clients: &ClientManager,
    instance_name: &str,
    operator_namespace: &str,
) -> Result<(InfobloxInstance, Arc<dyn IpamClient>), ControllerError> {
    let instance = kube
        .get_instance(instance_name)
        .await?
        .ok_or_else(|| ControllerError::NotFound(format!("InfobloxInstance {}", instance_name)))?;
    let client = client_for_instance(kube, clients, &instance, operator_namespace).await?;
    Ok((instance, client))
}
