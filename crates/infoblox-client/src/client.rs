//! Infoblox WAPI client
//!
//! Thin JSON-over-HTTPS client for the handful of WAPI objects the provider touches.
//! Objects are addressed as `{base_url}/{object}` for searches and `{base_url}/{_ref}` for
//! reads and mutations of a single object.

use crate::config::{AuthConfig, Config};
use crate::error::InfobloxError;
use crate::infoblox_trait::InfobloxClientTrait;
use crate::models::*;
use ipnet::IpNet;
use reqwest::{Certificate, Client, ClientBuilder, Identity, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Infoblox WAPI client
#[derive(Clone)]
pub struct InfobloxClient {
    client: Client,
    base_url: String,
    basic_auth: Option<(String, String)>,
}

impl std::fmt::Debug for InfobloxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfobloxClient")
            .field("base_url", &self.base_url)
            .field("basic_auth", &self.basic_auth.as_ref().map(|(user, _)| user))
            .finish_non_exhaustive()
    }
}

impl InfobloxClient {
    /// Create a client for the given configuration
    ///
    /// Reads the custom CA bundle, if configured, and fails with
    /// [`InfobloxError::InvalidConfig`] when it or the client certificate cannot be used.
    pub fn new(config: &Config) -> Result<Self, InfobloxError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(30));

        if config.host.disable_tls_verification {
            builder = builder.danger_accept_invalid_certs(true);
        } else if let Some(path) = config.host.custom_ca_path.as_deref().filter(|p| !p.is_empty()) {
            let pem = std::fs::read(path)
                .map_err(|e| InfobloxError::InvalidConfig(format!("failed to read CA bundle {}: {}", path, e)))?;
            let certs = Certificate::from_pem_bundle(&pem)
                .map_err(|e| InfobloxError::InvalidConfig(format!("invalid CA bundle {}: {}", path, e)))?;
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        let (builder, basic_auth) = Self::configure_auth(&config.auth, builder)?;
        let client = builder.build()?;

        Ok(Self {
            client,
            base_url: config.host.base_url(),
            basic_auth,
        })
    }

    fn configure_auth(
        auth: &AuthConfig,
        builder: ClientBuilder,
    ) -> Result<(ClientBuilder, Option<(String, String)>), InfobloxError> {
        if auth.has_basic_auth() {
            return Ok((builder, Some((auth.username.clone(), auth.password.clone()))));
        }
        if auth.has_client_cert() {
            let mut pem = auth.client_cert.clone();
            pem.push(b'\n');
            pem.extend_from_slice(&auth.client_key);
            let identity = Identity::from_pem(&pem)
                .map_err(|e| InfobloxError::InvalidConfig(format!("invalid client certificate: {}", e)))?;
            return Ok((builder.identity(identity), None));
        }
        Err(InfobloxError::InvalidConfig("no credentials configured".to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.basic_auth {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, InfobloxError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(InfobloxError::from_response(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            InfobloxError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                body.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Search `object` with the given filters
    async fn search<T: DeserializeOwned>(&self, object: &str, filters: &[(&str, &str)]) -> Result<Vec<T>, InfobloxError> {
        let query = filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{}?{}", self.url(object), query);
        debug!("Searching Infoblox: {}", url);
        self.send(self.client.get(&url)).await
    }

    /// Search and return the first match, or NotFound
    async fn search_one<T: DeserializeOwned>(&self, object: &str, filters: &[(&str, &str)]) -> Result<T, InfobloxError> {
        self.search(object, filters).await?.into_iter().next().ok_or_else(|| {
            let described = filters
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" ");
            InfobloxError::NotFound(format!("{} {}", object, described))
        })
    }

    /// Create an object, returning its reference
    async fn create<B: Serialize + Sync>(&self, object: &str, body: &B) -> Result<String, InfobloxError> {
        debug!("Creating Infoblox {}", object);
        self.send(self.client.post(self.url(object)).json(body)).await
    }

    async fn create_network_object(
        &self,
        object: &str,
        network_view: &str,
        cidr: &IpNet,
        comment: Option<&str>,
    ) -> Result<Network, InfobloxError> {
        let network = Network {
            reference: String::new(),
            network: cidr.to_string(),
            network_view: network_view.to_string(),
            comment: comment.map(str::to_string),
        };
        let reference = self.create(object, &network).await?;
        Ok(Network { reference, ..network })
    }
}

#[async_trait::async_trait]
impl InfobloxClientTrait for InfobloxClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_network_view(&self, name: &str) -> Result<NetworkView, InfobloxError> {
        self.search_one("networkview", &[("name", name)]).await
    }

    async fn get_dns_view(&self, name: &str) -> Result<DnsView, InfobloxError> {
        self.search_one("view", &[("name", name)]).await
    }

    async fn get_network(&self, network_view: &str, cidr: &IpNet) -> Result<Network, InfobloxError> {
        let network = cidr.to_string();
        self.search_one(network_object(cidr), &[("network", &network), ("network_view", network_view)])
            .await
    }

    async fn create_network(&self, network_view: &str, cidr: &IpNet, comment: Option<&str>) -> Result<Network, InfobloxError> {
        self.create_network_object(network_object(cidr), network_view, cidr, comment).await
    }

    async fn get_network_container(&self, network_view: &str, cidr: &IpNet) -> Result<Network, InfobloxError> {
        let network = cidr.to_string();
        self.search_one(
            network_container_object(cidr),
            &[("network", &network), ("network_view", network_view)],
        )
        .await
    }

    async fn create_network_container(&self, network_view: &str, cidr: &IpNet, comment: Option<&str>) -> Result<Network, InfobloxError> {
        self.create_network_object(network_container_object(cidr), network_view, cidr, comment).await
    }

    async fn get_host_record(&self, name: &str) -> Result<HostRecord, InfobloxError> {
        // No view filters: WAPI does not always report the view a host record was created in.
        self.search_one(
            HOST_RECORD_OBJECT,
            &[("name", name), ("_return_fields+", HOST_RECORD_RETURN_FIELDS)],
        )
        .await
    }

    async fn get_host_record_by_ref(&self, reference: &str) -> Result<HostRecord, InfobloxError> {
        let url = format!(
            "{}?_return_fields%2B={}",
            self.url(reference),
            urlencoding::encode(HOST_RECORD_RETURN_FIELDS)
        );
        debug!("Fetching Infoblox host record {}", reference);
        self.send(self.client.get(&url)).await
    }

    async fn create_host_record(&self, record: &HostRecord) -> Result<String, InfobloxError> {
        self.create(HOST_RECORD_OBJECT, record).await
    }

    async fn update_host_record(&self, reference: &str, record: &HostRecord) -> Result<String, InfobloxError> {
        debug!("Updating Infoblox host record {}", reference);
        self.send(self.client.put(self.url(reference)).json(record)).await
    }

    async fn delete_host_record(&self, reference: &str) -> Result<(), InfobloxError> {
        debug!("Deleting Infoblox host record {}", reference);
        let _: String = self.send(self.client.delete(self.url(reference))).await?;
        Ok(())
    }
}
