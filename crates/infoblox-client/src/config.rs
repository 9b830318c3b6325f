//! Connection configuration
//!
//! Built by the controller from an `InfobloxInstance` and its credentials Secret. Two
//! configs compare equal exactly when the same client can serve both.

use crate::error::InfobloxError;
use std::collections::BTreeMap;
use std::fmt;

/// Secret key holding the WAPI username
pub const SECRET_KEY_USERNAME: &str = "username";
/// Secret key holding the WAPI password
pub const SECRET_KEY_PASSWORD: &str = "password";
/// Secret key holding a PEM client certificate
pub const SECRET_KEY_CLIENT_CERT: &str = "clientCert";
/// Secret key holding the PEM private key for `clientCert`
pub const SECRET_KEY_CLIENT_KEY: &str = "clientKey";

const DEFAULT_PORT: &str = "443";

/// Where and how to reach the grid
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostConfig {
    /// Hostname, optionally with `:port`
    pub host: String,
    /// Port used when `host` carries none
    pub port: Option<String>,
    /// WAPI version (e.g., "2.12")
    pub version: String,
    pub disable_tls_verification: bool,
    /// PEM CA bundle used instead of the built-in roots
    pub custom_ca_path: Option<String>,
}

impl HostConfig {
    /// WAPI base URL, e.g. `https://infoblox:443/wapi/v2.12`
    pub fn base_url(&self) -> String {
        let (host, port) = match self.host.split_once(':') {
            Some((host, port)) => (host, port),
            None => (
                self.host.as_str(),
                self.port.as_deref().filter(|p| !p.is_empty()).unwrap_or(DEFAULT_PORT),
            ),
        };
        format!("https://{}:{}/wapi/v{}", host, port, self.version.trim_start_matches('v'))
    }
}

/// Credentials; exactly one of the two pairs is populated
#[derive(Clone, PartialEq, Eq, Default)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

impl AuthConfig {
    /// Whether username/password authentication is configured
    pub fn has_basic_auth(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Whether client certificate authentication is configured
    pub fn has_client_cert(&self) -> bool {
        !self.client_cert.is_empty() && !self.client_key.is_empty()
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_cert", &(!self.client_cert.is_empty()))
            .field("client_key", &"<redacted>")
            .finish()
    }
}

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub host: HostConfig,
    pub auth: AuthConfig,
}

/// Build credentials from Secret data
///
/// Username/password wins when both pairs are complete. A Secret without any complete pair
/// is a configuration error.
pub fn auth_config_from_secret_data(data: &BTreeMap<String, Vec<u8>>) -> Result<AuthConfig, InfobloxError> {
    let text = |key: &str| {
        data.get(key)
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default()
    };
    let bytes = |key: &str| data.get(key).cloned().unwrap_or_default();

    let username = text(SECRET_KEY_USERNAME);
    let password = text(SECRET_KEY_PASSWORD);
    if !username.is_empty() && !password.is_empty() {
        return Ok(AuthConfig {
            username,
            password,
            ..Default::default()
        });
    }

    let client_cert = bytes(SECRET_KEY_CLIENT_CERT);
    let client_key = bytes(SECRET_KEY_CLIENT_KEY);
    if !client_cert.is_empty() && !client_key.is_empty() {
        return Ok(AuthConfig {
            client_cert,
            client_key,
            ..Default::default()
        });
    }

    Err(InfobloxError::InvalidConfig(
        "no usable pair of credentials found. provide either username/password or clientCert/clientKey".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(pairs: &[(&str, &str)]) -> BTreeMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_username_password_preferred() {
        let auth = auth_config_from_secret_data(&secret(&[
            ("username", "admin"),
            ("password", "secret"),
            ("clientCert", "CERT"),
            ("clientKey", "KEY"),
        ]))
        .unwrap();
        assert!(auth.has_basic_auth());
        assert!(!auth.has_client_cert());
    }

    #[test]
    fn test_client_cert_pair() {
        let auth = auth_config_from_secret_data(&secret(&[
            ("username", "admin"),
            ("clientCert", "CERT"),
            ("clientKey", "KEY"),
        ]))
        .unwrap();
        assert!(auth.has_client_cert());
        assert!(auth.username.is_empty());
    }

    #[test]
    fn test_incomplete_pairs_rejected() {
        let err = auth_config_from_secret_data(&secret(&[("username", "admin"), ("clientKey", "KEY")]))
            .unwrap_err();
        assert!(matches!(err, InfobloxError::InvalidConfig(_)));
        assert!(auth_config_from_secret_data(&BTreeMap::new()).is_err());
    }

    #[test]
    fn test_base_url_port_handling() {
        let mut host = HostConfig {
            host: "infoblox.example.com".to_string(),
            port: None,
            version: "2.12".to_string(),
            ..Default::default()
        };
        assert_eq!(host.base_url(), "https://infoblox.example.com:443/wapi/v2.12");

        host.port = Some("8443".to_string());
        assert_eq!(host.base_url(), "https://infoblox.example.com:8443/wapi/v2.12");

        host.host = "10.1.1.1:9443".to_string();
        assert_eq!(host.base_url(), "https://10.1.1.1:9443/wapi/v2.12");
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let auth = AuthConfig {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
            ..Default::default()
        };
        let printed = format!("{:?}", Config { host: HostConfig::default(), auth });
        assert!(printed.contains("admin"));
        assert!(!printed.contains("hunter2"));
    }
}
