//! InfobloxClient trait for mocking
//!
//! This trait abstracts the WAPI operations the allocation engine needs so unit tests can
//! run against [`crate::MockInfobloxClient`] instead of a grid.

use crate::error::InfobloxError;
use crate::models::*;
use ipnet::IpNet;

/// Trait for Infoblox WAPI operations
///
/// Lookups return [`InfobloxError::NotFound`] when the object does not exist.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait InfobloxClientTrait: Send + Sync {
    /// Get the WAPI base URL
    fn base_url(&self) -> &str;

    // Views
    async fn get_network_view(&self, name: &str) -> Result<NetworkView, InfobloxError>;
    async fn get_dns_view(&self, name: &str) -> Result<DnsView, InfobloxError>;

    // Networks
    async fn get_network(&self, network_view: &str, cidr: &IpNet) -> Result<Network, InfobloxError>;
    async fn create_network(&self, network_view: &str, cidr: &IpNet, comment: Option<&str>) -> Result<Network, InfobloxError>;
    async fn get_network_container(&self, network_view: &str, cidr: &IpNet) -> Result<Network, InfobloxError>;
    async fn create_network_container(&self, network_view: &str, cidr: &IpNet, comment: Option<&str>) -> Result<Network, InfobloxError>;

    // Host records
    /// Look a host record up by name only, across all views
    async fn get_host_record(&self, name: &str) -> Result<HostRecord, InfobloxError>;
    async fn get_host_record_by_ref(&self, reference: &str) -> Result<HostRecord, InfobloxError>;
    /// Create a host record, returning its reference
    async fn create_host_record(&self, record: &HostRecord) -> Result<String, InfobloxError>;
    /// Replace a host record's writable fields, returning its (possibly new) reference
    async fn update_host_record(&self, reference: &str, record: &HostRecord) -> Result<String, InfobloxError>;
    async fn delete_host_record(&self, reference: &str) -> Result<(), InfobloxError>;
}
