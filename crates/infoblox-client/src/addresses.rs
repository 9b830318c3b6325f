//! Host-record address allocation
//!
//! Every hostname owns at most one `record:host`. Allocating in a subnet appends a
//! next-available placeholder to that record; releasing removes the subnet's address and
//! deletes the record once it is empty. Both operations re-read before they write, so a
//! retry after a partial failure converges instead of allocating twice.

use crate::error::{InfobloxError, ResultExt};
use crate::infoblox_trait::InfobloxClientTrait;
use crate::models::HostRecord;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::info;

/// Idempotent address operations used by the claim handler
#[async_trait::async_trait]
pub trait IpamClient: Send + Sync {
    /// WAPI base URL of the backing grid
    fn base_url(&self) -> &str;

    /// Address of `hostname` inside `subnet`, allocating one if the host has none there
    async fn get_or_allocate_address(
        &self,
        network_view: &str,
        dns_view: &str,
        subnet: &IpNet,
        hostname: &str,
        zone: Option<&str>,
    ) -> Result<IpAddr, InfobloxError>;

    /// Give back the address `hostname` holds inside `subnet`; a no-op when there is none
    async fn release_address(
        &self,
        network_view: &str,
        dns_view: &str,
        subnet: &IpNet,
        hostname: &str,
    ) -> Result<(), InfobloxError>;

    async fn check_network_view_exists(&self, network_view: &str) -> Result<bool, InfobloxError>;

    async fn check_dns_view_exists(&self, dns_view: &str) -> Result<bool, InfobloxError>;

    async fn check_network_exists(&self, network_view: &str, subnet: &IpNet) -> Result<bool, InfobloxError>;
}

/// [`IpamClient`] on top of any [`InfobloxClientTrait`]
#[derive(Debug, Clone)]
pub struct HostRecordIpam<C> {
    client: C,
}

impl<C: InfobloxClientTrait> HostRecordIpam<C> {
    /// Wrap a WAPI client
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// The wrapped WAPI client
    pub fn client(&self) -> &C {
        &self.client
    }

    async fn find_host_record(&self, hostname: &str) -> Result<Option<HostRecord>, InfobloxError> {
        match self.client.get_host_record(hostname).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Submit the record and return it as stored by the backend
    async fn create_or_update(&self, mut record: HostRecord) -> Result<HostRecord, InfobloxError> {
        let reference = match record.reference.clone().filter(|r| !r.is_empty()) {
            None => {
                info!("Creating Infoblox host record {}", record.name);
                self.client
                    .create_host_record(&record)
                    .await
                    .context("failed to create Infoblox host record")?
            }
            Some(reference) => {
                record.prepare_for_update();
                info!("Updating Infoblox host record {}", record.name);
                self.client
                    .update_host_record(&reference, &record)
                    .await
                    .context("failed to update Infoblox host record")?
            }
        };

        self.client
            .get_host_record_by_ref(&reference)
            .await
            .context("failed to fetch Infoblox host record")
    }
}

/// Point the record back at its views before writing it
///
/// WAPI does not always report the views of a fetched host record, and updates by reference
/// fail without them. The DNS view only matters (and is only accepted) when DNS is enabled.
fn restamp_views(record: &mut HostRecord, network_view: &str, dns_view: &str) {
    record.network_view = Some(network_view.to_string());
    if record.dns_enabled() && !dns_view.is_empty() {
        record.view = Some(dns_view.to_string());
    }
}

fn not_found_to_false(result: Result<(), InfobloxError>) -> Result<bool, InfobloxError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait::async_trait]
impl<C: InfobloxClientTrait> IpamClient for HostRecordIpam<C> {
    fn base_url(&self) -> &str {
        self.client.base_url()
    }

    async fn get_or_allocate_address(
        &self,
        network_view: &str,
        dns_view: &str,
        subnet: &IpNet,
        hostname: &str,
        zone: Option<&str>,
    ) -> Result<IpAddr, InfobloxError> {
        let existing = self
            .find_host_record(hostname)
            .await
            .context("failed to get Infoblox host record")?;

        let mut record = match existing {
            Some(record) => {
                if let Some(address) = record.address_in(subnet) {
                    return Ok(address);
                }
                record
            }
            None => HostRecord::new(hostname, network_view, dns_view, zone),
        };

        record.push_next_available(subnet, network_view);
        restamp_views(&mut record, network_view, dns_view);

        let stored = self.create_or_update(record).await?;
        stored.address_in(subnet).ok_or_else(|| {
            InfobloxError::AllocationInconsistent(format!(
                "host record {} does not contain an address in {}",
                hostname, subnet
            ))
        })
    }

    async fn release_address(
        &self,
        network_view: &str,
        dns_view: &str,
        subnet: &IpNet,
        hostname: &str,
    ) -> Result<(), InfobloxError> {
        let Some(mut record) = self
            .find_host_record(hostname)
            .await
            .context("failed to get Infoblox host record")?
        else {
            return Ok(());
        };

        let Some(released) = record.remove_address_in(subnet) else {
            return Ok(());
        };
        let reference = record
            .reference
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| InfobloxError::Api(format!("host record {} has no reference", hostname)))?;

        if !record.has_addresses() {
            info!("Deleting Infoblox host record {} (released {})", hostname, released);
            return self
                .client
                .delete_host_record(&reference)
                .await
                .context("failed to delete Infoblox host record");
        }

        restamp_views(&mut record, network_view, dns_view);
        record.prepare_for_update();
        info!("Updating Infoblox host record {} (released {})", hostname, released);
        self.client
            .update_host_record(&reference, &record)
            .await
            .context("failed to update Infoblox host record")?;
        Ok(())
    }

    async fn check_network_view_exists(&self, network_view: &str) -> Result<bool, InfobloxError> {
        not_found_to_false(self.client.get_network_view(network_view).await.map(|_| ()))
    }

    async fn check_dns_view_exists(&self, dns_view: &str) -> Result<bool, InfobloxError> {
        not_found_to_false(self.client.get_dns_view(dns_view).await.map(|_| ()))
    }

    async fn check_network_exists(&self, network_view: &str, subnet: &IpNet) -> Result<bool, InfobloxError> {
        not_found_to_false(self.client.get_network(network_view, subnet).await.map(|_| ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockInfobloxClient, MockOperation};

    fn net(cidr: &str) -> IpNet {
        cidr.parse().unwrap()
    }

    fn setup() -> (MockInfobloxClient, HostRecordIpam<MockInfobloxClient>) {
        let mock = MockInfobloxClient::new("https://infoblox.test/wapi/v2.12");
        mock.add_network_view("default");
        mock.add_dns_view("default");
        mock.add_network("default", "10.0.0.0/24");
        mock.add_network("default", "10.0.1.0/24");
        mock.add_network("default", "2001:db8::/64");
        mock.reserve("10.0.0.1");
        mock.reserve("10.0.1.1");
        (mock.clone(), HostRecordIpam::new(mock))
    }

    #[tokio::test]
    async fn test_allocates_next_available() {
        let (mock, ipam) = setup();
        let addr = ipam
            .get_or_allocate_address("default", "default", &net("10.0.0.0/24"), "test", None)
            .await
            .unwrap();

        assert_eq!(addr, "10.0.0.2".parse::<IpAddr>().unwrap());
        let record = mock.host_record("test").unwrap();
        assert_eq!(record.ipv4addrs.len(), 1);
        assert_eq!(record.configure_for_dns, Some(false));
    }

    #[tokio::test]
    async fn test_get_or_allocate_is_idempotent() {
        let (mock, ipam) = setup();
        let subnet = net("10.0.0.0/24");
        let first = ipam
            .get_or_allocate_address("default", "default", &subnet, "test", None)
            .await
            .unwrap();
        let mutations = mock.mutation_count();

        let second = ipam
            .get_or_allocate_address("default", "default", &subnet, "test", None)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn test_one_record_per_hostname_across_subnets_and_families() {
        let (mock, ipam) = setup();
        let v4a = ipam
            .get_or_allocate_address("default", "default", &net("10.0.0.0/24"), "host.example.com", Some("example.com"))
            .await
            .unwrap();
        let v4b = ipam
            .get_or_allocate_address("default", "default", &net("10.0.1.0/24"), "host.example.com", Some("example.com"))
            .await
            .unwrap();
        let v6 = ipam
            .get_or_allocate_address("default", "default", &net("2001:db8::/64"), "host.example.com", Some("example.com"))
            .await
            .unwrap();

        assert_eq!(v4a, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(v4b, "10.0.1.2".parse::<IpAddr>().unwrap());
        assert!(v6.is_ipv6());
        assert_eq!(mock.host_record_count(), 1);

        let record = mock.host_record("host.example.com").unwrap();
        assert_eq!(record.ipv4addrs.len(), 2);
        assert_eq!(record.ipv6addrs.len(), 1);
        assert_eq!(record.view.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_release_without_allocation_is_noop() {
        let (mock, ipam) = setup();
        ipam.release_address("default", "default", &net("10.0.0.0/24"), "missing")
            .await
            .unwrap();
        assert_eq!(mock.mutation_count(), 0);

        ipam.get_or_allocate_address("default", "default", &net("10.0.0.0/24"), "test", None)
            .await
            .unwrap();
        let mutations = mock.mutation_count();
        ipam.release_address("default", "default", &net("10.0.1.0/24"), "test")
            .await
            .unwrap();
        assert_eq!(mock.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn test_release_last_address_deletes_record() {
        let (mock, ipam) = setup();
        let subnet = net("10.0.0.0/24");
        ipam.get_or_allocate_address("default", "default", &subnet, "test", None)
            .await
            .unwrap();

        ipam.release_address("default", "default", &subnet, "test").await.unwrap();

        assert!(mock.host_record("test").is_none());
    }

    #[tokio::test]
    async fn test_release_keeps_remaining_addresses() {
        let (mock, ipam) = setup();
        for cidr in ["10.0.0.0/24", "10.0.1.0/24", "2001:db8::/64"] {
            ipam.get_or_allocate_address("default", "default", &net(cidr), "test", None)
                .await
                .unwrap();
        }

        ipam.release_address("default", "default", &net("10.0.0.0/24"), "test")
            .await
            .unwrap();

        let record = mock.host_record("test").unwrap();
        assert_eq!(record.ipv4addrs.len(), 1);
        assert_eq!(record.ipv4addrs[0].ipv4addr, "10.0.1.2");
        assert_eq!(record.ipv6addrs.len(), 1);
    }

    #[tokio::test]
    async fn test_released_address_is_reusable() {
        let (_mock, ipam) = setup();
        let subnet = net("10.0.0.0/24");
        let first = ipam
            .get_or_allocate_address("default", "default", &subnet, "a", None)
            .await
            .unwrap();
        ipam.release_address("default", "default", &subnet, "a").await.unwrap();

        let second = ipam
            .get_or_allocate_address("default", "default", &subnet, "b", None)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_exhausted_subnet_errors() {
        let (mock, ipam) = setup();
        mock.set_exhausted("10.0.0.0/24");

        let err = ipam
            .get_or_allocate_address("default", "default", &net("10.0.0.0/24"), "test", None)
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
        assert!(mock.host_record("test").is_none());
    }

    #[tokio::test]
    async fn test_missing_address_after_write_is_inconsistent() {
        let (mock, ipam) = setup();
        mock.set_drop_allocations(true);

        let err = ipam
            .get_or_allocate_address("default", "default", &net("10.0.0.0/24"), "test", None)
            .await
            .unwrap_err();
        assert!(matches!(err, InfobloxError::AllocationInconsistent(_)));
    }

    #[tokio::test]
    async fn test_backend_errors_carry_context() {
        let (mock, ipam) = setup();
        mock.fail_on(MockOperation::GetHostRecord, "connection reset");

        let err = ipam
            .get_or_allocate_address("default", "default", &net("10.0.0.0/24"), "test", None)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to get Infoblox host record"));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_existence_checks() {
        let (_mock, ipam) = setup();
        assert!(ipam.check_network_view_exists("default").await.unwrap());
        assert!(!ipam.check_network_view_exists("lab").await.unwrap());
        assert!(ipam.check_dns_view_exists("default").await.unwrap());
        assert!(!ipam.check_dns_view_exists("default.lab").await.unwrap());
        assert!(ipam.check_network_exists("default", &net("10.0.1.0/24")).await.unwrap());
        assert!(!ipam.check_network_exists("default", &net("10.9.0.0/24")).await.unwrap());
    }
}
