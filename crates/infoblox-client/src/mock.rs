//! Mock InfobloxClient for unit testing
//!
//! In-memory stand-in for a grid that follows WAPI semantics closely enough to exercise the
//! allocation engine: next-available placeholders are resolved on write, host records get
//! references and per-address host bindings, and updates carrying read-only fields are
//! rejected the way WAPI rejects them.

use crate::error::InfobloxError;
use crate::infoblox_trait::InfobloxClientTrait;
use crate::models::*;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ipnet::IpNet;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const NEXT_AVAILABLE_PREFIX: &str = "func:nextavailableip:";

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    GetNetworkView,
    GetDnsView,
    GetNetwork,
    CreateNetwork,
    GetHostRecord,
    GetHostRecordByRef,
    CreateHostRecord,
    UpdateHostRecord,
    DeleteHostRecord,
}

#[derive(Debug, Default)]
struct MockState {
    network_views: HashSet<String>,
    dns_views: HashSet<String>,
    networks: HashMap<(String, IpNet), Network>,
    containers: HashMap<(String, IpNet), Network>,
    // keyed by reference
    host_records: HashMap<String, HostRecord>,
    reserved: HashSet<IpAddr>,
    exhausted: HashSet<IpNet>,
    failures: HashMap<MockOperation, String>,
    mutations: usize,
    drop_allocations: bool,
    next_id: u64,
}

/// Mock InfobloxClient for testing
///
/// Clones share state, so a test can keep a handle for setup and assertions while the
/// engine owns another.
#[derive(Debug, Clone)]
pub struct MockInfobloxClient {
    base_url: String,
    state: Arc<Mutex<MockState>>,
}

impl MockInfobloxClient {
    /// Create a new, empty mock grid
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a network view (for test setup)
    pub fn add_network_view(&self, name: &str) {
        self.state().network_views.insert(name.to_string());
    }

    /// Add a DNS view (for test setup)
    pub fn add_dns_view(&self, name: &str) {
        self.state().dns_views.insert(name.to_string());
    }

    /// Add a network in a view (for test setup)
    ///
    /// # Panics
    /// If `cidr` is not valid CIDR notation.
    pub fn add_network(&self, network_view: &str, cidr: &str) {
        let cidr: IpNet = cidr.parse().expect("valid CIDR");
        let mut state = self.state();
        let id = next_id(&mut state);
        state.networks.insert(
            (network_view.to_string(), cidr),
            Network {
                reference: format!("{}/{}:{}/{}", network_object(&cidr), encode(id), cidr, network_view),
                network: cidr.to_string(),
                network_view: network_view.to_string(),
                comment: None,
            },
        );
    }

    /// Mark an address as taken outside of host records (e.g. a gateway)
    ///
    /// # Panics
    /// If `addr` is not a valid IP address.
    pub fn reserve(&self, addr: &str) {
        self.state().reserved.insert(addr.parse().expect("valid IP address"));
    }

    /// Make next-available resolution in `cidr` fail as if the network were full
    ///
    /// # Panics
    /// If `cidr` is not valid CIDR notation.
    pub fn set_exhausted(&self, cidr: &str) {
        self.state().exhausted.insert(cidr.parse().expect("valid CIDR"));
    }

    /// Let next-available resolution in `cidr` succeed again
    ///
    /// # Panics
    /// If `cidr` is not valid CIDR notation.
    pub fn clear_exhausted(&self, cidr: &str) {
        let cidr: IpNet = cidr.parse().expect("valid CIDR");
        self.state().exhausted.remove(&cidr);
    }

    /// Silently drop next-available placeholders instead of resolving them
    pub fn set_drop_allocations(&self, drop: bool) {
        self.state().drop_allocations = drop;
    }

    /// Make every call of `operation` fail with an API error until cleared
    pub fn fail_on(&self, operation: MockOperation, message: impl Into<String>) {
        self.state().failures.insert(operation, message.into());
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Stored host record by name
    pub fn host_record(&self, name: &str) -> Option<HostRecord> {
        self.state().host_records.values().find(|r| r.name == name).cloned()
    }

    /// Number of stored host records
    pub fn host_record_count(&self) -> usize {
        self.state().host_records.len()
    }

    /// Number of successful host record creates, updates and deletes
    pub fn mutation_count(&self) -> usize {
        self.state().mutations
    }
}

fn next_id(state: &mut MockState) -> u64 {
    state.next_id += 1;
    state.next_id
}

fn encode(id: u64) -> String {
    STANDARD.encode(format!("mock.object${}", id))
}

fn check_failure(state: &MockState, operation: MockOperation) -> Result<(), InfobloxError> {
    match state.failures.get(&operation) {
        Some(message) => Err(InfobloxError::Api(message.clone())),
        None => Ok(()),
    }
}

/// Zone a DNS-enabled host record lands in: everything after the first label
fn zone_of(name: &str) -> Option<String> {
    name.split_once('.').map(|(_, zone)| zone.to_string())
}

/// Addresses held by all records except `skip_ref`, plus reserved ones
fn used_addresses(state: &MockState, skip_ref: Option<&str>) -> HashSet<IpAddr> {
    let mut used = state.reserved.clone();
    for (reference, record) in &state.host_records {
        if Some(reference.as_str()) == skip_ref {
            continue;
        }
        used.extend(record.ipv4addrs.iter().filter_map(|a| a.ipv4addr.parse::<IpAddr>().ok()));
        used.extend(record.ipv6addrs.iter().filter_map(|a| a.ipv6addr.parse::<IpAddr>().ok()));
    }
    used
}

/// Resolve one address value; `Ok(None)` drops the entry
fn resolve(state: &MockState, value: &str, used: &mut HashSet<IpAddr>) -> Result<Option<String>, InfobloxError> {
    let Some(args) = value.strip_prefix(NEXT_AVAILABLE_PREFIX) else {
        let addr: IpAddr = value
            .parse()
            .map_err(|_| InfobloxError::Api(format!("Invalid IP address {}", value)))?;
        used.insert(addr);
        return Ok(Some(value.to_string()));
    };
    if state.drop_allocations {
        return Ok(None);
    }

    let (cidr, network_view) = args.split_once(',').unwrap_or((args, "default"));
    let cidr: IpNet = cidr
        .parse()
        .map_err(|_| InfobloxError::Api(format!("Invalid network {}", cidr)))?;
    if !state.networks.contains_key(&(network_view.to_string(), cidr)) {
        return Err(InfobloxError::Api(format!(
            "Cannot find network {} in network view {}",
            cidr, network_view
        )));
    }
    let exhausted = || InfobloxError::Api("Cannot find 1 available IP address(es) in this network".to_string());
    if state.exhausted.contains(&cidr) {
        return Err(exhausted());
    }

    let addr = cidr
        .hosts()
        .filter(|a| *a != cidr.network())
        .find(|a| !used.contains(a))
        .ok_or_else(exhausted)?;
    used.insert(addr);
    Ok(Some(addr.to_string()))
}

/// Resolve placeholders and bind every address to the record, the way WAPI stores them
fn materialize(state: &mut MockState, record: &mut HostRecord, skip_ref: Option<&str>) -> Result<(), InfobloxError> {
    let mut used = used_addresses(state, skip_ref);

    let mut ipv4addrs = Vec::new();
    for addr in &record.ipv4addrs {
        if let Some(value) = resolve(state, &addr.ipv4addr, &mut used)? {
            ipv4addrs.push(HostRecordIpv4Addr {
                ipv4addr: value,
                ..addr.clone()
            });
        }
    }
    let mut ipv6addrs = Vec::new();
    for addr in &record.ipv6addrs {
        if let Some(value) = resolve(state, &addr.ipv6addr, &mut used)? {
            ipv6addrs.push(HostRecordIpv6Addr {
                ipv6addr: value,
                ..addr.clone()
            });
        }
    }

    for addr in &mut ipv4addrs {
        let id = next_id(state);
        addr.reference = Some(format!("record:host_ipv4addr/{}:{}/{}", encode(id), addr.ipv4addr, record.name));
        addr.host = Some(record.name.clone());
    }
    for addr in &mut ipv6addrs {
        let id = next_id(state);
        addr.reference = Some(format!("record:host_ipv6addr/{}:{}/{}", encode(id), addr.ipv6addr, record.name));
        addr.host = Some(record.name.clone());
    }
    record.ipv4addrs = ipv4addrs;
    record.ipv6addrs = ipv6addrs;
    Ok(())
}

#[async_trait::async_trait]
impl InfobloxClientTrait for MockInfobloxClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_network_view(&self, name: &str) -> Result<NetworkView, InfobloxError> {
        let state = self.state();
        check_failure(&state, MockOperation::GetNetworkView)?;
        if !state.network_views.contains(name) {
            return Err(InfobloxError::NotFound(format!("networkview name={}", name)));
        }
        Ok(NetworkView {
            reference: format!("networkview/{}:{}/false", STANDARD.encode(name), name),
            name: name.to_string(),
        })
    }

    async fn get_dns_view(&self, name: &str) -> Result<DnsView, InfobloxError> {
        let state = self.state();
        check_failure(&state, MockOperation::GetDnsView)?;
        if !state.dns_views.contains(name) {
            return Err(InfobloxError::NotFound(format!("view name={}", name)));
        }
        Ok(DnsView {
            reference: format!("view/{}:{}/false", STANDARD.encode(name), name),
            name: name.to_string(),
        })
    }

    async fn get_network(&self, network_view: &str, cidr: &IpNet) -> Result<Network, InfobloxError> {
        let state = self.state();
        check_failure(&state, MockOperation::GetNetwork)?;
        state
            .networks
            .get(&(network_view.to_string(), *cidr))
            .cloned()
            .ok_or_else(|| InfobloxError::NotFound(format!("{} network={} network_view={}", network_object(cidr), cidr, network_view)))
    }

    async fn create_network(&self, network_view: &str, cidr: &IpNet, comment: Option<&str>) -> Result<Network, InfobloxError> {
        let mut state = self.state();
        check_failure(&state, MockOperation::CreateNetwork)?;
        let key = (network_view.to_string(), *cidr);
        if state.networks.contains_key(&key) {
            return Err(InfobloxError::Api(format!("The network {} already exists", cidr)));
        }
        let id = next_id(&mut state);
        let network = Network {
            reference: format!("{}/{}:{}/{}", network_object(cidr), encode(id), cidr, network_view),
            network: cidr.to_string(),
            network_view: network_view.to_string(),
            comment: comment.map(str::to_string),
        };
        state.networks.insert(key, network.clone());
        Ok(network)
    }

    async fn get_network_container(&self, network_view: &str, cidr: &IpNet) -> Result<Network, InfobloxError> {
        let state = self.state();
        check_failure(&state, MockOperation::GetNetwork)?;
        state
            .containers
            .get(&(network_view.to_string(), *cidr))
            .cloned()
            .ok_or_else(|| InfobloxError::NotFound(format!("{} network={}", network_container_object(cidr), cidr)))
    }

    async fn create_network_container(&self, network_view: &str, cidr: &IpNet, comment: Option<&str>) -> Result<Network, InfobloxError> {
        let mut state = self.state();
        check_failure(&state, MockOperation::CreateNetwork)?;
        let id = next_id(&mut state);
        let container = Network {
            reference: format!("{}/{}:{}/{}", network_container_object(cidr), encode(id), cidr, network_view),
            network: cidr.to_string(),
            network_view: network_view.to_string(),
            comment: comment.map(str::to_string),
        };
        state.containers.insert((network_view.to_string(), *cidr), container.clone());
        Ok(container)
    }

    async fn get_host_record(&self, name: &str) -> Result<HostRecord, InfobloxError> {
        let state = self.state();
        check_failure(&state, MockOperation::GetHostRecord)?;
        state
            .host_records
            .values()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| InfobloxError::NotFound(format!("{} name={}", HOST_RECORD_OBJECT, name)))
    }

    async fn get_host_record_by_ref(&self, reference: &str) -> Result<HostRecord, InfobloxError> {
        let state = self.state();
        check_failure(&state, MockOperation::GetHostRecordByRef)?;
        state
            .host_records
            .get(reference)
            .cloned()
            .ok_or_else(|| InfobloxError::NotFound(format!("Reference {} not found", reference)))
    }

    async fn create_host_record(&self, record: &HostRecord) -> Result<String, InfobloxError> {
        let mut state = self.state();
        check_failure(&state, MockOperation::CreateHostRecord)?;
        if record.name.is_empty() {
            return Err(InfobloxError::Api("Required field missing: name".to_string()));
        }
        if state.host_records.values().any(|r| r.name == record.name) {
            return Err(InfobloxError::Api(format!("The record '{}' already exists.", record.name)));
        }

        let mut stored = record.clone();
        materialize(&mut state, &mut stored, None)?;
        if stored.dns_enabled() {
            stored.zone = zone_of(&stored.name);
        }
        let id = next_id(&mut state);
        let reference = format!(
            "{}/{}:{}/{}",
            HOST_RECORD_OBJECT,
            encode(id),
            stored.name,
            stored.view.as_deref().unwrap_or(" ")
        );
        stored.reference = Some(reference.clone());
        state.host_records.insert(reference.clone(), stored);
        state.mutations += 1;
        Ok(reference)
    }

    async fn update_host_record(&self, reference: &str, record: &HostRecord) -> Result<String, InfobloxError> {
        let mut state = self.state();
        check_failure(&state, MockOperation::UpdateHostRecord)?;
        if record.zone.is_some() {
            return Err(InfobloxError::Api("Field is not writable: zone".to_string()));
        }
        if record.network_view.is_some() {
            return Err(InfobloxError::Api("Field is not writable: network_view".to_string()));
        }
        if record.ipv4addrs.iter().any(|a| a.host.is_some()) || record.ipv6addrs.iter().any(|a| a.host.is_some()) {
            return Err(InfobloxError::Api("Field is not allowed for update: host".to_string()));
        }
        let Some(existing) = state.host_records.get(reference).cloned() else {
            return Err(InfobloxError::NotFound(format!("Reference {} not found", reference)));
        };

        let mut stored = existing;
        stored.ipv4addrs = record.ipv4addrs.clone();
        stored.ipv6addrs = record.ipv6addrs.clone();
        if record.view.is_some() {
            stored.view = record.view.clone();
        }
        if record.configure_for_dns.is_some() {
            stored.configure_for_dns = record.configure_for_dns;
        }
        materialize(&mut state, &mut stored, Some(reference))?;
        state.host_records.insert(reference.to_string(), stored);
        state.mutations += 1;
        Ok(reference.to_string())
    }

    async fn delete_host_record(&self, reference: &str) -> Result<(), InfobloxError> {
        let mut state = self.state();
        check_failure(&state, MockOperation::DeleteHostRecord)?;
        if state.host_records.remove(reference).is_none() {
            return Err(InfobloxError::NotFound(format!("Reference {} not found", reference)));
        }
        state.mutations += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_rejects_read_only_fields() {
        let mock = MockInfobloxClient::new("https://mock");
        mock.add_network("default", "10.0.0.0/24");
        let mut record = HostRecord::new("host.example.com", "default", "default", Some("example.com"));
        record.push_next_available(&"10.0.0.0/24".parse().unwrap(), "default");
        let reference = mock.create_host_record(&record).await.unwrap();

        let fetched = mock.get_host_record_by_ref(&reference).await.unwrap();
        assert_eq!(fetched.zone.as_deref(), Some("example.com"));
        assert!(mock.update_host_record(&reference, &fetched).await.is_err());

        let mut prepared = fetched;
        prepared.prepare_for_update();
        assert!(mock.update_host_record(&reference, &prepared).await.is_ok());
    }

    #[tokio::test]
    async fn test_next_available_skips_used_and_reserved() {
        let mock = MockInfobloxClient::new("https://mock");
        mock.add_network("default", "10.0.0.0/29");
        mock.reserve("10.0.0.1");
        let subnet: IpNet = "10.0.0.0/29".parse().unwrap();

        for (name, expected) in [("a", "10.0.0.2"), ("b", "10.0.0.3")] {
            let mut record = HostRecord::new(name, "default", "default", None);
            record.push_next_available(&subnet, "default");
            mock.create_host_record(&record).await.unwrap();
            assert_eq!(mock.host_record(name).unwrap().ipv4addrs[0].ipv4addr, expected);
        }
    }

    #[tokio::test]
    async fn test_unknown_network_rejected() {
        let mock = MockInfobloxClient::new("https://mock");
        let mut record = HostRecord::new("a", "default", "default", None);
        record.push_next_available(&"10.9.0.0/24".parse().unwrap(), "default");
        assert!(mock.create_host_record(&record).await.is_err());
        assert_eq!(mock.mutation_count(), 0);
    }
}
