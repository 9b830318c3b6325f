//! Infoblox WAPI object models
//!
//! Only the fields the IPAM provider reads or writes are modelled. `_ref` is never
//! serialized back: WAPI addresses objects by URL, not by body.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// WAPI object type for host records
pub const HOST_RECORD_OBJECT: &str = "record:host";

/// Fields requested on top of the defaults when reading host records
pub const HOST_RECORD_RETURN_FIELDS: &str = "network_view,zone,configure_for_dns";

/// Network view (`networkview`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkView {
    #[serde(rename = "_ref", default, skip_serializing)]
    pub reference: String,
    pub name: String,
}

/// DNS view (`view`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsView {
    #[serde(rename = "_ref", default, skip_serializing)]
    pub reference: String,
    pub name: String,
}

/// Network (`network` / `ipv6network`) or network container (`networkcontainer` /
/// `ipv6networkcontainer`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    #[serde(rename = "_ref", default, skip_serializing)]
    pub reference: String,
    /// CIDR of the network
    pub network: String,
    pub network_view: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// WAPI object type for a network of the given family
pub fn network_object(cidr: &IpNet) -> &'static str {
    match cidr {
        IpNet::V4(_) => "network",
        IpNet::V6(_) => "ipv6network",
    }
}

/// WAPI object type for a network container of the given family
pub fn network_container_object(cidr: &IpNet) -> &'static str {
    match cidr {
        IpNet::V4(_) => "networkcontainer",
        IpNet::V6(_) => "ipv6networkcontainer",
    }
}

/// Address value asking WAPI to pick the next free address of `subnet` in `network_view`
pub fn next_available_ip_func(subnet: &IpNet, network_view: &str) -> String {
    format!("func:nextavailableip:{},{}", subnet, network_view)
}

/// IPv4 address entry of a host record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HostRecordIpv4Addr {
    #[serde(rename = "_ref", default, skip_serializing)]
    pub reference: Option<String>,
    /// Host the address is bound to; WAPI rejects it on update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub ipv4addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configure_for_dhcp: Option<bool>,
}

/// IPv6 address entry of a host record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HostRecordIpv6Addr {
    #[serde(rename = "_ref", default, skip_serializing)]
    pub reference: Option<String>,
    /// Host the address is bound to; WAPI rejects it on update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub ipv6addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configure_for_dhcp: Option<bool>,
}

/// Host record (`record:host`): one per hostname, any number of addresses per family
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HostRecord {
    #[serde(rename = "_ref", default, skip_serializing)]
    pub reference: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_view: Option<String>,
    /// DNS view
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configure_for_dns: Option<bool>,
    #[serde(default)]
    pub ipv4addrs: Vec<HostRecordIpv4Addr>,
    #[serde(default)]
    pub ipv6addrs: Vec<HostRecordIpv6Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl HostRecord {
    /// Empty record for `hostname`; DNS is enabled only when a zone is given
    pub fn new(hostname: &str, network_view: &str, dns_view: &str, zone: Option<&str>) -> Self {
        let dns_enabled = zone.is_some_and(|z| !z.is_empty());
        Self {
            name: hostname.to_string(),
            network_view: Some(network_view.to_string()),
            view: dns_enabled.then(|| dns_view.to_string()).filter(|v| !v.is_empty()),
            configure_for_dns: Some(dns_enabled),
            ..Default::default()
        }
    }

    /// Whether the record has been created on the backend
    pub fn exists(&self) -> bool {
        self.reference.as_deref().is_some_and(|r| !r.is_empty())
    }

    /// Whether WAPI will maintain DNS data for this record
    pub fn dns_enabled(&self) -> bool {
        self.configure_for_dns.unwrap_or(false)
    }

    /// First address of the subnet's family that lies inside `subnet`
    ///
    /// Entries that do not parse (e.g. unresolved placeholders) are skipped.
    pub fn address_in(&self, subnet: &IpNet) -> Option<IpAddr> {
        self.addresses(subnet).into_iter().find(|a| subnet.contains(a))
    }

    /// Append a next-available placeholder for `subnet`
    pub fn push_next_available(&mut self, subnet: &IpNet, network_view: &str) {
        let func = next_available_ip_func(subnet, network_view);
        match subnet {
            IpNet::V4(_) => self.ipv4addrs.push(HostRecordIpv4Addr {
                ipv4addr: func,
                ..Default::default()
            }),
            IpNet::V6(_) => self.ipv6addrs.push(HostRecordIpv6Addr {
                ipv6addr: func,
                ..Default::default()
            }),
        }
    }

    /// Remove the first address inside `subnet`, returning it
    pub fn remove_address_in(&mut self, subnet: &IpNet) -> Option<IpAddr> {
        match subnet {
            IpNet::V4(_) => {
                let index = self
                    .ipv4addrs
                    .iter()
                    .position(|a| parse_in(&a.ipv4addr, subnet).is_some())?;
                parse_in(&self.ipv4addrs.remove(index).ipv4addr, subnet)
            }
            IpNet::V6(_) => {
                let index = self
                    .ipv6addrs
                    .iter()
                    .position(|a| parse_in(&a.ipv6addr, subnet).is_some())?;
                parse_in(&self.ipv6addrs.remove(index).ipv6addr, subnet)
            }
        }
    }

    /// Whether the record holds any address of either family
    pub fn has_addresses(&self) -> bool {
        !self.ipv4addrs.is_empty() || !self.ipv6addrs.is_empty()
    }

    /// Strip the fields WAPI refuses to accept on update
    pub fn prepare_for_update(&mut self) {
        self.zone = None;
        self.network_view = None;
        for addr in &mut self.ipv4addrs {
            addr.host = None;
        }
        for addr in &mut self.ipv6addrs {
            addr.host = None;
        }
    }

    fn addresses(&self, subnet: &IpNet) -> Vec<IpAddr> {
        match subnet {
            IpNet::V4(_) => self.ipv4addrs.iter().filter_map(|a| a.ipv4addr.parse().ok()).collect(),
            IpNet::V6(_) => self.ipv6addrs.iter().filter_map(|a| a.ipv6addr.parse().ok()).collect(),
        }
    }
}

fn parse_in(value: &str, subnet: &IpNet) -> Option<IpAddr> {
    value.parse::<IpAddr>().ok().filter(|a| subnet.contains(a))
}
