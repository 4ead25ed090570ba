//! Typed device records
//!
//! Backends hand back flat string maps. Everything above the session works
//! with the records below, which parse those maps once and normalize the
//! vendor's sentinel strings (`unlimited`, `none`, empty) to `None` and its
//! boolean spellings (`yes`/`true`, `no`/`false`) to `bool`.

use crate::traits::{DeviceObject, Fields};

use super::paths;

/// Parsed from one device object
pub trait FromDevice: Sized {
    fn from_object(object: &DeviceObject) -> Self;
}

/// A record this crate writes, identified on the device by one key field
pub trait Managed: FromDevice {
    const PATH: &'static str;
    const KEY_FIELD: &'static str;

    fn key(&self) -> &str;

    /// Fields sent on add/update
    fn to_fields(&self) -> Fields;
}

/// Optional vendor value, with sentinels mapped to `None`
pub fn optional(object: &DeviceObject, key: &str) -> Option<String> {
    object.get(key).and_then(|value| {
        let trimmed = value.trim();
        match trimmed {
            "" | "none" | "unlimited" => None,
            _ => Some(trimmed.to_string()),
        }
    })
}

/// Required vendor value (empty when absent)
pub fn text(object: &DeviceObject, key: &str) -> String {
    object.get(key).map(|v| v.trim().to_string()).unwrap_or_default()
}

/// Vendor boolean, if the value is one of the known spellings
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" => Some(true),
        "no" | "false" => Some(false),
        _ => None,
    }
}

fn flag(object: &DeviceObject, key: &str) -> Option<bool> {
    object.get(key).and_then(parse_flag)
}

fn number(object: &DeviceObject, key: &str) -> Option<u32> {
    object.get(key).and_then(|v| v.trim().parse().ok())
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

/// Compare one field the way the device means it
///
/// Booleans compare by value across spellings, MAC addresses ignore case and
/// queue targets ignore a trailing `/32`.
pub fn same_value(key: &str, expected: &str, actual: &str) -> bool {
    if expected == actual {
        return true;
    }
    if let (Some(a), Some(b)) = (parse_flag(expected), parse_flag(actual)) {
        return a == b;
    }
    match key {
        "mac-address" => expected.eq_ignore_ascii_case(actual),
        "target" => {
            let strip = |s: &str| -> Vec<String> {
                s.split(',')
                    .map(|part| part.trim().trim_end_matches("/32").to_string())
                    .collect()
            };
            strip(expected) == strip(actual)
        }
        _ => false,
    }
}

struct FieldsBuilder(Fields);

impl FieldsBuilder {
    fn new() -> Self {
        Self(Fields::new())
    }

    fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    fn set_opt(self, key: &str, value: &Option<String>) -> Self {
        match value {
            Some(v) => self.set(key, v.clone()),
            None => self,
        }
    }

    fn build(self) -> Fields {
        self.0
    }
}

/// Static address binding (ARP entry)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBinding {
    pub address: String,
    pub mac_address: String,
    pub interface: String,
    pub comment: Option<String>,
}

impl FromDevice for AddressBinding {
    fn from_object(object: &DeviceObject) -> Self {
        Self {
            address: text(object, "address"),
            mac_address: text(object, "mac-address"),
            interface: text(object, "interface"),
            comment: optional(object, "comment"),
        }
    }
}

impl Managed for AddressBinding {
    const PATH: &'static str = paths::ARP;
    const KEY_FIELD: &'static str = "address";

    fn key(&self) -> &str {
        &self.address
    }

    fn to_fields(&self) -> Fields {
        FieldsBuilder::new()
            .set("address", &self.address)
            .set("mac-address", &self.mac_address)
            .set("interface", &self.interface)
            .set_opt("comment", &self.comment)
            .build()
    }
}

/// PPP credential
#[derive(Clone, PartialEq, Eq)]
pub struct PppSecret {
    pub name: String,
    pub password: String,
    pub service: String,
    pub profile: Option<String>,
    pub remote_address: Option<String>,
    pub comment: Option<String>,
}

impl std::fmt::Debug for PppSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PppSecret")
            .field("name", &self.name)
            .field("password", &"<REDACTED>")
            .field("service", &self.service)
            .field("profile", &self.profile)
            .field("remote_address", &self.remote_address)
            .finish()
    }
}

impl FromDevice for PppSecret {
    fn from_object(object: &DeviceObject) -> Self {
        Self {
            name: text(object, "name"),
            password: text(object, "password"),
            service: optional(object, "service").unwrap_or_else(|| "any".to_string()),
            profile: optional(object, "profile"),
            remote_address: optional(object, "remote-address"),
            comment: optional(object, "comment"),
        }
    }
}

impl Managed for PppSecret {
    const PATH: &'static str = paths::PPP_SECRET;
    const KEY_FIELD: &'static str = "name";

    fn key(&self) -> &str {
        &self.name
    }

    fn to_fields(&self) -> Fields {
        FieldsBuilder::new()
            .set("name", &self.name)
            .set("password", &self.password)
            .set("service", &self.service)
            .set_opt("profile", &self.profile)
            .set_opt("remote-address", &self.remote_address)
            .set_opt("comment", &self.comment)
            .build()
    }
}

/// Captive-portal user
#[derive(Clone, PartialEq, Eq)]
pub struct HotspotUser {
    pub name: String,
    pub password: String,
    pub server: Option<String>,
    pub address: Option<String>,
    pub mac_address: Option<String>,
    pub comment: Option<String>,
}

impl std::fmt::Debug for HotspotUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotspotUser")
            .field("name", &self.name)
            .field("password", &"<REDACTED>")
            .field("server", &self.server)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl FromDevice for HotspotUser {
    fn from_object(object: &DeviceObject) -> Self {
        Self {
            name: text(object, "name"),
            password: text(object, "password"),
            server: optional(object, "server").filter(|s| s != "all"),
            address: optional(object, "address"),
            mac_address: optional(object, "mac-address"),
            comment: optional(object, "comment"),
        }
    }
}

impl Managed for HotspotUser {
    const PATH: &'static str = paths::HOTSPOT_USER;
    const KEY_FIELD: &'static str = "name";

    fn key(&self) -> &str {
        &self.name
    }

    fn to_fields(&self) -> Fields {
        FieldsBuilder::new()
            .set("name", &self.name)
            .set("password", &self.password)
            .set_opt("server", &self.server)
            .set_opt("address", &self.address)
            .set_opt("mac-address", &self.mac_address)
            .set_opt("comment", &self.comment)
            .build()
    }
}

/// Simple queue limiting one subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleQueue {
    pub name: String,
    /// Address, or `<pppoe-username>` for dynamic PPP interfaces
    pub target: String,
    /// `upload/download`, e.g. `20M/5M`
    pub max_limit: Option<String>,
    pub comment: Option<String>,
}

impl FromDevice for SimpleQueue {
    fn from_object(object: &DeviceObject) -> Self {
        Self {
            name: text(object, "name"),
            target: text(object, "target"),
            max_limit: optional(object, "max-limit").filter(|l| l != "0/0"),
            comment: optional(object, "comment"),
        }
    }
}

impl Managed for SimpleQueue {
    const PATH: &'static str = paths::SIMPLE_QUEUE;
    const KEY_FIELD: &'static str = "name";

    fn key(&self) -> &str {
        &self.name
    }

    fn to_fields(&self) -> Fields {
        FieldsBuilder::new()
            .set("name", &self.name)
            .set("target", &self.target)
            .set("max-limit", self.max_limit.clone().unwrap_or_else(|| "0/0".to_string()))
            .set_opt("comment", &self.comment)
            .build()
    }
}

/// Address pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePool {
    pub name: String,
    pub ranges: String,
    pub next_pool: Option<String>,
    pub comment: Option<String>,
}

impl FromDevice for DevicePool {
    fn from_object(object: &DeviceObject) -> Self {
        Self {
            name: text(object, "name"),
            ranges: text(object, "ranges"),
            next_pool: optional(object, "next-pool"),
            comment: optional(object, "comment"),
        }
    }
}

impl Managed for DevicePool {
    const PATH: &'static str = paths::IP_POOL;
    const KEY_FIELD: &'static str = "name";

    fn key(&self) -> &str {
        &self.name
    }

    fn to_fields(&self) -> Fields {
        FieldsBuilder::new()
            .set("name", &self.name)
            .set("ranges", &self.ranges)
            .set_opt("next-pool", &self.next_pool)
            .set_opt("comment", &self.comment)
            .build()
    }
}

/// PPP profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: String,
    pub local_address: Option<String>,
    /// Pool name or literal address
    pub remote_address: Option<String>,
    pub rate_limit: Option<String>,
    pub session_timeout: Option<String>,
    pub idle_timeout: Option<String>,
    pub dns_server: Option<String>,
    /// `None` when the device reports `default`
    pub only_one: Option<bool>,
    pub comment: Option<String>,
}

impl FromDevice for DeviceProfile {
    fn from_object(object: &DeviceObject) -> Self {
        Self {
            name: text(object, "name"),
            local_address: optional(object, "local-address"),
            remote_address: optional(object, "remote-address"),
            rate_limit: optional(object, "rate-limit"),
            session_timeout: optional(object, "session-timeout").filter(|t| t != "0s"),
            idle_timeout: optional(object, "idle-timeout").filter(|t| t != "0s"),
            dns_server: optional(object, "dns-server"),
            only_one: flag(object, "only-one"),
            comment: optional(object, "comment"),
        }
    }
}

impl Managed for DeviceProfile {
    const PATH: &'static str = paths::PPP_PROFILE;
    const KEY_FIELD: &'static str = "name";

    fn key(&self) -> &str {
        &self.name
    }

    fn to_fields(&self) -> Fields {
        let mut builder = FieldsBuilder::new()
            .set("name", &self.name)
            .set_opt("local-address", &self.local_address)
            .set_opt("remote-address", &self.remote_address)
            .set_opt("rate-limit", &self.rate_limit)
            .set_opt("session-timeout", &self.session_timeout)
            .set_opt("idle-timeout", &self.idle_timeout)
            .set_opt("dns-server", &self.dns_server)
            .set_opt("comment", &self.comment);
        if let Some(only_one) = self.only_one {
            builder = builder.set("only-one", yes_no(only_one));
        }
        builder.build()
    }
}

/// PPPoE server binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePppoeServer {
    pub service_name: String,
    pub interface: String,
    pub default_profile: Option<String>,
    pub max_mtu: Option<u32>,
    pub max_mru: Option<u32>,
    /// Comma-separated methods, e.g. `pap,chap,mschap2`
    pub authentication: Option<String>,
    pub one_session_per_host: bool,
    pub disabled: bool,
}

impl FromDevice for DevicePppoeServer {
    fn from_object(object: &DeviceObject) -> Self {
        Self {
            service_name: text(object, "service-name"),
            interface: text(object, "interface"),
            default_profile: optional(object, "default-profile"),
            max_mtu: number(object, "max-mtu"),
            max_mru: number(object, "max-mru"),
            authentication: optional(object, "authentication"),
            one_session_per_host: flag(object, "one-session-per-host").unwrap_or(false),
            disabled: flag(object, "disabled").unwrap_or(false),
        }
    }
}

impl Managed for DevicePppoeServer {
    const PATH: &'static str = paths::PPPOE_SERVER;
    const KEY_FIELD: &'static str = "service-name";

    fn key(&self) -> &str {
        &self.service_name
    }

    fn to_fields(&self) -> Fields {
        let mut builder = FieldsBuilder::new()
            .set("service-name", &self.service_name)
            .set("interface", &self.interface)
            .set_opt("default-profile", &self.default_profile)
            .set_opt("authentication", &self.authentication)
            .set("one-session-per-host", yes_no(self.one_session_per_host))
            .set("disabled", yes_no(self.disabled));
        if let Some(mtu) = self.max_mtu {
            builder = builder.set("max-mtu", mtu.to_string());
        }
        if let Some(mru) = self.max_mru {
            builder = builder.set("max-mru", mru.to_string());
        }
        builder.build()
    }
}

/// DHCP server binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDhcpServer {
    pub name: String,
    pub interface: String,
    pub address_pool: Option<String>,
    pub lease_time: Option<String>,
    pub disabled: bool,
}

impl FromDevice for DeviceDhcpServer {
    fn from_object(object: &DeviceObject) -> Self {
        Self {
            name: text(object, "name"),
            interface: text(object, "interface"),
            address_pool: optional(object, "address-pool").filter(|p| p != "static-only"),
            lease_time: optional(object, "lease-time"),
            disabled: flag(object, "disabled").unwrap_or(false),
        }
    }
}

impl Managed for DeviceDhcpServer {
    const PATH: &'static str = paths::DHCP_SERVER;
    const KEY_FIELD: &'static str = "name";

    fn key(&self) -> &str {
        &self.name
    }

    fn to_fields(&self) -> Fields {
        FieldsBuilder::new()
            .set("name", &self.name)
            .set("interface", &self.interface)
            .set(
                "address-pool",
                self.address_pool.clone().unwrap_or_else(|| "static-only".to_string()),
            )
            .set_opt("lease-time", &self.lease_time)
            .set("disabled", yes_no(self.disabled))
            .build()
    }
}

/// DHCP network options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDhcpNetwork {
    pub address: String,
    pub gateway: Option<String>,
    pub dns_servers: Vec<String>,
}

impl FromDevice for DeviceDhcpNetwork {
    fn from_object(object: &DeviceObject) -> Self {
        Self {
            address: text(object, "address"),
            gateway: optional(object, "gateway"),
            dns_servers: optional(object, "dns-server")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

impl Managed for DeviceDhcpNetwork {
    const PATH: &'static str = paths::DHCP_NETWORK;
    const KEY_FIELD: &'static str = "address";

    fn key(&self) -> &str {
        &self.address
    }

    fn to_fields(&self) -> Fields {
        let mut builder = FieldsBuilder::new()
            .set("address", &self.address)
            .set_opt("gateway", &self.gateway);
        if !self.dns_servers.is_empty() {
            builder = builder.set("dns-server", self.dns_servers.join(","));
        }
        builder.build()
    }
}

/// Routing table entry (read only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub dst_address: String,
    pub gateway: Option<String>,
    /// v7: `203.0.113.1%ether1`
    pub immediate_gw: Option<String>,
    /// v6: `203.0.113.1 reachable via  ether1`
    pub gateway_status: Option<String>,
    /// v7 only
    pub routing_table: Option<String>,
    /// v6 only
    pub routing_mark: Option<String>,
    pub active: bool,
    pub disabled: bool,
}

impl FromDevice for Route {
    fn from_object(object: &DeviceObject) -> Self {
        let disabled = flag(object, "disabled").unwrap_or(false);
        Self {
            dst_address: text(object, "dst-address"),
            gateway: optional(object, "gateway"),
            immediate_gw: optional(object, "immediate-gw"),
            gateway_status: optional(object, "gateway-status"),
            routing_table: optional(object, "routing-table"),
            routing_mark: optional(object, "routing-mark"),
            active: flag(object, "active").unwrap_or(!disabled),
            disabled,
        }
    }
}

impl Route {
    /// True when any gateway field names `interface`
    pub fn leaves_through(&self, interface: &str) -> bool {
        [&self.gateway, &self.immediate_gw, &self.gateway_status]
            .into_iter()
            .flatten()
            .any(|value| {
                value
                    .split([',', ' ', '%'])
                    .any(|token| token == interface)
            })
    }
}

/// Address configured on an interface (read only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    /// CIDR form, e.g. `203.0.113.10/24`
    pub address: String,
    pub interface: String,
    pub disabled: bool,
}

impl FromDevice for InterfaceAddress {
    fn from_object(object: &DeviceObject) -> Self {
        Self {
            address: text(object, "address"),
            interface: text(object, "interface"),
            disabled: flag(object, "disabled").unwrap_or(false),
        }
    }
}

/// `/system/resource` (read only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemResource {
    pub version: String,
    pub board_name: Option<String>,
    pub architecture: Option<String>,
    pub uptime: Option<String>,
}

impl FromDevice for SystemResource {
    fn from_object(object: &DeviceObject) -> Self {
        Self {
            version: text(object, "version"),
            board_name: optional(object, "board-name"),
            architecture: optional(object, "architecture-name"),
            uptime: optional(object, "uptime"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(pairs: &[(&str, &str)]) -> DeviceObject {
        DeviceObject::new(
            "*1",
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        )
    }

    #[test]
    fn sentinels_become_none() {
        let profile = DeviceProfile::from_object(&object(&[
            ("name", "plano-100"),
            ("rate-limit", ""),
            ("remote-address", "none"),
            ("session-timeout", "0s"),
            ("only-one", "default"),
            ("dns-server", "8.8.8.8"),
        ]));
        assert_eq!(profile.rate_limit, None);
        assert_eq!(profile.remote_address, None);
        assert_eq!(profile.session_timeout, None);
        assert_eq!(profile.only_one, None);
        assert_eq!(profile.dns_server.as_deref(), Some("8.8.8.8"));
    }

    #[test]
    fn booleans_accept_both_spellings() {
        let server = DevicePppoeServer::from_object(&object(&[
            ("service-name", "isp"),
            ("interface", "ether2"),
            ("one-session-per-host", "yes"),
            ("disabled", "false"),
            ("max-mtu", "auto"),
            ("max-mru", "1480"),
        ]));
        assert!(server.one_session_per_host);
        assert!(!server.disabled);
        assert_eq!(server.max_mtu, None);
        assert_eq!(server.max_mru, Some(1480));
    }

    #[test]
    fn same_value_normalizes_vendor_spelling() {
        assert!(same_value("disabled", "no", "false"));
        assert!(!same_value("disabled", "yes", "false"));
        assert!(same_value("mac-address", "aa:bb:cc:00:11:22", "AA:BB:CC:00:11:22"));
        assert!(same_value("target", "10.0.0.5", "10.0.0.5/32"));
        assert!(!same_value("name", "a", "A"));
    }

    #[test]
    fn route_matches_interface_in_any_gateway_field() {
        let v7 = Route::from_object(&object(&[
            ("dst-address", "0.0.0.0/0"),
            ("gateway", "203.0.113.1"),
            ("immediate-gw", "203.0.113.1%ether1"),
            ("active", "true"),
        ]));
        assert!(v7.leaves_through("ether1"));
        assert!(!v7.leaves_through("ether10"));

        let v6 = Route::from_object(&object(&[
            ("dst-address", "0.0.0.0/0"),
            ("gateway", "203.0.113.1"),
            ("gateway-status", "203.0.113.1 reachable via  ether1"),
        ]));
        assert!(v6.active);
        assert!(v6.leaves_through("ether1"));
    }

    #[test]
    fn queue_fields_use_unlimited_when_no_limit() {
        let queue = SimpleQueue {
            name: "contract-42".into(),
            target: "10.0.0.5".into(),
            max_limit: None,
            comment: None,
        };
        assert_eq!(queue.to_fields().get("max-limit").map(String::as_str), Some("0/0"));
    }
}
