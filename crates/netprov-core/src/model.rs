//! Persisted records
//!
//! These are the rows owned by the external repository. The core reads and
//! writes them through [`crate::traits::Repository`] and never deletes a
//! network-object row during reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant + router pair that scopes network-object records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub tenant_id: i64,
    pub router_id: i64,
}

impl Scope {
    pub fn new(tenant_id: i64, router_id: i64) -> Self {
        Self {
            tenant_id,
            router_id,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tenant={} router={}", self.tenant_id, self.router_id)
    }
}

/// Managed router
///
/// `password` is stored encrypted; see [`crate::credentials`].
#[derive(Clone, Serialize, Deserialize)]
pub struct Router {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    #[serde(default = "default_vendor")]
    pub vendor: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("vendor", &self.vendor)
            .field("is_active", &self.is_active)
            .finish()
    }
}

impl Router {
    pub fn scope(&self) -> Scope {
        Scope::new(self.tenant_id, self.id)
    }
}

/// Physical or logical port on a router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterInterface {
    pub id: i64,
    pub router_id: i64,
    pub name: String,
    #[serde(default = "default_media_type")]
    pub media_type: String,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// IP classes assigned to this interface
    #[serde(default)]
    pub ip_class_ids: Vec<i64>,
}

/// Named subnet assignable to interfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpClass {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub network: String,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
}

/// Address range used for PPP/DHCP assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPool {
    pub id: i64,
    pub tenant_id: i64,
    pub router_id: i64,
    pub name: String,
    pub ranges: String,
    #[serde(default)]
    pub next_pool: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub is_active: bool,
}

/// PPP service profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PppProfile {
    pub id: i64,
    pub tenant_id: i64,
    pub router_id: i64,
    pub name: String,
    #[serde(default)]
    pub local_address: Option<String>,
    /// Pool handing out remote addresses; must share the profile's tenant
    #[serde(default)]
    pub remote_address_pool_id: Option<i64>,
    #[serde(default)]
    pub rate_limit: Option<String>,
    #[serde(default)]
    pub session_timeout: Option<String>,
    #[serde(default)]
    pub idle_timeout: Option<String>,
    #[serde(default)]
    pub dns_server: Option<String>,
    #[serde(default)]
    pub only_one: Option<bool>,
    #[serde(default)]
    pub comment: Option<String>,
    pub is_active: bool,
}

/// PPPoE listener bound to an interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PppoeServer {
    pub id: i64,
    pub tenant_id: i64,
    pub router_id: i64,
    pub service_name: String,
    pub interface_id: i64,
    #[serde(default)]
    pub default_profile_id: Option<i64>,
    #[serde(default)]
    pub max_mtu: Option<u32>,
    #[serde(default)]
    pub max_mru: Option<u32>,
    #[serde(default)]
    pub authentication: Option<String>,
    #[serde(default)]
    pub one_session_per_host: bool,
    #[serde(default)]
    pub comment: Option<String>,
    pub is_active: bool,
}

/// DHCP listener bound to an interface and pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpServer {
    pub id: i64,
    pub tenant_id: i64,
    pub router_id: i64,
    pub name: String,
    pub interface_id: i64,
    #[serde(default)]
    pub pool_id: Option<i64>,
    #[serde(default)]
    pub lease_time: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub is_active: bool,
}

/// Network options served by a DHCP server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpNetwork {
    pub id: i64,
    pub dhcp_server_id: i64,
    pub network: String,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
}

/// Commercial plan attached to a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePlan {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    /// Queue limit in device notation, e.g. `20M/5M`
    #[serde(default)]
    pub bandwidth: Option<String>,
    /// PPP profile name handed to PPPoE secrets
    #[serde(default)]
    pub ppp_profile: Option<String>,
}

/// How a subscriber is authenticated on the access network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Fixed address bound to a fixed MAC on one interface
    AddressBinding,
    Pppoe,
    CaptivePortal,
    /// Delegated to an external RADIUS server; no device action
    Radius,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthMethod::AddressBinding => "address-binding",
            AuthMethod::Pppoe => "pppoe",
            AuthMethod::CaptivePortal => "captive-portal",
            AuthMethod::Radius => "radius",
        };
        f.write_str(name)
    }
}

/// Contract lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    PendingInstall,
    Active,
    Suspended,
    Cancelled,
}

/// Subscription contract: the provisionable unit
#[derive(Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: i64,
    pub tenant_id: i64,
    pub client_id: i64,
    pub plan_id: i64,
    #[serde(default)]
    pub router_id: Option<i64>,
    #[serde(default)]
    pub interface_id: Option<i64>,
    #[serde(default)]
    pub ip_class_id: Option<i64>,
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub pppoe_username: Option<String>,
    #[serde(default)]
    pub pppoe_password: Option<String>,
    #[serde(default)]
    pub portal_username: Option<String>,
    #[serde(default)]
    pub portal_password: Option<String>,
    pub status: ContractStatus,
    /// Human-readable reason for the last failed transition
    #[serde(default)]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("plan_id", &self.plan_id)
            .field("router_id", &self.router_id)
            .field("interface_id", &self.interface_id)
            .field("auth_method", &self.auth_method)
            .field("mac_address", &self.mac_address)
            .field("ip_address", &self.ip_address)
            .field("pppoe_username", &self.pppoe_username)
            .field("portal_username", &self.portal_username)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Contract {
    /// Create a pending-install contract
    pub fn new(id: i64, tenant_id: i64, client_id: i64, plan_id: i64, auth_method: AuthMethod) -> Self {
        Self {
            id,
            tenant_id,
            client_id,
            plan_id,
            router_id: None,
            interface_id: None,
            ip_class_id: None,
            auth_method,
            mac_address: None,
            ip_address: None,
            pppoe_username: None,
            pppoe_password: None,
            portal_username: None,
            portal_password: None,
            status: ContractStatus::PendingInstall,
            status_reason: None,
            activated_at: None,
        }
    }

    /// Assign the router and interface the contract is served from
    pub fn with_placement(mut self, router_id: i64, interface_id: i64) -> Self {
        self.router_id = Some(router_id);
        self.interface_id = Some(interface_id);
        self
    }

    /// Set the bound hardware and network address
    pub fn with_binding(mut self, mac_address: impl Into<String>, ip_address: impl Into<String>) -> Self {
        self.mac_address = Some(mac_address.into());
        self.ip_address = Some(ip_address.into());
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_vendor() -> String {
    "mikrotik".to_string()
}

fn default_media_type() -> String {
    "ether".to_string()
}
