// # Repository Trait
//
// Defines the interface to the externally owned record store.
//
// ## Purpose
//
// The core never owns persistence. Reconciliation and provisioning read and
// write rows through this trait, by primary key or by tenant+router scope.
//
// ## Implementations
//
// - In-memory: `MemoryRepository`
// - JSON snapshot file: `FileRepository`
// - Future: SQL-backed stores living next to the HTTP layer

use async_trait::async_trait;

use crate::model::{
    Contract, DhcpNetwork, DhcpServer, IpClass, IpPool, PppProfile, PppoeServer, Router,
    RouterInterface, Scope, ServicePlan,
};

/// Trait for record store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Create Semantics
///
/// `create_*` methods ignore the `id` of the argument, assign a fresh one and
/// return the stored row.
///
/// # Invariants Enforced by Implementations
///
/// - A profile's `remote_address_pool_id`, if set, references a pool of the
///   same tenant ([`crate::Error::Consistency`] otherwise)
/// - Network-object rows are never deleted through this trait
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_router(&self, id: i64) -> Result<Option<Router>, crate::Error>;

    async fn get_interface(&self, id: i64) -> Result<Option<RouterInterface>, crate::Error>;

    /// All interfaces of a router
    async fn list_interfaces(&self, router_id: i64) -> Result<Vec<RouterInterface>, crate::Error>;

    async fn get_ip_class(&self, id: i64) -> Result<Option<IpClass>, crate::Error>;

    async fn get_pool(&self, id: i64) -> Result<Option<IpPool>, crate::Error>;

    async fn list_pools(&self, scope: Scope) -> Result<Vec<IpPool>, crate::Error>;

    async fn create_pool(&self, pool: &IpPool) -> Result<IpPool, crate::Error>;

    async fn update_pool(&self, pool: &IpPool) -> Result<(), crate::Error>;

    async fn get_profile(&self, id: i64) -> Result<Option<PppProfile>, crate::Error>;

    async fn list_profiles(&self, scope: Scope) -> Result<Vec<PppProfile>, crate::Error>;

    async fn create_profile(&self, profile: &PppProfile) -> Result<PppProfile, crate::Error>;

    async fn update_profile(&self, profile: &PppProfile) -> Result<(), crate::Error>;

    async fn get_pppoe_server(&self, id: i64) -> Result<Option<PppoeServer>, crate::Error>;

    async fn list_pppoe_servers(&self, scope: Scope) -> Result<Vec<PppoeServer>, crate::Error>;

    async fn create_pppoe_server(&self, server: &PppoeServer) -> Result<PppoeServer, crate::Error>;

    async fn update_pppoe_server(&self, server: &PppoeServer) -> Result<(), crate::Error>;

    async fn get_dhcp_server(&self, id: i64) -> Result<Option<DhcpServer>, crate::Error>;

    async fn list_dhcp_servers(&self, scope: Scope) -> Result<Vec<DhcpServer>, crate::Error>;

    async fn create_dhcp_server(&self, server: &DhcpServer) -> Result<DhcpServer, crate::Error>;

    async fn update_dhcp_server(&self, server: &DhcpServer) -> Result<(), crate::Error>;

    /// Networks served by one DHCP server
    async fn list_dhcp_networks(&self, dhcp_server_id: i64) -> Result<Vec<DhcpNetwork>, crate::Error>;

    async fn get_plan(&self, id: i64) -> Result<Option<ServicePlan>, crate::Error>;

    async fn get_contract(&self, id: i64) -> Result<Option<Contract>, crate::Error>;

    /// Persist a contract's status and credentials
    async fn update_contract(&self, contract: &Contract) -> Result<(), crate::Error>;

    /// Delete a contract row (or do nothing if it doesn't exist)
    async fn delete_contract(&self, id: i64) -> Result<(), crate::Error>;
}

/// Helper trait for constructing repositories from configuration
#[async_trait]
pub trait RepositoryFactory: Send + Sync {
    /// Create a Repository instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Serialized [`crate::config::RepositoryConfig`]
    async fn create(&self, config: &serde_json::Value) -> Result<Box<dyn Repository>, crate::Error>;
}
