// # Memory Repository
//
// In-memory implementation of Repository.
//
// ## When to Use
//
// - Tests and contract suites
// - One-shot runs seeded from a snapshot that is discarded afterwards

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::Tables;
use crate::Error;
use crate::model::{
    Contract, DhcpNetwork, DhcpServer, IpClass, IpPool, PppProfile, PppoeServer, Router,
    RouterInterface, Scope, ServicePlan,
};
use crate::traits::{Repository, RepositoryFactory};

/// In-memory repository
///
/// Clones share the same tables.
///
/// # Example
///
/// ```rust,no_run
/// use netprov_core::MemoryRepository;
/// use netprov_core::repository::Tables;
///
/// let mut tables = Tables::default();
/// // tables.insert_router(...);
/// let repository = MemoryRepository::from_tables(tables);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository holding `tables`
    pub fn from_tables(tables: Tables) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tables)),
        }
    }

    /// Copy of every table
    pub async fn snapshot(&self) -> Tables {
        self.inner.read().await.clone()
    }

    /// Mutate the tables directly
    pub async fn seed(&self, f: impl FnOnce(&mut Tables)) {
        let mut guard = self.inner.write().await;
        f(&mut guard);
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_router(&self, id: i64) -> Result<Option<Router>, Error> {
        Ok(self.inner.read().await.routers.get(&id).cloned())
    }

    async fn get_interface(&self, id: i64) -> Result<Option<RouterInterface>, Error> {
        Ok(self.inner.read().await.interfaces.get(&id).cloned())
    }

    async fn list_interfaces(&self, router_id: i64) -> Result<Vec<RouterInterface>, Error> {
        Ok(self.inner.read().await.interfaces_of(router_id))
    }

    async fn get_ip_class(&self, id: i64) -> Result<Option<IpClass>, Error> {
        Ok(self.inner.read().await.ip_classes.get(&id).cloned())
    }

    async fn get_pool(&self, id: i64) -> Result<Option<IpPool>, Error> {
        Ok(self.inner.read().await.pools.get(&id).cloned())
    }

    async fn list_pools(&self, scope: Scope) -> Result<Vec<IpPool>, Error> {
        Ok(self.inner.read().await.pools_in(scope))
    }

    async fn create_pool(&self, pool: &IpPool) -> Result<IpPool, Error> {
        Ok(self.inner.write().await.create_pool(pool))
    }

    async fn update_pool(&self, pool: &IpPool) -> Result<(), Error> {
        self.inner.write().await.update_pool(pool)
    }

    async fn get_profile(&self, id: i64) -> Result<Option<PppProfile>, Error> {
        Ok(self.inner.read().await.profiles.get(&id).cloned())
    }

    async fn list_profiles(&self, scope: Scope) -> Result<Vec<PppProfile>, Error> {
        Ok(self.inner.read().await.profiles_in(scope))
    }

    async fn create_profile(&self, profile: &PppProfile) -> Result<PppProfile, Error> {
        self.inner.write().await.create_profile(profile)
    }

    async fn update_profile(&self, profile: &PppProfile) -> Result<(), Error> {
        self.inner.write().await.update_profile(profile)
    }

    async fn get_pppoe_server(&self, id: i64) -> Result<Option<PppoeServer>, Error> {
        Ok(self.inner.read().await.pppoe_servers.get(&id).cloned())
    }

    async fn list_pppoe_servers(&self, scope: Scope) -> Result<Vec<PppoeServer>, Error> {
        Ok(self.inner.read().await.pppoe_servers_in(scope))
    }

    async fn create_pppoe_server(&self, server: &PppoeServer) -> Result<PppoeServer, Error> {
        Ok(self.inner.write().await.create_pppoe_server(server))
    }

    async fn update_pppoe_server(&self, server: &PppoeServer) -> Result<(), Error> {
        self.inner.write().await.update_pppoe_server(server)
    }

    async fn get_dhcp_server(&self, id: i64) -> Result<Option<DhcpServer>, Error> {
        Ok(self.inner.read().await.dhcp_servers.get(&id).cloned())
    }

    async fn list_dhcp_servers(&self, scope: Scope) -> Result<Vec<DhcpServer>, Error> {
        Ok(self.inner.read().await.dhcp_servers_in(scope))
    }

    async fn create_dhcp_server(&self, server: &DhcpServer) -> Result<DhcpServer, Error> {
        Ok(self.inner.write().await.create_dhcp_server(server))
    }

    async fn update_dhcp_server(&self, server: &DhcpServer) -> Result<(), Error> {
        self.inner.write().await.update_dhcp_server(server)
    }

    async fn list_dhcp_networks(&self, dhcp_server_id: i64) -> Result<Vec<DhcpNetwork>, Error> {
        Ok(self.inner.read().await.networks_of(dhcp_server_id))
    }

    async fn get_plan(&self, id: i64) -> Result<Option<ServicePlan>, Error> {
        Ok(self.inner.read().await.plans.get(&id).cloned())
    }

    async fn get_contract(&self, id: i64) -> Result<Option<Contract>, Error> {
        Ok(self.inner.read().await.contracts.get(&id).cloned())
    }

    async fn update_contract(&self, contract: &Contract) -> Result<(), Error> {
        self.inner.write().await.update_contract(contract)
    }

    async fn delete_contract(&self, id: i64) -> Result<(), Error> {
        self.inner.write().await.delete_contract(id);
        Ok(())
    }
}

/// Factory for creating MemoryRepository instances
pub struct MemoryRepositoryFactory;

#[async_trait]
impl RepositoryFactory for MemoryRepositoryFactory {
    async fn create(&self, _config: &serde_json::Value) -> Result<Box<dyn Repository>, Error> {
        Ok(Box::new(MemoryRepository::new()))
    }
}
