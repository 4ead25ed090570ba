// # Repository Implementations
//
// Both stores keep every table in one serializable `Tables` value; the file
// store writes it to disk after each mutation.

pub mod file;
pub mod memory;

pub use file::{FileRepository, FileRepositoryFactory};
pub use memory::{MemoryRepository, MemoryRepositoryFactory};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Error;
use crate::model::{
    Contract, DhcpNetwork, DhcpServer, IpClass, IpPool, PppProfile, PppoeServer, Router,
    RouterInterface, Scope, ServicePlan,
};

/// All rows, keyed by id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub routers: BTreeMap<i64, Router>,
    #[serde(default)]
    pub interfaces: BTreeMap<i64, RouterInterface>,
    #[serde(default)]
    pub ip_classes: BTreeMap<i64, IpClass>,
    #[serde(default)]
    pub pools: BTreeMap<i64, IpPool>,
    #[serde(default)]
    pub profiles: BTreeMap<i64, PppProfile>,
    #[serde(default)]
    pub pppoe_servers: BTreeMap<i64, PppoeServer>,
    #[serde(default)]
    pub dhcp_servers: BTreeMap<i64, DhcpServer>,
    #[serde(default)]
    pub dhcp_networks: BTreeMap<i64, DhcpNetwork>,
    #[serde(default)]
    pub plans: BTreeMap<i64, ServicePlan>,
    #[serde(default)]
    pub contracts: BTreeMap<i64, Contract>,
}

fn next_id<T>(table: &BTreeMap<i64, T>) -> i64 {
    table.keys().next_back().map_or(1, |last| last + 1)
}

fn in_scope<'a, T: 'a>(
    table: &'a BTreeMap<i64, T>,
    scope: Scope,
    scope_of: impl Fn(&T) -> Scope + 'a,
) -> impl Iterator<Item = &'a T> + 'a {
    table.values().filter(move |row| scope_of(row) == scope)
}

fn replace<T>(table: &mut BTreeMap<i64, T>, id: i64, row: T, kind: &str) -> Result<(), Error> {
    match table.get_mut(&id) {
        Some(slot) => {
            *slot = row;
            Ok(())
        }
        None => Err(Error::not_found(format!("{} {}", kind, id))),
    }
}

impl Tables {
    pub fn insert_router(&mut self, router: Router) {
        self.routers.insert(router.id, router);
    }

    pub fn insert_interface(&mut self, interface: RouterInterface) {
        self.interfaces.insert(interface.id, interface);
    }

    pub fn insert_ip_class(&mut self, class: IpClass) {
        self.ip_classes.insert(class.id, class);
    }

    pub fn insert_pool(&mut self, pool: IpPool) {
        self.pools.insert(pool.id, pool);
    }

    pub fn insert_profile(&mut self, profile: PppProfile) {
        self.profiles.insert(profile.id, profile);
    }

    pub fn insert_pppoe_server(&mut self, server: PppoeServer) {
        self.pppoe_servers.insert(server.id, server);
    }

    pub fn insert_dhcp_server(&mut self, server: DhcpServer) {
        self.dhcp_servers.insert(server.id, server);
    }

    pub fn insert_dhcp_network(&mut self, network: DhcpNetwork) {
        self.dhcp_networks.insert(network.id, network);
    }

    pub fn insert_plan(&mut self, plan: ServicePlan) {
        self.plans.insert(plan.id, plan);
    }

    pub fn insert_contract(&mut self, contract: Contract) {
        self.contracts.insert(contract.id, contract);
    }

    pub(crate) fn interfaces_of(&self, router_id: i64) -> Vec<RouterInterface> {
        self.interfaces
            .values()
            .filter(|i| i.router_id == router_id)
            .cloned()
            .collect()
    }

    pub(crate) fn pools_in(&self, scope: Scope) -> Vec<IpPool> {
        in_scope(&self.pools, scope, |p| Scope::new(p.tenant_id, p.router_id))
            .cloned()
            .collect()
    }

    pub(crate) fn profiles_in(&self, scope: Scope) -> Vec<PppProfile> {
        in_scope(&self.profiles, scope, |p| Scope::new(p.tenant_id, p.router_id))
            .cloned()
            .collect()
    }

    pub(crate) fn pppoe_servers_in(&self, scope: Scope) -> Vec<PppoeServer> {
        in_scope(&self.pppoe_servers, scope, |s| Scope::new(s.tenant_id, s.router_id))
            .cloned()
            .collect()
    }

    pub(crate) fn dhcp_servers_in(&self, scope: Scope) -> Vec<DhcpServer> {
        in_scope(&self.dhcp_servers, scope, |s| Scope::new(s.tenant_id, s.router_id))
            .cloned()
            .collect()
    }

    pub(crate) fn networks_of(&self, dhcp_server_id: i64) -> Vec<DhcpNetwork> {
        self.dhcp_networks
            .values()
            .filter(|n| n.dhcp_server_id == dhcp_server_id)
            .cloned()
            .collect()
    }

    pub(crate) fn create_pool(&mut self, pool: &IpPool) -> IpPool {
        let row = IpPool {
            id: next_id(&self.pools),
            ..pool.clone()
        };
        self.pools.insert(row.id, row.clone());
        row
    }

    pub(crate) fn update_pool(&mut self, pool: &IpPool) -> Result<(), Error> {
        replace(&mut self.pools, pool.id, pool.clone(), "pool")
    }

    /// A profile's remote pool must exist and share its tenant
    fn check_profile(&self, profile: &PppProfile) -> Result<(), Error> {
        let Some(pool_id) = profile.remote_address_pool_id else {
            return Ok(());
        };
        match self.pools.get(&pool_id) {
            Some(pool) if pool.tenant_id == profile.tenant_id => Ok(()),
            Some(pool) => Err(Error::consistency(format!(
                "Profile {} (tenant {}) cannot use pool {} of tenant {}",
                profile.name, profile.tenant_id, pool.id, pool.tenant_id
            ))),
            None => Err(Error::consistency(format!(
                "Profile {} references missing pool {}",
                profile.name, pool_id
            ))),
        }
    }

    pub(crate) fn create_profile(&mut self, profile: &PppProfile) -> Result<PppProfile, Error> {
        self.check_profile(profile)?;
        let row = PppProfile {
            id: next_id(&self.profiles),
            ..profile.clone()
        };
        self.profiles.insert(row.id, row.clone());
        Ok(row)
    }

    pub(crate) fn update_profile(&mut self, profile: &PppProfile) -> Result<(), Error> {
        self.check_profile(profile)?;
        replace(&mut self.profiles, profile.id, profile.clone(), "profile")
    }

    pub(crate) fn create_pppoe_server(&mut self, server: &PppoeServer) -> PppoeServer {
        let row = PppoeServer {
            id: next_id(&self.pppoe_servers),
            ..server.clone()
        };
        self.pppoe_servers.insert(row.id, row.clone());
        row
    }

    pub(crate) fn update_pppoe_server(&mut self, server: &PppoeServer) -> Result<(), Error> {
        replace(&mut self.pppoe_servers, server.id, server.clone(), "PPPoE server")
    }

    pub(crate) fn create_dhcp_server(&mut self, server: &DhcpServer) -> DhcpServer {
        let row = DhcpServer {
            id: next_id(&self.dhcp_servers),
            ..server.clone()
        };
        self.dhcp_servers.insert(row.id, row.clone());
        row
    }

    pub(crate) fn update_dhcp_server(&mut self, server: &DhcpServer) -> Result<(), Error> {
        replace(&mut self.dhcp_servers, server.id, server.clone(), "DHCP server")
    }

    pub(crate) fn update_contract(&mut self, contract: &Contract) -> Result<(), Error> {
        replace(&mut self.contracts, contract.id, contract.clone(), "contract")
    }

    pub(crate) fn delete_contract(&mut self, id: i64) {
        self.contracts.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(id: i64, tenant_id: i64) -> IpPool {
        IpPool {
            id,
            tenant_id,
            router_id: 1,
            name: format!("pool-{id}"),
            ranges: "10.0.0.2-10.0.0.254".into(),
            next_pool: None,
            comment: None,
            is_active: true,
        }
    }

    fn profile(pool_id: Option<i64>) -> PppProfile {
        PppProfile {
            id: 0,
            tenant_id: 1,
            router_id: 1,
            name: "plano-100".into(),
            local_address: None,
            remote_address_pool_id: pool_id,
            rate_limit: None,
            session_timeout: None,
            idle_timeout: None,
            dns_server: None,
            only_one: None,
            comment: None,
            is_active: true,
        }
    }

    #[test]
    fn create_assigns_next_id() {
        let mut tables = Tables::default();
        tables.insert_pool(pool(7, 1));
        let created = tables.create_pool(&pool(0, 1));
        assert_eq!(created.id, 8);
        assert_eq!(tables.pools_in(Scope::new(1, 1)).len(), 2);
        assert!(tables.pools_in(Scope::new(2, 1)).is_empty());
    }

    #[test]
    fn profile_pool_must_share_tenant() {
        let mut tables = Tables::default();
        tables.insert_pool(pool(7, 1));
        tables.insert_pool(pool(8, 2));

        assert!(tables.create_profile(&profile(Some(7))).is_ok());
        assert!(matches!(
            tables.create_profile(&profile(Some(8))),
            Err(Error::Consistency(_))
        ));
        assert!(matches!(
            tables.create_profile(&profile(Some(99))),
            Err(Error::Consistency(_))
        ));
    }

    #[test]
    fn update_of_missing_row_is_not_found() {
        let mut tables = Tables::default();
        assert!(matches!(tables.update_pool(&pool(3, 1)), Err(Error::NotFound(_))));
    }
}
