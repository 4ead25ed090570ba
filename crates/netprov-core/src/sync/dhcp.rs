use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{Observation, Synced, assign, present_names, reconcile};
use crate::config::SyncConfig;
use crate::device::DeviceSession;
use crate::device::paths;
use crate::device::records::{DeviceDhcpNetwork, DeviceDhcpServer};
use crate::model::{DhcpServer, Router, Scope};
use crate::traits::{Filter, Repository};
use crate::upsert::{UpsertSpec, Upserted, ensure};
use crate::{Error, Result};

/// Result of publishing a DHCP server
#[derive(Debug, Clone)]
pub struct DhcpPublication {
    pub server: Upserted,
    pub networks: Vec<Upserted>,
}

/// Device server with interface and pool mapped to record ids
pub(crate) struct ObservedDhcp {
    server: DeviceDhcpServer,
    interface_id: i64,
    pool_id: Option<i64>,
}

#[async_trait]
impl Synced for DhcpServer {
    type Observed = ObservedDhcp;

    const KIND: &'static str = "dhcp_server";

    fn name(&self) -> &str {
        &self.name
    }

    fn observed_name(observed: &ObservedDhcp) -> &str {
        &observed.server.name
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    fn absorb(&mut self, observed: &ObservedDhcp) -> bool {
        [
            assign(&mut self.interface_id, observed.interface_id),
            assign(&mut self.pool_id, observed.pool_id),
            assign(&mut self.lease_time, observed.server.lease_time.clone()),
        ]
        .contains(&true)
    }

    fn discovered(scope: Scope, observed: &ObservedDhcp, comment: String) -> Self {
        DhcpServer {
            id: 0,
            tenant_id: scope.tenant_id,
            router_id: scope.router_id,
            name: observed.server.name.clone(),
            interface_id: observed.interface_id,
            pool_id: observed.pool_id,
            lease_time: observed.server.lease_time.clone(),
            comment: Some(comment),
            is_active: true,
        }
    }

    async fn insert(repository: &dyn Repository, row: &Self) -> Result<Self> {
        repository.create_dhcp_server(row).await
    }

    async fn save(repository: &dyn Repository, row: &Self) -> Result<()> {
        repository.update_dhcp_server(row).await
    }
}

async fn observe(
    session: &DeviceSession,
    repository: &dyn Repository,
    router: &Router,
    config: &SyncConfig,
) -> Result<Observation<ObservedDhcp>> {
    let listed: Vec<DeviceDhcpServer> = session.list_as(paths::DHCP_SERVER, &Filter::new()).await?;
    let total_on_device = listed.len();
    let present = present_names(listed.iter().map(|server| server.name.as_str()));

    let interfaces: HashMap<String, i64> = repository
        .list_interfaces(router.id)
        .await?
        .into_iter()
        .map(|iface| (iface.name, iface.id))
        .collect();
    let pools: HashMap<String, i64> = repository
        .list_pools(router.scope())
        .await?
        .into_iter()
        .map(|pool| (pool.name, pool.id))
        .collect();

    let mut items = Vec::with_capacity(listed.len());
    let mut skipped = 0;
    for server in listed {
        if server.name.is_empty() || server.interface.is_empty() {
            debug!("Skipping DHCP server without name or interface");
            skipped += 1;
            continue;
        }
        if server.disabled && config.skip_disabled_servers {
            debug!(name = %server.name, "Skipping disabled DHCP server");
            skipped += 1;
            continue;
        }
        let Some(&interface_id) = interfaces.get(&server.interface) else {
            warn!(
                router_id = router.id,
                name = %server.name,
                interface = %server.interface,
                "Skipping DHCP server on an interface unknown to the records"
            );
            skipped += 1;
            continue;
        };
        let pool_id = server
            .address_pool
            .as_ref()
            .and_then(|name| pools.get(name).copied());
        items.push(ObservedDhcp {
            server,
            interface_id,
            pool_id,
        });
    }

    Ok(Observation {
        items,
        present,
        total_on_device,
        skipped,
    })
}

pub(super) async fn sync(
    session: &DeviceSession,
    repository: &dyn Repository,
    router: &Router,
    config: &SyncConfig,
) -> Result<super::SyncResult> {
    let observation = observe(session, repository, router, config).await?;
    let records = repository.list_dhcp_servers(router.scope()).await?;
    Ok(reconcile(repository, router, records, observation).await)
}

pub(super) struct Prepared {
    server: DeviceDhcpServer,
    networks: Vec<DeviceDhcpNetwork>,
}

pub(super) async fn prepare(repository: &dyn Repository, server: &DhcpServer) -> Result<Prepared> {
    let interface = repository
        .get_interface(server.interface_id)
        .await?
        .filter(|iface| iface.router_id == server.router_id)
        .ok_or_else(|| {
            Error::consistency(format!(
                "DHCP server {} references interface {} not on router {}",
                server.name, server.interface_id, server.router_id
            ))
        })?;

    let address_pool = match server.pool_id {
        Some(pool_id) => {
            let pool = repository
                .get_pool(pool_id)
                .await?
                .filter(|pool| pool.tenant_id == server.tenant_id)
                .ok_or_else(|| {
                    Error::consistency(format!(
                        "DHCP server {} references pool {} outside its tenant",
                        server.name, pool_id
                    ))
                })?;
            Some(pool.name)
        }
        None => None,
    };

    let networks = repository
        .list_dhcp_networks(server.id)
        .await?
        .into_iter()
        .map(|network| DeviceDhcpNetwork {
            address: network.network,
            gateway: network.gateway,
            dns_servers: network.dns_servers,
        })
        .collect();

    Ok(Prepared {
        server: DeviceDhcpServer {
            name: server.name.clone(),
            interface: interface.name,
            address_pool,
            lease_time: server.lease_time.clone(),
            disabled: !server.is_active,
        },
        networks,
    })
}

pub(super) async fn publish(
    session: &DeviceSession,
    prepared: &Prepared,
    allow_uplink: bool,
) -> Result<DhcpPublication> {
    session
        .guard_not_uplink(&prepared.server.interface, allow_uplink)
        .await?;
    let server = ensure(session, UpsertSpec::for_record(&prepared.server)).await?;

    let mut networks = Vec::with_capacity(prepared.networks.len());
    for network in &prepared.networks {
        networks.push(ensure(session, UpsertSpec::for_record(network)).await?);
    }
    Ok(DhcpPublication { server, networks })
}
