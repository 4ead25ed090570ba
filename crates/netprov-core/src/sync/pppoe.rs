use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{Observation, Synced, assign, present_names, reconcile};
use crate::config::SyncConfig;
use crate::device::DeviceSession;
use crate::device::paths;
use crate::device::records::DevicePppoeServer;
use crate::model::{PppoeServer, Router, Scope};
use crate::traits::{Filter, Repository};
use crate::upsert::{UpsertSpec, Upserted, ensure};
use crate::{Error, Result};

/// Device server with interface and default profile mapped to record ids
pub(crate) struct ObservedPppoe {
    server: DevicePppoeServer,
    interface_id: i64,
    default_profile_id: Option<i64>,
}

#[async_trait]
impl Synced for PppoeServer {
    type Observed = ObservedPppoe;

    const KIND: &'static str = "pppoe_server";

    fn name(&self) -> &str {
        &self.service_name
    }

    fn observed_name(observed: &ObservedPppoe) -> &str {
        &observed.server.service_name
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    fn absorb(&mut self, observed: &ObservedPppoe) -> bool {
        let device = &observed.server;
        [
            assign(&mut self.interface_id, observed.interface_id),
            assign(&mut self.default_profile_id, observed.default_profile_id),
            assign(&mut self.max_mtu, device.max_mtu),
            assign(&mut self.max_mru, device.max_mru),
            assign(&mut self.authentication, device.authentication.clone()),
            assign(&mut self.one_session_per_host, device.one_session_per_host),
        ]
        .contains(&true)
    }

    fn discovered(scope: Scope, observed: &ObservedPppoe, comment: String) -> Self {
        let device = &observed.server;
        PppoeServer {
            id: 0,
            tenant_id: scope.tenant_id,
            router_id: scope.router_id,
            service_name: device.service_name.clone(),
            interface_id: observed.interface_id,
            default_profile_id: observed.default_profile_id,
            max_mtu: device.max_mtu,
            max_mru: device.max_mru,
            authentication: device.authentication.clone(),
            one_session_per_host: device.one_session_per_host,
            comment: Some(comment),
            is_active: true,
        }
    }

    async fn insert(repository: &dyn Repository, row: &Self) -> Result<Self> {
        repository.create_pppoe_server(row).await
    }

    async fn save(repository: &dyn Repository, row: &Self) -> Result<()> {
        repository.update_pppoe_server(row).await
    }
}

/// Enabled servers on known interfaces, with names resolved to ids
async fn observe(
    session: &DeviceSession,
    repository: &dyn Repository,
    router: &Router,
    config: &SyncConfig,
) -> Result<Observation<ObservedPppoe>> {
    let listed: Vec<DevicePppoeServer> = session.list_as(paths::PPPOE_SERVER, &Filter::new()).await?;
    let total_on_device = listed.len();
    let present = present_names(listed.iter().map(|server| server.service_name.as_str()));

    let interfaces: HashMap<String, i64> = repository
        .list_interfaces(router.id)
        .await?
        .into_iter()
        .map(|iface| (iface.name, iface.id))
        .collect();
    let profiles: HashMap<String, i64> = repository
        .list_profiles(router.scope())
        .await?
        .into_iter()
        .map(|profile| (profile.name, profile.id))
        .collect();

    let mut items = Vec::with_capacity(listed.len());
    let mut skipped = 0;
    for server in listed {
        if server.service_name.is_empty() || server.interface.is_empty() {
            debug!("Skipping PPPoE server without service name or interface");
            skipped += 1;
            continue;
        }
        if server.disabled && config.skip_disabled_servers {
            debug!(service = %server.service_name, "Skipping disabled PPPoE server");
            skipped += 1;
            continue;
        }
        let Some(&interface_id) = interfaces.get(&server.interface) else {
            warn!(
                router_id = router.id,
                service = %server.service_name,
                interface = %server.interface,
                "Skipping PPPoE server on an interface unknown to the records"
            );
            skipped += 1;
            continue;
        };
        let default_profile_id = server
            .default_profile
            .as_ref()
            .and_then(|name| profiles.get(name).copied());
        items.push(ObservedPppoe {
            server,
            interface_id,
            default_profile_id,
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
    let records = repository.list_pppoe_servers(router.scope()).await?;
    Ok(reconcile(repository, router, records, observation).await)
}

/// Server record with its foreign keys resolved to device names
pub(super) struct Prepared {
    device: DevicePppoeServer,
}

pub(super) async fn prepare(repository: &dyn Repository, server: &PppoeServer) -> Result<Prepared> {
    let interface = repository
        .get_interface(server.interface_id)
        .await?
        .filter(|iface| iface.router_id == server.router_id)
        .ok_or_else(|| {
            Error::consistency(format!(
                "PPPoE server {} references interface {} not on router {}",
                server.service_name, server.interface_id, server.router_id
            ))
        })?;

    let default_profile = match server.default_profile_id {
        Some(profile_id) => {
            let profile = repository
                .get_profile(profile_id)
                .await?
                .ok_or_else(|| {
                    Error::consistency(format!(
                        "PPPoE server {} references missing profile {}",
                        server.service_name, profile_id
                    ))
                })?;
            Some(profile.name)
        }
        None => None,
    };

    Ok(Prepared {
        device: DevicePppoeServer {
            service_name: server.service_name.clone(),
            interface: interface.name,
            default_profile,
            max_mtu: server.max_mtu,
            max_mru: server.max_mru,
            authentication: server.authentication.clone(),
            one_session_per_host: server.one_session_per_host,
            disabled: !server.is_active,
        },
    })
}

pub(super) async fn publish(session: &DeviceSession, prepared: &Prepared, allow_uplink: bool) -> Result<Upserted> {
    session
        .guard_not_uplink(&prepared.device.interface, allow_uplink)
        .await?;
    ensure(session, UpsertSpec::for_record(&prepared.device)).await
}
