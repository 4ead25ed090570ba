use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use super::{Observation, Synced, assign, present_names, reconcile};
use crate::device::DeviceSession;
use crate::device::paths;
use crate::device::records::DeviceProfile;
use crate::model::{PppProfile, Router, Scope};
use crate::traits::{Filter, Repository};
use crate::upsert::{Upserted, upsert_profile};
use crate::{Error, Result};

/// Device profile with its remote-address resolved against internal pools
pub(crate) struct ObservedProfile {
    profile: DeviceProfile,
    remote_address_pool_id: Option<i64>,
}

#[async_trait]
impl Synced for PppProfile {
    type Observed = ObservedProfile;

    const KIND: &'static str = "profile";

    fn name(&self) -> &str {
        &self.name
    }

    fn observed_name(observed: &ObservedProfile) -> &str {
        &observed.profile.name
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    fn absorb(&mut self, observed: &ObservedProfile) -> bool {
        let device = &observed.profile;
        [
            assign(&mut self.local_address, device.local_address.clone()),
            assign(&mut self.remote_address_pool_id, observed.remote_address_pool_id),
            assign(&mut self.rate_limit, device.rate_limit.clone()),
            assign(&mut self.session_timeout, device.session_timeout.clone()),
            assign(&mut self.idle_timeout, device.idle_timeout.clone()),
            assign(&mut self.dns_server, device.dns_server.clone()),
            assign(&mut self.only_one, device.only_one),
        ]
        .contains(&true)
    }

    fn discovered(scope: Scope, observed: &ObservedProfile, comment: String) -> Self {
        let device = &observed.profile;
        PppProfile {
            id: 0,
            tenant_id: scope.tenant_id,
            router_id: scope.router_id,
            name: device.name.clone(),
            local_address: device.local_address.clone(),
            remote_address_pool_id: observed.remote_address_pool_id,
            rate_limit: device.rate_limit.clone(),
            session_timeout: device.session_timeout.clone(),
            idle_timeout: device.idle_timeout.clone(),
            dns_server: device.dns_server.clone(),
            only_one: device.only_one,
            comment: Some(comment),
            is_active: true,
        }
    }

    async fn insert(repository: &dyn Repository, row: &Self) -> Result<Self> {
        repository.create_profile(row).await
    }

    async fn save(repository: &dyn Repository, row: &Self) -> Result<()> {
        repository.update_profile(row).await
    }
}

/// Named profiles, with remote-address mapped to a pool id when it names one
///
/// A remote-address that is a literal address, or a pool unknown to the
/// records, maps to no pool.
async fn observe(
    session: &DeviceSession,
    repository: &dyn Repository,
    scope: Scope,
) -> Result<Observation<ObservedProfile>> {
    let listed: Vec<DeviceProfile> = session.list_as(paths::PPP_PROFILE, &Filter::new()).await?;
    let total_on_device = listed.len();
    let present = present_names(listed.iter().map(|profile| profile.name.as_str()));

    let pools: HashMap<String, i64> = repository
        .list_pools(scope)
        .await?
        .into_iter()
        .map(|pool| (pool.name, pool.id))
        .collect();

    let mut items = Vec::with_capacity(listed.len());
    let mut skipped = 0;
    for profile in listed {
        if profile.name.is_empty() {
            debug!("Skipping profile without a name");
            skipped += 1;
            continue;
        }
        let remote_address_pool_id = profile
            .remote_address
            .as_ref()
            .and_then(|name| pools.get(name).copied());
        items.push(ObservedProfile {
            profile,
            remote_address_pool_id,
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
) -> Result<super::SyncResult> {
    let observation = observe(session, repository, router.scope()).await?;
    let records = repository.list_profiles(router.scope()).await?;
    Ok(reconcile(repository, router, records, observation).await)
}

/// Name of the profile's remote pool, checked against the profile's tenant
pub(super) async fn remote_pool_name(
    repository: &dyn Repository,
    profile: &PppProfile,
) -> Result<Option<String>> {
    let Some(pool_id) = profile.remote_address_pool_id else {
        return Ok(None);
    };
    let pool = repository
        .get_pool(pool_id)
        .await?
        .ok_or_else(|| Error::consistency(format!("Profile {} references missing pool {}", profile.name, pool_id)))?;
    if pool.tenant_id != profile.tenant_id {
        return Err(Error::consistency(format!(
            "Profile {} (tenant {}) cannot use pool {} of tenant {}",
            profile.name, profile.tenant_id, pool.name, pool.tenant_id
        )));
    }
    Ok(Some(pool.name))
}

pub(super) async fn publish(
    session: &DeviceSession,
    profile: &PppProfile,
    remote_pool: Option<String>,
) -> Result<Upserted> {
    let device = DeviceProfile {
        name: profile.name.clone(),
        local_address: profile.local_address.clone(),
        remote_address: remote_pool,
        rate_limit: profile.rate_limit.clone(),
        session_timeout: profile.session_timeout.clone(),
        idle_timeout: profile.idle_timeout.clone(),
        dns_server: profile.dns_server.clone(),
        only_one: profile.only_one,
        comment: profile.comment.clone(),
    };
    upsert_profile(session, &device).await
}
