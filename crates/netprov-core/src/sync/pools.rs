use async_trait::async_trait;
use tracing::debug;

use super::{Observation, Synced, assign, present_names, reconcile};
use crate::Result;
use crate::device::DeviceSession;
use crate::device::paths;
use crate::device::records::DevicePool;
use crate::model::{IpPool, Router, Scope};
use crate::traits::{Filter, Repository};
use crate::upsert::{Upserted, upsert_pool};

#[async_trait]
impl Synced for IpPool {
    type Observed = DevicePool;

    const KIND: &'static str = "pool";

    fn name(&self) -> &str {
        &self.name
    }

    fn observed_name(observed: &DevicePool) -> &str {
        &observed.name
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    fn absorb(&mut self, observed: &DevicePool) -> bool {
        let ranges = assign(&mut self.ranges, observed.ranges.clone());
        let next_pool = assign(&mut self.next_pool, observed.next_pool.clone());
        ranges || next_pool
    }

    fn discovered(scope: Scope, observed: &DevicePool, comment: String) -> Self {
        IpPool {
            id: 0,
            tenant_id: scope.tenant_id,
            router_id: scope.router_id,
            name: observed.name.clone(),
            ranges: observed.ranges.clone(),
            next_pool: observed.next_pool.clone(),
            comment: Some(comment),
            is_active: true,
        }
    }

    async fn insert(repository: &dyn Repository, row: &Self) -> Result<Self> {
        repository.create_pool(row).await
    }

    async fn save(repository: &dyn Repository, row: &Self) -> Result<()> {
        repository.update_pool(row).await
    }
}

/// Pools with a name and ranges
async fn observe(session: &DeviceSession) -> Result<Observation<DevicePool>> {
    let listed: Vec<DevicePool> = session.list_as(paths::IP_POOL, &Filter::new()).await?;
    let total_on_device = listed.len();
    let present = present_names(listed.iter().map(|pool| pool.name.as_str()));

    let items: Vec<DevicePool> = listed
        .into_iter()
        .filter(|pool| {
            let usable = !pool.name.is_empty() && !pool.ranges.is_empty();
            if !usable {
                debug!(name = %pool.name, "Skipping pool without name or ranges");
            }
            usable
        })
        .collect();
    let skipped = total_on_device - items.len();

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
    let observation = observe(session).await?;
    let records = repository.list_pools(router.scope()).await?;
    Ok(reconcile(repository, router, records, observation).await)
}

pub(super) async fn publish(session: &DeviceSession, pool: &IpPool) -> Result<Upserted> {
    let device = DevicePool {
        name: pool.name.clone(),
        ranges: pool.ranges.clone(),
        next_pool: pool.next_pool.clone(),
        comment: pool.comment.clone(),
    };
    upsert_pool(session, &device).await
}
