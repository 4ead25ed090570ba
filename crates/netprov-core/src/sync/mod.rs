//! Reconciliation engine
//!
//! Converges the internal records of one router with what the router
//! reports. Every kind follows the same pass:
//!
//! 1. Read the device list and the records of the router's tenant+router scope
//! 2. Index both by natural name
//! 3. Matched: absorb the device fields; save when something changed or the record was inactive
//! 4. Device-only: create an active record with a discovery comment
//! 5. Record-only and active: mark inactive; records are never deleted
//!
//! Per-object repository failures are logged and counted as skipped. A
//! failure to open the session aborts the request.

mod dhcp;
mod pools;
mod pppoe;
mod profiles;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::device::{DeviceSession, SessionOpener};
use crate::locks::RouterLocks;
use crate::model::{Router, Scope};
use crate::traits::Repository;
use crate::upsert::Upserted;
use crate::{Error, Result};

pub use dhcp::DhcpPublication;

/// Counts for one reconciled kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub created: usize,
    pub updated: usize,
    pub deactivated: usize,
    pub total_on_device: usize,
    pub total_internal: usize,
    /// Device objects ignored (empty name, unknown interface, disabled) or
    /// rows whose write failed
    pub skipped: usize,
}

impl SyncResult {
    /// True when the pass changed nothing
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deactivated == 0
    }
}

/// Outcome of [`SyncEngine::sync_all`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub router_id: i64,
    /// Kind name to its counts
    pub results: BTreeMap<String, SyncResult>,
    /// Kind name to the error that stopped it
    pub failures: BTreeMap<String, String>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, kind: &str, outcome: Result<SyncResult>) {
        match outcome {
            Ok(result) => {
                self.results.insert(kind.to_string(), result);
            }
            Err(e) => {
                warn!(router_id = self.router_id, kind, "Reconciliation of kind failed: {}", e);
                self.failures.insert(kind.to_string(), e.to_string());
            }
        }
    }
}

/// Device objects of one kind, ready to diff
pub(crate) struct Observation<O> {
    pub items: Vec<O>,
    /// Names of every named device object, skipped ones included
    pub present: HashSet<String>,
    pub total_on_device: usize,
    pub skipped: usize,
}

/// Non-empty names of a device listing
pub(crate) fn present_names<'a>(names: impl IntoIterator<Item = &'a str>) -> HashSet<String> {
    names
        .into_iter()
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

/// An internal record kind reconciled against device objects
#[async_trait]
pub(crate) trait Synced: Clone + Send + Sync + Sized {
    type Observed: Send + Sync;

    const KIND: &'static str;

    fn name(&self) -> &str;

    fn observed_name(observed: &Self::Observed) -> &str;

    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool);

    /// Copy the device's fields in; true when anything changed
    fn absorb(&mut self, observed: &Self::Observed) -> bool;

    /// New active record for a device-only object
    fn discovered(scope: Scope, observed: &Self::Observed, comment: String) -> Self;

    async fn insert(repository: &dyn Repository, row: &Self) -> Result<Self>;

    async fn save(repository: &dyn Repository, row: &Self) -> Result<()>;
}

/// Set `slot` to `value`, reporting whether it changed
pub(crate) fn assign<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Writes needed to converge records with observations
pub(crate) struct Plan<R, O> {
    pub updates: Vec<R>,
    pub creates: Vec<O>,
    pub deactivations: Vec<R>,
    /// Device objects sharing a name with an earlier one
    pub duplicates: usize,
}

/// Records are deactivated only when their name is in neither `observed`
/// nor `present`; a skipped device object still keeps its record alive.
pub(crate) fn diff<R: Synced>(
    records: Vec<R>,
    observed: Vec<R::Observed>,
    present: &HashSet<String>,
) -> Plan<R, R::Observed> {
    let mut by_name: HashMap<String, R> = HashMap::new();
    for record in records {
        by_name.entry(record.name().to_string()).or_insert(record);
    }

    let mut plan = Plan {
        updates: Vec::new(),
        creates: Vec::new(),
        deactivations: Vec::new(),
        duplicates: 0,
    };
    let mut seen = HashSet::new();

    for item in observed {
        let name = R::observed_name(&item).to_string();
        if !seen.insert(name.clone()) {
            debug!(kind = R::KIND, name = %name, "Ignoring duplicate device object");
            plan.duplicates += 1;
            continue;
        }
        match by_name.get(&name) {
            Some(record) => {
                let mut record = record.clone();
                let mut changed = record.absorb(&item);
                if !record.is_active() {
                    record.set_active(true);
                    changed = true;
                }
                if changed {
                    plan.updates.push(record);
                }
            }
            None => plan.creates.push(item),
        }
    }

    let mut absent: Vec<R> = by_name
        .into_iter()
        .filter(|(name, record)| record.is_active() && !seen.contains(name) && !present.contains(name))
        .map(|(_, record)| record)
        .collect();
    absent.sort_by(|a, b| a.name().cmp(b.name()));
    for mut record in absent {
        record.set_active(false);
        plan.deactivations.push(record);
    }

    plan
}

pub(crate) fn discovery_comment(router: &Router) -> String {
    format!("Discovered on device {} by reconciliation", router.name)
}

/// Apply a diff to the repository
pub(crate) async fn reconcile<R: Synced>(
    repository: &dyn Repository,
    router: &Router,
    records: Vec<R>,
    observation: Observation<R::Observed>,
) -> SyncResult {
    let scope = router.scope();
    let mut result = SyncResult {
        total_on_device: observation.total_on_device,
        total_internal: records.len(),
        skipped: observation.skipped,
        ..SyncResult::default()
    };

    let plan = diff(records, observation.items, &observation.present);
    result.skipped += plan.duplicates;

    for row in plan.updates {
        match R::save(repository, &row).await {
            Ok(()) => {
                debug!(kind = R::KIND, name = row.name(), "Updated record from device");
                result.updated += 1;
            }
            Err(e) => {
                warn!(kind = R::KIND, name = row.name(), "Failed to update record: {}", e);
                result.skipped += 1;
            }
        }
    }

    for observed in plan.creates {
        let row = R::discovered(scope, &observed, discovery_comment(router));
        match R::insert(repository, &row).await {
            Ok(created) => {
                debug!(kind = R::KIND, name = created.name(), "Created record from device");
                result.created += 1;
            }
            Err(e) => {
                warn!(kind = R::KIND, name = row.name(), "Failed to create record: {}", e);
                result.skipped += 1;
            }
        }
    }

    for row in plan.deactivations {
        match R::save(repository, &row).await {
            Ok(()) => {
                debug!(kind = R::KIND, name = row.name(), "Deactivated record absent from device");
                result.deactivated += 1;
            }
            Err(e) => {
                warn!(kind = R::KIND, name = row.name(), "Failed to deactivate record: {}", e);
                result.skipped += 1;
            }
        }
    }

    info!(
        router_id = router.id,
        kind = R::KIND,
        created = result.created,
        updated = result.updated,
        deactivated = result.deactivated,
        skipped = result.skipped,
        "Reconciliation finished"
    );
    result
}

/// Reconciles and publishes network objects of one router at a time
pub struct SyncEngine {
    repository: Arc<dyn Repository>,
    opener: SessionOpener,
    config: SyncConfig,
    locks: Arc<RouterLocks>,
}

impl SyncEngine {
    pub fn new(repository: Arc<dyn Repository>, opener: SessionOpener, config: SyncConfig) -> Self {
        Self {
            repository,
            opener,
            config,
            locks: Arc::new(RouterLocks::new()),
        }
    }

    /// Share router locks with other engines of this process
    pub fn with_locks(mut self, locks: Arc<RouterLocks>) -> Self {
        self.locks = locks;
        self
    }

    async fn router(&self, router_id: i64) -> Result<Router> {
        self.repository
            .get_router(router_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("router {}", router_id)))
    }

    /// Reconcile address pools
    pub async fn sync_pools(&self, router_id: i64) -> Result<SyncResult> {
        let _guard = self.locks.acquire_if(self.config.serialize_per_router, router_id).await;
        let router = self.router(router_id).await?;
        let session = self.opener.open(&router).await?;
        let result = pools::sync(&session, self.repository.as_ref(), &router).await;
        session.close().await;
        result
    }

    /// Reconcile PPP profiles
    pub async fn sync_profiles(&self, router_id: i64) -> Result<SyncResult> {
        let _guard = self.locks.acquire_if(self.config.serialize_per_router, router_id).await;
        let router = self.router(router_id).await?;
        let session = self.opener.open(&router).await?;
        let result = profiles::sync(&session, self.repository.as_ref(), &router).await;
        session.close().await;
        result
    }

    /// Reconcile PPPoE servers
    pub async fn sync_pppoe_servers(&self, router_id: i64) -> Result<SyncResult> {
        let _guard = self.locks.acquire_if(self.config.serialize_per_router, router_id).await;
        let router = self.router(router_id).await?;
        let session = self.opener.open(&router).await?;
        let result = pppoe::sync(&session, self.repository.as_ref(), &router, &self.config).await;
        session.close().await;
        result
    }

    /// Reconcile DHCP servers
    pub async fn sync_dhcp_servers(&self, router_id: i64) -> Result<SyncResult> {
        let _guard = self.locks.acquire_if(self.config.serialize_per_router, router_id).await;
        let router = self.router(router_id).await?;
        let session = self.opener.open(&router).await?;
        let result = dhcp::sync(&session, self.repository.as_ref(), &router, &self.config).await;
        session.close().await;
        result
    }

    /// Reconcile every kind over one session
    ///
    /// Kinds run in dependency order (pools before the profiles and servers
    /// that reference them). A failed kind is reported and the pass moves on.
    pub async fn sync_all(&self, router_id: i64) -> Result<SyncReport> {
        let _guard = self.locks.acquire_if(self.config.serialize_per_router, router_id).await;
        let router = self.router(router_id).await?;
        let session = self.opener.open(&router).await?;
        let report = self.sync_all_with(&session, &router).await;
        session.close().await;
        Ok(report)
    }

    async fn sync_all_with(&self, session: &DeviceSession, router: &Router) -> SyncReport {
        let repository = self.repository.as_ref();
        let mut report = SyncReport {
            router_id: router.id,
            ..SyncReport::default()
        };
        report.record("pools", pools::sync(session, repository, router).await);
        report.record("profiles", profiles::sync(session, repository, router).await);
        report.record(
            "pppoe_servers",
            pppoe::sync(session, repository, router, &self.config).await,
        );
        report.record(
            "dhcp_servers",
            dhcp::sync(session, repository, router, &self.config).await,
        );
        report
    }

    /// Push one pool record to its router
    pub async fn publish_pool(&self, pool_id: i64) -> Result<Upserted> {
        let pool = self
            .repository
            .get_pool(pool_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("pool {}", pool_id)))?;
        let _guard = self.locks.acquire_if(self.config.serialize_per_router, pool.router_id).await;
        let router = self.router(pool.router_id).await?;
        let session = self.opener.open(&router).await?;
        let result = pools::publish(&session, &pool).await;
        session.close().await;
        result
    }

    /// Push one profile record to its router
    ///
    /// The remote pool, if any, is resolved to its name and must share the
    /// profile's tenant.
    pub async fn publish_profile(&self, profile_id: i64) -> Result<Upserted> {
        let profile = self
            .repository
            .get_profile(profile_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("profile {}", profile_id)))?;
        let remote_pool = profiles::remote_pool_name(self.repository.as_ref(), &profile).await?;
        let _guard = self
            .locks
            .acquire_if(self.config.serialize_per_router, profile.router_id)
            .await;
        let router = self.router(profile.router_id).await?;
        let session = self.opener.open(&router).await?;
        let result = profiles::publish(&session, &profile, remote_pool).await;
        session.close().await;
        result
    }

    /// Push one PPPoE server record to its router
    ///
    /// Refused with [`Error::UnsupportedTopology`] on the uplink interface
    /// unless `allow_uplink` is set.
    pub async fn publish_pppoe_server(&self, server_id: i64, allow_uplink: bool) -> Result<Upserted> {
        let server = self
            .repository
            .get_pppoe_server(server_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("PPPoE server {}", server_id)))?;
        let prepared = pppoe::prepare(self.repository.as_ref(), &server).await?;
        let _guard = self
            .locks
            .acquire_if(self.config.serialize_per_router, server.router_id)
            .await;
        let router = self.router(server.router_id).await?;
        let session = self.opener.open(&router).await?;
        let result = pppoe::publish(&session, &prepared, allow_uplink).await;
        session.close().await;
        result
    }

    /// Push one DHCP server record and its networks to its router
    pub async fn publish_dhcp_server(&self, server_id: i64, allow_uplink: bool) -> Result<DhcpPublication> {
        let server = self
            .repository
            .get_dhcp_server(server_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("DHCP server {}", server_id)))?;
        let prepared = dhcp::prepare(self.repository.as_ref(), &server).await?;
        let _guard = self
            .locks
            .acquire_if(self.config.serialize_per_router, server.router_id)
            .await;
        let router = self.router(server.router_id).await?;
        let session = self.opener.open(&router).await?;
        let result = dhcp::publish(&session, &prepared, allow_uplink).await;
        session.close().await;
        result
    }
}
