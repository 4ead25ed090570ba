//! Subscriber provisioning
//!
//! Drives a contract from `pending-install` to `active`:
//!
//! 1. Open a session to the contract's router
//! 2. Upsert the access object of its method (binding, PPP secret or
//!    portal user; nothing for RADIUS)
//! 3. Upsert the `contract-{id}` queue when the plan carries a bandwidth
//! 4. Mark the contract active
//!
//! Preconditions are checked before any device I/O. The first failing step
//! unwinds the objects this pass created, newest first, and reverts the
//! contract to `pending-install` with a reason.

mod compensation;
mod reset;

pub use reset::ResetOutcome;

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ProvisioningConfig;
use crate::device::paths;
use crate::device::records::{AddressBinding, HotspotUser, Managed, PppSecret, SimpleQueue};
use crate::device::{DeviceSession, SessionOpener};
use crate::locks::RouterLocks;
use crate::model::{AuthMethod, Contract, ContractStatus, Router, RouterInterface, ServicePlan};
use crate::traits::Repository;
use crate::upsert::{Removal, UpsertAction, UpsertSpec, Upserted, disabled_placeholder, ensure, remove_by_key};
use crate::{Error, Result};

use compensation::Compensations;

/// Result of a successful activation
#[derive(Debug, Clone, Serialize)]
pub struct ActivationOutcome {
    pub contract_id: i64,
    pub method: AuthMethod,
    /// `None` for RADIUS
    pub access: Option<UpsertAction>,
    /// `None` when the plan has no bandwidth
    pub queue: Option<UpsertAction>,
    /// Some object was overwritten in place after a remove had no effect
    pub degraded: bool,
}

/// Result of deleting a contract
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeprovisionReport {
    pub contract_id: i64,
    /// `path` of every object removal that completed
    pub removed: Vec<String>,
    /// Removal failures; they never block deletion
    pub failures: Vec<String>,
}

/// Router, interface and plan of a contract
pub(crate) struct Placement {
    pub router: Router,
    pub interface: RouterInterface,
    pub plan: ServicePlan,
}

/// The object granting access for one method
pub(crate) enum Access {
    Binding(AddressBinding),
    Secret(PppSecret),
    Portal(HotspotUser),
    External,
}

impl Access {
    fn spec(&self) -> Option<UpsertSpec<'_>> {
        match self {
            Access::Binding(binding) => Some(UpsertSpec::for_record(binding)),
            Access::Secret(secret) => Some(UpsertSpec::for_record(secret)),
            Access::Portal(user) => Some(UpsertSpec::for_record(user)),
            Access::External => None,
        }
    }

    fn path(&self) -> Option<&'static str> {
        match self {
            Access::Binding(_) => Some(AddressBinding::PATH),
            Access::Secret(_) => Some(PppSecret::PATH),
            Access::Portal(_) => Some(HotspotUser::PATH),
            Access::External => None,
        }
    }

    fn label(&self) -> String {
        match self {
            Access::Binding(b) => format!("address binding {}", b.address),
            Access::Secret(s) => format!("PPP secret {}", s.name),
            Access::Portal(u) => format!("hotspot user {}", u.name),
            Access::External => "external access".to_string(),
        }
    }
}

/// Normalize a MAC address to upper-case colon form
pub fn normalize_mac(mac: &str) -> Option<String> {
    let groups: Vec<&str> = mac.trim().split([':', '-']).collect();
    let valid = groups.len() == 6
        && groups
            .iter()
            .all(|g| g.len() == 2 && g.chars().all(|c| c.is_ascii_hexdigit()));
    valid.then(|| groups.join(":").to_ascii_uppercase())
}

/// Random alphanumeric password
pub fn generate_password(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn comment_for(contract: &Contract) -> String {
    format!("netprov contract {}", contract.id)
}

/// Drives contract activation, reset and deletion
pub struct ProvisioningEngine {
    repository: Arc<dyn Repository>,
    opener: SessionOpener,
    config: ProvisioningConfig,
    locks: Arc<RouterLocks>,
}

impl ProvisioningEngine {
    pub fn new(repository: Arc<dyn Repository>, opener: SessionOpener, config: ProvisioningConfig) -> Self {
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

    async fn contract(&self, contract_id: i64) -> Result<Contract> {
        self.repository
            .get_contract(contract_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("contract {}", contract_id)))
    }

    /// Resolve router, interface and plan, refusing inconsistent contracts
    pub(crate) async fn placement(&self, contract: &Contract) -> Result<Placement> {
        let (Some(router_id), Some(interface_id)) = (contract.router_id, contract.interface_id) else {
            return Err(Error::consistency(format!(
                "Contract {} has no router and interface assigned",
                contract.id
            )));
        };

        let router = self
            .repository
            .get_router(router_id)
            .await?
            .ok_or_else(|| Error::consistency(format!("Contract {} references missing router {}", contract.id, router_id)))?;
        if !router.is_active {
            return Err(Error::consistency(format!("Router {} is inactive", router.id)));
        }

        let interface = self
            .repository
            .get_interface(interface_id)
            .await?
            .filter(|iface| iface.router_id == router.id)
            .ok_or_else(|| {
                Error::consistency(format!(
                    "Interface {} does not belong to router {}",
                    interface_id, router.id
                ))
            })?;

        let plan = self
            .repository
            .get_plan(contract.plan_id)
            .await?
            .ok_or_else(|| Error::consistency(format!("Contract {} references missing plan {}", contract.id, contract.plan_id)))?;

        if contract.auth_method == AuthMethod::AddressBinding {
            check_binding(contract)?;
        }

        Ok(Placement {
            router,
            interface,
            plan,
        })
    }

    /// Generate missing credentials for the contract's method
    fn issue_credentials(&self, contract: &mut Contract) {
        match contract.auth_method {
            AuthMethod::Pppoe => {
                if contract.pppoe_username.is_none() {
                    contract.pppoe_username = Some(self.config.username_for(contract.id));
                }
                if contract.pppoe_password.is_none() {
                    contract.pppoe_password = Some(generate_password(self.config.password_length));
                }
            }
            AuthMethod::CaptivePortal => {
                if contract.portal_username.is_none() {
                    contract.portal_username = Some(self.config.username_for(contract.id));
                }
                if contract.portal_password.is_none() {
                    contract.portal_password = Some(generate_password(self.config.password_length));
                }
            }
            AuthMethod::AddressBinding | AuthMethod::Radius => {}
        }
    }

    /// Access object for a contract whose credentials are issued
    pub(crate) fn access_for(&self, contract: &Contract, placement: &Placement) -> Result<Access> {
        let missing = |what: &str| Error::consistency(format!("Contract {} has no {}", contract.id, what));
        let access = match contract.auth_method {
            AuthMethod::AddressBinding => {
                let mac = contract.mac_address.as_deref().and_then(normalize_mac).ok_or_else(|| missing("valid MAC address"))?;
                let address = contract.ip_address.clone().ok_or_else(|| missing("address"))?;
                Access::Binding(AddressBinding {
                    address,
                    mac_address: mac,
                    interface: placement.interface.name.clone(),
                    comment: Some(comment_for(contract)),
                })
            }
            AuthMethod::Pppoe => Access::Secret(PppSecret {
                name: contract.pppoe_username.clone().ok_or_else(|| missing("PPPoE username"))?,
                password: contract.pppoe_password.clone().ok_or_else(|| missing("PPPoE password"))?,
                service: self.config.pppoe_service.clone(),
                profile: placement.plan.ppp_profile.clone(),
                remote_address: contract.ip_address.clone(),
                comment: Some(comment_for(contract)),
            }),
            AuthMethod::CaptivePortal => Access::Portal(HotspotUser {
                name: contract.portal_username.clone().ok_or_else(|| missing("portal username"))?,
                password: contract.portal_password.clone().ok_or_else(|| missing("portal password"))?,
                server: self.config.hotspot_server.clone(),
                address: contract.ip_address.clone(),
                mac_address: contract.mac_address.as_deref().and_then(normalize_mac),
                comment: Some(comment_for(contract)),
            }),
            AuthMethod::Radius => Access::External,
        };
        Ok(access)
    }

    /// Queue for the plan bandwidth, if the plan has one and there is a target
    fn queue_for(&self, contract: &Contract, plan: &ServicePlan) -> Option<SimpleQueue> {
        let limit = plan.bandwidth.clone()?;
        let target = match contract.auth_method {
            AuthMethod::AddressBinding => contract.ip_address.clone(),
            AuthMethod::Pppoe => contract.pppoe_username.clone(),
            AuthMethod::CaptivePortal => contract
                .ip_address
                .clone()
                .or_else(|| contract.portal_username.clone()),
            AuthMethod::Radius => contract.ip_address.clone(),
        };
        let Some(target) = target else {
            info!(contract_id = contract.id, "No queue target; skipping bandwidth queue");
            return None;
        };
        Some(SimpleQueue {
            name: self.config.queue_name_for(contract.id),
            target,
            max_limit: Some(limit),
            comment: Some(comment_for(contract)),
        })
    }

    /// Activate a pending contract
    ///
    /// # Errors
    ///
    /// - [`Error::Consistency`]: a precondition failed; nothing was touched
    /// - [`Error::Activation`]: a step failed; the contract is back in
    ///   `pending-install` and `source` holds the failing step's error
    pub async fn activate(&self, contract_id: i64) -> Result<ActivationOutcome> {
        let mut contract = self.contract(contract_id).await?;
        if contract.status != ContractStatus::PendingInstall {
            return Err(Error::consistency(format!(
                "Contract {} is {:?}, not pending-install",
                contract.id, contract.status
            )));
        }
        let placement = self.placement(&contract).await?;

        let _guard = self
            .locks
            .acquire_if(self.config.serialize_per_router, placement.router.id)
            .await;

        self.issue_credentials(&mut contract);
        let access = self.access_for(&contract, &placement)?;
        let queue = self.queue_for(&contract, &placement.plan);

        info!(
            contract_id,
            router_id = placement.router.id,
            method = %contract.auth_method,
            "Activating contract"
        );

        let session = match self.opener.open(&placement.router).await {
            Ok(session) => session,
            Err(e) => return Err(self.revert(&mut contract, e, Vec::new()).await),
        };

        let mut compensations = Compensations::new();
        let forward = self
            .forward(&session, &mut contract, &access, queue.as_ref(), &mut compensations)
            .await;

        let result = match forward {
            Ok(outcome) => {
                info!(contract_id, "Contract activated");
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    contract_id,
                    pending = compensations.len(),
                    "Activation failed, unwinding: {}",
                    e
                );
                let rollback_failures = compensations.unwind(&session, contract_id).await;
                Err(self.revert(&mut contract, e, rollback_failures).await)
            }
        };

        session.close().await;
        result
    }

    /// Steps 2-4; every created object is registered before the next step
    async fn forward(
        &self,
        session: &DeviceSession,
        contract: &mut Contract,
        access: &Access,
        queue: Option<&SimpleQueue>,
        compensations: &mut Compensations,
    ) -> Result<ActivationOutcome> {
        let mut degraded = false;

        let access_action = match (access.spec(), access.path()) {
            (Some(spec), Some(path)) => {
                if let Access::Binding(binding) = access {
                    session
                        .guard_not_uplink(&binding.interface, self.config.allow_uplink_binding)
                        .await?;
                }
                let upserted = ensure(session, spec).await?;
                register(compensations, path, &upserted, access.label());
                degraded |= upserted.degraded;
                Some(upserted.action)
            }
            _ => {
                debug!(contract_id = contract.id, "Access delegated externally; no device object");
                None
            }
        };

        let queue_action = match queue {
            Some(queue) => {
                let upserted = ensure(session, UpsertSpec::for_record(queue)).await?;
                register(
                    compensations,
                    SimpleQueue::PATH,
                    &upserted,
                    format!("queue {}", queue.name),
                );
                degraded |= upserted.degraded;
                Some(upserted.action)
            }
            None => None,
        };

        contract.status = ContractStatus::Active;
        contract.status_reason = None;
        contract.activated_at = Some(Utc::now());
        if let Err(e) = self.repository.update_contract(contract).await {
            contract.status = ContractStatus::PendingInstall;
            contract.activated_at = None;
            return Err(e);
        }

        Ok(ActivationOutcome {
            contract_id: contract.id,
            method: contract.auth_method,
            access: access_action,
            queue: queue_action,
            degraded,
        })
    }

    /// Put the contract back in `pending-install` and wrap the error
    async fn revert(&self, contract: &mut Contract, source: Error, mut rollback_failures: Vec<Error>) -> Error {
        contract.status = ContractStatus::PendingInstall;
        contract.activated_at = None;
        contract.status_reason = Some(format!("Activation failed: {}", source));
        if let Err(e) = self.repository.update_contract(contract).await {
            warn!(contract_id = contract.id, "Could not persist reverted contract: {}", e);
            rollback_failures.push(e);
        }
        Error::Activation {
            source: Box::new(source),
            rollback_failures,
        }
    }

    /// Delete a contract, first removing its device objects when active
    ///
    /// Removal failures are logged and reported; the row is deleted anyway.
    pub async fn delete_contract(&self, contract_id: i64) -> Result<DeprovisionReport> {
        let contract = self.contract(contract_id).await?;
        let mut report = DeprovisionReport {
            contract_id,
            ..DeprovisionReport::default()
        };

        if contract.status == ContractStatus::Active
            && let Some(router_id) = contract.router_id
        {
            let _guard = self
                .locks
                .acquire_if(self.config.serialize_per_router, router_id)
                .await;
            self.deprovision(&contract, router_id, &mut report).await;
        }

        self.repository.delete_contract(contract_id).await?;
        info!(contract_id, failures = report.failures.len(), "Contract deleted");
        Ok(report)
    }

    async fn deprovision(&self, contract: &Contract, router_id: i64, report: &mut DeprovisionReport) {
        let router = match self.repository.get_router(router_id).await {
            Ok(Some(router)) => router,
            Ok(None) => {
                report.failures.push(format!("router {} not found", router_id));
                return;
            }
            Err(e) => {
                report.failures.push(e.to_string());
                return;
            }
        };
        let session = match self.opener.open(&router).await {
            Ok(session) => session,
            Err(e) => {
                warn!(contract_id = contract.id, "Cannot reach router to remove device objects: {}", e);
                report.failures.push(e.to_string());
                return;
            }
        };

        let placeholder = disabled_placeholder(&format!("netprov contract {} deleted", contract.id));
        for (path, key_field, key) in self.device_keys(contract) {
            match remove_by_key(&session, path, key_field, &key, &placeholder).await {
                Ok(Removal::Absent) => debug!(contract_id = contract.id, path, key = %key, "Nothing to remove"),
                Ok(removal) => {
                    info!(contract_id = contract.id, path, key = %key, ?removal, "Removed device object");
                    report.removed.push(path.to_string());
                }
                Err(e) => {
                    warn!(contract_id = contract.id, path, key = %key, "Failed to remove device object: {}", e);
                    report.failures.push(format!("{} {}: {}", path, key, e));
                }
            }
        }
        session.close().await;
    }

    /// Natural keys of the objects an active contract owns
    fn device_keys(&self, contract: &Contract) -> Vec<(&'static str, &'static str, String)> {
        let mut keys = Vec::new();
        match contract.auth_method {
            AuthMethod::AddressBinding => {
                if let Some(address) = &contract.ip_address {
                    keys.push((paths::ARP, AddressBinding::KEY_FIELD, address.clone()));
                }
            }
            AuthMethod::Pppoe => {
                let name = contract
                    .pppoe_username
                    .clone()
                    .unwrap_or_else(|| self.config.username_for(contract.id));
                keys.push((paths::PPP_SECRET, PppSecret::KEY_FIELD, name));
            }
            AuthMethod::CaptivePortal => {
                let name = contract
                    .portal_username
                    .clone()
                    .unwrap_or_else(|| self.config.username_for(contract.id));
                keys.push((paths::HOTSPOT_USER, HotspotUser::KEY_FIELD, name));
            }
            AuthMethod::Radius => {}
        }
        keys.push((paths::SIMPLE_QUEUE, SimpleQueue::KEY_FIELD, self.config.queue_name_for(contract.id)));
        keys
    }
}

fn check_binding(contract: &Contract) -> Result<()> {
    let mac = contract.mac_address.as_deref().unwrap_or_default();
    if normalize_mac(mac).is_none() {
        return Err(Error::consistency(format!(
            "Contract {} uses address binding but has no valid MAC address",
            contract.id
        )));
    }
    let address = contract.ip_address.as_deref().unwrap_or_default();
    if address.parse::<Ipv4Addr>().is_err() {
        return Err(Error::consistency(format!(
            "Contract {} uses address binding but has no valid address",
            contract.id
        )));
    }
    Ok(())
}

/// Register an undo for objects this pass brought into existence
///
/// A `Recreated` object replaced one that was already there; removing it on
/// rollback would leave the subscriber with less than before, so it stays.
fn register(compensations: &mut Compensations, path: &'static str, upserted: &Upserted, label: String) {
    if upserted.action == UpsertAction::Created {
        compensations.register(path, upserted.object.id.clone(), label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_normalization() {
        assert_eq!(normalize_mac("aa-bb-cc-00-11-22").as_deref(), Some("AA:BB:CC:00:11:22"));
        assert_eq!(normalize_mac(" AA:BB:CC:00:11:22 ").as_deref(), Some("AA:BB:CC:00:11:22"));
        assert!(normalize_mac("").is_none());
        assert!(normalize_mac("AA:BB:CC:00:11").is_none());
        assert!(normalize_mac("GG:BB:CC:00:11:22").is_none());
    }

    #[test]
    fn generated_passwords_are_alphanumeric() {
        let password = generate_password(12);
        assert_eq!(password.len(), 12);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(password, generate_password(12));
    }

    #[test]
    fn binding_check_requires_mac_and_address() {
        let contract = Contract::new(1, 1, 1, 1, AuthMethod::AddressBinding);
        assert!(matches!(check_binding(&contract), Err(Error::Consistency(_))));

        let contract = contract.with_binding("AA:BB:CC:00:11:22", "10.0.0.5");
        assert!(check_binding(&contract).is_ok());

        let mut bad_ip = contract.clone();
        bad_ip.ip_address = Some("10.0.0".into());
        assert!(check_binding(&bad_ip).is_err());
    }
}
