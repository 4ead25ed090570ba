//! Architectural Contract Test: Activation either fully succeeds or fully reverts
//!
//! Preconditions are checked before the router is contacted. A failure
//! after the session opens removes every object created in the same pass,
//! newest first, and leaves the contract in `pending-install`.

mod common;

use common::*;
use netprov_core::error::Error;
use netprov_core::model::{AuthMethod, Contract, ContractStatus};
use netprov_core::upsert::UpsertAction;
use netprov_core::{MemoryRepository, ProvisioningConfig, ProvisioningEngine, SessionOpener};
use std::sync::Arc;

async fn repository_with(contract: Contract) -> MemoryRepository {
    let repository = MemoryRepository::from_tables(base_tables());
    repository.seed(|t| t.insert_contract(contract)).await;
    repository
}

async fn contract(repository: &MemoryRepository, id: i64) -> Contract {
    repository.snapshot().await.contracts[&id].clone()
}

#[tokio::test]
async fn pppoe_contract_gets_secret_and_queue() {
    let repository =
        repository_with(Contract::new(42, TENANT, 9, PLAN, AuthMethod::Pppoe).with_placement(ROUTER, LAN)).await;
    let device = MockRouter::new();

    let outcome = provisioning(&repository, &device).activate(42).await.unwrap();

    assert_eq!(outcome.access, Some(UpsertAction::Created));
    assert_eq!(outcome.queue, Some(UpsertAction::Created));
    assert_eq!(device.count(Op::Add, "/ppp/secret"), 1, "Exactly one PPP secret upsert");
    assert_eq!(device.count(Op::Add, "/queue/simple"), 1, "Exactly one queue upsert");

    let secret = device.find("/ppp/secret", "name", "contract_42").expect("secret on device");
    assert_eq!(secret.get("service"), Some("pppoe"));
    assert_eq!(secret.get("profile"), Some("plano-100"));
    let password = secret.get("password").unwrap_or_default();
    assert_eq!(password.len(), ProvisioningConfig::default().password_length);

    let queue = device.find("/queue/simple", "name", "contract-42").expect("queue on device");
    assert_eq!(queue.get("target"), Some("contract_42"));
    assert_eq!(queue.get("max-limit"), Some("20M/5M"));

    let stored = contract(&repository, 42).await;
    assert_eq!(stored.status, ContractStatus::Active);
    assert!(stored.activated_at.is_some());
    assert_eq!(stored.pppoe_username.as_deref(), Some("contract_42"));
    assert_eq!(stored.pppoe_password.as_deref(), Some(password), "Issued password is persisted");
    assert_eq!(device.close_count(), 1);
}

#[tokio::test]
async fn address_binding_without_mac_fails_before_any_connection() {
    let repository = repository_with(
        Contract::new(5, TENANT, 9, PLAN, AuthMethod::AddressBinding).with_placement(ROUTER, LAN),
    )
    .await;
    let device = MockRouter::new();

    let err = provisioning(&repository, &device).activate(5).await.unwrap_err();

    assert!(matches!(err, Error::Consistency(_)), "Got {:?}", err);
    assert_eq!(device.connect_count(), 0, "No session may open when a precondition fails");
    assert!(device.calls().is_empty());
    assert_eq!(contract(&repository, 5).await.status, ContractStatus::PendingInstall);
}

#[tokio::test]
async fn unplaced_contract_is_a_consistency_error() {
    let repository = repository_with(Contract::new(6, TENANT, 9, PLAN, AuthMethod::Pppoe)).await;
    let device = MockRouter::new();

    let err = provisioning(&repository, &device).activate(6).await.unwrap_err();
    assert!(matches!(err, Error::Consistency(_)));
    assert_eq!(device.connect_count(), 0);
}

#[tokio::test]
async fn interface_of_another_router_is_refused() {
    let repository =
        repository_with(Contract::new(7, TENANT, 9, PLAN, AuthMethod::Pppoe).with_placement(ROUTER, 99)).await;
    repository
        .seed(|t| {
            let mut foreign = interface(99, "ether5");
            foreign.router_id = 2;
            t.insert_interface(foreign);
        })
        .await;
    let device = MockRouter::new();

    let err = provisioning(&repository, &device).activate(7).await.unwrap_err();
    assert!(matches!(err, Error::Consistency(_)));
    assert_eq!(device.connect_count(), 0);
}

#[tokio::test]
async fn only_pending_contracts_activate() {
    let mut active = Contract::new(8, TENANT, 9, PLAN, AuthMethod::Pppoe).with_placement(ROUTER, LAN);
    active.status = ContractStatus::Active;
    let repository = repository_with(active).await;
    let device = MockRouter::new();

    let err = provisioning(&repository, &device).activate(8).await.unwrap_err();
    assert!(matches!(err, Error::Consistency(_)));
    assert_eq!(device.connect_count(), 0);
}

#[tokio::test]
async fn failure_opening_the_session_reverts_with_reason() {
    let repository =
        repository_with(Contract::new(42, TENANT, 9, PLAN, AuthMethod::Pppoe).with_placement(ROUTER, LAN)).await;
    let device = MockRouter::new();
    let engine = ProvisioningEngine::new(
        Arc::new(repository.clone()),
        SessionOpener::new(Arc::new(MockConnector::refusing(&device, "mock-api"))),
        ProvisioningConfig::default(),
    );

    let err = engine.activate(42).await.unwrap_err();
    match &err {
        Error::Activation { source, rollback_failures } => {
            assert!(matches!(**source, Error::Connectivity(_)));
            assert!(rollback_failures.is_empty());
        }
        other => panic!("Expected activation error, got {:?}", other),
    }
    assert!(matches!(err.root(), Error::Connectivity(_)));

    let stored = contract(&repository, 42).await;
    assert_eq!(stored.status, ContractStatus::PendingInstall);
    assert!(
        stored.status_reason.as_deref().is_some_and(|r| r.starts_with("Activation failed")),
        "Reason must be recorded: {:?}",
        stored.status_reason
    );
}

#[tokio::test]
async fn failure_writing_access_object_leaves_nothing_to_undo() {
    let repository =
        repository_with(Contract::new(42, TENANT, 9, PLAN, AuthMethod::Pppoe).with_placement(ROUTER, LAN)).await;
    let device = MockRouter::new();
    device.reject_add("/ppp/secret");

    let err = provisioning(&repository, &device).activate(42).await.unwrap_err();

    assert!(matches!(err.root(), Error::Protocol(_)));
    assert_eq!(device.count(Op::Remove, "/ppp/secret"), 0);
    assert_eq!(device.count(Op::Add, "/queue/simple"), 0, "Later steps must not run");
    assert_eq!(contract(&repository, 42).await.status, ContractStatus::PendingInstall);
    assert_eq!(device.close_count(), 1, "Session is closed on failure too");
}

#[tokio::test]
async fn failure_at_queue_removes_the_created_binding() {
    let repository = repository_with(
        Contract::new(11, TENANT, 9, PLAN, AuthMethod::AddressBinding)
            .with_placement(ROUTER, LAN)
            .with_binding("aa:bb:cc:00:11:22", "10.20.0.11"),
    )
    .await;
    let device = MockRouter::new();
    device.reject_add("/queue/simple");

    let err = provisioning(&repository, &device).activate(11).await.unwrap_err();

    assert!(matches!(err.root(), Error::Protocol(_)));
    let removals = device
        .calls()
        .into_iter()
        .filter(|c| c.op == Op::Remove)
        .collect::<Vec<_>>();
    assert_eq!(removals.len(), 1, "The binding created in this pass is undone");
    assert_eq!(removals[0].path, "/ip/arp");
    assert!(device.find("/ip/arp", "address", "10.20.0.11").is_none());
    assert_eq!(contract(&repository, 11).await.status, ContractStatus::PendingInstall);
}

#[tokio::test]
async fn failed_undo_is_reported_without_replacing_the_cause() {
    let repository =
        repository_with(Contract::new(42, TENANT, 9, PLAN, AuthMethod::Pppoe).with_placement(ROUTER, LAN)).await;
    let device = MockRouter::new();
    device.reject_add("/queue/simple");
    device.fail_remove("/ppp/secret");

    let err = provisioning(&repository, &device).activate(42).await.unwrap_err();

    match &err {
        Error::Activation { source, rollback_failures } => {
            assert!(matches!(**source, Error::Protocol(_)), "Cause must be the queue failure");
            assert_eq!(rollback_failures.len(), 1);
        }
        other => panic!("Expected activation error, got {:?}", other),
    }
    assert_eq!(device.count(Op::Remove, "/ppp/secret"), 1, "Undo must be attempted");
    assert_eq!(contract(&repository, 42).await.status, ContractStatus::PendingInstall);
}

#[tokio::test]
async fn objects_that_existed_before_the_pass_are_not_undone() {
    let repository =
        repository_with(Contract::new(42, TENANT, 9, PLAN, AuthMethod::Pppoe).with_placement(ROUTER, LAN)).await;
    let device = MockRouter::new();
    device.seed("/ppp/secret", &[("name", "contract_42"), ("password", "old"), ("service", "pppoe")]);
    device.reject_add("/queue/simple");

    provisioning(&repository, &device).activate(42).await.unwrap_err();

    assert_eq!(device.count(Op::Update, "/ppp/secret"), 1);
    assert_eq!(
        device.count(Op::Remove, "/ppp/secret"),
        0,
        "Objects that existed before the pass are left in place"
    );
}

#[tokio::test]
async fn recreated_objects_are_not_undone() {
    let repository =
        repository_with(Contract::new(43, TENANT, 9, PLAN, AuthMethod::Pppoe).with_placement(ROUTER, LAN)).await;
    let device = MockRouter::new();
    device.seed("/ppp/secret", &[("name", "contract_43"), ("password", "old"), ("service", "pppoe")]);
    device.reject_update("/ppp/secret");
    device.reject_add("/queue/simple");

    provisioning(&repository, &device).activate(43).await.unwrap_err();

    assert_eq!(device.count(Op::Remove, "/ppp/secret"), 1, "Only the remove of the recreate itself");
    let secrets = device.objects("/ppp/secret");
    assert_eq!(secrets.len(), 1, "The subscriber keeps a secret after rollback");
    assert_eq!(secrets[0].get("name"), Some("contract_43"));
    assert_eq!(contract(&repository, 43).await.status, ContractStatus::PendingInstall);
}

#[tokio::test]
async fn binding_on_uplink_interface_is_refused() {
    let repository = repository_with(
        Contract::new(12, TENANT, 9, PLAN, AuthMethod::AddressBinding)
            .with_placement(ROUTER, WAN)
            .with_binding("AA:BB:CC:00:11:22", "10.20.0.12"),
    )
    .await;
    let device = MockRouter::new();
    device.with_default_route("ether1");

    let err = provisioning(&repository, &device).activate(12).await.unwrap_err();

    assert!(matches!(err.root(), Error::UnsupportedTopology(_)), "Got {:?}", err);
    assert!(device.objects("/ip/arp").is_empty());
    assert_eq!(contract(&repository, 12).await.status, ContractStatus::PendingInstall);
}

#[tokio::test]
async fn binding_activation_writes_normalized_mac() {
    let repository = repository_with(
        Contract::new(13, TENANT, 9, PLAN, AuthMethod::AddressBinding)
            .with_placement(ROUTER, LAN)
            .with_binding("aa-bb-cc-00-11-22", "10.20.0.13"),
    )
    .await;
    let device = MockRouter::new();
    device.with_default_route("ether1");

    provisioning(&repository, &device).activate(13).await.unwrap();

    let binding = device.find("/ip/arp", "address", "10.20.0.13").expect("binding on device");
    assert_eq!(binding.get("mac-address"), Some("AA:BB:CC:00:11:22"));
    assert_eq!(binding.get("interface"), Some("ether2"));
    let queue = device.find("/queue/simple", "name", "contract-13").expect("queue on device");
    assert_eq!(queue.get("target"), Some("10.20.0.13"));
}

#[tokio::test]
async fn radius_contract_touches_no_device_object() {
    let repository = MemoryRepository::from_tables(base_tables());
    repository
        .seed(|t| {
            t.insert_plan(netprov_core::model::ServicePlan {
                id: 4,
                tenant_id: TENANT,
                name: "RADIUS".into(),
                bandwidth: None,
                ppp_profile: None,
            });
            t.insert_contract(Contract::new(14, TENANT, 9, 4, AuthMethod::Radius).with_placement(ROUTER, LAN));
        })
        .await;
    let device = MockRouter::new();

    let outcome = provisioning(&repository, &device).activate(14).await.unwrap();

    assert_eq!(outcome.access, None);
    assert_eq!(outcome.queue, None);
    assert_eq!(device.write_count(), 0);
    assert_eq!(contract(&repository, 14).await.status, ContractStatus::Active);
}

#[tokio::test]
async fn deleting_active_contract_removes_device_objects_first() {
    let repository =
        repository_with(Contract::new(42, TENANT, 9, PLAN, AuthMethod::Pppoe).with_placement(ROUTER, LAN)).await;
    let device = MockRouter::new();
    let engine = provisioning(&repository, &device);
    engine.activate(42).await.unwrap();

    let report = engine.delete_contract(42).await.unwrap();

    assert_eq!(report.removed, vec!["/ppp/secret".to_string(), "/queue/simple".to_string()]);
    assert!(report.failures.is_empty());
    assert!(device.objects("/ppp/secret").is_empty());
    assert!(device.objects("/queue/simple").is_empty());
    assert!(!repository.snapshot().await.contracts.contains_key(&42));
}

#[tokio::test]
async fn deletion_proceeds_when_the_router_is_unreachable() {
    let mut active = Contract::new(42, TENANT, 9, PLAN, AuthMethod::Pppoe).with_placement(ROUTER, LAN);
    active.status = ContractStatus::Active;
    let repository = repository_with(active).await;
    let device = MockRouter::new();
    let engine = ProvisioningEngine::new(
        Arc::new(repository.clone()),
        SessionOpener::new(Arc::new(MockConnector::refusing(&device, "mock-api"))),
        ProvisioningConfig::default(),
    );

    let report = engine.delete_contract(42).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(!repository.snapshot().await.contracts.contains_key(&42));
}

#[tokio::test]
async fn stubborn_objects_are_neutralized_on_deletion() {
    let mut active = Contract::new(42, TENANT, 9, PLAN, AuthMethod::Pppoe).with_placement(ROUTER, LAN);
    active.status = ContractStatus::Active;
    active.pppoe_username = Some("contract_42".into());
    let repository = repository_with(active).await;
    let device = MockRouter::new();
    device.seed("/ppp/secret", &[("name", "contract_42"), ("password", "x"), ("service", "pppoe")]);
    device.sticky_remove("/ppp/secret");

    let report = provisioning(&repository, &device).delete_contract(42).await.unwrap();

    assert!(report.failures.is_empty());
    let secret = device.find("/ppp/secret", "name", "contract_42").unwrap();
    assert_eq!(secret.get("disabled"), Some("yes"), "Lingering secret must be disabled");
}
