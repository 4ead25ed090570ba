//! Test doubles and fixtures for contract tests
//!
//! `MockRouter` is an in-memory device: collections keyed by path, a call
//! log, and switches to inject the failures real firmware produces.

#![allow(dead_code)]

use async_trait::async_trait;
use netprov_core::error::{Error, Result};
use netprov_core::model::{Router, RouterInterface, ServicePlan};
use netprov_core::repository::Tables;
use netprov_core::traits::{
    DeviceConnection, DeviceConnector, DeviceObject, DeviceTarget, Fields, Filter,
};
use netprov_core::{MemoryRepository, ProvisioningConfig, ProvisioningEngine, SessionOpener, SyncConfig, SyncEngine};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Kind of device call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    List,
    Add,
    Update,
    Remove,
}

/// One recorded device call
#[derive(Debug, Clone)]
pub struct Call {
    pub op: Op,
    pub path: String,
    pub id: Option<String>,
    pub fields: Fields,
}

#[derive(Default)]
struct DeviceState {
    tables: BTreeMap<String, Vec<DeviceObject>>,
    next_id: u32,
    calls: Vec<Call>,
    reject_add: HashSet<String>,
    reject_update: HashSet<String>,
    fail_remove: HashSet<String>,
    sticky_remove: HashSet<String>,
    fail_list: HashSet<String>,
}

/// In-memory router shared by every connection made to it
#[derive(Clone, Default)]
pub struct MockRouter {
    state: Arc<Mutex<DeviceState>>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MockRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an object on the device without logging a call
    pub fn seed(&self, path: &str, pairs: &[(&str, &str)]) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("*{:X}", state.next_id);
        let fields = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        state
            .tables
            .entry(path.to_string())
            .or_default()
            .push(DeviceObject::new(id.clone(), fields));
        id
    }

    /// Active default route leaving through `interface`
    pub fn with_default_route(&self, interface: &str) {
        let immediate = format!("203.0.113.1%{interface}");
        self.seed(
            "/ip/route",
            &[
                ("dst-address", "0.0.0.0/0"),
                ("gateway", "203.0.113.1"),
                ("immediate-gw", immediate.as_str()),
                ("active", "true"),
            ],
        );
    }

    pub fn objects(&self, path: &str) -> Vec<DeviceObject> {
        let state = self.state.lock().unwrap();
        state.tables.get(path).cloned().unwrap_or_default()
    }

    pub fn find(&self, path: &str, field: &str, value: &str) -> Option<DeviceObject> {
        self.objects(path)
            .into_iter()
            .find(|o| o.get(field) == Some(value))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Write calls (add/update/remove) against `path`
    pub fn writes(&self, path: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.path == path && c.op != Op::List)
            .collect()
    }

    pub fn count(&self, op: Op, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.op == op && c.path == path)
            .count()
    }

    pub fn write_count(&self) -> usize {
        self.calls().iter().filter(|c| c.op != Op::List).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// `add` on `path` fails with a protocol error
    pub fn reject_add(&self, path: &str) {
        self.state.lock().unwrap().reject_add.insert(path.to_string());
    }

    /// `set` on `path` fails with a protocol error
    pub fn reject_update(&self, path: &str) {
        self.state.lock().unwrap().reject_update.insert(path.to_string());
    }

    /// `remove` on `path` fails with a protocol error
    pub fn fail_remove(&self, path: &str) {
        self.state.lock().unwrap().fail_remove.insert(path.to_string());
    }

    /// `remove` on `path` succeeds but leaves the object listed
    pub fn sticky_remove(&self, path: &str) {
        self.state.lock().unwrap().sticky_remove.insert(path.to_string());
    }

    /// `print` on `path` fails with a connectivity error
    pub fn fail_list(&self, path: &str) {
        self.state.lock().unwrap().fail_list.insert(path.to_string());
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn log(state: &mut DeviceState, op: Op, path: &str, id: Option<&str>, fields: &Fields) {
        state.calls.push(Call {
            op,
            path: path.to_string(),
            id: id.map(String::from),
            fields: fields.clone(),
        });
    }
}

/// Connector handing out connections to a [`MockRouter`]
pub struct MockConnector {
    router: MockRouter,
    name: &'static str,
    refuse: bool,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(router: &MockRouter, name: &'static str) -> Self {
        Self {
            router: router.clone(),
            name,
            refuse: false,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Connector whose every connect fails
    pub fn refusing(router: &MockRouter, name: &'static str) -> Self {
        Self {
            refuse: true,
            ..Self::new(router, name)
        }
    }

    pub fn attempts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.attempts)
    }
}

#[async_trait]
impl DeviceConnector for MockConnector {
    async fn connect(&self, target: &DeviceTarget) -> Result<Box<dyn DeviceConnection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(Error::connectivity(format!("{}: connection refused by {}", self.name, target.host)));
        }
        self.router.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            router: self.router.clone(),
            name: self.name,
        }))
    }

    fn backend_name(&self) -> &'static str {
        self.name
    }
}

struct MockConnection {
    router: MockRouter,
    name: &'static str,
}

#[async_trait]
impl DeviceConnection for MockConnection {
    async fn list(&self, path: &str, filter: &Filter) -> Result<Vec<DeviceObject>> {
        let mut state = self.router.state.lock().unwrap();
        let query: Fields = filter.pairs().iter().cloned().collect();
        MockRouter::log(&mut state, Op::List, path, None, &query);
        if state.fail_list.contains(path) {
            return Err(Error::connectivity("connection reset by peer"));
        }
        Ok(state
            .tables
            .get(path)
            .map(|objects| objects.iter().filter(|o| filter.matches(o)).cloned().collect())
            .unwrap_or_default())
    }

    async fn add(&self, path: &str, fields: &Fields) -> Result<String> {
        let mut state = self.router.state.lock().unwrap();
        MockRouter::log(&mut state, Op::Add, path, None, fields);
        if state.reject_add.contains(path) {
            return Err(Error::protocol("failure: already have such entry"));
        }
        state.next_id += 1;
        let id = format!("*{:X}", state.next_id);
        state
            .tables
            .entry(path.to_string())
            .or_default()
            .push(DeviceObject::new(id.clone(), fields.clone()));
        Ok(id)
    }

    async fn update(&self, path: &str, id: &str, fields: &Fields) -> Result<()> {
        let mut state = self.router.state.lock().unwrap();
        MockRouter::log(&mut state, Op::Update, path, Some(id), fields);
        if state.reject_update.contains(path) {
            return Err(Error::protocol("failure: cannot change while in use"));
        }
        let object = state
            .tables
            .get_mut(path)
            .and_then(|objects| objects.iter_mut().find(|o| o.id == id))
            .ok_or_else(|| Error::protocol("no such item"))?;
        object.fields.extend(fields.clone());
        Ok(())
    }

    async fn remove(&self, path: &str, id: &str) -> Result<()> {
        let mut state = self.router.state.lock().unwrap();
        MockRouter::log(&mut state, Op::Remove, path, Some(id), &Fields::new());
        if state.fail_remove.contains(path) {
            return Err(Error::protocol("failure: item is in use"));
        }
        if state.sticky_remove.contains(path) {
            return Ok(());
        }
        if let Some(objects) = state.tables.get_mut(path) {
            objects.retain(|o| o.id != id);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.router.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        self.name
    }
}

pub const TENANT: i64 = 1;
pub const ROUTER: i64 = 1;
/// Uplink-facing interface id (`ether1`)
pub const WAN: i64 = 1;
/// Access interface id (`ether2`)
pub const LAN: i64 = 2;
pub const PLAN: i64 = 3;

pub fn router() -> Router {
    Router {
        id: ROUTER,
        tenant_id: TENANT,
        name: "core-1".into(),
        host: "10.10.0.1".into(),
        port: None,
        username: "admin".into(),
        password: "legacy-plaintext".into(),
        vendor: "mikrotik".into(),
        is_active: true,
    }
}

pub fn interface(id: i64, name: &str) -> RouterInterface {
    RouterInterface {
        id,
        router_id: ROUTER,
        name: name.into(),
        media_type: "ether".into(),
        mac_address: None,
        is_active: true,
        ip_class_ids: Vec::new(),
    }
}

pub fn plan(bandwidth: Option<&str>) -> ServicePlan {
    ServicePlan {
        id: PLAN,
        tenant_id: TENANT,
        name: "Fibra 20".into(),
        bandwidth: bandwidth.map(String::from),
        ppp_profile: Some("plano-100".into()),
    }
}

/// Router 1 with `ether1` (WAN) and `ether2` (LAN) and a 20M/5M plan
pub fn base_tables() -> Tables {
    let mut tables = Tables::default();
    tables.insert_router(router());
    tables.insert_interface(interface(WAN, "ether1"));
    tables.insert_interface(interface(LAN, "ether2"));
    tables.insert_plan(plan(Some("20M/5M")));
    tables
}

pub fn opener(device: &MockRouter) -> SessionOpener {
    SessionOpener::new(Arc::new(MockConnector::new(device, "mock-api")))
}

pub fn provisioning(repository: &MemoryRepository, device: &MockRouter) -> ProvisioningEngine {
    ProvisioningEngine::new(
        Arc::new(repository.clone()),
        opener(device),
        ProvisioningConfig::default(),
    )
}

pub fn sync_engine(repository: &MemoryRepository, device: &MockRouter) -> SyncEngine {
    SyncEngine::new(Arc::new(repository.clone()), opener(device), SyncConfig::default())
}
