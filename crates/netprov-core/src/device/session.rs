//! Device session
//!
//! A [`DeviceSession`] hides whether the router is reached through the
//! primary or the fallback backend. It is opened per request, used by one
//! task and closed when the request finishes, on both success and failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::credentials::{AesGcmCipher, PasswordCipher, resolve_password};
use crate::model::Router;
use crate::registry::BackendRegistry;
use crate::traits::{DeviceConnection, DeviceConnector, DeviceObject, DeviceTarget, Fields, Filter};
use crate::{Error, Result};

use super::paths;
use super::records::{FromDevice, SystemResource};

/// What the connected firmware supports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Raw version string, e.g. `7.12.1 (stable)`
    pub version: String,
    pub major: u32,
    pub minor: u32,
    pub board_name: Option<String>,
    /// Routes carry `routing-table` (v7) rather than `routing-mark` (v6)
    pub routing_table_field: bool,
    /// Firmware ships the REST API (7.1+)
    pub rest_api: bool,
}

impl Capabilities {
    pub fn from_resource(resource: &SystemResource) -> Self {
        let (major, minor) = parse_version(&resource.version);
        Self {
            version: resource.version.clone(),
            major,
            minor,
            board_name: resource.board_name.clone(),
            routing_table_field: major >= 7,
            rest_api: major > 7 || (major == 7 && minor >= 1),
        }
    }
}

fn parse_version(version: &str) -> (u32, u32) {
    let numeric = version.split_whitespace().next().unwrap_or_default();
    let mut parts = numeric
        .split('.')
        .map(|p| p.chars().take_while(char::is_ascii_digit).collect::<String>());
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (major, minor)
}

/// Connection to one router over the primary backend, the fallback, or both
pub struct DeviceSession {
    router_id: i64,
    primary: Option<Box<dyn DeviceConnection>>,
    fallback: Option<Box<dyn DeviceConnection>>,
    capabilities: OnceCell<Capabilities>,
    closed: AtomicBool,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("router_id", &self.router_id)
            .field("primary", &self.primary.as_ref().map(|c| c.backend_name()))
            .field("fallback", &self.fallback.as_ref().map(|c| c.backend_name()))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl DeviceSession {
    /// Connect through the primary backend, then the fallback
    ///
    /// The fallback is only tried when the primary fails, unless
    /// `connect_both` is set. Fails with [`Error::Connectivity`] when no
    /// backend connects.
    pub async fn connect(
        target: &DeviceTarget,
        primary: &dyn DeviceConnector,
        fallback: Option<&dyn DeviceConnector>,
        connect_both: bool,
    ) -> Result<Self> {
        let mut failures = Vec::new();

        let primary_conn = match primary.connect(target).await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(
                    router_id = target.router_id,
                    backend = primary.backend_name(),
                    "Primary backend failed to connect: {}",
                    e
                );
                failures.push(format!("{}: {}", primary.backend_name(), e));
                None
            }
        };

        let fallback_conn = match fallback {
            Some(connector) if primary_conn.is_none() || connect_both => {
                match connector.connect(target).await {
                    Ok(conn) => Some(conn),
                    Err(e) => {
                        warn!(
                            router_id = target.router_id,
                            backend = connector.backend_name(),
                            "Fallback backend failed to connect: {}",
                            e
                        );
                        failures.push(format!("{}: {}", connector.backend_name(), e));
                        None
                    }
                }
            }
            _ => None,
        };

        if primary_conn.is_none() && fallback_conn.is_none() {
            return Err(Error::connectivity(format!(
                "Router {} ({}) unreachable on every backend: {}",
                target.router_id,
                target.host,
                failures.join("; ")
            )));
        }

        let session = Self::from_connections(target.router_id, primary_conn, fallback_conn);
        info!(
            router_id = target.router_id,
            backend = session.backend_name(),
            "Device session opened"
        );
        Ok(session)
    }

    /// Build a session from already connected backends
    pub fn from_connections(
        router_id: i64,
        primary: Option<Box<dyn DeviceConnection>>,
        fallback: Option<Box<dyn DeviceConnection>>,
    ) -> Self {
        Self {
            router_id,
            primary,
            fallback,
            capabilities: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn router_id(&self) -> i64 {
        self.router_id
    }

    /// Name of the backend serving calls
    pub fn backend_name(&self) -> &'static str {
        self.primary
            .as_deref()
            .or(self.fallback.as_deref())
            .map(|c| c.backend_name())
            .unwrap_or("none")
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn active(&self) -> Result<&dyn DeviceConnection> {
        if self.is_closed() {
            return Err(Error::connectivity(format!(
                "Session to router {} is closed",
                self.router_id
            )));
        }
        self.primary
            .as_deref()
            .or(self.fallback.as_deref())
            .ok_or_else(|| Error::connectivity("Session has no connected backend"))
    }

    /// Handle to one collection
    pub fn resource<'a>(&'a self, path: &'a str) -> Resource<'a> {
        Resource {
            session: self,
            path,
        }
    }

    /// List a collection and parse every object
    pub async fn list_as<T: FromDevice>(&self, path: &str, filter: &Filter) -> Result<Vec<T>> {
        let objects = self.resource(path).list(filter).await?;
        Ok(objects.iter().map(T::from_object).collect())
    }

    /// Firmware capabilities, probed once per session
    pub async fn capabilities(&self) -> Result<&Capabilities> {
        self.capabilities
            .get_or_try_init(|| async {
                let resources: Vec<SystemResource> =
                    self.list_as(paths::SYSTEM_RESOURCE, &Filter::new()).await?;
                let resource = resources.first().ok_or_else(|| {
                    Error::protocol("Device returned no system resource record")
                })?;
                let caps = Capabilities::from_resource(resource);
                debug!(router_id = self.router_id, version = %caps.version, "Probed capabilities");
                Ok::<_, Error>(caps)
            })
            .await
    }

    /// Close every connected backend. Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for conn in [self.primary.as_deref(), self.fallback.as_deref()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = conn.close().await {
                warn!(
                    router_id = self.router_id,
                    backend = conn.backend_name(),
                    "Error closing backend connection: {}",
                    e
                );
            }
        }
        debug!(router_id = self.router_id, "Device session closed");
    }
}

/// One collection on the session's active backend
#[derive(Debug, Clone, Copy)]
pub struct Resource<'a> {
    session: &'a DeviceSession,
    path: &'a str,
}

impl Resource<'_> {
    pub fn path(&self) -> &str {
        self.path
    }

    pub async fn list(&self, filter: &Filter) -> Result<Vec<DeviceObject>> {
        self.session.active()?.list(self.path, filter).await
    }

    /// Objects whose `field` equals `value`
    pub async fn find(&self, field: &str, value: &str) -> Result<Vec<DeviceObject>> {
        self.list(&Filter::new().eq(field, value)).await
    }

    pub async fn add(&self, fields: &Fields) -> Result<String> {
        let id = self.session.active()?.add(self.path, fields).await?;
        debug!(router_id = self.session.router_id, path = self.path, id = %id, "Added object");
        Ok(id)
    }

    pub async fn update(&self, id: &str, fields: &Fields) -> Result<()> {
        self.session.active()?.update(self.path, id, fields).await?;
        debug!(router_id = self.session.router_id, path = self.path, id = %id, "Updated object");
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.session.active()?.remove(self.path, id).await?;
        debug!(router_id = self.session.router_id, path = self.path, id = %id, "Removed object");
        Ok(())
    }
}

/// Opens sessions for router records
///
/// Holds the configured connectors and the password cipher so engines only
/// need a [`Router`] to reach a device.
#[derive(Clone)]
pub struct SessionOpener {
    primary: Arc<dyn DeviceConnector>,
    fallback: Option<Arc<dyn DeviceConnector>>,
    connect_both: bool,
    cipher: Option<Arc<dyn PasswordCipher>>,
}

impl SessionOpener {
    pub fn new(primary: Arc<dyn DeviceConnector>) -> Self {
        Self {
            primary,
            fallback: None,
            connect_both: false,
            cipher: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn DeviceConnector>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn connect_both(mut self, connect_both: bool) -> Self {
        self.connect_both = connect_both;
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn PasswordCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Build connectors and cipher from configuration
    pub fn from_config(registry: &BackendRegistry, config: &DeviceConfig) -> Result<Self> {
        let primary: Arc<dyn DeviceConnector> = Arc::from(registry.create_connector(&config.primary)?);
        let mut opener = Self::new(primary).connect_both(config.connect_both);

        if let Some(fallback) = &config.fallback {
            opener = opener.with_fallback(Arc::from(registry.create_connector(fallback)?));
        }
        if let Some(key) = &config.encryption_key {
            opener = opener.with_cipher(Arc::new(AesGcmCipher::new(key)?));
        }
        Ok(opener)
    }

    /// Login target for a router, password decrypted
    pub fn target_for(&self, router: &Router) -> DeviceTarget {
        DeviceTarget {
            router_id: router.id,
            host: router.host.clone(),
            port: router.port,
            username: router.username.clone(),
            password: resolve_password(self.cipher.as_deref(), router.id, &router.password),
        }
    }

    /// Open a session to `router`
    ///
    /// Inactive routers are refused with [`Error::Consistency`] before any
    /// connection attempt.
    pub async fn open(&self, router: &Router) -> Result<DeviceSession> {
        if !router.is_active {
            return Err(Error::consistency(format!(
                "Router {} ({}) is inactive",
                router.id, router.name
            )));
        }
        let target = self.target_for(router);
        DeviceSession::connect(
            &target,
            &*self.primary,
            self.fallback.as_deref(),
            self.connect_both,
        )
        .await
    }
}
