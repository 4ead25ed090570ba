// # RouterOS Binary API Backend
//
// Speaks the RouterOS API protocol (TCP 8728) for netprov device sessions.
//
// ## Protocol
//
// - Length-prefixed words grouped into sentences (see [`codec`])
// - Commands are `<path>/<verb>`: `print`, `add`, `set`, `remove`
// - Filters become `?field=value` query words
// - `add` returns the new id in the `ret` attribute of `!done`
// - A `!trap` is the device rejecting a command and maps to
//   `Error::Protocol`; transport failures map to `Error::Connectivity`
//
// ## Constraints
//
// - No retries: callers decide whether to retry, skip or abort
// - No background tasks: one command in flight per connection
// - Passwords never appear in logs or Debug output

pub mod codec;
pub mod connection;

use async_trait::async_trait;
use netprov_core::config::BackendConfig;
use netprov_core::traits::{DeviceConnection, DeviceConnector, DeviceConnectorFactory, DeviceTarget};
use netprov_core::{BackendRegistry, Error, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

pub use connection::{ApiConnection, Response};

/// Default RouterOS API port (plain text)
pub const DEFAULT_PORT: u16 = 8728;

/// Connector for the RouterOS binary API
#[derive(Debug, Clone)]
pub struct ApiConnector {
    port: u16,
    timeout: Duration,
}

impl ApiConnector {
    /// # Parameters
    ///
    /// - `port`: Port used when the router record has none
    /// - `timeout`: Bounds the TCP connect and every command
    pub fn new(port: Option<u16>, timeout: Duration) -> Self {
        Self {
            port: port.unwrap_or(DEFAULT_PORT),
            timeout,
        }
    }
}

#[async_trait]
impl DeviceConnector for ApiConnector {
    async fn connect(&self, target: &DeviceTarget) -> Result<Box<dyn DeviceConnection>> {
        let port = target.port.unwrap_or(self.port);
        debug!(router_id = target.router_id, host = %target.host, port, "Connecting to RouterOS API");

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect((target.host.as_str(), port)))
            .await
            .map_err(|_| {
                Error::connectivity(format!(
                    "Timed out connecting to {}:{} after {}s",
                    target.host,
                    port,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::connectivity(format!("Cannot connect to {}:{}: {}", target.host, port, e)))?;
        stream.set_nodelay(true)?;

        let connection = ApiConnection::new(stream, self.timeout);
        connection.login(&target.username, &target.password).await?;
        info!(router_id = target.router_id, host = %target.host, "Logged in over RouterOS API");
        Ok(Box::new(connection))
    }

    fn backend_name(&self) -> &'static str {
        "api"
    }
}

/// Factory for [`ApiConnector`]
pub struct ApiConnectorFactory;

impl DeviceConnectorFactory for ApiConnectorFactory {
    fn create(&self, config: &BackendConfig) -> Result<Box<dyn DeviceConnector>> {
        match config {
            BackendConfig::Api { port, timeout_secs } => {
                if *timeout_secs == 0 {
                    return Err(Error::config("API backend timeout must be > 0"));
                }
                Ok(Box::new(ApiConnector::new(*port, Duration::from_secs(*timeout_secs))))
            }
            _ => Err(Error::config("Invalid config for RouterOS API backend")),
        }
    }
}

/// Register the API backend under `"api"`
///
/// # Example
///
/// ```rust
/// use netprov_core::BackendRegistry;
///
/// let registry = BackendRegistry::new();
/// netprov_routeros_api::register(&registry);
/// assert!(registry.has_connector("api"));
/// ```
pub fn register(registry: &BackendRegistry) {
    registry.register_connector("api", Box::new(ApiConnectorFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_accepts_api_config() {
        let config = BackendConfig::Api {
            port: Some(18728),
            timeout_secs: 5,
        };
        let connector = ApiConnectorFactory.create(&config).unwrap();
        assert_eq!(connector.backend_name(), "api");
    }

    #[test]
    fn factory_rejects_other_backends() {
        let config = BackendConfig::Rest {
            port: None,
            use_tls: true,
            accept_invalid_certs: false,
            timeout_secs: 5,
        };
        assert!(ApiConnectorFactory.create(&config).is_err());
    }

    #[test]
    fn default_port_applies() {
        let connector = ApiConnector::new(None, Duration::from_secs(1));
        assert_eq!(connector.port, DEFAULT_PORT);
    }

    #[tokio::test]
    async fn closed_port_is_a_connectivity_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = ApiConnector::new(Some(port), Duration::from_secs(2));
        let target = DeviceTarget {
            router_id: 1,
            host: "127.0.0.1".into(),
            port: None,
            username: "admin".into(),
            password: "secret".into(),
        };
        let err = connector.connect(&target).await.err().unwrap();
        assert!(matches!(err, Error::Connectivity(_)), "Got {:?}", err);
    }
}
