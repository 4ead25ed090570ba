// # RouterOS REST Backend
//
// Device connection over the REST API shipped with RouterOS 7.1+.
//
// ## API Reference
//
// - List: GET `/rest/<path>?field=value`
// - Create: PUT `/rest/<path>` with a JSON object, answers the created object
// - Update: PATCH `/rest/<path>/<id>`
// - Remove: DELETE `/rest/<path>/<id>`
//
// Every request carries HTTP basic auth. There is no session on the router
// side; `connect` probes `/rest/system/resource` so bad credentials and
// closed ports surface at connect time like they do on the binary API.
//
// ## Error Mapping
//
// - Request failures (DNS, TCP, TLS, timeout): `Error::Connectivity`
// - 401/403: `Error::Connectivity` (credentials refused)
// - Any other non-2xx: `Error::Protocol` with the router's `detail`

use async_trait::async_trait;
use netprov_core::config::BackendConfig;
use netprov_core::traits::{
    DeviceConnection, DeviceConnector, DeviceConnectorFactory, DeviceObject, DeviceTarget, Fields, Filter,
};
use netprov_core::{BackendRegistry, Error, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Default HTTPS port
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Default plain HTTP port
pub const DEFAULT_PLAIN_PORT: u16 = 80;

const PROBE_PATH: &str = "/system/resource";

/// Connector for the RouterOS REST API
#[derive(Debug, Clone)]
pub struct RestConnector {
    use_tls: bool,
    port: Option<u16>,
    accept_invalid_certs: bool,
    timeout: Duration,
    /// Fixed base URL (ending in `/rest`) used instead of the router host
    base_url: Option<String>,
}

impl RestConnector {
    pub fn new(use_tls: bool, port: Option<u16>, accept_invalid_certs: bool, timeout: Duration) -> Self {
        Self {
            use_tls,
            port,
            accept_invalid_certs,
            timeout,
            base_url: None,
        }
    }

    /// Connector that talks to `base_url` for every router
    ///
    /// Used for proxies and tests.
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: Some(base_url.into().trim_end_matches('/').to_string()),
            ..Self::new(false, None, false, timeout)
        }
    }

    fn base_url_for(&self, target: &DeviceTarget) -> String {
        if let Some(base) = &self.base_url {
            return base.clone();
        }
        let (scheme, default_port) = if self.use_tls {
            ("https", DEFAULT_TLS_PORT)
        } else {
            ("http", DEFAULT_PLAIN_PORT)
        };
        let port = target.port.or(self.port).unwrap_or(default_port);
        format!("{}://{}:{}/rest", scheme, target.host, port)
    }

    fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(|e| Error::config(format!("Cannot build HTTP client: {}", e)))
    }
}

#[async_trait]
impl DeviceConnector for RestConnector {
    async fn connect(&self, target: &DeviceTarget) -> Result<Box<dyn DeviceConnection>> {
        let connection = RestConnection {
            client: self.client()?,
            base_url: self.base_url_for(target),
            username: target.username.clone(),
            password: target.password.clone(),
            closed: AtomicBool::new(false),
        };
        debug!(router_id = target.router_id, base_url = %connection.base_url, "Probing RouterOS REST API");

        connection.list(PROBE_PATH, &Filter::new()).await.map_err(|e| match e {
            Error::Protocol(message) => {
                Error::connectivity(format!("REST API unavailable on {}: {}", target.host, message))
            }
            other => other,
        })?;
        info!(router_id = target.router_id, host = %target.host, "Connected over RouterOS REST API");
        Ok(Box::new(connection))
    }

    fn backend_name(&self) -> &'static str {
        "rest"
    }
}

/// Stateless REST "connection": a client plus credentials
pub struct RestConnection {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    closed: AtomicBool,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for RestConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConnection")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

impl RestConnection {
    fn url(&self, path: &str, id: Option<&str>) -> String {
        let path = path.trim_end_matches('/');
        match id {
            Some(id) => format!("{}{}/{}", self.base_url, path, id),
            None => format!("{}{}", self.base_url, path),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::connectivity("REST connection is closed"));
        }
        Ok(())
    }

    /// Send a request and decode the JSON body (`Null` when empty)
    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        self.ensure_open()?;
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| Error::connectivity(format!("HTTP request failed ({}): {}", what, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::connectivity(format!("Failed to read response ({}): {}", what, e)))?;

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => Error::connectivity(format!("Credentials refused. Status: {}", status)),
                _ => Error::protocol(format!("{} failed: {} - {}", what, status, error_detail(&body))),
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| Error::protocol(format!("Failed to parse response ({}): {}", what, e)))
    }
}

/// `detail`, then `message`, from a RouterOS error body
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.get("detail")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Flatten one JSON object into vendor fields
fn to_object(value: &Value) -> Result<DeviceObject> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::protocol("Expected a JSON object in response"))?;

    let mut id = String::new();
    let mut fields = Fields::new();
    for (key, value) in map {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        if key == ".id" {
            id = text;
        } else if !key.starts_with('.') {
            fields.insert(key.clone(), text);
        }
    }
    Ok(DeviceObject::new(id, fields))
}

#[async_trait]
impl DeviceConnection for RestConnection {
    async fn list(&self, path: &str, filter: &Filter) -> Result<Vec<DeviceObject>> {
        let request = self.client.get(self.url(path, None)).query(filter.pairs());
        let body = self.send(request, &format!("GET {}", path)).await?;

        let objects = match &body {
            Value::Array(items) => items.iter().map(to_object).collect::<Result<Vec<_>>>()?,
            // Singleton menus answer with one object
            Value::Object(_) => vec![to_object(&body)?],
            Value::Null => Vec::new(),
            _ => return Err(Error::protocol(format!("Unexpected response shape for GET {}", path))),
        };
        Ok(objects.into_iter().filter(|o| filter.matches(o) || o.id.is_empty()).collect())
    }

    async fn add(&self, path: &str, fields: &Fields) -> Result<String> {
        let request = self.client.put(self.url(path, None)).json(fields);
        let body = self.send(request, &format!("PUT {}", path)).await?;
        let created = to_object(&body)?;
        if created.id.is_empty() {
            return Err(Error::protocol(format!("PUT {} returned no .id", path)));
        }
        Ok(created.id)
    }

    async fn update(&self, path: &str, id: &str, fields: &Fields) -> Result<()> {
        let request = self.client.patch(self.url(path, Some(id))).json(fields);
        self.send(request, &format!("PATCH {}", path)).await.map(|_| ())
    }

    async fn remove(&self, path: &str, id: &str) -> Result<()> {
        let request = self.client.delete(self.url(path, Some(id)));
        self.send(request, &format!("DELETE {}", path)).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "rest"
    }
}

/// Factory for [`RestConnector`]
pub struct RestConnectorFactory;

impl DeviceConnectorFactory for RestConnectorFactory {
    fn create(&self, config: &BackendConfig) -> Result<Box<dyn DeviceConnector>> {
        match config {
            BackendConfig::Rest {
                port,
                use_tls,
                accept_invalid_certs,
                timeout_secs,
            } => {
                if *timeout_secs == 0 {
                    return Err(Error::config("REST backend timeout must be > 0"));
                }
                if *accept_invalid_certs {
                    tracing::warn!("REST backend accepts invalid TLS certificates");
                }
                Ok(Box::new(RestConnector::new(
                    *use_tls,
                    *port,
                    *accept_invalid_certs,
                    Duration::from_secs(*timeout_secs),
                )))
            }
            _ => Err(Error::config("Invalid config for RouterOS REST backend")),
        }
    }
}

/// Register the REST backend under `"rest"`
pub fn register(registry: &BackendRegistry) {
    registry.register_connector("rest", Box::new(RestConnectorFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(port: Option<u16>) -> DeviceTarget {
        DeviceTarget {
            router_id: 1,
            host: "10.10.0.1".into(),
            port,
            username: "admin".into(),
            password: "secret_password_123".into(),
        }
    }

    #[test]
    fn base_url_follows_tls_and_port() {
        let tls = RestConnector::new(true, None, false, Duration::from_secs(5));
        assert_eq!(tls.base_url_for(&target(None)), "https://10.10.0.1:443/rest");
        assert_eq!(tls.base_url_for(&target(Some(8443))), "https://10.10.0.1:8443/rest");

        let plain = RestConnector::new(false, Some(8080), false, Duration::from_secs(5));
        assert_eq!(plain.base_url_for(&target(None)), "http://10.10.0.1:8080/rest");
    }

    #[test]
    fn json_values_flatten_to_strings() {
        let value = serde_json::json!({
            ".id": "*3",
            "name": "ether1",
            "running": true,
            "mtu": 1500,
            ".about": "ignored"
        });
        let object = to_object(&value).unwrap();
        assert_eq!(object.id, "*3");
        assert_eq!(object.get("running"), Some("true"));
        assert_eq!(object.get("mtu"), Some("1500"));
        assert!(object.get(".about").is_none());
    }

    #[test]
    fn error_detail_prefers_detail() {
        let body = r#"{"error":400,"message":"Bad Request","detail":"failure: already have such entry"}"#;
        assert_eq!(error_detail(body), "failure: already have such entry");
        assert_eq!(error_detail("plain text"), "plain text");
    }

    #[test]
    fn factory_rejects_other_backends() {
        let config = BackendConfig::Api {
            port: None,
            timeout_secs: 5,
        };
        assert!(RestConnectorFactory.create(&config).is_err());
    }

    #[test]
    fn password_not_exposed_in_debug() {
        let connection = RestConnection {
            client: reqwest::Client::new(),
            base_url: "http://10.10.0.1/rest".into(),
            username: "admin".into(),
            password: "secret_password_123".into(),
            closed: AtomicBool::new(false),
        };
        let debug = format!("{:?}", connection);
        assert!(!debug.contains("secret_password_123"));
        assert!(debug.contains("RestConnection"));
    }
}
