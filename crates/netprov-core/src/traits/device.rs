// # Device Backend Traits
//
// Defines the interface every router protocol backend implements.
//
// ## Implementations
//
// - RouterOS binary API: `netprov-routeros-api` crate
// - RouterOS REST API: `netprov-routeros-rest` crate
//
// ## Usage
//
// ```rust,ignore
// use netprov_core::traits::{DeviceConnector, Filter};
//
// let conn = connector.connect(&target).await?;
// let secrets = conn.list("/ppp/secret", &Filter::new().eq("name", "contract_42")).await?;
// conn.close().await?;
// ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/// Flat vendor field map, as the device reports it
pub type Fields = BTreeMap<String, String>;

/// One object from a device collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceObject {
    /// Vendor-assigned id (e.g. `*1A`)
    pub id: String,
    /// All other fields, without the id
    pub fields: Fields,
}

impl DeviceObject {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Field value, if present
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// True when every field in `expected` has the same value here
    ///
    /// Values compare through [`crate::device::records::same_value`].
    pub fn contains_all(&self, expected: &Fields) -> bool {
        expected.iter().all(|(key, value)| {
            crate::device::records::same_value(key, value, self.get(key).unwrap_or_default())
        })
    }
}

/// Equality filter made of `field=value` pairs (all must match)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pairs: Vec<(String, String)>,
}

impl Filter {
    /// Match everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `field=value` condition
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((field.into(), value.into()));
        self
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Evaluate the filter locally
    ///
    /// Backends that cannot filter server-side call this on every object.
    pub fn matches(&self, object: &DeviceObject) -> bool {
        self.pairs.iter().all(|(field, value)| {
            if field == ".id" {
                return object.id == *value;
            }
            object.get(field) == Some(value.as_str())
        })
    }
}

/// Where and how to log into one router
///
/// The password arrives already decrypted. The Debug implementation never
/// prints it.
#[derive(Clone)]
pub struct DeviceTarget {
    pub router_id: i64,
    pub host: String,
    /// Overrides the backend's default port
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceTarget")
            .field("router_id", &self.router_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// An authenticated connection to one router
///
/// # Failure Semantics
///
/// Any call may fail with [`crate::Error::Connectivity`] (transport lost,
/// timeout) or [`crate::Error::Protocol`] (the device rejected the command).
/// Implementations must not retry: callers decide whether to retry, skip or
/// abort.
#[async_trait]
pub trait DeviceConnection: Send + Sync {
    /// List objects of a collection matching `filter`
    ///
    /// # Parameters
    ///
    /// - `path`: Collection path, e.g. `/ppp/secret`
    /// - `filter`: Equality conditions; empty means all objects
    async fn list(&self, path: &str, filter: &Filter) -> Result<Vec<DeviceObject>, crate::Error>;

    /// Create an object and return its vendor id
    async fn add(&self, path: &str, fields: &Fields) -> Result<String, crate::Error>;

    /// Overwrite the given fields of an existing object
    async fn update(&self, path: &str, id: &str, fields: &Fields) -> Result<(), crate::Error>;

    /// Remove an object
    async fn remove(&self, path: &str, id: &str) -> Result<(), crate::Error>;

    /// Release the connection. Must be safe to call more than once.
    async fn close(&self) -> Result<(), crate::Error>;

    /// Backend name (for logging)
    fn backend_name(&self) -> &'static str;
}

/// Opens connections for one backend
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Connect and authenticate
    ///
    /// Returns [`crate::Error::Connectivity`] when the host is unreachable,
    /// the port is closed or the credentials are refused.
    async fn connect(&self, target: &DeviceTarget) -> Result<Box<dyn DeviceConnection>, crate::Error>;

    /// Backend name (for logging)
    fn backend_name(&self) -> &'static str;
}

/// Helper trait for constructing connectors from configuration
pub trait DeviceConnectorFactory: Send + Sync {
    /// Create a connector from its backend configuration
    fn create(
        &self,
        config: &crate::config::BackendConfig,
    ) -> Result<Box<dyn DeviceConnector>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> DeviceObject {
        let mut fields = Fields::new();
        fields.insert("name".into(), "contract_42".into());
        fields.insert("service".into(), "pppoe".into());
        DeviceObject::new("*7", fields)
    }

    #[test]
    fn filter_matches_all_pairs() {
        let object = secret();
        assert!(Filter::new().matches(&object));
        assert!(Filter::new().eq("name", "contract_42").matches(&object));
        assert!(Filter::new().eq(".id", "*7").eq("service", "pppoe").matches(&object));
        assert!(!Filter::new().eq("name", "contract_42").eq("service", "any").matches(&object));
        assert!(!Filter::new().eq("profile", "default").matches(&object));
    }

    #[test]
    fn contains_all_treats_missing_as_empty() {
        let object = secret();
        let mut expected = Fields::new();
        expected.insert("service".into(), "pppoe".into());
        assert!(object.contains_all(&expected));

        expected.insert("comment".into(), String::new());
        assert!(object.contains_all(&expected));

        expected.insert("profile".into(), "plano-100".into());
        assert!(!object.contains_all(&expected));
    }

    #[test]
    fn target_debug_hides_password() {
        let target = DeviceTarget {
            router_id: 1,
            host: "10.0.0.1".into(),
            port: None,
            username: "admin".into(),
            password: "hunter2-secret".into(),
        };
        let debug = format!("{:?}", target);
        assert!(!debug.contains("hunter2-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
