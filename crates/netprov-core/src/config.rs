//! Configuration types for netprov
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Device session backends
    #[serde(default)]
    pub device: DeviceConfig,

    /// Record store
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Provisioning settings
    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    /// Reconciliation settings
    #[serde(default)]
    pub sync: SyncConfig,
}

impl CoreConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.device.validate()?;
        self.provisioning.validate()?;
        Ok(())
    }
}

/// Device session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Backend tried first
    pub primary: BackendConfig,

    /// Backend tried when the primary cannot connect
    #[serde(default)]
    pub fallback: Option<BackendConfig>,

    /// Also connect the fallback when the primary succeeds
    #[serde(default)]
    pub connect_both: bool,

    /// Hex AES-256 key used to decrypt stored router passwords
    ///
    /// When unset, stored passwords are used as-is.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.primary.validate()?;
        if let Some(fallback) = &self.fallback {
            fallback.validate()?;
            if fallback.type_name() == self.primary.type_name() && fallback.port() == self.primary.port() {
                return Err(crate::Error::config(
                    "Fallback backend must differ from the primary backend",
                ));
            }
        }
        if let Some(key) = &self.encryption_key
            && key.len() != 64
        {
            return Err(crate::Error::config(
                "Encryption key must be 64 hex characters (32 bytes)",
            ));
        }
        Ok(())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            primary: BackendConfig::Api {
                port: None,
                timeout_secs: default_timeout_secs(),
            },
            fallback: Some(BackendConfig::Rest {
                port: None,
                use_tls: true,
                accept_invalid_certs: false,
                timeout_secs: default_timeout_secs(),
            }),
            connect_both: false,
            encryption_key: None,
        }
    }
}

/// Protocol backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// RouterOS binary API (port 8728 by default)
    Api {
        #[serde(default)]
        port: Option<u16>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },

    /// RouterOS REST API
    Rest {
        #[serde(default)]
        port: Option<u16>,
        #[serde(default = "default_true")]
        use_tls: bool,
        /// Routers usually carry self-signed certificates
        #[serde(default)]
        accept_invalid_certs: bool,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },

    /// Backend registered under a custom factory name
    Custom {
        factory: String,
        config: serde_json::Value,
    },
}

impl BackendConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            BackendConfig::Api { timeout_secs, .. } | BackendConfig::Rest { timeout_secs, .. } => {
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("Backend timeout must be > 0"));
                }
                Ok(())
            }
            BackendConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom backend factory cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Registry name of the backend
    pub fn type_name(&self) -> &str {
        match self {
            BackendConfig::Api { .. } => "api",
            BackendConfig::Rest { .. } => "rest",
            BackendConfig::Custom { factory, .. } => factory,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            BackendConfig::Api { port, .. } | BackendConfig::Rest { port, .. } => *port,
            BackendConfig::Custom { .. } => None,
        }
    }
}

/// Record store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepositoryConfig {
    /// JSON snapshot file
    File {
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// Repository registered under a custom factory name
    Custom {
        factory: String,
        config: serde_json::Value,
    },
}

impl RepositoryConfig {
    pub fn type_name(&self) -> &str {
        match self {
            RepositoryConfig::File { .. } => "file",
            RepositoryConfig::Memory => "memory",
            RepositoryConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Length of generated PPPoE and portal passwords
    #[serde(default = "default_password_length")]
    pub password_length: usize,

    /// Prefix of generated usernames (`contract_42`)
    #[serde(default = "default_username_prefix")]
    pub username_prefix: String,

    /// Prefix of simple-queue names (`contract-42`)
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,

    /// `service` field of PPPoE secrets
    #[serde(default = "default_pppoe_service")]
    pub pppoe_service: String,

    /// Hotspot server for captive-portal users; all servers when unset
    #[serde(default)]
    pub hotspot_server: Option<String>,

    /// Permit address bindings on an interface detected as the uplink
    #[serde(default)]
    pub allow_uplink_binding: bool,

    /// Serialize activation/reset/deletion per router inside this process
    #[serde(default = "default_true")]
    pub serialize_per_router: bool,
}

impl ProvisioningConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !(8..=64).contains(&self.password_length) {
            return Err(crate::Error::config(format!(
                "password_length must be between 8 and 64. Got: {}",
                self.password_length
            )));
        }
        if self.username_prefix.is_empty() || self.queue_prefix.is_empty() {
            return Err(crate::Error::config("Username and queue prefixes cannot be empty"));
        }
        Ok(())
    }

    /// Device username for a contract
    pub fn username_for(&self, contract_id: i64) -> String {
        format!("{}{}", self.username_prefix, contract_id)
    }

    /// Simple-queue name for a contract
    pub fn queue_name_for(&self, contract_id: i64) -> String {
        format!("{}{}", self.queue_prefix, contract_id)
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            password_length: default_password_length(),
            username_prefix: default_username_prefix(),
            queue_prefix: default_queue_prefix(),
            pppoe_service: default_pppoe_service(),
            hotspot_server: None,
            allow_uplink_binding: false,
            serialize_per_router: true,
        }
    }
}

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Skip PPPoE/DHCP servers the device reports as disabled
    #[serde(default = "default_true")]
    pub skip_disabled_servers: bool,

    /// Serialize passes per router inside this process
    #[serde(default = "default_true")]
    pub serialize_per_router: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            skip_disabled_servers: true,
            serialize_per_router: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_password_length() -> usize {
    12
}

fn default_username_prefix() -> String {
    "contract_".to_string()
}

fn default_queue_prefix() -> String {
    "contract-".to_string()
}

fn default_pppoe_service() -> String {
    "pppoe".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        CoreConfig::default().validate().unwrap();
    }

    #[test]
    fn names_follow_prefixes() {
        let config = ProvisioningConfig::default();
        assert_eq!(config.username_for(42), "contract_42");
        assert_eq!(config.queue_name_for(42), "contract-42");
    }

    #[test]
    fn rejects_identical_fallback() {
        let config = DeviceConfig {
            primary: BackendConfig::Api { port: None, timeout_secs: 5 },
            fallback: Some(BackendConfig::Api { port: None, timeout_secs: 5 }),
            connect_both: false,
            encryption_key: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_short_encryption_key() {
        let config = DeviceConfig {
            encryption_key: Some("abcd".into()),
            ..DeviceConfig::default()
        };
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn backend_config_deserializes_tagged() {
        let json = serde_json::json!({ "type": "rest", "port": 8443, "accept_invalid_certs": true });
        let backend: BackendConfig = serde_json::from_value(json).unwrap();
        assert_eq!(
            backend,
            BackendConfig::Rest {
                port: Some(8443),
                use_tls: true,
                accept_invalid_certs: true,
                timeout_secs: 10,
            }
        );
        assert_eq!(backend.type_name(), "rest");
    }

    #[test]
    fn password_length_bounds() {
        let config = ProvisioningConfig {
            password_length: 4,
            ..ProvisioningConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
