//! Plugin-based backend registry
//!
//! Protocol backends and repositories are registered by name at startup and
//! instantiated from configuration, so the core never names a concrete
//! backend crate.
//!
//! ## Registration
//!
//! Backend crates expose a `register` function:
//!
//! ```rust,ignore
//! // In netprov-routeros-api
//! pub fn register(registry: &BackendRegistry) {
//!     registry.register_connector("api", Box::new(ApiConnectorFactory));
//! }
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let registry = BackendRegistry::with_builtin_repositories();
//! netprov_routeros_api::register(&registry);
//! netprov_routeros_rest::register(&registry);
//!
//! let opener = SessionOpener::from_config(&registry, &config.device)?;
//! let repository = registry.create_repository(&config.repository).await?;
//! ```

use crate::config::{BackendConfig, RepositoryConfig};
use crate::error::{Error, Result};
use crate::repository::{FileRepositoryFactory, MemoryRepositoryFactory};
use crate::traits::{DeviceConnector, DeviceConnectorFactory, Repository, RepositoryFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Registry of connector and repository factories
///
/// ## Thread Safety
///
/// Interior mutability with RwLock: concurrent lookups, exclusive registration.
#[derive(Default)]
pub struct BackendRegistry {
    /// Device connector factories by backend name ("api", "rest", ...)
    connectors: RwLock<HashMap<String, Box<dyn DeviceConnectorFactory>>>,

    /// Repository factories by type name ("memory", "file", ...)
    repositories: RwLock<HashMap<String, Arc<dyn RepositoryFactory>>>,
}

impl BackendRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the in-crate `memory` and `file` repositories
    pub fn with_builtin_repositories() -> Self {
        let registry = Self::new();
        registry.register_repository("memory", Box::new(MemoryRepositoryFactory));
        registry.register_repository("file", Box::new(FileRepositoryFactory));
        registry
    }

    /// Register a device connector factory
    ///
    /// # Parameters
    ///
    /// - `name`: Backend name matching [`BackendConfig::type_name`]
    /// - `factory`: Factory creating connectors
    pub fn register_connector(&self, name: impl Into<String>, factory: Box<dyn DeviceConnectorFactory>) {
        let mut connectors = self.connectors.write().unwrap_or_else(PoisonError::into_inner);
        connectors.insert(name.into(), factory);
    }

    /// Register a repository factory
    pub fn register_repository(&self, name: impl Into<String>, factory: Box<dyn RepositoryFactory>) {
        let mut repositories = self.repositories.write().unwrap_or_else(PoisonError::into_inner);
        repositories.insert(name.into(), Arc::from(factory));
    }

    /// Create a connector from backend configuration
    ///
    /// # Returns
    ///
    /// - `Err(Error::Config)`: the backend type is not registered
    pub fn create_connector(&self, config: &BackendConfig) -> Result<Box<dyn DeviceConnector>> {
        let backend_type = config.type_name();
        let connectors = self.connectors.read().unwrap_or_else(PoisonError::into_inner);

        let factory = connectors
            .get(backend_type)
            .ok_or_else(|| Error::config(format!("Unknown backend type: {}", backend_type)))?;

        factory.create(config)
    }

    /// Create a repository from configuration
    pub async fn create_repository(&self, config: &RepositoryConfig) -> Result<Box<dyn Repository>> {
        let factory = {
            let repositories = self.repositories.read().unwrap_or_else(PoisonError::into_inner);
            repositories
                .get(config.type_name())
                .cloned()
                .ok_or_else(|| {
                    Error::config(format!("Unknown repository type: {}", config.type_name()))
                })?
        };

        let config_json = serde_json::to_value(config)?;
        factory.create(&config_json).await
    }

    /// Registered backend names
    pub fn list_connectors(&self) -> Vec<String> {
        let connectors = self.connectors.read().unwrap_or_else(PoisonError::into_inner);
        connectors.keys().cloned().collect()
    }

    /// Registered repository type names
    pub fn list_repositories(&self) -> Vec<String> {
        let repositories = self.repositories.read().unwrap_or_else(PoisonError::into_inner);
        repositories.keys().cloned().collect()
    }

    pub fn has_connector(&self, name: &str) -> bool {
        let connectors = self.connectors.read().unwrap_or_else(PoisonError::into_inner);
        connectors.contains_key(name)
    }

    pub fn has_repository(&self, name: &str) -> bool {
        let repositories = self.repositories.read().unwrap_or_else(PoisonError::into_inner);
        repositories.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnreachableFactory;

    impl DeviceConnectorFactory for UnreachableFactory {
        fn create(&self, _config: &BackendConfig) -> Result<Box<dyn DeviceConnector>> {
            Err(Error::not_found("no connector in tests"))
        }
    }

    #[test]
    fn registration() {
        let registry = BackendRegistry::new();
        assert!(!registry.has_connector("api"));

        registry.register_connector("api", Box::new(UnreachableFactory));
        assert!(registry.has_connector("api"));
        assert!(registry.list_connectors().contains(&"api".to_string()));
    }

    #[test]
    fn unknown_backend_is_config_error() {
        let registry = BackendRegistry::new();
        let config = BackendConfig::Rest {
            port: None,
            use_tls: true,
            accept_invalid_certs: false,
            timeout_secs: 5,
        };
        assert!(matches!(registry.create_connector(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn builtin_memory_repository() {
        let registry = BackendRegistry::with_builtin_repositories();
        assert!(registry.has_repository("file"));
        let repository = registry.create_repository(&RepositoryConfig::Memory).await.unwrap();
        assert!(repository.get_router(1).await.unwrap().is_none());
    }
}
