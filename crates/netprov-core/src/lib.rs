// # netprov-core
//
// Core library for keeping router state and subscriber contracts in step.
//
// ## Architecture Overview
//
// - **DeviceConnection / DeviceConnector**: Traits implemented by protocol backends
// - **DeviceSession**: One router, primary/fallback backends behind one interface
// - **upsert**: Idempotent "ensure object exists with these fields" helpers
// - **SyncEngine**: Reconciles pools, profiles, PPPoE and DHCP servers with the device
// - **ProvisioningEngine**: Drives contracts from pending-install to active, with rollback
// - **Repository**: Trait for the externally owned record store
// - **BackendRegistry**: Plugin-based registry for backends and repositories
//
// ## Design Principles
//
// 1. **Device is the source of truth**: reconciliation converges records toward it
// 2. **Never delete on sync**: missing objects deactivate records
// 3. **Fail fast, unwind cleanly**: activation collects compensating actions
// 4. **Library-first**: the daemon is a thin wrapper over this crate

pub mod config;
pub mod credentials;
pub mod device;
pub mod error;
pub mod locks;
pub mod model;
pub mod provisioning;
pub mod registry;
pub mod repository;
pub mod sync;
pub mod traits;
pub mod upsert;

// Re-export core types for convenience
pub use config::{BackendConfig, CoreConfig, DeviceConfig, ProvisioningConfig, RepositoryConfig, SyncConfig};
pub use device::{Capabilities, DeviceSession, SessionOpener};
pub use error::{Error, Result};
pub use locks::RouterLocks;
pub use provisioning::{ActivationOutcome, DeprovisionReport, ProvisioningEngine, ResetOutcome};
pub use registry::BackendRegistry;
pub use repository::{FileRepository, MemoryRepository};
pub use sync::{SyncEngine, SyncReport, SyncResult};
pub use traits::{DeviceConnection, DeviceConnector, Repository};
