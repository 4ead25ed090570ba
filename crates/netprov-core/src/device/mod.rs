//! Device-facing layer
//!
//! - [`session`]: one router behind primary/fallback backends
//! - [`records`]: typed records and vendor-string normalization
//! - [`topology`]: uplink detection guarding destructive calls
//! - [`paths`]: collection paths used by the engines

pub mod paths;
pub mod records;
pub mod session;
pub mod topology;

pub use records::{FromDevice, Managed};
pub use session::{Capabilities, DeviceSession, Resource, SessionOpener};
pub use topology::is_public_ipv4;
