//! Core traits for netprov
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`DeviceConnection`]: Resource-oriented access to one authenticated router
//! - [`DeviceConnector`]: Opens connections for one protocol backend
//! - [`Repository`]: Externally owned record store

pub mod device;
pub mod repository;

pub use device::{DeviceConnection, DeviceConnector, DeviceConnectorFactory, DeviceObject, DeviceTarget, Fields, Filter};
pub use repository::{Repository, RepositoryFactory};
