//! # clgeom-core - compute device discovery and context lifecycle
//!
//! Discovers the compute devices a platform driver exposes, lets the caller
//! pick one, and manages the native execution context bound to it.
//!
//! ## Architecture
//!
//! ```text
//! ContextManager            owns one DeviceRegistry snapshot
//!   ├── DeviceRegistry      ordered DeviceInfo arena (platform, then device)
//!   ├── create_context()    → Context (native context + default queue)
//!   └── Driver              HostDriver | SimulatedDriver | OpenClDriver
//! ```
//!
//! ## Lifecycle
//!
//! 1. `ContextManager::new()` enumerates devices. Zero devices is an error.
//! 2. The caller borrows a `DeviceInfo` from `devices()`.
//! 3. `create_context(&device)` checks that the device came from this
//!    manager and opens a native context for it.
//! 4. Contexts are released (explicitly or on drop) before their manager.
//!
//! Kernel execution inside a context is out of scope for this crate.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use clgeom_core::{ContextManager, DeviceTypeFilter, Error};
//! use clgeom_core::driver::SimulatedDriver;
//!
//! let manager = ContextManager::with_driver(Arc::new(SimulatedDriver::empty()), DeviceTypeFilter::ALL);
//! assert_eq!(manager.unwrap_err(), Error::NoDevices);
//! ```

pub mod config;
pub mod context;
pub mod device;
pub mod driver;
pub mod error;
pub mod manager;
pub mod registry;

pub use config::{DeviceTypeFilter, DriverKind, ManagerConfig};
pub use context::Context;
pub use device::{DeviceInfo, DeviceKey, DeviceType, RegistryId};
pub use driver::Driver;
pub use error::{Error, Result};
pub use manager::ContextManager;
pub use registry::DeviceRegistry;
