//! Native platform layer
//!
//! A [`Driver`] is the only code that talks to the platform driver. The
//! registry and the manager see it through this trait, which keeps the
//! lifecycle logic identical across real and simulated hosts.
//!
//! ```text
//! ContextManager ── DeviceRegistry
//!        │                │
//!        ▼                ▼
//! ┌─────────────────────────────────────────────┐
//! │                Driver trait                  │
//! │  platforms() / devices() / create_context()  │
//! └──────────────┬──────────────┬───────────────┘
//!                ▼              ▼              ▼
//!          HostDriver   SimulatedDriver   OpenClDriver
//!                                         (feature "opencl")
//! ```

mod host;
#[cfg(feature = "opencl")]
mod opencl;
mod simulated;

use std::fmt;

use crate::device::{DeviceKey, DeviceType};

pub use host::HostDriver;
#[cfg(feature = "opencl")]
pub use opencl::OpenClDriver;
pub use simulated::{SimulatedDevice, SimulatedDriver, SimulatedDriverBuilder};

/// A platform as reported by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDesc {
    /// Opaque native platform identifier
    pub id: usize,
    pub name: String,
}

/// A device as reported by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDesc {
    /// Opaque native device identifier
    pub id: usize,
    pub name: String,
    pub device_type: DeviceType,
    pub global_mem_bytes: u64,
    pub compute_units: u32,
}

/// Failure reported by the native layer
///
/// The manager translates these into the matching [`crate::Error`] kind
/// depending on which operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("error while {operation}: {message}")]
pub struct DriverError {
    /// What the driver was doing, e.g. "listing platforms"
    pub operation: String,
    pub message: String,
}

impl DriverError {
    pub fn new(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Interface every native platform layer implements
///
/// Calls are synchronous and may block for the duration of a driver query.
pub trait Driver: Send + Sync + fmt::Debug {
    /// Short name used in logs and diagnostics
    fn name(&self) -> &str;

    /// List every platform the driver exposes
    fn platforms(&self) -> Result<Vec<PlatformDesc>, DriverError>;

    /// List every device of one platform, in driver order
    ///
    /// A platform without devices yields an empty list, not an error.
    fn devices(&self, platform: &PlatformDesc) -> Result<Vec<DeviceDesc>, DriverError>;

    /// Create a native context and its default command queue for one device
    fn create_context(&self, platform_id: usize, device_id: usize) -> Result<Box<dyn NativeContext>, DriverError>;

    /// Release whatever the driver holds for an enumeration snapshot
    fn release_registry(&self, _devices: &[DeviceKey]) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Native resources of one created context
pub trait NativeContext: Send + fmt::Debug {
    /// Release the context and its queue. Called exactly once.
    fn release(self: Box<Self>) -> Result<(), DriverError>;
}
