//! Error types for clgeom-core operations

use crate::device::{DeviceKey, RegistryId};

/// Result type for clgeom-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while discovering devices or managing contexts
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The platform layer could not be queried (driver missing, query failed)
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    /// The query succeeded but found no usable device on any platform
    #[error("no compute devices found")]
    NoDevices,

    /// The device does not belong to the manager it was used with
    #[error("device {device} does not belong to registry {registry}")]
    InvalidDevice { device: DeviceKey, registry: RegistryId },

    /// The native layer refused to create a context for a valid device
    #[error("context creation failed: {0}")]
    ContextCreation(String),

    /// The native layer failed to release a context
    #[error("context teardown failed: {0}")]
    ContextTeardown(String),

    /// The native layer failed to release registry resources
    #[error("context manager teardown failed: {0}")]
    ManagerTeardown(String),

    /// Device index past the end of the registry
    #[error("device index out of range: {index} >= {len}")]
    DeviceIndexOutOfRange { index: usize, len: usize },

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Create an enumeration error
    pub fn enumeration(msg: impl Into<String>) -> Self {
        Self::Enumeration(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
