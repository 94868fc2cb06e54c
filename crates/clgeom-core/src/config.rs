//! Manager configuration
//!
//! # Environment Variables
//!
//! - `CLGEOM_DRIVER` - `auto` (default), `host` or `opencl`
//! - `CLGEOM_DEVICE_TYPES` - comma-separated device classes to expose:
//!   `gpu`, `cpu`, `accelerator`, `other` or `all` (default)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::device::DeviceType;
use crate::driver::{Driver, HostDriver};
use crate::error::{Error, Result};

pub const DRIVER_ENV: &str = "CLGEOM_DRIVER";
pub const DEVICE_TYPES_ENV: &str = "CLGEOM_DEVICE_TYPES";

/// Set of device classes the registry keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceTypeFilter(u8);

impl DeviceTypeFilter {
    pub const NONE: Self = Self(0);
    pub const GPU: Self = Self(1 << 0);
    pub const CPU: Self = Self(1 << 1);
    pub const ACCELERATOR: Self = Self(1 << 2);
    pub const OTHER: Self = Self(1 << 3);
    pub const ALL: Self = Self(0b1111);

    const fn bit(device_type: DeviceType) -> u8 {
        match device_type {
            DeviceType::Gpu => Self::GPU.0,
            DeviceType::Cpu => Self::CPU.0,
            DeviceType::Accelerator => Self::ACCELERATOR.0,
            DeviceType::Other => Self::OTHER.0,
        }
    }

    pub const fn contains(self, device_type: DeviceType) -> bool {
        self.0 & Self::bit(device_type) != 0
    }

    pub const fn with(self, device_type: DeviceType) -> Self {
        Self(self.0 | Self::bit(device_type))
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for DeviceTypeFilter {
    fn default() -> Self {
        Self::ALL
    }
}

impl fmt::Display for DeviceTypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ALL {
            return f.write_str("all");
        }
        let names: Vec<String> = [DeviceType::Gpu, DeviceType::Cpu, DeviceType::Accelerator, DeviceType::Other]
            .into_iter()
            .filter(|t| self.contains(*t))
            .map(|t| t.to_string())
            .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(","))
        }
    }
}

impl FromStr for DeviceTypeFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut filter = Self::NONE;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("all") {
                return Ok(Self::ALL);
            }
            filter = filter.with(part.parse()?);
        }
        if filter.is_empty() {
            return Err(Error::config(format!("empty device type list: {s:?}")));
        }
        Ok(filter)
    }
}

/// Which native layer the manager enumerates through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverKind {
    /// OpenCL when compiled with the `opencl` feature, the host CPU otherwise
    #[default]
    Auto,
    /// The host CPU driver (always available)
    Host,
    /// The OpenCL driver (requires the `opencl` feature)
    OpenCl,
}

impl DriverKind {
    /// Build the driver this kind names
    pub fn build(self) -> Result<Arc<dyn Driver>> {
        match self {
            DriverKind::Host => Ok(Arc::new(HostDriver::new())),
            DriverKind::OpenCl => open_cl(),
            DriverKind::Auto => {
                if cfg!(feature = "opencl") {
                    open_cl()
                } else {
                    Ok(Arc::new(HostDriver::new()))
                }
            }
        }
    }
}

#[cfg(feature = "opencl")]
fn open_cl() -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(crate::driver::OpenClDriver::new()))
}

#[cfg(not(feature = "opencl"))]
fn open_cl() -> Result<Arc<dyn Driver>> {
    Err(Error::config("OpenCL driver requires the 'opencl' feature to be enabled"))
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverKind::Auto => "auto",
            DriverKind::Host => "host",
            DriverKind::OpenCl => "opencl",
        };
        f.write_str(name)
    }
}

impl FromStr for DriverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(DriverKind::Auto),
            "host" | "cpu" => Ok(DriverKind::Host),
            "opencl" | "ocl" => Ok(DriverKind::OpenCl),
            other => Err(Error::config(format!("unknown driver: {other}"))),
        }
    }
}

/// Configuration for constructing a `ContextManager`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerConfig {
    pub driver: DriverKind,
    pub device_types: DeviceTypeFilter,
}

impl ManagerConfig {
    /// Read the configuration from the environment, ignoring invalid values
    ///
    /// Invalid values are logged and replaced by their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = env::var(DRIVER_ENV) {
            match value.parse() {
                Ok(driver) => config.driver = driver,
                Err(e) => tracing::warn!(variable = DRIVER_ENV, value = %value, error = %e, "ignoring invalid value"),
            }
        }
        if let Ok(value) = env::var(DEVICE_TYPES_ENV) {
            match value.parse() {
                Ok(filter) => config.device_types = filter,
                Err(e) => {
                    tracing::warn!(variable = DEVICE_TYPES_ENV, value = %value, error = %e, "ignoring invalid value")
                }
            }
        }
        config
    }

    /// Read the configuration from the environment, failing on invalid values
    pub fn try_from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = env::var(DRIVER_ENV) {
            config.driver = value.parse()?;
        }
        if let Ok(value) = env::var(DEVICE_TYPES_ENV) {
            config.device_types = value.parse()?;
        }
        Ok(config)
    }
}
