//! Device descriptors produced by enumeration

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;

// Registry ids start at 1 so that 0 never names a live snapshot.
static REGISTRY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of one enumeration snapshot
///
/// Every `DeviceRegistry` gets a fresh id, so two managers enumerating the
/// same host still hand out distinguishable devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryId(u64);

impl RegistryId {
    pub(crate) fn next() -> Self {
        RegistryId(REGISTRY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reg{}", self.0)
    }
}

/// Class of a compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Gpu,
    Cpu,
    Accelerator,
    /// Anything the driver reports that is none of the above
    Other,
}

impl DeviceType {
    /// Numeric code used at the C boundary
    pub const fn code(self) -> u32 {
        match self {
            DeviceType::Other => 0,
            DeviceType::Gpu => 1,
            DeviceType::Cpu => 2,
            DeviceType::Accelerator => 3,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Gpu => "gpu",
            DeviceType::Cpu => "cpu",
            DeviceType::Accelerator => "accelerator",
            DeviceType::Other => "other",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu" => Ok(DeviceType::Gpu),
            "cpu" => Ok(DeviceType::Cpu),
            "accelerator" | "accel" => Ok(DeviceType::Accelerator),
            "other" => Ok(DeviceType::Other),
            other => Err(Error::config(format!("unknown device type: {other}"))),
        }
    }
}

/// Copyable reference to one entry of a registry
///
/// Carried by `Context` for diagnostics. It does not keep the registry alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub registry: RegistryId,
    pub index: usize,
    pub platform_id: usize,
    pub device_id: usize,
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] (platform {:#x}, device {:#x})",
            self.registry, self.index, self.platform_id, self.device_id
        )
    }
}

/// Descriptor of one discoverable compute device
///
/// Immutable once produced. Only valid with the `ContextManager` whose
/// registry created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    key: DeviceKey,
    name: String,
    platform_name: String,
    device_type: DeviceType,
    global_mem_bytes: u64,
    compute_units: u32,
}

impl DeviceInfo {
    pub(crate) fn new(
        key: DeviceKey,
        name: String,
        platform_name: String,
        device_type: DeviceType,
        global_mem_bytes: u64,
        compute_units: u32,
    ) -> Self {
        Self {
            key,
            name,
            platform_name,
            device_type,
            global_mem_bytes,
            compute_units,
        }
    }

    /// Provenance and native identity of this device
    pub fn key(&self) -> DeviceKey {
        self.key
    }

    /// The name of the device
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the device's platform
    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    /// Opaque native platform identifier
    pub fn platform_id(&self) -> usize {
        self.key.platform_id
    }

    /// Opaque native device identifier
    pub fn device_id(&self) -> usize {
        self.key.device_id
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Global memory size in bytes, 0 when the driver does not report it
    pub fn global_mem_bytes(&self) -> u64 {
        self.global_mem_bytes
    }

    pub fn compute_units(&self) -> u32 {
        self.compute_units
    }

    /// Index of this device inside its registry
    pub fn index(&self) -> usize {
        self.key.index
    }

    /// Registry that produced this device
    pub fn registry(&self) -> RegistryId {
        self.key.registry
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} ({}, {} CUs, {} MiB)",
            self.name,
            self.platform_name,
            self.device_type,
            self.compute_units,
            self.global_mem_bytes >> 20
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_ids_are_unique() {
        let a = RegistryId::next();
        let b = RegistryId::next();
        assert!(a.id() > 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_device_type_parse() {
        assert_eq!("GPU".parse::<DeviceType>().unwrap(), DeviceType::Gpu);
        assert_eq!(" cpu ".parse::<DeviceType>().unwrap(), DeviceType::Cpu);
        assert_eq!("accel".parse::<DeviceType>().unwrap(), DeviceType::Accelerator);
        assert!(matches!("fpga".parse::<DeviceType>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_device_type_codes_are_distinct() {
        let codes = [
            DeviceType::Other.code(),
            DeviceType::Gpu.code(),
            DeviceType::Cpu.code(),
            DeviceType::Accelerator.code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_display_includes_name_and_platform() {
        let key = DeviceKey {
            registry: RegistryId(7),
            index: 0,
            platform_id: 0x10,
            device_id: 0x20,
        };
        let info = DeviceInfo::new(key, "Tahiti".into(), "AMD APP".into(), DeviceType::Gpu, 3 << 30, 32);
        let text = info.to_string();
        assert!(text.contains("Tahiti"));
        assert!(text.contains("AMD APP"));
        assert!(text.contains("3072 MiB"));
        assert_eq!(key.to_string(), "reg7[0] (platform 0x10, device 0x20)");
    }
}
