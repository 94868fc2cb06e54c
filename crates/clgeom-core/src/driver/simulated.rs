//! In-memory driver with configurable hardware and injectable failures
//!
//! Used by the test suites and benches to exercise every lifecycle path,
//! including the ones a real driver only produces on broken hosts.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use clgeom_core::{ContextManager, DeviceTypeFilter};
//! use clgeom_core::driver::{SimulatedDevice, SimulatedDriver};
//!
//! let sim = Arc::new(
//!     SimulatedDriver::builder()
//!         .platform("Sim", vec![SimulatedDevice::gpu("Sim GPU 0")])
//!         .build(),
//! );
//! let manager = ContextManager::with_driver(sim.clone(), DeviceTypeFilter::ALL)?;
//! let context = manager.create_context(&manager.devices()[0])?;
//! assert_eq!(sim.live_contexts(), 1);
//! context.release()?;
//! assert_eq!(sim.live_contexts(), 0);
//! # Ok::<(), clgeom_core::Error>(())
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{DeviceDesc, Driver, DriverError, NativeContext, PlatformDesc};
use crate::device::{DeviceKey, DeviceType};

// Simulated native ids: platform p is 0x1000 * (p + 1), its device d is
// platform_id + d + 1. Never zero, never shared between platforms.
const PLATFORM_STRIDE: usize = 0x1000;

/// Hardware description of one simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedDevice {
    pub name: String,
    pub device_type: DeviceType,
    pub global_mem_bytes: u64,
    pub compute_units: u32,
}

impl SimulatedDevice {
    /// A GPU with 4 GiB and 32 compute units
    pub fn gpu(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_type: DeviceType::Gpu,
            global_mem_bytes: 4 << 30,
            compute_units: 32,
        }
    }

    /// A CPU with 16 GiB and 8 compute units
    pub fn cpu(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_type: DeviceType::Cpu,
            global_mem_bytes: 16 << 30,
            compute_units: 8,
        }
    }

    /// An accelerator with 8 GiB and 64 compute units
    pub fn accelerator(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_type: DeviceType::Accelerator,
            global_mem_bytes: 8 << 30,
            compute_units: 64,
        }
    }
}

#[derive(Debug, Clone)]
struct SimulatedPlatform {
    name: String,
    devices: Vec<SimulatedDevice>,
}

#[derive(Debug, Default)]
struct Faults {
    enumeration: Option<String>,
    device_query: Option<String>,
    rejected: HashSet<usize>,
    context_teardown: bool,
    registry_teardown: bool,
}

#[derive(Debug, Default)]
struct Counters {
    contexts_created: AtomicUsize,
    contexts_released: AtomicUsize,
    registries_released: AtomicUsize,
}

/// Builder for [`SimulatedDriver`]
#[derive(Debug, Default)]
pub struct SimulatedDriverBuilder {
    platforms: Vec<SimulatedPlatform>,
    faults: Faults,
}

impl SimulatedDriverBuilder {
    /// Add a platform holding the given devices
    pub fn platform(mut self, name: impl Into<String>, devices: Vec<SimulatedDevice>) -> Self {
        self.platforms.push(SimulatedPlatform {
            name: name.into(),
            devices,
        });
        self
    }

    /// Make the platform query fail
    pub fn fail_enumeration(mut self, message: impl Into<String>) -> Self {
        self.faults.enumeration = Some(message.into());
        self
    }

    /// Make every per-platform device query fail
    pub fn fail_device_query(mut self, message: impl Into<String>) -> Self {
        self.faults.device_query = Some(message.into());
        self
    }

    /// Refuse context creation on device `device` of platform `platform`
    pub fn reject_device(mut self, platform: usize, device: usize) -> Self {
        self.faults.rejected.insert(device_id(platform, device));
        self
    }

    /// Make every context release report a native failure
    pub fn fail_context_teardown(mut self) -> Self {
        self.faults.context_teardown = true;
        self
    }

    /// Make registry release report a native failure
    pub fn fail_registry_teardown(mut self) -> Self {
        self.faults.registry_teardown = true;
        self
    }

    pub fn build(self) -> SimulatedDriver {
        SimulatedDriver {
            platforms: self.platforms,
            faults: Arc::new(Mutex::new(self.faults)),
            counters: Arc::new(Counters::default()),
        }
    }
}

/// Driver backed by an in-memory host description
#[derive(Debug)]
pub struct SimulatedDriver {
    platforms: Vec<SimulatedPlatform>,
    faults: Arc<Mutex<Faults>>,
    counters: Arc<Counters>,
}

impl SimulatedDriver {
    pub fn builder() -> SimulatedDriverBuilder {
        SimulatedDriverBuilder::default()
    }

    /// A host with one platform holding one GPU
    pub fn single_gpu() -> Self {
        Self::builder()
            .platform("Simulated Platform", vec![SimulatedDevice::gpu("Simulated GPU")])
            .build()
    }

    /// A host with platforms but no devices at all
    pub fn empty() -> Self {
        Self::builder().platform("Simulated Platform", Vec::new()).build()
    }

    /// Native id the driver assigns to device `device` of platform `platform`
    pub fn native_ids(platform: usize, device: usize) -> (usize, usize) {
        (platform_id(platform), device_id(platform, device))
    }

    /// Toggle context teardown failure at runtime
    pub fn set_fail_context_teardown(&self, fail: bool) {
        self.faults.lock().context_teardown = fail;
    }

    /// Toggle registry teardown failure at runtime
    pub fn set_fail_registry_teardown(&self, fail: bool) {
        self.faults.lock().registry_teardown = fail;
    }

    pub fn contexts_created(&self) -> usize {
        self.counters.contexts_created.load(Ordering::SeqCst)
    }

    /// Number of native release calls, successful or not
    pub fn contexts_released(&self) -> usize {
        self.counters.contexts_released.load(Ordering::SeqCst)
    }

    /// Native contexts created and not yet released
    pub fn live_contexts(&self) -> usize {
        self.contexts_created() - self.contexts_released()
    }

    pub fn registries_released(&self) -> usize {
        self.counters.registries_released.load(Ordering::SeqCst)
    }

    fn lookup(&self, platform_id: usize, device_id: usize) -> Option<&SimulatedDevice> {
        self.platforms.iter().enumerate().find_map(|(p, platform)| {
            if self::platform_id(p) != platform_id {
                return None;
            }
            platform
                .devices
                .iter()
                .enumerate()
                .find(|(d, _)| self::device_id(p, *d) == device_id)
                .map(|(_, device)| device)
        })
    }
}

fn platform_id(platform: usize) -> usize {
    PLATFORM_STRIDE * (platform + 1)
}

fn device_id(platform: usize, device: usize) -> usize {
    platform_id(platform) + device + 1
}

impl Driver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn platforms(&self) -> Result<Vec<PlatformDesc>, DriverError> {
        if let Some(message) = &self.faults.lock().enumeration {
            return Err(DriverError::new("listing platforms", message));
        }
        Ok(self
            .platforms
            .iter()
            .enumerate()
            .map(|(p, platform)| PlatformDesc {
                id: platform_id(p),
                name: platform.name.clone(),
            })
            .collect())
    }

    fn devices(&self, platform: &PlatformDesc) -> Result<Vec<DeviceDesc>, DriverError> {
        if let Some(message) = &self.faults.lock().device_query {
            return Err(DriverError::new("listing devices", message));
        }
        let p = (0..self.platforms.len())
            .find(|p| platform_id(*p) == platform.id)
            .ok_or_else(|| DriverError::new("listing devices", format!("unknown platform {:#x}", platform.id)))?;
        Ok(self.platforms[p]
            .devices
            .iter()
            .enumerate()
            .map(|(d, device)| DeviceDesc {
                id: device_id(p, d),
                name: device.name.clone(),
                device_type: device.device_type,
                global_mem_bytes: device.global_mem_bytes,
                compute_units: device.compute_units,
            })
            .collect())
    }

    fn create_context(&self, platform_id: usize, device_id: usize) -> Result<Box<dyn NativeContext>, DriverError> {
        let device = self.lookup(platform_id, device_id).ok_or_else(|| {
            DriverError::new(
                "creating context",
                format!("unknown device {device_id:#x} on platform {platform_id:#x}"),
            )
        })?;
        if self.faults.lock().rejected.contains(&device_id) {
            return Err(DriverError::new(
                "creating context",
                format!("device {} is exclusively claimed", device.name),
            ));
        }

        self.counters.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedContext {
            device_id,
            faults: Arc::clone(&self.faults),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn release_registry(&self, devices: &[DeviceKey]) -> Result<(), DriverError> {
        self.counters.registries_released.fetch_add(1, Ordering::SeqCst);
        if self.faults.lock().registry_teardown {
            return Err(DriverError::new(
                "releasing devices",
                format!("{} device records still referenced", devices.len()),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct SimulatedContext {
    device_id: usize,
    faults: Arc<Mutex<Faults>>,
    counters: Arc<Counters>,
}

impl NativeContext for SimulatedContext {
    fn release(self: Box<Self>) -> Result<(), DriverError> {
        self.counters.contexts_released.fetch_add(1, Ordering::SeqCst);
        if self.faults.lock().context_teardown {
            return Err(DriverError::new(
                "releasing context",
                format!("context on device {:#x} already released externally", self.device_id),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_platforms() -> SimulatedDriver {
        SimulatedDriver::builder()
            .platform("A", vec![SimulatedDevice::gpu("A0"), SimulatedDevice::cpu("A1")])
            .platform("B", vec![SimulatedDevice::accelerator("B0")])
            .build()
    }

    #[test]
    fn test_native_ids_are_unique() {
        let driver = two_platforms();
        let mut seen = HashSet::new();
        for platform in driver.platforms().unwrap() {
            assert!(seen.insert(platform.id));
            for device in driver.devices(&platform).unwrap() {
                assert!(seen.insert(device.id));
            }
        }
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_enumeration_fault() {
        let driver = SimulatedDriver::builder().fail_enumeration("no ICD").build();
        let err = driver.platforms().unwrap_err();
        assert_eq!(err.operation, "listing platforms");
        assert_eq!(err.message, "no ICD");
    }

    #[test]
    fn test_rejected_device() {
        let driver = SimulatedDriver::builder()
            .platform("A", vec![SimulatedDevice::gpu("A0"), SimulatedDevice::gpu("A1")])
            .reject_device(0, 1)
            .build();
        let (p, d0) = SimulatedDriver::native_ids(0, 0);
        let (_, d1) = SimulatedDriver::native_ids(0, 1);

        assert!(driver.create_context(p, d1).is_err());
        let ctx = driver.create_context(p, d0).unwrap();
        assert_eq!(driver.live_contexts(), 1);
        ctx.release().unwrap();
        assert_eq!(driver.live_contexts(), 0);
    }

    #[test]
    fn test_teardown_fault_toggle() {
        let driver = SimulatedDriver::single_gpu();
        let (p, d) = SimulatedDriver::native_ids(0, 0);

        driver.set_fail_context_teardown(true);
        let ctx = driver.create_context(p, d).unwrap();
        assert!(ctx.release().is_err());
        assert_eq!(driver.contexts_released(), 1);

        driver.set_fail_context_teardown(false);
        let ctx = driver.create_context(p, d).unwrap();
        assert!(ctx.release().is_ok());
    }

    #[test]
    fn test_unknown_device() {
        let driver = SimulatedDriver::single_gpu();
        assert!(driver.create_context(0xdead, 0xbeef).is_err());
        assert_eq!(driver.contexts_created(), 0);
    }
}
