//! Host CPU driver
//!
//! Always available. Reports a single "Host" platform holding one CPU
//! device, which lets the manager and the C boundary run on machines
//! without any accelerator driver installed.

use std::thread;

use super::{DeviceDesc, Driver, DriverError, NativeContext, PlatformDesc};
use crate::device::DeviceType;

const HOST_PLATFORM_ID: usize = 0x1;
const HOST_DEVICE_ID: usize = 0x1;

/// Driver exposing the host CPU as the only compute device
#[derive(Debug, Clone, Default)]
pub struct HostDriver;

impl HostDriver {
    pub fn new() -> Self {
        HostDriver
    }

    fn device() -> DeviceDesc {
        let compute_units = thread::available_parallelism()
            .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
            .unwrap_or(1);
        DeviceDesc {
            id: HOST_DEVICE_ID,
            name: format!("Host CPU ({})", std::env::consts::ARCH),
            device_type: DeviceType::Cpu,
            global_mem_bytes: 0,
            compute_units,
        }
    }
}

impl Driver for HostDriver {
    fn name(&self) -> &str {
        "host"
    }

    fn platforms(&self) -> Result<Vec<PlatformDesc>, DriverError> {
        Ok(vec![PlatformDesc {
            id: HOST_PLATFORM_ID,
            name: "Host".to_string(),
        }])
    }

    fn devices(&self, platform: &PlatformDesc) -> Result<Vec<DeviceDesc>, DriverError> {
        if platform.id != HOST_PLATFORM_ID {
            return Err(DriverError::new(
                "listing devices",
                format!("unknown platform {:#x}", platform.id),
            ));
        }
        Ok(vec![Self::device()])
    }

    fn create_context(&self, platform_id: usize, device_id: usize) -> Result<Box<dyn NativeContext>, DriverError> {
        if platform_id != HOST_PLATFORM_ID || device_id != HOST_DEVICE_ID {
            return Err(DriverError::new(
                "creating context",
                format!("unknown device {device_id:#x} on platform {platform_id:#x}"),
            ));
        }
        Ok(Box::new(HostContext { device_id }))
    }
}

/// The host needs no native state; the context only records its device.
#[derive(Debug)]
struct HostContext {
    device_id: usize,
}

impl NativeContext for HostContext {
    fn release(self: Box<Self>) -> Result<(), DriverError> {
        tracing::trace!(device_id = self.device_id, "host context released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_reports_one_cpu() {
        let driver = HostDriver::new();
        let platforms = driver.platforms().unwrap();
        assert_eq!(platforms.len(), 1);

        let devices = driver.devices(&platforms[0]).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_type, DeviceType::Cpu);
        assert!(devices[0].compute_units >= 1);
        assert!(!devices[0].name.is_empty());
    }

    #[test]
    fn test_host_rejects_foreign_ids() {
        let driver = HostDriver::new();
        assert!(driver.create_context(0x99, HOST_DEVICE_ID).is_err());
        assert!(driver.create_context(HOST_PLATFORM_ID, 0x99).is_err());

        let ctx = driver.create_context(HOST_PLATFORM_ID, HOST_DEVICE_ID).unwrap();
        assert!(ctx.release().is_ok());
    }
}
