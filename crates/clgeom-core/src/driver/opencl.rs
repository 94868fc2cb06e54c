//! OpenCL driver built on the `ocl` crate
//!
//! Native ids are the raw `cl_platform_id` / `cl_device_id` values. The
//! driver keeps the `ocl` handles of enumerated devices so that a context can
//! be opened from ids alone; `release_registry` drops them again.
//!
//! ocl frees queues and contexts in `Drop` and panics when the native release
//! fails, except for `CL_INVALID_CONTEXT` on a context, which it treats as
//! success. A context released behind our back therefore reports success.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use ocl::enums::{DeviceInfo as OclDeviceInfo, DeviceInfoResult};
use ocl::flags::DeviceType as OclDeviceType;
use ocl::{Context as OclContext, Device, Platform, Queue};
use parking_lot::Mutex;

use super::{DeviceDesc, Driver, DriverError, NativeContext, PlatformDesc};
use crate::device::{DeviceKey, DeviceType};

/// Driver talking to the system OpenCL ICD loader
#[derive(Debug, Default)]
pub struct OpenClDriver {
    platforms: Mutex<HashMap<usize, Platform>>,
    devices: Mutex<HashMap<(usize, usize), Device>>,
}

impl OpenClDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ocl_error(operation: &str, err: impl std::fmt::Display) -> DriverError {
    DriverError::new(operation, err)
}

/// Run a native release, turning a panic from ocl's `Drop` into an error
fn release_guarded(operation: &str, release: impl FnOnce()) -> Result<(), DriverError> {
    panic::catch_unwind(AssertUnwindSafe(release)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "native release panicked".to_string());
        DriverError::new(operation, message)
    })
}

fn platform_id(platform: &Platform) -> usize {
    platform.as_core().as_ptr() as usize
}

fn device_id(device: &Device) -> usize {
    device.as_core().as_raw() as usize
}

fn classify(device_type: OclDeviceType) -> DeviceType {
    if device_type.contains(OclDeviceType::GPU) {
        DeviceType::Gpu
    } else if device_type.contains(OclDeviceType::CPU) {
        DeviceType::Cpu
    } else if device_type.contains(OclDeviceType::ACCELERATOR) {
        DeviceType::Accelerator
    } else {
        DeviceType::Other
    }
}

fn describe(device: &Device) -> Result<DeviceDesc, DriverError> {
    let name = device.name().map_err(|e| ocl_error("getting device name", e))?;

    let device_type = match device.info(OclDeviceInfo::Type) {
        Ok(DeviceInfoResult::Type(t)) => classify(t),
        Ok(_) => DeviceType::Other,
        Err(e) => return Err(ocl_error(&format!("getting type of device {name}"), e)),
    };
    let global_mem_bytes = match device.info(OclDeviceInfo::GlobalMemSize) {
        Ok(DeviceInfoResult::GlobalMemSize(bytes)) => bytes,
        Ok(_) => 0,
        Err(e) => return Err(ocl_error(&format!("getting memory size of device {name}"), e)),
    };
    let compute_units = match device.info(OclDeviceInfo::MaxComputeUnits) {
        Ok(DeviceInfoResult::MaxComputeUnits(units)) => units,
        Ok(_) => 0,
        Err(e) => return Err(ocl_error(&format!("getting compute units of device {name}"), e)),
    };

    Ok(DeviceDesc {
        id: device_id(device),
        name,
        device_type,
        global_mem_bytes,
        compute_units,
    })
}

impl Driver for OpenClDriver {
    fn name(&self) -> &str {
        "opencl"
    }

    fn platforms(&self) -> Result<Vec<PlatformDesc>, DriverError> {
        let ids = ocl::core::get_platform_ids().map_err(|e| ocl_error("listing platforms", e))?;
        let mut cache = self.platforms.lock();
        let mut platforms = Vec::with_capacity(ids.len());
        for id in ids {
            let platform = Platform::new(id);
            let name = platform.name().map_err(|e| ocl_error("getting platform name", e))?;
            let id = platform_id(&platform);
            cache.insert(id, platform);
            platforms.push(PlatformDesc { id, name });
        }
        Ok(platforms)
    }

    fn devices(&self, platform: &PlatformDesc) -> Result<Vec<DeviceDesc>, DriverError> {
        let native = self
            .platforms
            .lock()
            .get(&platform.id)
            .copied()
            .ok_or_else(|| ocl_error("listing devices", format!("unknown platform {:#x}", platform.id)))?;

        let devices = Device::list(native, Some(OclDeviceType::ALL))
            .map_err(|e| ocl_error(&format!("listing devices of platform {}", platform.name), e))?;

        let mut cache = self.devices.lock();
        devices
            .into_iter()
            .map(|device| {
                let desc = describe(&device)?;
                cache.insert((platform.id, desc.id), device);
                Ok(desc)
            })
            .collect()
    }

    fn create_context(&self, platform_id: usize, device_id: usize) -> Result<Box<dyn NativeContext>, DriverError> {
        let platform = self.platforms.lock().get(&platform_id).copied();
        let device = self.devices.lock().get(&(platform_id, device_id)).copied();
        let (platform, device) = match (platform, device) {
            (Some(p), Some(d)) => (p, d),
            _ => {
                return Err(ocl_error(
                    "creating context",
                    format!("device {device_id:#x} on platform {platform_id:#x} was not enumerated"),
                ))
            }
        };

        let context = OclContext::builder()
            .platform(platform)
            .devices(device)
            .build()
            .map_err(|e| ocl_error("creating context", e))?;
        let queue = Queue::new(&context, device, None).map_err(|e| ocl_error("creating command queue", e))?;

        Ok(Box::new(OpenClContext { context, queue }))
    }

    fn release_registry(&self, devices: &[DeviceKey]) -> Result<(), DriverError> {
        let mut cache = self.devices.lock();
        for key in devices {
            cache.remove(&(key.platform_id, key.device_id));
        }
        Ok(())
    }
}

/// An OpenCL context with its default in-order queue
struct OpenClContext {
    context: OclContext,
    queue: Queue,
}

impl std::fmt::Debug for OpenClContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClContext")
            .field("context", &self.context.as_core().as_ptr())
            .finish_non_exhaustive()
    }
}

impl NativeContext for OpenClContext {
    fn release(self: Box<Self>) -> Result<(), DriverError> {
        // Drain pending work before the queue and context refcounts drop to zero.
        let finished = self.queue.finish().map_err(|e| ocl_error("finishing command queue", e));
        let OpenClContext { context, queue } = *self;
        let queue_released = release_guarded("releasing command queue", move || drop(queue));
        let context_released = release_guarded("releasing context", move || drop(context));
        finished.and(queue_released).and(context_released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_prefers_gpu() {
        assert_eq!(classify(OclDeviceType::GPU), DeviceType::Gpu);
        assert_eq!(classify(OclDeviceType::GPU | OclDeviceType::DEFAULT), DeviceType::Gpu);
        assert_eq!(classify(OclDeviceType::CPU), DeviceType::Cpu);
        assert_eq!(classify(OclDeviceType::ACCELERATOR), DeviceType::Accelerator);
        assert_eq!(classify(OclDeviceType::CUSTOM), DeviceType::Other);
    }

    #[test]
    fn test_release_panic_becomes_error() {
        let err = release_guarded("releasing context", || panic!("CL_INVALID_VALUE")).unwrap_err();
        assert_eq!(err.to_string(), "error while releasing context: CL_INVALID_VALUE");

        let owned = String::from("CL_OUT_OF_RESOURCES");
        let err = release_guarded("releasing command queue", move || panic!("{owned}")).unwrap_err();
        assert!(err.to_string().contains("CL_OUT_OF_RESOURCES"));

        assert!(release_guarded("releasing context", || ()).is_ok());
    }

    #[test]
    #[ignore = "requires an OpenCL runtime"]
    fn test_enumerate_real_platforms() {
        let driver = OpenClDriver::new();
        let platforms = driver.platforms().expect("OpenCL platforms");
        let devices: Vec<_> = platforms
            .iter()
            .flat_map(|p| driver.devices(p).expect("OpenCL devices"))
            .collect();
        assert!(!devices.is_empty());
    }
}
