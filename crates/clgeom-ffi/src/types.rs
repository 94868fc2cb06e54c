//! `#[repr(C)]` values passed across the boundary

use std::ffi::{c_char, CString};
use std::ptr;

use clgeom_core::DeviceInfo;

/// One device of a context manager
///
/// The name pointers stay valid until the owning manager is dropped.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClgeomDeviceInfo {
    pub device_name: *const c_char,
    pub platform_name: *const c_char,
    pub platform_id: usize,
    pub device_id: usize,
    /// 0 other, 1 GPU, 2 CPU, 3 accelerator
    pub device_type: u32,
    pub global_mem_bytes: u64,
    pub compute_units: u32,
    /// Handle of the manager that enumerated this device
    pub manager: u64,
}

/// A context manager and a borrowed view of its devices
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClgeomContextManager {
    pub devices: *const ClgeomDeviceInfo,
    pub n_devices: usize,
    pub handle: u64,
}

impl ClgeomContextManager {
    /// Value returned when manager creation fails
    pub const fn null() -> Self {
        Self {
            devices: ptr::null(),
            n_devices: 0,
            handle: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.handle == 0
    }

    /// Safe view of the device array
    ///
    /// # Safety
    ///
    /// `devices` must point to `n_devices` values that outlive the slice, as
    /// it does for a manager returned by `clgeom_create_context_manager` that
    /// has not been dropped.
    pub unsafe fn devices(&self) -> &[ClgeomDeviceInfo] {
        if self.devices.is_null() {
            &[]
        } else {
            std::slice::from_raw_parts(self.devices, self.n_devices)
        }
    }
}

/// A compute context
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClgeomContext {
    pub handle: u64,
}

impl ClgeomContext {
    pub const fn null() -> Self {
        Self { handle: 0 }
    }

    pub fn is_null(&self) -> bool {
        self.handle == 0
    }
}

/// C-side copy of a manager's devices, plus the strings it points into
///
/// Moving this value does not move the heap buffers, so pointers handed out
/// from `infos` stay valid for as long as the value lives.
#[derive(Debug)]
pub(crate) struct DeviceTable {
    infos: Vec<ClgeomDeviceInfo>,
    _names: Vec<CString>,
}

// The raw pointers only reference `_names`, which the table owns.
unsafe impl Send for DeviceTable {}

impl DeviceTable {
    pub(crate) fn new(manager: u64, devices: &[DeviceInfo]) -> Self {
        let mut names = Vec::with_capacity(devices.len() * 2);
        let mut infos = Vec::with_capacity(devices.len());

        for device in devices {
            let device_name = c_string(device.name());
            let platform_name = c_string(device.platform_name());
            infos.push(ClgeomDeviceInfo {
                device_name: device_name.as_ptr(),
                platform_name: platform_name.as_ptr(),
                platform_id: device.platform_id(),
                device_id: device.device_id(),
                device_type: device.device_type().code(),
                global_mem_bytes: device.global_mem_bytes(),
                compute_units: device.compute_units(),
                manager,
            });
            names.push(device_name);
            names.push(platform_name);
        }

        Self { infos, _names: names }
    }

    pub(crate) fn as_ptr(&self) -> *const ClgeomDeviceInfo {
        self.infos.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.infos.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&ClgeomDeviceInfo> {
        self.infos.get(index)
    }

    /// Position of the entry `info` points at, if it is one of ours
    pub(crate) fn position_of(&self, info: *const ClgeomDeviceInfo) -> Option<usize> {
        self.infos.iter().position(|entry| ptr::eq(entry, info))
    }

    /// Position of an entry equal to a caller-side copy
    pub(crate) fn position_matching(&self, info: &ClgeomDeviceInfo) -> Option<usize> {
        self.infos.iter().position(|entry| {
            entry.manager == info.manager && entry.platform_id == info.platform_id && entry.device_id == info.device_id
        })
    }
}

// Driver names never contain NUL; anything after one is dropped.
fn c_string(s: &str) -> CString {
    let end = s.find('\0').unwrap_or(s.len());
    CString::new(&s[..end]).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_string_truncates_at_nul() {
        assert_eq!(c_string("gpu\0junk").to_str().unwrap(), "gpu");
        assert_eq!(c_string("").to_str().unwrap(), "");
    }

    #[test]
    fn test_null_values() {
        assert!(ClgeomContextManager::null().is_null());
        assert!(unsafe { ClgeomContextManager::null().devices() }.is_empty());
        assert!(ClgeomContext::null().is_null());
    }
}
