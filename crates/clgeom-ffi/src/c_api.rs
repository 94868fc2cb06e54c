//! Exported C functions
//!
//! Every function reports its outcome through a `status_out` pointer (`0` on
//! success, see [`Status`]). A null `status_out` is allowed and discards the
//! status. Panics are caught here and reported as [`Status::Panic`].

use std::ffi::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use clgeom_core::{ContextManager, DeviceTypeFilter, Driver};

use crate::handles;
use crate::status::Status;
use crate::types::{ClgeomContext, ClgeomContextManager, ClgeomDeviceInfo};

static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();

/// # Safety
///
/// `status_out` must be null or valid for a `u32` write.
unsafe fn write_status(status_out: *mut u32, status: Status) {
    if !status_out.is_null() {
        status_out.write(status.code());
    }
}

/// Run `f`, write its status and return its value (or `fallback` on failure)
///
/// # Safety
///
/// `status_out` must be null or valid for a `u32` write.
unsafe fn guarded<T>(status_out: *mut u32, fallback: T, f: impl FnOnce() -> Result<T, Status>) -> T {
    let (value, status) = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => (value, Status::Success),
        Ok(Err(status)) => (fallback, status),
        Err(_) => {
            tracing::error!("Panic caught at the C boundary");
            (fallback, Status::Panic)
        }
    };
    write_status(status_out, status);
    value
}

/// Create a context manager on an explicit driver
///
/// Rust-side entry point behind [`clgeom_create_context_manager`], for
/// embedders that bring their own [`Driver`].
pub fn create_context_manager_with_driver(
    driver: Arc<dyn Driver>,
    filter: DeviceTypeFilter,
    status: &mut u32,
) -> ClgeomContextManager {
    // SAFETY: a `&mut u32` is always valid for writes.
    unsafe {
        guarded(status, ClgeomContextManager::null(), || {
            let manager = ContextManager::with_driver(driver, filter).map_err(|e| {
                tracing::error!(error = %e, "Failed to create context manager");
                Status::from(&e)
            })?;
            Ok(handles::register_manager(manager))
        })
    }
}

/// Enumerate devices and create a context manager
///
/// The driver and device classes come from `CLGEOM_DRIVER` and
/// `CLGEOM_DEVICE_TYPES`. On failure the returned manager has a zero handle,
/// no devices, and `*status_out` holds the reason. The manager must be
/// released with [`clgeom_drop_context_manager`].
///
/// # Safety
///
/// `status_out` must be null or valid for a `u32` write.
#[no_mangle]
pub unsafe extern "C" fn clgeom_create_context_manager(status_out: *mut u32) -> ClgeomContextManager {
    guarded(status_out, ClgeomContextManager::null(), || {
        let manager = ContextManager::new().map_err(|e| {
            tracing::error!(error = %e, "Failed to create context manager");
            Status::from(&e)
        })?;
        Ok(handles::register_manager(manager))
    })
}

/// Create a context for one of `manager`'s devices
///
/// Status is `InvalidDevice` when `device` was enumerated by another
/// manager, `ContextCreation` when the driver refuses the device.
///
/// # Safety
///
/// `manager` and `device` must each be null or point to a readable value.
/// `status_out` must be null or valid for a `u32` write.
#[no_mangle]
pub unsafe extern "C" fn clgeom_create_context(
    manager: *const ClgeomContextManager,
    device: *const ClgeomDeviceInfo,
    status_out: *mut u32,
) -> ClgeomContext {
    guarded(status_out, ClgeomContext::null(), || {
        if manager.is_null() || device.is_null() {
            tracing::warn!("Null manager or device passed to clgeom_create_context");
            return Err(Status::InvalidHandle);
        }
        let handle = (*manager).handle;
        let info = *device;
        handles::create_context(handle, device, &info)
    })
}

/// Release a context
///
/// Dropping the same context twice reports success and does nothing the
/// second time. Dropping the null context is a no-op.
///
/// # Safety
///
/// `status_out` must be null or valid for a `u32` write.
#[no_mangle]
pub unsafe extern "C" fn clgeom_drop_context(context: ClgeomContext, status_out: *mut u32) {
    guarded(status_out, (), || handles::drop_context(context.handle))
}

/// Release a context manager and the device table it handed out
///
/// Status is `ManagerInUse` while contexts created from `manager` are still
/// alive; the manager stays valid and can be dropped again later. Dropping
/// the value returned by a failed [`clgeom_create_context_manager`] is a
/// no-op.
///
/// # Safety
///
/// `status_out` must be null or valid for a `u32` write.
#[no_mangle]
pub unsafe extern "C" fn clgeom_drop_context_manager(manager: ClgeomContextManager, status_out: *mut u32) {
    guarded(status_out, (), || handles::drop_manager(manager.handle))
}

/// Checked access to a manager's device table
///
/// Returns null with `InvalidArgument` when `index` is out of range.
///
/// # Safety
///
/// `manager` must be null or point to a readable value. `status_out` must be
/// null or valid for a `u32` write.
#[no_mangle]
pub unsafe extern "C" fn clgeom_manager_device(
    manager: *const ClgeomContextManager,
    index: usize,
    status_out: *mut u32,
) -> *const ClgeomDeviceInfo {
    guarded(status_out, ptr::null(), || {
        if manager.is_null() {
            return Err(Status::InvalidHandle);
        }
        handles::manager_device((*manager).handle, index)
    })
}

/// Static description of a status code
#[no_mangle]
pub extern "C" fn clgeom_status_message(status: u32) -> *const c_char {
    match Status::from_code(status) {
        Some(status) => status.message_ptr(),
        None => b"unknown status\0".as_ptr().cast(),
    }
}

/// Library version as a NUL-terminated string
#[no_mangle]
pub extern "C" fn clgeom_version() -> *const c_char {
    VERSION.as_ptr().cast()
}

/// Install the tracing subscriber configured by `CLGEOM_TRACING_*`
///
/// A subscriber that is already installed counts as success.
///
/// # Safety
///
/// `status_out` must be null or valid for a `u32` write.
#[no_mangle]
pub unsafe extern "C" fn clgeom_init_logging(status_out: *mut u32) {
    guarded(status_out, (), || {
        let config = clgeom_tracing::TracingConfig::from_env();
        match clgeom_tracing::init_global_tracing(&config) {
            Ok(()) => Ok(()),
            Err(clgeom_tracing::TracingSetupError::SubscriberInit(_)) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install tracing subscriber");
                Err(Status::Config)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_guarded_catches_panics() {
        let mut status = 0;
        let value = unsafe { guarded(&mut status, 7u8, || panic!("boom")) };
        assert_eq!(value, 7);
        assert_eq!(status, Status::Panic.code());
    }

    #[test]
    fn test_null_status_out_is_tolerated() {
        let value = unsafe { guarded(ptr::null_mut(), 0u8, || Err(Status::InvalidArgument)) };
        assert_eq!(value, 0);
        unsafe { clgeom_drop_context(ClgeomContext::null(), ptr::null_mut()) };
    }

    #[test]
    fn test_null_context_drop_succeeds() {
        let mut status = u32::MAX;
        unsafe { clgeom_drop_context(ClgeomContext::null(), &mut status) };
        assert_eq!(status, Status::Success.code());
        unsafe { clgeom_drop_context_manager(ClgeomContextManager::null(), &mut status) };
        assert_eq!(status, Status::Success.code());
    }

    #[test]
    fn test_status_message() {
        let text = unsafe { CStr::from_ptr(clgeom_status_message(8)) };
        assert_eq!(text.to_str().unwrap(), "context manager still has live contexts");
        let unknown = unsafe { CStr::from_ptr(clgeom_status_message(42)) };
        assert_eq!(unknown.to_str().unwrap(), "unknown status");
    }

    #[test]
    fn test_version() {
        let version = unsafe { CStr::from_ptr(clgeom_version()) };
        assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }
}
