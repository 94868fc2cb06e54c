//! Handle-based object management for the C boundary
//!
//! Managers and contexts live in global registries keyed by opaque `u64`
//! handles. C callers only ever hold the handle (plus, for managers, pointers
//! into the device table the registry entry owns).
//!
//! ## Thread Safety
//!
//! All registries use `Arc<Mutex<HashMap>>` for thread-safe access.
//! Handle generation uses atomic operations. When both registries are needed
//! the manager registry is locked first.
//!
//! ## Handle Kinds
//!
//! Context handles carry [`CONTEXT_TAG`]; manager handles never do. Handles
//! are never reused and are only issued once the object is registered, so a
//! handle of the right kind that is below the counter but absent from its
//! registry has been dropped. No per-drop state is kept.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use clgeom_core::{Context, ContextManager};

use crate::status::Status;
use crate::types::{ClgeomContext, ClgeomContextManager, ClgeomDeviceInfo, DeviceTable};

// Global handle counter for unique handle generation
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Bit set on every context handle
pub(crate) const CONTEXT_TAG: u64 = 1 << 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleKind {
    Manager,
    Context,
}

impl HandleKind {
    fn of(handle: u64) -> Self {
        if handle & CONTEXT_TAG == 0 {
            HandleKind::Manager
        } else {
            HandleKind::Context
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            HandleKind::Manager => "manager",
            HandleKind::Context => "context",
        }
    }
}

pub(crate) struct ManagerEntry {
    manager: ContextManager,
    devices: DeviceTable,
}

pub(crate) struct ContextEntry {
    context: Context,
    manager: u64,
}

lazy_static::lazy_static! {
    /// Registry of all live context managers
    pub(crate) static ref MANAGER_REGISTRY: Arc<Mutex<HashMap<u64, ManagerEntry>>> =
        Arc::new(Mutex::new(HashMap::new()));

    /// Registry of all live contexts
    pub(crate) static ref CONTEXT_REGISTRY: Arc<Mutex<HashMap<u64, ContextEntry>>> =
        Arc::new(Mutex::new(HashMap::new()));
}

/// Generate a unique handle for object management
///
/// Handles start at 1 (0 is reserved for invalid/null handles). Context
/// handles additionally carry [`CONTEXT_TAG`].
pub(crate) fn generate_handle(kind: HandleKind) -> u64 {
    let id = HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst);
    match kind {
        HandleKind::Manager => id,
        HandleKind::Context => id | CONTEXT_TAG,
    }
}

/// Whether `handle` was issued as a `kind` handle at some point
fn was_issued(kind: HandleKind, handle: u64) -> bool {
    let id = handle & !CONTEXT_TAG;
    HandleKind::of(handle) == kind && id != 0 && id < HANDLE_COUNTER.load(Ordering::SeqCst)
}

/// Lock a registry, recovering the data if a previous holder panicked
pub(crate) fn lock_registry<T>(mutex: &Arc<Mutex<T>>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Registry mutex was poisoned, recovering data");
            poisoned.into_inner()
        }
    }
}

/// Move a manager into the registry and build its C view
pub(crate) fn register_manager(manager: ContextManager) -> ClgeomContextManager {
    let handle = generate_handle(HandleKind::Manager);
    let devices = DeviceTable::new(handle, manager.devices());

    let c_manager = ClgeomContextManager {
        devices: devices.as_ptr(),
        n_devices: devices.len(),
        handle,
    };

    tracing::info!(
        handle = handle,
        registry = %manager.registry_id(),
        devices = c_manager.n_devices,
        "Context manager registered"
    );

    lock_registry(&MANAGER_REGISTRY).insert(handle, ManagerEntry { manager, devices });
    c_manager
}

/// Pointer to the `index`th device of a registered manager
pub(crate) fn manager_device(handle: u64, index: usize) -> Result<*const ClgeomDeviceInfo, Status> {
    let managers = lock_registry(&MANAGER_REGISTRY);
    let entry = managers.get(&handle).ok_or_else(|| unknown_handle("manager", handle))?;

    match entry.devices.get(index) {
        Some(info) => Ok(info as *const ClgeomDeviceInfo),
        None => {
            tracing::warn!(handle = handle, index, len = entry.devices.len(), "Device index out of range");
            Err(Status::InvalidArgument)
        }
    }
}

/// Create a context on `manager` for the device `device_ptr` points at
///
/// `device` is the caller's view of `*device_ptr`. Entries handed out by the
/// manager are recognised by address; copies are matched by their ids.
pub(crate) fn create_context(
    manager: u64,
    device_ptr: *const ClgeomDeviceInfo,
    device: &ClgeomDeviceInfo,
) -> Result<ClgeomContext, Status> {
    tracing::debug!(manager = manager, device_manager = device.manager, "Creating context");

    let managers = lock_registry(&MANAGER_REGISTRY);
    let entry = managers.get(&manager).ok_or_else(|| unknown_handle("manager", manager))?;

    // Resolve the device through the manager that enumerated it so the core
    // provenance check sees the real origin.
    let origin = if device.manager == manager {
        Some(entry)
    } else {
        managers.get(&device.manager)
    };
    let core_device = origin.and_then(|origin| {
        let index = origin
            .devices
            .position_of(device_ptr)
            .or_else(|| origin.devices.position_matching(device))?;
        origin.manager.devices().get(index)
    });

    let Some(core_device) = core_device else {
        tracing::warn!(
            manager = manager,
            device_manager = device.manager,
            device_id = device.device_id,
            "Device not produced by any live manager"
        );
        return Err(Status::InvalidDevice);
    };

    let context = entry.manager.create_context(core_device).map_err(|e| Status::from(&e))?;

    let handle = generate_handle(HandleKind::Context);
    lock_registry(&CONTEXT_REGISTRY).insert(handle, ContextEntry { context, manager });
    drop(managers);

    tracing::info!(handle = handle, manager = manager, "Context registered");
    Ok(ClgeomContext { handle })
}

/// Remove a context from the registry and release it
///
/// Dropping an already-dropped context, or the null context, succeeds
/// without touching native resources.
pub(crate) fn drop_context(handle: u64) -> Result<(), Status> {
    if handle == 0 {
        tracing::debug!("Dropping null context, nothing to do");
        return Ok(());
    }

    let removed = lock_registry(&CONTEXT_REGISTRY).remove(&handle);

    let Some(entry) = removed else {
        return already_dropped(HandleKind::Context, handle);
    };

    tracing::debug!(handle = handle, manager = entry.manager, "Dropping context");
    entry.context.release().map_err(|e| Status::from(&e))
}

/// Remove a manager from the registry and release it
///
/// Refused with [`Status::ManagerInUse`] while contexts created from the
/// manager are alive; the manager stays registered in that case.
pub(crate) fn drop_manager(handle: u64) -> Result<(), Status> {
    if handle == 0 {
        tracing::debug!("Dropping null context manager, nothing to do");
        return Ok(());
    }

    let entry = {
        let mut managers = lock_registry(&MANAGER_REGISTRY);
        let Some(entry) = managers.get(&handle) else {
            drop(managers);
            return already_dropped(HandleKind::Manager, handle);
        };

        let live = entry.manager.live_contexts();
        if live > 0 {
            tracing::warn!(handle = handle, live, "Refusing to drop context manager with live contexts");
            return Err(Status::ManagerInUse);
        }
        managers.remove(&handle)
    };

    match entry {
        Some(entry) => {
            tracing::debug!(handle = handle, "Dropping context manager");
            entry.manager.release().map_err(|e| Status::from(&e))
        }
        None => Ok(()),
    }
}

/// Outcome of dropping a handle that is not registered
fn already_dropped(kind: HandleKind, handle: u64) -> Result<(), Status> {
    if was_issued(kind, handle) {
        tracing::warn!(handle = handle, kind = kind.as_str(), "Handle already dropped, ignoring");
        Ok(())
    } else {
        Err(unknown_handle(kind.as_str(), handle))
    }
}

fn unknown_handle(kind: &str, handle: u64) -> Status {
    tracing::warn!(handle = handle, kind, "Handle not found");
    Status::InvalidHandle
}

/// Number of registered managers
pub fn manager_count() -> usize {
    lock_registry(&MANAGER_REGISTRY).len()
}

/// Number of registered contexts
pub fn context_count() -> usize {
    lock_registry(&CONTEXT_REGISTRY).len()
}

/// Clear all registries (for testing/debugging)
///
/// Contexts are released before managers. Teardown failures are logged and
/// otherwise ignored.
///
/// # Warning
///
/// This will invalidate all existing handles. Use only for testing.
pub fn clear_all_registries() {
    let contexts: Vec<ContextEntry> = lock_registry(&CONTEXT_REGISTRY).drain().map(|(_, e)| e).collect();
    drop(contexts);

    let managers: Vec<ManagerEntry> = lock_registry(&MANAGER_REGISTRY).drain().map(|(_, e)| e).collect();
    drop(managers);

    tracing::info!("All registries cleared");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clgeom_core::driver::{SimulatedDevice, SimulatedDriver};
    use clgeom_core::DeviceTypeFilter;
    use serial_test::serial;

    fn two_gpus() -> Arc<SimulatedDriver> {
        Arc::new(
            SimulatedDriver::builder()
                .platform("P", vec![SimulatedDevice::gpu("g0"), SimulatedDevice::gpu("g1")])
                .build(),
        )
    }

    fn register(sim: &Arc<SimulatedDriver>) -> ClgeomContextManager {
        register_manager(ContextManager::with_driver(sim.clone(), DeviceTypeFilter::ALL).unwrap())
    }

    #[test]
    #[serial]
    fn test_handle_generation() {
        let h1 = generate_handle(HandleKind::Manager);
        let h2 = generate_handle(HandleKind::Manager);
        let c3 = generate_handle(HandleKind::Context);

        assert!(h1 > 0);
        assert!(h2 > h1);
        assert_eq!(HandleKind::of(h2), HandleKind::Manager);
        assert_eq!(HandleKind::of(c3), HandleKind::Context);
        assert_eq!(c3 & !CONTEXT_TAG, h2 + 1);
    }

    #[test]
    #[serial]
    fn test_clear_registries() {
        clear_all_registries();

        let sim = two_gpus();
        let manager = register(&sim);
        let info = unsafe { *manager.devices };
        create_context(manager.handle, manager.devices, &info).unwrap();

        assert_eq!(manager_count(), 1);
        assert_eq!(context_count(), 1);

        clear_all_registries();

        assert_eq!(manager_count(), 0);
        assert_eq!(context_count(), 0);
        assert_eq!(sim.live_contexts(), 0);
        assert_eq!(sim.registries_released(), 1);
    }

    #[test]
    #[serial]
    fn test_copied_device_info_is_accepted() {
        clear_all_registries();

        let sim = two_gpus();
        let manager = register(&sim);
        let copy = unsafe { manager.devices()[1] };
        let local = &copy as *const ClgeomDeviceInfo;

        let context = create_context(manager.handle, local, &copy).unwrap();
        assert!(!context.is_null());
        drop_context(context.handle).unwrap();
        drop_manager(manager.handle).unwrap();
    }

    #[test]
    #[serial]
    fn test_unknown_handles() {
        clear_all_registries();

        assert_eq!(drop_context(u64::MAX), Err(Status::InvalidHandle));
        assert_eq!(drop_manager(u64::MAX), Err(Status::InvalidHandle));
        assert_eq!(manager_device(u64::MAX, 0), Err(Status::InvalidHandle));
        assert_eq!(drop_manager(0), Ok(()));
        assert_eq!(drop_context(0), Ok(()));
        assert_eq!(drop_context(CONTEXT_TAG), Err(Status::InvalidHandle));
    }

    #[test]
    #[serial]
    fn test_dropped_handles_keep_their_kind() {
        clear_all_registries();

        let sim = two_gpus();
        let manager = register(&sim);
        let info = unsafe { *manager.devices };

        let last = (0..1000)
            .map(|_| {
                let context = create_context(manager.handle, manager.devices, &info).unwrap();
                drop_context(context.handle).unwrap();
                context
            })
            .last()
            .unwrap();
        assert_eq!(context_count(), 0);
        assert_eq!(sim.contexts_released(), 1000);

        drop_manager(manager.handle).unwrap();

        // Dropped handles of the right kind are idempotent.
        assert_eq!(drop_context(last.handle), Ok(()));
        assert_eq!(drop_manager(manager.handle), Ok(()));

        // The wrong kind is never mistaken for a dropped handle.
        assert_eq!(drop_context(manager.handle), Err(Status::InvalidHandle));
        assert_eq!(drop_manager(last.handle), Err(Status::InvalidHandle));
        assert_eq!(sim.registries_released(), 1);
    }
}
