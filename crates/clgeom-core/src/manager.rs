//! Context factory owning one enumeration snapshot

use std::fmt;
use std::sync::Arc;

use crate::config::{DeviceTypeFilter, ManagerConfig};
use crate::context::Context;
use crate::device::{DeviceInfo, RegistryId};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;

/// Factory for [`Context`] values
///
/// Holds the devices found at construction. The device list never changes
/// afterwards; call [`ContextManager::new`] again to pick up new hardware.
///
/// # Example
///
/// ```rust,no_run
/// use clgeom_core::ContextManager;
///
/// let manager = ContextManager::new()?;
/// let device = &manager.devices()[0];
/// let context = manager.create_context(device)?;
/// context.release()?;
/// manager.release()?;
/// # Ok::<(), clgeom_core::Error>(())
/// ```
pub struct ContextManager {
    driver: Arc<dyn Driver>,
    registry: DeviceRegistry,
    // One clone per live context; see `live_contexts`.
    leases: Arc<()>,
    released: bool,
}

impl ContextManager {
    /// Create a manager using [`ManagerConfig::from_env`]
    pub fn new() -> Result<Self> {
        Self::with_config(ManagerConfig::from_env())
    }

    /// Create a manager with an explicit configuration
    pub fn with_config(config: ManagerConfig) -> Result<Self> {
        tracing::debug!(driver = %config.driver, device_types = %config.device_types, "creating context manager");
        let driver = config.driver.build()?;
        Self::with_driver(driver, config.device_types)
    }

    /// Create a manager enumerating through the given driver
    ///
    /// # Errors
    ///
    /// [`Error::Enumeration`] or [`Error::NoDevices`], see
    /// [`DeviceRegistry::enumerate`].
    pub fn with_driver(driver: Arc<dyn Driver>, filter: DeviceTypeFilter) -> Result<Self> {
        let start = std::time::Instant::now();
        let registry = DeviceRegistry::enumerate(driver.as_ref(), filter)?;

        tracing::info!(
            registry = %registry.id(),
            driver = driver.name(),
            devices = registry.len(),
            duration_us = start.elapsed().as_micros() as u64,
            "context manager created"
        );

        Ok(Self {
            driver,
            registry,
            leases: Arc::new(()),
            released: false,
        })
    }

    /// All devices, in platform-then-device order
    pub fn devices(&self) -> &[DeviceInfo] {
        self.registry.devices()
    }

    /// Owned copies of all devices
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        self.registry.devices().to_vec()
    }

    pub fn device_count(&self) -> usize {
        self.registry.len()
    }

    /// Checked indexing into the device list
    pub fn device(&self, index: usize) -> Result<&DeviceInfo> {
        self.registry.get(index)
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn registry_id(&self) -> RegistryId {
        self.registry.id()
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Number of contexts created by this manager that are still alive
    pub fn live_contexts(&self) -> usize {
        Arc::strong_count(&self.leases) - 1
    }

    /// Create a context bound to `device`
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDevice`] when `device` was not produced by this
    ///   manager
    /// - [`Error::ContextCreation`] when the native layer rejects the device
    #[tracing::instrument(skip(self, device), fields(registry = %self.registry.id(), device = device.name()))]
    pub fn create_context(&self, device: &DeviceInfo) -> Result<Context> {
        if !self.registry.contains(device) {
            tracing::warn!(device = %device.key(), "device does not belong to this manager");
            return Err(Error::InvalidDevice {
                device: device.key(),
                registry: self.registry.id(),
            });
        }

        let native = self
            .driver
            .create_context(device.platform_id(), device.device_id())
            .map_err(|e| {
                tracing::error!(error = %e, "native context creation failed");
                Error::ContextCreation(e.to_string())
            })?;

        tracing::info!(live = self.live_contexts() + 1, "context created");

        Ok(Context::new(
            native,
            device.key(),
            device.name().to_string(),
            Arc::clone(&self.leases),
        ))
    }

    /// Release the registry's native resources now
    ///
    /// Contexts created from this manager stay valid Rust values, but the
    /// nesting discipline expects them to be released first.
    ///
    /// # Errors
    ///
    /// [`Error::ManagerTeardown`] when the native layer fails to release the
    /// registry. The manager is consumed either way.
    pub fn release(mut self) -> Result<()> {
        self.release_registry()
    }

    fn release_registry(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let live = self.live_contexts();
        if live > 0 {
            tracing::warn!(registry = %self.registry.id(), live, "releasing manager with live contexts");
        }

        match self.driver.release_registry(&self.registry.keys()) {
            Ok(()) => {
                tracing::info!(registry = %self.registry.id(), "context manager released");
                Ok(())
            }
            Err(e) => {
                tracing::error!(registry = %self.registry.id(), error = %e, "registry teardown failed");
                Err(Error::ManagerTeardown(e.to_string()))
            }
        }
    }
}

impl Drop for ContextManager {
    fn drop(&mut self) {
        let _ = self.release_registry();
    }
}

impl fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextManager")
            .field("driver", &self.driver.name())
            .field("registry", &self.registry)
            .field("live_contexts", &self.live_contexts())
            .finish()
    }
}
