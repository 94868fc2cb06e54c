//! Device enumeration snapshot
//!
//! The registry is the arena behind a `ContextManager`: it owns every
//! `DeviceInfo` and callers only ever borrow from it.

use crate::config::DeviceTypeFilter;
use crate::device::{DeviceInfo, DeviceKey, RegistryId};
use crate::driver::Driver;
use crate::error::{Error, Result};

/// Ordered, immutable sequence of the devices found on the host
///
/// Order is platform enumeration order, then device order within each
/// platform. Never empty.
#[derive(Debug)]
pub struct DeviceRegistry {
    id: RegistryId,
    devices: Vec<DeviceInfo>,
}

impl DeviceRegistry {
    /// Enumerate every platform and every device matching `filter`
    ///
    /// # Errors
    ///
    /// - [`Error::Enumeration`] when the platform list or any platform's
    ///   device list cannot be queried
    /// - [`Error::NoDevices`] when the queries succeed but no device matches
    #[tracing::instrument(skip(driver), fields(driver = driver.name()))]
    pub fn enumerate(driver: &dyn Driver, filter: DeviceTypeFilter) -> Result<Self> {
        let platforms = driver.platforms().map_err(|e| {
            tracing::error!(error = %e, "platform query failed");
            Error::enumeration(e.to_string())
        })?;

        let id = RegistryId::next();
        let mut devices = Vec::new();
        for platform in &platforms {
            let found = driver.devices(platform).map_err(|e| {
                tracing::error!(platform = %platform.name, error = %e, "device query failed");
                Error::enumeration(e.to_string())
            })?;

            tracing::debug!(platform = %platform.name, count = found.len(), "platform enumerated");

            for desc in found.into_iter().filter(|d| filter.contains(d.device_type)) {
                let key = DeviceKey {
                    registry: id,
                    index: devices.len(),
                    platform_id: platform.id,
                    device_id: desc.id,
                };
                devices.push(DeviceInfo::new(
                    key,
                    desc.name,
                    platform.name.clone(),
                    desc.device_type,
                    desc.global_mem_bytes,
                    desc.compute_units,
                ));
            }
        }

        if devices.is_empty() {
            tracing::warn!(platforms = platforms.len(), filter = %filter, "no usable devices");
            return Err(Error::NoDevices);
        }

        tracing::info!(registry = %id, platforms = platforms.len(), devices = devices.len(), "devices enumerated");

        Ok(Self { id, devices })
    }

    pub fn id(&self) -> RegistryId {
        self.id
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Always false for a successfully enumerated registry
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&DeviceInfo> {
        self.devices.get(index).ok_or(Error::DeviceIndexOutOfRange {
            index,
            len: self.devices.len(),
        })
    }

    /// Whether `device` was produced by this registry
    ///
    /// Checks the registry id, then that the recorded index still holds the
    /// same native platform/device pair.
    pub fn contains(&self, device: &DeviceInfo) -> bool {
        self.contains_key(&device.key())
    }

    pub fn contains_key(&self, key: &DeviceKey) -> bool {
        key.registry == self.id && self.devices.get(key.index).is_some_and(|own| own.key() == *key)
    }

    pub(crate) fn keys(&self) -> Vec<DeviceKey> {
        self.devices.iter().map(DeviceInfo::key).collect()
    }
}
