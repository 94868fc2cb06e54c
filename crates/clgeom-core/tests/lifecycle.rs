//! Integration tests for the manager/context lifecycle
//!
//! Everything runs against `SimulatedDriver` or the host driver, so no GPU
//! runtime is needed.

use std::sync::Arc;

use clgeom_core::driver::{HostDriver, SimulatedDevice, SimulatedDriver};
use clgeom_core::{ContextManager, DeviceType, DeviceTypeFilter, DriverKind, Error, ManagerConfig};

fn workstation() -> Arc<SimulatedDriver> {
    Arc::new(
        SimulatedDriver::builder()
            .platform(
                "NVIDIA CUDA",
                vec![SimulatedDevice::gpu("GeForce RTX 3080"), SimulatedDevice::gpu("GeForce GT 1030")],
            )
            .platform("Intel(R) OpenCL", vec![SimulatedDevice::cpu("Intel Core i9")])
            .build(),
    )
}

#[test]
fn test_enumerate_then_create() -> clgeom_core::Result<()> {
    clgeom_tracing::init_for_tests();
    let sim = workstation();
    let manager = ContextManager::with_driver(sim.clone(), DeviceTypeFilter::ALL)?;

    assert_eq!(manager.device_count(), 3);
    assert_eq!(manager.driver_name(), "simulated");
    assert_eq!(manager.devices()[2].device_type(), DeviceType::Cpu);
    assert_eq!(manager.devices()[2].platform_name(), "Intel(R) OpenCL");
    Ok(())
}

#[test]
fn test_every_device_yields_a_context() -> clgeom_core::Result<()> {
    clgeom_tracing::init_for_tests();
    let sim = workstation();
    let manager = ContextManager::with_driver(sim.clone(), DeviceTypeFilter::ALL)?;

    for device in manager.devices() {
        let context = manager.create_context(device)?;
        assert_eq!(context.device(), device.key());
        assert_eq!(context.device_name(), device.name());
        context.release()?;
    }

    assert_eq!(sim.contexts_created(), 3);
    assert_eq!(sim.live_contexts(), 0);
    manager.release()
}

#[test]
fn test_cross_manager_device_is_rejected() -> clgeom_core::Result<()> {
    clgeom_tracing::init_for_tests();
    let sim = workstation();
    let a = ContextManager::with_driver(sim.clone(), DeviceTypeFilter::ALL)?;
    let b = ContextManager::with_driver(sim.clone(), DeviceTypeFilter::ALL)?;

    // Same host, same native ids, different snapshot.
    assert_eq!(a.devices()[0].device_id(), b.devices()[0].device_id());

    let err = b.create_context(&a.devices()[0]).unwrap_err();
    assert_eq!(
        err,
        Error::InvalidDevice {
            device: a.devices()[0].key(),
            registry: b.registry_id(),
        }
    );
    assert_eq!(sim.contexts_created(), 0);
    Ok(())
}

#[test]
fn test_owned_device_copies_still_validate() -> clgeom_core::Result<()> {
    let sim = workstation();
    let manager = ContextManager::with_driver(sim, DeviceTypeFilter::ALL)?;
    let owned = manager.list_devices();

    let context = manager.create_context(&owned[1])?;
    assert_eq!(context.device_name(), "GeForce GT 1030");
    Ok(())
}

#[test]
fn test_contexts_dropped_in_any_order() -> clgeom_core::Result<()> {
    let sim = workstation();
    let manager = ContextManager::with_driver(sim.clone(), DeviceTypeFilter::ALL)?;

    let first = manager.create_context(manager.device(0)?)?;
    let second = manager.create_context(manager.device(1)?)?;
    let third = manager.create_context(manager.device(0)?)?;
    assert_eq!(manager.live_contexts(), 3);

    drop(first);
    third.release()?;
    drop(second);

    assert_eq!(manager.live_contexts(), 0);
    assert_eq!(sim.contexts_released(), 3);
    Ok(())
}

#[test]
fn test_manager_release_with_live_context() -> clgeom_core::Result<()> {
    clgeom_tracing::init_for_tests();
    let sim = workstation();
    let manager = ContextManager::with_driver(sim.clone(), DeviceTypeFilter::ALL)?;
    let context = manager.create_context(manager.device(0)?)?;
    assert_eq!(manager.live_contexts(), 1);

    // Logged, not refused; the registry is released exactly once.
    manager.release()?;
    assert_eq!(sim.registries_released(), 1);
    assert_eq!(sim.contexts_released(), 0);

    assert!(context.is_live());
    context.release()?;
    assert_eq!(sim.contexts_released(), 1);
    assert_eq!(sim.registries_released(), 1);
    Ok(())
}

#[test]
fn test_failure_kinds_map_to_errors() {
    clgeom_tracing::init_for_tests();

    let broken = Arc::new(SimulatedDriver::builder().fail_enumeration("clGetPlatformIDs: -1001").build());
    assert!(matches!(
        ContextManager::with_driver(broken, DeviceTypeFilter::ALL),
        Err(Error::Enumeration(_))
    ));

    let empty = Arc::new(SimulatedDriver::empty());
    assert!(matches!(
        ContextManager::with_driver(empty, DeviceTypeFilter::ALL),
        Err(Error::NoDevices)
    ));

    let sim = workstation();
    sim.set_fail_context_teardown(true);
    let manager = ContextManager::with_driver(sim.clone(), DeviceTypeFilter::ALL).unwrap();
    let context = manager.create_context(&manager.devices()[0]).unwrap();
    assert!(matches!(context.release(), Err(Error::ContextTeardown(_))));
    // Consumed by the failed release; never released twice.
    assert_eq!(sim.contexts_released(), 1);
}

#[test]
fn test_device_index_out_of_range() -> clgeom_core::Result<()> {
    let manager = ContextManager::with_driver(workstation(), DeviceTypeFilter::GPU)?;
    assert_eq!(manager.device_count(), 2);
    assert_eq!(manager.device(2).unwrap_err(), Error::DeviceIndexOutOfRange { index: 2, len: 2 });
    Ok(())
}

#[test]
fn test_host_driver_end_to_end() -> clgeom_core::Result<()> {
    let manager = ContextManager::with_driver(Arc::new(HostDriver::new()), DeviceTypeFilter::ALL)?;
    let device = manager.device(0)?;
    assert!(!device.name().is_empty());

    let context = manager.create_context(device)?;
    context.release()?;
    manager.release()
}

#[test]
fn test_with_config_host() -> clgeom_core::Result<()> {
    let config = ManagerConfig {
        driver: DriverKind::Host,
        device_types: DeviceTypeFilter::CPU,
    };
    let manager = ContextManager::with_config(config)?;
    assert_eq!(manager.driver_name(), "host");
    assert_eq!(manager.device_count(), 1);

    let gpu_only = ManagerConfig {
        driver: DriverKind::Host,
        device_types: DeviceTypeFilter::GPU,
    };
    assert_eq!(ContextManager::with_config(gpu_only).unwrap_err(), Error::NoDevices);
    Ok(())
}

#[test]
fn test_manager_and_context_are_send() {
    fn assert_send<T: Send>() {}
    assert_send::<ContextManager>();
    assert_send::<clgeom_core::Context>();
}
