use std::sync::Arc;

use clgeom_core::driver::{SimulatedDevice, SimulatedDriver};
use clgeom_core::{ContextManager, DeviceTypeFilter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn simulated_host(platforms: usize, devices_per_platform: usize) -> Arc<SimulatedDriver> {
    let mut builder = SimulatedDriver::builder();
    for p in 0..platforms {
        let devices = (0..devices_per_platform)
            .map(|d| SimulatedDevice::gpu(format!("gpu{p}.{d}")))
            .collect();
        builder = builder.platform(format!("platform{p}"), devices);
    }
    Arc::new(builder.build())
}

fn benchmark_enumeration(c: &mut Criterion) {
    let mut group = c.benchmark_group("enumeration");

    for devices in [1, 4, 16, 64].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(devices), devices, |b, &n| {
            let driver = simulated_host(2, n);
            b.iter(|| {
                let manager = ContextManager::with_driver(driver.clone(), DeviceTypeFilter::ALL).unwrap();
                black_box(manager.device_count());
            });
        });
    }

    group.finish();
}

fn benchmark_context_churn(c: &mut Criterion) {
    let driver = simulated_host(1, 4);
    let manager = ContextManager::with_driver(driver, DeviceTypeFilter::ALL).unwrap();

    c.bench_function("context_create_release", |b| {
        let device = &manager.devices()[0];
        b.iter(|| {
            let context = manager.create_context(black_box(device)).unwrap();
            context.release().unwrap();
        });
    });

    let other = ContextManager::with_driver(simulated_host(1, 1), DeviceTypeFilter::ALL).unwrap();
    c.bench_function("context_rejected_foreign_device", |b| {
        let foreign = &other.devices()[0];
        b.iter(|| black_box(manager.create_context(foreign).is_err()));
    });
}

criterion_group!(benches, benchmark_enumeration, benchmark_context_churn);
criterion_main!(benches);
