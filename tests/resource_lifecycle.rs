//! Resource ownership: allocations and graph handles are released exactly once,
//! and device failures propagate out of construction and readback.

use graphprobe::device::{Device, DeviceConfig, DeviceFault, Grid};
use graphprobe::error::DeviceError;
use graphprobe::flags::FlagStore;
use graphprobe::harness::{launch_recorded, GraphPipeline, GraphProducer, PipelineShape};
use graphprobe::tracer::CompletionTracer;

#[test]
fn full_scenario_leaks_nothing() {
    let device = Device::default();
    {
        let store = FlagStore::<4>::new(&device).unwrap();
        let mut tracer = CompletionTracer::new(&device);
        GraphPipeline::new(store.get(), PipelineShape::Chain(4)).start(tracer.get());
        launch_recorded(&tracer).unwrap();
        assert!(store.all_set_once().unwrap());

        let live = device.stats();
        assert_eq!(live.live_allocations(), 1);
        assert_eq!(live.live_graphs(), 1);
        assert_eq!(live.live_bytes, 16);
    }
    let stats = device.stats();
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.frees, 1);
    assert_eq!(stats.live_bytes, 0);
    assert_eq!(stats.graphs_created, 1);
    assert_eq!(stats.graphs_destroyed, 1);
}

#[test]
fn many_stores_each_freed_once() {
    let device = Device::default();
    for _ in 0..32 {
        let store = FlagStore::<2>::new(&device).unwrap();
        let flags = store.get();
        device.launch(Grid::linear(2), |idx| flags.set(idx.global()));
        assert!(store.all_set_once().unwrap());
    }
    let stats = device.stats();
    assert_eq!(stats.allocations, 32);
    assert_eq!(stats.frees, 32);
    assert_eq!(stats.live_allocations(), 0);
}

#[test]
fn allocation_failure_propagates_from_construction() {
    let device = Device::new(DeviceConfig {
        memory_limit: Some(12),
        ..DeviceConfig::default()
    });
    let err = FlagStore::<4>::new(&device).unwrap_err();
    assert_eq!(
        err,
        DeviceError::OutOfMemory {
            requested: 16,
            available: 12
        }
    );
    let stats = device.stats();
    assert_eq!(stats.allocations, 0);
    assert_eq!(stats.frees, 0);
}

#[test]
fn injected_allocation_failure_propagates() {
    let device = Device::default();
    device.inject(DeviceFault::AllocFailure);
    assert!(matches!(
        FlagStore::<1>::new(&device),
        Err(DeviceError::OutOfMemory { requested: 4, .. })
    ));
    device.clear_faults();
    assert!(FlagStore::<1>::new(&device).is_ok());
}

#[test]
fn copy_failure_propagates_from_readback() {
    let device = Device::default();
    let store = FlagStore::<3>::new(&device).unwrap();
    device.inject(DeviceFault::CopyFailure);
    assert_eq!(
        store.all_set_once(),
        Err(DeviceError::CopyFailed { bytes: 12 })
    );
    assert_eq!(store.all_unset(), Err(DeviceError::CopyFailed { bytes: 12 }));
    device.clear_faults();
    assert!(store.all_unset().unwrap());
}

#[test]
fn freed_memory_is_reusable_under_limit() {
    let device = Device::new(DeviceConfig {
        memory_limit: Some(16),
        ..DeviceConfig::default()
    });
    drop(FlagStore::<4>::new(&device).unwrap());
    assert!(FlagStore::<4>::new(&device).is_ok());
}
