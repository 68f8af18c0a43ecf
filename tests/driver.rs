//! The benchmark driver against emulated runtimes.

mod common;

use vadd_offload::{
    BenchConfig, Benchmark, ComputePath, DeviceClass, EmulatedBackend, VaddError,
};

use common::gpu_runtime;

fn device_config(length: usize) -> BenchConfig {
    BenchConfig::default()
        .with_path(ComputePath::Device)
        .with_device_class(DeviceClass::Gpu)
        .with_length(length)
        .with_trials(4)
        .with_seed(42)
}

#[test]
fn missing_gpu_aborts_before_any_timing() {
    let backend = EmulatedBackend::new();
    let err = Benchmark::new(&backend, device_config(8))
        .unwrap()
        .run()
        .err()
        .unwrap();
    assert!(matches!(
        err,
        VaddError::NoDeviceFound {
            class: DeviceClass::Gpu,
            platforms: 1
        }
    ));
    assert_eq!(err.exit_code(), 4);
    assert_eq!(backend.ledger().total_live(), 0);
}

#[test]
fn malformed_kernel_reports_the_compiler_log() {
    let backend = gpu_runtime();
    let config = device_config(8).with_kernel_source("@compute fn vadd( {");
    let err = Benchmark::new(&backend, config).unwrap().run().err().unwrap();
    assert_eq!(err.stage(), "program build");
    assert_eq!(err.exit_code(), 7);
    match &err {
        VaddError::ContextBuild { diagnostic, .. } => assert!(!diagnostic.is_empty()),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.ledger().total_live(), 0);
}

#[test]
fn kernel_without_vadd_entry_point_fails_at_kernel_lookup() {
    let backend = gpu_runtime();
    let source = "@compute @workgroup_size(1) fn other() {}";
    let config = device_config(8).with_kernel_source(source);
    let err = Benchmark::new(&backend, config).unwrap().run().err().unwrap();
    assert_eq!(err.exit_code(), 8);
}

#[test]
fn seeded_runs_agree_between_host_and_device() {
    let backend = gpu_runtime();
    let device = Benchmark::new(&backend, device_config(1000).with_verify(true))
        .unwrap()
        .run()
        .unwrap();
    let host = Benchmark::new(
        &backend,
        device_config(1000).with_path(ComputePath::Host),
    )
    .unwrap()
    .run()
    .unwrap();
    assert_eq!(device.checksum, host.checksum);
    assert!(device.verified);
    assert_eq!(device.trials, 4);
}

#[test]
fn zero_length_trials_succeed() {
    let backend = gpu_runtime();
    let report = Benchmark::new(&backend, device_config(0))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(report.checksum, 0.0);
    assert_eq!(backend.ledger().total_live(), 0);
}

#[test]
fn report_serializes_elapsed_as_seconds() {
    let backend = gpu_runtime();
    let report = Benchmark::new(&backend, device_config(16))
        .unwrap()
        .run()
        .unwrap();
    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert!(json["elapsed_seconds"].as_f64().unwrap() >= 0.0);
    assert_eq!(json["length"], 16);
    assert_eq!(json["trials"], 4);
}

#[test]
fn empty_kernel_source_is_a_configuration_error() {
    let backend = gpu_runtime();
    let err = Benchmark::new(&backend, device_config(8).with_kernel_source(""))
        .err()
        .unwrap();
    assert_eq!(err.exit_code(), 2);
}
