//! The `vadd` binary: output format and exit codes.

use std::process::{Command, Output};

use tempfile::tempdir;

fn vadd(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vadd"))
        .args(["--backend", "emulated", "--length", "64", "--trials", "3"])
        .args(args)
        .env_remove("VADD_DEVICE")
        .env_remove("RUST_LOG")
        .output()
        .expect("run vadd")
}

#[test]
fn cpu_run_prints_the_timing_line() {
    let output = vadd(&["--device", "cpu", "--seed", "1", "--verify"]);
    assert!(output.status.success(), "process failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("\nThe program ran in "), "stdout: {stdout}");
    assert!(stdout.trim_end().ends_with(" seconds"));
}

#[test]
fn host_path_runs_without_a_device() {
    let output = vadd(&["--path", "host", "--device", "gpu"]);
    assert!(output.status.success(), "process failed: {output:?}");
    assert!(String::from_utf8_lossy(&output.stdout).contains("The program ran in"));
}

#[test]
fn missing_gpu_exits_with_no_device_found() {
    let output = vadd(&["--device", "gpu"]);
    assert_eq!(output.status.code(), Some(4));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("NoDeviceFound"), "stderr: {stderr}");
    assert!(stderr.contains("device selection"));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("The program ran in"));
}

#[test]
fn device_class_can_come_from_the_environment() {
    let output = Command::new(env!("CARGO_BIN_EXE_vadd"))
        .args(["--backend", "emulated", "--length", "8", "--trials", "1"])
        .env("VADD_DEVICE", "gpu")
        .output()
        .expect("run vadd");
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn broken_kernel_file_reports_the_build_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.wgsl");
    std::fs::write(&path, "@compute fn vadd( {\n").unwrap();
    let output = vadd(&["--device", "cpu", "--kernel-source", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(7));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("program build failed"), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn emulated_device_refuses_to_run_a_foreign_kernel() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vsub.wgsl");
    let vsub = vadd_offload::VADD_SOURCE.replace("a[i] + b[i]", "a[i] - b[i]");
    std::fs::write(&path, vsub).unwrap();
    let output = vadd(&["--device", "cpu", "--verify", "--kernel-source", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(13));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("built-in vadd kernel"), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn unreadable_kernel_file_is_a_configuration_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing.wgsl");
    let output = vadd(&["--device", "cpu", "--kernel-source", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn json_report_follows_the_timing_line() {
    let output = vadd(&["--device", "cpu", "--seed", "9", "--json"]);
    assert!(output.status.success(), "process failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().unwrap();
    let report: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(report["path"], "device");
    assert_eq!(report["device_class"], "cpu");
    assert_eq!(report["length"], 64);
    assert_eq!(report["trials"], 3);
}
