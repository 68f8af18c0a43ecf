#![allow(dead_code)]

use vadd_offload::{DeviceClass, EmulatedBackend};

/// An emulated runtime with a CPU-only platform followed by a GPU platform.
pub fn gpu_runtime() -> EmulatedBackend {
    EmulatedBackend::empty()
        .with_platform("host", &[DeviceClass::Cpu])
        .with_platform("emulated-gpu", &[DeviceClass::Gpu])
}

pub fn ramp(n: usize, scale: f32) -> Vec<f32> {
    (0..n).map(|i| i as f32 * scale).collect()
}
