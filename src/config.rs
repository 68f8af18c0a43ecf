//! Benchmark configuration.
//!
//! The vector length, trial count and requested device class are plain
//! values handed to the [`crate::Benchmark`] at construction; nothing here
//! is global or mutable after a run has started.

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

use crate::error::{Result, VaddError};
use crate::kernel::VADD_SOURCE;

/// Default number of elements in each vector.
pub const DEFAULT_LENGTH: usize = 1_000_000;

/// Default number of trials, shared by the host and device paths.
pub const DEFAULT_TRIALS: u32 = 100;

/// Device class requested when none is configured.
#[cfg(feature = "cpu-device")]
pub const DEFAULT_DEVICE_CLASS: DeviceClass = DeviceClass::Cpu;
#[cfg(all(feature = "accelerator-device", not(feature = "cpu-device")))]
pub const DEFAULT_DEVICE_CLASS: DeviceClass = DeviceClass::Accelerator;
#[cfg(not(any(feature = "cpu-device", feature = "accelerator-device")))]
pub const DEFAULT_DEVICE_CLASS: DeviceClass = DeviceClass::Gpu;

/// Class of compute device the selector asks each platform for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Cpu,
    Gpu,
    Accelerator,
}

impl Default for DeviceClass {
    fn default() -> Self {
        DEFAULT_DEVICE_CLASS
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "CPU",
            Self::Gpu => "GPU",
            Self::Accelerator => "accelerator",
        })
    }
}

/// Where each trial's addition is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ComputePath {
    /// Plain host loop, the CPU baseline.
    Host,
    /// Full offload pipeline on a selected device.
    #[default]
    Device,
}

impl fmt::Display for ComputePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Device => "device",
        })
    }
}

/// Parameters of one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Number of `f32` elements in each of A, B and C.
    pub length: usize,
    /// Number of trials; every trial rebuilds all device state.
    pub trials: u32,
    pub path: ComputePath,
    pub device_class: DeviceClass,
    /// Seed for the input generator. `None` draws from OS entropy.
    pub seed: Option<u64>,
    /// Check every output element against the host sum after each trial.
    pub verify: bool,
    /// WGSL source of the program holding the `vadd` entry point.
    pub kernel_source: Cow<'static, str>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            length: DEFAULT_LENGTH,
            trials: DEFAULT_TRIALS,
            path: ComputePath::default(),
            device_class: DeviceClass::default(),
            seed: None,
            verify: false,
            kernel_source: Cow::Borrowed(VADD_SOURCE),
        }
    }
}

impl BenchConfig {
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn with_trials(mut self, trials: u32) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_path(mut self, path: ComputePath) -> Self {
        self.path = path;
        self
    }

    pub fn with_device_class(mut self, class: DeviceClass) -> Self {
        self.device_class = class;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_kernel_source(mut self, source: impl Into<Cow<'static, str>>) -> Self {
        self.kernel_source = source.into();
        self
    }

    /// Reject configurations the pipeline cannot execute.
    ///
    /// The kernel receives the element count as a 32-bit unsigned scalar,
    /// so longer vectors cannot be addressed.
    pub fn validate(&self) -> Result<()> {
        if u32::try_from(self.length).is_err() {
            return Err(VaddError::Config(format!(
                "vector length {} exceeds the kernel's 32-bit element count",
                self.length
            )));
        }
        if self.path == ComputePath::Device && self.kernel_source.trim().is_empty() {
            return Err(VaddError::Config("kernel source is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_benchmark() {
        let config = BenchConfig::default();
        assert_eq!(config.length, 1_000_000);
        assert_eq!(config.trials, 100);
        assert_eq!(config.path, ComputePath::Device);
        assert_eq!(config.device_class, DEFAULT_DEVICE_CLASS);
        assert!(config.kernel_source.contains("fn vadd"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_length_is_valid() {
        assert!(BenchConfig::default().with_length(0).validate().is_ok());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn length_beyond_u32_is_rejected() {
        let config = BenchConfig::default().with_length(u32::MAX as usize + 1);
        assert!(matches!(config.validate(), Err(VaddError::Config(_))));
    }

    #[test]
    fn empty_kernel_source_only_matters_on_device_path() {
        let config = BenchConfig::default().with_kernel_source("  ");
        assert!(config.validate().is_err());
        assert!(config.with_path(ComputePath::Host).validate().is_ok());
    }
}
