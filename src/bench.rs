//! Benchmark driver.
//!
//! Runs the configured number of trials on the host loop or the offload
//! pipeline and reports the total wall-clock time. Each trial allocates
//! its own host vectors and fills the inputs with fresh uniform values in
//! `[0, 1)`; on the device path it also builds and tears down all device
//! state.

use std::time::Duration;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::backend::ComputeBackend;
use crate::compute::run_vadd;
use crate::config::{BenchConfig, ComputePath, DeviceClass};
use crate::error::{Result, VaddError};
use crate::kernel::host_vadd;
use crate::timer::Timer;

/// Outcome of a completed benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub path: ComputePath,
    pub device_class: DeviceClass,
    pub length: usize,
    pub trials: u32,
    #[serde(rename = "elapsed_seconds", serialize_with = "as_seconds")]
    pub elapsed: Duration,
    /// Sum of the final trial's output vector.
    pub checksum: f64,
    /// Whether every output element was checked against the host sum.
    pub verified: bool,
}

fn as_seconds<S: serde::Serializer>(
    elapsed: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

impl BenchReport {
    /// The human-readable timing line, including its leading blank line.
    pub fn summary_line(&self) -> String {
        format!(
            "\nThe program ran in {:.6} seconds",
            self.elapsed.as_secs_f64()
        )
    }
}

/// Fill `values` with uniform samples from `[0, 1)`.
pub fn fill_random<R: Rng>(rng: &mut R, values: &mut [f32]) {
    for value in values {
        *value = rng.gen_range(0.0f32..1.0);
    }
}

/// Check `c[i] == a[i] + b[i]` for every element.
pub fn verify_sum(a: &[f32], b: &[f32], c: &[f32]) -> Result<()> {
    for (index, ((&x, &y), &actual)) in a.iter().zip(b).zip(c).enumerate() {
        let expected = x + y;
        if actual != expected {
            return Err(VaddError::Verification {
                index,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// Sum of `values`, accumulated in `f64`.
pub fn checksum(values: &[f32]) -> f64 {
    values.iter().map(|&x| f64::from(x)).sum()
}

/// Drives repeated trials against one backend.
pub struct Benchmark<'b, B: ComputeBackend> {
    backend: &'b B,
    config: BenchConfig,
}

impl<'b, B: ComputeBackend> Benchmark<'b, B> {
    pub fn new(backend: &'b B, config: BenchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { backend, config })
    }

    /// Run all trials. The first failing trial aborts the run.
    pub fn run(&self) -> Result<BenchReport> {
        let config = &self.config;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        info!(
            "running {} trial(s) of {} elements on the {} path",
            config.trials, config.length, config.path
        );

        let timer = Timer::start();
        let mut last = Vec::new();
        for trial in 0..config.trials {
            last = self.run_trial(&mut rng)?;
            debug!("trial {}/{} complete", trial + 1, config.trials);
        }
        let elapsed = timer.elapsed();
        info!("{} trial(s) took {:.6} s", config.trials, elapsed.as_secs_f64());

        Ok(BenchReport {
            path: config.path,
            device_class: config.device_class,
            length: config.length,
            trials: config.trials,
            elapsed,
            checksum: checksum(&last),
            verified: config.verify,
        })
    }

    /// One trial: fresh inputs, one addition, optional verification.
    /// Returns the output vector.
    pub fn run_trial<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>> {
        let config = &self.config;
        let n = config.length;
        let mut a = vec![0.0f32; n];
        let mut b = vec![0.0f32; n];
        let mut c = vec![0.0f32; n];
        fill_random(rng, &mut a);
        fill_random(rng, &mut b);

        match config.path {
            ComputePath::Host => host_vadd(&a, &b, &mut c, n, n),
            ComputePath::Device => run_vadd(
                self.backend,
                config.device_class,
                &config.kernel_source,
                &a,
                &b,
                &mut c,
            )?,
        }
        if config.verify {
            verify_sum(&a, &b, &c)?;
        }
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EmulatedBackend;

    #[test]
    fn random_fill_stays_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut values = vec![0.0f32; 10_000];
        fill_random(&mut rng, &mut values);
        assert!(values.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn verify_reports_first_mismatch() {
        let err = verify_sum(&[1.0, 2.0, 3.0], &[1.0, 1.0, 1.0], &[2.0, 3.0, 5.0])
            .err()
            .unwrap();
        assert!(matches!(err, VaddError::Verification { index: 2, .. }));
    }

    #[test]
    fn summary_line_has_leading_blank_line() {
        let report = BenchReport {
            path: ComputePath::Device,
            device_class: DeviceClass::Gpu,
            length: 8,
            trials: 1,
            elapsed: Duration::from_millis(1500),
            checksum: 72.0,
            verified: false,
        };
        assert_eq!(report.summary_line(), "\nThe program ran in 1.500000 seconds");
    }

    #[test]
    fn checksum_comes_from_the_final_trial() {
        let backend = EmulatedBackend::new();
        let config = BenchConfig::default()
            .with_path(ComputePath::Host)
            .with_length(32)
            .with_trials(3)
            .with_seed(11);
        let bench = Benchmark::new(&backend, config).unwrap();
        let report = bench.run().unwrap();

        let mut rng = StdRng::seed_from_u64(11);
        let outputs: Vec<Vec<f32>> = (0..3).map(|_| bench.run_trial(&mut rng).unwrap()).collect();
        assert_eq!(report.checksum, checksum(&outputs[2]));
        assert_ne!(report.checksum, checksum(&outputs[0]));
    }

    #[test]
    fn zero_trials_report_an_empty_checksum() {
        let backend = EmulatedBackend::new();
        let config = BenchConfig::default().with_length(8).with_trials(0);
        let report = Benchmark::new(&backend, config).unwrap().run().unwrap();
        assert_eq!(report.checksum, 0.0);
        assert_eq!(backend.ledger().acquired(crate::backend::ResourceKind::Context), 0);
    }

    #[test]
    fn host_path_needs_no_device() {
        let backend = EmulatedBackend::empty();
        let config = BenchConfig::default()
            .with_path(ComputePath::Host)
            .with_length(64)
            .with_trials(3)
            .with_seed(1)
            .with_verify(true);
        let report = Benchmark::new(&backend, config).unwrap().run().unwrap();
        assert_eq!(report.trials, 3);
        assert!(report.verified);
        assert!(report.checksum > 0.0);
    }
}
