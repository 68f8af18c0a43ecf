//! `vadd`: time elementwise vector addition on the host or on a device.
//!
//! Prints `The program ran in <seconds> seconds` after a successful run.
//! On failure nothing is printed to stdout; the failing stage and its
//! diagnostic go to stderr and the exit code identifies the failure kind.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use vadd_offload::config::{DEFAULT_DEVICE_CLASS, DEFAULT_LENGTH, DEFAULT_TRIALS};
use vadd_offload::{
    BenchConfig, BenchReport, Benchmark, ComputeBackend, ComputePath, DeviceClass,
    EmulatedBackend, VaddError, WgpuBackend,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Real hardware through wgpu
    Wgpu,
    /// In-process host-memory device
    Emulated,
}

/// Benchmark elementwise vector addition on the host and on a compute device.
#[derive(Parser, Debug)]
#[command(name = "vadd", version, about, long_about = None)]
struct Cli {
    /// Number of elements in each vector
    #[arg(short = 'n', long, default_value_t = DEFAULT_LENGTH)]
    length: usize,

    /// Number of trials
    #[arg(short, long, default_value_t = DEFAULT_TRIALS)]
    trials: u32,

    /// Run the additions on the host loop or on a device
    #[arg(long, value_enum, default_value_t = ComputePath::Device)]
    path: ComputePath,

    /// Device class requested from each platform
    #[arg(long, value_enum, env = "VADD_DEVICE", default_value_t = DEFAULT_DEVICE_CLASS)]
    device: DeviceClass,

    /// Device layer to run on
    #[arg(long, value_enum, default_value_t = BackendKind::Wgpu)]
    backend: BackendKind,

    /// Seed for the input generator
    #[arg(long)]
    seed: Option<u64>,

    /// Check every output element against the host sum
    #[arg(long)]
    verify: bool,

    /// Compile this WGSL file instead of the built-in kernel
    #[arg(long, value_name = "FILE")]
    kernel_source: Option<PathBuf>,

    /// Also print the report as a JSON line
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn config(&self) -> Result<BenchConfig, VaddError> {
        let mut config = BenchConfig::default()
            .with_length(self.length)
            .with_trials(self.trials)
            .with_path(self.path)
            .with_device_class(self.device)
            .with_verify(self.verify);
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(path) = &self.kernel_source {
            let source = std::fs::read_to_string(path).map_err(|e| {
                VaddError::Config(format!("cannot read kernel source {}: {e}", path.display()))
            })?;
            config = config.with_kernel_source(source);
        }
        Ok(config)
    }
}

fn execute<B: ComputeBackend>(backend: &B, config: BenchConfig) -> Result<BenchReport, VaddError> {
    Benchmark::new(backend, config)?.run()
}

fn fail(err: &VaddError) -> ExitCode {
    eprintln!("error[{}]: {} failed: {err}", err.kind(), err.stage());
    ExitCode::from(err.exit_code())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = match cli.config() {
        Ok(config) => config,
        Err(err) => return fail(&err),
    };
    let result = match cli.backend {
        BackendKind::Wgpu => execute(&WgpuBackend::new(), config),
        BackendKind::Emulated => execute(&EmulatedBackend::new(), config),
    };
    let report = match result {
        Ok(report) => report,
        Err(err) => return fail(&err),
    };

    println!("{}", report.summary_line());
    if cli.json {
        match serde_json::to_string(&report) {
            Ok(line) => println!("{line}"),
            Err(e) => {
                eprintln!("error: failed to encode report: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
