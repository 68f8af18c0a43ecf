//! Elementwise vector addition on the host versus a GPU, built on
//! [wgpu](https://github.com/gfx-rs/wgpu).
//!
//! The interesting part is the offload pipeline: find a compute device,
//! build a context, queue, program and kernel for it, move the inputs to
//! device memory, run the kernel over one work-item per element, wait for
//! it, and copy the result back. Every step is synchronous and blocks the
//! calling thread until the device has finished. Device state is owned by
//! RAII handles, so whatever was built is released in reverse order on
//! every exit path, including failures halfway through construction.
//!
//! The pipeline is written against the [`ComputeBackend`] trait.
//! [`WgpuBackend`] drives real hardware; [`EmulatedBackend`] runs the
//! same contract in host memory and records every acquire, release and
//! transfer, which is what the test suite checks ordering and leak
//! freedom against.
//!
//! ```no_run
//! use vadd_offload::{BenchConfig, Benchmark, WgpuBackend};
//!
//! let backend = WgpuBackend::new();
//! let config = BenchConfig::default().with_trials(10).with_verify(true);
//! let report = Benchmark::new(&backend, config)?.run()?;
//! println!("{}", report.summary_line());
//! # Ok::<(), vadd_offload::VaddError>(())
//! ```

pub mod backend;
pub mod bench;
pub mod buffer;
pub mod compute;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod kernel;
pub mod timer;

// Re-export the most common types at the crate root.
pub use backend::{ComputeBackend, EmulatedBackend, WgpuBackend};
pub use bench::{BenchReport, Benchmark};
pub use buffer::VectorBuffers;
pub use compute::{dispatch, run_vadd};
pub use config::{BenchConfig, ComputePath, DeviceClass};
pub use context::ComputeContext;
pub use device::select_device;
pub use error::{Result, VaddError};
pub use kernel::{KERNEL_NAME, VADD_SOURCE};
pub use timer::Timer;
