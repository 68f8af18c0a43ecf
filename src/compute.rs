//! Kernel dispatch and the full offload pipeline.
//!
//! [`dispatch`] binds the trial buffers to the `vadd` kernel, launches it
//! over a 1-D index space of one work-item per element and waits for the
//! device to finish. [`run_vadd`] wraps one complete trial: select a
//! device, build a context, upload, dispatch, download and tear down.
//! Every call blocks the current thread until the device has completed
//! the work, so uploads precede the launch and the launch completes
//! before the download starts.

use log::{debug, warn};

use crate::backend::{ComputeBackend, KernelArg};
use crate::buffer::VectorBuffers;
use crate::config::DeviceClass;
use crate::context::ComputeContext;
use crate::device::select_device;
use crate::error::{BufferRole, Result, VaddError};

/// Bind `a`, `b`, `c` and the element count as arguments 0 to 3.
///
/// Every binding is attempted. If any fails the dispatch must not go
/// ahead, and the error names the lowest failing argument index.
pub fn bind_arguments<B: ComputeBackend>(
    ctx: &ComputeContext<'_, B>,
    buffers: &VectorBuffers<'_, B>,
) -> Result<()> {
    let count = u32::try_from(buffers.len()).map_err(|_| VaddError::KernelArgument {
        argument_index: 3,
        reason: format!("element count {} does not fit in u32", buffers.len()),
    })?;
    let args = [
        (0, KernelArg::Buffer(buffers.get(BufferRole::InputA))),
        (1, KernelArg::Buffer(buffers.get(BufferRole::InputB))),
        (2, KernelArg::Buffer(buffers.get(BufferRole::OutputC))),
        (3, KernelArg::Count(count)),
    ];

    let mut first_failure = None;
    for (index, arg) in args {
        if let Err(reason) = ctx.backend().set_arg(ctx.kernel(), index, arg) {
            warn!("binding kernel argument {index} failed: {reason}");
            first_failure.get_or_insert((index, reason));
        }
    }
    match first_failure {
        Some((argument_index, reason)) => Err(VaddError::KernelArgument {
            argument_index,
            reason,
        }),
        None => Ok(()),
    }
}

/// Launch the kernel over `global_size` work-items and wait for it.
///
/// The runtime chooses the local grouping. An empty index space launches
/// nothing.
pub fn launch<B: ComputeBackend>(ctx: &ComputeContext<'_, B>, global_size: usize) -> Result<()> {
    if global_size == 0 {
        debug!("empty index space, nothing to launch");
        return Ok(());
    }
    let backend = ctx.backend();
    backend
        .enqueue_kernel(ctx.queue(), ctx.kernel(), global_size)
        .map_err(VaddError::KernelLaunch)?;
    backend
        .finish(ctx.queue())
        .map_err(|status| VaddError::DeviceExecution { status })
}

/// Bind the arguments and run the kernel over every element of `buffers`.
pub fn dispatch<B: ComputeBackend>(
    ctx: &ComputeContext<'_, B>,
    buffers: &VectorBuffers<'_, B>,
) -> Result<()> {
    bind_arguments(ctx, buffers)?;
    launch(ctx, buffers.len())
}

/// Compute `c = a + b` on a freshly selected device of `class`.
///
/// All device state, from the device handle to the buffers, lives only
/// for this call and is released on every exit path.
pub fn run_vadd<B: ComputeBackend>(
    backend: &B,
    class: DeviceClass,
    source: &str,
    a: &[f32],
    b: &[f32],
    c: &mut [f32],
) -> Result<()> {
    if a.len() != b.len() || a.len() != c.len() {
        return Err(VaddError::Config(format!(
            "vector lengths differ: a={}, b={}, c={}",
            a.len(),
            b.len(),
            c.len()
        )));
    }
    let device = select_device(backend, class)?;
    let ctx = ComputeContext::build(backend, device, source)?;
    let buffers = VectorBuffers::allocate(&ctx, a.len())?;
    buffers.upload(&ctx, a, b)?;
    dispatch(&ctx, &buffers)?;
    buffers.download(&ctx, c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EmulatedBackend, Fault};
    use crate::kernel::VADD_SOURCE;

    #[test]
    fn adds_on_the_emulated_device() {
        let backend = EmulatedBackend::new();
        let a = [1.0, 2.0, 3.0];
        let b = [0.5, 0.25, 0.125];
        let mut c = [0.0; 3];
        run_vadd(&backend, DeviceClass::Cpu, VADD_SOURCE, &a, &b, &mut c).unwrap();
        assert_eq!(c, [1.5, 2.25, 3.125]);
    }

    #[test]
    fn all_bindings_are_attempted_and_lowest_index_reported() {
        let backend = EmulatedBackend::new()
            .with_fault(Fault::Argument(3))
            .with_fault(Fault::Argument(1));
        let (a, b) = ([1.0; 4], [2.0; 4]);
        let mut c = [0.0; 4];
        let err = run_vadd(&backend, DeviceClass::Cpu, VADD_SOURCE, &a, &b, &mut c)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            VaddError::KernelArgument {
                argument_index: 1,
                ..
            }
        ));
        assert!(!backend
            .ledger()
            .events()
            .iter()
            .any(|e| matches!(e, crate::backend::Event::Launch { .. })));
    }

    #[test]
    fn device_errors_surface_as_execution_failures() {
        let backend = EmulatedBackend::new().with_fault(Fault::Execution);
        let mut c = [0.0; 2];
        let err = run_vadd(
            &backend,
            DeviceClass::Cpu,
            VADD_SOURCE,
            &[1.0, 1.0],
            &[1.0, 1.0],
            &mut c,
        )
        .err()
        .unwrap();
        assert!(matches!(err, VaddError::DeviceExecution { .. }));
        assert_eq!(backend.ledger().total_live(), 0);
    }

    #[test]
    fn mismatched_lengths_are_rejected_before_selection() {
        let backend = EmulatedBackend::empty();
        let mut c = [0.0; 2];
        let err = run_vadd(&backend, DeviceClass::Gpu, VADD_SOURCE, &[1.0], &[1.0, 2.0], &mut c)
            .err()
            .unwrap();
        assert!(matches!(err, VaddError::Config(_)));
    }
}
