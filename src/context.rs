//! Compute context construction and teardown.
//!
//! A [`ComputeContext`] bundles everything needed to dispatch the `vadd`
//! kernel on one device: the context, its command queue, the program
//! compiled from the kernel source and the kernel extracted from it.
//! Construction happens strictly in that order. If a step fails, the
//! objects created so far are still locals of [`ComputeContext::build`]
//! and are dropped in reverse order, so nothing leaks on partial failure.

use log::debug;

use crate::backend::{ComputeBackend, DeviceInfo};
use crate::error::{ContextStage, Result, VaddError};
use crate::kernel::KERNEL_NAME;

/// A fully built compute context for one device.
///
/// Fields are dropped in declaration order, which releases the kernel,
/// program, queue and context in exactly that order. Device buffers
/// borrow the context (see [`crate::VectorBuffers`]) and therefore are
/// always released first.
pub struct ComputeContext<'b, B: ComputeBackend> {
    backend: &'b B,
    /// Entry point `vadd` of the program below.
    kernel: B::Kernel,
    _program: B::Program,
    /// Queue all transfers and launches are submitted to.
    queue: B::Queue,
    context: B::Context,
    /// Only valid while this context lives.
    _device: B::Device,
    info: DeviceInfo,
}

impl<'b, B: ComputeBackend> ComputeContext<'b, B> {
    /// Build a context on `device` and compile `source` into the `vadd`
    /// kernel.
    ///
    /// Each step fails with its own [`ContextStage`]; a program build
    /// failure carries the compiler log as its diagnostic.
    pub fn build(backend: &'b B, device: B::Device, source: &str) -> Result<Self> {
        let info = backend.device_info(&device);
        debug!("building compute context on `{}`", info.name);

        let context = backend
            .create_context(&device)
            .map_err(|d| VaddError::context_build(ContextStage::Context, d))?;
        let queue = backend
            .create_queue(&context, &device)
            .map_err(|d| VaddError::context_build(ContextStage::Queue, d))?;
        let program = backend
            .build_program(&context, source)
            .map_err(|d| VaddError::context_build(ContextStage::Program, d))?;
        let kernel = backend
            .create_kernel(&program, KERNEL_NAME)
            .map_err(|d| VaddError::context_build(ContextStage::Kernel, d))?;

        Ok(Self {
            backend,
            kernel,
            _program: program,
            queue,
            context,
            _device: device,
            info,
        })
    }

    pub fn backend(&self) -> &'b B {
        self.backend
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn context(&self) -> &B::Context {
        &self.context
    }

    pub fn queue(&self) -> &B::Queue {
        &self.queue
    }

    pub fn kernel(&self) -> &B::Kernel {
        &self.kernel
    }
}

impl<B: ComputeBackend> Drop for ComputeContext<'_, B> {
    fn drop(&mut self) {
        debug!("tearing down compute context on `{}`", self.info.name);
    }
}
