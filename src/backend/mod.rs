//! Device layers the offload pipeline runs on.
//!
//! [`ComputeBackend`] is the seam between the pipeline and a concrete
//! heterogeneous compute API. Every handle type it hands out owns the
//! underlying device object and releases it when dropped, so teardown
//! order follows Rust's drop order: locals in reverse declaration order,
//! struct fields in declaration order.

pub mod emulated;
pub mod gpu;

pub use emulated::{EmulatedBackend, Event, Fault, Ledger, ResourceKind};
pub use gpu::WgpuBackend;

use crate::config::DeviceClass;

/// Access to a device buffer from the kernel's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemAccess {
    ReadOnly,
    WriteOnly,
}

/// Description of a selected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub class: DeviceClass,
    pub platform: String,
}

/// A value bound to one kernel parameter.
#[derive(Debug)]
pub enum KernelArg<'a, B> {
    Buffer(&'a B),
    Count(u32),
}

/// A heterogeneous compute API.
///
/// Errors are returned as the backend's own diagnostic text; the
/// pipeline attaches the stage and turns them into
/// [`crate::VaddError`]s. Transfers and [`Self::finish`] block the
/// calling thread until the device has completed the work.
pub trait ComputeBackend {
    type Platform;
    type Device;
    type Context;
    type Queue;
    type Program;
    type Kernel;
    type Buffer;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// All platforms in enumeration order.
    fn platforms(&self) -> Result<Vec<Self::Platform>, String>;

    fn platform_name(&self, platform: &Self::Platform) -> String;

    /// Acquire one device of `class` from `platform`, if it has any.
    fn device(&self, platform: &Self::Platform, class: DeviceClass) -> Option<Self::Device>;

    fn device_info(&self, device: &Self::Device) -> DeviceInfo;

    fn create_context(&self, device: &Self::Device) -> Result<Self::Context, String>;

    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::Device,
    ) -> Result<Self::Queue, String>;

    /// Compile `source`. The error is the compiler log.
    fn build_program(&self, context: &Self::Context, source: &str) -> Result<Self::Program, String>;

    /// Look up the entry point `name` in a built program.
    fn create_kernel(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel, String>;

    /// Allocate `size` bytes of device memory.
    fn create_buffer(
        &self,
        context: &Self::Context,
        label: &str,
        access: MemAccess,
        size: usize,
    ) -> Result<Self::Buffer, String>;

    /// Blocking host-to-device copy into the start of `buffer`.
    fn write_buffer(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        data: &[f32],
    ) -> Result<(), String>;

    fn set_arg(
        &self,
        kernel: &Self::Kernel,
        index: u32,
        arg: KernelArg<'_, Self::Buffer>,
    ) -> Result<(), String>;

    /// Submit the kernel over a 1-D index space of `global_size` items.
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        global_size: usize,
    ) -> Result<(), String>;

    /// Block until every submitted command has completed. The error is
    /// the status reported by the device.
    fn finish(&self, queue: &Self::Queue) -> Result<(), String>;

    /// Blocking device-to-host copy of the start of `buffer` into `out`.
    fn read_buffer(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        out: &mut [f32],
    ) -> Result<(), String>;
}
