//! wgpu device layer.
//!
//! Maps the pipeline's platform/device/context/queue/program/kernel model
//! onto wgpu: each enabled wgpu backend that reports adapters is a
//! platform, an adapter is a device, `request_device` creates the
//! context and hands over its single queue, a WGSL shader module is the
//! program and a compute pipeline for the entry point is the kernel.
//!
//! wgpu reports most failures asynchronously through the device's error
//! sink. Every call that can fail is wrapped in validation and
//! out-of-memory error scopes so those failures come back as errors of
//! the stage that caused them instead of reaching the uncaptured-error
//! handler.

use std::cell::{Cell, RefCell};
use std::num::NonZeroU64;
use std::sync::mpsc;

use bytemuck::{cast_slice, Pod, Zeroable};
use log::{debug, trace};
use wgpu::util::DeviceExt;
use wgpu::{BufferDescriptor, BufferUsages};

use super::{ComputeBackend, DeviceInfo, KernelArg, MemAccess};
use crate::config::DeviceClass;
use crate::kernel::WORKGROUP_SIZE;

/// Probe order of wgpu backends; each backend with adapters is a platform.
const PLATFORM_ORDER: [wgpu::Backends; 4] = [
    wgpu::Backends::VULKAN,
    wgpu::Backends::METAL,
    wgpu::Backends::DX12,
    wgpu::Backends::GL,
];

const ELEMENT_SIZE: u64 = std::mem::size_of::<f32>() as u64;

/// Number of parameters of the `vadd` kernel layout.
const ARG_COUNT: usize = 4;

/// Uniform block holding the element count, padded to 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable, Pod)]
struct LaunchParams {
    count: u32,
    _pad: [u32; 3],
}

impl LaunchParams {
    fn new(count: u32) -> Self {
        Self {
            count,
            _pad: [0; 3],
        }
    }
}

/// Device layer backed by a wgpu instance.
pub struct WgpuBackend {
    instance: wgpu::Instance,
    backends: wgpu::Backends,
}

impl WgpuBackend {
    /// Create a backend that probes every wgpu backend compiled in.
    pub fn new() -> Self {
        Self::with_backends(wgpu::Backends::all())
    }

    /// Create a backend restricted to `backends`.
    pub fn with_backends(backends: wgpu::Backends) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        Self { instance, backends }
    }
}

impl Default for WgpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WgpuPlatform {
    backend: wgpu::Backend,
    adapters: Vec<wgpu::Adapter>,
}

pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    info: wgpu::AdapterInfo,
}

/// A logical device whose queue has not been claimed yet.
pub struct WgpuContext {
    device: wgpu::Device,
    queue: Cell<Option<wgpu::Queue>>,
}

pub struct WgpuQueue {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

pub struct WgpuProgram {
    device: wgpu::Device,
    module: wgpu::ShaderModule,
}

enum Binding {
    Buffer(wgpu::Buffer),
    Count(u32),
}

pub struct WgpuKernel {
    device: wgpu::Device,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    args: RefCell<[Option<Binding>; ARG_COUNT]>,
}

/// Storage buffer whose memory is destroyed on drop.
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

impl Drop for WgpuBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
    }
}

/// Map a wgpu adapter type onto the requested device classes.
fn device_class(device_type: wgpu::DeviceType) -> DeviceClass {
    match device_type {
        wgpu::DeviceType::DiscreteGpu
        | wgpu::DeviceType::IntegratedGpu
        | wgpu::DeviceType::VirtualGpu => DeviceClass::Gpu,
        wgpu::DeviceType::Cpu => DeviceClass::Cpu,
        wgpu::DeviceType::Other => DeviceClass::Accelerator,
    }
}

/// Calculate an (x, y) workgroup grid that covers `total_groups`
/// workgroups without exceeding the per-dimension limit.
fn split_workgroups(total_groups: u32, limit: u32) -> (u32, u32) {
    if total_groups <= limit {
        (total_groups, 1)
    } else {
        (limit, total_groups.div_ceil(limit))
    }
}

/// Run `f` inside validation and out-of-memory error scopes.
fn scoped<T>(device: &wgpu::Device, f: impl FnOnce() -> T) -> Result<T, String> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    match validation.or(out_of_memory) {
        Some(error) => Err(error.to_string()),
        None => Ok(value),
    }
}

/// Block until the device has finished all submitted work.
fn wait(device: &wgpu::Device) -> Result<(), String> {
    device
        .poll(wgpu::PollType::Wait)
        .map(drop)
        .map_err(|e| format!("device poll failed: {e:?}"))
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(ELEMENT_SIZE),
        },
        count: None,
    }
}

fn bound_buffer(args: &[Option<Binding>; ARG_COUNT], index: usize) -> Result<&wgpu::Buffer, String> {
    match &args[index] {
        Some(Binding::Buffer(buffer)) => Ok(buffer),
        _ => Err(format!("argument {index} is not bound")),
    }
}

fn format_compilation_message(message: &wgpu::CompilationMessage) -> String {
    match &message.location {
        Some(location) => format!(
            "{}:{}: {}",
            location.line_number, location.line_position, message.message
        ),
        None => message.message.clone(),
    }
}

impl ComputeBackend for WgpuBackend {
    type Platform = WgpuPlatform;
    type Device = WgpuDevice;
    type Context = WgpuContext;
    type Queue = WgpuQueue;
    type Program = WgpuProgram;
    type Kernel = WgpuKernel;
    type Buffer = WgpuBuffer;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn platforms(&self) -> Result<Vec<WgpuPlatform>, String> {
        let mut platforms = Vec::new();
        for mask in PLATFORM_ORDER {
            if !self.backends.contains(mask) {
                continue;
            }
            let adapters = self.instance.enumerate_adapters(mask);
            let Some(first) = adapters.first() else {
                trace!("wgpu backend {mask:?} reports no adapters");
                continue;
            };
            let backend = first.get_info().backend;
            debug!("platform {backend:?}: {} adapter(s)", adapters.len());
            platforms.push(WgpuPlatform { backend, adapters });
        }
        if platforms.is_empty() {
            return Err(format!(
                "no wgpu backend among {:?} reports an adapter",
                self.backends
            ));
        }
        Ok(platforms)
    }

    fn platform_name(&self, platform: &WgpuPlatform) -> String {
        format!("{:?}", platform.backend)
    }

    fn device(&self, platform: &WgpuPlatform, class: DeviceClass) -> Option<WgpuDevice> {
        platform.adapters.iter().find_map(|adapter| {
            let info = adapter.get_info();
            if device_class(info.device_type) != class {
                return None;
            }
            // Downlevel adapters may lack compute on some backends.
            let capabilities = adapter.get_downlevel_capabilities();
            if !capabilities
                .flags
                .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
            {
                debug!("skipping {}: no compute shader support", info.name);
                return None;
            }
            Some(WgpuDevice {
                adapter: adapter.clone(),
                info,
            })
        })
    }

    fn device_info(&self, device: &WgpuDevice) -> DeviceInfo {
        DeviceInfo {
            name: device.info.name.clone(),
            class: device_class(device.info.device_type),
            platform: format!("{:?}", device.info.backend),
        }
    }

    fn create_context(&self, device: &WgpuDevice) -> Result<WgpuContext, String> {
        let adapter = &device.adapter;
        let supported = adapter.limits();
        let required_limits = wgpu::Limits {
            max_storage_buffer_binding_size: supported.max_storage_buffer_binding_size,
            max_buffer_size: supported.max_buffer_size,
            ..wgpu::Limits::downlevel_defaults()
        };
        let mut required_features = wgpu::Features::empty();
        if adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            required_features |= wgpu::Features::TIMESTAMP_QUERY;
        }
        let (logical, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("vadd_device"),
            required_features,
            required_limits,
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| format!("failed to create device on {}: {e}", device.info.name))?;
        Ok(WgpuContext {
            device: logical,
            queue: Cell::new(Some(queue)),
        })
    }

    fn create_queue(
        &self,
        context: &WgpuContext,
        _device: &WgpuDevice,
    ) -> Result<WgpuQueue, String> {
        let queue = context
            .queue
            .take()
            .ok_or_else(|| "the device's only command queue is already claimed".to_string())?;
        Ok(WgpuQueue {
            device: context.device.clone(),
            queue,
        })
    }

    fn build_program(&self, context: &WgpuContext, source: &str) -> Result<WgpuProgram, String> {
        let device = &context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("vadd_program"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let info = pollster::block_on(module.get_compilation_info());
        let scope = pollster::block_on(device.pop_error_scope());

        let mut log: Vec<String> = info
            .messages
            .iter()
            .filter(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error))
            .map(format_compilation_message)
            .collect();
        if log.is_empty() {
            if let Some(error) = scope {
                log.push(error.to_string());
            }
        }
        if !log.is_empty() {
            return Err(log.join("\n"));
        }
        Ok(WgpuProgram {
            device: device.clone(),
            module,
        })
    }

    fn create_kernel(&self, program: &WgpuProgram, name: &str) -> Result<WgpuKernel, String> {
        let device = &program.device;
        let (layout, pipeline) = scoped(device, || {
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("vadd_bind_group_layout"),
                entries: &[
                    storage_entry(0, true),
                    storage_entry(1, true),
                    storage_entry(2, false),
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: NonZeroU64::new(
                                std::mem::size_of::<LaunchParams>() as u64,
                            ),
                        },
                        count: None,
                    },
                ],
            });
            let pipeline_layout =
                device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("vadd_pipeline_layout"),
                    bind_group_layouts: &[&layout],
                    push_constant_ranges: &[],
                });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: Some(&pipeline_layout),
                module: &program.module,
                entry_point: Some(name),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            (layout, pipeline)
        })?;
        Ok(WgpuKernel {
            device: device.clone(),
            layout,
            pipeline,
            args: RefCell::new([None, None, None, None]),
        })
    }

    fn create_buffer(
        &self,
        context: &WgpuContext,
        label: &str,
        access: MemAccess,
        size: usize,
    ) -> Result<WgpuBuffer, String> {
        let usage = match access {
            MemAccess::ReadOnly => BufferUsages::STORAGE | BufferUsages::COPY_DST,
            MemAccess::WriteOnly => BufferUsages::STORAGE | BufferUsages::COPY_SRC,
        };
        let size = size as u64;
        let device = &context.device;
        let buffer = scoped(device, || {
            device.create_buffer(&BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        })?;
        Ok(WgpuBuffer { buffer, size })
    }

    fn write_buffer(&self, queue: &WgpuQueue, buffer: &WgpuBuffer, data: &[f32]) -> Result<(), String> {
        if data.is_empty() {
            return Ok(());
        }
        let bytes: &[u8] = cast_slice(data);
        if bytes.len() as u64 > buffer.size {
            return Err(format!(
                "{} bytes do not fit a {}-byte buffer",
                bytes.len(),
                buffer.size
            ));
        }
        scoped(&queue.device, || {
            queue.queue.write_buffer(&buffer.buffer, 0, bytes);
            queue.queue.submit(std::iter::empty());
        })?;
        wait(&queue.device)
    }

    fn set_arg(
        &self,
        kernel: &WgpuKernel,
        index: u32,
        arg: KernelArg<'_, WgpuBuffer>,
    ) -> Result<(), String> {
        let mut args = kernel.args.borrow_mut();
        let slot = args
            .get_mut(index as usize)
            .ok_or_else(|| format!("kernel takes {ARG_COUNT} arguments, got index {index}"))?;
        *slot = match (index, arg) {
            (0..=2, KernelArg::Buffer(buffer)) => Some(Binding::Buffer(buffer.buffer.clone())),
            (3, KernelArg::Count(count)) => Some(Binding::Count(count)),
            (_, KernelArg::Buffer(_)) => {
                return Err(format!("argument {index} is a scalar, got a buffer"))
            }
            (_, KernelArg::Count(_)) => {
                return Err(format!("argument {index} is a buffer, got a scalar"))
            }
        };
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: &WgpuQueue,
        kernel: &WgpuKernel,
        global_size: usize,
    ) -> Result<(), String> {
        if global_size == 0 {
            return Ok(());
        }
        let args = kernel.args.borrow();
        let (a, b, c) = (
            bound_buffer(&args, 0)?,
            bound_buffer(&args, 1)?,
            bound_buffer(&args, 2)?,
        );
        let Some(Binding::Count(count)) = args[3] else {
            return Err("argument 3 is not bound".into());
        };

        let total_groups = u32::try_from(global_size.div_ceil(WORKGROUP_SIZE as usize))
            .map_err(|_| format!("global size {global_size} exceeds the dispatch range"))?;
        let device = &kernel.device;
        let (groups_x, groups_y) =
            split_workgroups(total_groups, device.limits().max_compute_workgroups_per_dimension);
        debug!("dispatching {groups_x}x{groups_y} workgroups for {global_size} work-items");

        scoped(device, || {
            let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("vadd_params"),
                contents: bytemuck::bytes_of(&LaunchParams::new(count)),
                usage: BufferUsages::UNIFORM,
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("vadd_bind_group"),
                layout: &kernel.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: a.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: b.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: c.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: params.as_entire_binding(),
                    },
                ],
            });
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("vadd_encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("vadd_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&kernel.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups_x, groups_y, 1);
            }
            queue.queue.submit(std::iter::once(encoder.finish()));
        })
    }

    fn finish(&self, queue: &WgpuQueue) -> Result<(), String> {
        wait(&queue.device)
    }

    fn read_buffer(
        &self,
        queue: &WgpuQueue,
        buffer: &WgpuBuffer,
        out: &mut [f32],
    ) -> Result<(), String> {
        if out.is_empty() {
            return Ok(());
        }
        let size = out.len() as u64 * ELEMENT_SIZE;
        if size > buffer.size {
            return Err(format!(
                "{size} bytes requested from a {}-byte buffer",
                buffer.size
            ));
        }
        let device = &queue.device;
        let staging = scoped(device, || {
            let staging = device.create_buffer(&BufferDescriptor {
                label: Some("vadd_download"),
                size,
                usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("vadd_download_copy"),
            });
            encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, size);
            queue.queue.submit(std::iter::once(encoder.finish()));
            staging
        })?;

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        wait(device)?;
        receiver
            .recv()
            .map_err(|e| format!("mapping callback never ran: {e}"))?
            .map_err(|e| format!("mapping the staging buffer failed: {e}"))?;
        {
            let data = slice.get_mapped_range();
            out.copy_from_slice(cast_slice::<u8, f32>(&data));
        }
        staging.unmap();
        Ok(())
    }
}
