//! Host-memory device layer.
//!
//! [`EmulatedBackend`] behaves like a small in-order compute runtime that
//! lives entirely in host memory. Programs are compiled with the real WGSL
//! front end (naga), so kernel sources fail to build exactly where a GPU
//! driver would reject them. Launched kernels execute the elementwise-add
//! contract of the `vadd` argument layout.
//!
//! Only the built-in [`VADD_SOURCE`] can run. Any other source is parsed
//! and validated like a driver would, but launching one of its kernels
//! fails, since the emulated device cannot execute arbitrary WGSL.
//!
//! Every acquired resource is tracked in a shared [`Ledger`] together with
//! the ordered stream of transfers, launches and releases, and any stage
//! can be made to fail with a [`Fault`]. Tests use both to check teardown
//! and ordering guarantees without a GPU.

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use super::{ComputeBackend, DeviceInfo, KernelArg, MemAccess};
use crate::config::DeviceClass;
use crate::kernel::{host_vadd, VADD_SOURCE};

const ARG_COUNT: usize = 4;

/// Kind of device object recorded in the [`Ledger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Context,
    Queue,
    Program,
    Kernel,
    Buffer,
}

/// One observable step on the emulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Acquire { kind: ResourceKind, id: u64 },
    Release { kind: ResourceKind, id: u64 },
    Upload { buffer: String },
    Launch { global_size: usize },
    Finish,
    Download { buffer: String },
}

/// A call the emulated device should fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Platforms,
    Context,
    Queue,
    Program,
    Kernel,
    /// Allocation of the buffer with this label.
    Buffer(String),
    Upload(String),
    Download(String),
    /// Binding of the kernel argument at this index.
    Argument(u32),
    Launch,
    /// The device reports an error while executing a launched kernel.
    Execution,
}

/// Record of everything the emulated device was asked to do.
///
/// The log is never truncated and lives as long as its backend, so a
/// long-running caller should create a fresh backend per batch of work.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    events: Vec<Event>,
    next_id: u64,
}

impl Ledger {
    fn acquire(&mut self, kind: ResourceKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.events.push(Event::Acquire { kind, id });
        id
    }

    fn record(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn acquired(&self, kind: ResourceKind) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Acquire { kind: k, .. } if *k == kind))
            .count()
    }

    pub fn released(&self, kind: ResourceKind) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Release { kind: k, .. } if *k == kind))
            .count()
    }

    /// Objects of `kind` acquired but not yet released.
    pub fn live(&self, kind: ResourceKind) -> usize {
        self.acquired(kind) - self.released(kind)
    }

    pub fn total_live(&self) -> usize {
        [
            ResourceKind::Context,
            ResourceKind::Queue,
            ResourceKind::Program,
            ResourceKind::Kernel,
            ResourceKind::Buffer,
        ]
        .into_iter()
        .map(|kind| self.live(kind))
        .sum()
    }

    /// Kinds in the order they were released.
    pub fn release_order(&self) -> Vec<ResourceKind> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Release { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }
}

type SharedLedger = Rc<RefCell<Ledger>>;

/// Registers an object in the ledger and releases it on drop.
struct Tracked {
    kind: ResourceKind,
    id: u64,
    ledger: SharedLedger,
}

impl Tracked {
    fn new(ledger: &SharedLedger, kind: ResourceKind) -> Self {
        let id = ledger.borrow_mut().acquire(kind);
        trace!("acquire {kind:?} #{id}");
        Self {
            kind,
            id,
            ledger: Rc::clone(ledger),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        trace!("release {:?} #{}", self.kind, self.id);
        self.ledger.borrow_mut().record(Event::Release {
            kind: self.kind,
            id: self.id,
        });
    }
}

#[derive(Debug, Clone)]
struct PlatformSpec {
    name: String,
    devices: Vec<DeviceClass>,
}

/// In-process device layer with a resource ledger and fault injection.
pub struct EmulatedBackend {
    platforms: Vec<PlatformSpec>,
    faults: Vec<Fault>,
    ledger: SharedLedger,
}

impl EmulatedBackend {
    /// A single `host` platform exposing one CPU device.
    pub fn new() -> Self {
        Self::empty().with_platform("host", &[DeviceClass::Cpu])
    }

    /// A runtime with no platforms installed.
    pub fn empty() -> Self {
        Self {
            platforms: Vec::new(),
            faults: Vec::new(),
            ledger: SharedLedger::default(),
        }
    }

    /// Add a platform offering one device per entry of `devices`.
    pub fn with_platform(mut self, name: impl Into<String>, devices: &[DeviceClass]) -> Self {
        self.platforms.push(PlatformSpec {
            name: name.into(),
            devices: devices.to_vec(),
        });
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Snapshot of the ledger.
    pub fn ledger(&self) -> Ledger {
        self.ledger.borrow().clone()
    }

    fn check(&self, fault: Fault) -> Result<(), String> {
        if self.faults.contains(&fault) {
            Err(format!("injected fault: {fault:?}"))
        } else {
            Ok(())
        }
    }

    fn record(&self, event: Event) {
        self.ledger.borrow_mut().record(event);
    }

    /// Execute every launch still queued on `queue`, in submission order.
    fn drain(&self, queue: &EmulatedQueue) -> Result<(), String> {
        let pending: Vec<PendingLaunch> = queue.pending.borrow_mut().drain(..).collect();
        for launch in pending {
            self.check(Fault::Execution)
                .map_err(|e| format!("illegal memory access ({e})"))?;
            launch.execute()?;
        }
        Ok(())
    }
}

impl Default for EmulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct EmulatedPlatform {
    name: String,
    devices: Vec<DeviceClass>,
}

#[derive(Debug, Clone)]
pub struct EmulatedDevice {
    name: String,
    class: DeviceClass,
    platform: String,
}

pub struct EmulatedContext {
    _tracked: Tracked,
}

pub struct EmulatedQueue {
    pending: RefCell<Vec<PendingLaunch>>,
    _tracked: Tracked,
}

pub struct EmulatedProgram {
    module: naga::Module,
    /// Compiled from [`VADD_SOURCE`], the only program the device executes.
    builtin: bool,
    _tracked: Tracked,
}

#[derive(Clone)]
enum EmulatedArg {
    Buffer {
        label: String,
        access: MemAccess,
        storage: Rc<RefCell<Vec<f32>>>,
    },
    Count(u32),
}

pub struct EmulatedKernel {
    builtin: bool,
    args: RefCell<[Option<EmulatedArg>; ARG_COUNT]>,
    _tracked: Tracked,
}

pub struct EmulatedBuffer {
    label: String,
    access: MemAccess,
    storage: Rc<RefCell<Vec<f32>>>,
    _tracked: Tracked,
}

struct PendingLaunch {
    a: Rc<RefCell<Vec<f32>>>,
    b: Rc<RefCell<Vec<f32>>>,
    c: Rc<RefCell<Vec<f32>>>,
    count: usize,
    global_size: usize,
}

impl PendingLaunch {
    fn execute(self) -> Result<(), String> {
        let a = self.a.borrow();
        let b = self.b.borrow();
        let mut c = self.c.borrow_mut();
        let reach = self.count.min(self.global_size);
        if reach > a.len() || reach > b.len() || reach > c.len() {
            return Err(format!(
                "work-item {} accessed memory past the end of a bound buffer",
                reach - 1
            ));
        }
        host_vadd(&a, &b, &mut c, self.count, self.global_size);
        Ok(())
    }
}

fn bound_buffer(
    args: &[Option<EmulatedArg>; ARG_COUNT],
    index: usize,
) -> Result<(&str, MemAccess, Rc<RefCell<Vec<f32>>>), String> {
    match &args[index] {
        Some(EmulatedArg::Buffer {
            label,
            access,
            storage,
        }) => Ok((label.as_str(), *access, Rc::clone(storage))),
        _ => Err(format!("argument {index} is not bound")),
    }
}

/// Flatten an error and its sources into one line.
fn describe(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl ComputeBackend for EmulatedBackend {
    type Platform = EmulatedPlatform;
    type Device = EmulatedDevice;
    type Context = EmulatedContext;
    type Queue = EmulatedQueue;
    type Program = EmulatedProgram;
    type Kernel = EmulatedKernel;
    type Buffer = EmulatedBuffer;

    fn name(&self) -> &'static str {
        "emulated"
    }

    fn platforms(&self) -> Result<Vec<EmulatedPlatform>, String> {
        self.check(Fault::Platforms)?;
        if self.platforms.is_empty() {
            return Err("no emulated platforms installed".into());
        }
        Ok(self
            .platforms
            .iter()
            .map(|spec| EmulatedPlatform {
                name: spec.name.clone(),
                devices: spec.devices.clone(),
            })
            .collect())
    }

    fn platform_name(&self, platform: &EmulatedPlatform) -> String {
        platform.name.clone()
    }

    fn device(&self, platform: &EmulatedPlatform, class: DeviceClass) -> Option<EmulatedDevice> {
        let index = platform.devices.iter().position(|&c| c == class)?;
        Some(EmulatedDevice {
            name: format!("emulated {class} #{index}"),
            class,
            platform: platform.name.clone(),
        })
    }

    fn device_info(&self, device: &EmulatedDevice) -> DeviceInfo {
        DeviceInfo {
            name: device.name.clone(),
            class: device.class,
            platform: device.platform.clone(),
        }
    }

    fn create_context(&self, _device: &EmulatedDevice) -> Result<EmulatedContext, String> {
        self.check(Fault::Context)?;
        Ok(EmulatedContext {
            _tracked: Tracked::new(&self.ledger, ResourceKind::Context),
        })
    }

    fn create_queue(
        &self,
        _context: &EmulatedContext,
        _device: &EmulatedDevice,
    ) -> Result<EmulatedQueue, String> {
        self.check(Fault::Queue)?;
        Ok(EmulatedQueue {
            pending: RefCell::new(Vec::new()),
            _tracked: Tracked::new(&self.ledger, ResourceKind::Queue),
        })
    }

    fn build_program(
        &self,
        _context: &EmulatedContext,
        source: &str,
    ) -> Result<EmulatedProgram, String> {
        self.check(Fault::Program)?;
        let module =
            naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .map_err(|e| describe(&e))?;
        Ok(EmulatedProgram {
            module,
            builtin: source == VADD_SOURCE,
            _tracked: Tracked::new(&self.ledger, ResourceKind::Program),
        })
    }

    fn create_kernel(&self, program: &EmulatedProgram, name: &str) -> Result<EmulatedKernel, String> {
        self.check(Fault::Kernel)?;
        program
            .module
            .entry_points
            .iter()
            .find(|ep| ep.name == name && ep.stage == naga::ShaderStage::Compute)
            .ok_or_else(|| format!("program has no compute entry point named `{name}`"))?;
        Ok(EmulatedKernel {
            builtin: program.builtin,
            args: RefCell::new([None, None, None, None]),
            _tracked: Tracked::new(&self.ledger, ResourceKind::Kernel),
        })
    }

    fn create_buffer(
        &self,
        _context: &EmulatedContext,
        label: &str,
        access: MemAccess,
        size: usize,
    ) -> Result<EmulatedBuffer, String> {
        self.check(Fault::Buffer(label.to_string()))?;
        let element = std::mem::size_of::<f32>();
        if size % element != 0 {
            return Err(format!("{size} bytes is not a whole number of f32 elements"));
        }
        Ok(EmulatedBuffer {
            label: label.to_string(),
            access,
            storage: Rc::new(RefCell::new(vec![0.0; size / element])),
            _tracked: Tracked::new(&self.ledger, ResourceKind::Buffer),
        })
    }

    fn write_buffer(
        &self,
        queue: &EmulatedQueue,
        buffer: &EmulatedBuffer,
        data: &[f32],
    ) -> Result<(), String> {
        self.check(Fault::Upload(buffer.label.clone()))?;
        self.drain(queue)?;
        let mut storage = buffer.storage.borrow_mut();
        let capacity = storage.len();
        let target = storage.get_mut(..data.len()).ok_or_else(|| {
            format!(
                "{} elements do not fit buffer `{}` of {capacity}",
                data.len(),
                buffer.label,
            )
        })?;
        target.copy_from_slice(data);
        self.record(Event::Upload {
            buffer: buffer.label.clone(),
        });
        Ok(())
    }

    fn set_arg(
        &self,
        kernel: &EmulatedKernel,
        index: u32,
        arg: KernelArg<'_, EmulatedBuffer>,
    ) -> Result<(), String> {
        self.check(Fault::Argument(index))?;
        let mut args = kernel.args.borrow_mut();
        let slot = args
            .get_mut(index as usize)
            .ok_or_else(|| format!("kernel takes {ARG_COUNT} arguments, got index {index}"))?;
        *slot = match (index, arg) {
            (0..=2, KernelArg::Buffer(buffer)) => Some(EmulatedArg::Buffer {
                label: buffer.label.clone(),
                access: buffer.access,
                storage: Rc::clone(&buffer.storage),
            }),
            (3, KernelArg::Count(count)) => Some(EmulatedArg::Count(count)),
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
        queue: &EmulatedQueue,
        kernel: &EmulatedKernel,
        global_size: usize,
    ) -> Result<(), String> {
        self.check(Fault::Launch)?;
        if !kernel.builtin {
            return Err("the emulated device only executes the built-in vadd kernel".into());
        }
        if global_size == 0 {
            return Ok(());
        }
        let args = kernel.args.borrow();
        let (_, _, a) = bound_buffer(&args, 0)?;
        let (_, _, b) = bound_buffer(&args, 1)?;
        let (c_label, c_access, c) = bound_buffer(&args, 2)?;
        let Some(EmulatedArg::Count(count)) = args[3] else {
            return Err("argument 3 is not bound".into());
        };
        if c_access == MemAccess::ReadOnly {
            return Err(format!("output argument is bound to read-only buffer `{c_label}`"));
        }
        if Rc::ptr_eq(&c, &a) || Rc::ptr_eq(&c, &b) {
            return Err("output buffer aliases an input buffer".into());
        }
        queue.pending.borrow_mut().push(PendingLaunch {
            a,
            b,
            c,
            count: count as usize,
            global_size,
        });
        self.record(Event::Launch { global_size });
        Ok(())
    }

    fn finish(&self, queue: &EmulatedQueue) -> Result<(), String> {
        self.drain(queue)?;
        self.record(Event::Finish);
        Ok(())
    }

    fn read_buffer(
        &self,
        queue: &EmulatedQueue,
        buffer: &EmulatedBuffer,
        out: &mut [f32],
    ) -> Result<(), String> {
        self.check(Fault::Download(buffer.label.clone()))?;
        self.drain(queue)?;
        let storage = buffer.storage.borrow();
        let source = storage.get(..out.len()).ok_or_else(|| {
            format!(
                "{} elements requested from buffer `{}` of {}",
                out.len(),
                buffer.label,
                storage.len()
            )
        })?;
        out.copy_from_slice(source);
        self.record(Event::Download {
            buffer: buffer.label.clone(),
        });
        Ok(())
    }
}
