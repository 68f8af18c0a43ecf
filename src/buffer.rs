//! Device buffers for the three trial vectors and host transfers.
//!
//! [`VectorBuffers`] allocates the device-side mirrors of A, B and C. The
//! buffers never own host data; they only reference device memory and
//! borrow the [`ComputeContext`] that created them, so they are always
//! released before that context is torn down.

use std::marker::PhantomData;

use log::debug;

use crate::backend::{ComputeBackend, MemAccess};
use crate::context::ComputeContext;
use crate::error::{BufferRole, Result, TransferDirection, VaddError};

/// Device buffers for one trial: inputs `a` and `b`, output `c`.
///
/// All three hold `len` `f32` elements, that is `len * size_of::<f32>()`
/// bytes. The inputs are read-only for the kernel, the output is
/// write-only.
pub struct VectorBuffers<'c, B: ComputeBackend> {
    a: B::Buffer,
    b: B::Buffer,
    c: B::Buffer,
    len: usize,
    _context: PhantomData<&'c B::Context>,
}

impl<'c, B: ComputeBackend> VectorBuffers<'c, B> {
    /// Allocate the three buffers for vectors of `len` elements.
    pub fn allocate(ctx: &'c ComputeContext<'_, B>, len: usize) -> Result<Self> {
        let size = len
            .checked_mul(std::mem::size_of::<f32>())
            .ok_or_else(|| VaddError::BufferAllocation {
                buffer: BufferRole::InputA,
                reason: format!("{len} elements overflow the address space"),
            })?;
        let a = Self::create(ctx, BufferRole::InputA, MemAccess::ReadOnly, size)?;
        let b = Self::create(ctx, BufferRole::InputB, MemAccess::ReadOnly, size)?;
        let c = Self::create(ctx, BufferRole::OutputC, MemAccess::WriteOnly, size)?;
        debug!("allocated 3 x {size} bytes of device memory");
        Ok(Self {
            a,
            b,
            c,
            len,
            _context: PhantomData,
        })
    }

    fn create(
        ctx: &ComputeContext<'_, B>,
        role: BufferRole,
        access: MemAccess,
        size: usize,
    ) -> Result<B::Buffer> {
        ctx.backend()
            .create_buffer(ctx.context(), role.label(), access, size)
            .map_err(|reason| VaddError::BufferAllocation {
                buffer: role,
                reason,
            })
    }

    /// Number of elements in each buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, role: BufferRole) -> &B::Buffer {
        match role {
            BufferRole::InputA => &self.a,
            BufferRole::InputB => &self.b,
            BufferRole::OutputC => &self.c,
        }
    }

    /// Copy host vectors `a` and `b` into the input buffers, in that order.
    ///
    /// Each copy blocks until the device has the data.
    pub fn upload(&self, ctx: &ComputeContext<'_, B>, a: &[f32], b: &[f32]) -> Result<()> {
        self.write(ctx, BufferRole::InputA, a)?;
        self.write(ctx, BufferRole::InputB, b)
    }

    fn write(&self, ctx: &ComputeContext<'_, B>, role: BufferRole, data: &[f32]) -> Result<()> {
        let transfer_error = |reason| VaddError::Transfer {
            direction: TransferDirection::Upload,
            buffer: role,
            reason,
        };
        if data.len() != self.len {
            return Err(transfer_error(format!(
                "host vector has {} elements, device buffer holds {}",
                data.len(),
                self.len
            )));
        }
        ctx.backend()
            .write_buffer(ctx.queue(), self.get(role), data)
            .map_err(transfer_error)
    }

    /// Copy the output buffer back into host vector `c`.
    ///
    /// Blocks until the data has arrived. On failure the contents of `c`
    /// are unspecified.
    pub fn download(&self, ctx: &ComputeContext<'_, B>, c: &mut [f32]) -> Result<()> {
        let transfer_error = |reason| VaddError::Transfer {
            direction: TransferDirection::Download,
            buffer: BufferRole::OutputC,
            reason,
        };
        if c.len() != self.len {
            return Err(transfer_error(format!(
                "host vector has {} elements, device buffer holds {}",
                c.len(),
                self.len
            )));
        }
        ctx.backend()
            .read_buffer(ctx.queue(), &self.c, c)
            .map_err(transfer_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EmulatedBackend, Fault, ResourceKind};
    use crate::config::DeviceClass;
    use crate::device::select_device;
    use crate::kernel::VADD_SOURCE;

    #[test]
    fn failed_allocation_releases_earlier_buffers() {
        let backend = EmulatedBackend::new().with_fault(Fault::Buffer("c".into()));
        let device = select_device(&backend, DeviceClass::Cpu).unwrap();
        let ctx = ComputeContext::build(&backend, device, VADD_SOURCE).unwrap();
        let err = VectorBuffers::allocate(&ctx, 8).err().unwrap();
        assert!(matches!(
            err,
            VaddError::BufferAllocation {
                buffer: BufferRole::OutputC,
                ..
            }
        ));
        let ledger = backend.ledger();
        assert_eq!(ledger.acquired(ResourceKind::Buffer), 2);
        assert_eq!(ledger.live(ResourceKind::Buffer), 0);
    }

    #[test]
    fn length_mismatch_is_an_upload_error() {
        let backend = EmulatedBackend::new();
        let device = select_device(&backend, DeviceClass::Cpu).unwrap();
        let ctx = ComputeContext::build(&backend, device, VADD_SOURCE).unwrap();
        let buffers = VectorBuffers::allocate(&ctx, 4).unwrap();
        let err = buffers
            .upload(&ctx, &[1.0; 4], &[1.0; 3])
            .err()
            .unwrap();
        assert!(matches!(
            err,
            VaddError::Transfer {
                direction: TransferDirection::Upload,
                buffer: BufferRole::InputB,
                ..
            }
        ));
    }

    #[test]
    fn download_failure_names_the_direction() {
        let backend = EmulatedBackend::new().with_fault(Fault::Download("c".into()));
        let device = select_device(&backend, DeviceClass::Cpu).unwrap();
        let ctx = ComputeContext::build(&backend, device, VADD_SOURCE).unwrap();
        let buffers = VectorBuffers::allocate(&ctx, 2).unwrap();
        buffers.upload(&ctx, &[1.0, 2.0], &[3.0, 4.0]).unwrap();
        let mut c = [0.0; 2];
        let err = buffers.download(&ctx, &mut c).err().unwrap();
        assert_eq!(err.exit_code(), 11);
    }
}
