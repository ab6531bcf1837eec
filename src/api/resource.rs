//! Device buffers.
//!
//! A [`Buffer`] is a reference-counted handle to one device allocation. The
//! allocation is returned to the device when the last handle goes away, and
//! every recorded command keeps its own handles, so dropping a buffer on the
//! host never frees memory a pending dispatch still references.

use crate::api::barrier::MemoryAccess;
use crate::api::device::ComputeDevice;
use crate::api::params::ParamBlock;
use crate::api::{Context, KernelArg};
use crate::error::DispatchResult;
use core::fmt;
use std::sync::Arc;

/// Device-assigned identifier of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u64);

impl BufferId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// What a buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Tensor storage, read and/or written by kernels and the host.
    Storage,
    /// Constant parameter block.
    Uniform,
}

struct Allocation {
    id: BufferId,
    size: u64,
    usage: BufferUsage,
    device: Arc<dyn ComputeDevice>,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        log::trace!("release {} ({:?}, {} bytes)", self.id, self.usage, self.size);
        self.device.release(self.id);
    }
}

/// Shared handle to a device allocation.
#[derive(Clone)]
pub struct Buffer(Arc<Allocation>);

impl Buffer {
    pub(crate) fn allocate(
        device: &Arc<dyn ComputeDevice>,
        size: u64,
        usage: BufferUsage,
    ) -> DispatchResult<Self> {
        let id = device.allocate(size, usage)?;
        log::trace!("allocate {id} ({usage:?}, {size} bytes)");
        Ok(Self(Arc::new(Allocation {
            id,
            size,
            usage,
            device: Arc::clone(device),
        })))
    }

    pub fn id(&self) -> BufferId {
        self.0.id
    }

    pub fn size(&self) -> u64 {
        self.0.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.0.usage
    }

    /// Number of live handles, including those held by pending commands.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.0.id)
            .field("size", &self.0.size)
            .field("usage", &self.0.usage)
            .finish()
    }
}

/// A storage buffer together with the access it was requested for.
///
/// Only a [`VTensor`](crate::api::VTensor) hands these out, after recording
/// whatever barrier the access needs.
#[derive(Debug, Clone)]
pub struct StorageHandle {
    pub(crate) buffer: Buffer,
    pub(crate) access: MemoryAccess,
}

impl StorageHandle {
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn access(&self) -> MemoryAccess {
        self.access
    }
}

/// A device copy of one parameter block, bindable as a uniform argument.
///
/// The block is copied at construction; mutating the host value afterwards
/// does not change what kernels see.
pub struct UniformParamsBuffer {
    buffer: Buffer,
}

impl UniformParamsBuffer {
    pub fn new<B: ParamBlock>(context: &Context, block: &B) -> DispatchResult<Self> {
        let bytes = block.marshal();
        let buffer = context.allocate(bytes.len() as u64, BufferUsage::Uniform)?;
        context.device().write(buffer.id(), &bytes)?;
        log::trace!("{}: uploaded {} param bytes to {}", B::LABEL, bytes.len(), buffer.id());
        Ok(Self { buffer })
    }

    /// The kernel argument binding this block.
    pub fn buffer(&self) -> KernelArg {
        KernelArg::Uniform(self.buffer.clone())
    }

    pub fn size(&self) -> u64 {
        self.buffer.size()
    }

    pub fn id(&self) -> BufferId {
        self.buffer.id()
    }
}

impl fmt::Debug for UniformParamsBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UniformParamsBuffer").field(&self.buffer).finish()
    }
}
