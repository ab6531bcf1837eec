//! GPU-resident tensor views.

use crate::api::barrier::{AccessDescriptor, BufferTransition, MemoryAccess, PipelineBarrier, PipelineStage};
use crate::api::context::Context;
use crate::api::resource::{Buffer, BufferUsage, StorageHandle};
use crate::api::workgroup::UVec3;
use crate::error::{DispatchError, DispatchResult};
use core::fmt;
use std::sync::Arc;

/// Collapses `sizes` into kernel extents: `x` is the innermost dimension,
/// `y` the next one and `z` the product of everything outside them.
fn extents_of(sizes: &[usize]) -> DispatchResult<UVec3> {
    let axis = |v: usize| {
        u32::try_from(v).map_err(|_| {
            DispatchError::invalid_argument(format!("dimension {v} of {sizes:?} exceeds u32"))
        })
    };
    let (x, y, rest) = match sizes {
        [] => (1, 1, &[][..]),
        [x] => (*x, 1, &[][..]),
        [rest @ .., y, x] => (*x, *y, rest),
    };
    let z = rest.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
    let z = z.ok_or_else(|| DispatchError::invalid_argument(format!("{sizes:?} overflows")))?;
    Ok([axis(x)?, axis(y)?, axis(z)?])
}

/// Number of elements of a tensor of shape `sizes`, if it fits in `usize`.
pub(crate) fn checked_numel(sizes: &[usize]) -> Option<usize> {
    sizes.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// A tensor whose elements live in one device storage buffer.
///
/// The view remembers how its storage was last accessed. Every
/// [`buffer`](Self::buffer) request compares the new access with that record,
/// appends a transition to the caller's barrier when they conflict and then
/// replaces the record. Requests take `&mut self`, so two operations cannot
/// interleave their bookkeeping on one view.
pub struct VTensor {
    context: Arc<Context>,
    buffer: Buffer,
    sizes: Vec<usize>,
    extents: UVec3,
    last_access: AccessDescriptor,
}

impl VTensor {
    /// Allocates an uninitialized `f32` tensor of shape `sizes`.
    pub fn new(context: &Arc<Context>, sizes: &[usize]) -> DispatchResult<Self> {
        let extents = extents_of(sizes)?;
        let bytes = checked_numel(sizes)
            .and_then(|numel| u64::try_from(numel.max(1)).ok())
            .and_then(|numel| numel.checked_mul(4))
            .ok_or_else(|| {
                DispatchError::invalid_argument(format!("shape {sizes:?} is too large"))
            })?;
        let buffer = context.allocate(bytes, BufferUsage::Storage)?;
        Ok(Self {
            context: Arc::clone(context),
            buffer,
            sizes: sizes.to_vec(),
            extents,
            last_access: AccessDescriptor::UNUSED,
        })
    }

    /// Allocates a tensor and uploads `data` into it.
    pub fn from_host(context: &Arc<Context>, sizes: &[usize], data: &[f32]) -> DispatchResult<Self> {
        let mut view = Self::new(context, sizes)?;
        view.write(data)?;
        Ok(view)
    }

    /// Requests `access` to the storage at `stage`.
    ///
    /// Appends a transition to `barrier` when the previous access is not
    /// `NONE` and either side writes; read-after-read and the first access of
    /// a fresh view append nothing. Nothing reaches the device here.
    pub fn buffer(
        &mut self,
        barrier: &mut PipelineBarrier,
        stage: PipelineStage,
        access: MemoryAccess,
    ) -> StorageHandle {
        let next = AccessDescriptor::new(stage, access);
        if self.last_access.requires_barrier(&next) {
            barrier.record(BufferTransition {
                buffer: self.buffer.id(),
                src: self.last_access,
                dst: next,
            });
        }
        self.last_access = next;
        StorageHandle {
            buffer: self.buffer.clone(),
            access,
        }
    }

    /// Copies the elements back to the host. Blocks until every pending
    /// write to this view has executed.
    pub fn read(&mut self) -> DispatchResult<Vec<f32>> {
        let mut barrier = PipelineBarrier::new();
        let _ = self.buffer(&mut barrier, PipelineStage::Host, MemoryAccess::READ);
        let bytes = self.context.download(barrier, &self.buffer)?;
        Ok(bytes
            .chunks_exact(4)
            .take(self.numel())
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect())
    }

    /// Overwrites every element from the host.
    pub fn write(&mut self, data: &[f32]) -> DispatchResult<()> {
        if data.len() != self.numel() {
            return Err(DispatchError::invalid_argument(format!(
                "{} values for a tensor of shape {:?}",
                data.len(),
                self.sizes
            )));
        }
        let mut barrier = PipelineBarrier::new();
        let _ = self.buffer(&mut barrier, PipelineStage::Host, MemoryAccess::WRITE);
        self.context
            .upload(barrier, &self.buffer, bytemuck::cast_slice(data))
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn extents(&self) -> UVec3 {
        self.extents
    }

    pub fn numel(&self) -> usize {
        self.sizes.iter().product()
    }

    pub fn last_access(&self) -> AccessDescriptor {
        self.last_access
    }

    /// The backing allocation.
    pub fn storage(&self) -> &Buffer {
        &self.buffer
    }
}

impl fmt::Debug for VTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VTensor")
            .field("buffer", &self.buffer.id())
            .field("sizes", &self.sizes)
            .field("extents", &self.extents)
            .field("last_access", &self.last_access)
            .finish()
    }
}
