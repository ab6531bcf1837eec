//! Device-side copies.

use crate::api::{MemoryAccess, PipelineBarrier, PipelineStage, UniformParamsBuffer, VTensor};
use crate::error::DispatchResult;
use crate::kernel;
use crate::kernels::copy::CopyBlock;
use std::sync::Arc;

/// Allocates a new view of the same shape and records a `copy_` from `source`
/// into it.
///
/// Both accesses go into one barrier, so the copy waits for pending writes to
/// `source` and later writes to `source` wait for the copy. The result shares
/// no storage with `source`.
pub fn clone_view(source: &mut VTensor) -> DispatchResult<VTensor> {
    let context = Arc::clone(source.context());
    let mut target = VTensor::new(&context, source.sizes())?;
    let extents = source.extents();
    let params = UniformParamsBuffer::new(&context, &CopyBlock::new(extents))?;

    let mut barrier = PipelineBarrier::new();
    let src = source.buffer(&mut barrier, PipelineStage::Compute, MemoryAccess::READ);
    let dst = target.buffer(&mut barrier, PipelineStage::Compute, MemoryAccess::WRITE);

    context.submit_compute_job(
        kernel!(copy_),
        barrier,
        extents,
        context.adaptive_work_group_size(extents),
        None,
        &[src.into(), dst.into(), params.buffer()],
    )?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Context;
    use crate::config::ContextConfig;

    #[test]
    fn copy_does_not_alias() {
        let context = Context::host(ContextConfig::default());
        let mut source = VTensor::from_host(&context, &[2, 2], &[1., 2., 3., 4.]).unwrap();
        let mut copy = clone_view(&mut source).unwrap();
        assert_ne!(copy.storage().id(), source.storage().id());
        source.write(&[0.; 4]).unwrap();
        assert_eq!(copy.read().unwrap(), vec![1., 2., 3., 4.]);
    }
}
