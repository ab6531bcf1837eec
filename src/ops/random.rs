//! Random tensor operators.
//!
//! - [`uniform_`] fills a device tensor in place with samples from `[from, to)`
//! - [`rand_like`] creates a new tensor of the same shape with samples from `[0, 1)`
//!
//! Both issue their work without waiting for it; the next access to the
//! tensor (another operator, or a read-back) is what orders after it.

use crate::api::{
    Context, MemoryAccess, PipelineBarrier, PipelineStage, UniformParamsBuffer, VTensor,
};
use crate::error::{DispatchError, DispatchResult};
use crate::kernel;
use crate::kernels::uniform::UniformBlock;
use crate::ops::copy::clone_view;
use crate::tensors::{Tensor, TensorOptions};
use std::sync::Arc;

/// Random stream selector accepted by [`uniform_`].
///
/// Device kernels draw their seeds from the context's seed stream
/// ([`Context::next_seed`]); a generator passed here does not change them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Generator {
    pub seed: u64,
}

/// Records one `uniform_` dispatch writing every element of `view`.
pub(crate) fn fill_uniform(view: &mut VTensor, from: f32, to: f32) -> DispatchResult<()> {
    let context: Arc<Context> = Arc::clone(view.context());
    let extents = view.extents();
    let block = UniformBlock::new(extents, from, to, context.next_seed());
    let params = UniformParamsBuffer::new(&context, &block)?;

    let mut barrier = PipelineBarrier::new();
    let output = view.buffer(&mut barrier, PipelineStage::Compute, MemoryAccess::WRITE);

    context.submit_compute_job(
        kernel!(uniform_),
        barrier,
        extents,
        context.adaptive_work_group_size(extents),
        None,
        &[output.into(), params.buffer()],
    )
}

/// Fills `tensor` in place with values drawn uniformly from `[from, to)`.
///
/// # Errors
///
/// - [`DispatchError::PreconditionViolation`] if the tensor is not device
///   resident; the tensor is left untouched
/// - [`DispatchError::InvalidArgument`] if a bound is not finite (as `f32`)
///   or `from > to`
///
/// `from == to` fills every element with `from`.
pub fn uniform_<'t>(
    tensor: &'t mut Tensor,
    from: f64,
    to: f64,
    generator: Option<&Generator>,
) -> DispatchResult<&'t mut Tensor> {
    let Some(view) = tensor.device_view_mut() else {
        return Err(DispatchError::precondition(
            "uniform_ is only supported on GPU-resident tensors",
        ));
    };
    let (lo, hi) = (from as f32, to as f32);
    if !(lo.is_finite() && hi.is_finite()) || lo > hi {
        return Err(DispatchError::invalid_argument(format!(
            "uniform_ bounds [{from}, {to}) are not a finite ascending interval"
        )));
    }
    if generator.is_some() {
        log::debug!("uniform_: generator ignored, seeds come from the context");
    }
    fill_uniform(view, lo, hi)?;
    Ok(tensor)
}

/// A new device tensor shaped like `reference`, filled from `[0, 1)`.
///
/// The upper bound handed to the kernel is `1 - ε` for the context's
/// precision, so no sample rounds up to one. The fill lands in a scratch view
/// that is then copied, and `reference` itself is never written.
///
/// Overrides in `options` are accepted but not honored: the result is always
/// `f32`, strided and contiguous, on the reference's device.
pub fn rand_like(reference: &Tensor, options: TensorOptions) -> DispatchResult<Tensor> {
    let Some(view) = reference.device_view() else {
        return Err(DispatchError::precondition(
            "rand_like is only supported on GPU-resident tensors",
        ));
    };
    if !options.is_empty() {
        log::debug!("rand_like: ignoring overrides {options:?}");
    }
    let context = Arc::clone(view.context());
    let upper = 1.0 - f64::from(context.precision().epsilon());

    let mut scratch = VTensor::new(&context, view.sizes())?;
    fill_uniform(&mut scratch, 0.0, upper as f32)?;
    Ok(Tensor::from_view(clone_view(&mut scratch)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::error::ErrorKind;

    #[test]
    fn rejects_bad_bounds() {
        let context = Context::host(ContextConfig::default());
        let mut t = Tensor::zeros(vec![2, 2]).to_device(&context).unwrap();
        for (from, to) in [(1.0, 0.0), (f64::NAN, 1.0), (0.0, f64::INFINITY), (0.0, 1e300)] {
            let err = uniform_(&mut t, from, to, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ContractMismatch, "{from} {to}");
        }
        assert_eq!(context.stats().dispatches, 0);
    }

    #[test]
    fn empty_interval_fills_with_lower_bound() {
        let context = Context::host(ContextConfig::default());
        let mut t = Tensor::zeros(vec![3]).to_device(&context).unwrap();
        uniform_(&mut t, 0.25, 0.25, None).unwrap();
        assert_eq!(t.to_vec().unwrap(), vec![0.25; 3]);
    }
}
