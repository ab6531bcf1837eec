//! Tensor values seen by operator callers.
//!
//! # Storage
//!
//! A [`Tensor`] owns its elements either in host memory or on a compute
//! device (as a [`VTensor`]). Device operators such as
//! [`uniform_`](crate::ops::dispatch::uniform_) only accept device-resident
//! tensors; host tensors are moved over with [`Tensor::to_device`].
//!
//! ## Example
//!
//! ```rust
//! use briny_dispatch::api::Context;
//! use briny_dispatch::config::ContextConfig;
//! use briny_dispatch::tensors::Tensor;
//!
//! let context = Context::host(ContextConfig::default());
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert!(!t.is_device_resident());
//! let mut t = t.to_device(&context).unwrap();
//! assert_eq!(t.to_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! ```

use crate::api::tensor::checked_numel;
use crate::api::{Context, VTensor};
use crate::backend::Backend;
use crate::error::DispatchResult;
use crate::ops::copy::clone_view;
use std::sync::Arc;

/// Where a tensor's elements live.
#[derive(Debug)]
pub enum Storage {
    /// Flat row-major host memory.
    Host(Vec<f32>),
    /// A device storage buffer.
    Device(VTensor),
}

/// An N-dimensional `f32` tensor.
#[derive(Debug)]
pub struct Tensor {
    shape: Vec<usize>,
    storage: Storage,
}

impl Tensor {
    /// Creates a host tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<f32>) -> Self {
        let shape = shape.into();
        assert_eq!(
            checked_numel(&shape),
            Some(data.len()),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self {
            shape,
            storage: Storage::Host(data),
        }
    }

    /// A host tensor of zeros.
    ///
    /// # Panics
    /// Panics if the shape product overflows `usize`.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let Some(numel) = checked_numel(&shape) else {
            panic!("shape {shape:?} overflows the element count");
        };
        Self {
            shape,
            storage: Storage::Host(vec![0.0; numel]),
        }
    }

    /// Wraps a device view.
    pub fn from_view(view: VTensor) -> Self {
        Self {
            shape: view.sizes().to_vec(),
            storage: Storage::Device(view),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element count. Constructors reject shapes whose product overflows.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn is_device_resident(&self) -> bool {
        matches!(self.storage, Storage::Device(_))
    }

    /// Backend of the storage: `Cpu` for host tensors, otherwise the
    /// backend of the device holding the view.
    pub fn backend(&self) -> Backend {
        match &self.storage {
            Storage::Host(_) => Backend::Cpu,
            Storage::Device(view) => view.context().info().backend,
        }
    }

    pub fn device_view(&self) -> Option<&VTensor> {
        match &self.storage {
            Storage::Device(view) => Some(view),
            Storage::Host(_) => None,
        }
    }

    pub fn device_view_mut(&mut self) -> Option<&mut VTensor> {
        match &mut self.storage {
            Storage::Device(view) => Some(view),
            Storage::Host(_) => None,
        }
    }

    /// Uploads a host tensor to `context`. A tensor that is already device
    /// resident is returned as is.
    pub fn to_device(self, context: &Arc<Context>) -> DispatchResult<Self> {
        match self.storage {
            Storage::Host(data) => {
                let view = VTensor::from_host(context, &self.shape, &data)?;
                Ok(Self::from_view(view))
            }
            Storage::Device(_) => Ok(self),
        }
    }

    /// Copies the elements out, reading back from the device if needed.
    pub fn to_vec(&mut self) -> DispatchResult<Vec<f32>> {
        match &mut self.storage {
            Storage::Host(data) => Ok(data.clone()),
            Storage::Device(view) => view.read(),
        }
    }

    /// An independent copy. Device tensors are copied on the device.
    pub fn try_clone(&mut self) -> DispatchResult<Self> {
        match &mut self.storage {
            Storage::Host(data) => Ok(Self::new(self.shape.clone(), data.clone())),
            Storage::Device(view) => Ok(Self::from_view(clone_view(view)?)),
        }
    }
}

/// Element type requested by a factory call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
}

/// Memory layout requested by a factory call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    Strided,
    Sparse,
}

/// Memory format requested by a factory call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryFormat {
    Contiguous,
    Preserve,
    ChannelsLast,
}

/// Optional overrides of a `*_like` factory.
///
/// `rand_like` accepts these but always produces an `f32`, strided,
/// contiguous tensor on the reference's device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TensorOptions {
    pub dtype: Option<DType>,
    pub layout: Option<Layout>,
    pub device: Option<Backend>,
    pub pin_memory: Option<bool>,
    pub memory_format: Option<MemoryFormat>,
}

impl TensorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn with_device(mut self, device: Backend) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_memory_format(mut self, format: MemoryFormat) -> Self {
        self.memory_format = Some(format);
        self
    }

    /// Whether no override is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;

    #[test]
    #[should_panic(expected = "incompatible")]
    fn new_checks_shape() {
        let _ = Tensor::new(vec![2, 2], vec![1.0]);
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn zeros_checks_overflow() {
        let _ = Tensor::zeros(vec![usize::MAX, 2]);
    }

    #[test]
    fn host_tensor_basics() {
        let mut t = Tensor::zeros(vec![3]);
        assert_eq!(t.numel(), 3);
        assert_eq!(t.backend(), Backend::Cpu);
        assert!(t.device_view().is_none());
        assert_eq!(t.try_clone().unwrap().to_vec().unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn device_clone_is_independent() {
        let context = Context::host(ContextConfig::default());
        let mut a = Tensor::new(vec![2], vec![1.0, 2.0]).to_device(&context).unwrap();
        let mut b = a.try_clone().unwrap();
        assert_eq!(b.backend(), Backend::Emulated);
        b.device_view_mut().unwrap().write(&[9.0, 9.0]).unwrap();
        assert_eq!(a.to_vec().unwrap(), vec![1.0, 2.0]);
        assert_eq!(b.to_vec().unwrap(), vec![9.0, 9.0]);
    }

    #[test]
    fn options_emptiness() {
        assert!(TensorOptions::new().is_empty());
        assert!(!TensorOptions::new().with_dtype(DType::F16).is_empty());
    }
}
