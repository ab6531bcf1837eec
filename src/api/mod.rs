//! # Compute dispatch machinery
//!
//! The pieces every elementwise operator is built from:
//!
//! - [`params`]: fixed-layout parameter blocks and their byte marshaling
//! - [`resource`]: reference-counted device buffers and [`UniformParamsBuffer`]
//! - [`barrier`]: access descriptors and the [`PipelineBarrier`] accumulator
//! - [`tensor`]: [`VTensor`], a device-resident tensor view that tracks its last access
//! - [`workgroup`]: [`DeviceLimits`] and the adaptive local work-group sizer
//! - [`kernel`]: kernel identifiers, signatures and the registry
//! - [`command`]: recorded commands and completion [`Fence`]s
//! - [`device`]: the [`ComputeDevice`] trait every backend implements
//! - [`context`]: [`Context`], the submission engine
//! - [`host`]: a host-emulated device running kernels on `rayon`
//! - [`wgpu`] *(feature `wgpu`)*: real GPU execution through `wgpu`
//!
//! ## Protocol
//!
//! An operator builds a block, uploads it as a [`UniformParamsBuffer`],
//! creates an empty [`PipelineBarrier`], asks each [`VTensor`] it touches for
//! a handle (which records any dependency into the barrier) and finally moves
//! the barrier into [`Context::submit_compute_job`]. Nothing reaches the
//! device until the context flushes its batch.
//!
//! ```rust
//! use briny_dispatch::api::{Context, MemoryAccess, PipelineBarrier, PipelineStage, VTensor};
//! use briny_dispatch::config::ContextConfig;
//!
//! let context = Context::host(ContextConfig::default());
//! let mut view = VTensor::new(&context, &[4, 4]).unwrap();
//! let mut barrier = PipelineBarrier::new();
//! let _handle = view.buffer(&mut barrier, PipelineStage::Compute, MemoryAccess::WRITE);
//! assert!(barrier.is_empty()); // first access of a fresh view
//! ```

pub mod barrier;
pub mod command;
pub mod context;
pub mod device;
pub mod host;
pub mod kernel;
pub mod params;
pub mod resource;
pub mod tensor;
pub mod workgroup;
#[cfg(feature = "wgpu")]
pub mod wgpu;

pub use barrier::{AccessDescriptor, BufferTransition, MemoryAccess, PipelineBarrier, PipelineStage};
pub use command::{Command, Dispatch, Fence};
pub use context::{Context, ContextStats};
pub use device::{ComputeDevice, DeviceInfo};
pub use host::{HostDevice, HostInvocation, HostKernelFn};
pub use kernel::{ArgKind, KernelArg, KernelHandle, KernelId, KernelRegistry, KernelSignature};
pub use params::ParamBlock;
pub use resource::{Buffer, BufferId, BufferUsage, StorageHandle, UniformParamsBuffer};
pub use tensor::VTensor;
pub use workgroup::{DeviceLimits, UVec3, adaptive_work_group_size, div_up, group_count};

use crate::backend::{Backend, get_backend};
use crate::config::ContextConfig;
use crate::error::DispatchResult;
use std::sync::{Arc, Mutex};

lazy_static::lazy_static! {
    static ref DEFAULT_CONTEXT: Mutex<Option<Arc<Context>>> = Mutex::new(None);
}

/// Returns the process-wide default context, creating it on first use.
///
/// The device follows [`get_backend`]: `Wgpu` opens a GPU adapter when the
/// `wgpu` feature is compiled in (falling back to the host-emulated device if
/// none is available); every other backend uses the host-emulated device.
/// Configuration comes from [`ContextConfig::from_env`].
pub fn context() -> DispatchResult<Arc<Context>> {
    let mut slot = DEFAULT_CONTEXT.lock()?;
    if let Some(existing) = slot.as_ref() {
        return Ok(Arc::clone(existing));
    }
    let config = ContextConfig::from_env();
    let created = match get_backend() {
        #[cfg(feature = "wgpu")]
        Backend::Wgpu => match Context::wgpu(config.clone()) {
            Ok(ctx) => ctx,
            Err(e) => {
                log::warn!("wgpu context unavailable ({e}); using the host-emulated device");
                Context::host(config)
            }
        },
        Backend::Cpu | Backend::Emulated => Context::host(config),
        #[cfg(not(feature = "wgpu"))]
        Backend::Wgpu => {
            log::warn!("built without the `wgpu` feature; using the host-emulated device");
            Context::host(config)
        }
    };
    *slot = Some(Arc::clone(&created));
    Ok(created)
}

/// Generates a [`KernelId`] from a bare kernel name.
///
/// ```rust
/// use briny_dispatch::kernel;
/// assert_eq!(kernel!(uniform_).name(), "uniform_");
/// ```
#[macro_export]
macro_rules! kernel {
    ($name:ident) => {
        $crate::api::KernelId::new(stringify!($name))
    };
}
