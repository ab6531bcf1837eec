//! Built-in kernels.
//!
//! Each kernel ships three things that must agree with each other:
//!
//! - a [`KernelSignature`] naming its binding slots in order,
//! - a `#[repr(C)]` parameter block whose layout matches the WGSL uniform struct,
//! - two programs: WGSL for the `wgpu` device and a [`HostKernelFn`] for the
//!   host-emulated device.
//!
//! WGSL sources declare their work-group size through the pipeline-overridable
//! constants `wg_x`, `wg_y` and `wg_z`, so one module serves every local size
//! the sizer picks. A source may also declare `reduced_precision: bool`.

use crate::api::{ArgKind, HostKernelFn, KernelSignature};

pub mod copy;
pub mod uniform;

/// Everything a device needs to run one built-in kernel.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinKernel {
    pub name: &'static str,
    pub args: &'static [ArgKind],
    pub host: HostKernelFn,
    pub wgsl: &'static str,
}

impl BuiltinKernel {
    pub fn signature(&self) -> KernelSignature {
        KernelSignature::new(self.name, self.args)
    }
}

static BUILTIN: [BuiltinKernel; 2] = [uniform::KERNEL, copy::KERNEL];

/// All built-in kernels.
pub fn builtin() -> &'static [BuiltinKernel] {
    &BUILTIN
}

/// The built-in kernel called `name`, if any.
pub fn find(name: &str) -> Option<&'static BuiltinKernel> {
    BUILTIN.iter().find(|k| k.name == name)
}
