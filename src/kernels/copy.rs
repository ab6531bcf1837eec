//! `copy_`: elementwise copy between two storage buffers of equal extents.
//!
//! Slots: `[ReadOnlyStorage, WritableStorage, Uniform(CopyBlock)]`.

use crate::api::{ArgKind, HostInvocation, ParamBlock, UVec3};
use crate::error::{DispatchError, DispatchResult};
use crate::kernels::BuiltinKernel;
use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

pub const NAME: &str = "copy_";

pub const KERNEL: BuiltinKernel = BuiltinKernel {
    name: NAME,
    args: &[
        ArgKind::ReadOnlyStorage,
        ArgKind::WritableStorage,
        ArgKind::Uniform,
    ],
    host: run,
    wgsl: include_str!("shaders/copy.wgsl"),
};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CopyBlock {
    pub extents: UVec3,
    _pad: u32,
}

const _: () = assert!(size_of::<CopyBlock>() == 16);

impl CopyBlock {
    pub fn new(extents: UVec3) -> Self {
        Self { extents, _pad: 0 }
    }
}

impl ParamBlock for CopyBlock {
    const LABEL: &'static str = "copy_ params";
}

fn run(inv: &mut HostInvocation<'_>) -> DispatchResult<()> {
    let block: CopyBlock = inv.uniform(2)?;
    let [x, y, z] = block.extents;
    let len = x as usize * y as usize * z as usize;
    let (src, dst) = inv.split(0, 1)?;
    if src.len() < len || dst.len() < len {
        return Err(DispatchError::argument_mismatch(
            NAME,
            format!(
                "extents {:?} need {len} elements, got {} and {}",
                block.extents,
                src.len(),
                dst.len()
            ),
        ));
    }
    if len == 0 {
        return Ok(());
    }
    dst[..len]
        .par_chunks_mut(x as usize)
        .zip(src[..len].par_chunks(x as usize))
        .for_each(|(d, s)| d.copy_from_slice(s));
    Ok(())
}
