//! `uniform_`: fills a storage buffer with uniform samples from `[from, to)`.
//!
//! Slots: `[WritableStorage, Uniform(UniformBlock)]`.

use crate::api::{ArgKind, HostInvocation, ParamBlock, UVec3};
use crate::config::Precision;
use crate::error::{DispatchError, DispatchResult};
use crate::kernels::BuiltinKernel;
use bytemuck::{Pod, Zeroable};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

pub const NAME: &str = "uniform_";

pub const KERNEL: BuiltinKernel = BuiltinKernel {
    name: NAME,
    args: &[ArgKind::WritableStorage, ArgKind::Uniform],
    host: run,
    wgsl: include_str!("shaders/uniform.wgsl"),
};

/// Parameters of one `uniform_` dispatch.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBlock {
    pub extents: UVec3,
    pub from: f32,
    pub to: f32,
    /// Per-dispatch seed; consecutive fills of one tensor differ.
    pub seed: u32,
    _pad: [u32; 2],
}

const _: () = assert!(size_of::<UniformBlock>() == 32);

impl UniformBlock {
    pub fn new(extents: UVec3, from: f32, to: f32, seed: u32) -> Self {
        Self {
            extents,
            from,
            to,
            seed,
            _pad: [0; 2],
        }
    }
}

impl ParamBlock for UniformBlock {
    const LABEL: &'static str = "uniform_ params";
}

/// Largest value strictly below `bound` at the working precision.
fn largest_below(bound: f32, precision: Precision) -> f32 {
    match precision {
        Precision::Full => bound.next_down(),
        Precision::Reduced => {
            let mut h = half::f16::from_f32(bound);
            while h.to_f32() >= bound {
                h = f16_next_down(h);
            }
            h.to_f32()
        }
    }
}

fn f16_next_down(h: half::f16) -> half::f16 {
    let bits = h.to_bits();
    if h.is_nan() || h == half::f16::NEG_INFINITY {
        h
    } else if bits & 0x7fff == 0 {
        half::f16::from_bits(0x8001)
    } else if bits & 0x8000 == 0 {
        half::f16::from_bits(bits - 1)
    } else {
        half::f16::from_bits(bits + 1)
    }
}

fn run(inv: &mut HostInvocation<'_>) -> DispatchResult<()> {
    let block: UniformBlock = inv.uniform(1)?;
    let precision = inv.precision();
    let [x, y, z] = block.extents;
    let len = x as usize * y as usize * z as usize;
    let out = inv.storage_mut(0)?;
    if out.len() < len {
        return Err(DispatchError::argument_mismatch(
            NAME,
            format!("extents {:?} need {len} elements, storage holds {}", block.extents, out.len()),
        ));
    }
    if len == 0 {
        return Ok(());
    }

    let (from, to) = (block.from, block.to);
    if !(from.is_finite() && to.is_finite()) {
        return Err(DispatchError::invalid_argument(format!(
            "{NAME}: bounds [{from}, {to}) are not finite"
        )));
    }
    let ceiling = if to > from {
        largest_below(to, precision).max(from)
    } else {
        from
    };
    // the span of two finite f32 bounds can exceed f32::MAX
    let (lo, span) = (f64::from(from), f64::from(to) - f64::from(from));
    let seed = u64::from(block.seed) << 32;
    out[..len]
        .par_chunks_mut(x as usize)
        .enumerate()
        .for_each(|(row, chunk)| {
            let mut rng = SmallRng::seed_from_u64(seed | row as u64);
            for v in chunk {
                let u: f32 = rng.random();
                let sample = precision.round((lo + span * f64::from(u)) as f32);
                *v = sample.clamp(from.min(ceiling), ceiling);
            }
        });
    Ok(())
}
