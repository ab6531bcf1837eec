//! Parameter block marshaling.
//!
//! Blocks are plain `#[repr(C)]` records deriving [`bytemuck::Pod`], so their
//! bytes are exactly their fields with no hidden padding. Each block's layout
//! must match the uniform struct declared by its kernel (WGSL layout rules:
//! `vec3<u32>` aligned to 16 bytes, struct size rounded up to 16).

use bytemuck::Pod;

/// Uniform blocks are bound in multiples of this many bytes.
pub const UNIFORM_ALIGNMENT: usize = 16;

/// A constant record uploadable as a kernel's uniform argument.
pub trait ParamBlock: Pod {
    /// Debug label for logs.
    const LABEL: &'static str;

    /// The block's bytes, in device layout.
    fn marshal(&self) -> Vec<u8> {
        debug_assert_eq!(size_of::<Self>() % UNIFORM_ALIGNMENT, 0);
        bytemuck::bytes_of(self).to_vec()
    }
}
