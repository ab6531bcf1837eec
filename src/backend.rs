//! Backend selection module.
//!
//! This module defines the available execution backends and a process-wide
//! default used by [`api::context`](crate::api::context) when it creates the
//! default compute context.
//!
//! # Supported Backends
//!
//! - `Cpu`: plain host tensors; no kernel dispatch is available (default).
//! - `Emulated`: kernels executed on the host by the emulated device.
//! - `Wgpu`: GPU execution via `wgpu` (feature `wgpu`).
//!
//! The backend is stored globally using an `AtomicU8`, enabling fast
//! switching at runtime. A tensor's own backend is decided by where its
//! storage lives (see [`Tensor::backend`](crate::tensors::Tensor::backend)),
//! not by this global.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of execution backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Backend {
    /// Host memory, no device (default).
    #[default]
    Cpu = 0,
    /// Host-emulated compute device.
    Emulated,
    /// GPU compute device using `wgpu`.
    Wgpu,
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Emulated),
            2 => Ok(Self::Wgpu),
            _ => Err(()),
        }
    }
}

/// Internal global state for the active backend.
///
/// The backend is expected to change rarely, and only contexts created
/// afterwards observe the change.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Sets the default backend.
///
/// # Example
///
/// ```
/// use briny_dispatch::backend::{set_backend, get_backend, Backend};
/// set_backend(Backend::Emulated);
/// assert_eq!(get_backend(), Backend::Emulated);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the default backend.
///
/// If the stored value is invalid, defaults to [`Backend::Cpu`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_round_trip() {
        for b in [Backend::Cpu, Backend::Emulated, Backend::Wgpu] {
            assert_eq!(Backend::try_from(b as u8), Ok(b));
        }
        assert!(Backend::try_from(9).is_err());
    }
}
