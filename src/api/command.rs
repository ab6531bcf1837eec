//! Recorded commands and fences.

use crate::api::barrier::BufferTransition;
use crate::api::kernel::{KernelArg, KernelHandle};
use crate::api::workgroup::UVec3;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One kernel dispatch, fully validated.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub kernel: KernelHandle,
    /// Dependencies to honor before the kernel runs.
    pub transitions: Vec<BufferTransition>,
    pub global: UVec3,
    pub local: UVec3,
    /// `div_up(global, local)` per axis.
    pub groups: UVec3,
    pub args: Vec<KernelArg>,
}

/// Work recorded by a [`Context`](crate::api::Context), executed in order.
#[derive(Debug, Clone)]
pub enum Command {
    Dispatch(Dispatch),
    /// A standalone barrier (host read-back, or a dispatch with nothing to run).
    Barrier(Vec<BufferTransition>),
}

impl Command {
    pub fn transitions(&self) -> &[BufferTransition] {
        match self {
            Command::Dispatch(d) => &d.transitions,
            Command::Barrier(t) => t,
        }
    }
}

/// Host-visible completion signal for a submitted batch.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Fence {
    signaled: Arc<AtomicBool>,
}

impl Fence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Marks the fence complete. Called by devices.
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    /// Re-arms the fence for another submission.
    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }
}
