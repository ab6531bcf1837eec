//! The device seam.
//!
//! A [`ComputeDevice`] owns memory and a queue. The [`Context`](crate::api::Context)
//! validates and batches work; devices only execute what they are given, in
//! order.

use crate::api::command::{Command, Fence};
use crate::api::kernel::KernelSignature;
use crate::api::resource::{BufferId, BufferUsage};
use crate::api::workgroup::DeviceLimits;
use crate::backend::Backend;
use crate::error::DispatchResult;

/// Static description of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: Backend,
    pub limits: DeviceLimits,
}

/// Memory and queue operations a backend provides.
pub trait ComputeDevice: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Signatures of every kernel this device has a program for.
    fn kernels(&self) -> Vec<KernelSignature>;

    /// Allocates `size` bytes. Contents are unspecified until written.
    fn allocate(&self, size: u64, usage: BufferUsage) -> DispatchResult<BufferId>;

    /// Returns an allocation. Unknown ids are ignored.
    fn release(&self, id: BufferId);

    /// Copies `bytes` to the start of the buffer before any later submission runs.
    fn write(&self, id: BufferId, bytes: &[u8]) -> DispatchResult<()>;

    /// Reads the whole buffer back, waiting for submitted work first.
    fn read(&self, id: BufferId) -> DispatchResult<Vec<u8>>;

    /// Executes `commands` in order and signals `fence` once they complete.
    fn submit(&self, commands: Vec<Command>, fence: Option<Fence>) -> DispatchResult<()>;

    /// Blocks until all submitted work has completed.
    fn wait_idle(&self) -> DispatchResult<()>;
}
