//! Host-emulated compute device.
//!
//! [`HostDevice`] keeps every allocation in host memory and runs each kernel
//! through a Rust program (one per kernel, see [`HostKernelFn`]) that
//! parallelizes over rows with `rayon`. Submission is synchronous, so a
//! submitted batch has completed by the time `submit` returns.
//!
//! The device also tracks the last access of every storage buffer. With
//! barrier validation on, an access that conflicts with the previous one
//! (RAW, WAR or WAW) and was not preceded by a transition on that buffer is
//! rejected with [`DispatchError::MissingBarrier`]. This is how ordering bugs
//! show up in tests instead of as flaky data on a real GPU.

use crate::api::barrier::{AccessDescriptor, BufferTransition, MemoryAccess, PipelineStage};
use crate::api::command::{Command, Dispatch, Fence};
use crate::api::device::{ComputeDevice, DeviceInfo};
use crate::api::kernel::{ArgKind, KernelArg, KernelSignature};
use crate::api::params::ParamBlock;
use crate::api::resource::{BufferId, BufferUsage};
use crate::api::workgroup::UVec3;
use crate::backend::Backend;
use crate::config::{ContextConfig, Precision};
use crate::error::{DispatchError, DispatchResult};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Host program implementing one kernel.
pub type HostKernelFn = fn(&mut HostInvocation<'_>) -> DispatchResult<()>;

/// One allocation, stored as words so `f32` and block views stay aligned.
struct HostMemory {
    words: Vec<u32>,
    size: u64,
    usage: BufferUsage,
}

impl HostMemory {
    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u32, u8>(&self.words)[..self.size as usize]
    }

    fn floats(&self) -> &[f32] {
        &bytemuck::cast_slice::<u32, f32>(&self.words)[..self.size as usize / 4]
    }

    fn floats_mut(&mut self) -> &mut [f32] {
        let len = self.size as usize / 4;
        &mut bytemuck::cast_slice_mut::<u32, f32>(&mut self.words)[..len]
    }
}

#[derive(Clone, Copy)]
struct Tracked {
    last: AccessDescriptor,
    covered: bool,
}

/// Everything a host program sees while executing one dispatch.
///
/// Bound buffers are checked out of device memory for the duration of the
/// call and returned afterwards, so programs can borrow them freely.
pub struct HostInvocation<'a> {
    dispatch: &'a Dispatch,
    precision: Precision,
    bound: Vec<HostMemory>,
}

impl HostInvocation<'_> {
    pub fn kernel(&self) -> &'static str {
        self.dispatch.kernel.name()
    }

    pub fn global(&self) -> UVec3 {
        self.dispatch.global
    }

    pub fn local(&self) -> UVec3 {
        self.dispatch.local
    }

    pub fn groups(&self) -> UVec3 {
        self.dispatch.groups
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    fn slot(&self, slot: usize, want: &[ArgKind]) -> DispatchResult<&HostMemory> {
        self.check_slot(slot, want)?;
        Ok(&self.bound[slot])
    }

    fn check_slot(&self, slot: usize, want: &[ArgKind]) -> DispatchResult<()> {
        let declared = self.dispatch.kernel.signature().args.get(slot);
        match declared {
            Some(kind) if want.contains(kind) => Ok(()),
            Some(kind) => Err(DispatchError::argument_mismatch(
                self.kernel(),
                format!("slot {slot} is {kind:?}, program wanted one of {want:?}"),
            )),
            None => Err(DispatchError::argument_mismatch(
                self.kernel(),
                format!("slot {slot} is not declared"),
            )),
        }
    }

    /// Elements of a storage slot.
    pub fn storage(&self, slot: usize) -> DispatchResult<&[f32]> {
        Ok(self
            .slot(slot, &[ArgKind::ReadOnlyStorage, ArgKind::WritableStorage])?
            .floats())
    }

    /// Elements of a writable storage slot.
    pub fn storage_mut(&mut self, slot: usize) -> DispatchResult<&mut [f32]> {
        self.check_slot(slot, &[ArgKind::WritableStorage])?;
        Ok(self.bound[slot].floats_mut())
    }

    /// A read-only source slot and a distinct writable destination slot.
    pub fn split(&mut self, src: usize, dst: usize) -> DispatchResult<(&[f32], &mut [f32])> {
        self.check_slot(src, &[ArgKind::ReadOnlyStorage, ArgKind::WritableStorage])?;
        self.check_slot(dst, &[ArgKind::WritableStorage])?;
        if src == dst {
            return Err(DispatchError::argument_mismatch(
                self.kernel(),
                format!("slot {src} cannot be both source and destination"),
            ));
        }
        let (lo, hi) = self.bound.split_at_mut(src.max(dst));
        let (src_mem, dst_mem) = if src < dst {
            (&lo[src], &mut hi[0])
        } else {
            (&hi[0], &mut lo[dst])
        };
        Ok((src_mem.floats(), dst_mem.floats_mut()))
    }

    /// Decodes the parameter block bound at `slot`.
    pub fn uniform<B: ParamBlock>(&self, slot: usize) -> DispatchResult<B> {
        let bytes = self.slot(slot, &[ArgKind::Uniform])?.bytes();
        if bytes.len() < size_of::<B>() {
            return Err(DispatchError::argument_mismatch(
                self.kernel(),
                format!(
                    "{} needs {} bytes, slot {slot} holds {}",
                    B::LABEL,
                    size_of::<B>(),
                    bytes.len()
                ),
            ));
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..size_of::<B>()]))
    }
}

/// A [`ComputeDevice`] that runs kernels on the host.
pub struct HostDevice {
    info: DeviceInfo,
    precision: Precision,
    validate: bool,
    programs: HashMap<&'static str, (KernelSignature, HostKernelFn)>,
    memory: Mutex<HashMap<BufferId, HostMemory>>,
    hazards: Mutex<HashMap<BufferId, Tracked>>,
    next_id: AtomicU64,
}

impl HostDevice {
    /// A device with every built-in kernel, configured from `config`.
    pub fn new(config: &ContextConfig) -> Self {
        let mut device = Self {
            info: DeviceInfo {
                name: format!("host-emulated ({} threads)", rayon::current_num_threads()),
                backend: Backend::Emulated,
                limits: config.host_limits,
            },
            precision: config.precision,
            validate: config.validate_barriers,
            programs: HashMap::new(),
            memory: Mutex::new(HashMap::new()),
            hazards: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        };
        for kernel in crate::kernels::builtin() {
            device = device.with_kernel(kernel.signature(), kernel.host);
        }
        device
    }

    /// Adds (or replaces) a kernel program.
    pub fn with_kernel(mut self, signature: KernelSignature, program: HostKernelFn) -> Self {
        self.programs.insert(signature.name, (signature, program));
        self
    }

    /// Number of live allocations.
    pub fn live_buffers(&self) -> usize {
        self.memory.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn cover(&self, transitions: &[BufferTransition]) -> DispatchResult<()> {
        let mut hazards = self.hazards.lock()?;
        for t in transitions {
            hazards
                .entry(t.buffer)
                .or_insert(Tracked {
                    last: AccessDescriptor::UNUSED,
                    covered: false,
                })
                .covered = true;
        }
        Ok(())
    }

    fn access(&self, buffer: BufferId, next: AccessDescriptor) -> DispatchResult<()> {
        let mut hazards = self.hazards.lock()?;
        let tracked = hazards.entry(buffer).or_insert(Tracked {
            last: AccessDescriptor::UNUSED,
            covered: false,
        });
        if self.validate && tracked.last.requires_barrier(&next) && !tracked.covered {
            return Err(DispatchError::MissingBarrier {
                buffer,
                message: format!(
                    "{:?} {:?} after {:?} {:?}",
                    next.stage, next.access, tracked.last.stage, tracked.last.access
                ),
            });
        }
        *tracked = Tracked {
            last: next,
            covered: false,
        };
        Ok(())
    }

    fn execute(&self, dispatch: &Dispatch) -> DispatchResult<()> {
        let name = dispatch.kernel.name();
        let (_, program) = self
            .programs
            .get(name)
            .ok_or_else(|| DispatchError::KernelNotFound {
                name: name.to_string(),
            })?;

        self.cover(&dispatch.transitions)?;
        for arg in &dispatch.args {
            if let KernelArg::Storage(handle) = arg {
                self.access(
                    handle.buffer().id(),
                    AccessDescriptor::new(PipelineStage::Compute, handle.access()),
                )?;
            }
        }

        let ids: Vec<BufferId> = dispatch.args.iter().map(|a| a.buffer().id()).collect();
        let bound = {
            let mut memory = self.memory.lock()?;
            let mut bound = Vec::with_capacity(ids.len());
            for &id in &ids {
                match memory.remove(&id) {
                    Some(slot) => bound.push(slot),
                    None => {
                        for (id, slot) in ids.iter().zip(bound) {
                            memory.insert(*id, slot);
                        }
                        return Err(if ids.iter().filter(|&&other| other == id).count() > 1 {
                            DispatchError::device(format!("{name}: {id} is bound more than once"))
                        } else {
                            DispatchError::UnknownBuffer { buffer: id }
                        });
                    }
                }
            }
            bound
        };

        let mut invocation = HostInvocation {
            dispatch,
            precision: self.precision,
            bound,
        };
        let result = program(&mut invocation);

        let mut memory = self.memory.lock()?;
        for (id, slot) in ids.into_iter().zip(invocation.bound) {
            memory.insert(id, slot);
        }
        result
    }
}

impl ComputeDevice for HostDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn kernels(&self) -> Vec<KernelSignature> {
        self.programs.values().map(|(s, _)| s.clone()).collect()
    }

    fn allocate(&self, size: u64, usage: BufferUsage) -> DispatchResult<BufferId> {
        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let words = vec![0u32; size.div_ceil(4) as usize];
        self.memory
            .lock()?
            .insert(id, HostMemory { words, size, usage });
        Ok(id)
    }

    fn release(&self, id: BufferId) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.remove(&id);
        }
        if let Ok(mut hazards) = self.hazards.lock() {
            hazards.remove(&id);
        }
    }

    fn write(&self, id: BufferId, bytes: &[u8]) -> DispatchResult<()> {
        let usage = {
            let mut memory = self.memory.lock()?;
            let slot = memory
                .get_mut(&id)
                .ok_or(DispatchError::UnknownBuffer { buffer: id })?;
            if bytes.len() as u64 > slot.size {
                return Err(DispatchError::device(format!(
                    "write of {} bytes into {id} of {} bytes",
                    bytes.len(),
                    slot.size
                )));
            }
            bytemuck::cast_slice_mut::<u32, u8>(&mut slot.words)[..bytes.len()]
                .copy_from_slice(bytes);
            slot.usage
        };
        if usage == BufferUsage::Storage {
            self.access(id, AccessDescriptor::new(PipelineStage::Host, MemoryAccess::WRITE))?;
        }
        Ok(())
    }

    fn read(&self, id: BufferId) -> DispatchResult<Vec<u8>> {
        let (bytes, usage) = {
            let memory = self.memory.lock()?;
            let slot = memory
                .get(&id)
                .ok_or(DispatchError::UnknownBuffer { buffer: id })?;
            (slot.bytes().to_vec(), slot.usage)
        };
        if usage == BufferUsage::Storage {
            self.access(id, AccessDescriptor::new(PipelineStage::Host, MemoryAccess::READ))?;
        }
        Ok(bytes)
    }

    fn submit(&self, commands: Vec<Command>, fence: Option<Fence>) -> DispatchResult<()> {
        for command in &commands {
            match command {
                Command::Dispatch(dispatch) => {
                    if let Err(err) = self.execute(dispatch) {
                        log::error!("{}: {err}", dispatch.kernel.name());
                        return Err(err);
                    }
                }
                Command::Barrier(transitions) => self.cover(transitions)?,
            }
        }
        if let Some(fence) = fence {
            fence.signal();
        }
        Ok(())
    }

    fn wait_idle(&self) -> DispatchResult<()> {
        Ok(())
    }
}

impl core::fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostDevice")
            .field("info", &self.info)
            .field("precision", &self.precision)
            .field("validate", &self.validate)
            .finish_non_exhaustive()
    }
}
