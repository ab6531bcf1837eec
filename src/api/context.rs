//! The submission engine.
//!
//! [`Context::submit_compute_job`] validates a dispatch against the kernel
//! registry and the device limits, then appends it to a pending batch. The
//! batch goes to the device queue lazily: when it reaches
//! [`ContextConfig::max_pending_dispatches`], when a fence is attached, or at
//! any synchronization point (`flush`, `wait`, `finish`, uploads and
//! read-backs).
//!
//! # Failure model
//!
//! Validation failures are returned from `submit_compute_job` and nothing is
//! enqueued. A device failure during a lazy flush cannot be attributed to the
//! call that happened to trigger it, so it is kept and returned by the next
//! synchronization point instead.

use crate::api::barrier::PipelineBarrier;
use crate::api::command::{Command, Dispatch, Fence};
use crate::api::device::{ComputeDevice, DeviceInfo};
use crate::api::host::HostDevice;
use crate::api::kernel::{KernelArg, KernelId, KernelRegistry};
use crate::api::resource::{Buffer, BufferUsage};
use crate::api::workgroup::{DeviceLimits, UVec3, adaptive_work_group_size, group_count};
use crate::config::{ContextConfig, Precision};
use crate::error::{DispatchError, DispatchResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Counters describing what a context has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    /// Dispatches accepted by `submit_compute_job`.
    pub dispatches: u64,
    /// Batches handed to the device.
    pub flushes: u64,
    /// Commands handed to the device, barriers included.
    pub commands_submitted: u64,
}

#[derive(Default)]
struct Batch {
    commands: Vec<Command>,
    dispatches: usize,
}

/// Command accumulator in front of one device queue.
pub struct Context {
    device: Arc<dyn ComputeDevice>,
    registry: KernelRegistry,
    config: ContextConfig,
    batch: Mutex<Batch>,
    deferred: Mutex<Option<DispatchError>>,
    seeds: AtomicU64,
    dispatches: AtomicU64,
    flushes: AtomicU64,
    submitted: AtomicU64,
}

impl Context {
    /// Wraps `device`; the kernel registry is whatever the device can run.
    pub fn new(device: Arc<dyn ComputeDevice>, config: ContextConfig) -> Arc<Self> {
        let registry = KernelRegistry::from_signatures(device.kernels());
        log::info!(
            "compute context on '{}' ({:?}): {} kernels, {:?} precision, batches of {}",
            device.info().name,
            device.info().backend,
            registry.len(),
            config.precision,
            config.max_pending_dispatches,
        );
        Arc::new(Self {
            device,
            registry,
            config,
            batch: Mutex::new(Batch::default()),
            deferred: Mutex::new(None),
            seeds: AtomicU64::new(0),
            dispatches: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
        })
    }

    /// A context on a fresh host-emulated device.
    pub fn host(config: ContextConfig) -> Arc<Self> {
        let device: Arc<dyn ComputeDevice> = Arc::new(HostDevice::new(&config));
        Self::new(device, config)
    }

    /// A context on the default GPU adapter.
    #[cfg(feature = "wgpu")]
    pub fn wgpu(config: ContextConfig) -> DispatchResult<Arc<Self>> {
        let device: Arc<dyn ComputeDevice> =
            Arc::new(crate::api::wgpu::WgpuDevice::new(config.precision)?);
        Ok(Self::new(device, config))
    }

    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }

    pub fn info(&self) -> &DeviceInfo {
        self.device.info()
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.device.info().limits
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn precision(&self) -> Precision {
        self.config.precision
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            commands_submitted: self.submitted.load(Ordering::Relaxed),
        }
    }

    /// Dispatches recorded but not yet handed to the device.
    pub fn pending_dispatches(&self) -> usize {
        self.batch.lock().map(|b| b.dispatches).unwrap_or(0)
    }

    /// Next value of the per-dispatch seed stream.
    pub fn next_seed(&self) -> u32 {
        let n = self.seeds.fetch_add(1, Ordering::Relaxed);
        let mut z = self.config.seed.wrapping_add(n.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        (z ^ (z >> 31)) as u32
    }

    /// Local work-group size for `global` on this context's device.
    pub fn adaptive_work_group_size(&self, global: UVec3) -> UVec3 {
        adaptive_work_group_size(global, self.limits())
    }

    pub(crate) fn allocate(&self, size: u64, usage: BufferUsage) -> DispatchResult<Buffer> {
        Buffer::allocate(&self.device, size, usage)
    }

    /// Records one dispatch of `kernel`.
    ///
    /// `barrier` is consumed. `args` must match the kernel's declared slots
    /// in order. With a `fence`, the batch is flushed right away and the
    /// fence signals once it has executed; otherwise the call returns as soon
    /// as the dispatch is recorded.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::KernelNotFound`] if the registry has no such kernel
    /// - [`DispatchError::InvalidArgument`] if `local` is incompatible with
    ///   `global` or the device limits
    /// - [`DispatchError::ArgumentMismatch`] if `args` do not fit the signature
    ///
    /// In every error case nothing is enqueued.
    pub fn submit_compute_job(
        &self,
        kernel: KernelId,
        barrier: PipelineBarrier,
        global: UVec3,
        local: UVec3,
        fence: Option<&Fence>,
        args: &[KernelArg],
    ) -> DispatchResult<()> {
        let handle = self.registry.lookup(kernel)?;
        self.validate_work_group(handle.name(), global, local)?;
        handle.signature().check(args)?;

        let transitions = barrier.into_transitions();
        let command = if global.contains(&0) {
            log::trace!("{}: empty extents {global:?}, nothing to dispatch", handle.name());
            (!transitions.is_empty()).then_some(Command::Barrier(transitions))
        } else {
            let groups = group_count(global, local);
            log::trace!(
                "{}: global {global:?} local {local:?} groups {groups:?}, {} transitions",
                handle.name(),
                transitions.len()
            );
            Some(Command::Dispatch(Dispatch {
                kernel: handle,
                transitions,
                global,
                local,
                groups,
                args: args.to_vec(),
            }))
        };

        let should_flush = {
            let mut batch = self.batch.lock()?;
            if let Some(command) = command {
                if matches!(command, Command::Dispatch(_)) {
                    batch.dispatches += 1;
                    self.dispatches.fetch_add(1, Ordering::Relaxed);
                }
                batch.commands.push(command);
            }
            fence.is_some() || batch.dispatches >= self.config.max_pending_dispatches
        };

        if should_flush {
            if let Err(err) = self.submit_pending(fence.cloned()) {
                self.defer(err);
            }
        }
        Ok(())
    }

    /// Hands the pending batch to the device.
    pub fn flush(&self) -> DispatchResult<()> {
        self.take_deferred()?;
        self.submit_pending(None)
    }

    /// Flushes and blocks until `fence` has signaled.
    pub fn wait(&self, fence: &Fence) -> DispatchResult<()> {
        self.flush()?;
        if fence.is_signaled() {
            return Ok(());
        }
        self.device.wait_idle()?;
        if fence.is_signaled() {
            Ok(())
        } else {
            Err(DispatchError::device(
                "fence was not attached to any submission",
            ))
        }
    }

    /// Flushes and blocks until the device is idle.
    pub fn finish(&self) -> DispatchResult<()> {
        self.flush()?;
        self.device.wait_idle()
    }

    /// Host write into `buffer` after honoring `barrier`.
    pub(crate) fn upload(
        &self,
        barrier: PipelineBarrier,
        buffer: &Buffer,
        bytes: &[u8],
    ) -> DispatchResult<()> {
        self.record_barrier(barrier)?;
        self.flush()?;
        self.device.write(buffer.id(), bytes)
    }

    /// Synchronizing read of `buffer` after honoring `barrier`.
    pub(crate) fn download(&self, barrier: PipelineBarrier, buffer: &Buffer) -> DispatchResult<Vec<u8>> {
        self.record_barrier(barrier)?;
        self.flush()?;
        self.device.read(buffer.id())
    }

    fn record_barrier(&self, barrier: PipelineBarrier) -> DispatchResult<()> {
        if !barrier.is_empty() {
            self.batch
                .lock()?
                .commands
                .push(Command::Barrier(barrier.into_transitions()));
        }
        Ok(())
    }

    fn validate_work_group(&self, kernel: &str, global: UVec3, local: UVec3) -> DispatchResult<()> {
        let limits = self.limits();
        for axis in 0..3 {
            if local[axis] == 0 {
                return Err(DispatchError::invalid_argument(format!(
                    "{kernel}: local size {local:?} has an empty axis"
                )));
            }
            if local[axis] > limits.max_workgroup_size[axis] {
                return Err(DispatchError::invalid_argument(format!(
                    "{kernel}: local size {local:?} exceeds the device maximum {:?}",
                    limits.max_workgroup_size
                )));
            }
            if local[axis] > global[axis].max(1) {
                return Err(DispatchError::invalid_argument(format!(
                    "{kernel}: local size {local:?} exceeds global size {global:?}"
                )));
            }
        }
        let invocations: u64 = local.iter().map(|&v| u64::from(v)).product();
        if invocations > u64::from(limits.max_invocations) {
            return Err(DispatchError::invalid_argument(format!(
                "{kernel}: {invocations} invocations per group, device allows {}",
                limits.max_invocations
            )));
        }
        let groups = group_count(global, local);
        if groups.iter().any(|&g| g > limits.max_workgroups_per_dimension) {
            return Err(DispatchError::invalid_argument(format!(
                "{kernel}: {groups:?} groups, device allows {} per axis",
                limits.max_workgroups_per_dimension
            )));
        }
        Ok(())
    }

    fn submit_pending(&self, fence: Option<Fence>) -> DispatchResult<()> {
        let mut batch = self.batch.lock()?;
        if batch.commands.is_empty() && fence.is_none() {
            return Ok(());
        }
        let commands = std::mem::take(&mut batch.commands);
        batch.dispatches = 0;
        log::debug!(
            "flushing {} commands to '{}'{}",
            commands.len(),
            self.info().name,
            if fence.is_some() { " with fence" } else { "" }
        );
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.submitted
            .fetch_add(commands.len() as u64, Ordering::Relaxed);
        // the lock is held so batches reach the queue in recording order
        self.device.submit(commands, fence)
    }

    fn take_deferred(&self) -> DispatchResult<()> {
        match self.deferred.lock()?.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn defer(&self, err: DispatchError) {
        log::warn!("deferred device failure: {err}");
        if let Ok(mut slot) = self.deferred.lock() {
            slot.get_or_insert(err);
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(err) = self.submit_pending(None) {
            log::error!("dropping context with unsubmitted work: {err}");
        }
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.info().name)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
