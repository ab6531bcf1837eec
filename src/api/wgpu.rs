//! GPU compute device using WGPU.
//!
//! [`WgpuDevice`] runs the built-in kernels' WGSL programs on the default
//! adapter. Initialization is synchronous (`pollster`), as is every host
//! read-back; submissions are not.
//!
//! # Internals
//!
//! - One shader module, bind group layout and pipeline layout per kernel,
//!   built at construction.
//! - Compute pipelines are specialized per local work-group size through the
//!   WGSL overridable constants `wg_x`, `wg_y`, `wg_z` (and
//!   `reduced_precision` where a shader declares it) and cached by
//!   `(kernel, local)`.
//! - A submitted batch is encoded into one command buffer. A dispatch
//!   carrying transitions, or a standalone barrier command, closes the current
//!   compute pass, so dependent dispatches never share a pass with what they
//!   depend on.
//! - Validation errors raised while encoding a batch are captured with an
//!   error scope and returned as [`DispatchError::DeviceFailure`] instead of
//!   reaching wgpu's default panicking handler.

use crate::api::command::{Command, Dispatch, Fence};
use crate::api::device::{ComputeDevice, DeviceInfo};
use crate::api::kernel::{ArgKind, KernelSignature};
use crate::api::resource::{BufferId, BufferUsage};
use crate::api::workgroup::{DeviceLimits, UVec3};
use crate::backend::Backend;
use crate::config::Precision;
use crate::error::{DispatchError, DispatchResult};
use crate::kernels::{self, BuiltinKernel};
use ::wgpu::{BindGroupLayoutEntry, BindingType, BufferBindingType, ShaderStages};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

fn storage_entry(binding: u32, read_only: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Basic sanity checks on embedded WGSL before handing it to the driver.
fn check_wgsl(name: &str, source: &str) -> DispatchResult<()> {
    if source.len() > 65_536 || !source.contains("fn main") {
        return Err(DispatchError::device(format!(
            "{name}: WGSL source has no `main` entry point or is oversized"
        )));
    }
    for axis in ["wg_x", "wg_y", "wg_z"] {
        if !source.contains(&format!("override {axis}")) {
            return Err(DispatchError::device(format!(
                "{name}: WGSL source does not declare `override {axis}`"
            )));
        }
    }
    Ok(())
}

struct Program {
    kernel: &'static BuiltinKernel,
    module: ::wgpu::ShaderModule,
    bind_group_layout: ::wgpu::BindGroupLayout,
    pipeline_layout: ::wgpu::PipelineLayout,
}

struct GpuBuffer {
    buffer: ::wgpu::Buffer,
    size: u64,
}

/// A [`ComputeDevice`] backed by a `wgpu` adapter.
pub struct WgpuDevice {
    info: DeviceInfo,
    device: ::wgpu::Device,
    queue: ::wgpu::Queue,
    precision: Precision,
    programs: HashMap<&'static str, Program>,
    pipelines: Mutex<HashMap<(&'static str, UVec3), ::wgpu::ComputePipeline>>,
    buffers: Mutex<HashMap<BufferId, GpuBuffer>>,
    next_id: AtomicU64,
}

impl WgpuDevice {
    /// Opens the default adapter and compiles every built-in kernel.
    ///
    /// # Errors
    /// [`DispatchError::DeviceFailure`] if no adapter or device is available,
    /// or a shader fails its sanity checks.
    pub fn new(precision: Precision) -> DispatchResult<Self> {
        let instance = ::wgpu::Instance::default();
        let adapter = pollster::block_on(
            instance.request_adapter(&::wgpu::RequestAdapterOptions::default()),
        )
        .map_err(|e| DispatchError::device(format!("adapter request failed: {e}")))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&::wgpu::DeviceDescriptor {
            label: Some("briny_dispatch"),
            required_features: ::wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: ::wgpu::MemoryHints::Performance,
            trace: ::wgpu::Trace::default(),
        }))
        .map_err(|e| DispatchError::device(format!("device request failed: {e}")))?;

        let limits = device.limits();
        let info = DeviceInfo {
            name: adapter.get_info().name,
            backend: Backend::Wgpu,
            limits: DeviceLimits {
                max_workgroup_size: [
                    limits.max_compute_workgroup_size_x,
                    limits.max_compute_workgroup_size_y,
                    limits.max_compute_workgroup_size_z,
                ],
                max_invocations: limits.max_compute_invocations_per_workgroup,
                max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
                preferred_width: if limits.min_subgroup_size > 0 {
                    limits.min_subgroup_size
                } else {
                    32
                },
            },
        };
        log::info!("wgpu adapter '{}': {:?}", info.name, info.limits);

        let mut programs = HashMap::new();
        for kernel in kernels::builtin() {
            check_wgsl(kernel.name, kernel.wgsl)?;
            let module = device.create_shader_module(::wgpu::ShaderModuleDescriptor {
                label: Some(kernel.name),
                source: ::wgpu::ShaderSource::Wgsl(kernel.wgsl.into()),
            });
            let entries: Vec<_> = kernel
                .args
                .iter()
                .enumerate()
                .map(|(slot, kind)| match kind {
                    ArgKind::ReadOnlyStorage => storage_entry(slot as u32, true),
                    ArgKind::WritableStorage => storage_entry(slot as u32, false),
                    ArgKind::Uniform => uniform_entry(slot as u32),
                })
                .collect();
            let bind_group_layout =
                device.create_bind_group_layout(&::wgpu::BindGroupLayoutDescriptor {
                    label: Some(kernel.name),
                    entries: &entries,
                });
            let pipeline_layout = device.create_pipeline_layout(&::wgpu::PipelineLayoutDescriptor {
                label: Some(kernel.name),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
            programs.insert(
                kernel.name,
                Program {
                    kernel,
                    module,
                    bind_group_layout,
                    pipeline_layout,
                },
            );
        }

        Ok(Self {
            info,
            device,
            queue,
            precision,
            programs,
            pipelines: Mutex::new(HashMap::new()),
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn program(&self, name: &str) -> DispatchResult<&Program> {
        self.programs
            .get(name)
            .ok_or_else(|| DispatchError::KernelNotFound {
                name: name.to_string(),
            })
    }

    fn pipeline(&self, name: &'static str, local: UVec3) -> DispatchResult<::wgpu::ComputePipeline> {
        let mut cache = self.pipelines.lock()?;
        if let Some(pipeline) = cache.get(&(name, local)) {
            return Ok(pipeline.clone());
        }
        let program = self.program(name)?;
        let mut constants = vec![
            ("wg_x", f64::from(local[0])),
            ("wg_y", f64::from(local[1])),
            ("wg_z", f64::from(local[2])),
        ];
        if program.kernel.wgsl.contains("override reduced_precision") {
            let reduced = self.precision == Precision::Reduced;
            constants.push(("reduced_precision", if reduced { 1.0 } else { 0.0 }));
        }
        log::debug!("compiling {name} pipeline for local size {local:?}");
        let pipeline = self
            .device
            .create_compute_pipeline(&::wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: Some(&program.pipeline_layout),
                module: &program.module,
                entry_point: Some("main"),
                compilation_options: ::wgpu::PipelineCompilationOptions {
                    constants: &constants,
                    zero_initialize_workgroup_memory: false,
                },
                cache: None,
            });
        cache.insert((name, local), pipeline.clone());
        Ok(pipeline)
    }

    fn bind_group(&self, dispatch: &Dispatch) -> DispatchResult<::wgpu::BindGroup> {
        let program = self.program(dispatch.kernel.name())?;
        let buffers = self.buffers.lock()?;
        let bound = dispatch
            .args
            .iter()
            .map(|arg| {
                let id = arg.buffer().id();
                buffers
                    .get(&id)
                    .map(|b| b.buffer.clone())
                    .ok_or(DispatchError::UnknownBuffer { buffer: id })
            })
            .collect::<DispatchResult<Vec<_>>>()?;
        let entries: Vec<_> = bound
            .iter()
            .enumerate()
            .map(|(slot, buffer)| ::wgpu::BindGroupEntry {
                binding: slot as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        Ok(self.device.create_bind_group(&::wgpu::BindGroupDescriptor {
            label: Some(dispatch.kernel.name()),
            layout: &program.bind_group_layout,
            entries: &entries,
        }))
    }

    fn encode(&self, commands: &[Command]) -> DispatchResult<::wgpu::CommandBuffer> {
        let mut encoder = self
            .device
            .create_command_encoder(&::wgpu::CommandEncoderDescriptor {
                label: Some("briny_dispatch batch"),
            });
        let mut pass: Option<::wgpu::ComputePass<'static>> = None;
        for command in commands {
            match command {
                Command::Barrier(_) => pass = None,
                Command::Dispatch(dispatch) => {
                    if !dispatch.transitions.is_empty() {
                        pass = None;
                    }
                    let pipeline = self.pipeline(dispatch.kernel.name(), dispatch.local)?;
                    let bind_group = self.bind_group(dispatch)?;
                    let pass = pass.get_or_insert_with(|| {
                        encoder
                            .begin_compute_pass(&::wgpu::ComputePassDescriptor {
                                label: Some("briny_dispatch"),
                                timestamp_writes: None,
                            })
                            .forget_lifetime()
                    });
                    pass.set_pipeline(&pipeline);
                    pass.set_bind_group(0, &bind_group, &[]);
                    let [x, y, z] = dispatch.groups;
                    pass.dispatch_workgroups(x, y, z);
                }
            }
        }
        drop(pass);
        Ok(encoder.finish())
    }

    fn buffer(&self, id: BufferId) -> DispatchResult<(::wgpu::Buffer, u64)> {
        self.buffers
            .lock()?
            .get(&id)
            .map(|b| (b.buffer.clone(), b.size))
            .ok_or(DispatchError::UnknownBuffer { buffer: id })
    }

    fn poll_wait(&self) -> DispatchResult<()> {
        self.device
            .poll(::wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| DispatchError::device(format!("poll failed: {e}")))
    }
}

impl ComputeDevice for WgpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn kernels(&self) -> Vec<KernelSignature> {
        self.programs.values().map(|p| p.kernel.signature()).collect()
    }

    fn allocate(&self, size: u64, usage: BufferUsage) -> DispatchResult<BufferId> {
        let (padded, usages) = match usage {
            BufferUsage::Storage => (
                size.max(4).next_multiple_of(4),
                ::wgpu::BufferUsages::STORAGE
                    | ::wgpu::BufferUsages::COPY_SRC
                    | ::wgpu::BufferUsages::COPY_DST,
            ),
            BufferUsage::Uniform => (
                size.max(16).next_multiple_of(16),
                ::wgpu::BufferUsages::UNIFORM | ::wgpu::BufferUsages::COPY_DST,
            ),
        };
        let buffer = self.device.create_buffer(&::wgpu::BufferDescriptor {
            label: Some(match usage {
                BufferUsage::Storage => "storage",
                BufferUsage::Uniform => "uniform",
            }),
            size: padded,
            usage: usages,
            mapped_at_creation: false,
        });
        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.buffers.lock()?.insert(id, GpuBuffer { buffer, size });
        Ok(id)
    }

    fn release(&self, id: BufferId) {
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.remove(&id);
        }
    }

    fn write(&self, id: BufferId, bytes: &[u8]) -> DispatchResult<()> {
        let (buffer, size) = self.buffer(id)?;
        if bytes.len() as u64 > size {
            return Err(DispatchError::device(format!(
                "write of {} bytes into {id} of {size} bytes",
                bytes.len()
            )));
        }
        if bytes.len() % 4 == 0 {
            self.queue.write_buffer(&buffer, 0, bytes);
        } else {
            let mut padded = bytes.to_vec();
            padded.resize(bytes.len().next_multiple_of(4), 0);
            self.queue.write_buffer(&buffer, 0, &padded);
        }
        Ok(())
    }

    fn read(&self, id: BufferId) -> DispatchResult<Vec<u8>> {
        let (buffer, size) = self.buffer(id)?;
        let padded = buffer.size();
        let staging = self.device.create_buffer(&::wgpu::BufferDescriptor {
            label: Some("read-back"),
            size: padded,
            usage: ::wgpu::BufferUsages::MAP_READ | ::wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&::wgpu::CommandEncoderDescriptor {
                label: Some("read-back"),
            });
        encoder.copy_buffer_to_buffer(&buffer, 0, &staging, 0, padded);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(::wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.poll_wait()?;
        rx.recv()
            .map_err(|e| DispatchError::device(format!("read-back callback dropped: {e}")))?
            .map_err(|e| DispatchError::device(format!("read-back mapping failed: {e}")))?;

        let mut bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        bytes.truncate(size as usize);
        Ok(bytes)
    }

    fn submit(&self, commands: Vec<Command>, fence: Option<Fence>) -> DispatchResult<()> {
        self.device.push_error_scope(::wgpu::ErrorFilter::Validation);
        let encoded = self.encode(&commands).map(|buffer| {
            log::trace!("submitting {} commands", commands.len());
            self.queue.submit(Some(buffer));
        });
        let scope = pollster::block_on(self.device.pop_error_scope());
        encoded?;
        if let Some(error) = scope {
            return Err(DispatchError::device(error.to_string()));
        }
        if let Some(fence) = fence {
            self.queue.on_submitted_work_done(move || fence.signal());
        }
        Ok(())
    }

    fn wait_idle(&self) -> DispatchResult<()> {
        self.poll_wait()
    }
}
