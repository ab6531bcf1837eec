//! briny_dispatch: compute-kernel dispatch for elementwise tensor operators.
//!
//! Turns tensor-level calls into single kernel invocations on an explicitly
//! synchronized compute device, recording exactly the memory dependencies
//! each invocation needs and never blocking the host unless it asks for data.
//!
//! # Features
//!
//! - Device-resident tensor views that track their last access and emit
//!   pipeline barriers only for real hazards (RAW, WAR, WAW).
//! - Fixed-layout parameter blocks uploaded as uniform buffers.
//! - Adaptive work-group sizing from the device's limits.
//! - A batching submission context with lazy flushes and deferred device errors.
//! - A host-emulated device (always available) that validates barrier
//!   discipline, and a `wgpu` device behind the `wgpu` feature.
//! - `uniform_` and `rand_like` operators routed through an operator registry.
//!
//! # Modules
//!
//! - [`api`]: the dispatch machinery: views, barriers, params, sizer, context, devices.
//! - [`kernels`]: built-in kernels (signatures, parameter blocks, WGSL, host programs).
//! - [`ops`]: operators and the operator registry.
//! - [`tensors`]: the caller-facing [`Tensor`](tensors::Tensor) and factory options.
//! - [`config`]: [`ContextConfig`](config::ContextConfig) and precision profiles.
//! - [`backend`]: backend tags and the process-wide default.
//! - [`error`]: [`DispatchError`](error::DispatchError).
//!
//! # Example
//!
//! ```rust
//! use briny_dispatch::api::Context;
//! use briny_dispatch::config::{ContextConfig, Precision};
//! use briny_dispatch::ops::random::uniform_;
//! use briny_dispatch::tensors::Tensor;
//!
//! let context = Context::host(ContextConfig::default().with_precision(Precision::Reduced));
//! let mut t = Tensor::zeros(vec![8, 8]).to_device(&context).unwrap();
//! uniform_(&mut t, 2.0, 3.0, None).unwrap();
//! assert!(t.to_vec().unwrap().iter().all(|v| (2.0..3.0).contains(v)));
//! ```

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod kernels;
pub mod ops;
pub mod tensors;
