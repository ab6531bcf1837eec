//! # Tensor operators
//!
//! Operators translate a tensor-level call into kernel dispatches through the
//! [`api`](crate::api) protocol.
//!
//! ## Submodules
//!
//! - [`random`]: `uniform_` (in-place fill) and `rand_like` (fill, then copy)
//! - [`copy`]: device-side [`clone_view`](copy::clone_view)
//! - [`dispatch`]: the `(operator, backend)` registry and the public entry points
//!
//! ## Adding an operator
//!
//! 1. Add a kernel under [`kernels`](crate::kernels): signature, parameter
//!    block, WGSL and host program
//! 2. Implement the operator here: one block, one [`UniformParamsBuffer`](crate::api::UniformParamsBuffer),
//!    one barrier, one access request per tensor, one submission
//! 3. Register it in [`dispatch::OpRegistry::with_builtin`]

pub mod copy;
pub mod dispatch;
pub mod random;
