//! Operation Dispatch Layer
//!
//! Operators are resolved through an [`OpRegistry`] keyed by operator name
//! and [`Backend`]. The registry is built once, on first use, and every entry
//! point looks up the implementation registered for the backend the tensor
//! lives on.
//!
//! # Registered operators
//!
//! | name | `Emulated` | `Wgpu` | `Cpu` |
//! |---|---|---|---|
//! | `aten::uniform_` | [`random::uniform_`] | [`random::uniform_`] | [`random::uniform_`] |
//! | `aten::rand_like` | [`random::rand_like`] | [`random::rand_like`] | [`random::rand_like`] |
//!
//! The `Cpu` entries exist so host tensors get the operators' own
//! precondition error. A backend without an entry fails with
//! [`DispatchError::NoImplementation`].
//!
//! # Example
//! ```rust
//! use briny_dispatch::api::Context;
//! use briny_dispatch::config::ContextConfig;
//! use briny_dispatch::ops::dispatch::{rand_like, uniform_};
//! use briny_dispatch::tensors::{Tensor, TensorOptions};
//!
//! let context = Context::host(ContextConfig::default());
//! let mut t = Tensor::zeros(vec![4, 4]).to_device(&context).unwrap();
//! uniform_(&mut t, -1.0, 1.0, None).unwrap();
//! let mut r = rand_like(&t, TensorOptions::default()).unwrap();
//! assert!(r.to_vec().unwrap().iter().all(|v| (0.0..1.0).contains(v)));
//! ```

use crate::backend::Backend;
use crate::error::{DispatchError, DispatchResult};
use crate::ops::random::{self, Generator};
use crate::tensors::{Tensor, TensorOptions};
use core::fmt;
use std::collections::HashMap;

pub const UNIFORM: &str = "aten::uniform_";
pub const RAND_LIKE: &str = "aten::rand_like";

pub type UniformFn =
    for<'t> fn(&'t mut Tensor, f64, f64, Option<&Generator>) -> DispatchResult<&'t mut Tensor>;
pub type RandLikeFn = fn(&Tensor, TensorOptions) -> DispatchResult<Tensor>;

/// A registered implementation, typed by operator shape.
#[derive(Clone, Copy)]
pub enum OpFn {
    Uniform(UniformFn),
    RandLike(RandLikeFn),
}

impl fmt::Debug for OpFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpFn::Uniform(_) => f.write_str("OpFn::Uniform"),
            OpFn::RandLike(_) => f.write_str("OpFn::RandLike"),
        }
    }
}

/// `operator → backend → implementation` table.
#[derive(Debug, Default)]
pub struct OpRegistry {
    table: HashMap<&'static str, HashMap<Backend, OpFn>>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in operator.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for backend in [Backend::Cpu, Backend::Emulated, Backend::Wgpu] {
            registry.register(UNIFORM, backend, OpFn::Uniform(random::uniform_));
            registry.register(RAND_LIKE, backend, OpFn::RandLike(random::rand_like));
        }
        registry
    }

    /// Adds an implementation, replacing any previous one.
    pub fn register(&mut self, op: &'static str, backend: Backend, f: OpFn) {
        self.table.entry(op).or_default().insert(backend, f);
    }

    pub fn resolve(&self, op: &str, backend: Backend) -> DispatchResult<OpFn> {
        self.table
            .get(op)
            .and_then(|backends| backends.get(&backend))
            .copied()
            .ok_or_else(|| DispatchError::NoImplementation {
                op: op.to_string(),
                backend,
            })
    }

    /// Number of `(operator, backend)` entries.
    pub fn len(&self) -> usize {
        self.table.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

lazy_static::lazy_static! {
    static ref OPERATORS: OpRegistry = OpRegistry::with_builtin();
}

/// The process-wide operator registry.
pub fn operators() -> &'static OpRegistry {
    &OPERATORS
}

fn shape_mismatch(op: &str, found: OpFn) -> DispatchError {
    DispatchError::argument_mismatch(op, format!("registered as {found:?}"))
}

/// Dispatches `uniform_` to the tensor's backend.
pub fn uniform_<'t>(
    tensor: &'t mut Tensor,
    from: f64,
    to: f64,
    generator: Option<&Generator>,
) -> DispatchResult<&'t mut Tensor> {
    match OPERATORS.resolve(UNIFORM, tensor.backend())? {
        OpFn::Uniform(f) => f(tensor, from, to, generator),
        other => Err(shape_mismatch(UNIFORM, other)),
    }
}

/// Dispatches `rand_like` to the reference tensor's backend.
pub fn rand_like(reference: &Tensor, options: TensorOptions) -> DispatchResult<Tensor> {
    match OPERATORS.resolve(RAND_LIKE, reference.backend())? {
        OpFn::RandLike(f) => f(reference, options),
        other => Err(shape_mismatch(RAND_LIKE, other)),
    }
}
