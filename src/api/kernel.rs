//! Kernel identifiers, signatures and lookup.

use crate::api::barrier::MemoryAccess;
use crate::api::resource::{Buffer, StorageHandle};
use crate::error::{DispatchError, DispatchResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Symbolic name of a precompiled kernel. See the [`kernel!`](crate::kernel) macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId(&'static str);

impl KernelId {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub const fn name(self) -> &'static str {
        self.0
    }
}

/// Declared kind of one binding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Storage the kernel only reads.
    ReadOnlyStorage,
    /// Storage the kernel writes (and may read).
    WritableStorage,
    /// A parameter block.
    Uniform,
}

/// A kernel's name and its ordered binding slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    pub name: &'static str,
    pub args: Vec<ArgKind>,
}

impl KernelSignature {
    pub fn new(name: &'static str, args: impl Into<Vec<ArgKind>>) -> Self {
        Self {
            name,
            args: args.into(),
        }
    }

    /// Checks that `args` bind every slot with a compatible argument.
    pub fn check(&self, args: &[KernelArg]) -> DispatchResult<()> {
        if args.len() != self.args.len() {
            return Err(DispatchError::argument_mismatch(
                self.name,
                format!("expected {} arguments, got {}", self.args.len(), args.len()),
            ));
        }
        for (slot, (kind, arg)) in self.args.iter().zip(args).enumerate() {
            let ok = match (kind, arg) {
                (ArgKind::ReadOnlyStorage, KernelArg::Storage(h)) => h.access == MemoryAccess::READ,
                (ArgKind::WritableStorage, KernelArg::Storage(h)) => h.access.writes(),
                (ArgKind::Uniform, KernelArg::Uniform(_)) => true,
                _ => false,
            };
            if !ok {
                return Err(DispatchError::argument_mismatch(
                    self.name,
                    format!("slot {slot} declared {kind:?}, bound {}", arg.describe()),
                ));
            }
        }
        Ok(())
    }
}

/// A resolved kernel, cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelHandle(Arc<KernelSignature>);

impl KernelHandle {
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    pub fn signature(&self) -> &KernelSignature {
        &self.0
    }
}

/// One bound kernel argument, in slot order.
#[derive(Debug, Clone)]
pub enum KernelArg {
    Storage(StorageHandle),
    Uniform(Buffer),
}

impl KernelArg {
    pub fn buffer(&self) -> &Buffer {
        match self {
            KernelArg::Storage(h) => &h.buffer,
            KernelArg::Uniform(b) => b,
        }
    }

    fn describe(&self) -> String {
        match self {
            KernelArg::Storage(h) => format!("storage with {:?} access", h.access),
            KernelArg::Uniform(_) => "a uniform block".to_string(),
        }
    }
}

impl From<StorageHandle> for KernelArg {
    fn from(handle: StorageHandle) -> Self {
        KernelArg::Storage(handle)
    }
}

/// Name-to-kernel map of everything a device can run.
#[derive(Debug, Clone, Default)]
pub struct KernelRegistry {
    kernels: HashMap<&'static str, KernelHandle>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_signatures(signatures: impl IntoIterator<Item = KernelSignature>) -> Self {
        let mut registry = Self::new();
        for signature in signatures {
            registry.register(signature);
        }
        registry
    }

    /// Adds a kernel, replacing any previous one of the same name.
    pub fn register(&mut self, signature: KernelSignature) {
        self.kernels
            .insert(signature.name, KernelHandle(Arc::new(signature)));
    }

    pub fn lookup(&self, id: KernelId) -> DispatchResult<KernelHandle> {
        self.kernels
            .get(id.name())
            .cloned()
            .ok_or_else(|| DispatchError::KernelNotFound {
                name: id.name().to_string(),
            })
    }

    pub fn contains(&self, id: KernelId) -> bool {
        self.kernels.contains_key(id.name())
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn lookup_unknown_is_lookup_error() {
        let registry = KernelRegistry::from_signatures([KernelSignature::new(
            "uniform_",
            [ArgKind::WritableStorage, ArgKind::Uniform],
        )]);
        assert!(registry.contains(KernelId::new("uniform_")));
        let err = registry.lookup(KernelId::new("gelu_")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lookup);
    }

    #[test]
    fn count_mismatch() {
        let signature = KernelSignature::new("copy_", [ArgKind::ReadOnlyStorage]);
        let err = signature.check(&[]).unwrap_err();
        assert!(err.to_string().contains("expected 1 arguments, got 0"));
    }
}
