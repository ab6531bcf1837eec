//! Error types for kernel dispatch.
//!
//! Every fallible operation in this crate returns [`DispatchResult`]. The
//! variants fall into four broad kinds (see [`ErrorKind`]): precondition
//! violations reported straight to the caller, lookups that found nothing,
//! contract mismatches between a caller and a kernel, and device failures
//! that surface at the next synchronization point. Nothing here is retried.

use crate::api::BufferId;
use crate::backend::Backend;

/// Coarse classification of a [`DispatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller handed over something the operation cannot work on.
    PreconditionViolation,
    /// A kernel or operator name did not resolve.
    Lookup,
    /// Arguments, layouts or work-group sizes disagree with what a kernel declares.
    ContractMismatch,
    /// The device (or its emulation) reported a fatal error.
    DeviceFailure,
}

/// Errors that can occur while preparing or executing a dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Operating on storage that is not device resident, and similar.
    #[error("precondition violated: {message}")]
    PreconditionViolation { message: String },

    /// The kernel registry has no program under this name.
    #[error("kernel '{name}' is not registered")]
    KernelNotFound { name: String },

    /// Work-group sizing or scalar arguments are out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Bound arguments do not match the kernel's declared signature.
    #[error("argument mismatch for kernel '{kernel}': {message}")]
    ArgumentMismatch { kernel: String, message: String },

    /// A storage access needed a pipeline barrier that was never recorded.
    #[error("missing pipeline barrier on {buffer}: {message}")]
    MissingBarrier { buffer: BufferId, message: String },

    /// A handle referenced a buffer the device does not own (anymore).
    #[error("unknown device buffer {buffer}")]
    UnknownBuffer { buffer: BufferId },

    /// Allocation, queue or mapping failure.
    #[error("device failure: {message}")]
    DeviceFailure { message: String },

    /// No operator implementation is registered for the backend.
    #[error("operator '{op}' has no implementation for backend {backend:?}")]
    NoImplementation { op: String, backend: Backend },
}

impl DispatchError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionViolation {
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn argument_mismatch(kernel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArgumentMismatch {
            kernel: kernel.into(),
            message: message.into(),
        }
    }

    pub fn device(message: impl Into<String>) -> Self {
        Self::DeviceFailure {
            message: message.into(),
        }
    }

    /// Returns the broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PreconditionViolation { .. } => ErrorKind::PreconditionViolation,
            Self::KernelNotFound { .. } | Self::NoImplementation { .. } => ErrorKind::Lookup,
            Self::InvalidArgument { .. } | Self::ArgumentMismatch { .. } => {
                ErrorKind::ContractMismatch
            }
            Self::MissingBarrier { .. } | Self::UnknownBuffer { .. } | Self::DeviceFailure { .. } => {
                ErrorKind::DeviceFailure
            }
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for DispatchError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::device(format!("lock poisoned: {err}"))
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = core::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            DispatchError::precondition("x").kind(),
            ErrorKind::PreconditionViolation
        );
        assert_eq!(
            DispatchError::KernelNotFound { name: "nope".into() }.kind(),
            ErrorKind::Lookup
        );
        assert_eq!(
            DispatchError::invalid_argument("x").kind(),
            ErrorKind::ContractMismatch
        );
        assert_eq!(
            DispatchError::argument_mismatch("k", "x").kind(),
            ErrorKind::ContractMismatch
        );
        assert_eq!(DispatchError::device("x").kind(), ErrorKind::DeviceFailure);
    }

    #[test]
    fn messages_name_the_kernel() {
        let err = DispatchError::KernelNotFound {
            name: "uniform_".into(),
        };
        assert_eq!(err.to_string(), "kernel 'uniform_' is not registered");
    }
}
