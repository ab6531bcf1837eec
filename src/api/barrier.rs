//! Access tracking and pipeline barriers.
//!
//! A [`PipelineBarrier`] collects the [`BufferTransition`]s that must be
//! honored before the next dispatch may touch its resources. Views append to
//! it when they hand out handles; the barrier is then moved into exactly one
//! submission, so it cannot leak into a later dispatch.

use crate::api::BufferId;
use core::fmt;
use core::ops::BitOr;

/// Pipeline stage at which a resource is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineStage {
    /// Not accessed yet.
    #[default]
    None,
    /// Compute shader execution.
    Compute,
    /// Copy/transfer commands.
    Transfer,
    /// Host reads and writes (uploads, read-back).
    Host,
}

/// Kind of memory access, a two-bit read/write set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryAccess(u8);

impl MemoryAccess {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const READ_WRITE: Self = Self(3);

    #[inline]
    pub const fn reads(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    #[inline]
    pub const fn writes(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is also set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MemoryAccess {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for MemoryAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            0 => "NONE",
            1 => "READ",
            2 => "WRITE",
            _ => "READ_WRITE",
        };
        f.write_str(name)
    }
}

/// A stage paired with an access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessDescriptor {
    pub stage: PipelineStage,
    pub access: MemoryAccess,
}

impl AccessDescriptor {
    /// The state of a resource nobody has touched.
    pub const UNUSED: Self = Self {
        stage: PipelineStage::None,
        access: MemoryAccess::NONE,
    };

    pub const fn new(stage: PipelineStage, access: MemoryAccess) -> Self {
        Self { stage, access }
    }

    /// Whether an access `next` following `self` needs a dependency.
    ///
    /// Read-after-read is free; any write on either side (RAW, WAR, WAW)
    /// requires the earlier access to complete and become visible first.
    pub const fn requires_barrier(&self, next: &AccessDescriptor) -> bool {
        if self.access.is_none() || next.access.is_none() {
            return false;
        }
        self.access.writes() || next.access.writes()
    }
}

/// One memory dependency on one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTransition {
    pub buffer: BufferId,
    pub src: AccessDescriptor,
    pub dst: AccessDescriptor,
}

/// Pending synchronization requirements for the next submission.
#[derive(Debug, Default, PartialEq, Eq)]
#[must_use = "a pipeline barrier only takes effect once it is submitted"]
pub struct PipelineBarrier {
    transitions: Vec<BufferTransition>,
}

impl PipelineBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transition. A second transition on the same buffer is
    /// merged: the earliest source and the union of destination accesses.
    pub fn record(&mut self, transition: BufferTransition) {
        if let Some(existing) = self
            .transitions
            .iter_mut()
            .find(|t| t.buffer == transition.buffer)
        {
            existing.dst.access = existing.dst.access | transition.dst.access;
            if existing.dst.stage == PipelineStage::None {
                existing.dst.stage = transition.dst.stage;
            }
            return;
        }
        self.transitions.push(transition);
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn transitions(&self) -> &[BufferTransition] {
        &self.transitions
    }

    /// Whether a transition targeting `buffer` has been recorded.
    pub fn covers(&self, buffer: BufferId) -> bool {
        self.transitions.iter().any(|t| t.buffer == buffer)
    }

    pub(crate) fn into_transitions(self) -> Vec<BufferTransition> {
        self.transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPUTE_READ: AccessDescriptor =
        AccessDescriptor::new(PipelineStage::Compute, MemoryAccess::READ);
    const COMPUTE_WRITE: AccessDescriptor =
        AccessDescriptor::new(PipelineStage::Compute, MemoryAccess::WRITE);

    #[test]
    fn hazards() {
        assert!(!COMPUTE_READ.requires_barrier(&COMPUTE_READ));
        assert!(COMPUTE_READ.requires_barrier(&COMPUTE_WRITE));
        assert!(COMPUTE_WRITE.requires_barrier(&COMPUTE_READ));
        assert!(COMPUTE_WRITE.requires_barrier(&COMPUTE_WRITE));
        assert!(!AccessDescriptor::UNUSED.requires_barrier(&COMPUTE_WRITE));
    }

    #[test]
    fn access_bits() {
        assert!(MemoryAccess::READ_WRITE.contains(MemoryAccess::WRITE));
        assert!(!MemoryAccess::READ.writes());
        assert_eq!(MemoryAccess::READ | MemoryAccess::WRITE, MemoryAccess::READ_WRITE);
        assert_eq!(format!("{:?}", MemoryAccess::WRITE), "WRITE");
    }

    #[test]
    fn same_buffer_transitions_merge() {
        let mut barrier = PipelineBarrier::new();
        let buffer = BufferId(7);
        barrier.record(BufferTransition {
            buffer,
            src: COMPUTE_WRITE,
            dst: COMPUTE_READ,
        });
        barrier.record(BufferTransition {
            buffer,
            src: COMPUTE_READ,
            dst: COMPUTE_WRITE,
        });
        assert_eq!(barrier.len(), 1);
        let t = barrier.transitions()[0];
        assert_eq!(t.src, COMPUTE_WRITE);
        assert_eq!(t.dst.access, MemoryAccess::READ_WRITE);
        assert!(barrier.covers(buffer));
        assert!(!barrier.covers(BufferId(8)));
    }
}
