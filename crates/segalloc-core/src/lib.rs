//! # segalloc-core
//!
//! Segregated-fit boundary-tag allocator over a single growable arena.
//!
//! Blocks carry a size/state tag at both ends, so either neighbour of a block
//! can be inspected in O(1) and released blocks coalesce immediately. Free
//! blocks are threaded onto one of [`NUM_BUCKETS`] doubly linked lists by
//! power-of-two size class, with sentinel nodes living in the arena itself.
//! The arena only ever grows, and only by what a request actually lacks.
//!
//! Pointers handed out are [`BlockPtr`] offsets into the arena; payload bytes
//! are reached through [`SegAllocator::payload`] and
//! [`SegAllocator::payload_mut`]. No `unsafe` code is permitted; the
//! workspace lint table denies it.

pub mod allocator;
pub mod arena;
pub mod block;
pub mod check;
pub mod config;
pub mod dump;
pub mod error;
pub mod free_list;
pub mod log;
pub mod size_class;
pub mod sync;

pub use allocator::SegAllocator;
pub use arena::{Arena, VecArena};
pub use check::{BlockReport, InvariantViolation};
pub use config::{AllocatorConfig, SafetyLevel};
pub use dump::{BlockInfo, HeapDump, HeapStats};
pub use error::{AllocError, ArenaError};
pub use log::{AllocatorLogLevel, AllocatorLogRecord};
pub use size_class::{NUM_BUCKETS, bucket_of};
pub use sync::SharedAllocator;

/// Payload offset of an allocation inside the arena.
///
/// Always a multiple of 8. Only meaningful for the allocator that returned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPtr(pub(crate) usize);

impl BlockPtr {
    /// Byte offset of the payload within the arena.
    #[must_use]
    pub const fn offset(self) -> usize {
        self.0
    }

    /// Rebuilds a pointer from a raw offset. Under
    /// [`SafetyLevel::Hardened`] the allocator validates it before use.
    #[must_use]
    pub const fn from_offset(offset: usize) -> Self {
        Self(offset)
    }
}
