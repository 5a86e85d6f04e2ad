//! Error types for the allocator and its growth primitive.

use thiserror::Error;

/// Failure of the arena growth primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("arena exhausted: cannot grow {len} bytes by {requested} (limit {limit})")]
    Exhausted {
        requested: usize,
        len: usize,
        limit: usize,
    },
}

/// Errors reported by allocator operations.
///
/// `InvalidPointer` and `DoubleFree` are only produced under
/// [`SafetyLevel::Hardened`](crate::config::SafetyLevel::Hardened).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("out of memory: {0}")]
    OutOfMemory(#[from] ArenaError),
    #[error("request of {size} bytes does not fit in a block")]
    RequestTooLarge { size: usize },
    #[error("element count {count} x size {size} overflows")]
    SizeOverflow { count: usize, size: usize },
    #[error("arena already holds {len} bytes; the allocator needs an empty arena")]
    ArenaInUse { len: usize },
    #[error("pointer {ptr:#x} does not address a live allocation")]
    InvalidPointer { ptr: usize },
    #[error("pointer {ptr:#x} was already released")]
    DoubleFree { ptr: usize },
}
