//! The growable byte region backing every block.
//!
//! [`Arena`] is the contract the allocator needs from its environment: a
//! contiguous buffer that only ever grows at the end, the way `sbrk` extends
//! the data segment. Growth either succeeds and returns the offset of the new
//! region, or fails without changing the buffer.

use crate::error::ArenaError;

/// Default arena limit (20 MiB).
pub const DEFAULT_HEAP_LIMIT: usize = 20 * (1 << 20);

/// A monotonically growing byte region.
pub trait Arena {
    /// Current length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];

    /// Extends the arena by `bytes` and returns the offset where the new
    /// region begins (the previous length). Never shrinks; on failure the
    /// arena is left untouched.
    fn grow(&mut self, bytes: usize) -> Result<usize, ArenaError>;
}

/// [`Arena`] backed by a `Vec<u8>` with a hard size limit that simulates
/// address-space exhaustion.
#[derive(Debug, Clone)]
pub struct VecArena {
    buf: Vec<u8>,
    limit: usize,
}

impl VecArena {
    /// Creates an empty arena limited to [`DEFAULT_HEAP_LIMIT`] bytes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HEAP_LIMIT)
    }

    /// Creates an empty arena that refuses to grow past `limit` bytes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for VecArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena for VecArena {
    fn len(&self) -> usize {
        self.buf.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    fn grow(&mut self, bytes: usize) -> Result<usize, ArenaError> {
        let len = self.buf.len();
        let exhausted = ArenaError::Exhausted {
            requested: bytes,
            len,
            limit: self.limit,
        };
        let new_len = len
            .checked_add(bytes)
            .filter(|&n| n <= self.limit)
            .ok_or_else(|| exhausted.clone())?;
        self.buf.try_reserve_exact(bytes).map_err(|_| exhausted)?;
        self.buf.resize(new_len, 0);
        Ok(len)
    }
}
