//! Core allocator state.
//!
//! [`SegAllocator`] owns the arena, the sentinel-anchored free lists and the
//! lifecycle log. Allocation searches the segregated lists first-fit,
//! splitting blocks when the remainder is large enough to stand alone, and
//! grows the arena only by what the request actually lacks. Release coalesces
//! immediately with both boundary-tag neighbours. Resize grows in place by
//! absorbing a free successor (never the predecessor) or by extending the
//! last block, and otherwise moves the data.

use crate::arena::{Arena, VecArena};
use crate::block::{self, BlockState, MIN_BLOCK_SIZE, OVERHEAD, WORD};
use crate::config::AllocatorConfig;
use crate::error::{AllocError, ArenaError};
use crate::free_list::{self, FreeLists};
use crate::log::{AllocatorLogLevel, AllocatorLogRecord, HeapSnapshot, LifecycleLog};
use crate::size_class;
use crate::BlockPtr;

/// Which boundary-tag neighbours a released block merged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coalesce {
    None,
    Next,
    Prev,
    Both,
}

impl Coalesce {
    fn label(self) -> &'static str {
        match self {
            Self::None => "coalesce=none",
            Self::Next => "coalesce=next",
            Self::Prev => "coalesce=prev",
            Self::Both => "coalesce=both",
        }
    }
}

/// Segregated-fit allocator over a single growable arena.
pub struct SegAllocator<A: Arena = VecArena> {
    pub(crate) arena: A,
    pub(crate) lists: FreeLists,
    config: AllocatorConfig,
    log: LifecycleLog,
    live_blocks: usize,
    live_bytes: usize,
}

impl SegAllocator<VecArena> {
    /// Initializes an allocator over a [`VecArena`] with default settings.
    pub fn init() -> Result<Self, AllocError> {
        Self::with_config(AllocatorConfig::default())
    }

    /// Initializes an allocator over a [`VecArena`] bounded by
    /// `config.heap_limit`.
    pub fn with_config(config: AllocatorConfig) -> Result<Self, AllocError> {
        Self::new(VecArena::with_limit(config.heap_limit), config)
    }
}

impl<A: Arena> SegAllocator<A> {
    /// Lays out the prolog and epilog sentinels of every bucket in `arena`,
    /// which must be empty.
    pub fn new(mut arena: A, config: AllocatorConfig) -> Result<Self, AllocError> {
        if !arena.is_empty() {
            return Err(AllocError::ArenaInUse { len: arena.len() });
        }
        arena.grow(free_list::INITIAL_HEAP_SIZE)?;
        let lists = FreeLists::format(arena.bytes_mut());
        let mut allocator = Self {
            arena,
            lists,
            config,
            log: LifecycleLog::new(config.log_level),
            live_blocks: 0,
            live_bytes: 0,
        };
        allocator.record_lifecycle(
            AllocatorLogLevel::Info,
            "init",
            "init",
            None,
            Some(free_list::INITIAL_HEAP_SIZE),
            None,
            "success",
            format!("buckets={}", size_class::NUM_BUCKETS),
        );
        Ok(allocator)
    }

    /// Allocates a block with at least `size` usable bytes.
    ///
    /// Returns `Ok(None)` for `size == 0`. The payload offset is 8-byte
    /// aligned.
    pub fn allocate(&mut self, size: usize) -> Result<Option<BlockPtr>, AllocError> {
        let out = self.allocate_inner(size, "malloc");
        self.after_mutation();
        out
    }

    /// Allocates `count * size` bytes and zero-fills the payload.
    pub fn allocate_zeroed(
        &mut self,
        count: usize,
        size: usize,
    ) -> Result<Option<BlockPtr>, AllocError> {
        let Some(total) = count.checked_mul(size) else {
            self.record_lifecycle(
                AllocatorLogLevel::Warn,
                "calloc",
                "calloc_overflow",
                None,
                None,
                None,
                "denied",
                format!("count={count} size={size}"),
            );
            return Err(AllocError::SizeOverflow { count, size });
        };
        let out = self.allocate_inner(total, "calloc");
        if let Ok(Some(ptr)) = out {
            let usable = block::block_size(self.arena.bytes(), ptr.0) - OVERHEAD;
            self.arena.bytes_mut()[ptr.0..ptr.0 + usable].fill(0);
        }
        self.after_mutation();
        out
    }

    /// Returns a block to the free lists, merging it with free neighbours.
    pub fn release(&mut self, ptr: BlockPtr) -> Result<(), AllocError> {
        let out = self.release_inner(ptr, "free");
        self.after_mutation();
        out
    }

    /// Resizes the allocation at `ptr` to hold at least `size` bytes.
    ///
    /// `resize(None, n)` behaves like `allocate(n)`; `resize(Some(p), 0)`
    /// releases `p` and returns `None`. The first `min(old, new)` usable
    /// bytes are preserved whether or not the block moves.
    pub fn resize(
        &mut self,
        ptr: Option<BlockPtr>,
        size: usize,
    ) -> Result<Option<BlockPtr>, AllocError> {
        let out = self.resize_inner(ptr, size);
        self.after_mutation();
        out
    }

    /// Usable payload capacity of a live allocation.
    pub fn usable_size(&self, ptr: BlockPtr) -> Result<usize, AllocError> {
        if self.config.safety.validates_pointers() {
            self.validate_live(ptr)?;
        }
        Ok(block::block_size(self.arena.bytes(), ptr.0) - OVERHEAD)
    }

    /// Read view of a live allocation's usable payload.
    ///
    /// The pointer is always validated, whatever the safety level.
    pub fn payload(&self, ptr: BlockPtr) -> Result<&[u8], AllocError> {
        let usable = self.validate_live(ptr)? - OVERHEAD;
        Ok(&self.arena.bytes()[ptr.0..ptr.0 + usable])
    }

    /// Write view of a live allocation's usable payload.
    ///
    /// The pointer is always validated, whatever the safety level.
    pub fn payload_mut(&mut self, ptr: BlockPtr) -> Result<&mut [u8], AllocError> {
        let usable = self.validate_live(ptr)? - OVERHEAD;
        Ok(&mut self.arena.bytes_mut()[ptr.0..ptr.0 + usable])
    }

    /// Current arena length in bytes.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.arena.len()
    }

    /// Number of allocated blocks.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.live_blocks
    }

    /// Total size of allocated blocks, overhead included.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    #[must_use]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    #[must_use]
    pub fn arena(&self) -> &A {
        &self.arena
    }

    /// Returns a view of allocator lifecycle log records.
    #[must_use]
    pub fn lifecycle_logs(&self) -> &[AllocatorLogRecord] {
        self.log.records()
    }

    /// Drains allocator lifecycle log records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        self.log.drain()
    }

    /// Buffered lifecycle records as JSON lines.
    pub fn lifecycle_logs_jsonl(&self) -> serde_json::Result<String> {
        self.log.to_jsonl()
    }

    fn allocate_inner(
        &mut self,
        size: usize,
        symbol: &'static str,
    ) -> Result<Option<BlockPtr>, AllocError> {
        if size == 0 {
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                symbol,
                "zero_size",
                None,
                Some(0),
                None,
                "noop",
                "size_was_zero",
            );
            return Ok(None);
        }
        let asize = self.adjusted(size, symbol)?;

        if let Some(bp) = self.lists.find_fit(self.arena.bytes(), asize) {
            let heap = self.arena.bytes_mut();
            let found = block::block_size(heap, bp);
            self.lists.remove(heap, bp);
            let placed = self.place_split(bp, found, asize);
            self.note_allocated(placed);
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                symbol,
                "alloc",
                Some(bp),
                Some(asize),
                Some(size_class::bucket_of(found)),
                "success",
                if placed < found {
                    "path=split"
                } else {
                    "path=fit_hit"
                },
            );
            return Ok(Some(BlockPtr(bp)));
        }

        // No fit anywhere: extend the last block if it is free, otherwise
        // turn fresh arena space into a new block.
        let epilog = self.lists.epilog_header();
        let heap = self.arena.bytes();
        let (bp, absorb, path) = match block::tag_at(heap, epilog - WORD) {
            Some(last) if last.is_free() => (
                epilog + WORD - last.size,
                Some(epilog + WORD - last.size),
                "path=grow_extend_last",
            ),
            _ => (epilog + WORD, None, "path=grow_fresh"),
        };
        self.extend_tail(bp, asize, absorb, symbol)?;
        self.note_allocated(asize);
        self.record_lifecycle(
            AllocatorLogLevel::Trace,
            symbol,
            "alloc",
            Some(bp),
            Some(asize),
            None,
            "success",
            path,
        );
        Ok(Some(BlockPtr(bp)))
    }

    fn release_inner(&mut self, ptr: BlockPtr, symbol: &'static str) -> Result<(), AllocError> {
        if self.config.safety.validates_pointers() {
            self.validate_live_logged(ptr, symbol)?;
        }

        let heap = self.arena.bytes_mut();
        let mut bp = ptr.0;
        let freed = block::block_size(heap, bp);
        let mut size = freed;
        block::place(heap, bp, size, BlockState::Free);

        let prev = block::prev_tag(heap, bp).filter(|tag| tag.is_free());
        let next = block::tag_at(heap, block::header(bp + size)).filter(|tag| tag.is_free());
        let case = match (prev, next) {
            (Some(prev), Some(next)) => {
                self.lists.remove(heap, bp - prev.size);
                self.lists.remove(heap, bp + size);
                size += prev.size + next.size;
                bp -= prev.size;
                Coalesce::Both
            }
            (None, Some(next)) => {
                self.lists.remove(heap, bp + size);
                size += next.size;
                Coalesce::Next
            }
            (Some(prev), None) => {
                self.lists.remove(heap, bp - prev.size);
                size += prev.size;
                bp -= prev.size;
                Coalesce::Prev
            }
            (None, None) => Coalesce::None,
        };
        block::place(heap, bp, size, BlockState::Free);
        self.lists.insert(heap, bp, size);

        self.live_blocks = self.live_blocks.saturating_sub(1);
        self.live_bytes = self.live_bytes.saturating_sub(freed);
        self.record_lifecycle(
            AllocatorLogLevel::Trace,
            symbol,
            "free",
            Some(ptr.0),
            Some(size),
            Some(size_class::bucket_of(size)),
            "success",
            case.label(),
        );
        Ok(())
    }

    fn resize_inner(
        &mut self,
        ptr: Option<BlockPtr>,
        size: usize,
    ) -> Result<Option<BlockPtr>, AllocError> {
        let Some(ptr) = ptr else {
            let out = self.allocate_inner(size, "realloc")?;
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_null_as_malloc",
                out.map(BlockPtr::offset),
                Some(size),
                None,
                "success",
                "ptr_was_null",
            );
            return Ok(out);
        };
        if size == 0 {
            self.release_inner(ptr, "realloc")?;
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_zero_as_free",
                Some(ptr.0),
                Some(0),
                None,
                "freed",
                "new_size_was_zero",
            );
            return Ok(None);
        }
        if self.config.safety.validates_pointers() {
            self.validate_live_logged(ptr, "realloc")?;
        }
        let asize = self.adjusted(size, "realloc")?;

        let heap = self.arena.bytes();
        let bp = ptr.0;
        let current = block::block_size(heap, bp);
        let next_bp = bp + current;
        // Only the successor is ever absorbed. Pulling the predecessor in
        // would let a resize move the payload backwards.
        let (absorb, combined, is_last) = match block::header_tag(heap, next_bp) {
            None => (None, current, true),
            Some(next) if next.is_free() => (
                Some(next_bp),
                current + next.size,
                block::header_tag(heap, next_bp + next.size).is_none(),
            ),
            Some(_) => (None, current, false),
        };

        if combined >= asize {
            let heap = self.arena.bytes_mut();
            if let Some(free_bp) = absorb {
                self.lists.remove(heap, free_bp);
            }
            let placed = self.place_split(bp, combined, asize);
            self.live_bytes = (self.live_bytes + placed).saturating_sub(current);
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_in_place",
                Some(bp),
                Some(asize),
                None,
                "success",
                format!("old_size={current} new_size={placed}"),
            );
            return Ok(Some(ptr));
        }

        if is_last {
            self.extend_tail(bp, asize, absorb, "realloc")?;
            self.live_bytes = (self.live_bytes + asize).saturating_sub(current);
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_grow_in_place",
                Some(bp),
                Some(asize),
                None,
                "success",
                format!("old_size={current} absorbed={}", combined - current),
            );
            return Ok(Some(ptr));
        }

        let Some(moved) = self.allocate_inner(size, "realloc")? else {
            return Ok(None);
        };
        let copy = asize.min(current) - OVERHEAD;
        self.arena
            .bytes_mut()
            .copy_within(bp..bp + copy, moved.0);
        self.release_inner(ptr, "realloc")?;
        self.record_lifecycle(
            AllocatorLogLevel::Trace,
            "realloc",
            "realloc_move",
            Some(moved.0),
            Some(asize),
            None,
            "success",
            format!("old_ptr={bp:#x} old_size={current} copied={copy}"),
        );
        Ok(Some(moved))
    }

    /// Places an allocated block of `asize` bytes at the front of the
    /// `total`-byte region at `bp`, splitting off the tail as a free block
    /// when it can stand alone. Returns the size actually placed.
    fn place_split(&mut self, bp: usize, total: usize, asize: usize) -> usize {
        let heap = self.arena.bytes_mut();
        if total - asize >= MIN_BLOCK_SIZE {
            block::place(heap, bp, asize, BlockState::Allocated);
            let rest = bp + asize;
            block::place(heap, rest, total - asize, BlockState::Free);
            self.lists.insert(heap, rest, total - asize);
            asize
        } else {
            block::place(heap, bp, total, BlockState::Allocated);
            total
        }
    }

    /// Grows the arena so that the block at `bp`, which reaches up to the
    /// epilog, becomes exactly `asize` bytes, then places it as allocated.
    ///
    /// `absorb` names a free block inside that region to unlink first. The
    /// arena is grown before any list or tag is touched, so an out-of-memory
    /// error leaves the heap exactly as it was.
    fn extend_tail(
        &mut self,
        bp: usize,
        asize: usize,
        absorb: Option<usize>,
        symbol: &'static str,
    ) -> Result<(), AllocError> {
        let span = self.lists.epilog_header() + WORD - bp;
        let shortfall = asize - span;
        self.grow_arena(shortfall, symbol)?;

        let heap = self.arena.bytes_mut();
        if let Some(free_bp) = absorb {
            self.lists.remove(heap, free_bp);
        }
        self.lists.relocate_epilogs(heap, shortfall);
        block::place(heap, bp, asize, BlockState::Allocated);
        Ok(())
    }

    fn grow_arena(&mut self, bytes: usize, symbol: &'static str) -> Result<(), AllocError> {
        let len = self.arena.len();
        // Links and tags are 32-bit words; the arena must stay addressable.
        let addressable = len
            .checked_add(bytes)
            .is_some_and(|end| end <= u32::MAX as usize);
        let grown = if addressable {
            self.arena.grow(bytes)
        } else {
            Err(ArenaError::Exhausted {
                requested: bytes,
                len,
                limit: u32::MAX as usize,
            })
        };
        match grown {
            Ok(base) => {
                self.record_lifecycle(
                    AllocatorLogLevel::Debug,
                    symbol,
                    "heap_grow",
                    Some(base),
                    Some(bytes),
                    None,
                    "success",
                    format!("heap_size={}", self.arena.len()),
                );
                Ok(())
            }
            Err(err) => {
                self.record_lifecycle(
                    AllocatorLogLevel::Warn,
                    symbol,
                    "oom",
                    None,
                    Some(bytes),
                    None,
                    "oom",
                    err.to_string(),
                );
                Err(err.into())
            }
        }
    }

    fn adjusted(&mut self, size: usize, symbol: &'static str) -> Result<usize, AllocError> {
        match block::adjusted_size(size) {
            Some(asize) => Ok(asize),
            None => {
                self.record_lifecycle(
                    AllocatorLogLevel::Warn,
                    symbol,
                    "request_too_large",
                    None,
                    Some(size),
                    None,
                    "denied",
                    "adjusted_size_overflow",
                );
                Err(AllocError::RequestTooLarge { size })
            }
        }
    }

    /// O(1) boundary-tag validation of a caller pointer. Returns the block
    /// size of the live allocation.
    fn validate_live(&self, ptr: BlockPtr) -> Result<usize, AllocError> {
        let heap = self.arena.bytes();
        let bp = ptr.0;
        let epilog = self.lists.epilog_header();
        let invalid = AllocError::InvalidPointer { ptr: bp };
        if bp < free_list::FIRST_BLOCK || bp >= epilog || bp % block::ALIGNMENT != 0 {
            return Err(invalid);
        }
        let Some(tag) = block::header_tag(heap, bp) else {
            return Err(invalid);
        };
        if tag.size < MIN_BLOCK_SIZE || block::header(bp) + tag.size > epilog {
            return Err(invalid);
        }
        if block::read_word(heap, block::footer(bp, tag.size)) != tag.encode() {
            return Err(invalid);
        }
        match tag.state {
            BlockState::Allocated => Ok(tag.size),
            BlockState::Free => Err(AllocError::DoubleFree { ptr: bp }),
        }
    }

    fn validate_live_logged(
        &mut self,
        ptr: BlockPtr,
        symbol: &'static str,
    ) -> Result<usize, AllocError> {
        let result = self.validate_live(ptr);
        if let Err(err) = &result {
            let event = match err {
                AllocError::DoubleFree { .. } => "double_free_detected",
                _ => "invalid_pointer",
            };
            self.record_lifecycle(
                AllocatorLogLevel::Warn,
                symbol,
                event,
                Some(ptr.0),
                None,
                None,
                "denied",
                err.to_string(),
            );
        }
        result
    }

    fn note_allocated(&mut self, size: usize) {
        self.live_blocks += 1;
        self.live_bytes += size;
    }

    fn after_mutation(&mut self) {
        if self.config.verify_each_op {
            self.verify_or_abort();
        }
    }

    pub(crate) fn snapshot(&self) -> HeapSnapshot {
        HeapSnapshot {
            heap_size: self.arena.len(),
            live_blocks: self.live_blocks,
            live_bytes: self.live_bytes,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record_lifecycle(
        &mut self,
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        bucket: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        let snapshot = self.snapshot();
        self.log.record(
            level, symbol, event, ptr, size, bucket, outcome, details, snapshot,
        );
    }
}
