//! Heap consistency checker.
//!
//! Walks the block chain from the first real block to the epilog header,
//! then every bucket from prolog to epilog, and reports the first structural
//! violation it finds. Never mutates the heap.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::allocator::SegAllocator;
use crate::arena::Arena;
use crate::block::{self, ALIGNMENT, BlockState, MIN_BLOCK_SIZE};
use crate::free_list::{FIRST_BLOCK, FreeLists};
use crate::log::AllocatorLogLevel;
use crate::size_class::{self, NUM_BUCKETS};

/// What the checker knows about the block a violation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockReport {
    pub offset: usize,
    pub size: usize,
    pub state: Option<BlockState>,
    /// `(pred, succ)` for blocks that should be on a free list.
    pub links: Option<(usize, usize)>,
}

impl BlockReport {
    fn read(heap: &[u8], bp: usize) -> Self {
        let tag = block::header_tag(heap, bp);
        let state = tag.map(|t| t.state);
        let links = match state {
            Some(BlockState::Free) if bp + 2 * block::WORD <= heap.len() => {
                Some((block::pred(heap, bp), block::succ(heap, bp)))
            }
            _ => None,
        };
        Self {
            offset: bp,
            size: tag.map_or(0, |t| t.size),
            state,
            links,
        }
    }
}

impl fmt::Display for BlockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            Some(BlockState::Free) => "free",
            Some(BlockState::Allocated) => "allocated",
            None => "sentinel",
        };
        write!(f, "{:#x} ({} bytes, {state})", self.offset, self.size)?;
        if let Some((pred, succ)) = self.links {
            write!(f, " pred={pred:#x} succ={succ:#x}")?;
        }
        Ok(())
    }
}

/// A broken heap invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("block {block}: payload is not 8-byte aligned")]
    Misaligned { block: BlockReport },
    #[error("block {block}: header {header:#010x} and footer {footer:#010x} disagree")]
    TagMismatch {
        block: BlockReport,
        header: u32,
        footer: u32,
    },
    #[error("block chain broken at {at:#x}: {reason} (epilog header at {epilog:#x})")]
    BrokenChain {
        at: usize,
        epilog: usize,
        reason: &'static str,
    },
    #[error("blocks {prev:#x} and {block} are adjacent and both free")]
    AdjacentFree { prev: usize, block: BlockReport },
    #[error("bucket {bucket}: allocated block {block} is on a free list")]
    AllocatedInFreeList { bucket: usize, block: BlockReport },
    #[error("bucket {bucket}: block {block} belongs in bucket {expected}")]
    WrongBucket {
        bucket: usize,
        expected: usize,
        block: BlockReport,
    },
    #[error("bucket {bucket}: block {block} is reached twice")]
    DuplicateListEntry { bucket: usize, block: BlockReport },
    #[error("bucket {bucket}: node {node:#x} is not a block in the heap")]
    StrayListNode { bucket: usize, node: usize },
    #[error("bucket {bucket}: node {node:#x} has pred {found:#x}, expected {expected:#x}")]
    BrokenLink {
        bucket: usize,
        node: usize,
        expected: usize,
        found: usize,
    },
    #[error("free block {block} is on no free list")]
    UnlistedFreeBlock { block: BlockReport },
}

/// Checks every block and every free list of `heap`.
pub fn check_heap(heap: &[u8], lists: &FreeLists) -> Result<(), InvariantViolation> {
    let free = walk_blocks(heap, lists)?;
    let listed = walk_lists(heap, lists, &free)?;
    if let Some(&bp) = free.difference(&listed).next() {
        return Err(InvariantViolation::UnlistedFreeBlock {
            block: BlockReport::read(heap, bp),
        });
    }
    Ok(())
}

/// Block walk. Returns the offsets of all free blocks.
fn walk_blocks(heap: &[u8], lists: &FreeLists) -> Result<BTreeSet<usize>, InvariantViolation> {
    let epilog = lists.epilog_header();
    let mut free = BTreeSet::new();
    let mut prev_free = None;
    let mut bp = FIRST_BLOCK;

    loop {
        let at = block::header(bp);
        if at > epilog {
            return Err(InvariantViolation::BrokenChain {
                at,
                epilog,
                reason: "block runs past the epilog",
            });
        }
        let Some(tag) = block::header_tag(heap, bp) else {
            if at != epilog {
                return Err(InvariantViolation::BrokenChain {
                    at,
                    epilog,
                    reason: "zero header before the epilog",
                });
            }
            return Ok(free);
        };
        if bp % ALIGNMENT != 0 {
            return Err(InvariantViolation::Misaligned {
                block: BlockReport::read(heap, bp),
            });
        }
        if tag.size < MIN_BLOCK_SIZE || at + tag.size > epilog {
            return Err(InvariantViolation::BrokenChain {
                at,
                epilog,
                reason: "block size out of range",
            });
        }
        let header = tag.encode();
        let footer = block::read_word(heap, block::footer(bp, tag.size));
        if header != footer {
            return Err(InvariantViolation::TagMismatch {
                block: BlockReport::read(heap, bp),
                header,
                footer,
            });
        }
        if tag.is_free() {
            if let Some(prev) = prev_free {
                return Err(InvariantViolation::AdjacentFree {
                    prev,
                    block: BlockReport::read(heap, bp),
                });
            }
            free.insert(bp);
            prev_free = Some(bp);
        } else {
            prev_free = None;
        }
        bp += tag.size;
    }
}

/// List walk. Returns the offsets of all listed blocks.
fn walk_lists(
    heap: &[u8],
    lists: &FreeLists,
    free: &BTreeSet<usize>,
) -> Result<BTreeSet<usize>, InvariantViolation> {
    let epilog = lists.epilog_header();
    let mut listed = BTreeSet::new();

    for bucket in 0..NUM_BUCKETS {
        let tail = lists.epilog(bucket);
        let mut prev = FreeLists::prolog(bucket);
        let mut node = block::succ(heap, prev);

        while node != tail {
            if node < FIRST_BLOCK || node >= epilog || node % ALIGNMENT != 0 {
                return Err(InvariantViolation::StrayListNode { bucket, node });
            }
            let found = block::pred(heap, node);
            if found != prev {
                return Err(InvariantViolation::BrokenLink {
                    bucket,
                    node,
                    expected: prev,
                    found,
                });
            }
            let report = BlockReport::read(heap, node);
            if !free.contains(&node) {
                return Err(match report.state {
                    Some(BlockState::Allocated) => {
                        InvariantViolation::AllocatedInFreeList { bucket, block: report }
                    }
                    _ => InvariantViolation::StrayListNode { bucket, node },
                });
            }
            let expected = size_class::bucket_of(report.size);
            if expected != bucket {
                return Err(InvariantViolation::WrongBucket {
                    bucket,
                    expected,
                    block: report,
                });
            }
            if !listed.insert(node) {
                return Err(InvariantViolation::DuplicateListEntry { bucket, block: report });
            }
            prev = node;
            node = block::succ(heap, node);
        }

        let found = block::pred(heap, tail);
        if found != prev {
            return Err(InvariantViolation::BrokenLink {
                bucket,
                node: tail,
                expected: prev,
                found,
            });
        }
    }
    Ok(listed)
}

impl<A: Arena> SegAllocator<A> {
    /// Runs the full heap check. A violation is also recorded as an
    /// `invariant_violation` lifecycle record.
    pub fn check(&mut self) -> Result<(), InvariantViolation> {
        let result = check_heap(self.arena.bytes(), &self.lists);
        if let Err(violation) = &result {
            self.record_lifecycle(
                AllocatorLogLevel::Error,
                "check",
                "invariant_violation",
                None,
                None,
                None,
                "violation",
                violation.to_string(),
            );
        }
        result
    }

    /// Returns true if the heap passes [`check`](Self::check).
    pub fn check_invariants(&mut self) -> bool {
        self.check().is_ok()
    }

    /// Checks the heap and aborts the process on the first violation,
    /// printing the diagnostic and a heap dump to stderr.
    pub fn verify_or_abort(&mut self) {
        if let Err(violation) = self.check() {
            eprintln!("segalloc: heap invariant violated: {violation}");
            eprintln!("{}", self.dump());
            std::process::abort();
        }
    }
}
