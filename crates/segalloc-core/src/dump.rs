//! Heap walking, statistics and the human-readable heap dump.

use std::fmt;

use serde::Serialize;

use crate::allocator::SegAllocator;
use crate::arena::Arena;
use crate::block::{self, BlockState, MIN_BLOCK_SIZE};
use crate::free_list::{FIRST_BLOCK, FreeLists, NODE_SIZE};
use crate::size_class::{self, NUM_BUCKETS};

/// One block of the heap as seen by a physical walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Payload offset.
    pub offset: usize,
    /// Block size including header and footer.
    pub size: usize,
    pub state: BlockState,
    /// Free-list links, present for free blocks only.
    pub pred: Option<usize>,
    pub succ: Option<usize>,
}

impl BlockInfo {
    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self.state, BlockState::Free)
    }
}

/// Physical walk from the first real block up to the epilog header.
///
/// Stops early instead of panicking when it meets a tag that cannot describe
/// a block inside the heap, so it is safe to use on a corrupted arena.
pub struct BlockIter<'a> {
    heap: &'a [u8],
    bp: usize,
    epilog: usize,
}

impl<'a> BlockIter<'a> {
    #[must_use]
    pub fn new(heap: &'a [u8], lists: &FreeLists) -> Self {
        Self {
            heap,
            bp: FIRST_BLOCK,
            epilog: lists.epilog_header(),
        }
    }
}

impl Iterator for BlockIter<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let at = block::header(self.bp);
        if at >= self.epilog {
            return None;
        }
        let tag = block::header_tag(self.heap, self.bp)?;
        if tag.size < MIN_BLOCK_SIZE || at + tag.size > self.epilog {
            return None;
        }
        let (pred, succ) = if tag.is_free() {
            (
                Some(block::pred(self.heap, self.bp)),
                Some(block::succ(self.heap, self.bp)),
            )
        } else {
            (None, None)
        };
        let info = BlockInfo {
            offset: self.bp,
            size: tag.size,
            state: tag.state,
            pred,
            succ,
        };
        self.bp += tag.size;
        Some(info)
    }
}

/// Aggregate occupancy figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub heap_size: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
    /// Free block count per size-class bucket.
    pub free_per_bucket: [usize; NUM_BUCKETS],
}

impl HeapStats {
    /// Share of free bytes not held by the largest free block, in `[0, 1]`.
    #[must_use]
    pub fn fragmentation(&self) -> f64 {
        if self.free_bytes == 0 {
            return 0.0;
        }
        1.0 - self.largest_free as f64 / self.free_bytes as f64
    }
}

/// Display adapter printing every block with its tags and links.
pub struct HeapDump<'a> {
    heap: &'a [u8],
    lists: FreeLists,
}

impl HeapDump<'_> {
    fn describe_link(&self, link: usize) -> &'static str {
        if link < NUM_BUCKETS * NODE_SIZE {
            "(prolog)"
        } else if link > self.lists.epilog_header() {
            "(epilog)"
        } else {
            ""
        }
    }
}

impl fmt::Display for HeapDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=== heap dump: {} bytes, epilog header at {:#x} ===",
            self.heap.len(),
            self.lists.epilog_header()
        )?;
        for info in BlockIter::new(self.heap, &self.lists) {
            let (state, open, close) = match info.state {
                BlockState::Free => ("free", '[', ']'),
                BlockState::Allocated => ("alloc", '(', ')'),
            };
            let header = block::header(info.offset);
            let footer = block::footer(info.offset, info.size);
            let footer_size = block::tag_at(self.heap, footer).map_or(0, |tag| tag.size);
            writeln!(f, "#block {:#x}({}, {state})", info.offset, info.size)?;
            writeln!(
                f,
                "  HDR: {header:#x}{open}{}{close} FTR: {footer:#x}{open}{footer_size}{close}",
                info.size
            )?;
            if let (Some(pred), Some(succ)) = (info.pred, info.succ) {
                writeln!(
                    f,
                    "  PRED: {pred:#x}{} SUCC: {succ:#x}{}",
                    self.describe_link(pred),
                    self.describe_link(succ)
                )?;
            }
        }
        let mut per_bucket = [0usize; NUM_BUCKETS];
        for info in BlockIter::new(self.heap, &self.lists).filter(BlockInfo::is_free) {
            per_bucket[size_class::bucket_of(info.size)] += 1;
        }
        for (bucket, &count) in per_bucket.iter().enumerate() {
            if count > 0 {
                writeln!(
                    f,
                    "#bucket {bucket} (>= {} bytes): {count} free",
                    size_class::bucket_floor(bucket)
                )?;
            }
        }
        write!(f, "=== end heap dump ===")
    }
}

impl<A: Arena> SegAllocator<A> {
    /// Walks every block in address order.
    #[must_use]
    pub fn blocks(&self) -> BlockIter<'_> {
        BlockIter::new(self.arena.bytes(), &self.lists)
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            heap_size: self.arena.len(),
            ..HeapStats::default()
        };
        for info in self.blocks() {
            if info.is_free() {
                stats.free_blocks += 1;
                stats.free_bytes += info.size;
                stats.largest_free = stats.largest_free.max(info.size);
                stats.free_per_bucket[size_class::bucket_of(info.size)] += 1;
            } else {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += info.size;
            }
        }
        stats
    }

    /// Heap dump for diagnostics; render it with `{}`.
    #[must_use]
    pub fn dump(&self) -> HeapDump<'_> {
        HeapDump {
            heap: self.arena.bytes(),
            lists: self.lists,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::SegAllocator;

    #[test]
    fn stats_track_allocated_and_free_blocks() {
        let mut state = SegAllocator::init().unwrap();
        let a = state.allocate(100).unwrap().unwrap(); // 112
        let _b = state.allocate(16).unwrap().unwrap(); // 24
        let c = state.allocate(500).unwrap().unwrap(); // 512
        let _d = state.allocate(16).unwrap().unwrap(); // 24
        state.release(a).unwrap();
        state.release(c).unwrap();

        let stats = state.stats();
        assert_eq!(stats.heap_size, state.heap_size());
        assert_eq!(stats.allocated_blocks, 2);
        assert_eq!(stats.allocated_bytes, 48);
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.free_bytes, 624);
        assert_eq!(stats.largest_free, 512);
        assert_eq!(stats.free_per_bucket[2], 1);
        assert_eq!(stats.free_per_bucket[5], 1);
        assert!(stats.fragmentation() > 0.0 && stats.fragmentation() < 1.0);
        assert_eq!(stats.allocated_bytes, state.live_bytes());
    }

    #[test]
    fn blocks_walk_in_address_order() {
        let mut state = SegAllocator::init().unwrap();
        let ptrs: Vec<_> = [8, 40, 200]
            .iter()
            .map(|&n| state.allocate(n).unwrap().unwrap())
            .collect();
        let offsets: Vec<usize> = state.blocks().map(|b| b.offset).collect();
        assert_eq!(
            offsets,
            ptrs.iter().map(|p| p.offset()).collect::<Vec<_>>()
        );
        assert!(state.blocks().all(|b| b.pred.is_none() && b.succ.is_none()));
    }

    #[test]
    fn dump_lists_blocks_and_links() {
        let mut state = SegAllocator::init().unwrap();
        let a = state.allocate(16).unwrap().unwrap();
        let _b = state.allocate(16).unwrap().unwrap();
        state.release(a).unwrap();

        let text = state.dump().to_string();
        assert!(text.starts_with("=== heap dump:"));
        assert!(text.contains(&format!("#block {:#x}(24, free)", a.offset())));
        assert!(text.contains("(24, alloc)"));
        assert!(text.contains("PRED: 0x0(prolog)"));
        assert!(text.contains("(epilog)"));
        assert!(text.contains("#bucket 0 (>= 16 bytes): 1 free"));
        assert!(!text.contains("#bucket 1 "));
        assert!(text.ends_with("=== end heap dump ==="));
    }

    #[test]
    fn empty_heap_has_no_blocks() {
        let state = SegAllocator::init().unwrap();
        assert_eq!(state.blocks().count(), 0);
        assert_eq!(state.stats().fragmentation(), 0.0);
    }
}
