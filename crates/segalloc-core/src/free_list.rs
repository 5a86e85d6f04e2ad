//! Sentinel-anchored segregated free lists.
//!
//! Each bucket owns a doubly linked list threaded through the payloads of its
//! free blocks. The ends of every list are sentinel nodes stored in the arena
//! itself, so insert and remove never branch on an empty list:
//!
//! ```text
//!   offset 0                8K   8K+4                 E    E+4
//!   +--------------------+------+-------------------+------+---------------------+
//!   | prolog nodes 0..K  | 0000 | blocks ...        | 0000 | epilog nodes 0..K   |
//!   | (pred, succ) x K   | ftr  |                   | hdr  | (pred, 0) x K       |
//!   +--------------------+------+-------------------+------+---------------------+
//! ```
//!
//! Prolog nodes never move. The epilog header and nodes always sit at the
//! very end of the arena: whenever the arena grows, [`FreeLists::relocate_epilogs`]
//! moves them and re-links each bucket's last node to its epilog.

use crate::block::{self, OVERHEAD, WORD};
use crate::size_class::{self, NUM_BUCKETS};

/// Size of one sentinel node (pred word + succ word).
pub const NODE_SIZE: usize = 2 * WORD;

/// Bytes occupied by all prolog nodes.
const PROLOG_NODES: usize = NUM_BUCKETS * NODE_SIZE;

/// Offset of the prolog footer (zero word).
const PROLOG_FOOTER: usize = PROLOG_NODES;

/// Payload offset of the first real block.
pub const FIRST_BLOCK: usize = PROLOG_FOOTER + OVERHEAD;

/// Arena bytes needed before the first block is placed.
pub const INITIAL_HEAP_SIZE: usize = PROLOG_NODES + WORD + WORD + NUM_BUCKETS * NODE_SIZE;

/// Bytes from the epilog header to the end of the arena.
pub const EPILOG_SPAN: usize = WORD + NUM_BUCKETS * NODE_SIZE;

/// Locations of every bucket's sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeLists {
    /// Offset of the epilog header word.
    epilog_header: usize,
}

impl FreeLists {
    /// Lays out empty lists in a freshly grown arena of
    /// [`INITIAL_HEAP_SIZE`] bytes starting at offset 0.
    pub fn format(heap: &mut [u8]) -> Self {
        let lists = Self {
            epilog_header: PROLOG_FOOTER + WORD,
        };
        block::write_word(heap, PROLOG_FOOTER, 0);
        block::write_word(heap, lists.epilog_header, 0);
        for bucket in 0..NUM_BUCKETS {
            let head = Self::prolog(bucket);
            let tail = lists.epilog(bucket);
            block::set_pred(heap, head, 0);
            block::set_succ(heap, head, tail);
            block::set_pred(heap, tail, head);
            block::set_succ(heap, tail, 0);
        }
        lists
    }

    /// Prolog (head) node of `bucket`.
    #[inline]
    #[must_use]
    pub const fn prolog(bucket: usize) -> usize {
        bucket * NODE_SIZE
    }

    /// Epilog (tail) node of `bucket`.
    #[inline]
    #[must_use]
    pub const fn epilog(&self, bucket: usize) -> usize {
        self.epilog_header + WORD + bucket * NODE_SIZE
    }

    /// Offset of the zero epilog header; the last real block ends here.
    #[inline]
    #[must_use]
    pub const fn epilog_header(&self) -> usize {
        self.epilog_header
    }

    /// LIFO insert of free block `bp` (of `size` bytes) right after its
    /// bucket's prolog.
    pub fn insert(&self, heap: &mut [u8], bp: usize, size: usize) {
        let head = Self::prolog(size_class::bucket_of(size));
        let first = block::succ(heap, head);
        block::set_pred(heap, bp, head);
        block::set_succ(heap, bp, first);
        block::set_succ(heap, head, bp);
        block::set_pred(heap, first, bp);
    }

    /// Unlinks `bp` from whichever list it is on.
    pub fn remove(&self, heap: &mut [u8], bp: usize) {
        let pred = block::pred(heap, bp);
        let succ = block::succ(heap, bp);
        block::set_succ(heap, pred, succ);
        block::set_pred(heap, succ, pred);
    }

    /// Walks the nodes of `bucket` from its prolog to its epilog.
    #[must_use]
    pub fn iter<'a>(&self, heap: &'a [u8], bucket: usize) -> ListIter<'a> {
        ListIter {
            heap,
            node: block::succ(heap, Self::prolog(bucket)),
            tail: self.epilog(bucket),
        }
    }

    /// First-fit search: scans the bucket `asize` maps to, then every larger
    /// bucket, returning the first block of at least `asize` bytes.
    #[must_use]
    pub fn find_fit(&self, heap: &[u8], asize: usize) -> Option<usize> {
        (size_class::bucket_of(asize)..NUM_BUCKETS).find_map(|bucket| {
            self.iter(heap, bucket)
                .find(|&bp| block::block_size(heap, bp) >= asize)
        })
    }

    /// Moves the epilog header and all epilog nodes `shift` bytes towards the
    /// (already grown) end of the arena and re-links every bucket's last node.
    ///
    /// Every predecessor link is read before anything is written: the old and
    /// new epilog regions overlap when `shift` is smaller than
    /// [`EPILOG_SPAN`], and callers place the block that covers the old
    /// region only after this returns.
    pub fn relocate_epilogs(&mut self, heap: &mut [u8], shift: usize) {
        let mut tails = [0usize; NUM_BUCKETS];
        for (bucket, tail) in tails.iter_mut().enumerate() {
            *tail = block::pred(heap, self.epilog(bucket));
        }

        self.epilog_header += shift;
        block::write_word(heap, self.epilog_header, 0);
        for (bucket, &last) in tails.iter().enumerate() {
            let node = self.epilog(bucket);
            block::set_pred(heap, node, last);
            block::set_succ(heap, node, 0);
            block::set_succ(heap, last, node);
        }
    }
}

/// Iterator over the block offsets of one free list.
pub struct ListIter<'a> {
    heap: &'a [u8],
    node: usize,
    tail: usize,
}

impl Iterator for ListIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.node == self.tail {
            return None;
        }
        let current = self.node;
        self.node = block::succ(self.heap, current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockState;

    fn fresh() -> (Vec<u8>, FreeLists) {
        let mut heap = vec![0u8; INITIAL_HEAP_SIZE];
        let lists = FreeLists::format(&mut heap);
        (heap, lists)
    }

    /// Turns the epilog region into a block of `size` bytes by growing.
    fn append_free(heap: &mut Vec<u8>, lists: &mut FreeLists, size: usize) -> usize {
        let bp = lists.epilog_header() + WORD;
        heap.resize(heap.len() + size, 0);
        lists.relocate_epilogs(heap, size);
        block::place(heap, bp, size, BlockState::Free);
        lists.insert(heap, bp, size);
        bp
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(FIRST_BLOCK % 8, 0);
        assert_eq!(INITIAL_HEAP_SIZE, FIRST_BLOCK + NUM_BUCKETS * NODE_SIZE);
    }

    #[test]
    fn test_formatted_lists_are_empty() {
        let (heap, lists) = fresh();
        for bucket in 0..NUM_BUCKETS {
            assert_eq!(lists.iter(&heap, bucket).count(), 0);
            assert_eq!(block::pred(&heap, lists.epilog(bucket)), FreeLists::prolog(bucket));
        }
        assert_eq!(lists.epilog_header() + WORD, FIRST_BLOCK);
    }

    #[test]
    fn test_insert_is_lifo() {
        let (mut heap, mut lists) = fresh();
        let a = append_free(&mut heap, &mut lists, 24);
        let b = append_free(&mut heap, &mut lists, 16);
        // both 16..32 -> bucket 0; b was inserted last
        let order: Vec<usize> = lists.iter(&heap, 0).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn test_remove_relinks_neighbours() {
        let (mut heap, mut lists) = fresh();
        let a = append_free(&mut heap, &mut lists, 16);
        let b = append_free(&mut heap, &mut lists, 16);
        let c = append_free(&mut heap, &mut lists, 16);
        lists.remove(&mut heap, b);
        assert_eq!(lists.iter(&heap, 0).collect::<Vec<_>>(), vec![c, a]);
        lists.remove(&mut heap, c);
        lists.remove(&mut heap, a);
        assert_eq!(lists.iter(&heap, 0).count(), 0);
        assert_eq!(block::succ(&heap, FreeLists::prolog(0)), lists.epilog(0));
    }

    #[test]
    fn test_relocation_keeps_tail_links() {
        let (mut heap, mut lists) = fresh();
        let a = append_free(&mut heap, &mut lists, 64);
        let old_tail = lists.epilog(2);
        let _ = append_free(&mut heap, &mut lists, 16);
        let new_tail = lists.epilog(2);
        assert_ne!(old_tail, new_tail);
        assert_eq!(block::succ(&heap, a), new_tail);
        assert_eq!(block::pred(&heap, new_tail), a);
        assert_eq!(lists.epilog_header() + EPILOG_SPAN, heap.len());
    }

    #[test]
    fn test_find_fit_escalates_buckets() {
        let (mut heap, mut lists) = fresh();
        let small = append_free(&mut heap, &mut lists, 16);
        let big = append_free(&mut heap, &mut lists, 256);
        assert_eq!(lists.find_fit(&heap, 16), Some(small));
        assert_eq!(lists.find_fit(&heap, 24), Some(big));
        assert_eq!(lists.find_fit(&heap, 512), None);
    }
}
