//! Boundary-tag block layout.
//!
//! Every block starts with a 4-byte header word and ends with a 4-byte footer
//! word holding the same tag: the block size (a multiple of 8) with the low
//! bit set while the block is allocated. The payload offset `bp` handed to
//! callers points just past the header:
//!
//! ```text
//!   bp - 4        bp                                   bp + size - 8
//!   +--------+-------------------------------------------+--------+
//!   | header |  payload (free: pred word, succ word ...)  | footer |
//!   +--------+-------------------------------------------+--------+
//!                                                                 ^ next(bp) - 4
//! ```
//!
//! A zero tag word never describes a real block (the smallest block is 16
//! bytes); it marks the prolog footer and the epilog header, so neighbour
//! inspection at either end of the heap sees a sentinel instead of a block.
//!
//! All addresses are byte offsets into the arena. Reads and writes go
//! through safe slice indexing, so an out-of-range offset panics rather than
//! touching memory outside the arena.

use serde::Serialize;

/// Size of a tag or link word in bytes.
pub const WORD: usize = 4;

/// Header plus footer.
pub const OVERHEAD: usize = 2 * WORD;

/// Payload alignment and block size granularity.
pub const ALIGNMENT: usize = 8;

/// Smallest block: header, pred, succ, footer.
pub const MIN_BLOCK_SIZE: usize = 16;

/// Largest block size a tag word can describe.
pub const MAX_BLOCK_SIZE: usize = (u32::MAX as usize) & !(ALIGNMENT - 1);

const ALLOCATED_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !((ALIGNMENT as u32) - 1);

/// Whether a block is handed out or sitting in a free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockState {
    Free,
    Allocated,
}

/// Decoded boundary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub size: usize,
    pub state: BlockState,
}

impl Tag {
    #[must_use]
    pub const fn new(size: usize, state: BlockState) -> Self {
        Self { size, state }
    }

    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self.state, BlockState::Free)
    }

    /// Packs the tag into its on-heap word.
    #[must_use]
    pub fn encode(self) -> u32 {
        debug_assert!(self.size % ALIGNMENT == 0, "block size {} not 8-aligned", self.size);
        debug_assert!(self.size <= MAX_BLOCK_SIZE);
        let bits = match self.state {
            BlockState::Free => 0,
            BlockState::Allocated => ALLOCATED_BIT,
        };
        (self.size as u32) | bits
    }

    /// Unpacks an on-heap word. Returns `None` for the zero sentinel word.
    #[must_use]
    pub fn decode(word: u32) -> Option<Self> {
        if word == 0 {
            return None;
        }
        let state = if word & ALLOCATED_BIT != 0 {
            BlockState::Allocated
        } else {
            BlockState::Free
        };
        Some(Self {
            size: (word & SIZE_MASK) as usize,
            state,
        })
    }
}

/// Rounds `n` up to the next multiple of [`ALIGNMENT`].
#[must_use]
pub const fn align8(n: usize) -> Option<usize> {
    match n.checked_add(ALIGNMENT - 1) {
        Some(v) => Some(v & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Block size needed to serve a request of `requested` payload bytes.
///
/// Returns `None` when the result cannot be described by a tag word.
#[must_use]
pub fn adjusted_size(requested: usize) -> Option<usize> {
    let size = align8(requested)?.checked_add(OVERHEAD)?;
    (size <= MAX_BLOCK_SIZE).then_some(size.max(MIN_BLOCK_SIZE))
}

#[inline]
#[must_use]
pub fn read_word(heap: &[u8], at: usize) -> u32 {
    let mut word = [0u8; WORD];
    word.copy_from_slice(&heap[at..at + WORD]);
    u32::from_le_bytes(word)
}

#[inline]
pub fn write_word(heap: &mut [u8], at: usize, value: u32) {
    heap[at..at + WORD].copy_from_slice(&value.to_le_bytes());
}

/// Offset of the header word of block `bp`.
#[inline]
#[must_use]
pub const fn header(bp: usize) -> usize {
    bp - WORD
}

/// Offset of the footer word of block `bp`, given its size.
#[inline]
#[must_use]
pub const fn footer(bp: usize, size: usize) -> usize {
    bp + size - OVERHEAD
}

/// Tag stored in the word at `at`, `None` if it is a sentinel word.
#[inline]
#[must_use]
pub fn tag_at(heap: &[u8], at: usize) -> Option<Tag> {
    Tag::decode(read_word(heap, at))
}

/// Header tag of block `bp`.
#[inline]
#[must_use]
pub fn header_tag(heap: &[u8], bp: usize) -> Option<Tag> {
    tag_at(heap, header(bp))
}

/// Size of block `bp` read from its header; 0 for a sentinel.
#[inline]
#[must_use]
pub fn block_size(heap: &[u8], bp: usize) -> usize {
    header_tag(heap, bp).map_or(0, |tag| tag.size)
}

/// Tag of the block physically before `bp`, read from its footer.
#[inline]
#[must_use]
pub fn prev_tag(heap: &[u8], bp: usize) -> Option<Tag> {
    tag_at(heap, bp - OVERHEAD)
}

/// Payload offset of the block physically after `bp`.
#[inline]
#[must_use]
pub fn next(heap: &[u8], bp: usize) -> usize {
    bp + block_size(heap, bp)
}

/// Payload offset of the block physically before `bp`, `None` at the prolog.
#[inline]
#[must_use]
pub fn prev(heap: &[u8], bp: usize) -> Option<usize> {
    prev_tag(heap, bp).map(|tag| bp - tag.size)
}

/// Writes header and footer of block `bp` from one tag value.
#[inline]
pub fn place(heap: &mut [u8], bp: usize, size: usize, state: BlockState) {
    let word = Tag::new(size, state).encode();
    write_word(heap, header(bp), word);
    write_word(heap, footer(bp, size), word);
}

/// Free-list predecessor link stored in payload word 0.
#[inline]
#[must_use]
pub fn pred(heap: &[u8], bp: usize) -> usize {
    read_word(heap, bp) as usize
}

/// Free-list successor link stored in payload word 1.
#[inline]
#[must_use]
pub fn succ(heap: &[u8], bp: usize) -> usize {
    read_word(heap, bp + WORD) as usize
}

#[inline]
pub fn set_pred(heap: &mut [u8], bp: usize, link: usize) {
    write_word(heap, bp, link as u32);
}

#[inline]
pub fn set_succ(heap: &mut [u8], bp: usize, link: usize) {
    write_word(heap, bp + WORD, link as u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_encoding_keeps_size_and_state() {
        let free = Tag::new(48, BlockState::Free);
        let used = Tag::new(48, BlockState::Allocated);
        assert_eq!(Tag::decode(free.encode()), Some(free));
        assert_eq!(Tag::decode(used.encode()), Some(used));
        assert_ne!(free.encode(), used.encode());
    }

    #[test]
    fn zero_word_is_sentinel() {
        assert_eq!(Tag::decode(0), None);
    }

    #[test]
    fn adjusted_size_aligns_and_adds_overhead() {
        assert_eq!(adjusted_size(1), Some(16));
        assert_eq!(adjusted_size(8), Some(16));
        assert_eq!(adjusted_size(9), Some(24));
        assert_eq!(adjusted_size(16), Some(24));
        assert_eq!(adjusted_size(100), Some(112));
        assert_eq!(adjusted_size(4000), Some(4008));
    }

    #[test]
    fn adjusted_size_rejects_unrepresentable_requests() {
        assert_eq!(adjusted_size(usize::MAX), None);
        assert_eq!(adjusted_size(MAX_BLOCK_SIZE), None);
    }

    #[test]
    fn place_writes_matching_header_and_footer() {
        let mut heap = vec![0u8; 64];
        place(&mut heap, 8, 24, BlockState::Free);
        assert_eq!(read_word(&heap, header(8)), read_word(&heap, footer(8, 24)));
        assert_eq!(header_tag(&heap, 8), Some(Tag::new(24, BlockState::Free)));
        assert_eq!(next(&heap, 8), 32);
    }

    #[test]
    fn prev_uses_footer_of_predecessor() {
        let mut heap = vec![0u8; 64];
        place(&mut heap, 8, 24, BlockState::Allocated);
        place(&mut heap, 32, 16, BlockState::Free);
        assert_eq!(prev(&heap, 32), Some(8));
        // word before the first block is zero: sentinel
        assert_eq!(prev(&heap, 8), None);
    }

    #[test]
    fn links_live_in_payload() {
        let mut heap = vec![0u8; 32];
        place(&mut heap, 8, 16, BlockState::Free);
        set_pred(&mut heap, 8, 0x40);
        set_succ(&mut heap, 8, 0x88);
        assert_eq!(pred(&heap, 8), 0x40);
        assert_eq!(succ(&heap, 8), 0x88);
        assert_eq!(header_tag(&heap, 8).map(|t| t.size), Some(16));
    }
}
