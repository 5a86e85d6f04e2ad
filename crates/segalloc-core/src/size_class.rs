//! Size-class buckets for the segregated free lists.
//!
//! Bucket `i` holds free blocks whose size lies in `[2^(4+i), 2^(5+i))`; the
//! last bucket is open-ended. The mapping is geometric so the number of lists
//! stays constant while each list only spans a factor of two in size.

/// Number of size-class buckets.
pub const NUM_BUCKETS: usize = 13;

/// log2 of the smallest class boundary (16 bytes).
const MIN_CLASS_SHIFT: u32 = 4;

/// Computes the bucket index for a block of `size` bytes.
///
/// Monotonic non-decreasing in `size`. Sizes below 16 (including 0) map to
/// bucket 0; everything from `2^(4 + NUM_BUCKETS - 1)` up maps to the last.
#[must_use]
pub fn bucket_of(size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    let log2 = usize::BITS - 1 - size.leading_zeros();
    (log2.saturating_sub(MIN_CLASS_SHIFT) as usize).min(NUM_BUCKETS - 1)
}

/// Smallest block size that belongs to `bucket`.
///
/// Returns 0 for out-of-range indices.
#[must_use]
pub fn bucket_floor(bucket: usize) -> usize {
    if bucket < NUM_BUCKETS {
        1 << (MIN_CLASS_SHIFT as usize + bucket)
    } else {
        0
    }
}
