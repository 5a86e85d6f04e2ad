//! Externally synchronised allocator handle.
//!
//! The allocator itself is single-threaded. [`SharedAllocator`] puts the
//! whole instance behind one lock so it can be shared across threads; every
//! operation holds the lock for its full duration.

use parking_lot::Mutex;

use crate::allocator::SegAllocator;
use crate::arena::{Arena, VecArena};
use crate::check::InvariantViolation;
use crate::dump::HeapStats;
use crate::error::AllocError;
use crate::BlockPtr;

pub struct SharedAllocator<A: Arena = VecArena> {
    inner: Mutex<SegAllocator<A>>,
}

impl<A: Arena> SharedAllocator<A> {
    #[must_use]
    pub fn new(allocator: SegAllocator<A>) -> Self {
        Self {
            inner: Mutex::new(allocator),
        }
    }

    pub fn allocate(&self, size: usize) -> Result<Option<BlockPtr>, AllocError> {
        self.inner.lock().allocate(size)
    }

    pub fn allocate_zeroed(
        &self,
        count: usize,
        size: usize,
    ) -> Result<Option<BlockPtr>, AllocError> {
        self.inner.lock().allocate_zeroed(count, size)
    }

    pub fn release(&self, ptr: BlockPtr) -> Result<(), AllocError> {
        self.inner.lock().release(ptr)
    }

    pub fn resize(
        &self,
        ptr: Option<BlockPtr>,
        size: usize,
    ) -> Result<Option<BlockPtr>, AllocError> {
        self.inner.lock().resize(ptr, size)
    }

    pub fn usable_size(&self, ptr: BlockPtr) -> Result<usize, AllocError> {
        self.inner.lock().usable_size(ptr)
    }

    pub fn check(&self) -> Result<(), InvariantViolation> {
        self.inner.lock().check()
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats()
    }

    /// Runs `f` with exclusive access, e.g. to touch payload bytes of an
    /// allocation without another thread resizing it in between.
    pub fn with<R>(&self, f: impl FnOnce(&mut SegAllocator<A>) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }

    pub fn into_inner(self) -> SegAllocator<A> {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn concurrent_threads_keep_heap_consistent() {
        let shared = SharedAllocator::new(SegAllocator::init().unwrap());
        thread::scope(|scope| {
            for worker in 0..4usize {
                let shared = &shared;
                scope.spawn(move || {
                    let mut held = Vec::new();
                    for step in 0..200usize {
                        let size = 8 + (worker * 37 + step * 13) % 600;
                        let ptr = shared.allocate(size).unwrap().unwrap();
                        let tag = (worker as u8).wrapping_mul(31).wrapping_add(step as u8);
                        shared.with(|state| state.payload_mut(ptr).unwrap()[0] = tag);
                        held.push((ptr, tag));
                        if step % 3 == 0 {
                            let (ptr, tag) = held.swap_remove(step % held.len());
                            let first = shared.with(|state| state.payload(ptr).unwrap()[0]);
                            assert_eq!(first, tag);
                            shared.release(ptr).unwrap();
                        }
                    }
                    for (ptr, _) in held {
                        shared.release(ptr).unwrap();
                    }
                });
            }
        });
        assert_eq!(shared.check(), Ok(()));
        let state = shared.into_inner();
        assert_eq!(state.live_blocks(), 0);
        assert_eq!(state.stats().free_blocks, 1);
    }

    #[test]
    fn resize_through_shared_handle() {
        let shared = SharedAllocator::new(SegAllocator::init().unwrap());
        let ptr = shared.allocate(10).unwrap();
        let grown = shared.resize(ptr, 4000).unwrap().unwrap();
        assert!(shared.usable_size(grown).unwrap() >= 4000);
        assert_eq!(shared.stats().allocated_blocks, 1);
    }
}
