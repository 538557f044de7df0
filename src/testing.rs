//! Helpers shared by the unit tests.

use std::{cell::Cell, ptr::NonNull, rc::Rc};

use crate::{Allocator, SystemAllocator};

/// What a [`CountingAllocator`] has seen so far.
#[derive(Default)]
pub(crate) struct Counts {
    pub allocs: Cell<usize>,
    pub frees: Cell<usize>,
    pub destroys: Cell<usize>,
}

impl Counts {
    /// Allocations that were not freed yet.
    pub fn outstanding(&self) -> usize {
        self.allocs.get() - self.frees.get()
    }
}

/// Parent allocator that forwards to [`SystemAllocator`] and counts calls.
/// Clones share the same counters, so a test can keep one clone and move
/// the other into the allocator under test.
#[derive(Clone, Default)]
pub(crate) struct CountingAllocator {
    counts: Rc<Counts>,
}

impl CountingAllocator {
    pub fn counts(&self) -> Rc<Counts> {
        Rc::clone(&self.counts)
    }
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

unsafe impl Allocator for CountingAllocator {
    fn alloc(&self, size: usize) -> NonNull<u8> {
        bump(&self.counts.allocs);
        SystemAllocator.alloc(size)
    }

    unsafe fn realloc(&self, address: NonNull<u8>, size: usize) -> NonNull<u8> {
        SystemAllocator.realloc(address, size)
    }

    unsafe fn free(&self, address: NonNull<u8>) {
        bump(&self.counts.frees);
        SystemAllocator.free(address)
    }

    unsafe fn destroy(&self) {
        bump(&self.counts.destroys);
    }
}
