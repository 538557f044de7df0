//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::{cell::Cell, ptr::NonNull, rc::Rc};

use mmkit::{Allocator, SystemAllocator};

/// Installs `env_logger` once so that `RUST_LOG=debug cargo test` shows the
/// chunk, bucket and region events.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
pub struct Counts {
    pub allocs: Cell<usize>,
    pub reallocs: Cell<usize>,
    pub frees: Cell<usize>,
    pub destroys: Cell<usize>,
}

impl Counts {
    pub fn outstanding(&self) -> usize {
        self.allocs.get() - self.frees.get()
    }
}

/// Forwards to [`SystemAllocator`] and counts every call. Clones share the
/// counters.
#[derive(Clone, Default)]
pub struct CountingAllocator {
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
        bump(&self.counts.reallocs);
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

/// Allocates one block per size, fills each one with its own byte, checks
/// that nothing overlapped and frees everything in reverse order.
pub fn fill_check_free<A: Allocator>(allocator: &A, sizes: &[usize]) {
    let blocks: Vec<(NonNull<u8>, usize)> = sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let address = allocator.alloc(size);
            unsafe { address.as_ptr().write_bytes(i as u8, size) };
            (address, size)
        })
        .collect();

    for (i, (address, size)) in blocks.iter().enumerate() {
        assert_eq!(address.as_ptr() as usize % mmkit::MAX_ALIGN, 0);
        let content = unsafe { std::slice::from_raw_parts(address.as_ptr(), *size) };
        assert!(content.iter().all(|byte| *byte == i as u8), "block {i} was overwritten");
    }

    for (address, _) in blocks.into_iter().rev() {
        unsafe { allocator.free(address) };
    }
}
