use std::ptr::NonNull;

use crate::{error::out_of_memory, Allocator};

/// Leaf allocator that hands every request straight to the C library
/// (`calloc`, `realloc`, `free`). It has no state, so it's `Copy` and can be
/// used from any thread; libc does its own locking.
///
/// This is the default parent of [`crate::ArenaAllocator`] and
/// [`crate::BatchAllocator`]. Memory returned by [`Allocator::alloc`] is
/// zeroed.
///
/// # Examples
///
/// ```rust
/// use mmkit::{Allocator, AllocatorExt, SystemAllocator};
///
/// let allocator = SystemAllocator;
/// let value = allocator.alloc_one::<u64>();
///
/// unsafe {
///     assert_eq!(*value.as_ptr(), 0);
///     value.as_ptr().write(5);
///     assert_eq!(*value.as_ptr(), 5);
///     allocator.free_one(value);
/// }
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemAllocator;

unsafe impl Allocator for SystemAllocator {
    fn alloc(&self, size: usize) -> NonNull<u8> {
        // `calloc(1, 0)` may legally return null, so always ask for at least
        // one byte.
        let address = unsafe { libc::calloc(1, size.max(1)) };

        match NonNull::new(address.cast()) {
            Some(address) => address,
            None => out_of_memory(size),
        }
    }

    unsafe fn realloc(&self, address: NonNull<u8>, size: usize) -> NonNull<u8> {
        let address = libc::realloc(address.as_ptr().cast(), size.max(1));

        match NonNull::new(address.cast()) {
            Some(address) => address,
            None => out_of_memory(size),
        }
    }

    unsafe fn free(&self, address: NonNull<u8>) {
        libc::free(address.as_ptr().cast())
    }

    unsafe fn destroy(&self) {}
}
