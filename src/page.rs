use std::ptr::{self, NonNull};

use crate::{
    align::padded_size,
    error::out_of_memory,
    header::{Header, HEADER_SIZE},
    platform::{page_size, request_memory, return_memory},
    Allocator,
};

/// Leaf allocator that asks the kernel for every single allocation. Each
/// call to [`Allocator::alloc`] maps a whole number of pages, writes a
/// [`Header`] at the start and returns the address after it:
///
/// ```text
/// +--------+-------------------------------+
/// | Header |   Content (size bytes)   ...  |  <- align_up(HEADER_SIZE + size, PAGE_SIZE)
/// +--------+-------------------------------+
/// ```
///
/// [`Allocator::free`] unmaps the pages immediately. That's wasteful for
/// small objects, so on its own it's only useful for big buffers, but it's a
/// good parent for [`crate::ArenaAllocator`] and [`crate::BatchAllocator`]
/// which already request page-sized pieces.
///
/// The header points back to the start of the mapping, which is where the
/// header itself lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageAllocator;

/// Length of the mapping needed for an allocation of `size` bytes. Panics
/// if the header plus page rounding doesn't fit in a `usize`.
#[inline]
fn mapping_length(size: usize) -> usize {
    padded_size(size, HEADER_SIZE, page_size())
}

unsafe impl Allocator for PageAllocator {
    fn alloc(&self, size: usize) -> NonNull<u8> {
        let length = mapping_length(size);

        unsafe {
            let Some(address) = request_memory(length) else {
                out_of_memory(length);
            };

            Header::write(address, address, size)
        }
    }

    unsafe fn realloc(&self, address: NonNull<u8>, size: usize) -> NonNull<u8> {
        let header = Header::<u8>::from_content_address(address);
        let old_size = (*header.as_ptr()).size;

        // Still fits in the pages we already have.
        if mapping_length(size) == mapping_length(old_size) {
            (*header.as_ptr()).size = size;
            return address;
        }

        let new_address = self.alloc(size);
        ptr::copy_nonoverlapping(address.as_ptr(), new_address.as_ptr(), old_size.min(size));
        self.free(address);

        new_address
    }

    unsafe fn free(&self, address: NonNull<u8>) {
        let (mapping, size) = Header::<u8>::of(address);
        return_memory(mapping, mapping_length(size));
    }

    unsafe fn destroy(&self) {}
}
