//! Manual memory management toolkit. One allocator trait, [`Allocator`],
//! a few allocators that implement it and two containers that take any of
//! them:
//!
//! - [`SystemAllocator`]: libc `calloc`/`realloc`/`free`.
//! - [`PageAllocator`]: whole pages straight from the kernel per allocation.
//! - [`ArenaAllocator`]: bump allocator over chunks, frees everything at once.
//! - [`BatchAllocator`]: splits big buckets and returns each bucket as soon
//!   as it's empty.
//! - [`SlabAllocator`]: fixed size classes with free lists over mapped
//!   regions.
//! - [`Buffer`] and [`MinHeap`]: growable array and binary heap whose storage
//!   comes from any of the above.
//!
//! Allocators that need memory get it from a parent allocator, so they can
//! be stacked:
//!
//! ```rust
//! use mmkit::{ArenaAllocator, BatchAllocator, Buffer, PageAllocator};
//!
//! let batch = BatchAllocator::new(PageAllocator);
//! let arena = ArenaAllocator::new(&batch);
//!
//! let mut numbers = Buffer::new_in(&arena);
//! numbers.push(1);
//! numbers.push(2);
//!
//! assert_eq!(numbers.as_slice(), &[1, 2]);
//! ```
//!
//! Every address handed out is preceded by a small header, see
//! [`HEADER_SIZE`], and is aligned to [`MAX_ALIGN`].

mod align;
mod allocator;
mod arena;
mod batch;
mod buffer;
mod error;
mod freelist;
mod header;
mod heap;
mod list;
mod page;
mod platform;
mod slab;
mod system;

#[cfg(test)]
mod testing;

use std::ptr::NonNull;

/// Non-null pointer to `T`. We use this in most cases instead of `*mut T`
/// because the compiler will yell at us if we don't write code for the `None`
/// case.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

pub use align::{align, align_up, checked_align_up, MAX_ALIGN, POINTER_SIZE};
pub use allocator::{Allocator, AllocatorExt};
pub use arena::ArenaAllocator;
pub use batch::{
    BatchAllocator, BatchConfig, Bucket, BucketOrder, BucketStats, LeastFreeSpace, MostFreeSpace,
    DEFAULT_BUCKET_SIZE,
};
pub use buffer::Buffer;
pub use error::ConfigError;
pub use header::HEADER_SIZE;
pub use heap::MinHeap;
pub use page::PageAllocator;
pub use platform::page_size;
pub use slab::{SlabAllocator, SlabConfig, DEFAULT_BLOCKS_PER_REGION, DEFAULT_SIZE_CLASSES};
pub use system::SystemAllocator;
