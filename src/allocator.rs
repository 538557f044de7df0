use std::{mem, ptr::NonNull};

use crate::align::MAX_ALIGN;

/// The allocator capability. Every allocator in this crate implements it and
/// every container in this crate ([`crate::Buffer`], [`crate::MinHeap`]) is
/// generic over it, so allocators can be swapped and stacked freely:
///
/// ```text
///  +--------------+   alloc/free   +-----------------+   alloc/free   +-----------------+
///  | Buffer<T, A> | -------------> | BatchAllocator  | -------------> | SystemAllocator |
///  +--------------+                | (MinHeap, owns  |                | (libc malloc)   |
///                                  |  its parent)    |                +-----------------+
///                                  +-----------------+
/// ```
///
/// All methods take `&self`. Allocators that keep bookkeeping do so behind a
/// [`std::cell::RefCell`], which also makes them `!Sync`: sharing one
/// instance between threads doesn't compile instead of silently corrupting
/// memory.
///
/// # Ownership
///
/// An allocator owns its parent by value and [`Allocator::destroy`] destroys
/// the whole parent chain. If the parent has to outlive the child, give the
/// child a reference instead: `&A` is an allocator too, it forwards
/// allocations to `A` but its `destroy` does nothing.
///
/// # Safety
///
/// Implementors must return addresses aligned to at least [`MAX_ALIGN`] that
/// are valid for reads and writes of the requested size until they are freed
/// or the allocator is destroyed. Containers rely on this.
pub unsafe trait Allocator {
    /// Allocates `size` bytes and returns the address of the first one.
    /// There's no error value: if the memory can't be obtained the process
    /// aborts.
    fn alloc(&self, size: usize) -> NonNull<u8>;

    /// Resizes the allocation at `address` to `size` bytes. The first
    /// `min(old_size, size)` bytes are preserved, the returned address may be
    /// different from `address`.
    ///
    /// # Safety
    ///
    /// `address` must have been returned by this allocator and must not have
    /// been freed yet.
    unsafe fn realloc(&self, address: NonNull<u8>, size: usize) -> NonNull<u8>;

    /// Releases the allocation at `address`.
    ///
    /// # Safety
    ///
    /// `address` must have been returned by this allocator and must not have
    /// been freed yet. Double frees and foreign pointers are not detected.
    unsafe fn free(&self, address: NonNull<u8>);

    /// Releases everything this allocator has obtained from its parent and
    /// then destroys the parent. Calling it more than once is fine, it only
    /// does work the first time.
    ///
    /// # Safety
    ///
    /// Every address previously returned by this allocator becomes dangling.
    /// Nothing may use them afterwards, and that includes containers that
    /// still hold a reference to this allocator.
    unsafe fn destroy(&self);
}

/// Borrowed handle. Forwards everything except [`Allocator::destroy`], since
/// a borrow doesn't own the allocator it points to.
unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn alloc(&self, size: usize) -> NonNull<u8> {
        (**self).alloc(size)
    }

    #[inline]
    unsafe fn realloc(&self, address: NonNull<u8>, size: usize) -> NonNull<u8> {
        (**self).realloc(address, size)
    }

    #[inline]
    unsafe fn free(&self, address: NonNull<u8>) {
        (**self).free(address)
    }

    #[inline]
    unsafe fn destroy(&self) {}
}

/// Typed helpers on top of [`Allocator`]. Implemented for every allocator, so
/// just import the trait and call `allocator.alloc_one::<T>()`.
///
/// The returned memory is uninitialized (except when the allocator says
/// otherwise, like [`crate::SystemAllocator`]). Writing the value is up to
/// the caller.
pub trait AllocatorExt: Allocator {
    /// Allocates space for one `T`.
    fn alloc_one<T>(&self) -> NonNull<T> {
        self.alloc(array_size::<T>(1)).cast()
    }

    /// Frees a value allocated with [`AllocatorExt::alloc_one`]. The value
    /// is not dropped.
    ///
    /// # Safety
    ///
    /// See [`Allocator::free`].
    unsafe fn free_one<T>(&self, value: NonNull<T>) {
        self.free(value.cast())
    }

    /// Allocates space for `n` contiguous values of `T`.
    fn alloc_many<T>(&self, n: usize) -> NonNull<[T]> {
        let address = self.alloc(array_size::<T>(n)).cast();
        NonNull::slice_from_raw_parts(address, n)
    }

    /// Frees an array allocated with [`AllocatorExt::alloc_many`]. The values
    /// are not dropped.
    ///
    /// # Safety
    ///
    /// See [`Allocator::free`].
    unsafe fn free_many<T>(&self, values: NonNull<[T]>) {
        self.free(values.cast())
    }

    /// Resizes an array to `n` values. Existing values up to `min(len, n)`
    /// are kept, values beyond `n` are not dropped.
    ///
    /// # Safety
    ///
    /// See [`Allocator::realloc`].
    unsafe fn realloc_many<T>(&self, values: NonNull<[T]>, n: usize) -> NonNull<[T]> {
        let address = self.realloc(values.cast(), array_size::<T>(n)).cast();
        NonNull::slice_from_raw_parts(address, n)
    }
}

impl<A: Allocator + ?Sized> AllocatorExt for A {}

/// Number of bytes needed for `n` values of `T`. Panics on overflow and on
/// types that need more alignment than our allocators guarantee.
#[inline]
pub(crate) fn array_size<T>(n: usize) -> usize {
    assert!(
        mem::align_of::<T>() <= MAX_ALIGN,
        "alignment of {} bytes is not supported, the maximum is {MAX_ALIGN}",
        mem::align_of::<T>()
    );

    match mem::size_of::<T>().checked_mul(n) {
        Some(size) => size,
        None => panic!("array of {n} elements of {} bytes overflows", mem::size_of::<T>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SystemAllocator;

    #[test]
    fn typed_helpers() {
        let allocator = SystemAllocator;

        unsafe {
            let one = allocator.alloc_one::<u64>();
            one.as_ptr().write(42);
            assert_eq!(*one.as_ptr(), 42);
            allocator.free_one(one);

            let mut many = allocator.alloc_many::<u32>(4);
            assert_eq!(many.len(), 4);
            for i in 0..4 {
                many.cast::<u32>().as_ptr().add(i).write(i as u32 + 1);
            }

            many = allocator.realloc_many(many, 8);
            assert_eq!(many.len(), 8);
            for i in 0..4 {
                assert_eq!(*many.cast::<u32>().as_ptr().add(i), i as u32 + 1);
            }

            many = allocator.realloc_many(many, 2);
            assert_eq!(many.as_ref(), &[1, 2]);

            allocator.free_many(many);
        }
    }

    #[test]
    fn trait_objects_and_borrowed_handles() {
        let allocator = SystemAllocator;
        let dynamic: &dyn Allocator = &allocator;

        unsafe {
            let address = dynamic.alloc_one::<u16>();
            address.as_ptr().write(7);
            assert_eq!(*address.as_ptr(), 7);
            dynamic.free_one(address);

            // Destroying a borrowed handle doesn't destroy the allocator.
            (&dynamic).destroy();
        }
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn array_size_overflow_panics() {
        array_size::<u64>(usize::MAX);
    }

    #[test]
    #[should_panic(expected = "not supported")]
    fn over_aligned_types_are_rejected() {
        #[repr(align(64))]
        struct CacheLine([u8; 64]);

        array_size::<CacheLine>(1);
    }
}
