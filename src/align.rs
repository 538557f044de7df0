use std::mem;

use crate::error::size_overflow;

/// Pointer size in bytes on the current machine. Every header, block and
/// bump offset handed out by this crate is a multiple of this value.
pub const POINTER_SIZE: usize = mem::size_of::<usize>();

/// Largest alignment that the allocators in this crate guarantee for the
/// addresses they return. Typed helpers refuse types that need more.
pub const MAX_ALIGN: usize = POINTER_SIZE;

/// Returns the machine word alignment for the given size.
///
/// # Examples
///
/// ```rust
/// use std::mem;
/// use mmkit::align;
///
/// match mem::size_of::<usize>() {
///     8 => assert_eq!(align(13), 16), // 64 bit machine.
///     4 => assert_eq!(align(11), 12), // 32 bit machine.
///     _ => {}, // some other power of two, will work the same.
/// };
/// ```
#[inline]
pub fn align(to_be_aligned: usize) -> usize {
    align_up(to_be_aligned, POINTER_SIZE)
}

/// Rounds `value` up to the next multiple of `to`, which must be a power of
/// two. This is what we use to turn a byte count into a whole number of
/// pages:
///
/// ```rust
/// use mmkit::align_up;
///
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// assert_eq!(align_up(4097, 4096), 8192);
/// ```
///
/// # Panics
///
/// If the result doesn't fit in a `usize`. See [`checked_align_up`].
#[inline]
pub fn align_up(value: usize, to: usize) -> usize {
    match checked_align_up(value, to) {
        Some(aligned) => aligned,
        None => size_overflow(value),
    }
}

/// Same as [`align_up`] but returns `None` instead of panicking when the
/// result doesn't fit in a `usize`.
///
/// ```rust
/// use mmkit::checked_align_up;
///
/// assert_eq!(checked_align_up(4097, 4096), Some(8192));
/// assert_eq!(checked_align_up(usize::MAX - 8, 4096), None);
/// ```
#[inline]
pub fn checked_align_up(value: usize, to: usize) -> Option<usize> {
    debug_assert!(to.is_power_of_two());
    value.checked_add(to - 1).map(|padded| padded & !(to - 1))
}

/// Number of bytes an allocator needs for a request of `size` bytes plus
/// `overhead` bytes of its own metadata, rounded up to a multiple of `to`.
/// Every allocator computes its block, chunk and mapping lengths with this.
///
/// # Panics
///
/// If the result doesn't fit in a `usize`.
#[inline]
pub(crate) fn padded_size(size: usize, overhead: usize, to: usize) -> usize {
    match size.checked_add(overhead).and_then(|total| checked_align_up(total, to)) {
        Some(padded) => padded,
        None => size_overflow(size),
    }
}
