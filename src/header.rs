use std::{mem, ptr::NonNull};

/// Allocation header size in bytes. It's the same for every `R` because the
/// header only stores a pointer to `R` and a size, so two machine words.
pub const HEADER_SIZE: usize = mem::size_of::<Header<u8>>();

/// Metadata that we write right before every address we give to our users.
/// `R` is whatever the owning allocator calls a region: a chunk for
/// [`crate::ArenaAllocator`], a bucket for [`crate::BatchAllocator`] and a
/// mapped region for [`crate::SlabAllocator`] and [`crate::PageAllocator`].
///
/// ```text
/// +----------------------------+          <----------------------+
/// | pointer to owning region   |                                 |
/// +----------------------------+                                 | Header<R>
/// | requested size             |                                 |
/// +----------------------------+          <----------------------+
/// |       User content         |   <------+ Returned address points here.
/// |            ...             |          |
/// |            ...             |          | Addressable content
/// |            ...             |   <------+
/// +----------------------------+
/// ```
///
/// The header is invisible to the caller. The only thing we need to find it
/// again is the address we returned, because it's always located exactly
/// [`HEADER_SIZE`] bytes before it.
#[repr(C)]
pub(crate) struct Header<R> {
    /// Region where this allocation lives.
    pub region: NonNull<R>,
    /// Number of bytes requested by the caller, excluding the header.
    pub size: usize,
}

impl<R> Header<R> {
    /// Writes a new header at `address` and returns the address right after
    /// it, which is the one that the caller should receive.
    ///
    /// # Safety
    ///
    /// `address` must be aligned to [`crate::align::POINTER_SIZE`] and valid
    /// for writes of at least [`HEADER_SIZE`] bytes.
    #[inline]
    pub unsafe fn write(address: NonNull<u8>, region: NonNull<R>, size: usize) -> NonNull<u8> {
        let header = address.cast::<Self>();
        header.as_ptr().write(Self { region, size });
        Self::content_address_of(header)
    }

    /// Returns a pointer to a [`Header<R>`] given an address that points right
    /// after a valid [`Header<R>`].
    ///
    /// ```text
    /// +-------------+
    /// |  Header<R>  | <- Returned address points here.
    /// +-------------+
    /// |   Content   | <- Given address should point here.
    /// +-------------+
    /// |     ...     |
    /// +-------------+
    /// ```
    ///
    /// # Safety
    ///
    /// Caller must guarantee that the given address points exactly to the first
    /// memory cell after a [`Header<R>`]. This function will mostly be used for
    /// deallocating memory, so the allocator user should give us an address
    /// that we previously allocated. As long as that's true, this is safe,
    /// otherwise it's undefined behaviour.
    #[inline]
    pub unsafe fn from_content_address(address: NonNull<u8>) -> NonNull<Self> {
        NonNull::new_unchecked(address.as_ptr().cast::<Self>().offset(-1))
    }

    /// Returns the address after the header.
    ///
    /// # Safety
    ///
    /// If `header` is a valid [`NonNull<Header<R>>`], the offset will return an
    /// address that points right after the header. That address is safe to use
    /// as long as no more than `size` bytes are written.
    ///
    /// # Notes
    ///
    /// We are using this function as `Header::content_address_of(header)`
    /// instead of `header.content_address()` because we want to avoid creating
    /// intermediary references to `self` to keep Miri happy. See
    /// [Stacked Borrows](https://github.com/rust-lang/unsafe-code-guidelines/blob/master/wip/stacked-borrows.md).
    #[inline]
    pub unsafe fn content_address_of(header: NonNull<Self>) -> NonNull<u8> {
        NonNull::new_unchecked(header.as_ptr().offset(1)).cast()
    }

    /// Shortcut for reading the header of a user address.
    ///
    /// # Safety
    ///
    /// Same as [`Header::from_content_address`].
    #[inline]
    pub unsafe fn of(address: NonNull<u8>) -> (NonNull<R>, usize) {
        let header = Self::from_content_address(address).as_ptr();
        ((*header).region, (*header).size)
    }
}
