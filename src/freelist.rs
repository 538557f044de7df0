use std::ptr::NonNull;

use crate::Pointer;

/// When a slab block is free nobody else is using its content, so we store
/// the free list right there. The allocation header stays untouched, it was
/// written when the region was carved and keeps pointing to the region:
///
/// ```text
/// +----------------------------+
/// |   Header (region, size)    | <--+ Still valid while the block is free.
/// +----------------------------+
/// | pointer to next free block | <--+ FreeBlock struct, lives in the
/// +----------------------------+    | block content.
/// |     Rest of the block      |    |
/// |          ......            | <--+ Garbage, nobody cares.
/// +----------------------------+
/// ```
///
/// Once the block is handed out again the user overwrites this struct.
pub(crate) struct FreeBlock {
    pub next: Pointer<FreeBlock>,
}

/// Singly linked LIFO stack of free blocks. The last block pushed is the
/// first one popped, which gives us the "reuse what was just freed"
/// behaviour for free.
pub(crate) struct FreeList {
    pub head: Pointer<FreeBlock>,
    pub len: usize,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Pushes the block located at `address` on top of the stack.
    ///
    /// # Safety
    ///
    /// `address` must be pointer aligned, valid for writes of one pointer and
    /// not used by anybody else until it's popped again.
    #[inline]
    pub unsafe fn push(&mut self, address: NonNull<u8>) {
        let block = address.cast::<FreeBlock>();
        block.as_ptr().write(FreeBlock { next: self.head });
        self.head = Some(block);
        self.len += 1;
    }

    /// Pops the most recently pushed block.
    ///
    /// # Safety
    ///
    /// Every block in the list must still be valid. This is only violated if
    /// the allocator user writes to an address that was previously
    /// deallocated (use after free).
    #[inline]
    pub unsafe fn pop(&mut self) -> Pointer<u8> {
        let block = self.head?;
        self.head = (*block.as_ptr()).next;
        self.len -= 1;
        Some(block.cast())
    }

    /// Forgets every block. Used when the memory behind them is unmapped.
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }
}
