use std::{
    cell::RefCell,
    ptr::{self, NonNull},
};

use crate::{
    align::{padded_size, POINTER_SIZE},
    header::{Header, HEADER_SIZE},
    list::{LinkedList, Node},
    platform::page_size,
    Allocator, AllocatorExt, SystemAllocator,
};

/// Piece of memory obtained from the parent allocator. Allocations are
/// carved from it one after the other and never given back individually.
pub(crate) struct Chunk {
    /// First byte of the chunk.
    data: NonNull<u8>,
    /// Total size of the chunk, multiple of the page size.
    size: usize,
    /// Offset of the next allocation. Always a multiple of the pointer size.
    allocated: usize,
    /// Number of allocations in this chunk that were not freed.
    live: usize,
}

/// Chunked bump allocator. Allocating is just writing a [`Header`] at the
/// current offset of the last chunk and moving the offset forward:
///
/// ```text
///                 Chunk 1                                Chunk 2
/// +--------+---------+--------+-------+-----+    +--------+-----------+--------------+
/// | Header | Content | Header | Cont. | ... | -> | Header |  Content  |     Free     |
/// +--------+---------+--------+-------+-----+    +--------+-----------+--------------+
///                                                                     ^
///                                                                     | allocated
/// ```
///
/// When the request doesn't fit in the last chunk a new one is requested
/// from the parent, big enough for the request rounded up to whole pages.
/// Older chunks are never revisited.
///
/// [`Allocator::free`] only decrements a counter: memory comes back all at
/// once when the arena is destroyed (or dropped), which frees every chunk
/// through the parent and then destroys the parent.
///
/// # Examples
///
/// ```rust
/// use mmkit::{Allocator, AllocatorExt, ArenaAllocator, SystemAllocator};
///
/// let arena = ArenaAllocator::new(SystemAllocator);
///
/// let a = arena.alloc_one::<u64>();
/// let b = arena.alloc_one::<u64>();
///
/// unsafe {
///     a.as_ptr().write(1);
///     b.as_ptr().write(2);
///     assert_eq!(*a.as_ptr() + *b.as_ptr(), 3);
/// }
///
/// assert_eq!(arena.chunk_count(), 1);
/// assert_eq!(arena.live_allocations(), 2);
/// ```
pub struct ArenaAllocator<A: Allocator = SystemAllocator> {
    parent: A,
    chunks: RefCell<LinkedList<Chunk>>,
}

impl<A: Allocator> ArenaAllocator<A> {
    /// Empty arena. No memory is requested until the first allocation.
    pub fn new(parent: A) -> Self {
        Self {
            parent,
            chunks: RefCell::new(LinkedList::new()),
        }
    }

    /// The allocator chunks come from.
    pub fn parent(&self) -> &A {
        &self.parent
    }

    /// Number of chunks currently obtained from the parent.
    pub fn chunk_count(&self) -> usize {
        self.chunks.borrow().len()
    }

    /// Total size of every chunk in bytes.
    pub fn mapped_bytes(&self) -> usize {
        self.chunks
            .borrow()
            .iter()
            .map(|node| unsafe { (*node.as_ptr()).data.size })
            .sum()
    }

    /// Allocations that were not freed yet, across all chunks.
    pub fn live_allocations(&self) -> usize {
        self.chunks
            .borrow()
            .iter()
            .map(|node| unsafe { (*node.as_ptr()).data.live })
            .sum()
    }

    /// Requests a chunk that can hold at least one block of `block_size`
    /// bytes (header included) and appends it to the list.
    fn new_chunk(
        &self,
        chunks: &mut LinkedList<Chunk>,
        block_size: usize,
    ) -> NonNull<Node<Chunk>> {
        let chunk_size = padded_size(block_size, 0, page_size());
        let data = self.parent.alloc(chunk_size);
        let node = self.parent.alloc_one::<Node<Chunk>>();

        log::debug!("arena: new chunk of {chunk_size} bytes");

        let chunk = Chunk {
            data,
            size: chunk_size,
            allocated: 0,
            live: 0,
        };

        unsafe { chunks.append(chunk, node.cast()) }
    }
}

impl Default for ArenaAllocator {
    fn default() -> Self {
        Self::new(SystemAllocator)
    }
}

unsafe impl<A: Allocator> Allocator for ArenaAllocator<A> {
    fn alloc(&self, size: usize) -> NonNull<u8> {
        let block_size = padded_size(size, HEADER_SIZE, POINTER_SIZE);

        let mut chunks = self.chunks.borrow_mut();
        let tail = chunks.tail;

        let node = match tail {
            Some(tail) if unsafe { fits(&(*tail.as_ptr()).data, block_size) } => tail,
            _ => self.new_chunk(&mut chunks, block_size),
        };

        unsafe {
            let chunk = &mut (*node.as_ptr()).data;
            let address = NonNull::new_unchecked(chunk.data.as_ptr().add(chunk.allocated));

            chunk.allocated += block_size;
            chunk.live += 1;

            Header::write(address, node, size)
        }
    }

    unsafe fn realloc(&self, address: NonNull<u8>, size: usize) -> NonNull<u8> {
        let (node, old_size) = Header::<Node<Chunk>>::of(address);

        let new_address = self.alloc(size);
        ptr::copy_nonoverlapping(address.as_ptr(), new_address.as_ptr(), old_size.min(size));

        // The old block stays where it is, but it doesn't count as live
        // anymore since nobody can free it after this.
        (*node.as_ptr()).data.live -= 1;

        new_address
    }

    unsafe fn free(&self, address: NonNull<u8>) {
        let (node, _) = Header::<Node<Chunk>>::of(address);
        (*node.as_ptr()).data.live -= 1;
    }

    unsafe fn destroy(&self) {
        let mut chunks = self.chunks.borrow_mut();

        if chunks.len() > 0 {
            log::debug!("arena: releasing {} chunks", chunks.len());
        }

        while let Some(node) = chunks.head {
            chunks.remove(node);
            self.parent.free((*node.as_ptr()).data.data);
            self.parent.free_one(node);
        }

        drop(chunks);
        self.parent.destroy();
    }
}

impl<A: Allocator> Drop for ArenaAllocator<A> {
    fn drop(&mut self) {
        unsafe { self.destroy() }
    }
}

/// Whether a block of `block_size` bytes, header included, fits in what's
/// left of `chunk`. `allocated` never exceeds `size`.
#[inline]
fn fits(chunk: &Chunk, block_size: usize) -> bool {
    chunk.size - chunk.allocated >= block_size
}
