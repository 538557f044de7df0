use std::{
    fmt,
    ops::{Index, IndexMut},
    ptr::{self, NonNull},
    slice,
};

use crate::{Allocator, AllocatorExt, SystemAllocator};

/// Growable contiguous array whose storage comes from an [`Allocator`]
/// instead of the global Rust allocator.
///
/// ```text
///             len             capacity
///              |                  |
///              v                  v
/// +---+---+---+---+---+---+---+---+
/// | a | b | c |   |   |   |   |   |  <- one allocation from `A`
/// +---+---+---+---+---+---+---+---+
/// ```
///
/// A new buffer starts with capacity 1 and capacity doubles (through
/// [`Allocator::realloc`]) every time a push finds it full, so capacity is
/// always a power of two and never shrinks.
///
/// Out of bounds access and popping an empty buffer are programmer errors
/// and panic.
///
/// # Examples
///
/// ```rust
/// use mmkit::{ArenaAllocator, Buffer, SystemAllocator};
///
/// let arena = ArenaAllocator::new(SystemAllocator);
/// let mut buffer = Buffer::new_in(&arena);
///
/// buffer.push(1);
/// buffer.push(2);
/// buffer.push(3);
///
/// assert_eq!(buffer.len(), 3);
/// assert_eq!(buffer.capacity(), 4);
/// assert_eq!(buffer.pop(), 3);
/// assert_eq!(buffer.as_slice(), &[1, 2]);
/// ```
pub struct Buffer<T, A: Allocator = SystemAllocator> {
    /// Start of the storage. Dangling when `capacity == 0`.
    ptr: NonNull<T>,
    len: usize,
    capacity: usize,
    allocator: A,
}

impl<T> Buffer<T> {
    /// Empty buffer backed by [`SystemAllocator`].
    pub fn new() -> Self {
        Self::new_in(SystemAllocator)
    }
}

impl<T> Default for Buffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: Allocator> Buffer<T, A> {
    /// Empty buffer with capacity 1.
    pub fn new_in(allocator: A) -> Self {
        Self::with_capacity_in(1, allocator)
    }

    /// Empty buffer that can hold `capacity` elements before growing. A
    /// capacity of 0 is bumped to 1.
    pub fn with_capacity_in(capacity: usize, allocator: A) -> Self {
        let capacity = capacity.max(1);
        let ptr = allocator.alloc_many::<T>(capacity).cast();

        Self {
            ptr,
            len: 0,
            capacity,
            allocator,
        }
    }

    /// Buffer holding a copy of `values`, with `len == capacity == values.len()`.
    pub fn from_slice_in(values: &[T], allocator: A) -> Self
    where
        T: Clone,
    {
        let mut buffer = Self::with_capacity_in(values.len(), allocator);
        for value in values {
            buffer.push(value.clone());
        }

        buffer
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements the current storage can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The allocator this buffer gets its storage from.
    #[inline]
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Appends `value`, doubling the capacity first if the buffer is full.
    pub fn push(&mut self, value: T) {
        if self.len == self.capacity {
            self.grow();
        }

        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
    }

    /// Removes and returns the last element.
    ///
    /// # Panics
    ///
    /// If the buffer is empty.
    pub fn pop(&mut self) -> T {
        assert!(self.len > 0, "cannot pop from an empty buffer");

        self.len -= 1;
        unsafe { self.ptr.as_ptr().add(self.len).read() }
    }

    /// Reference to the element at `index`.
    ///
    /// # Panics
    ///
    /// If `index >= len`.
    pub fn at(&self, index: usize) -> &T {
        self.check_bounds(index, "index");
        unsafe { &*self.ptr.as_ptr().add(index) }
    }

    /// Mutable reference to the element at `index`.
    ///
    /// # Panics
    ///
    /// If `index >= len`.
    pub fn at_mut(&mut self, index: usize) -> &mut T {
        self.check_bounds(index, "index");
        unsafe { &mut *self.ptr.as_ptr().add(index) }
    }

    /// Replaces the element at `index`, dropping the previous one.
    ///
    /// # Panics
    ///
    /// If `index >= len`.
    pub fn set(&mut self, index: usize, value: T) {
        self.check_bounds(index, "set");
        *self.at_mut(index) = value;
    }

    /// Last element, if any.
    pub fn last(&self) -> Option<&T> {
        self.as_slice().last()
    }

    /// Removes the element at `index` and moves the last element into its
    /// place. O(1), but the order of the elements is not preserved.
    ///
    /// # Panics
    ///
    /// If `index >= len`.
    pub fn remove_at(&mut self, index: usize) -> T {
        self.check_bounds(index, "remove");

        unsafe {
            let base = self.ptr.as_ptr();
            let removed = base.add(index).read();

            self.len -= 1;
            if index != self.len {
                ptr::copy_nonoverlapping(base.add(self.len), base.add(index), 1);
            }

            removed
        }
    }

    /// Swaps the elements at `a` and `b`.
    ///
    /// # Panics
    ///
    /// If either index is out of bounds.
    pub fn swap(&mut self, a: usize, b: usize) {
        self.check_bounds(a, "swap");
        self.check_bounds(b, "swap");
        self.as_mut_slice().swap(a, b);
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Drops every element and gives the storage back to the allocator. The
    /// buffer stays usable: it's empty with capacity 0 and the next push
    /// allocates again.
    pub fn release(&mut self) {
        if self.capacity == 0 {
            return;
        }

        unsafe {
            // If a destructor panics we'd rather leak than double drop.
            let elements = ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
            self.len = 0;
            ptr::drop_in_place(elements);

            let storage = NonNull::slice_from_raw_parts(self.ptr, self.capacity);
            self.allocator.free_many(storage);
        }

        self.ptr = NonNull::dangling();
        self.capacity = 0;
    }

    /// Drops the elements and releases the storage. Same as letting the
    /// buffer go out of scope, but explicit.
    pub fn free(self) {
        drop(self)
    }

    /// Doubles the capacity (or allocates the first slot after a release).
    fn grow(&mut self) {
        if self.capacity == 0 {
            self.ptr = self.allocator.alloc_many::<T>(1).cast();
            self.capacity = 1;
            return;
        }

        let new_capacity = match self.capacity.checked_mul(2) {
            Some(capacity) => capacity,
            None => panic!("buffer capacity overflow"),
        };

        unsafe {
            let storage = NonNull::slice_from_raw_parts(self.ptr, self.capacity);
            self.ptr = self.allocator.realloc_many(storage, new_capacity).cast();
        }

        self.capacity = new_capacity;
    }

    #[inline]
    fn check_bounds(&self, index: usize, operation: &str) {
        if index >= self.len {
            panic!(
                "cannot {operation} {index} in a buffer with length {}",
                self.len
            );
        }
    }
}

impl<T, A: Allocator> Drop for Buffer<T, A> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T, A: Allocator> Index<usize> for Buffer<T, A> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        self.at(index)
    }
}

impl<T, A: Allocator> IndexMut<usize> for Buffer<T, A> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        self.at_mut(index)
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a Buffer<T, A> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for Buffer<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use crate::{ArenaAllocator, BatchAllocator};

    #[test]
    fn capacity_doubles() {
        let mut buffer = Buffer::new();
        assert_eq!(buffer.capacity(), 1);

        buffer.push(1);
        buffer.push(2);
        buffer.push(3);

        // 1 -> 2 -> 4.
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.capacity(), 4);

        for i in 4..=9 {
            buffer.push(i);
        }
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn pop_at_set_and_remove() {
        let mut buffer = Buffer::from_slice_in(&[10, 20, 30, 40], SystemAllocator);
        assert_eq!(buffer.capacity(), 4);

        assert_eq!(*buffer.at(1), 20);
        buffer.set(1, 21);
        buffer[2] += 1;
        assert_eq!(buffer.as_slice(), &[10, 21, 31, 40]);

        // Swap remove, last element takes its place.
        assert_eq!(buffer.remove_at(0), 10);
        assert_eq!(buffer.as_slice(), &[40, 21, 31]);

        // Removing the last element is just a pop.
        assert_eq!(buffer.remove_at(2), 31);
        assert_eq!(buffer.as_slice(), &[40, 21]);

        assert_eq!(buffer.pop(), 21);
        assert_eq!(buffer.last(), Some(&40));
        assert_eq!(buffer.pop(), 40);
        assert!(buffer.is_empty());

        // Capacity never shrinks.
        assert_eq!(buffer.capacity(), 4);
    }

    #[test]
    #[should_panic(expected = "cannot pop from an empty buffer")]
    fn pop_empty_panics() {
        let mut buffer = Buffer::<u8>::new();
        buffer.pop();
    }

    #[test]
    #[should_panic(expected = "cannot index 3 in a buffer with length 3")]
    fn out_of_bounds_panics() {
        let buffer = Buffer::from_slice_in(&[1, 2, 3], SystemAllocator);
        buffer.at(3);
    }

    #[test]
    #[should_panic(expected = "cannot set 0 in a buffer with length 0")]
    fn set_out_of_bounds_panics() {
        let mut buffer = Buffer::<u8>::new();
        buffer.set(0, 1);
    }

    #[test]
    fn drops_elements_on_release_and_drop() {
        let drops = Rc::new(Cell::new(0));

        struct Tracked(Rc<Cell<usize>>);

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let mut buffer = Buffer::new();
        for _ in 0..3 {
            buffer.push(Tracked(Rc::clone(&drops)));
        }

        buffer.set(0, Tracked(Rc::clone(&drops)));
        assert_eq!(drops.get(), 1);

        buffer.release();
        assert_eq!(drops.get(), 4);
        assert_eq!(buffer.capacity(), 0);

        // Usable again after a release.
        buffer.push(Tracked(Rc::clone(&drops)));
        assert_eq!(buffer.capacity(), 1);

        buffer.free();
        assert_eq!(drops.get(), 5);
    }

    #[test]
    fn works_on_top_of_other_allocators() {
        let arena = ArenaAllocator::new(SystemAllocator);
        let batch = BatchAllocator::new(SystemAllocator);

        let mut in_arena = Buffer::new_in(&arena);
        let mut in_batch = Buffer::new_in(&batch);

        for i in 0..1000u64 {
            in_arena.push(i);
            in_batch.push(i * 2);
        }

        assert_eq!(in_arena.capacity(), 1024);
        assert_eq!(in_batch.capacity(), 1024);
        assert!(in_arena.iter().copied().eq(0..1000));
        assert!(in_batch.iter().copied().eq((0..1000).map(|i| i * 2)));

        in_batch.free();
        assert_eq!(batch.bucket_count(), 0);
    }
}
