use std::slice;

use crate::{Allocator, Buffer, SystemAllocator};

/// Binary heap stored in a [`Buffer<T, A>`]. The ordering is a `less(a, b)`
/// predicate given at construction: the root is always the element that
/// `less` ranks before every other one. Flip the predicate to get a max-heap.
///
/// ```text
///                 +---+
///                 | 1 |                 index 0
///                 +---+
///               /       \
///           +---+       +---+
///           | 3 |       | 8 |           indices 1, 2
///           +---+       +---+
///          /
///      +---+
///      | 5 |                            index 3
///      +---+
///
/// Buffer: [1, 3, 8, 5]     parent(i) = (i - 1) / 2, children(i) = 2i + 1, 2i + 2
/// ```
///
/// Elements that compare equal come out in no particular order.
///
/// # Examples
///
/// ```rust
/// use mmkit::{MinHeap, SystemAllocator};
///
/// let mut heap = MinHeap::new_in(SystemAllocator, |a: &i32, b: &i32| a < b);
///
/// for value in [5, 3, 8, 1] {
///     heap.push(value);
/// }
///
/// assert_eq!(heap.pop(), 1);
/// assert_eq!(heap.pop(), 3);
/// assert_eq!(heap.pop(), 5);
/// assert_eq!(heap.pop(), 8);
/// ```
pub struct MinHeap<T, A: Allocator = SystemAllocator, F = fn(&T, &T) -> bool>
where
    F: Fn(&T, &T) -> bool,
{
    data: Buffer<T, A>,
    less: F,
}

impl<T, A, F> MinHeap<T, A, F>
where
    A: Allocator,
    F: Fn(&T, &T) -> bool,
{
    /// Empty heap ordered by `less`, storing its elements in `allocator`.
    pub fn new_in(allocator: A, less: F) -> Self {
        Self {
            data: Buffer::new_in(allocator),
            less,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The allocator the underlying buffer uses.
    #[inline]
    pub fn allocator(&self) -> &A {
        self.data.allocator()
    }

    /// Adds `value` to the heap. O(log n).
    pub fn push(&mut self, value: T) {
        self.data.push(value);
        self.sift_up(self.data.len() - 1);
    }

    /// Removes and returns the root. O(log n).
    ///
    /// # Panics
    ///
    /// If the heap is empty.
    pub fn pop(&mut self) -> T {
        assert!(!self.is_empty(), "cannot pop from an empty heap");

        let root = self.data.remove_at(0);
        self.sift_down(0);

        root
    }

    /// Returns the root without removing it.
    ///
    /// # Panics
    ///
    /// If the heap is empty.
    pub fn peek(&self) -> &T {
        assert!(!self.is_empty(), "cannot peek into an empty heap");
        self.data.at(0)
    }

    /// Removes the first element (in storage order) for which `predicate`
    /// returns `true`. O(n) to find it, O(log n) to fix the heap afterwards.
    pub fn remove(&mut self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        let index = self.data.iter().position(predicate)?;
        Some(self.remove_index(index))
    }

    /// Elements in storage order, which is not sorted order.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.data.iter()
    }

    /// Drops every element and releases the storage, see [`Buffer::release`].
    pub fn release(&mut self) {
        self.data.release();
    }

    /// Drops every element and releases the storage.
    pub fn free(self) {
        drop(self)
    }

    fn remove_index(&mut self, index: usize) -> T {
        let last = self.data.len() - 1;
        if index == last {
            return self.data.pop();
        }

        // The last element takes the place of the removed one. It might have
        // to go either up or down from there, and only one of these moves
        // will actually do something.
        self.data.swap(index, last);
        let removed = self.data.pop();
        self.sift_down(index);
        self.sift_up(index);

        removed
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if (self.less)(self.data.at(parent), self.data.at(index)) {
                break;
            }

            self.data.swap(parent, index);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.data.len();

        loop {
            let left = 2 * index + 1;
            let right = 2 * index + 2;
            let mut first = index;

            if left < len && (self.less)(self.data.at(left), self.data.at(first)) {
                first = left;
            }

            if right < len && (self.less)(self.data.at(right), self.data.at(first)) {
                first = right;
            }

            if first == index {
                break;
            }

            self.data.swap(index, first);
            index = first;
        }
    }
}
