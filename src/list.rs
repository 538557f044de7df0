use std::{marker::PhantomData, ptr::NonNull};

use crate::Pointer;

/// Linked list node. Arena chunks and slab regions are stored as nodes of
/// this type so that we can find all of them again at `destroy` time.
pub(crate) struct Node<T> {
    pub next: Pointer<Self>,
    pub prev: Pointer<Self>,
    pub data: T,
}

/// Intrusive doubly linked list. The list never allocates: whoever appends a
/// node also decides where that node lives, which is exactly what we need
/// because, well, we are the allocator. Arena chunks get their node from the
/// parent allocator, slab regions write their node at the beginning of the
/// mapped region itself.
pub(crate) struct LinkedList<T> {
    pub head: Pointer<Node<T>>,
    pub tail: Pointer<Node<T>>,
    pub len: usize,
    marker: PhantomData<T>,
}

/// Iterator over the nodes of a [`LinkedList<T>`], from head to tail.
pub(crate) struct Iter<T> {
    current: Pointer<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

impl<T> LinkedList<T> {
    /// Creates an empty linked list. No allocations happen.
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            marker: PhantomData,
        }
    }

    /// Number of nodes in the list.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Appends a new node to the linked list. Since it cannot do allocations
    /// it needs the address where the node should be written to.
    ///
    /// # Safety
    ///
    /// Caller must guarantee that `address` is valid for writes of
    /// `size_of::<Node<T>>()` bytes and aligned for [`Node<T>`].
    ///
    /// # Arguments
    ///
    /// * `data` - The data that the new node will hold.
    ///
    /// * `address` - Memory address where the new node will be written.
    pub unsafe fn append(&mut self, data: T, address: NonNull<u8>) -> NonNull<Node<T>> {
        let node = address.cast::<Node<T>>();

        node.as_ptr().write(Node {
            prev: self.tail,
            next: None,
            data,
        });

        if let Some(tail) = self.tail {
            (*tail.as_ptr()).next = Some(node);
        } else {
            self.head = Some(node);
        }

        self.tail = Some(node);
        self.len += 1;

        node
    }

    /// Unlinks `node` from the linked list. The memory of the node itself is
    /// not touched apart from its links, releasing it is up to the caller.
    ///
    /// # Safety
    ///
    /// `node` must be valid and must belong to this list.
    pub unsafe fn remove(&mut self, node: NonNull<Node<T>>) {
        let prev = (*node.as_ptr()).prev;
        let next = (*node.as_ptr()).next;

        match prev {
            Some(prev) => (*prev.as_ptr()).next = next,
            None => self.head = next,
        }

        match next {
            Some(next) => (*next.as_ptr()).prev = prev,
            None => self.tail = prev,
        }

        (*node.as_ptr()).prev = None;
        (*node.as_ptr()).next = None;

        self.len -= 1;
    }

    /// Returns an iterator over the node pointers. Removing the node that was
    /// just yielded is fine, removing any other node is not.
    pub fn iter(&self) -> Iter<T> {
        Iter {
            current: self.head,
            len: self.len,
            marker: PhantomData,
        }
    }
}

impl<T> Iterator for Iter<T> {
    type Item = NonNull<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.current.map(|node| unsafe {
            self.current = (*node.as_ptr()).next;
            self.len -= 1;
            node
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len, Some(self.len))
    }
}
