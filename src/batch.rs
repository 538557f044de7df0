use std::{
    cell::RefCell,
    fmt,
    marker::PhantomData,
    ptr::{self, NonNull},
};

use crate::{
    align::{padded_size, POINTER_SIZE},
    header::{Header, HEADER_SIZE},
    platform::page_size,
    Allocator, AllocatorExt, MinHeap, SystemAllocator,
};

/// Default minimum size of a bucket in bytes.
pub const DEFAULT_BUCKET_SIZE: usize = 16 * 1024;

/// Construction parameters for [`BatchAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Minimum size of a bucket. Requests that don't fit get a bucket of
    /// their own, and every bucket is rounded up to whole pages anyway.
    pub bucket_size: usize,
}

impl BatchConfig {
    pub fn bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = bucket_size;
        self
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            bucket_size: DEFAULT_BUCKET_SIZE,
        }
    }
}

/// Piece of memory obtained from the parent in one go. Allocations are carved
/// from the start of it towards the end, and the whole bucket goes back to
/// the parent as soon as its last allocation is freed.
pub struct Bucket {
    data: NonNull<u8>,
    size: usize,
    used: usize,
    live: usize,
}

impl Bucket {
    /// Total size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes already handed out, headers included.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn free_space(&self) -> usize {
        self.size - self.used
    }

    /// Allocations in this bucket that were not freed yet.
    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    fn stats(&self) -> BucketStats {
        BucketStats {
            size: self.size,
            used: self.used,
            live: self.live,
        }
    }
}

/// Snapshot of a [`Bucket`], see [`BatchAllocator::buckets`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketStats {
    pub size: usize,
    pub used: usize,
    pub live: usize,
}

/// Decides which bucket the allocator tries first. The bucket for which
/// `precedes` returns `true` against every other one sits at the root of the
/// heap.
pub trait BucketOrder {
    fn precedes(a: &Bucket, b: &Bucket) -> bool;
}

/// Bucket with the most free space first. Spreads allocations so that a new
/// bucket is only needed when no bucket at all has room.
#[derive(Clone, Copy, Debug, Default)]
pub struct MostFreeSpace;

impl BucketOrder for MostFreeSpace {
    #[inline]
    fn precedes(a: &Bucket, b: &Bucket) -> bool {
        a.free_space() > b.free_space()
    }
}

/// Bucket with the least free space first. Packs allocations tightly, but
/// since only the root is checked it requests new buckets more often.
#[derive(Clone, Copy, Debug, Default)]
pub struct LeastFreeSpace;

impl BucketOrder for LeastFreeSpace {
    #[inline]
    fn precedes(a: &Bucket, b: &Bucket) -> bool {
        a.free_space() < b.free_space()
    }
}

/// What the heap stores. Buckets live in memory from the parent, the heap
/// only moves pointers around.
#[derive(Clone, Copy, PartialEq, Eq)]
struct BucketPtr(NonNull<Bucket>);

impl BucketPtr {
    /// # Safety
    ///
    /// The bucket must not have been released.
    #[inline]
    unsafe fn get<'a>(self) -> &'a Bucket {
        &*self.0.as_ptr()
    }

    /// # Safety
    ///
    /// Same as [`BucketPtr::get`], and no other reference to the bucket may
    /// be alive.
    #[inline]
    unsafe fn get_mut<'a>(self) -> &'a mut Bucket {
        &mut *self.0.as_ptr()
    }
}

fn compare<O: BucketOrder>(a: &BucketPtr, b: &BucketPtr) -> bool {
    unsafe { O::precedes(a.get(), b.get()) }
}

/// Allocator that requests big buckets from its parent and splits them.
/// Useful when the parent is expensive to call, like a system allocator
/// behind a lock or a syscall, and allocations tend to be freed in groups.
///
/// ```text
///                           MinHeap<Bucket> (ordered by O)
///                                 +----------+
///                                 | Bucket 2 | <- most free space (root)
///                                 +----------+
///                                /            \
///                       +----------+        +----------+
///                       | Bucket 1 |        | Bucket 3 |
///                       +----------+        +----------+
///
/// Bucket 2:
/// +--------+---------+--------+---------+----------------------------------+
/// | Header | Content | Header | Content |               Free               |
/// +--------+---------+--------+---------+----------------------------------+
///                                       ^
///                                       | used
/// ```
///
/// Only the root bucket is considered for a new allocation. If it doesn't
/// have room a new bucket is created, so the policy `O` decides the tradeoff
/// between speed and packing. Each bucket counts its live allocations and is
/// returned to the parent the moment that count drops to zero. Whatever is
/// left is returned when the allocator is destroyed or dropped.
///
/// The heap storage itself is also allocated from the parent.
///
/// # Examples
///
/// ```rust
/// use mmkit::{Allocator, BatchAllocator, BatchConfig, SystemAllocator};
///
/// let config = BatchConfig::default().bucket_size(64);
/// let batch = BatchAllocator::with_config(SystemAllocator, config);
///
/// let a = batch.alloc(20);
/// let b = batch.alloc(20);
/// assert_eq!(batch.bucket_count(), 1);
///
/// unsafe {
///     batch.free(a);
///     assert_eq!(batch.bucket_count(), 1);
///     batch.free(b);
///     assert_eq!(batch.bucket_count(), 0);
/// }
/// ```
pub struct BatchAllocator<A: Allocator = SystemAllocator, O: BucketOrder = MostFreeSpace> {
    /// The heap owns the parent allocator, reach it with `allocator()`.
    buckets: RefCell<MinHeap<BucketPtr, A>>,
    bucket_size: usize,
    order: PhantomData<O>,
}

impl<A: Allocator> BatchAllocator<A> {
    /// Batch allocator with [`BatchConfig::default`] and [`MostFreeSpace`]
    /// ordering.
    pub fn new(parent: A) -> Self {
        Self::with_config(parent, BatchConfig::default())
    }

    /// Batch allocator with the given configuration and [`MostFreeSpace`]
    /// ordering. Use [`BatchAllocator::with_order`] for other policies.
    pub fn with_config(parent: A, config: BatchConfig) -> Self {
        Self::with_order(parent, config)
    }
}

impl Default for BatchAllocator {
    fn default() -> Self {
        Self::new(SystemAllocator)
    }
}

impl<A: Allocator, O: BucketOrder> BatchAllocator<A, O> {
    /// Batch allocator with the given configuration. The ordering policy is
    /// the `O` type parameter:
    ///
    /// ```rust
    /// use mmkit::{BatchAllocator, BatchConfig, LeastFreeSpace, SystemAllocator};
    ///
    /// let batch: BatchAllocator<_, LeastFreeSpace> =
    ///     BatchAllocator::with_order(SystemAllocator, BatchConfig::default());
    /// ```
    pub fn with_order(parent: A, config: BatchConfig) -> Self {
        let order = compare::<O> as fn(&BucketPtr, &BucketPtr) -> bool;

        Self {
            buckets: RefCell::new(MinHeap::new_in(parent, order)),
            bucket_size: config.bucket_size,
            order: PhantomData,
        }
    }

    /// Minimum bucket size this allocator was configured with.
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Number of buckets currently obtained from the parent.
    pub fn bucket_count(&self) -> usize {
        self.buckets.borrow().len()
    }

    /// Every bucket, in heap storage order. The first one is the root.
    pub fn buckets(&self) -> Vec<BucketStats> {
        self.buckets
            .borrow()
            .iter()
            .map(|bucket| unsafe { bucket.get().stats() })
            .collect()
    }

    /// The bucket the next allocation will try first.
    pub fn top_bucket(&self) -> Option<BucketStats> {
        let buckets = self.buckets.borrow();

        if buckets.is_empty() {
            return None;
        }

        Some(unsafe { buckets.peek().get().stats() })
    }

    /// Requests a bucket that can hold at least `needed` bytes from the
    /// parent. The bucket is not pushed on the heap.
    fn new_bucket(&self, parent: &A, needed: usize) -> BucketPtr {
        let size = padded_size(self.bucket_size.max(needed), 0, page_size());
        let data = parent.alloc(size);
        let bucket = parent.alloc_one::<Bucket>();

        log::debug!("batch: new bucket of {size} bytes");

        unsafe {
            bucket.as_ptr().write(Bucket {
                data,
                size,
                used: 0,
                live: 0,
            })
        };

        BucketPtr(bucket)
    }

    /// Gives the bucket memory and the bucket itself back to the parent.
    unsafe fn release_bucket(parent: &A, bucket: BucketPtr) {
        parent.free(bucket.get().data);
        parent.free_one(bucket.0);
    }
}

/// Writes an allocation of `size` bytes at the end of the used part of
/// `bucket` and returns the user address. `needed` is the size of the whole
/// block, header and padding included.
///
/// # Safety
///
/// The bucket must have at least `needed` free bytes.
unsafe fn carve(bucket: BucketPtr, size: usize, needed: usize) -> NonNull<u8> {
    let inner = bucket.get_mut();
    let address = NonNull::new_unchecked(inner.data.as_ptr().add(inner.used));

    inner.used += needed;
    inner.live += 1;

    Header::write(address, bucket.0, size)
}

unsafe impl<A: Allocator, O: BucketOrder> Allocator for BatchAllocator<A, O> {
    fn alloc(&self, size: usize) -> NonNull<u8> {
        let needed = padded_size(size, HEADER_SIZE, POINTER_SIZE);
        let mut buckets = self.buckets.borrow_mut();

        if buckets.is_empty() {
            let bucket = self.new_bucket(buckets.allocator(), needed);
            buckets.push(bucket);
        }

        let top = *buckets.peek();

        // The root changes its free space, so it has to leave the heap while
        // that happens and come back at the right position.
        let bucket = if unsafe { top.get().free_space() } >= needed {
            buckets.pop()
        } else {
            self.new_bucket(buckets.allocator(), needed)
        };

        let address = unsafe { carve(bucket, size, needed) };
        buckets.push(bucket);

        address
    }

    unsafe fn realloc(&self, address: NonNull<u8>, size: usize) -> NonNull<u8> {
        let (_, old_size) = Header::<Bucket>::of(address);

        let new_address = self.alloc(size);
        ptr::copy_nonoverlapping(address.as_ptr(), new_address.as_ptr(), old_size.min(size));
        self.free(address);

        new_address
    }

    unsafe fn free(&self, address: NonNull<u8>) {
        let (bucket, _) = Header::<Bucket>::of(address);
        let bucket = BucketPtr(bucket);

        // Free space doesn't change, so the heap is still in order.
        bucket.get_mut().live -= 1;

        if bucket.get().live > 0 {
            return;
        }

        let mut buckets = self.buckets.borrow_mut();
        buckets.remove(|candidate| *candidate == bucket);

        log::debug!("batch: releasing empty bucket of {} bytes", bucket.get().size);
        Self::release_bucket(buckets.allocator(), bucket);
    }

    unsafe fn destroy(&self) {
        let mut buckets = self.buckets.borrow_mut();

        if !buckets.is_empty() {
            log::debug!("batch: releasing {} buckets", buckets.len());
        }

        for bucket in buckets.iter() {
            Self::release_bucket(buckets.allocator(), *bucket);
        }

        buckets.release();
        buckets.allocator().destroy();
    }
}

impl<A: Allocator, O: BucketOrder> Drop for BatchAllocator<A, O> {
    fn drop(&mut self) {
        unsafe { self.destroy() }
    }
}

impl<A: Allocator, O: BucketOrder> fmt::Debug for BatchAllocator<A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchAllocator")
            .field("bucket_size", &self.bucket_size)
            .field("buckets", &self.buckets())
            .finish()
    }
}
