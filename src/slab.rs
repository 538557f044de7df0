use std::{
    cell::RefCell,
    fmt, mem,
    ptr::{self, NonNull},
};

use crate::{
    align::{checked_align_up, padded_size, POINTER_SIZE},
    error::{out_of_memory, size_overflow, ConfigError},
    freelist::FreeList,
    header::{Header, HEADER_SIZE},
    list::{LinkedList, Node},
    platform::{page_size, request_memory, return_memory},
    Allocator,
};

/// Block sizes used by [`SlabAllocator::new`]. Block sizes include the
/// allocation header.
pub const DEFAULT_SIZE_CLASSES: [usize; 8] = [32, 64, 128, 256, 512, 1024, 2048, 4096];

/// How many blocks of a size class a new region is sized for by default.
pub const DEFAULT_BLOCKS_PER_REGION: usize = 64;

/// Region header size in bytes. Every region starts with a [`Node<Region>`].
pub(crate) const REGION_HEADER_SIZE: usize = mem::size_of::<Node<Region>>();

/// Construction parameters for [`SlabAllocator`].
///
/// ```rust
/// use mmkit::{ConfigError, SlabAllocator, SlabConfig};
///
/// let config = SlabConfig::default().size_classes([32, 64, 128]).blocks_per_region(16);
/// assert!(SlabAllocator::with_config(config).is_ok());
///
/// let unsorted = SlabConfig::default().size_classes([64, 32]);
/// assert_eq!(
///     unsorted.validate(),
///     Err(ConfigError::UnsortedSizeClasses { previous: 64, current: 32 })
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlabConfig {
    /// Strictly ascending block sizes, header included. Each one must be a
    /// multiple of the pointer size and bigger than [`HEADER_SIZE`].
    pub size_classes: Vec<usize>,
    /// Number of blocks a new region is sized for. The region is rounded up
    /// to whole pages and every block that fits is used.
    pub blocks_per_region: usize,
}

impl SlabConfig {
    pub fn size_classes(mut self, size_classes: impl Into<Vec<usize>>) -> Self {
        self.size_classes = size_classes.into();
        self
    }

    pub fn blocks_per_region(mut self, blocks_per_region: usize) -> Self {
        self.blocks_per_region = blocks_per_region;
        self
    }

    /// Checks that the allocator can actually work with this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size_classes.is_empty() {
            return Err(ConfigError::EmptySizeClasses);
        }

        if self.blocks_per_region == 0 {
            return Err(ConfigError::ZeroBlocksPerRegion);
        }

        let mut previous = None;

        for &size in &self.size_classes {
            // The free list pointer lives in the content, so there must be
            // room for at least one pointer after the header.
            if size <= HEADER_SIZE {
                return Err(ConfigError::SizeClassTooSmall {
                    size,
                    header: HEADER_SIZE,
                });
            }

            if size % POINTER_SIZE != 0 {
                return Err(ConfigError::MisalignedSizeClass { size });
            }

            if let Some(previous) = previous.filter(|previous| *previous >= size) {
                return Err(ConfigError::UnsortedSizeClasses {
                    previous,
                    current: size,
                });
            }

            previous = Some(size);
        }

        Ok(())
    }
}

impl Default for SlabConfig {
    fn default() -> Self {
        Self {
            size_classes: DEFAULT_SIZE_CLASSES.to_vec(),
            blocks_per_region: DEFAULT_BLOCKS_PER_REGION,
        }
    }
}

/// Memory region obtained with `mmap` (or the equivalent on other
/// platforms). The region data is stored as a [`Node<Region>`] at the start
/// of the region itself, so the region list costs no extra allocations.
pub(crate) struct Region {
    /// Index of the size class this region was carved for, `None` for a
    /// region that holds a single big allocation.
    class: Option<usize>,
    /// Length of the mapping, header included.
    length: usize,
}

/// Fixed block size with its own stack of free blocks.
struct SizeClass {
    size: usize,
    free: FreeList,
}

/// Everything [`SlabAllocator`] needs to mutate.
struct Slab {
    classes: Vec<SizeClass>,
    regions: LinkedList<Region>,
    blocks_per_region: usize,
}

/// Allocator with fixed size classes on top of pages mapped directly from
/// the kernel. A request of `n` bytes is served from the smallest class that
/// fits `n` bytes plus the allocation header. Each class keeps a free list,
/// and when it's empty a whole region is mapped and cut into blocks:
///
/// ```text
/// +--------------+--------+---------+--------+---------+--------+---------+-----+
/// | Node<Region> | Header | Content | Header | Content | Header | Content | ... |
/// +--------------+--------+---------+--------+---------+--------+---------+-----+
///                <-- class size ---->
///                ^
///                | Free list head after carving: lowest address first.
/// ```
///
/// Freed blocks go back to the top of their free list, so the next request
/// of the same class reuses the block that was just freed. Class regions are
/// only unmapped when the allocator is destroyed.
///
/// Requests that don't fit the biggest class get a dedicated region which is
/// unmapped as soon as the allocation is freed:
///
/// ```text
/// +--------------+--------+--------------------------------------+
/// | Node<Region> | Header |          Content (n bytes)           |
/// +--------------+--------+--------------------------------------+
/// ```
///
/// # Examples
///
/// ```rust
/// use mmkit::{Allocator, SlabAllocator};
///
/// let slab = SlabAllocator::new();
///
/// let first = slab.alloc(10);
/// assert_eq!(slab.size_class_for(10), Some(32));
///
/// unsafe {
///     slab.free(first);
///     assert_eq!(slab.alloc(10), first);
/// }
/// ```
pub struct SlabAllocator {
    slab: RefCell<Slab>,
}

impl SlabAllocator {
    /// Slab allocator with [`SlabConfig::default`].
    pub fn new() -> Self {
        Self::build(SlabConfig::default())
    }

    /// Slab allocator with custom size classes. Fails if the configuration
    /// doesn't pass [`SlabConfig::validate`].
    pub fn with_config(config: SlabConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SlabConfig) -> Self {
        let classes = config
            .size_classes
            .into_iter()
            .map(|size| SizeClass {
                size,
                free: FreeList::new(),
            })
            .collect();

        Self {
            slab: RefCell::new(Slab {
                classes,
                regions: LinkedList::new(),
                blocks_per_region: config.blocks_per_region,
            }),
        }
    }

    /// Block size that a request of `size` bytes would get, or `None` if the
    /// request is too big for every class and gets a dedicated region.
    pub fn size_class_for(&self, size: usize) -> Option<usize> {
        let slab = self.slab.borrow();
        slab.class_index(size).map(|index| slab.classes[index].size)
    }

    /// Configured block sizes, ascending.
    pub fn size_classes(&self) -> Vec<usize> {
        self.slab.borrow().classes.iter().map(|class| class.size).collect()
    }

    /// Number of blocks ready to be handed out in the class with the given
    /// block size. 0 if there's no such class.
    pub fn free_blocks(&self, class_size: usize) -> usize {
        self.slab
            .borrow()
            .classes
            .iter()
            .find(|class| class.size == class_size)
            .map_or(0, |class| class.free.len)
    }

    /// Number of regions currently mapped, big allocations included.
    pub fn region_count(&self) -> usize {
        self.slab.borrow().regions.len()
    }

    /// Total length of every mapped region in bytes.
    pub fn mapped_bytes(&self) -> usize {
        self.slab
            .borrow()
            .regions
            .iter()
            .map(|node| unsafe { (*node.as_ptr()).data.length })
            .sum()
    }
}

impl Default for SlabAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Slab {
    /// Index of the smallest class that fits `size` bytes plus the header.
    fn class_index(&self, size: usize) -> Option<usize> {
        let needed = size.checked_add(HEADER_SIZE)?;
        self.classes.iter().position(|class| class.size >= needed)
    }

    /// Maps a region of `length` bytes and links it.
    unsafe fn map_region(&mut self, class: Option<usize>, length: usize) -> NonNull<Node<Region>> {
        let Some(address) = request_memory(length) else {
            out_of_memory(length);
        };

        self.regions.append(Region { class, length }, address)
    }

    /// Maps a new region for the class at `index` and pushes all of its
    /// blocks on the free list of the class.
    unsafe fn refill(&mut self, index: usize) {
        let size = self.classes[index].size;
        let blocks_size = size
            .checked_mul(self.blocks_per_region)
            .unwrap_or_else(|| size_overflow(size));
        let length = padded_size(blocks_size, REGION_HEADER_SIZE, page_size());
        let region = self.map_region(Some(index), length);

        let first = region.as_ptr().cast::<u8>().add(REGION_HEADER_SIZE);
        let blocks = (length - REGION_HEADER_SIZE) / size;

        log::debug!("slab: new region of {length} bytes with {blocks} blocks of {size} bytes");

        // Pushed backwards so that the lowest address ends up on top.
        for block in (0..blocks).rev() {
            let address = NonNull::new_unchecked(first.add(block * size));
            let content = Header::write(address, region, 0);
            self.classes[index].free.push(content);
        }
    }

    unsafe fn alloc(&mut self, size: usize) -> NonNull<u8> {
        let Some(index) = self.class_index(size) else {
            return self.alloc_big(size);
        };

        loop {
            if let Some(content) = self.classes[index].free.pop() {
                (*Header::<Node<Region>>::from_content_address(content).as_ptr()).size = size;
                return content;
            }

            self.refill(index);
        }
    }

    unsafe fn alloc_big(&mut self, size: usize) -> NonNull<u8> {
        let length = big_region_length(size);
        let region = self.map_region(None, length);

        log::debug!("slab: dedicated region of {length} bytes");

        let address = NonNull::new_unchecked(region.as_ptr().cast::<u8>().add(REGION_HEADER_SIZE));
        Header::write(address, region, size)
    }

    unsafe fn free(&mut self, address: NonNull<u8>) {
        let (region, _) = Header::<Node<Region>>::of(address);

        match (*region.as_ptr()).data.class {
            Some(index) => self.classes[index].free.push(address),

            None => {
                let length = (*region.as_ptr()).data.length;
                self.regions.remove(region);
                return_memory(region.cast(), length);
            }
        }
    }

    /// Whether the block at `address` can hold `size` bytes without moving.
    /// Updates the header if it can.
    unsafe fn resize_in_place(&mut self, address: NonNull<u8>, size: usize) -> bool {
        let header = Header::<Node<Region>>::from_content_address(address).as_ptr();
        let region = &(*(*header).region.as_ptr()).data;

        let fits = match region.class {
            Some(index) => self.class_index(size).map_or(false, |new| new <= index),
            None => size
                .checked_add(HEADER_SIZE + REGION_HEADER_SIZE)
                .and_then(|total| checked_align_up(total, page_size()))
                .map_or(false, |length| length == region.length),
        };

        if fits {
            (*header).size = size;
        }

        fits
    }

    unsafe fn destroy(&mut self) {
        if self.regions.len() > 0 {
            log::debug!("slab: unmapping {} regions", self.regions.len());
        }

        while let Some(region) = self.regions.head {
            let length = (*region.as_ptr()).data.length;
            self.regions.remove(region);
            return_memory(region.cast(), length);
        }

        for class in &mut self.classes {
            class.free.clear();
        }
    }
}

/// Length of the dedicated region for a big allocation of `size` bytes.
#[inline]
fn big_region_length(size: usize) -> usize {
    padded_size(size, REGION_HEADER_SIZE + HEADER_SIZE, page_size())
}

unsafe impl Allocator for SlabAllocator {
    fn alloc(&self, size: usize) -> NonNull<u8> {
        unsafe { self.slab.borrow_mut().alloc(size) }
    }

    unsafe fn realloc(&self, address: NonNull<u8>, size: usize) -> NonNull<u8> {
        if self.slab.borrow_mut().resize_in_place(address, size) {
            return address;
        }

        let (_, old_size) = Header::<Node<Region>>::of(address);

        let new_address = self.alloc(size);
        ptr::copy_nonoverlapping(address.as_ptr(), new_address.as_ptr(), old_size.min(size));
        self.free(address);

        new_address
    }

    unsafe fn free(&self, address: NonNull<u8>) {
        self.slab.borrow_mut().free(address)
    }

    unsafe fn destroy(&self) {
        self.slab.borrow_mut().destroy()
    }
}

impl Drop for SlabAllocator {
    fn drop(&mut self) {
        unsafe { self.destroy() }
    }
}

impl fmt::Debug for SlabAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabAllocator")
            .field("size_classes", &self.size_classes())
            .field("regions", &self.region_count())
            .field("mapped_bytes", &self.mapped_bytes())
            .finish()
    }
}
