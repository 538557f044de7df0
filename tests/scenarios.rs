//! End to end behaviour of every allocator through the public API.

mod common;

use common::{init_logging, CountingAllocator};
use mmkit::{
    align, page_size, Allocator, AllocatorExt, ArenaAllocator, BatchAllocator, BatchConfig, Buffer,
    MinHeap, PageAllocator, SlabAllocator, SlabConfig, SystemAllocator, HEADER_SIZE,
};
use pretty_assertions::assert_eq;

#[test]
fn heap_pops_in_ascending_order() {
    init_logging();

    let mut heap = MinHeap::new_in(SystemAllocator, |a: &i32, b: &i32| a < b);
    for value in [5, 3, 8, 1] {
        heap.push(value);
    }

    let popped: Vec<i32> = (0..4).map(|_| heap.pop()).collect();
    assert_eq!(popped, vec![1, 3, 5, 8]);
    assert!(heap.is_empty());
}

#[test]
fn buffer_capacity_doubles_twice_for_three_pushes() {
    let mut buffer = Buffer::new_in(SystemAllocator);
    assert_eq!(buffer.capacity(), 1);

    for value in [7, 8, 9] {
        buffer.push(value);
    }

    assert_eq!(buffer.len(), 3);
    assert_eq!(buffer.capacity(), 4);
}

#[test]
fn arena_creates_one_chunk_when_the_current_one_is_full() {
    init_logging();

    let parent = CountingAllocator::default();
    let counts = parent.counts();
    let arena = ArenaAllocator::new(parent);

    let per_chunk = page_size() / align(HEADER_SIZE + 64);
    let mut objects = Vec::new();

    for i in 0..per_chunk {
        let object = arena.alloc_one::<[u8; 64]>();
        unsafe { object.as_ptr().write([i as u8; 64]) };
        objects.push(object);
    }
    assert_eq!(arena.chunk_count(), 1);

    let next = arena.alloc_one::<[u8; 64]>();
    assert_eq!(arena.chunk_count(), 2);

    let again = arena.alloc_one::<[u8; 64]>();
    assert_eq!(arena.chunk_count(), 2);

    for (i, object) in objects.iter().enumerate() {
        assert_eq!(unsafe { *object.as_ptr() }, [i as u8; 64]);
    }

    unsafe {
        arena.free_one(next);
        arena.free_one(again);
    }

    // Chunk data and chunk node for both chunks.
    assert_eq!(counts.allocs.get(), 4);
    drop(arena);
    assert_eq!(counts.outstanding(), 0);
}

#[test]
fn batch_returns_the_bucket_when_its_last_pointer_is_freed() {
    init_logging();

    let parent = CountingAllocator::default();
    let counts = parent.counts();
    let batch = BatchAllocator::with_config(parent, BatchConfig::default().bucket_size(64));
    assert!(2 * (20 + HEADER_SIZE) <= 64);

    let first = batch.alloc(20);
    let second = batch.alloc(20);
    assert_eq!(batch.bucket_count(), 1);
    let outstanding = counts.outstanding();

    unsafe {
        batch.free(first);
        assert_eq!(batch.top_bucket().map(|bucket| bucket.live), Some(1));
        assert_eq!(counts.outstanding(), outstanding);

        batch.free(second);
        assert_eq!(batch.bucket_count(), 0);
        assert_eq!(counts.outstanding(), outstanding - 2);
    }
}

#[test]
fn slab_maps_requests_to_classes_and_reuses_freed_blocks() {
    init_logging();

    let config = SlabConfig::default().size_classes([32, 64, 128]);
    let slab = SlabAllocator::with_config(config).unwrap();

    assert_eq!(slab.size_class_for(10), Some(32));
    assert_eq!(slab.size_class_for(40), Some(64));
    assert_eq!(slab.size_class_for(100), Some(128));

    let small = slab.alloc(10);
    let regions = slab.region_count();
    let free = slab.free_blocks(32);

    unsafe { slab.free(small) };
    assert_eq!(slab.free_blocks(32), free + 1);

    assert_eq!(slab.alloc(10), small);
    assert_eq!(slab.region_count(), regions);
    assert_eq!(slab.free_blocks(32), free);
}

#[test]
fn containers_work_on_every_allocator() {
    fn exercise<A: Allocator>(allocator: A) {
        let mut buffer = Buffer::new_in(&allocator);
        for i in 0..500u32 {
            buffer.push(i);
        }
        assert!(buffer.iter().copied().eq(0..500));

        let mut heap = MinHeap::new_in(&allocator, |a: &u32, b: &u32| a > b);
        for value in buffer.iter() {
            heap.push(*value);
        }
        assert_eq!(heap.pop(), 499);
        assert_eq!(heap.remove(|value| *value == 250), Some(250));
        assert_eq!(heap.len(), 498);

        buffer.free();
        heap.free();
    }

    exercise(SystemAllocator);
    exercise(PageAllocator);
    exercise(ArenaAllocator::default());
    exercise(BatchAllocator::default());
    exercise(SlabAllocator::new());
}

#[test]
fn allocators_stack_and_destroy_the_whole_chain() {
    init_logging();

    let parent = CountingAllocator::default();
    let counts = parent.counts();

    {
        let batch = BatchAllocator::new(parent);
        let arena = ArenaAllocator::new(batch);

        let mut words = Buffer::new_in(&arena);
        for word in ["arena", "on", "top", "of", "batch"] {
            words.push(word);
        }
        assert_eq!(words.len(), 5);
        assert_eq!(arena.parent().bucket_count(), 1);
    }

    // The arena destroyed the batch allocator it owned, which destroyed
    // the counting allocator.
    assert_eq!(counts.outstanding(), 0);
    assert!(counts.destroys.get() >= 1);
}

#[test]
fn borrowed_parents_survive_their_children() {
    let slab = SlabAllocator::new();

    {
        let arena = ArenaAllocator::new(&slab);
        arena.alloc(100);
        assert!(slab.region_count() > 0);
    }

    // The arena gave its chunks back but did not destroy the slab. The
    // chunk data and node blocks are back on their free lists.
    assert!(slab.region_count() > 0);
    let address = slab.alloc(10);
    unsafe { slab.free(address) };
}
