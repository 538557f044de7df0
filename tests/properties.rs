//! Property tests for the containers and allocators.

mod common;

use common::{fill_check_free, CountingAllocator};
use mmkit::{
    page_size, Allocator, ArenaAllocator, BatchAllocator, BatchConfig, Buffer, MinHeap,
    PageAllocator, SlabAllocator, SystemAllocator,
};
use proptest::prelude::*;

fn ascending(a: &i32, b: &i32) -> bool {
    a < b
}

fn drain(heap: &mut MinHeap<i32>) -> Vec<i32> {
    let mut values = Vec::with_capacity(heap.len());
    while !heap.is_empty() {
        values.push(heap.pop());
    }
    values
}

fn heap_of(values: &[i32]) -> MinHeap<i32> {
    let mut heap = MinHeap::new_in(SystemAllocator, ascending as fn(&i32, &i32) -> bool);
    for value in values {
        heap.push(*value);
    }
    heap
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn buffer_capacity_is_the_next_power_of_two(
        values in prop::collection::vec(any::<i64>(), 0..300),
    ) {
        let mut buffer = Buffer::new_in(SystemAllocator);
        for value in &values {
            buffer.push(*value);
        }

        prop_assert_eq!(buffer.len(), values.len());
        prop_assert_eq!(buffer.capacity(), values.len().max(1).next_power_of_two());
        prop_assert_eq!(buffer.as_slice(), values.as_slice());
    }

    #[test]
    fn heap_pops_sorted(values in prop::collection::vec(any::<i32>(), 0..200)) {
        let mut heap = heap_of(&values);

        let mut expected = values.clone();
        expected.sort_unstable();

        prop_assert_eq!(drain(&mut heap), expected);
    }

    #[test]
    fn heap_remove_keeps_order(
        values in prop::collection::vec(0..50i32, 1..120),
        removals in prop::collection::vec(0..50i32, 0..40),
    ) {
        let mut heap = heap_of(&values);
        let mut expected = values.clone();

        for target in removals {
            let removed = heap.remove(|value| *value == target);

            match expected.iter().position(|value| *value == target) {
                Some(index) => {
                    prop_assert_eq!(removed, Some(target));
                    expected.swap_remove(index);
                }
                None => prop_assert_eq!(removed, None),
            }
        }

        expected.sort_unstable();
        prop_assert_eq!(drain(&mut heap), expected);
    }

    #[test]
    fn allocations_never_overlap(sizes in prop::collection::vec(0..3000usize, 1..60)) {
        let config = BatchConfig::default().bucket_size(page_size());

        fill_check_free(&SystemAllocator, &sizes);
        fill_check_free(&PageAllocator, &sizes);
        fill_check_free(&ArenaAllocator::default(), &sizes);
        fill_check_free(&BatchAllocator::with_config(SystemAllocator, config), &sizes);
        fill_check_free(&SlabAllocator::new(), &sizes);
    }

    #[test]
    fn realloc_preserves_the_prefix(initial in 1..2000usize, resized in 1..6000usize) {
        fn check<A: Allocator>(allocator: &A, initial: usize, resized: usize) {
            unsafe {
                let address = allocator.alloc(initial);
                for i in 0..initial {
                    address.as_ptr().add(i).write(i as u8);
                }

                let moved = allocator.realloc(address, resized);
                for i in 0..initial.min(resized) {
                    assert_eq!(*moved.as_ptr().add(i), i as u8);
                }
                moved.as_ptr().add(resized - 1).write(0xFF);

                allocator.free(moved);
            }
        }

        check(&SystemAllocator, initial, resized);
        check(&PageAllocator, initial, resized);
        check(&ArenaAllocator::default(), initial, resized);
        check(&BatchAllocator::default(), initial, resized);
        check(&SlabAllocator::new(), initial, resized);
    }

    #[test]
    fn batch_buckets_go_back_to_the_parent_when_empty(
        sizes in prop::collection::vec(1..5000usize, 1..50),
    ) {
        let parent = CountingAllocator::default();
        let counts = parent.counts();
        let config = BatchConfig::default().bucket_size(page_size());
        let batch = BatchAllocator::with_config(parent, config);

        let addresses: Vec<_> = sizes.iter().map(|size| batch.alloc(*size)).collect();
        let buckets = batch.bucket_count();
        prop_assert!(buckets >= 1);

        for address in addresses {
            unsafe { batch.free(address) };
            prop_assert!(batch.bucket_count() <= buckets);
            prop_assert!(batch.buckets().iter().all(|bucket| bucket.live > 0));
        }

        prop_assert_eq!(batch.bucket_count(), 0);
        // Only the heap storage is left.
        prop_assert_eq!(counts.outstanding(), 1);
    }

    #[test]
    fn slab_reuses_the_block_just_freed(size in 0..5000usize) {
        let slab = SlabAllocator::new();

        let first = slab.alloc(size);
        let keep = slab.alloc(size);
        unsafe { slab.free(first) };

        let second = slab.alloc(size);
        if slab.size_class_for(size).is_some() {
            prop_assert_eq!(second, first);
        }

        unsafe {
            slab.free(second);
            slab.free(keep);
        }
    }
}
