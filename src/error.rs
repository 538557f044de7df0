use std::alloc::{handle_alloc_error, Layout};

use thiserror::Error;

use crate::align::POINTER_SIZE;

/// Invalid allocator construction parameters. This is the only recoverable
/// error in the crate: allocation itself never fails with a value, see
/// [`out_of_memory`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("size class table is empty")]
    EmptySizeClasses,

    #[error("size classes must be strictly ascending, found {current} after {previous}")]
    UnsortedSizeClasses { previous: usize, current: usize },

    #[error("size class {size} cannot hold the {header} byte allocation header plus content")]
    SizeClassTooSmall { size: usize, header: usize },

    #[error("size class {size} is not a multiple of the pointer size")]
    MisalignedSizeClass { size: usize },

    #[error("a region must hold at least one block")]
    ZeroBlocksPerRegion,
}

/// Called when the kernel or libc refuses to give us memory. Nobody can do
/// anything useful at that point, so this never returns: it logs and then
/// defers to [`handle_alloc_error`], which aborts the process.
#[cold]
pub(crate) fn out_of_memory(size: usize) -> ! {
    log::error!("out of memory while requesting {size} bytes");

    let layout = Layout::from_size_align(size.max(1), POINTER_SIZE)
        .unwrap_or_else(|_| Layout::new::<usize>());

    handle_alloc_error(layout)
}

/// Called when a request is so big that adding the allocator overhead to it
/// doesn't fit in a `usize`. That's a bug in the caller, not memory
/// exhaustion, so it panics like `Vec` does on capacity overflow.
#[cold]
#[track_caller]
pub(crate) fn size_overflow(size: usize) -> ! {
    panic!("allocation of {size} bytes overflows the address space")
}
