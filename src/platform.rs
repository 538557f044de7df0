use std::{ptr::NonNull, sync::OnceLock};

use crate::Pointer;

/// Abstraction for platform specific memory handling. The allocators that map
/// memory on their own ([`crate::SlabAllocator`] and [`crate::PageAllocator`])
/// only need to request pages of memory and return them back when they are no
/// longer in use, they don't care about the APIs offered by the underlying
/// kernel.
trait PlatformSpecificMemory {
    /// Requests a memory region from the kernel where `length` bytes can be
    /// written safely.
    unsafe fn request_memory(length: usize) -> Pointer<u8>;

    /// Attempts to return `length` bytes starting from `address` to the
    /// underlying kernel. Always called with the exact length of a region
    /// previously obtained from [`PlatformSpecificMemory::request_memory`].
    unsafe fn return_memory(address: NonNull<u8>, length: usize);

    /// Virtual memory page size in bytes.
    unsafe fn page_size() -> usize;
}

/// Zero sized type that implements [`PlatformSpecificMemory`] for each OS.
pub(crate) struct Platform;

/// Virtual memory page size. 4096 bytes on most computers, but we only know
/// the real value at runtime.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Page size of the current machine. Queried once, cached afterwards.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { Platform::page_size() })
}

/// Convenience wrapper for [`PlatformSpecificMemory::request_memory`].
///
/// # Safety
///
/// `length` must be a non-zero multiple of [`page_size`].
#[inline]
pub(crate) unsafe fn request_memory(length: usize) -> Pointer<u8> {
    debug_assert!(length > 0 && length % page_size() == 0);
    Platform::request_memory(length)
}

/// Convenience wrapper for [`PlatformSpecificMemory::return_memory`].
///
/// # Safety
///
/// `address` and `length` must describe exactly one region obtained from
/// [`request_memory`] that has not been returned yet.
#[inline]
pub(crate) unsafe fn return_memory(address: NonNull<u8>, length: usize) {
    Platform::return_memory(address, length)
}

#[cfg(unix)]
#[cfg(not(miri))]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{Platform, PlatformSpecificMemory};
    use crate::Pointer;

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            // Memory protection. Read-Write only.
            let protection = libc::PROT_READ | libc::PROT_WRITE;

            // Memory should be private to our process and not mapped to any file.
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            // For all the configuration options that `mmap` accepts see
            // https://man7.org/linux/man-pages/man2/mmap.2.html
            match libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0) {
                libc::MAP_FAILED => None,
                address => Some(NonNull::new_unchecked(address).cast()),
            }
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            if libc::munmap(address.cast().as_ptr(), length) != 0 {
                // The region is still mapped. Nothing else references it, so
                // the only consequence is leaked address space.
                log::error!(
                    "munmap of {length} bytes at {:p} failed: {}",
                    address,
                    std::io::Error::last_os_error()
                );
            }
        }

        unsafe fn page_size() -> usize {
            libc::sysconf(libc::_SC_PAGE_SIZE) as usize
        }
    }
}

#[cfg(windows)]
#[cfg(not(miri))]
mod windows {
    use std::{mem::MaybeUninit, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    use super::{Platform, PlatformSpecificMemory};
    use crate::Pointer;

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            // Similar to mmap on Linux, Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            // Memory has to be reserved first and then committed in order to
            // become usable. We can do both at the same time with one call.
            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            // https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualalloc#parameters
            let address = Memory::VirtualAlloc(None, length, flags, protection);

            NonNull::new(address.cast())
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            // MEM_RELEASE requires a length of 0 and releases the whole
            // reservation made by VirtualAlloc.
            // https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualfree#parameters
            let released = Memory::VirtualFree(address.cast().as_ptr(), 0, Memory::MEM_RELEASE);

            if !released.as_bool() {
                log::error!("VirtualFree of {length} bytes at {:p} failed", address);
            }
        }

        unsafe fn page_size() -> usize {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }
}

#[cfg(miri)]
mod miri {
    //! When using Miri, we can't rely on system calls such as `mmap` because
    //! there's no FFI support, so instead we'll use the global allocator to
    //! mock low level memory management. This is also useful for detecting
    //! memory leaks in our own allocators (regions that are not returned back
    //! to the kernel).

    use std::{alloc, ptr::NonNull};

    use super::{page_size, Platform, PlatformSpecificMemory};
    use crate::Pointer;

    fn to_layout(length: usize) -> alloc::Layout {
        match alloc::Layout::from_size_align(length, page_size()) {
            Ok(layout) => layout,
            Err(_) => crate::error::out_of_memory(length),
        }
    }

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            NonNull::new(alloc::alloc(to_layout(length)))
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            alloc::dealloc(address.as_ptr(), to_layout(length));
        }

        unsafe fn page_size() -> usize {
            4096
        }
    }
}
