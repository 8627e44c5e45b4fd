use std::ptr::NonNull;

use crate::Pointer;

/// What the segment needs from the operating system: one big reservation,
/// its eventual release, and the page size. Which syscalls that maps to is
/// nobody's business above this module.
trait VirtualMemory {
    /// Reserves `length` bytes of read-write memory, or `None` if the kernel
    /// refuses.
    unsafe fn reserve(length: usize) -> Pointer<u8>;

    /// Gives the reservation that starts at `address` back to the kernel.
    unsafe fn release(address: NonNull<u8>, length: usize);

    /// Virtual memory page size in bytes.
    fn page_size() -> usize;
}

/// Zero sized type implementing [`VirtualMemory`] for the current target.
struct Os;

#[inline]
pub(crate) unsafe fn reserve(length: usize) -> Pointer<u8> {
    Os::reserve(length)
}

#[inline]
pub(crate) unsafe fn release(address: NonNull<u8>, length: usize) {
    Os::release(address, length)
}

#[inline]
pub(crate) fn page_size() -> usize {
    Os::page_size()
}

#[cfg(unix)]
#[cfg(not(miri))]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{Os, VirtualMemory};
    use crate::Pointer;

    impl VirtualMemory for Os {
        unsafe fn reserve(length: usize) -> Pointer<u8> {
            // Private anonymous mapping, read-write, no file behind it. See
            // https://man7.org/linux/man-pages/man2/mmap.2.html
            let protection = libc::PROT_READ | libc::PROT_WRITE;
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            let address = libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0);

            if address == libc::MAP_FAILED {
                None
            } else {
                Some(NonNull::new_unchecked(address).cast())
            }
        }

        unsafe fn release(address: NonNull<u8>, length: usize) {
            libc::munmap(address.cast().as_ptr(), length);
        }

        fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
#[cfg(not(miri))]
mod windows {
    use std::{mem::MaybeUninit, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    use super::{Os, VirtualMemory};
    use crate::Pointer;

    impl VirtualMemory for Os {
        unsafe fn reserve(length: usize) -> Pointer<u8> {
            // Unlike mmap, memory has to be both reserved and committed to
            // become usable; one call can do both. See
            // https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualalloc
            let protection = Memory::PAGE_READWRITE;
            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            let address = Memory::VirtualAlloc(None, length, flags, protection);

            NonNull::new(address.cast())
        }

        unsafe fn release(address: NonNull<u8>, _length: usize) {
            // Length 0 with MEM_RELEASE decommits and releases the whole
            // reservation at once.
            Memory::VirtualFree(address.cast().as_ptr(), 0, Memory::MEM_RELEASE);
        }

        fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

#[cfg(miri)]
mod miri {
    //! Miri has no FFI support, so the reservation is mocked through the
    //! global allocator. This also means Miri reports segments we forget to
    //! release as leaks of our own.

    use std::{alloc, ptr::NonNull};

    use super::{Os, VirtualMemory};
    use crate::Pointer;

    fn layout_of(length: usize) -> alloc::Layout {
        alloc::Layout::from_size_align(length, Os::page_size()).unwrap()
    }

    impl VirtualMemory for Os {
        unsafe fn reserve(length: usize) -> Pointer<u8> {
            NonNull::new(alloc::alloc_zeroed(layout_of(length)))
        }

        unsafe fn release(address: NonNull<u8>, length: usize) {
            alloc::dealloc(address.as_ptr(), layout_of(length));
        }

        fn page_size() -> usize {
            4096
        }
    }
}
