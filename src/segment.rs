use std::{alloc::AllocError, ptr::NonNull};

use crate::{platform, Pointer};

/// Default reservation for [`crate::Heap::new`]. Pages are only touched as
/// the break moves past them, so reserving generously is cheap.
pub(crate) const DEFAULT_CAPACITY: usize = 32 * 1024 * 1024;

/// The heap segment: one contiguous region with a low watermark fixed at
/// reservation time and a high watermark (the break) that only ever moves up,
/// except for [`Segment::reset`] which rolls it all the way back down.
///
/// ```text
///  lo                      brk                     lo + capacity
///  v                        v                        v
///  +------------------------+------------------------+
///  |     live heap bytes    |   reserved, untouched  |
///  +------------------------+------------------------+
/// ```
///
/// A real program break can't be used here: other code in the process may
/// move it too, and `reset` would have no safe way to roll it back. Instead
/// the whole capacity is reserved from the platform up front and
/// [`Segment::sbrk`] bumps a private break inside the reservation, failing
/// once it is exhausted. The reservation goes back to the platform on drop.
pub(crate) struct Segment {
    base: NonNull<u8>,
    len: usize,
    capacity: usize,
    page_size: usize,
}

impl Segment {
    /// Reserves `capacity` bytes (rounded up to whole pages) from the
    /// platform. The segment starts empty: `len() == 0` until the first
    /// [`Segment::sbrk`].
    pub fn reserve(capacity: usize) -> Result<Self, AllocError> {
        let page_size = platform::page_size();
        let capacity = capacity
            .checked_next_multiple_of(page_size)
            .ok_or(AllocError)?;

        let base = unsafe { platform::reserve(capacity) }.ok_or(AllocError)?;

        Ok(Self {
            base,
            len: 0,
            capacity,
            page_size,
        })
    }

    /// Extends the segment by `incr` bytes and returns the previous break,
    /// i.e. the start of the newly valid region. Fails with `None` once the
    /// reservation is exhausted, leaving the watermark untouched.
    pub fn sbrk(&mut self, incr: usize) -> Pointer<u8> {
        if incr > self.capacity - self.len {
            return None;
        }

        let brk = self.brk();
        self.len += incr;

        Some(brk)
    }

    /// Rolls the break back to the low watermark. Every block previously
    /// carved out of the segment is invalid after this.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Low watermark: the first byte of the segment.
    #[inline]
    pub fn lo(&self) -> NonNull<u8> {
        self.base
    }

    /// Current break: one past the last valid byte of the segment.
    #[inline]
    pub fn brk(&self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.len)) }
    }

    /// Valid bytes between the watermarks.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Growth granularity hint.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        unsafe { platform::release(self.base, self.capacity) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn break_moves_monotonically() {
        let mut segment = Segment::reserve(DEFAULT_CAPACITY).unwrap();
        let page = segment.page_size();

        assert_eq!(segment.len(), 0);
        assert_eq!(segment.lo(), segment.brk());

        let first = segment.sbrk(page).unwrap();
        assert_eq!(first, segment.lo());
        assert_eq!(segment.len(), page);

        let second = segment.sbrk(3 * page).unwrap();
        assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + page);
        assert_eq!(segment.len(), 4 * page);
        assert_eq!(
            segment.brk().as_ptr() as usize,
            segment.lo().as_ptr() as usize + 4 * page
        );
    }

    #[test]
    fn exhaustion_fails_without_side_effects() {
        let mut segment = Segment::reserve(1).unwrap();
        let capacity = segment.capacity;

        assert!(segment.sbrk(capacity + 1).is_none());
        assert_eq!(segment.len(), 0);

        assert!(segment.sbrk(capacity).is_some());
        assert!(segment.sbrk(1).is_none());
        assert_eq!(segment.len(), capacity);
    }

    #[test]
    fn reset_rolls_back_to_lo() {
        let mut segment = Segment::reserve(DEFAULT_CAPACITY).unwrap();
        let page = segment.page_size();

        let first = segment.sbrk(page).unwrap();
        segment.reset();
        assert_eq!(segment.len(), 0);

        // The same storage is handed out again after a reset.
        assert_eq!(segment.sbrk(page).unwrap(), first);
    }
}
