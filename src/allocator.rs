use std::{
    alloc::AllocError,
    fmt,
    ptr::{self, NonNull},
};

use crate::{
    block::{self, Unit, MIN_BLOCK_UNITS, UNIT_SIZE},
    freelist::FreeList,
    segment::{Segment, DEFAULT_CAPACITY},
    AllocResult, Pointer,
};

/// A first-fit heap. One instance owns one segment and the free list
/// threaded through it; there is no global state, so embedders decide
/// whether to keep a single process-wide instance or several independent
/// ones.
///
/// The allocator is single threaded by construction: every operation takes
/// `&mut self` and runs to completion, so the borrow checker is the lock.
///
/// # Examples
///
/// ```rust
/// use ringalloc::Heap;
///
/// let mut heap = Heap::new().unwrap();
///
/// let payload = heap.allocate(64).unwrap();
/// // Payloads satisfy the strictest scalar alignment.
/// assert_eq!(payload.as_ptr() as usize % 16, 0);
///
/// unsafe {
///     payload.as_ptr().write_bytes(0xA5, 64);
///     heap.deallocate(payload.as_ptr());
/// }
/// ```
pub struct Heap {
    segment: Segment,
    free: FreeList,
}

impl Heap {
    /// Creates a heap backed by the default segment reservation.
    pub fn new() -> Result<Self, AllocError> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a heap whose segment can grow up to `capacity` bytes
    /// (rounded to whole pages). Growth past that fails with
    /// [`AllocError`], which makes small capacities handy for exercising
    /// out-of-memory paths.
    pub fn with_capacity(capacity: usize) -> Result<Self, AllocError> {
        Ok(Self {
            segment: Segment::reserve(capacity)?,
            free: FreeList::new(),
        })
    }

    /// Discards every block, allocated or free, and rolls the segment back
    /// to empty. Every payload pointer handed out before the reset is
    /// invalid afterwards.
    pub fn reset(&mut self) {
        self.segment.reset();
        self.free = FreeList::new();
    }

    /// Total bytes currently on the free list, boundary tags included. One
    /// lap around the ring.
    pub fn free_bytes(&self) -> usize {
        unsafe {
            self.free
                .iter()
                .map(|member| block::bytes_for(Unit::size_of(member)))
                .sum()
        }
    }

    /// Allocates at least `nbytes` usable bytes and returns a maximally
    /// aligned payload pointer, or [`AllocError`] once the segment cannot
    /// grow any further.
    ///
    /// First fit: the search starts one past the roving head and takes the
    /// first block big enough. A block that fits exactly, or exceeds the
    /// request by a single unit, is taken whole; the one-unit overshoot is
    /// deliberately wasted because a 1-unit residual could not hold its own
    /// header and footer. Anything larger is split.
    pub fn allocate(&mut self, nbytes: usize) -> AllocResult {
        let units = block::units_for(nbytes);

        unsafe {
            if self.free.is_empty() && self.grow(units).is_none() {
                return Err(AllocError);
            }

            let mut candidate = Unit::next_of(self.free.head().unwrap()).unwrap();

            loop {
                if Unit::size_of(candidate) >= units {
                    let taken = self.take(candidate, units);
                    return Ok(Unit::payload_of(taken));
                }

                if Some(candidate) == self.free.head() {
                    // Wrapped around the ring without a fit; the segment has
                    // to grow. Growth returns the current head, and the new
                    // space is the head's next neighbour, so the search
                    // resumes right at it.
                    let Some(fresh) = self.grow(units) else {
                        return Err(AllocError);
                    };
                    candidate = fresh;
                    self.free.set_head(Unit::prev_of(candidate));
                }

                candidate = Unit::next_of(candidate).unwrap();
            }
        }
    }

    /// Allocates room for `count` elements of `size` bytes each and zeroes
    /// the whole payload. A `count * size` overflow fails with
    /// [`AllocError`] before the segment is consulted at all.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> AllocResult {
        let nbytes = count.checked_mul(size).ok_or(AllocError)?;

        let payload = self.allocate(nbytes)?;
        unsafe { payload.as_ptr().write_bytes(0, nbytes) };

        Ok(payload)
    }

    /// Returns a block to the pool, merging it with whichever physical
    /// neighbours are free so that no two adjacent free blocks ever exist.
    /// A null `payload` is a no-op.
    ///
    /// The upper neighbour is absorbed into the released block, then the
    /// released block is absorbed into the lower one; either, both or
    /// neither may happen:
    ///
    /// ```text
    ///   +-----------+ lower, free        +---------------------------+
    ///   +-----------+                    |                           |
    ///   +-----------+ released     ->    |   one block, one pair of  |
    ///   +-----------+                    |       boundary tags       |
    ///   +-----------+ upper, free        |                           |
    ///   +-----------+                    +---------------------------+
    /// ```
    ///
    /// Whatever survives is linked back in at the roving head.
    ///
    /// # Safety
    ///
    /// `payload` must be null or a pointer obtained from this heap's
    /// [`Heap::allocate`] family that has not been released or invalidated
    /// by [`Heap::reset`] since.
    ///
    /// # Panics
    ///
    /// Panics if the size tag behind `payload` is zero or larger than the
    /// whole segment, the telltale signs of a corrupted or foreign pointer.
    pub unsafe fn deallocate(&mut self, payload: *mut u8) {
        let Some(payload) = NonNull::new(payload) else {
            return;
        };

        let mut released = Unit::from_payload(payload);
        let size = Unit::size_of(released);
        assert!(size > 0 && block::bytes_for(size) <= self.segment.len());

        if self.free.is_empty() {
            self.free.link(released, None);
            return;
        }

        if let Some(upper) = Unit::neighbor_after(released, &self.segment) {
            if Unit::is_free(upper) {
                self.free.unlink(upper);
                Unit::set_size(released, Unit::size_of(released) + Unit::size_of(upper));
            }
        }

        if let Some(lower) = Unit::neighbor_before(released, &self.segment) {
            if Unit::is_free(lower) {
                self.free.unlink(lower);
                Unit::set_size(lower, Unit::size_of(lower) + Unit::size_of(released));
                released = lower;
            }
        }

        let anchor = self.free.head();
        self.free.link(released, anchor);
        self.free.set_head(Unit::prev_of(released));
    }

    /// Resizes the allocation at `payload` to at least `nbytes`. If the
    /// block already has enough units the pointer comes back unchanged;
    /// otherwise the contents move to a fresh allocation, the old payload
    /// bytes are preserved up to `nbytes`, and the old block is released.
    /// Null `payload` behaves as a plain [`Heap::allocate`].
    ///
    /// # Safety
    ///
    /// Same contract as [`Heap::deallocate`].
    pub unsafe fn reallocate(&mut self, payload: *mut u8, nbytes: usize) -> AllocResult {
        let Some(payload) = NonNull::new(payload) else {
            return self.allocate(nbytes);
        };

        let current = Unit::from_payload(payload);
        let size = Unit::size_of(current);

        if size >= block::units_for(nbytes) {
            return Ok(payload);
        }

        let moved = self.allocate(nbytes)?;

        let preserved = block::bytes_for(size - MIN_BLOCK_UNITS).min(nbytes);
        ptr::copy_nonoverlapping(payload.as_ptr(), moved.as_ptr(), preserved);

        self.deallocate(payload.as_ptr());

        Ok(moved)
    }

    /// Extends the segment by at least one page, or by `units` if the
    /// request alone is bigger than that, and routes the fresh region
    /// through [`Heap::deallocate`]. That is the only code path that
    /// installs blocks onto the free list, so a new region coalesces with a
    /// free block at the old top of the heap exactly like any released
    /// block would. Returns the roving head, whose next neighbour is the
    /// grown block.
    unsafe fn grow(&mut self, units: usize) -> Pointer<Unit> {
        let page_units = self.segment.page_size() / UNIT_SIZE;
        let n = units.max(page_units);

        let region = self.segment.sbrk(block::bytes_for(n))?.cast::<Unit>();

        Unit::set_size(region, n);
        self.deallocate(Unit::payload_of(region).as_ptr());

        self.free.head()
    }

    /// Removes `units` units from the free block `candidate`, which the
    /// caller has already verified to be big enough, and returns the header
    /// of the allocated block.
    ///
    /// Exact fits and one-unit overshoots take the whole block. Everything
    /// else splits: the free block shrinks in place and the allocated block
    /// is carved from its upper end, so the free block's header, and with it
    /// both ring links, stays exactly where it was:
    ///
    /// ```text
    ///   +--------------------+              +--------------------+
    ///   |                    |              |   same header,     |
    ///   |                    |              |   smaller size     |
    ///   |   free, n units    |      ->      +--------------------+
    ///   |                    |              |  carved allocated  |
    ///   |                    |              |  block, `units`    |
    ///   +--------------------+              +--------------------+
    /// ```
    ///
    /// Only the shrunken footer needs its prev link rewritten, because the
    /// footer position moved into what used to be payload. The head roves
    /// to the previous member so the next search starts near the remainder.
    unsafe fn take(&mut self, candidate: NonNull<Unit>, units: usize) -> NonNull<Unit> {
        let size = Unit::size_of(candidate);

        if size == units || size == units + 1 {
            self.free.unlink(candidate);
            return candidate;
        }

        let prev = Unit::prev_of(candidate);
        Unit::set_size(candidate, size - units);
        Unit::set_prev(candidate, prev);

        let carved = NonNull::new_unchecked(candidate.as_ptr().add(size - units));
        Unit::set_size(carved, units);
        Unit::set_next(carved, None);
        Unit::set_prev(carved, None);

        self.free.set_head(prev);

        carved
    }
}

/// Watermarks plus the free list in ring order. `{:?}` on a heap is the
/// debugging view of the allocator state.
impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("segment_bytes", &self.segment.len())
            .field("free_bytes", &self.free_bytes())
            .field("free_list", &self.free)
            .finish()
    }
}
