use std::{mem, ptr::NonNull};

use static_assertions::const_assert;

use crate::{segment::Segment, Pointer};

/// Size in bytes of one allocation unit. Block sizes, request sizes and the
/// growth granularity are all measured in multiples of this.
pub(crate) const UNIT_SIZE: usize = mem::size_of::<Unit>();

/// Smallest possible block: a header and a footer with no payload between
/// them. The sizing formula in [`units_for`] never produces less than this,
/// and the near-fit rule in [`crate::allocator`] makes sure splitting never
/// leaves a 1-unit residual behind.
pub(crate) const MIN_BLOCK_UNITS: usize = 2;

/// One allocation unit, which is also the boundary tag record. The same type
/// plays both roles of a block:
///
/// ```text
/// +--------------+--------------+
/// |  link = next |     size     |  <- header (first unit of the block)
/// +--------------+--------------+
/// |                             |
/// |       payload, n-2 units    |
/// |                             |
/// +--------------+--------------+
/// |  link = prev |     size     |  <- footer (last unit of the block)
/// +--------------+--------------+
/// ```
///
/// In the header the link is the next member of the free list, in the footer
/// it is the previous one. Both copies of `size` count all `n` units of the
/// block, header and footer included.
///
/// When the block is allocated both links are null. The header link doubles
/// as the allocated/free discriminator: the coalescing probes in
/// [`crate::allocator`] decide whether a physical neighbour can be merged by
/// checking it, so [`crate::freelist::FreeList::unlink`] has to null the
/// links of every block it removes. Don't be tempted to stash other metadata
/// in the link slot of an allocated block.
///
/// The 16-byte alignment is the strictest scalar alignment of the platforms
/// we care about, and since payloads start exactly one unit after an aligned
/// header, it is also what makes every payload pointer suitable for any
/// object type.
#[repr(C, align(16))]
pub(crate) struct Unit {
    /// Free list link, null while the block is allocated.
    pub link: Pointer<Unit>,
    /// Block size in units, mirrored between header and footer.
    pub size: usize,
}

// The record must fit its two fields and divide evenly into itself so that
// unit arithmetic and byte arithmetic stay interchangeable.
const_assert!(mem::size_of::<Unit>() >= 2 * mem::size_of::<usize>());
const_assert!(mem::size_of::<Unit>() % mem::align_of::<Unit>() == 0);
const_assert!(mem::align_of::<Unit>() == 16);

/// Number of units a request of `nbytes` bytes reserves: enough whole units
/// to hold the payload, plus one for the header and one for the footer.
/// `(nbytes + 2 * UNIT_SIZE - 1) / UNIT_SIZE` is `ceil(nbytes / UNIT_SIZE)`
/// plus one, so the result is never below [`MIN_BLOCK_UNITS`] even for a
/// zero-byte request.
#[inline]
pub(crate) fn units_for(nbytes: usize) -> usize {
    (nbytes + 2 * UNIT_SIZE - 1) / UNIT_SIZE + 1
}

/// Byte count of `units` allocation units.
#[inline]
pub(crate) fn bytes_for(units: usize) -> usize {
    units * UNIT_SIZE
}

/// Navigation over blocks. These are associated functions instead of methods
/// because we don't want to create intermediary references to memory the
/// caller may also hold pointers into; everything stays `NonNull` until the
/// last moment. See
/// [Stacked Borrows](https://github.com/rust-lang/unsafe-code-guidelines/blob/master/wip/stacked-borrows.md).
///
/// # Safety
///
/// All of these require `block` to point at the header unit of a live block
/// whose size tags are initialised, except [`Unit::set_size`] which is
/// exactly the function that initialises them.
impl Unit {
    /// Payload address handed out to callers: one unit past the header.
    #[inline]
    pub unsafe fn payload_of(block: NonNull<Unit>) -> NonNull<u8> {
        NonNull::new_unchecked(block.as_ptr().offset(1)).cast()
    }

    /// Recovers the block header from a payload address previously produced
    /// by [`Unit::payload_of`].
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<Unit> {
        NonNull::new_unchecked(payload.as_ptr().cast::<Unit>().offset(-1))
    }

    /// Block size in units, read from the header tag.
    #[inline]
    pub unsafe fn size_of(block: NonNull<Unit>) -> usize {
        (*block.as_ptr()).size
    }

    /// Writes `units` into both boundary tags. The footer position is derived
    /// from the new size, so after shrinking a block in place the old footer
    /// is simply left behind for whoever owns those units next.
    #[inline]
    pub unsafe fn set_size(block: NonNull<Unit>, units: usize) {
        (*block.as_ptr()).size = units;
        (*Self::footer_of(block).as_ptr()).size = units;
    }

    /// Footer unit of the block: `header + size - 1`.
    #[inline]
    unsafe fn footer_of(block: NonNull<Unit>) -> NonNull<Unit> {
        let size = Self::size_of(block);
        NonNull::new_unchecked(block.as_ptr().add(size - 1))
    }

    /// Reconstructs a block header from its footer by walking back
    /// `size - 1` units. This is how the release path reaches the lower
    /// physical neighbour.
    #[inline]
    unsafe fn from_footer(footer: NonNull<Unit>) -> NonNull<Unit> {
        let size = (*footer.as_ptr()).size;
        NonNull::new_unchecked(footer.as_ptr().sub(size - 1))
    }

    /// Next member of the free list, or null if the block is allocated.
    #[inline]
    pub unsafe fn next_of(block: NonNull<Unit>) -> Pointer<Unit> {
        (*block.as_ptr()).link
    }

    #[inline]
    pub unsafe fn set_next(block: NonNull<Unit>, next: Pointer<Unit>) {
        (*block.as_ptr()).link = next;
    }

    /// Previous member of the free list, stored in the footer tag.
    #[inline]
    pub unsafe fn prev_of(block: NonNull<Unit>) -> Pointer<Unit> {
        (*Self::footer_of(block).as_ptr()).link
    }

    #[inline]
    pub unsafe fn set_prev(block: NonNull<Unit>, prev: Pointer<Unit>) {
        (*Self::footer_of(block).as_ptr()).link = prev;
    }

    /// Whether the block is on the free list. Holds because
    /// [`crate::freelist::FreeList`] nulls the links of unlinked blocks and
    /// even a singleton member points at itself.
    #[inline]
    pub unsafe fn is_free(block: NonNull<Unit>) -> bool {
        Self::next_of(block).is_some()
    }

    /// Header of the block physically above this one, or null if this block
    /// ends at the segment's high watermark.
    pub unsafe fn neighbor_after(block: NonNull<Unit>, segment: &Segment) -> Pointer<Unit> {
        let end = block.as_ptr().add(Self::size_of(block));

        if end.cast::<u8>() >= segment.brk().as_ptr() {
            return None;
        }

        Some(NonNull::new_unchecked(end))
    }

    /// Header of the block physically below this one, or null if this block
    /// starts at the segment's low watermark. The unit right below a header
    /// is always the lower neighbour's footer, which is enough to find its
    /// header.
    pub unsafe fn neighbor_before(block: NonNull<Unit>, segment: &Segment) -> Pointer<Unit> {
        if block.as_ptr().cast::<u8>() <= segment.lo().as_ptr() {
            return None;
        }

        let footer = NonNull::new_unchecked(block.as_ptr().offset(-1));

        Some(Self::from_footer(footer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizing_formula() {
        // Zero bytes still reserve header + footer.
        assert_eq!(units_for(0), MIN_BLOCK_UNITS);

        // One payload unit serves anything from 1 byte up to a full unit.
        assert_eq!(units_for(1), 3);
        assert_eq!(units_for(UNIT_SIZE), 3);
        assert_eq!(units_for(UNIT_SIZE + 1), 4);

        for payload_units in 1..64 {
            let max_bytes = payload_units * UNIT_SIZE;
            assert_eq!(units_for(max_bytes), payload_units + 2);
            assert_eq!(units_for(max_bytes - UNIT_SIZE + 1), payload_units + 2);
        }
    }

    #[test]
    fn bytes_round_trip() {
        for units in MIN_BLOCK_UNITS..128 {
            assert_eq!(bytes_for(units), units * UNIT_SIZE);
            assert_eq!(bytes_for(units) % UNIT_SIZE, 0);
        }
    }

    #[test]
    fn tags_are_mirrored() {
        let mut arena: Vec<Unit> = (0..8).map(|_| Unit { link: None, size: 0 }).collect();
        let base = arena.as_mut_ptr();

        unsafe {
            let block = NonNull::new(base).unwrap();
            Unit::set_size(block, 5);

            assert_eq!(Unit::size_of(block), 5);
            assert_eq!((*base.add(4)).size, 5);

            // Shrinking rewrites both tags at the new footer position.
            Unit::set_size(block, 3);
            assert_eq!((*base.add(2)).size, 3);
        }
    }

    #[test]
    fn payload_round_trip() {
        let mut arena: Vec<Unit> = (0..4).map(|_| Unit { link: None, size: 0 }).collect();
        let base = arena.as_mut_ptr();

        unsafe {
            let block = NonNull::new(base).unwrap();
            let payload = Unit::payload_of(block);

            assert_eq!(payload.as_ptr() as usize, base as usize + UNIT_SIZE);
            assert_eq!(payload.as_ptr() as usize % mem::align_of::<Unit>(), 0);
            assert_eq!(Unit::from_payload(payload), block);
        }
    }
}
