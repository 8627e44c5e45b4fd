use std::{fmt, marker::PhantomData, ptr::NonNull};

use crate::{
    block::{self, Unit},
    Pointer,
};

/// The free list: a circular doubly linked list threaded through the
/// boundary tags of free blocks. There is no out-of-band storage at all; the
/// next link lives in each member's header, the prev link in its footer, and
/// this struct only remembers where to start.
///
/// ```text
///        +-----------------------------------------+
///        v                                         |
///   +--------+       +--------+       +--------+   |
///   | block  | <---> | block  | <---> | block  | <-+
///   +--------+       +--------+       +--------+
///        ^
///        |
///       head (roving)
/// ```
///
/// The head is *roving*: the allocation and release paths keep moving it to
/// a neighbour of whatever block they touched last, so successive first-fit
/// searches start in different parts of the ring and no single stretch of
/// the list wears out. Members are in insertion/split order, not address
/// order.
pub(crate) struct FreeList {
    head: Pointer<Unit>,
    len: usize,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Roving head, null iff the list is empty.
    #[inline]
    pub fn head(&self) -> Pointer<Unit> {
        self.head
    }

    /// Moves the roving head. `head` must be a current member of the list.
    #[inline]
    pub fn set_head(&mut self, head: Pointer<Unit>) {
        debug_assert!(head.is_some() || self.len == 0);
        self.head = head;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Inserts `block` into the ring immediately before `anchor`, or forms a
    /// singleton ring (and points the head at it) when `anchor` is null.
    ///
    /// # Safety
    ///
    /// `block` must be a valid block that is currently off the list, and
    /// `anchor`, when non-null, must be a current member.
    pub unsafe fn link(&mut self, block: NonNull<Unit>, anchor: Pointer<Unit>) {
        match anchor {
            None => {
                Unit::set_next(block, Some(block));
                Unit::set_prev(block, Some(block));
                self.head = Some(block);
            }
            Some(anchor) => {
                let prev = Unit::prev_of(anchor).unwrap();
                Unit::set_next(prev, Some(block));
                Unit::set_prev(block, Some(prev));
                Unit::set_next(block, Some(anchor));
                Unit::set_prev(anchor, Some(block));
            }
        }

        self.len += 1;
    }

    /// Splices `block` out of the ring and nulls its links. Nulling is not
    /// hygiene: a null header link is what marks the block as allocated for
    /// the coalescing probes, see [`Unit::is_free`]. If the head pointed at
    /// `block` it is moved to the previous member so it never dangles.
    ///
    /// # Safety
    ///
    /// `block` must be a current member of the list.
    pub unsafe fn unlink(&mut self, block: NonNull<Unit>) {
        if Unit::next_of(block) == Some(block) {
            self.head = None;
        } else {
            let prev = Unit::prev_of(block).unwrap();
            let next = Unit::next_of(block).unwrap();
            Unit::set_next(prev, Some(next));
            Unit::set_prev(next, Some(prev));

            if self.head == Some(block) {
                self.head = Some(prev);
            }
        }

        Unit::set_next(block, None);
        Unit::set_prev(block, None);
        self.len -= 1;
    }

    /// Walks the ring once, starting at the head.
    pub unsafe fn iter(&self) -> Members<'_> {
        Members {
            start: self.head,
            current: self.head,
            _list: PhantomData,
        }
    }
}

/// One lap around the ring. See [`FreeList::iter`].
pub(crate) struct Members<'a> {
    start: Pointer<Unit>,
    current: Pointer<Unit>,
    _list: PhantomData<&'a FreeList>,
}

impl Iterator for Members<'_> {
    type Item = NonNull<Unit>;

    fn next(&mut self) -> Option<NonNull<Unit>> {
        let member = self.current?;
        let next = unsafe { Unit::next_of(member) };

        self.current = if next == self.start { None } else { next };

        Some(member)
    }
}

/// Renders the ring in traversal order, one entry per member with its
/// address and size. This is the debugging surface for the free list; an
/// allocator can't very well log through an allocating logger.
impl fmt::Debug for FreeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries = f.debug_list();

        unsafe {
            for member in self.iter() {
                let units = Unit::size_of(member);
                entries.entry(&format_args!(
                    "{:?}: {} units ({} bytes)",
                    member.as_ptr(),
                    units,
                    block::bytes_for(units)
                ));
            }
        }

        entries.finish()
    }
}
