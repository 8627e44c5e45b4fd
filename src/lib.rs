//! First-fit memory allocator with boundary tags and a circular doubly
//! linked free list, built on top of an sbrk-style heap segment that only
//! grows from low to high addresses.
//!
//! Every quantity in the allocator is measured in *units*, where one unit is
//! the size of one [`block::Unit`] record. A block is a contiguous run of
//! units with a copy of its size stored in its first unit (the header) and
//! its last unit (the footer):
//!
//! ```text
//!             +--------------+--------------+
//!   header -> | next (free)  |     size     |
//!             +--------------+--------------+
//!             |                             |
//!             |           payload           |
//!             |                             |
//!             +--------------+--------------+
//!   footer -> | prev (free)  |     size     |
//!             +--------------+--------------+
//! ```
//!
//! The duplicated size field is what makes coalescing O(1): given any block,
//! the unit right below it is the footer of its lower physical neighbour,
//! and the unit right after its own footer is the header of its upper one.
//! Free blocks thread the list links through those same two units; the
//! header link of an allocated block is null, which is how the release path
//! tells free neighbours from allocated ones.
//!
//! The entry point is [`Heap`]. Follow the codebase from there through
//! [`freelist`], [`block`] and [`segment`].

#![feature(allocator_api)]

use std::{alloc::AllocError, ptr::NonNull};

mod allocator;
mod block;
mod freelist;
mod platform;
mod segment;

/// Non-null pointer to `T`. Used instead of `*mut T` almost everywhere so
/// the compiler forces us to deal with the null case explicitly.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

/// Shorter syntax for allocation return types.
pub(crate) type AllocResult = Result<NonNull<u8>, AllocError>;

pub use allocator::Heap;
