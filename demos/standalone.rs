//! Walkthrough of the allocator's lifecycle: allocate a few blocks, write
//! through them, free them in an order that exercises coalescing, and watch
//! the free list along the way.

use ringalloc::Heap;

fn main() {
    let mut heap = Heap::new().unwrap();

    let first = heap.allocate(24).unwrap();
    let second = heap.allocate(1000).unwrap();
    let third = heap.allocate(24).unwrap();

    println!("three live allocations:");
    println!("  first  = {:?}", first.as_ptr());
    println!("  second = {:?}", second.as_ptr());
    println!("  third  = {:?}", third.as_ptr());
    println!("{heap:#?}\n");

    unsafe {
        first.as_ptr().write_bytes(0xAA, 24);
        second.as_ptr().write_bytes(0xBB, 1000);
        third.as_ptr().write_bytes(0xCC, 24);

        // Freeing the middle one leaves a hole between two live blocks.
        heap.deallocate(second.as_ptr());
        println!("after freeing the middle block:\n{heap:#?}\n");

        // The hole gets reused by the next fitting request.
        let reused = heap.allocate(1000).unwrap();
        assert_eq!(reused, second);
        println!("a 1000 byte request reuses it: {:?}\n", reused.as_ptr());

        heap.deallocate(reused.as_ptr());
        heap.deallocate(first.as_ptr());
        heap.deallocate(third.as_ptr());
    }

    // Everything released: neighbours merged back into one block.
    println!("after freeing everything:\n{heap:#?}");
    println!("free bytes = {}", heap.free_bytes());
}
