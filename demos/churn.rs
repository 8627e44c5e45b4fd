//! Random allocate/free churn. Keeps a bounded set of live allocations,
//! randomly growing or shrinking it, and prints heap statistics every few
//! thousand operations. Good for eyeballing fragmentation behaviour.

use rand::{rngs::StdRng, Rng, SeedableRng};
use ringalloc::Heap;

const OPERATIONS: usize = 50_000;
const MAX_LIVE: usize = 512;

fn main() {
    let mut heap = Heap::new().unwrap();
    let mut rng = StdRng::seed_from_u64(rand::random());

    let mut live: Vec<(std::ptr::NonNull<u8>, usize)> = Vec::new();
    let mut allocated = 0usize;

    for op in 0..OPERATIONS {
        let want_alloc = live.is_empty() || (live.len() < MAX_LIVE && rng.gen_bool(0.55));

        if want_alloc {
            let nbytes = rng.gen_range(1..=4096);
            match heap.allocate(nbytes) {
                Ok(payload) => {
                    unsafe { payload.as_ptr().write_bytes(0x5A, nbytes) };
                    live.push((payload, nbytes));
                    allocated += nbytes;
                }
                Err(_) => println!("op {op}: out of memory at {nbytes} bytes"),
            }
        } else {
            let victim = rng.gen_range(0..live.len());
            let (payload, nbytes) = live.swap_remove(victim);
            unsafe { heap.deallocate(payload.as_ptr()) };
            allocated -= nbytes;
        }

        if op % 5000 == 0 {
            println!(
                "op {op:>6}: live = {:>3}, requested = {:>8} bytes, free = {:>8} bytes",
                live.len(),
                allocated,
                heap.free_bytes(),
            );
        }
    }

    for (payload, _) in live.drain(..) {
        unsafe { heap.deallocate(payload.as_ptr()) };
    }

    println!("\nafter releasing everything:\n{heap:#?}");
}
