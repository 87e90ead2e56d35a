//! Kani proof harnesses for the queue algorithm.
//!
//! Bounded model checking of sequential behaviour for all inputs up to a
//! bound. The harnesses drive `LoomQueue`, which shares the algorithm with
//! `ConcurrentQueue` but runs on plain atomics instead of the epoch
//! collector's thread-local state.
//!
//! # Running the proofs
//!
//! ```bash
//! # Run all proofs
//! cargo kani -p lfq-queue
//!
//! # Run a specific proof
//! cargo kani -p lfq-queue --harness proof_pop_returns_pushed_value
//! ```
//!
//! Kani has no concurrent execution; interleavings are covered by the loom
//! models in `loom_queue`.

#[cfg(kani)]
mod proofs {
    use crate::loom_queue::LoomQueue;

    /// A single pushed value comes straight back out.
    #[kani::proof]
    #[kani::unwind(5)]
    fn proof_pop_returns_pushed_value() {
        let queue = LoomQueue::new();

        let value: u64 = kani::any();
        queue.push(value);
        let popped = queue.pop();

        kani::assert(popped == Some(value), "Pop must return the value just pushed");
        kani::assert(queue.pop().is_none(), "Queue must be empty again");
    }

    /// Two values leave in the order they entered.
    #[kani::proof]
    #[kani::unwind(5)]
    fn proof_fifo_order() {
        let queue = LoomQueue::new();

        let v1: u64 = kani::any();
        let v2: u64 = kani::any();
        kani::assume(v1 != v2);

        queue.push(v1);
        queue.push(v2);

        kani::assert(queue.pop() == Some(v1), "First pushed value must be first popped");
        kani::assert(queue.pop() == Some(v2), "Second pushed value must be second popped");
    }

    #[kani::proof]
    fn proof_empty_pop_returns_none() {
        let queue: LoomQueue<u64> = LoomQueue::new();
        kani::assert(queue.pop().is_none(), "Pop on empty queue must return None");
        kani::assert(queue.is_empty(), "Failed pop must not change the length");
    }

    /// `len` follows every push and successful pop.
    #[kani::proof]
    #[kani::unwind(6)]
    fn proof_len_tracks_operations() {
        let queue = LoomQueue::new();

        let pushes: usize = kani::any();
        let pops: usize = kani::any();
        kani::assume(pushes <= 3);
        kani::assume(pops <= 3);

        for i in 0..pushes {
            queue.push(i as u64);
        }
        let mut popped = 0;
        for _ in 0..pops {
            if queue.pop().is_some() {
                popped += 1;
            }
        }

        kani::assert(popped == pushes.min(pops), "Pops succeed only while elements remain");
        kani::assert(queue.len() == pushes - popped, "Length must equal pushes minus pops");
    }
}
