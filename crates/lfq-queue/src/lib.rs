//! # lfq-queue
//!
//! Unbounded lock-free multi-producer multi-consumer FIFO queue after
//! Michael & Scott, with safe memory reclamation.
//!
//! # Modules
//!
//! - `concurrent_queue`: the production queue, nodes reclaimed through
//!   crossbeam-epoch
//! - `loom_queue`: the same algorithm on loom-switchable atomics, nodes
//!   retired until teardown
//! - `singleton`: lazily constructed shared instance with explicit teardown
//! - `kani_proofs`: Kani bounded model checking proofs
//!
//! With the `dst` feature both queues implement
//! `lfq_dst::DstTestableQueue` and can be driven by the DST runner and the
//! stress driver.

pub mod concurrent_queue;
pub mod kani_proofs;
pub mod loom_queue;
pub mod singleton;

#[cfg(any(test, feature = "dst"))]
mod dst;

pub use concurrent_queue::ConcurrentQueue;
pub use loom_queue::LoomQueue;
pub use singleton::Singleton;
