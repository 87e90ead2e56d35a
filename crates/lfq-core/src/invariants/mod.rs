//! Invariant traits for verified concurrent structures.
//!
//! - `queue`: FIFO queue invariants (NoLostElements, NoDuplicates, FIFO_Order,
//!   Linearizability, CountConservation, NodeReclamation)

pub mod queue;

pub use queue::{QueueHistory, QueueOpType, QueueOperation, QueueProperties, QueuePropertyChecker};
