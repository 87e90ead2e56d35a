//! # lfq-core
//!
//! Core types and invariants for the verified lock-free queue.
//!
//! This crate provides:
//! - `PropertyResult` and `PropertyChecker` for verifying invariants
//! - `Counterexample` for rendering failure paths
//! - `QueueProperties` and its checker for FIFO queue implementations

pub mod counterexample;
pub mod invariants;
pub mod property;

pub use counterexample::{Counterexample, MemoryIssue, StateSnapshot, ThreadAction};
pub use invariants::{QueueHistory, QueueOpType, QueueOperation, QueueProperties, QueuePropertyChecker};
pub use property::{PropertyChecker, PropertyResult};
