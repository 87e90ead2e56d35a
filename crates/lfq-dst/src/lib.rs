//! # lfq-dst
//!
//! Deterministic Simulation Testing for the lock-free queue.
//!
//! Every random decision (workload, injected faults, injected delays) is
//! drawn from a seeded generator, so a failure is reproduced by rerunning
//! with the same seed.
//!
//! - `fault_injection`: single-threaded runner injecting faults at
//!   operation boundaries and checking queue invariants
//! - `stress`: many producers and consumers hammering one queue
//!
//! ## Usage
//!
//! ```rust
//! use lfq_dst::DstEnv;
//!
//! let mut env = DstEnv::new(12345);
//! let choice = env.rng().gen_range(0..10u32);
//! assert!(choice < 10);
//! if env.fault().should_fail() {
//!     // simulate a failure
//! }
//! ```
//!
//! ## Reproducibility
//!
//! ```bash
//! DST_SEED=12345 cargo test
//! ```

pub mod config;
pub mod env;
pub mod error;
pub mod fault;
pub mod fault_injection;
pub mod random;
pub mod stress;

pub use config::{get_or_generate_seed, DstConfig};
pub use env::{DstEnv, EnvStats};
pub use error::DstError;
pub use fault::{FaultConfig, FaultInjector};
pub use fault_injection::{
    generate_ops, run_dst_scenario, run_dst_scenario_with, DstOp, DstResult, DstRunner, DstStats,
    DstTestableQueue, FaultPoint, FaultType,
};
pub use random::DeterministicRng;
pub use stress::{run_stress, StressConfig, StressReport};
