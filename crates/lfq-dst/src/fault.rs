//! Probabilistic fault and delay injection.

use serde::Serialize;
use tracing::trace;

use crate::error::{DstError, Result};
use crate::random::DeterministicRng;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaultConfig {
    /// Chance that an operation boundary injects a fault
    pub fault_probability: f64,
    /// Chance that a yield point stalls the calling thread
    pub delay_probability: f64,
    /// Upper bound on spin iterations per injected delay
    pub max_delay_spins: u32,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            fault_probability: 0.01,
            delay_probability: 0.05,
            max_delay_spins: 64,
        }
    }
}

impl FaultConfig {
    /// No faults, no delays.
    #[must_use]
    pub fn none() -> Self {
        Self {
            fault_probability: 0.0,
            delay_probability: 0.0,
            max_delay_spins: 0,
        }
    }

    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            fault_probability: 0.1,
            delay_probability: 0.3,
            max_delay_spins: 1024,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("fault_probability", self.fault_probability),
            ("delay_probability", self.delay_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DstError::InvalidProbability { name, value });
            }
        }
        Ok(())
    }
}

pub struct FaultInjector {
    rng: DeterministicRng,
    config: FaultConfig,
    faults_injected: u64,
    delays_injected: u64,
}

impl FaultInjector {
    #[must_use]
    pub fn new(rng: DeterministicRng, config: FaultConfig) -> Self {
        Self {
            rng,
            config,
            faults_injected: 0,
            delays_injected: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// Roll for a fault at an operation boundary.
    pub fn should_fail(&mut self) -> bool {
        let fail = self.rng.gen_bool(self.config.fault_probability);
        if fail {
            self.faults_injected += 1;
        }
        fail
    }

    /// Maybe stall the current thread for a bounded number of spins.
    ///
    /// Returns whether a delay was injected.
    pub fn maybe_delay(&mut self) -> bool {
        if self.config.max_delay_spins == 0 || !self.rng.gen_bool(self.config.delay_probability) {
            return false;
        }
        let spins = self.rng.gen_range(1..=self.config.max_delay_spins);
        trace!(spins, "injecting delay");
        for i in 0..spins {
            if i % 16 == 15 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        self.delays_injected += 1;
        true
    }

    #[must_use]
    pub fn faults_injected(&self) -> u64 {
        self.faults_injected
    }

    #[must_use]
    pub fn delays_injected(&self) -> u64 {
        self.delays_injected
    }
}
