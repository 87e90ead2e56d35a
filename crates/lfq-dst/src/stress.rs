//! Concurrent stress driver.
//!
//! Producers push tagged values `(producer << 32) | seq`; consumers poll
//! until every value has been delivered. Afterwards the driver checks:
//!
//! - exactly-once delivery (no lost, no duplicated values)
//! - per-producer order as seen by each consumer (linking-order FIFO)
//! - the queue is empty and its length counter reads zero
//!
//! Thread scheduling is perturbed by seeded delays so a failing seed has a
//! good chance of failing again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{env_u64, get_or_generate_seed};
use crate::error::{DstError, Result};
use crate::fault::{FaultConfig, FaultInjector};
use crate::fault_injection::DstTestableQueue;
use crate::random::DeterministicRng;

pub const ENV_PRODUCERS: &str = "LFQ_PRODUCERS";
pub const ENV_CONSUMERS: &str = "LFQ_CONSUMERS";
pub const ENV_OPS_PER_PRODUCER: &str = "LFQ_OPS_PER_PRODUCER";

/// Upper bound on threads per role.
const THREADS_MAX: usize = 256;

/// Consecutive empty polls, after every producer finished, before a
/// consumer gives up on values that never arrive.
const EMPTY_POLLS_STALLED: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressConfig {
    pub producers: usize,
    pub consumers: usize,
    pub ops_per_producer: u64,
    pub seed: u64,
    /// Delay injection between operations
    pub faults: FaultConfig,
}

impl StressConfig {
    #[must_use]
    pub fn new(producers: usize, consumers: usize, ops_per_producer: u64, seed: u64) -> Self {
        Self {
            producers,
            consumers,
            ops_per_producer,
            seed,
            faults: FaultConfig {
                fault_probability: 0.0,
                delay_probability: 0.01,
                max_delay_spins: 64,
            },
        }
    }

    /// 8 producers × 8 consumers, sizes overridable through `LFQ_*` and
    /// `DST_SEED` environment variables.
    pub fn from_env() -> Result<Self> {
        let config = Self::new(
            env_u64(ENV_PRODUCERS)?.map_or(8, |v| v as usize),
            env_u64(ENV_CONSUMERS)?.map_or(8, |v| v as usize),
            env_u64(ENV_OPS_PER_PRODUCER)?.unwrap_or(10_000),
            get_or_generate_seed()?,
        );
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.producers == 0 || self.consumers == 0 {
            return Err(DstError::InvalidStressConfig(
                "need at least one producer and one consumer".to_string(),
            ));
        }
        if self.producers > THREADS_MAX || self.consumers > THREADS_MAX {
            return Err(DstError::InvalidStressConfig(format!(
                "at most {} threads per role",
                THREADS_MAX
            )));
        }
        if self.ops_per_producer > u64::from(u32::MAX) {
            return Err(DstError::InvalidStressConfig(
                "ops_per_producer must fit in 32 bits".to_string(),
            ));
        }
        self.faults.validate()
    }

    fn total_ops(&self) -> u64 {
        self.producers as u64 * self.ops_per_producer
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StressReport {
    pub seed: u64,
    pub producers: usize,
    pub consumers: usize,
    pub pushed: u64,
    pub popped: u64,
    pub empty_polls: u64,
    pub missing: u64,
    pub duplicates: u64,
    pub order_violations: u64,
    pub final_len: usize,
    pub elapsed_ms: u64,
    pub ops_per_sec: f64,
}

impl StressReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.missing == 0
            && self.duplicates == 0
            && self.order_violations == 0
            && self.final_len == 0
            && self.pushed == self.popped
    }

    #[must_use]
    pub fn format(&self) -> String {
        let status = if self.passed() { "PASS" } else { "FAIL" };
        format!(
            "[{}] DST_SEED={} producers={} consumers={} pushed={} popped={} missing={} \
             duplicates={} order_violations={} final_len={} ops/s={:.0}",
            status,
            self.seed,
            self.producers,
            self.consumers,
            self.pushed,
            self.popped,
            self.missing,
            self.duplicates,
            self.order_violations,
            self.final_len,
            self.ops_per_sec
        )
    }
}

#[inline]
fn tag(producer: usize, seq: u64) -> u64 {
    ((producer as u64) << 32) | seq
}

#[inline]
fn untag(value: u64) -> (usize, u64) {
    ((value >> 32) as usize, value & u64::from(u32::MAX))
}

/// What one consumer thread observed.
struct ConsumerLog {
    received: Vec<u64>,
    empty_polls: u64,
    order_violations: u64,
}

/// Run the stress workload against `queue`, which must start empty.
pub fn run_stress<Q: DstTestableQueue>(queue: &Q, config: &StressConfig) -> Result<StressReport> {
    config.validate()?;
    if !queue.is_empty() {
        return Err(DstError::InvalidStressConfig("queue must start empty".to_string()));
    }

    let total = config.total_ops();
    let delivered = AtomicU64::new(0);
    let pushed = AtomicU64::new(0);
    let start_line = Barrier::new(config.producers + config.consumers);

    let mut rng = DeterministicRng::new(config.seed);
    let mut producer_rngs: Vec<DeterministicRng> = (0..config.producers).map(|_| rng.fork()).collect();
    let mut consumer_rngs: Vec<DeterministicRng> = (0..config.consumers).map(|_| rng.fork()).collect();

    info!(
        seed = config.seed,
        producers = config.producers,
        consumers = config.consumers,
        ops_per_producer = config.ops_per_producer,
        "starting stress run"
    );
    let started = Instant::now();

    let logs: Vec<ConsumerLog> = thread::scope(|s| {
        for (producer, rng) in producer_rngs.drain(..).enumerate() {
            let (pushed, start_line) = (&pushed, &start_line);
            s.spawn(move || {
                let mut faults = FaultInjector::new(rng, config.faults);
                start_line.wait();
                for seq in 0..config.ops_per_producer {
                    faults.maybe_delay();
                    queue.push(tag(producer, seq));
                }
                pushed.fetch_add(config.ops_per_producer, Ordering::Release);
            });
        }

        let handles: Vec<_> = consumer_rngs
            .drain(..)
            .map(|rng| {
                let (delivered, pushed, start_line) = (&delivered, &pushed, &start_line);
                s.spawn(move || {
                    let mut faults = FaultInjector::new(rng, config.faults);
                    let mut log = ConsumerLog {
                        received: Vec::new(),
                        empty_polls: 0,
                        order_violations: 0,
                    };
                    let mut last_seq: Vec<Option<u64>> = vec![None; config.producers];
                    let mut consecutive_empty = 0u64;
                    start_line.wait();
                    while delivered.load(Ordering::Relaxed) < total {
                        faults.maybe_delay();
                        match queue.pop() {
                            Some(value) => {
                                consecutive_empty = 0;
                                delivered.fetch_add(1, Ordering::Relaxed);
                                let (producer, seq) = untag(value);
                                if let Some(slot) = last_seq.get_mut(producer) {
                                    if slot.map_or(false, |last| seq <= last) {
                                        log.order_violations += 1;
                                    }
                                    *slot = Some(seq);
                                }
                                log.received.push(value);
                            }
                            None => {
                                log.empty_polls += 1;
                                consecutive_empty += 1;
                                if consecutive_empty > EMPTY_POLLS_STALLED
                                    && pushed.load(Ordering::Acquire) == total
                                {
                                    warn!("consumer stalled on an empty queue before all values arrived");
                                    break;
                                }
                                thread::yield_now();
                            }
                        }
                    }
                    log
                })
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .collect()
    });

    let elapsed = started.elapsed();
    let mut report = StressReport {
        seed: config.seed,
        producers: config.producers,
        consumers: config.consumers,
        pushed: pushed.load(Ordering::Relaxed),
        final_len: queue.len(),
        elapsed_ms: elapsed.as_millis() as u64,
        ..StressReport::default()
    };

    let mut seen = vec![false; total as usize];
    for log in &logs {
        report.empty_polls += log.empty_polls;
        report.order_violations += log.order_violations;
        report.popped += log.received.len() as u64;
        for &value in &log.received {
            let (producer, seq) = untag(value);
            if producer >= config.producers || seq >= config.ops_per_producer {
                // a value nobody pushed counts as a corrupted delivery
                report.duplicates += 1;
                continue;
            }
            let index = (producer as u64 * config.ops_per_producer + seq) as usize;
            if std::mem::replace(&mut seen[index], true) {
                report.duplicates += 1;
            }
        }
    }
    report.missing = seen.iter().filter(|s| !**s).count() as u64;
    report.ops_per_sec = (report.pushed + report.popped) as f64 / elapsed.as_secs_f64().max(1e-9);

    if report.passed() {
        info!(report = %report.format(), "stress run finished");
    } else {
        warn!(report = %report.format(), "stress run violated queue invariants");
    }
    debug!(empty_polls = report.empty_polls, "consumer polling");

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault_injection::tests::MockQueue;

    #[test]
    fn test_tag_roundtrip() {
        assert_eq!(untag(tag(7, 12345)), (7, 12345));
        assert_eq!(untag(tag(0, u64::from(u32::MAX))), (0, u64::from(u32::MAX)));
    }

    #[test]
    fn test_stress_against_reference_queue() {
        let queue = MockQueue::new();
        let config = StressConfig::new(3, 2, 500, 11);
        let report = run_stress(&queue, &config).unwrap();
        assert!(report.passed(), "{}", report.format());
        assert_eq!(report.pushed, 1500);
        assert_eq!(report.popped, 1500);
    }

    #[test]
    fn test_invalid_shape_rejected() {
        let queue = MockQueue::new();
        let config = StressConfig::new(0, 2, 10, 1);
        assert!(matches!(
            run_stress(&queue, &config),
            Err(DstError::InvalidStressConfig(_))
        ));
    }

    #[test]
    fn test_non_empty_queue_rejected() {
        let queue = MockQueue::new();
        queue.push(1);
        let config = StressConfig::new(1, 1, 10, 1);
        assert!(run_stress(&queue, &config).is_err());
    }

    #[test]
    fn test_report_flags_missing_values() {
        let report = StressReport {
            pushed: 10,
            popped: 9,
            missing: 1,
            ..StressReport::default()
        };
        assert!(!report.passed());
        assert!(report.format().starts_with("[FAIL]"));
    }
}
