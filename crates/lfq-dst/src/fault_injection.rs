//! Fault injection for lock-free queues.
//!
//! Faults are injected at OPERATION BOUNDARIES, never inside a CAS loop:
//! the queue under test runs unmodified and the runner decides, before and
//! after each push/pop, whether to simulate a crashed caller, a failed
//! allocation, a stall, or an early epoch collection.
//!
//! ```text
//!  FaultPoint::BeforeOperation -> queue.push()/pop() -> FaultPoint::AfterOperation
//!         |                                                   |
//!  "allocation fails?"                           "caller dies before seeing result?"
//! ```

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use lfq_core::{PropertyChecker, PropertyResult, QueueHistory, QueueProperties, QueuePropertyChecker};

use crate::fault::{FaultConfig, FaultInjector};
use crate::random::DeterministicRng;

/// Where a fault is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    BeforeOperation,
    AfterOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum FaultType {
    /// Node allocation fails, the operation never starts
    #[error("injected allocation failure")]
    AllocationFailure,
    /// Caller is abandoned; the operation may or may not have taken effect
    #[error("injected thread crash")]
    ThreadCrash,
    #[error("injected delay")]
    Delay,
    /// Deferred node destruction is forced to run
    #[error("injected epoch collection")]
    EpochGcTrigger,
}

/// Minimal queue interface the DST runner and stress driver drive.
///
/// No DST knowledge lives in the implementation.
pub trait DstTestableQueue: Send + Sync {
    fn new() -> Self
    where
        Self: Sized;
    fn push(&self, value: u64);
    fn pop(&self) -> Option<u64>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run any reclamation work that is pending. No-op by default.
    fn collect_garbage(&self) {}

    /// Nodes unlinked by pops so far, when the queue counts them.
    fn retired_nodes(&self) -> Option<u64> {
        None
    }

    /// Contents head to tail. Drains the queue and pushes every element
    /// back, so it is only valid while no other thread is operating.
    fn snapshot(&self) -> Vec<u64> {
        let mut contents = Vec::with_capacity(self.len());
        while let Some(v) = self.pop() {
            contents.push(v);
        }
        for &v in &contents {
            self.push(v);
        }
        contents
    }
}

/// DST runner: wraps a queue and injects faults around each operation.
pub struct DstRunner<Q> {
    queue: Q,
    rng: DeterministicRng,
    fault_injector: FaultInjector,
    seed: u64,
    enqueued: Vec<u64>,
    dequeued: Vec<u64>,
    history: QueueHistory,
    operations_count: u64,
    faults_injected: u64,
    abandoned_operations: u64,
    empty_pops: u64,
}

impl<Q: DstTestableQueue> DstRunner<Q> {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    #[must_use]
    pub fn with_fault_config(seed: u64, config: FaultConfig) -> Self {
        Self {
            queue: Q::new(),
            rng: DeterministicRng::new(seed),
            fault_injector: FaultInjector::new(DeterministicRng::new(seed.wrapping_add(1)), config),
            seed,
            enqueued: Vec::new(),
            dequeued: Vec::new(),
            history: QueueHistory::new(),
            operations_count: 0,
            faults_injected: 0,
            abandoned_operations: 0,
            empty_pops: 0,
        }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Push with fault injection at the boundaries.
    pub fn push(&mut self, value: u64) -> Result<(), FaultType> {
        if let Some(fault) = self.maybe_inject_fault(FaultPoint::BeforeOperation) {
            match fault {
                FaultType::AllocationFailure => return Err(fault),
                FaultType::ThreadCrash => {
                    self.abandoned_operations += 1;
                    return Err(fault);
                }
                FaultType::Delay | FaultType::EpochGcTrigger => {}
            }
        }

        self.queue.push(value);
        self.operations_count += 1;
        // the push took effect regardless of what happens to the caller now
        self.enqueued.push(value);
        self.history.record_push(0, value);

        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::AfterOperation) {
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }

        Ok(())
    }

    /// Pop with fault injection at the boundaries.
    pub fn pop(&mut self) -> Result<Option<u64>, FaultType> {
        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::BeforeOperation) {
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }

        let result = self.queue.pop();
        self.operations_count += 1;
        match result {
            Some(value) => self.dequeued.push(value),
            None => self.empty_pops += 1,
        }
        self.history.record_pop(0, result);

        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::AfterOperation) {
            // value left the queue but the caller never saw it
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }

        Ok(result)
    }

    fn maybe_inject_fault(&mut self, point: FaultPoint) -> Option<FaultType> {
        if !self.fault_injector.should_fail() {
            return None;
        }
        self.faults_injected += 1;
        let fault = match self.rng.gen_range(0..4u8) {
            0 => FaultType::AllocationFailure,
            1 => FaultType::ThreadCrash,
            2 => FaultType::Delay,
            _ => FaultType::EpochGcTrigger,
        };
        debug!(seed = self.seed, ?point, ?fault, "injecting fault");
        match fault {
            FaultType::Delay => {
                self.fault_injector.maybe_delay();
            }
            FaultType::EpochGcTrigger => self.queue.collect_garbage(),
            _ => {}
        }
        Some(fault)
    }

    /// Invariant checker over this runner's observations. Counterexamples
    /// carry the runner's seed unless it is zero.
    #[must_use]
    pub fn checker(&self) -> QueuePropertyChecker<'_, Self> {
        let checker = QueuePropertyChecker::new(self);
        if self.seed == 0 {
            checker
        } else {
            checker.with_seed(self.seed)
        }
    }

    #[must_use]
    pub fn stats(&self) -> DstStats {
        DstStats {
            seed: self.seed,
            operations_count: self.operations_count,
            faults_injected: self.faults_injected,
            abandoned_operations: self.abandoned_operations,
            empty_pops: self.empty_pops,
        }
    }
}

impl<Q: DstTestableQueue> QueueProperties for DstRunner<Q> {
    fn enqueued_elements(&self) -> Vec<u64> {
        self.enqueued.clone()
    }

    fn dequeued_elements(&self) -> Vec<u64> {
        self.dequeued.clone()
    }

    fn current_contents(&self) -> Vec<u64> {
        self.queue.snapshot()
    }

    fn reported_len(&self) -> usize {
        self.queue.len()
    }

    fn history(&self) -> QueueHistory {
        self.history.clone()
    }

    fn retired_nodes(&self) -> Option<u64> {
        self.queue.retired_nodes()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DstStats {
    pub seed: u64,
    pub operations_count: u64,
    pub faults_injected: u64,
    pub abandoned_operations: u64,
    pub empty_pops: u64,
}

impl DstStats {
    #[must_use]
    pub fn format(&self) -> String {
        format!(
            "DST_SEED={} ops={} faults={} abandoned={} empty_pops={}",
            self.seed,
            self.operations_count,
            self.faults_injected,
            self.abandoned_operations,
            self.empty_pops
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DstOp {
    Push(u64),
    Pop,
}

/// Random workload of `count` operations with distinct, increasing push
/// values. Pushes are slightly favoured so the queue does not stay empty.
pub fn generate_ops(rng: &mut DeterministicRng, count: usize) -> Vec<DstOp> {
    let mut next_value = 1u64;
    (0..count)
        .map(|_| {
            if rng.gen_bool(0.55) {
                next_value += 1;
                DstOp::Push(next_value - 1)
            } else {
                DstOp::Pop
            }
        })
        .collect()
}

#[derive(Debug)]
pub struct DstResult {
    pub passed: bool,
    pub stats: DstStats,
    pub violations: Vec<PropertyResult>,
    pub fault_errors: Vec<FaultType>,
}

impl DstResult {
    #[must_use]
    pub fn format(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut result = format!("[{}] {}", status, self.stats.format());
        for v in &self.violations {
            result.push_str("\n  ");
            result.push_str(&v.format_status());
            if let Some(ce) = &v.counterexample {
                result.push('\n');
                result.push_str(&ce.render_diagram());
            }
        }
        result
    }
}

/// Run `operations` against a fresh queue with default fault injection and
/// check every queue invariant at the end.
pub fn run_dst_scenario<Q: DstTestableQueue>(seed: u64, operations: Vec<DstOp>) -> DstResult {
    run_dst_scenario_with::<Q>(seed, operations, FaultConfig::default())
}

pub fn run_dst_scenario_with<Q: DstTestableQueue>(
    seed: u64,
    operations: Vec<DstOp>,
    faults: FaultConfig,
) -> DstResult {
    let mut runner: DstRunner<Q> = DstRunner::with_fault_config(seed, faults);
    let mut fault_errors = Vec::new();

    for op in operations {
        let result = match op {
            DstOp::Push(v) => runner.push(v),
            DstOp::Pop => runner.pop().map(|_| ()),
        };
        // faults are part of the test, keep going
        if let Err(fault) = result {
            fault_errors.push(fault);
        }
    }

    let violations = runner.checker().violations();
    if !violations.is_empty() {
        warn!(seed, count = violations.len(), "queue invariants violated");
    }

    DstResult {
        passed: violations.is_empty(),
        stats: runner.stats(),
        violations,
        fault_errors,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Lock-based reference queue for testing the framework itself.
    pub(crate) struct MockQueue {
        values: Mutex<VecDeque<u64>>,
    }

    impl DstTestableQueue for MockQueue {
        fn new() -> Self {
            Self {
                values: Mutex::new(VecDeque::new()),
            }
        }

        fn push(&self, value: u64) {
            self.values.lock().unwrap().push_back(value);
        }

        fn pop(&self) -> Option<u64> {
            self.values.lock().unwrap().pop_front()
        }

        fn len(&self) -> usize {
            self.values.lock().unwrap().len()
        }
    }

    /// Delivers the two oldest elements in swapped order.
    struct SwappingQueue(MockQueue);

    impl DstTestableQueue for SwappingQueue {
        fn new() -> Self {
            Self(MockQueue::new())
        }

        fn push(&self, value: u64) {
            let mut values = self.0.values.lock().unwrap();
            values.push_back(value);
            if values.len() == 2 {
                values.swap(0, 1);
            }
        }

        fn pop(&self) -> Option<u64> {
            self.0.pop()
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn test_dst_runner_basic() {
        let mut runner: DstRunner<MockQueue> = DstRunner::new(12345);

        let _ = runner.push(1);
        let _ = runner.push(2);
        let _ = runner.pop();

        assert!(runner.checker().all_hold());
    }

    #[test]
    fn test_snapshot_preserves_order() {
        let q = MockQueue::new();
        for v in [3, 1, 2] {
            q.push(v);
        }
        assert_eq!(q.snapshot(), vec![3, 1, 2]);
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn test_dst_scenario() {
        let ops = vec![DstOp::Push(100), DstOp::Push(200), DstOp::Pop, DstOp::Push(300)];
        let result = run_dst_scenario::<MockQueue>(12345, ops);
        assert!(result.passed, "DST failed: {}", result.format());
    }

    #[test]
    fn test_random_scenario_with_aggressive_faults() {
        let mut rng = DeterministicRng::new(77);
        let ops = generate_ops(&mut rng, 2000);
        let result = run_dst_scenario_with::<MockQueue>(77, ops, FaultConfig::aggressive());
        assert!(result.passed, "DST failed: {}", result.format());
        assert!(result.stats.faults_injected > 0);
        assert!(result.fault_errors.len() as u64 <= result.stats.faults_injected);
    }

    #[test]
    fn test_broken_queue_is_caught() {
        let ops = vec![DstOp::Push(1), DstOp::Push(2), DstOp::Pop];
        let result = run_dst_scenario_with::<SwappingQueue>(9, ops, FaultConfig::none());
        assert!(!result.passed);
        assert!(result.violations.iter().any(|v| v.name == "FIFO_Order"));
        assert!(result.format().contains("DST_SEED=9"));
    }

    /// Reports one retired node fewer than it popped.
    struct LeakyQueue {
        inner: MockQueue,
        pops: std::sync::atomic::AtomicU64,
    }

    impl DstTestableQueue for LeakyQueue {
        fn new() -> Self {
            Self {
                inner: MockQueue::new(),
                pops: std::sync::atomic::AtomicU64::new(0),
            }
        }

        fn push(&self, value: u64) {
            self.inner.push(value);
        }

        fn pop(&self) -> Option<u64> {
            let value = self.inner.pop();
            if value.is_some() {
                self.pops.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            value
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn retired_nodes(&self) -> Option<u64> {
            Some(self.pops.load(std::sync::atomic::Ordering::Relaxed).saturating_sub(1))
        }

        // snapshot without popping, so only real pops are counted
        fn snapshot(&self) -> Vec<u64> {
            self.inner.values.lock().unwrap().iter().copied().collect()
        }
    }

    #[test]
    fn test_leaked_node_is_caught() {
        let ops = vec![DstOp::Push(1), DstOp::Push(2), DstOp::Pop, DstOp::Pop];
        let result = run_dst_scenario_with::<LeakyQueue>(21, ops, FaultConfig::none());
        assert!(!result.passed);
        let leak = result
            .violations
            .iter()
            .find(|v| v.name == "NodeReclamation")
            .expect("leak must be reported");
        let ce = leak.counterexample.as_ref().unwrap();
        assert!(matches!(
            ce.memory_issues.as_slice(),
            [lfq_core::MemoryIssue::NodeLeak { node: 1, .. }]
        ));
        assert!(result.format().contains("Leak: node 1"));
    }

    #[test]
    fn test_counterexample_keeps_runner_seed() {
        let ops = vec![DstOp::Push(1), DstOp::Push(2), DstOp::Pop];

        let result = run_dst_scenario_with::<SwappingQueue>(1, ops.clone(), FaultConfig::none());
        let ce = result.violations[0].counterexample.as_ref().unwrap();
        assert_eq!(ce.dst_seed, Some(1));

        // zero means "no seed" and is never rewritten into another one
        let result = run_dst_scenario_with::<SwappingQueue>(0, ops, FaultConfig::none());
        let ce = result.violations[0].counterexample.as_ref().unwrap();
        assert_eq!(ce.dst_seed, None);
    }

    #[test]
    fn test_determinism() {
        let ops = vec![DstOp::Push(1), DstOp::Push(2), DstOp::Pop];
        let r1 = run_dst_scenario::<MockQueue>(42, ops.clone());
        let r2 = run_dst_scenario::<MockQueue>(42, ops);
        assert_eq!(r1.stats.faults_injected, r2.stats.faults_injected);
        assert_eq!(r1.fault_errors, r2.fault_errors);
    }

    #[test]
    fn test_generate_ops_values_are_distinct() {
        let mut rng = DeterministicRng::new(3);
        let pushed: Vec<u64> = generate_ops(&mut rng, 500)
            .into_iter()
            .filter_map(|op| match op {
                DstOp::Push(v) => Some(v),
                DstOp::Pop => None,
            })
            .collect();
        assert!(pushed.windows(2).all(|w| w[0] < w[1]));
    }
}
