//! Adapters that let the DST runner and stress driver drive the queues.

use crossbeam_epoch as epoch;
use lfq_dst::DstTestableQueue;

use crate::concurrent_queue::ConcurrentQueue;

impl DstTestableQueue for ConcurrentQueue<u64> {
    fn new() -> Self {
        ConcurrentQueue::new()
    }

    fn push(&self, value: u64) {
        ConcurrentQueue::push(self, value);
    }

    fn pop(&self) -> Option<u64> {
        ConcurrentQueue::pop(self)
    }

    fn len(&self) -> usize {
        ConcurrentQueue::len(self)
    }

    fn collect_garbage(&self) {
        epoch::pin().flush();
    }
}

#[cfg(not(loom))]
impl DstTestableQueue for crate::loom_queue::LoomQueue<u64> {
    fn new() -> Self {
        crate::loom_queue::LoomQueue::new()
    }

    fn push(&self, value: u64) {
        crate::loom_queue::LoomQueue::push(self, value);
    }

    fn pop(&self) -> Option<u64> {
        crate::loom_queue::LoomQueue::pop(self)
    }

    fn len(&self) -> usize {
        crate::loom_queue::LoomQueue::len(self)
    }

    fn retired_nodes(&self) -> Option<u64> {
        Some(self.retired_len() as u64)
    }

    // walks the list in place so only real pops retire nodes
    fn snapshot(&self) -> Vec<u64> {
        crate::loom_queue::LoomQueue::snapshot(self)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use crate::{ConcurrentQueue, LoomQueue};
    use lfq_core::{PropertyChecker, QueueProperties};
    use lfq_dst::{generate_ops, run_dst_scenario, DeterministicRng, DstRunner};

    #[test]
    fn test_scenarios_hold_for_both_queues() {
        for seed in [1u64, 42, 9_001] {
            let ops = generate_ops(&mut DeterministicRng::new(seed), 300);

            let result = run_dst_scenario::<ConcurrentQueue<u64>>(seed, ops.clone());
            assert!(result.passed, "{}", result.format());

            let result = run_dst_scenario::<LoomQueue<u64>>(seed, ops);
            assert!(result.passed, "{}", result.format());
        }
    }

    #[test]
    fn test_loom_queue_reports_retired_nodes() {
        let mut runner: DstRunner<LoomQueue<u64>> = DstRunner::new(8);
        for v in 1..=20 {
            let _ = runner.push(v);
        }
        for _ in 0..12 {
            let _ = runner.pop();
        }

        let popped = runner.dequeued_elements().len() as u64;
        assert!(popped > 0);
        assert_eq!(runner.retired_nodes(), Some(popped));
        // checking twice must not disturb the accounting
        assert!(runner.checker().all_hold());
        assert!(runner.checker().all_hold());
        assert_eq!(runner.retired_nodes(), Some(popped));
    }
}
