//! FIFO queue invariants.
//!
//! | Property | Description |
//! |----------|-------------|
//! | NoLostElements | Every enqueued element is still queued or was dequeued |
//! | NoDuplicates | No element is queued twice, dequeued twice, or both |
//! | FIFO_Order | Dequeued elements followed by contents equal the enqueue order |
//! | Linearizability | Recorded history replays against a sequential model |
//! | CountConservation | Advisory length equals enqueued minus dequeued |
//! | NodeReclamation | Every successful dequeue retired exactly one node |
//!
//! Checks read the implementation's contents, so they are only meaningful
//! while the queue is quiescent (no push/pop in flight).

use std::collections::{HashSet, VecDeque};

use crate::counterexample::{Counterexample, MemoryIssue, StateSnapshot, ThreadAction};
use crate::property::{PropertyChecker, PropertyResult};

/// Properties any FIFO queue implementation must expose for checking.
///
/// Elements are `u64` tags; checkers assume every enqueued tag is distinct.
pub trait QueueProperties {
    /// Elements in the order their enqueue took effect (linking order).
    fn enqueued_elements(&self) -> Vec<u64>;

    /// Elements in the order they were dequeued.
    fn dequeued_elements(&self) -> Vec<u64>;

    /// Current contents, head to tail.
    fn current_contents(&self) -> Vec<u64>;

    /// Length as reported by the implementation's own counter.
    fn reported_len(&self) -> usize;

    /// Operation history for linearizability checking.
    fn history(&self) -> QueueHistory;

    /// Nodes unlinked and handed to reclamation so far, for implementations
    /// that can count them.
    fn retired_nodes(&self) -> Option<u64> {
        None
    }
}

/// History of queue operations in linearization order.
#[derive(Debug, Clone, Default)]
pub struct QueueHistory {
    pub operations: Vec<QueueOperation>,
}

#[derive(Debug, Clone)]
pub struct QueueOperation {
    pub thread_id: u64,
    pub op_type: QueueOpType,
    /// Element pushed, or element returned by pop
    pub element: Option<u64>,
    pub step: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOpType {
    Push,
    Pop,
    PopEmpty,
}

impl QueueHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Step of the next operation to be recorded.
    #[must_use]
    pub fn next_step(&self) -> u64 {
        self.operations.len() as u64 + 1
    }

    pub fn record_push(&mut self, thread_id: u64, element: u64) {
        let step = self.next_step();
        self.operations.push(QueueOperation {
            thread_id,
            op_type: QueueOpType::Push,
            element: Some(element),
            step,
        });
    }

    pub fn record_pop(&mut self, thread_id: u64, element: Option<u64>) {
        let step = self.next_step();
        self.operations.push(QueueOperation {
            thread_id,
            op_type: if element.is_some() {
                QueueOpType::Pop
            } else {
                QueueOpType::PopEmpty
            },
            element,
            step,
        });
    }

    /// Render the history as thread actions for a counterexample.
    #[must_use]
    pub fn to_counterexample(&self, seed: Option<u64>) -> Counterexample {
        let mut ce = match seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        };
        for op in &self.operations {
            let action = match (op.op_type, op.element) {
                (QueueOpType::Push, Some(e)) => format!("push({})", e),
                (QueueOpType::Pop, Some(e)) => format!("pop() -> {}", e),
                _ => "pop() -> None".to_string(),
            };
            ce.add_action(ThreadAction {
                thread_id: op.thread_id,
                step: op.step,
                action,
                success: true,
            });
        }
        ce
    }
}

/// Property checker for queue implementations.
pub struct QueuePropertyChecker<'a, T: QueueProperties> {
    queue: &'a T,
    dst_seed: Option<u64>,
}

impl<'a, T: QueueProperties> QueuePropertyChecker<'a, T> {
    #[must_use]
    pub fn new(queue: &'a T) -> Self {
        Self {
            queue,
            dst_seed: None,
        }
    }

    /// Set DST seed for counterexample reproduction.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        self.dst_seed = Some(seed);
        self
    }

    fn counterexample(&self) -> Counterexample {
        match self.dst_seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        }
    }

    fn check_no_lost_elements(&self) -> PropertyResult {
        let enqueued = self.queue.enqueued_elements();
        let dequeued: HashSet<u64> = self.queue.dequeued_elements().into_iter().collect();
        let contents: HashSet<u64> = self.queue.current_contents().into_iter().collect();

        for element in &enqueued {
            if !contents.contains(element) && !dequeued.contains(element) {
                let mut ce = self.counterexample();
                ce.add_state(StateSnapshot {
                    step: 1,
                    description: format!("Element {} lost", element),
                    variables: vec![
                        ("enqueued".to_string(), format!("{:?}", enqueued)),
                        ("dequeued".to_string(), format!("{:?}", dequeued)),
                        ("contents".to_string(), format!("{:?}", contents)),
                    ],
                });
                return PropertyResult::fail(
                    "NoLostElements",
                    format!(
                        "Element {} was enqueued but is neither queued nor dequeued",
                        element
                    ),
                    Some(ce),
                );
            }
        }

        PropertyResult::pass("NoLostElements")
    }

    fn check_no_duplicates(&self) -> PropertyResult {
        let mut seen = HashSet::new();
        let dequeued = self.queue.dequeued_elements();
        let contents = self.queue.current_contents();

        for element in dequeued.iter().chain(contents.iter()) {
            if !seen.insert(*element) {
                return PropertyResult::fail(
                    "NoDuplicates",
                    format!("Element {} was observed more than once", element),
                    None,
                );
            }
        }

        PropertyResult::pass("NoDuplicates")
    }

    /// Everything ever delivered, followed by what is still queued, must be
    /// exactly the enqueue order.
    fn check_fifo_order(&self) -> PropertyResult {
        let enqueued = self.queue.enqueued_elements();
        let observed: Vec<u64> = self
            .queue
            .dequeued_elements()
            .into_iter()
            .chain(self.queue.current_contents())
            .collect();

        if let Some(i) = (0..enqueued.len().min(observed.len())).find(|&i| enqueued[i] != observed[i]) {
            let ce = self
                .queue
                .history()
                .to_counterexample(self.dst_seed)
                .with_description("FIFO_Order".to_string());
            return PropertyResult::fail(
                "FIFO_Order",
                format!(
                    "Position {} holds {} but enqueue order expected {}",
                    i, observed[i], enqueued[i]
                ),
                Some(ce),
            );
        }

        PropertyResult::pass("FIFO_Order")
    }

    /// Necessary condition only: the recorded history must be a valid
    /// sequential execution. Interleavings are explored by loom.
    fn check_linearizability(&self) -> PropertyResult {
        let history = self.queue.history();
        let mut model: VecDeque<u64> = VecDeque::new();

        for op in &history.operations {
            let mismatch = match op.op_type {
                QueueOpType::Push => {
                    if let Some(e) = op.element {
                        model.push_back(e);
                    }
                    None
                }
                QueueOpType::Pop => match (op.element, model.pop_front()) {
                    (Some(got), Some(expected)) if got != expected => Some(format!(
                        "pop returned {} but model expected {} (step {})",
                        got, expected, op.step
                    )),
                    (Some(got), None) => Some(format!(
                        "pop returned {} but model was empty (step {})",
                        got, op.step
                    )),
                    _ => None,
                },
                QueueOpType::PopEmpty if !model.is_empty() => Some(format!(
                    "pop returned None but model holds {} elements (step {})",
                    model.len(),
                    op.step
                )),
                QueueOpType::PopEmpty => None,
            };

            if let Some(msg) = mismatch {
                let ce = history
                    .to_counterexample(self.dst_seed)
                    .with_description(msg.clone());
                return PropertyResult::fail("Linearizability", msg, Some(ce));
            }
        }

        PropertyResult::pass("Linearizability")
    }

    fn check_count_conservation(&self) -> PropertyResult {
        let enqueued = self.queue.enqueued_elements().len();
        let dequeued = self.queue.dequeued_elements().len();
        let contents = self.queue.current_contents().len();
        let reported = self.queue.reported_len();

        if dequeued > enqueued {
            return PropertyResult::fail(
                "CountConservation",
                format!("Dequeued {} elements but only {} were enqueued", dequeued, enqueued),
                None,
            );
        }

        let expected = enqueued - dequeued;
        if contents != expected || reported != expected {
            return PropertyResult::fail(
                "CountConservation",
                format!(
                    "Expected {} queued elements, found {} reachable with length counter {}",
                    expected, contents, reported
                ),
                None,
            );
        }

        PropertyResult::pass("CountConservation")
    }

    /// Each successful pop unlinks the old sentinel; fewer retirements leak
    /// nodes, more mean a node was retired twice.
    fn check_node_reclamation(&self) -> PropertyResult {
        let retired = match self.queue.retired_nodes() {
            Some(retired) => retired,
            None => return PropertyResult::pass("NodeReclamation"),
        };
        let history = self.queue.history();
        let pop_steps: Vec<u64> = history
            .operations
            .iter()
            .filter(|op| op.op_type == QueueOpType::Pop)
            .map(|op| op.step)
            .collect();
        let pops = pop_steps.len() as u64;

        if retired == pops {
            return PropertyResult::pass("NodeReclamation");
        }

        let mut ce = history.to_counterexample(self.dst_seed);
        let violation = if retired < pops {
            // the first pop whose sentinel never reached reclamation
            let allocated_at_step = pop_steps[retired as usize];
            ce.add_memory_issue(MemoryIssue::NodeLeak {
                node: retired,
                allocated_at_step,
            });
            format!("{} pops retired only {} nodes", pops, retired)
        } else {
            let last_pop = pop_steps.last().copied().unwrap_or(0);
            ce.add_memory_issue(MemoryIssue::DoubleFree {
                node: pops,
                first_step: last_pop,
                second_step: history.next_step(),
            });
            format!("{} pops retired {} nodes", pops, retired)
        };

        PropertyResult::fail(
            "NodeReclamation",
            violation.clone(),
            Some(ce.with_description(violation)),
        )
    }
}

impl<T: QueueProperties> PropertyChecker for QueuePropertyChecker<'_, T> {
    fn check_all(&self) -> Vec<PropertyResult> {
        vec![
            self.check_no_lost_elements(),
            self.check_no_duplicates(),
            self.check_fifo_order(),
            self.check_linearizability(),
            self.check_count_conservation(),
            self.check_node_reclamation(),
        ]
    }
}
