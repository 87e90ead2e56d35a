//! Counterexamples for queue invariant violations.
//!
//! A counterexample records the queue states and per-thread actions that
//! led to a failure, so a DST run can be replayed and read as a thread
//! diagram.

use std::fmt;

use serde::Serialize;

/// A failure path: state snapshots plus the thread interleaving.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Counterexample {
    /// Sequence of state snapshots
    pub states: Vec<StateSnapshot>,
    /// Thread interleaving that caused the failure
    pub interleaving: Vec<ThreadAction>,
    /// Node lifetime problems detected
    pub memory_issues: Vec<MemoryIssue>,
    /// DST seed for reproduction (if applicable)
    pub dst_seed: Option<u64>,
    /// Which invariant failed and how
    pub description: Option<String>,
}

/// Queue state at one step.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub step: u64,
    pub description: String,
    /// Named values at this point, e.g. `("contents", "[1, 2]")`.
    pub variables: Vec<(String, String)>,
}

/// One queue operation performed by one thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadAction {
    pub thread_id: u64,
    pub step: u64,
    /// e.g. `push(7)`, `pop() -> 3`, `CAS head`
    pub action: String,
    pub success: bool,
}

/// Node lifetime problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MemoryIssue {
    /// A retired node was dereferenced after it was freed.
    UseAfterFree {
        node: u64,
        freed_at_step: u64,
        used_at_step: u64,
    },
    /// A node was freed by two different operations.
    DoubleFree {
        node: u64,
        first_step: u64,
        second_step: u64,
    },
    /// A node was still allocated after teardown.
    NodeLeak { node: u64, allocated_at_step: u64 },
}

impl Counterexample {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counterexample tagged with the DST seed that produced it.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        Self {
            dst_seed: Some(seed),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    /// Add a state snapshot. Steps must be strictly increasing.
    pub fn add_state(&mut self, state: StateSnapshot) {
        debug_assert!(
            self.states.last().map_or(true, |last| state.step > last.step),
            "States must be added in order"
        );
        self.states.push(state);
    }

    pub fn add_action(&mut self, action: ThreadAction) {
        self.interleaving.push(action);
    }

    pub fn add_memory_issue(&mut self, issue: MemoryIssue) {
        self.memory_issues.push(issue);
    }

    /// Render as a thread diagram:
    ///
    /// ```text
    /// DST_SEED=12345
    ///
    /// Step | Thread 0 | Thread 1 | State
    /// -----|----------|----------|------
    ///    1 | push(1) |          | len=1
    ///    2 |          | pop() -> 1 | len=0
    /// ```
    #[must_use]
    pub fn render_diagram(&self) -> String {
        let mut output = String::new();

        if let Some(seed) = self.dst_seed {
            output.push_str(&format!("DST_SEED={}\n\n", seed));
        }

        if let Some(ref desc) = self.description {
            output.push_str("Failure: ");
            output.push_str(desc);
            output.push_str("\n\n");
        }

        let mut threads: Vec<u64> = self.interleaving.iter().map(|a| a.thread_id).collect();
        threads.sort_unstable();
        threads.dedup();

        if threads.is_empty() {
            output.push_str("(no thread actions recorded)\n");
        } else {
            output.push_str("Step |");
            for tid in &threads {
                output.push_str(&format!(" Thread {} |", tid));
            }
            output.push_str(" State\n-----|");
            for _ in &threads {
                output.push_str("----------|");
            }
            output.push_str("------\n");

            let max_step = self.interleaving.iter().map(|a| a.step).max().unwrap_or(0);
            for step in 1..=max_step {
                output.push_str(&format!("{:4} |", step));
                for tid in &threads {
                    let action = self
                        .interleaving
                        .iter()
                        .find(|a| a.step == step && a.thread_id == *tid);
                    match action {
                        Some(a) if a.success => output.push_str(&format!(" {} |", a.action)),
                        Some(a) => output.push_str(&format!(" {} [FAIL] |", a.action)),
                        None => output.push_str("          |"),
                    }
                }
                if let Some(state) = self.states.iter().find(|s| s.step == step) {
                    output.push_str(&format!(" {}", state.description));
                }
                output.push('\n');
            }
        }

        if !self.memory_issues.is_empty() {
            output.push_str("\nMemory Issues:\n");
            for issue in &self.memory_issues {
                output.push_str(&format!("  - {}\n", issue));
            }
        }

        output
    }
}

impl fmt::Display for MemoryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryIssue::UseAfterFree {
                node,
                freed_at_step,
                used_at_step,
            } => write!(
                f,
                "Use-after-free: node {} freed at step {}, read at step {}",
                node, freed_at_step, used_at_step
            ),
            MemoryIssue::DoubleFree {
                node,
                first_step,
                second_step,
            } => write!(
                f,
                "Double free: node {} freed at steps {} and {}",
                node, first_step, second_step
            ),
            MemoryIssue::NodeLeak {
                node,
                allocated_at_step,
            } => write!(
                f,
                "Leak: node {} allocated at step {} never freed",
                node, allocated_at_step
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterexample_with_seed() {
        let ce = Counterexample::with_seed(12345);
        assert_eq!(ce.dst_seed, Some(12345));
        assert!(ce.states.is_empty());
    }

    #[test]
    fn test_render_diagram() {
        let mut ce = Counterexample::with_seed(42).with_description("FIFO_Order".to_string());

        ce.add_action(ThreadAction {
            thread_id: 0,
            step: 1,
            action: "push(1)".to_string(),
            success: true,
        });
        ce.add_action(ThreadAction {
            thread_id: 1,
            step: 2,
            action: "CAS head".to_string(),
            success: false,
        });
        ce.add_state(StateSnapshot {
            step: 1,
            description: "len=1".to_string(),
            variables: vec![],
        });
        ce.add_memory_issue(MemoryIssue::DoubleFree {
            node: 3,
            first_step: 1,
            second_step: 2,
        });

        let diagram = ce.render_diagram();
        assert!(diagram.starts_with("DST_SEED=42"));
        assert!(diagram.contains("Failure: FIFO_Order"));
        assert!(diagram.contains("Thread 1"));
        assert!(diagram.contains("push(1)"));
        assert!(diagram.contains("CAS head [FAIL]"));
        assert!(diagram.contains("Double free: node 3"));
    }

    #[test]
    fn test_render_without_actions() {
        let ce = Counterexample::new();
        assert!(ce.render_diagram().contains("(no thread actions recorded)"));
    }
}
