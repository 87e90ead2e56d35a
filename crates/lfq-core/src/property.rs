//! Property results and the checker trait shared by every invariant module.

use serde::Serialize;

use crate::counterexample::Counterexample;

/// Outcome of checking one named invariant.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyResult {
    /// Invariant name, e.g. `NoLostElements`.
    pub name: &'static str,
    /// Whether the invariant held.
    pub holds: bool,
    /// Human-readable description of the violation (if any).
    pub violation: Option<String>,
    /// Failure path, when the checker could build one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterexample: Option<Counterexample>,
}

impl PropertyResult {
    /// A passing result.
    #[must_use]
    pub fn pass(name: &'static str) -> Self {
        Self {
            name,
            holds: true,
            violation: None,
            counterexample: None,
        }
    }

    /// A failing result with a violation message.
    #[must_use]
    pub fn fail(
        name: &'static str,
        violation: String,
        counterexample: Option<Counterexample>,
    ) -> Self {
        debug_assert!(!violation.is_empty(), "Violation message must not be empty");
        Self {
            name,
            holds: false,
            violation: Some(violation),
            counterexample,
        }
    }

    /// One-line status, e.g. `[PASS] FIFO_Order`.
    #[must_use]
    pub fn format_status(&self) -> String {
        match &self.violation {
            None => format!("[PASS] {}", self.name),
            Some(v) => format!("[FAIL] {}: {}", self.name, v),
        }
    }
}

/// Something that can check a set of invariants.
pub trait PropertyChecker {
    /// Check every invariant and return one result per invariant.
    fn check_all(&self) -> Vec<PropertyResult>;

    /// True when every invariant holds.
    fn all_hold(&self) -> bool {
        self.check_all().iter().all(|r| r.holds)
    }

    /// Only the failing results.
    fn violations(&self) -> Vec<PropertyResult> {
        self.check_all().into_iter().filter(|r| !r.holds).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<PropertyResult>);

    impl PropertyChecker for Fixed {
        fn check_all(&self) -> Vec<PropertyResult> {
            self.0.clone()
        }
    }

    #[test]
    fn test_all_hold_and_violations() {
        let ok = Fixed(vec![PropertyResult::pass("A"), PropertyResult::pass("B")]);
        assert!(ok.all_hold());
        assert!(ok.violations().is_empty());

        let bad = Fixed(vec![
            PropertyResult::pass("A"),
            PropertyResult::fail("B", "broken".to_string(), None),
        ]);
        assert!(!bad.all_hold());
        let violations = bad.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].name, "B");
        assert_eq!(violations[0].format_status(), "[FAIL] B: broken");
    }
}
