//! Assertion recorder for one control evaluation
//!
//! The run coordinator creates the [`Evaluation`] and keeps a handle to it, so the
//! assertions a control recorded before it errored, panicked or timed out are still
//! reported. Handles are cheap clones over shared state.

use crate::control::Applicability;
use crate::matcher::{evaluate, Expectation};
use pgstig_core::{AssertionResult, AssertionStatus, MatcherKind, Outcome, Result, Value};
use std::sync::{Arc, Mutex, MutexGuard};

/// Why a control recorded a note instead of an assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    Skip,
    ManualReview,
}

#[derive(Debug, Default)]
struct Recorded {
    assertions: Vec<AssertionResult>,
    notes: Vec<(NoteKind, String)>,
}

/// Final state of a control
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub outcome: Outcome,
    pub message: String,
    /// Assertions in recording order, followed by notes
    pub assertions: Vec<AssertionResult>,
}

/// Records the assertions and notes of one control
#[derive(Debug, Clone)]
pub struct Evaluation {
    control_id: String,
    recorded: Arc<Mutex<Recorded>>,
}

fn assertion(description: String, expectation: &Expectation, actual: &Value) -> AssertionResult {
    let outcome = evaluate(expectation, actual);
    AssertionResult {
        description,
        matcher: expectation.kind(),
        expected: expectation.render(),
        actual: actual.render(),
        status: outcome.status,
        message: outcome.message,
        children: Vec::new(),
    }
}

impl Evaluation {
    pub fn new(control_id: impl Into<String>) -> Self {
        Self {
            control_id: control_id.into(),
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }

    pub fn control_id(&self) -> &str {
        &self.control_id
    }

    // A panicking control may poison the lock; what it recorded is still valid
    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Evaluate and record one assertion; returns whether it passed
    pub fn check(
        &mut self,
        description: impl Into<String>,
        actual: impl Into<Value>,
        expectation: Expectation,
    ) -> bool {
        let result = assertion(description.into(), &expectation, &actual.into());
        let passed = result.is_passed();
        self.lock().assertions.push(result);
        passed
    }

    /// Record a one-of group; passes iff any alternative passed
    pub fn one_of(&mut self, group: OneOf) -> bool {
        let status = if group.children.iter().any(|c| c.is_passed()) {
            AssertionStatus::Passed
        } else if group.children.iter().any(|c| c.is_failed()) {
            AssertionStatus::Failed
        } else {
            AssertionStatus::Errored
        };

        let passed_count = group.children.iter().filter(|c| c.is_passed()).count();
        let message = match status {
            AssertionStatus::Passed => format!(
                "{} of {} alternatives passed",
                passed_count,
                group.children.len()
            ),
            _ => {
                let reasons: Vec<String> = group
                    .children
                    .iter()
                    .map(|c| format!("{}: {}", c.description, c.message))
                    .collect();
                format!("no alternative passed ({})", reasons.join("; "))
            }
        };

        let result = AssertionResult {
            description: group.description,
            matcher: MatcherKind::OneOf,
            expected: format!("one of {} alternatives", group.children.len()),
            actual: String::new(),
            status,
            message,
            children: group.children,
        };
        let passed = result.is_passed();
        self.lock().assertions.push(result);
        passed
    }

    /// Note that part of the control was deliberately not evaluated
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.lock().notes.push((NoteKind::Skip, reason.into()));
    }

    /// Note that part of the control needs a human reviewer
    pub fn manual_review(&mut self, reason: impl Into<String>) {
        self.lock().notes.push((NoteKind::ManualReview, reason.into()));
    }

    /// Assertions recorded so far (notes excluded)
    pub fn assertions(&self) -> Vec<AssertionResult> {
        self.lock().assertions.clone()
    }

    pub fn assertion_count(&self) -> usize {
        self.lock().assertions.len()
    }

    /// Verdict for a finished [`crate::control::execute`] call
    pub fn finish(&self, result: Result<Applicability>) -> Verdict {
        match result {
            Ok(Applicability::Applicable) => self.conclude(None),
            Ok(Applicability::NotApplicable(reason)) => Verdict {
                outcome: Outcome::Skipped,
                message: reason,
                assertions: Vec::new(),
            },
            Err(e) => self.conclude(Some(e.to_string())),
        }
    }

    /// Derive the control outcome.
    ///
    /// `failure` is the reason the body did not complete (error, timeout, panic);
    /// it always wins. Otherwise: any failed assertion, then any errored assertion,
    /// then any assertion at all (passed), then manual review notes, then skip notes.
    /// A control that recorded nothing passed vacuously.
    pub fn conclude(&self, failure: Option<String>) -> Verdict {
        let recorded = self.lock();
        let mut assertions = recorded.assertions.clone();
        let total = assertions.len();

        let first_with = |status: AssertionStatus| {
            recorded.assertions.iter().filter(move |a| a.status == status)
        };
        let failed: Vec<&AssertionResult> = first_with(AssertionStatus::Failed).collect();
        let errored: Vec<&AssertionResult> = first_with(AssertionStatus::Errored).collect();
        let first_note = |kind: NoteKind| {
            recorded
                .notes
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, reason)| reason.clone())
        };

        let (outcome, message) = if let Some(reason) = failure {
            (Outcome::Errored, reason)
        } else if let Some(first) = failed.first() {
            (
                Outcome::Failed,
                format!(
                    "{} of {} assertion(s) failed; first: {}: {}",
                    failed.len(),
                    total,
                    first.description,
                    first.message
                ),
            )
        } else if let Some(first) = errored.first() {
            (
                Outcome::Errored,
                format!("{}: {}", first.description, first.message),
            )
        } else if total > 0 {
            (Outcome::Passed, format!("{} assertion(s) passed", total))
        } else if let Some(reason) = first_note(NoteKind::ManualReview) {
            (Outcome::ManualReview, reason)
        } else if let Some(reason) = first_note(NoteKind::Skip) {
            (Outcome::Skipped, reason)
        } else {
            (
                Outcome::Passed,
                String::from("nothing to check (no applicable objects)"),
            )
        };

        for (kind, reason) in &recorded.notes {
            let label = match kind {
                NoteKind::Skip => "skipped",
                NoteKind::ManualReview => "manual review required",
            };
            assertions.push(AssertionResult {
                description: reason.clone(),
                matcher: MatcherKind::Note,
                expected: String::new(),
                actual: String::new(),
                status: AssertionStatus::Skipped,
                message: label.to_string(),
                children: Vec::new(),
            });
        }

        Verdict {
            outcome,
            message,
            assertions,
        }
    }
}

/// Alternatives of a one-of group; every child result is kept
#[derive(Debug, Clone)]
pub struct OneOf {
    description: String,
    children: Vec<AssertionResult>,
}

impl OneOf {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            children: Vec::new(),
        }
    }

    pub fn check(
        mut self,
        description: impl Into<String>,
        actual: impl Into<Value>,
        expectation: Expectation,
    ) -> Self {
        self.children
            .push(assertion(description.into(), &expectation, &actual.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_assertions_is_vacuous_pass() {
        let eval = Evaluation::new("SV-000001");
        let verdict = eval.conclude(None);
        assert_eq!(verdict.outcome, Outcome::Passed);
        assert!(verdict.assertions.is_empty());
    }

    #[test]
    fn test_failed_wins_over_errored() {
        let mut eval = Evaluation::new("SV-000002");
        eval.check("version", "devel", Expectation::VersionAtLeast("16".into()));
        eval.check("method", "trust", Expectation::in_set(["cert"]));
        eval.check("ssl", "on", Expectation::BooleanTruthy(true));

        let verdict = eval.conclude(None);
        assert_eq!(verdict.outcome, Outcome::Failed);
        assert!(verdict.message.starts_with("1 of 3 assertion(s) failed"));
        assert!(verdict.message.contains("\"trust\""));
    }

    #[test]
    fn test_errored_assertion() {
        let mut eval = Evaluation::new("SV-000003");
        eval.check("count", "n/a", Expectation::NumericAtLeast(1.0));
        assert_eq!(eval.conclude(None).outcome, Outcome::Errored);
    }

    #[test]
    fn test_body_failure_keeps_partial_assertions() {
        let mut eval = Evaluation::new("SV-000004");
        eval.check("ssl", "on", Expectation::BooleanTruthy(true));

        let verdict = eval.conclude(Some("timed out after 5s".into()));
        assert_eq!(verdict.outcome, Outcome::Errored);
        assert_eq!(verdict.message, "timed out after 5s");
        assert_eq!(verdict.assertions.len(), 1);
    }

    #[test]
    fn test_notes() {
        let mut eval = Evaluation::new("SV-000005");
        eval.manual_review("Check organization documentation");
        let verdict = eval.conclude(None);
        assert_eq!(verdict.outcome, Outcome::ManualReview);
        assert_eq!(verdict.assertions[0].matcher, MatcherKind::Note);

        let mut eval = Evaluation::new("SV-000006");
        eval.skip("audit log directory not found");
        assert_eq!(eval.conclude(None).outcome, Outcome::Skipped);

        // Assertions outrank notes; the note is still reported
        let mut eval = Evaluation::new("SV-000007");
        eval.check("ssl", "on", Expectation::BooleanTruthy(true));
        eval.manual_review("Review column privileges");
        let verdict = eval.conclude(None);
        assert_eq!(verdict.outcome, Outcome::Passed);
        assert_eq!(verdict.assertions.len(), 2);
    }

    #[test]
    fn test_one_of_keeps_all_children() {
        let mut eval = Evaluation::new("SV-000008");
        let group = OneOf::new("hostssl records require client certificates")
            .check("auth method", vec!["md5"], Expectation::includes("cert"))
            .check(
                "auth params",
                vec!["clientcert=verify-full"],
                Expectation::pattern("clientcert=").unwrap(),
            );
        assert!(eval.one_of(group));

        let recorded = eval.assertions();
        assert_eq!(recorded[0].children.len(), 2);
        assert!(recorded[0].children[0].is_failed());
        assert_eq!(eval.conclude(None).outcome, Outcome::Passed);
    }

    #[test]
    fn test_one_of_all_fail() {
        let mut eval = Evaluation::new("SV-000009");
        let group = OneOf::new("either")
            .check("a", "x", Expectation::equals("y"))
            .check("b", "x", Expectation::equals("z"));
        assert!(!eval.one_of(group));
        let verdict = eval.conclude(None);
        assert_eq!(verdict.outcome, Outcome::Failed);
        assert!(verdict.message.contains("no alternative passed"));
    }

    #[test]
    fn test_handles_share_state() {
        let eval = Evaluation::new("SV-000010");
        let mut handle = eval.clone();
        handle.check("ssl", "on", Expectation::BooleanTruthy(true));
        assert_eq!(eval.assertion_count(), 1);
    }
}
