//! Terminal states for controls and assertions, and the evidence they carry

use serde::{Deserialize, Serialize};

/// Terminal status of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every assertion held (or there was nothing to assert)
    Passed,
    /// At least one assertion did not hold
    Failed,
    /// The control did not apply to this target
    Skipped,
    /// The requirement cannot be automated and needs a human reviewer
    ManualReview,
    /// The control could not be evaluated
    Errored,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
            Outcome::ManualReview => "manual_review",
            Outcome::Errored => "errored",
        }
    }

    /// Outcomes that make the run unsuccessful
    pub fn is_problem(&self) -> bool {
        matches!(self, Outcome::Failed | Outcome::Errored)
    }

    /// All outcomes, in report order
    pub fn all() -> [Outcome; 5] {
        [
            Outcome::Failed,
            Outcome::Errored,
            Outcome::ManualReview,
            Outcome::Skipped,
            Outcome::Passed,
        ]
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolved status of a single assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionStatus {
    Passed,
    Failed,
    /// The comparison itself could not be made (e.g. non-numeric actual)
    Errored,
    /// Deliberately not evaluated; the message says why
    Skipped,
}

impl AssertionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssertionStatus::Passed => "passed",
            AssertionStatus::Failed => "failed",
            AssertionStatus::Errored => "errored",
            AssertionStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for AssertionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of comparison an assertion performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    Equals,
    EqualsCi,
    NotEquals,
    Includes,
    Excludes,
    MatchesPattern,
    IsInSet,
    SetEqualSorted,
    OneOf,
    BooleanTruthy,
    NumericAtLeast,
    NumericEquals,
    VersionAtLeast,
    ModeAtMost,
    Empty,
    EmptyOr,
    /// Not a comparison: a recorded skip or manual review note
    Note,
}

impl MatcherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatcherKind::Equals => "equals",
            MatcherKind::EqualsCi => "equals_ci",
            MatcherKind::NotEquals => "not_equals",
            MatcherKind::Includes => "includes",
            MatcherKind::Excludes => "excludes",
            MatcherKind::MatchesPattern => "matches_pattern",
            MatcherKind::IsInSet => "is_in_set",
            MatcherKind::SetEqualSorted => "set_equal_sorted",
            MatcherKind::OneOf => "one_of",
            MatcherKind::BooleanTruthy => "boolean_truthy",
            MatcherKind::NumericAtLeast => "numeric_at_least",
            MatcherKind::NumericEquals => "numeric_equals",
            MatcherKind::VersionAtLeast => "version_at_least",
            MatcherKind::ModeAtMost => "mode_at_most",
            MatcherKind::Empty => "empty",
            MatcherKind::EmptyOr => "empty_or",
            MatcherKind::Note => "note",
        }
    }
}

impl std::fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Evidence for one evaluated assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    /// What was checked, in words
    pub description: String,
    /// Comparison performed
    pub matcher: MatcherKind,
    /// Rendered expected value
    pub expected: String,
    /// Rendered actual value
    pub actual: String,
    /// Resolved status
    pub status: AssertionStatus,
    /// Pass/fail explanation
    pub message: String,
    /// Sub-assertions of a one-of group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AssertionResult>,
}

impl AssertionResult {
    pub fn is_passed(&self) -> bool {
        self.status == AssertionStatus::Passed
    }

    pub fn is_failed(&self) -> bool {
        self.status == AssertionStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::ManualReview).unwrap();
        assert_eq!(json, "\"manual_review\"");
        let back: Outcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Outcome::ManualReview);
    }

    #[test]
    fn test_problem_outcomes() {
        assert!(Outcome::Failed.is_problem());
        assert!(Outcome::Errored.is_problem());
        assert!(!Outcome::ManualReview.is_problem());
        assert!(!Outcome::Skipped.is_problem());
    }
}
