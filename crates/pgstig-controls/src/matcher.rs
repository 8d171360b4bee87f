//! Matchers - typed expectations evaluated against actual values
//!
//! A matcher never fails the control by itself: it resolves to passed, failed or
//! errored, and the message says why. An empty actual is reported as "empty" so it
//! reads differently from a present-but-wrong value.

use pgstig_core::{AssertionStatus, Error, MatcherKind, Result, Value};
use regex::Regex;
use std::cmp::Ordering;

/// Expected side of an assertion
#[derive(Debug, Clone)]
pub enum Expectation {
    /// Case-sensitive equality
    Equals(Value),
    /// Case-insensitive equality
    EqualsCi(String),
    NotEquals(Value),
    /// Substring of text, or element of a list
    Includes(String),
    Excludes(String),
    /// Text (or every list element) matches
    MatchesPattern(Regex),
    /// Actual (or every element) is a member
    IsInSet(Vec<String>),
    /// Same members after de-duplicating and sorting both sides
    SetEqualSorted(Vec<String>),
    /// PostgreSQL boolean setting with the given truth value
    BooleanTruthy(bool),
    NumericAtLeast(f64),
    NumericEquals(f64),
    /// Dotted numeric version at least this one
    VersionAtLeast(String),
    /// Permission mode grants nothing beyond these bits
    ModeAtMost(u32),
    Empty,
    /// Empty passes; anything else must satisfy the inner expectation
    EmptyOr(Box<Expectation>),
}

impl Expectation {
    pub fn equals(value: impl Into<Value>) -> Self {
        Expectation::Equals(value.into())
    }

    pub fn not_equals(value: impl Into<Value>) -> Self {
        Expectation::NotEquals(value.into())
    }

    pub fn includes(needle: impl Into<String>) -> Self {
        Expectation::Includes(needle.into())
    }

    pub fn excludes(needle: impl Into<String>) -> Self {
        Expectation::Excludes(needle.into())
    }

    /// Compile a pattern expectation
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Expectation::MatchesPattern)
            .map_err(|e| Error::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    pub fn in_set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expectation::IsInSet(items.into_iter().map(Into::into).collect())
    }

    pub fn set_equal<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expectation::SetEqualSorted(items.into_iter().map(Into::into).collect())
    }

    pub fn empty_or(inner: Expectation) -> Self {
        Expectation::EmptyOr(Box::new(inner))
    }

    pub fn kind(&self) -> MatcherKind {
        match self {
            Expectation::Equals(_) => MatcherKind::Equals,
            Expectation::EqualsCi(_) => MatcherKind::EqualsCi,
            Expectation::NotEquals(_) => MatcherKind::NotEquals,
            Expectation::Includes(_) => MatcherKind::Includes,
            Expectation::Excludes(_) => MatcherKind::Excludes,
            Expectation::MatchesPattern(_) => MatcherKind::MatchesPattern,
            Expectation::IsInSet(_) => MatcherKind::IsInSet,
            Expectation::SetEqualSorted(_) => MatcherKind::SetEqualSorted,
            Expectation::BooleanTruthy(_) => MatcherKind::BooleanTruthy,
            Expectation::NumericAtLeast(_) => MatcherKind::NumericAtLeast,
            Expectation::NumericEquals(_) => MatcherKind::NumericEquals,
            Expectation::VersionAtLeast(_) => MatcherKind::VersionAtLeast,
            Expectation::ModeAtMost(_) => MatcherKind::ModeAtMost,
            Expectation::Empty => MatcherKind::Empty,
            Expectation::EmptyOr(_) => MatcherKind::EmptyOr,
        }
    }

    /// Expected value as shown in reports
    pub fn render(&self) -> String {
        match self {
            Expectation::Equals(v) | Expectation::NotEquals(v) => v.render(),
            Expectation::EqualsCi(s) | Expectation::Includes(s) | Expectation::Excludes(s) => {
                s.clone()
            }
            Expectation::MatchesPattern(re) => format!("/{}/", re.as_str()),
            Expectation::IsInSet(items) | Expectation::SetEqualSorted(items) => {
                format!("[{}]", items.join(", "))
            }
            Expectation::BooleanTruthy(b) => String::from(if *b { "on" } else { "off" }),
            Expectation::NumericAtLeast(n) | Expectation::NumericEquals(n) => n.to_string(),
            Expectation::VersionAtLeast(v) => v.clone(),
            Expectation::ModeAtMost(mask) => format!("{:04o}", mask),
            Expectation::Empty => String::from("empty"),
            Expectation::EmptyOr(inner) => format!("empty or {}", inner.render()),
        }
    }
}

/// Result of evaluating one expectation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub status: AssertionStatus,
    pub message: String,
}

impl MatchOutcome {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            status: AssertionStatus::Passed,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: AssertionStatus::Failed,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: AssertionStatus::Errored,
            message: message.into(),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == AssertionStatus::Passed
    }
}

/// Quoted value, or "empty"
fn show(actual: &Value) -> String {
    if actual.is_empty() {
        return String::from("empty");
    }
    match actual {
        Value::Text(s) => format!("{:?}", s),
        other => other.render(),
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::List(a), Value::List(b)) => a == b,
        (a, b) => a == b || a.render() == b.render(),
    }
}

/// Elements of the actual value a membership check applies to
fn members(actual: &Value) -> Vec<String> {
    match actual {
        Value::List(items) => items.clone(),
        other => vec![other.render()],
    }
}

fn sorted_unique(items: &[String]) -> Vec<String> {
    let mut items = items.to_vec();
    items.sort();
    items.dedup();
    items
}

fn parse_number(actual: &Value) -> Option<f64> {
    match actual {
        Value::Integer(i) => Some(*i as f64),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Leading dotted numeric version, e.g. `16.4` from `16.4 (Debian 16.4-1)`
fn parse_version(text: &str) -> Option<Vec<u64>> {
    let token = text.split_whitespace().next()?;
    token
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

fn compare_versions(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn parse_mode(actual: &Value) -> Option<u32> {
    match actual {
        Value::Integer(i) => u32::try_from(*i).ok(),
        Value::Text(s) => u32::from_str_radix(s.trim(), 8).ok(),
        _ => None,
    }
}

/// Evaluate an expectation against an actual value
pub fn evaluate(expectation: &Expectation, actual: &Value) -> MatchOutcome {
    match expectation {
        Expectation::Equals(expected) => {
            if values_equal(actual, expected) {
                MatchOutcome::pass(format!("equals {:?}", expected.render()))
            } else {
                MatchOutcome::fail(format!("expected {:?}, got {}", expected.render(), show(actual)))
            }
        }

        Expectation::EqualsCi(expected) => {
            if actual.render().to_lowercase() == expected.to_lowercase() {
                MatchOutcome::pass(format!("equals {:?} (case-insensitive)", expected))
            } else {
                MatchOutcome::fail(format!(
                    "expected {:?} (case-insensitive), got {}",
                    expected,
                    show(actual)
                ))
            }
        }

        Expectation::NotEquals(expected) => {
            if values_equal(actual, expected) {
                MatchOutcome::fail(format!("value must not be {:?}", expected.render()))
            } else {
                MatchOutcome::pass(format!("{} is not {:?}", show(actual), expected.render()))
            }
        }

        Expectation::Includes(needle) => {
            if includes(actual, needle) {
                MatchOutcome::pass(format!("{:?} is present", needle))
            } else {
                MatchOutcome::fail(format!("{:?} not found in {}", needle, show(actual)))
            }
        }

        Expectation::Excludes(needle) => {
            if includes(actual, needle) {
                MatchOutcome::fail(format!("{:?} is present in {}", needle, show(actual)))
            } else {
                MatchOutcome::pass(format!("{:?} is absent", needle))
            }
        }

        Expectation::MatchesPattern(re) => match actual {
            Value::List(items) => match items.iter().find(|item| !re.is_match(item)) {
                Some(item) => MatchOutcome::fail(format!(
                    "{:?} does not match /{}/",
                    item,
                    re.as_str()
                )),
                None => MatchOutcome::pass(format!(
                    "all {} values match /{}/",
                    items.len(),
                    re.as_str()
                )),
            },
            other => {
                if re.is_match(&other.render()) {
                    MatchOutcome::pass(format!("matches /{}/", re.as_str()))
                } else {
                    MatchOutcome::fail(format!(
                        "{} does not match /{}/",
                        show(other),
                        re.as_str()
                    ))
                }
            }
        },

        Expectation::IsInSet(set) => {
            let values = members(actual);
            match values.iter().find(|v| !set.contains(v)) {
                Some(v) if v.is_empty() => MatchOutcome::fail(format!(
                    "empty value is not in the expected set [{}]",
                    set.join(", ")
                )),
                Some(v) => MatchOutcome::fail(format!(
                    "{:?} is not in the expected set [{}]",
                    v,
                    set.join(", ")
                )),
                None => MatchOutcome::pass(format!(
                    "all {} value(s) are in the expected set",
                    values.len()
                )),
            }
        }

        Expectation::SetEqualSorted(expected) => {
            let have = sorted_unique(&actual.to_list());
            let want = sorted_unique(expected);
            if have == want {
                MatchOutcome::pass(format!("set equals [{}]", want.join(", ")))
            } else {
                let missing: Vec<&str> = want
                    .iter()
                    .filter(|w| !have.contains(w))
                    .map(|s| s.as_str())
                    .collect();
                let unexpected: Vec<&str> = have
                    .iter()
                    .filter(|h| !want.contains(h))
                    .map(|s| s.as_str())
                    .collect();
                MatchOutcome::fail(format!(
                    "sets differ: missing [{}], unexpected [{}]",
                    missing.join(", "),
                    unexpected.join(", ")
                ))
            }
        }

        Expectation::BooleanTruthy(expected) => match actual.as_bool() {
            Some(b) if b == *expected => {
                MatchOutcome::pass(format!("is {}", expectation.render()))
            }
            Some(_) => MatchOutcome::fail(format!(
                "expected {}, got {}",
                expectation.render(),
                show(actual)
            )),
            None => MatchOutcome::error(format!("{} is not a boolean", show(actual))),
        },

        Expectation::NumericAtLeast(min) => match parse_number(actual) {
            Some(n) if n >= *min => MatchOutcome::pass(format!("{} >= {}", n, min)),
            Some(n) => MatchOutcome::fail(format!("{} is less than {}", n, min)),
            None => MatchOutcome::error(format!("{} is not numeric", show(actual))),
        },

        Expectation::NumericEquals(want) => match parse_number(actual) {
            Some(n) if (n - want).abs() < f64::EPSILON => {
                MatchOutcome::pass(format!("{} == {}", n, want))
            }
            Some(n) => MatchOutcome::fail(format!("expected {}, got {}", want, n)),
            None => MatchOutcome::error(format!("{} is not numeric", show(actual))),
        },

        Expectation::VersionAtLeast(min) => {
            let Some(want) = parse_version(min) else {
                return MatchOutcome::error(format!("minimum {:?} is not a version", min));
            };
            match parse_version(&actual.render()) {
                Some(have) if compare_versions(&have, &want) != Ordering::Less => {
                    MatchOutcome::pass(format!("{} >= {}", actual.render().trim(), min))
                }
                Some(_) => MatchOutcome::fail(format!(
                    "version {} is older than {}",
                    actual.render().trim(),
                    min
                )),
                None => MatchOutcome::error(format!("{} is not a version", show(actual))),
            }
        }

        Expectation::ModeAtMost(mask) => match parse_mode(actual) {
            Some(mode) if mode & !mask == 0 => {
                MatchOutcome::pass(format!("mode {:04o} is within {:04o}", mode, mask))
            }
            Some(mode) => MatchOutcome::fail(format!(
                "mode {:04o} grants permissions beyond {:04o}",
                mode, mask
            )),
            None => MatchOutcome::error(format!("{} is not an octal mode", show(actual))),
        },

        Expectation::Empty => {
            if actual.is_empty() {
                MatchOutcome::pass("empty")
            } else {
                MatchOutcome::fail(format!("expected empty, got {}", show(actual)))
            }
        }

        Expectation::EmptyOr(inner) => {
            if actual.is_empty() {
                MatchOutcome::pass("empty")
            } else {
                evaluate(inner, actual)
            }
        }
    }
}

fn includes(actual: &Value, needle: &str) -> bool {
    match actual {
        Value::List(items) => items.iter().any(|i| i == needle),
        other => other.render().contains(needle),
    }
}
