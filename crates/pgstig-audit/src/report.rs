//! Run report - per-control entries, summary statistics and JSON form

use chrono::{DateTime, Utc};
use pgstig_controls::{ControlMetadata, ControlTags, Verdict};
use pgstig_core::{AssertionResult, Outcome, ResolvedInput, Result, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Result of one control in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReport {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub impact: f32,
    #[serde(default)]
    pub tags: ControlTags,
    pub outcome: Outcome,
    /// Why the control ended the way it did
    pub message: String,
    #[serde(default)]
    pub assertions: Vec<AssertionResult>,
    /// Wall-clock time spent on the control, in milliseconds
    #[serde(default)]
    pub duration_ms: u64,
}

impl ControlReport {
    pub fn from_verdict(metadata: &ControlMetadata, verdict: Verdict, duration_ms: u64) -> Self {
        Self {
            id: metadata.id.clone(),
            title: metadata.title.clone(),
            severity: metadata.severity,
            impact: metadata.impact,
            tags: metadata.tags.clone(),
            outcome: verdict.outcome,
            message: verdict.message,
            assertions: verdict.assertions,
            duration_ms,
        }
    }

    /// Entry for a control that produced no verdict (never started, or its task died)
    pub fn errored(metadata: &ControlMetadata, message: impl Into<String>) -> Self {
        Self {
            id: metadata.id.clone(),
            title: metadata.title.clone(),
            severity: metadata.severity,
            impact: metadata.impact,
            tags: metadata.tags.clone(),
            outcome: Outcome::Errored,
            message: message.into(),
            assertions: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Outcome counts of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub manual_review: usize,
    pub skipped: usize,
    /// Failed controls per severity
    #[serde(default)]
    pub failed_by_severity: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn from_controls(controls: &[ControlReport]) -> Self {
        let mut summary = Self {
            total: controls.len(),
            ..Default::default()
        };
        for control in controls {
            match control.outcome {
                Outcome::Passed => summary.passed += 1,
                Outcome::Failed => {
                    summary.failed += 1;
                    *summary
                        .failed_by_severity
                        .entry(control.severity.as_str().to_string())
                        .or_insert(0) += 1;
                }
                Outcome::Errored => summary.errored += 1,
                Outcome::ManualReview => summary.manual_review += 1,
                Outcome::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        match outcome {
            Outcome::Passed => self.passed,
            Outcome::Failed => self.failed,
            Outcome::Errored => self.errored,
            Outcome::ManualReview => self.manual_review,
            Outcome::Skipped => self.skipped,
        }
    }
}

/// Complete record of one audit run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Target display string (never includes the password)
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Inputs in effect, with their provenance
    #[serde(default)]
    pub inputs: BTreeMap<String, ResolvedInput>,
    /// One entry per selected control, sorted by id
    pub controls: Vec<ControlReport>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn control(&self, id: &str) -> Option<&ControlReport> {
        self.controls.iter().find(|c| c.id == id)
    }

    /// No control failed or errored
    pub fn is_clean(&self) -> bool {
        !self.controls.iter().any(|c| c.outcome.is_problem())
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a report previously written with [`RunReport::to_json`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pgstig_core::{AssertionStatus, InputSource, MatcherKind, Value};

    pub(crate) fn sample_report() -> RunReport {
        let failed = ControlMetadata::new("SV-261858", "Organization authentication", 0.7)
            .with_cci(&["CCI-000015"])
            .with_label("authentication");
        let passed = ControlMetadata::new("SV-261867", "Audit time stamps", 0.5);
        let unstarted = ControlMetadata::new("SV-261956", "Logon auditing", 0.5);

        let controls = vec![
            ControlReport::from_verdict(
                &failed,
                Verdict {
                    outcome: Outcome::Failed,
                    message: "1 of 1 assertion(s) failed".into(),
                    assertions: vec![AssertionResult {
                        description: "pg_hba.conf host records use approved methods".into(),
                        matcher: MatcherKind::IsInSet,
                        expected: "[\"cert\", \"gss\"]".into(),
                        actual: "[\"trust\"]".into(),
                        status: AssertionStatus::Failed,
                        message: "\"trust\" is not in the approved set".into(),
                        children: Vec::new(),
                    }],
                },
                12,
            ),
            ControlReport::from_verdict(
                &passed,
                Verdict {
                    outcome: Outcome::Passed,
                    message: "1 assertion(s) passed".into(),
                    assertions: Vec::new(),
                },
                3,
            ),
            ControlReport::errored(&unstarted, "not started before the run deadline"),
        ];

        let mut inputs = BTreeMap::new();
        inputs.insert(
            "approved_auth_methods".to_string(),
            ResolvedInput {
                value: Value::from(vec!["cert", "gss"]),
                source: InputSource::Runtime,
                description: None,
            },
        );

        let started_at = Utc::now();
        RunReport {
            run_id: Uuid::new_v4(),
            target: "postgres@localhost:5432/postgres".into(),
            started_at,
            finished_at: started_at + chrono::Duration::milliseconds(1500),
            inputs,
            summary: RunSummary::from_controls(&controls),
            controls,
        }
    }

    #[test]
    fn test_summary_counts() {
        let report = sample_report();
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.errored, 1);
        assert_eq!(report.summary.failed_by_severity.get("high"), Some(&1));
        assert!(!report.is_clean());
        assert_eq!(report.duration_seconds(), 1.5);
    }

    #[test]
    fn test_json_round_trip_keeps_outcomes() {
        let report = sample_report();
        let parsed = RunReport::from_json(&report.to_json().unwrap()).unwrap();

        assert_eq!(parsed.run_id, report.run_id);
        for control in &report.controls {
            assert_eq!(parsed.control(&control.id).unwrap().outcome, control.outcome);
        }
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_json_shape() {
        let json = sample_report().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["controls"][0]["outcome"], "failed");
        assert_eq!(value["controls"][0]["severity"], "high");
        assert_eq!(value["controls"][0]["tags"]["cci"][0], "CCI-000015");
        assert_eq!(value["inputs"]["approved_auth_methods"]["source"], "runtime");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = sample_report();
        std::fs::write(&path, report.to_json().unwrap()).unwrap();

        assert_eq!(RunReport::from_file(&path).unwrap(), report);
    }
}
