//! Report rendering: JSON for machines, grouped text for the console

use crate::report::{ControlReport, RunReport};
use pgstig_core::{AssertionResult, AssertionStatus, Outcome, Result};
use std::fmt;
use std::path::Path;
use tracing::info;

/// Output format of a rendered report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format: {}", other)),
        }
    }
}

pub fn render(report: &RunReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(TextReport(report).to_string()),
        ReportFormat::Json => report.to_json(),
    }
}

/// Render `report` and write it to `path`
pub fn write_report(
    report: &RunReport,
    format: ReportFormat,
    path: impl AsRef<Path>,
) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, render(report, format)?)?;
    info!(path = %path.display(), "Wrote report");
    Ok(())
}

/// Console rendering: controls grouped by outcome, problems first
pub struct TextReport<'a>(pub &'a RunReport);

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        writeln!(f, "pgstig run {}", report.run_id)?;
        writeln!(f, "Target:   {}", report.target)?;
        writeln!(
            f,
            "Started:  {} ({:.1}s)",
            report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            report.duration_seconds()
        )?;

        for outcome in Outcome::all() {
            let group: Vec<&ControlReport> = report
                .controls
                .iter()
                .filter(|c| c.outcome == outcome)
                .collect();
            if group.is_empty() {
                continue;
            }

            writeln!(f)?;
            writeln!(f, "{} ({})", heading(outcome), group.len())?;
            for control in group {
                writeln!(
                    f,
                    "  [{}] {} {}",
                    control.severity.category(),
                    control.id,
                    control.title
                )?;
                if outcome != Outcome::Passed {
                    writeln!(f, "      {}", control.message)?;
                }
                if outcome.is_problem() {
                    for assertion in &control.assertions {
                        write_assertion(f, assertion, 3)?;
                    }
                }
            }
        }

        let summary = &report.summary;
        writeln!(f)?;
        writeln!(
            f,
            "{} controls: {} passed, {} failed, {} errored, {} manual review, {} skipped",
            summary.total,
            summary.passed,
            summary.failed,
            summary.errored,
            summary.manual_review,
            summary.skipped
        )
    }
}

fn heading(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Failed => "FAILED",
        Outcome::Errored => "ERRORED",
        Outcome::ManualReview => "MANUAL REVIEW",
        Outcome::Skipped => "SKIPPED",
        Outcome::Passed => "PASSED",
    }
}

fn write_assertion(
    f: &mut fmt::Formatter<'_>,
    assertion: &AssertionResult,
    depth: usize,
) -> fmt::Result {
    let indent = "  ".repeat(depth);
    let mark = match assertion.status {
        AssertionStatus::Passed => "ok  ",
        AssertionStatus::Failed => "FAIL",
        AssertionStatus::Errored => "ERR ",
        AssertionStatus::Skipped => "--  ",
    };
    writeln!(f, "{}{} {}", indent, mark, assertion.description)?;
    if assertion.status != AssertionStatus::Passed && !assertion.message.is_empty() {
        writeln!(f, "{}     {}", indent, assertion.message)?;
    }
    for child in &assertion.children {
        write_assertion(f, child, depth + 1)?;
    }
    Ok(())
}
