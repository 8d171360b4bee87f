//! pgstig Audit - runs controls against a target and reports the results
//!
//! This crate provides:
//! - `Auditor`: Evaluates selected controls with per-control isolation and timeouts
//! - `RunReport`: Per-control outcomes, assertion detail and summary counts
//! - `render`: Text and JSON report output

pub mod auditor;
pub mod render;
pub mod report;

pub use auditor::{AuditOptions, Auditor};
pub use render::{render, write_report, ReportFormat, TextReport};
pub use report::{ControlReport, RunReport, RunSummary};
