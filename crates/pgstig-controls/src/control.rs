//! Control trait and metadata - the interface every STIG control implements

use crate::evaluation::Evaluation;
use crate::transient::TransientScope;
use async_trait::async_trait;
use pgstig_core::{Error, InputStore, Result, Severity, Target};
use pgstig_probes::{HbaFile, Probes, QueryOutcome, QueryRows};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Reads one server setting; unknown settings yield NULL rather than an error
pub const SETTING_SQL: &str = "SELECT current_setting($1, true)";

/// The trait that all controls implement
#[async_trait]
pub trait Control: Send + Sync {
    /// Get the control metadata
    fn metadata(&self) -> &ControlMetadata;

    /// Benchmark identifier (e.g., "SV-261858")
    fn id(&self) -> &str {
        &self.metadata().id
    }

    /// Decide, from inputs alone, whether the control applies to this run
    fn applicability(&self, _ctx: &ControlContext) -> Result<Applicability> {
        Ok(Applicability::Applicable)
    }

    /// Whether the control creates and drops objects on the target.
    /// Such controls never run concurrently with each other.
    fn mutates_target(&self) -> bool {
        false
    }

    /// Objects the control creates on the target. The coordinator drops them when it
    /// abandons the body, since the body's own teardown never runs then.
    fn transient_objects(&self) -> Option<TransientScope> {
        None
    }

    /// Gather facts and record assertions. An `Err` ends the control as errored;
    /// assertions recorded before it are kept.
    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()>;
}

/// Run the applicability gate and, when the control applies, its body
pub async fn execute(
    control: &dyn Control,
    ctx: &ControlContext,
    eval: &mut Evaluation,
) -> Result<Applicability> {
    let applicability = control.applicability(ctx)?;
    if applicability == Applicability::Applicable {
        control.evaluate(ctx, eval).await?;
    }
    Ok(applicability)
}

/// Result of the applicability gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applicability {
    Applicable,
    NotApplicable(String),
}

/// Benchmark cross references of a control
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlTags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stig_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cci: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nist: Vec<String>,
    /// Free-form labels used for selection (e.g., "auditing")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Metadata describing a control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMetadata {
    /// Unique identifier
    pub id: String,

    /// Human-readable title
    pub title: String,

    pub severity: Severity,

    /// Benchmark impact score (0.0 - 1.0)
    pub impact: f32,

    #[serde(default)]
    pub description: String,

    /// Manual check procedure
    #[serde(default)]
    pub check_text: String,

    /// Remediation procedure
    #[serde(default)]
    pub fix_text: String,

    #[serde(default)]
    pub tags: ControlTags,
}

impl ControlMetadata {
    /// Create new control metadata from a benchmark impact score
    pub fn new(id: impl Into<String>, title: impl Into<String>, impact: f32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            severity: Severity::from_impact(impact),
            impact,
            description: String::new(),
            check_text: String::new(),
            fix_text: String::new(),
            tags: ControlTags::default(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_check(mut self, text: impl Into<String>) -> Self {
        self.check_text = text.into();
        self
    }

    pub fn with_fix(mut self, text: impl Into<String>) -> Self {
        self.fix_text = text.into();
        self
    }

    /// Group title; the group id is derived from the control number
    pub fn with_gtitle(mut self, gtitle: impl Into<String>) -> Self {
        self.tags.gtitle = Some(gtitle.into());
        self.tags.gid = Some(self.id.replacen("SV-", "V-", 1));
        self
    }

    pub fn with_rule(mut self, rid: impl Into<String>) -> Self {
        self.tags.rid = Some(rid.into());
        self
    }

    pub fn with_stig_id(mut self, stig_id: impl Into<String>) -> Self {
        self.tags.stig_id = Some(stig_id.into());
        self
    }

    pub fn with_fix_id(mut self, fix_id: impl Into<String>) -> Self {
        self.tags.fix_id = Some(fix_id.into());
        self
    }

    pub fn with_cci(mut self, cci: &[&str]) -> Self {
        self.tags.cci.extend(cci.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_nist(mut self, nist: &[&str]) -> Self {
        self.tags.nist.extend(nist.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.tags.labels.push(label.into());
        self
    }

    /// Whether a selection tag names this control (label, STIG id or group id)
    pub fn has_tag(&self, tag: &str) -> bool {
        let matches = |value: &Option<String>| {
            value
                .as_deref()
                .map(|v| v.eq_ignore_ascii_case(tag))
                .unwrap_or(false)
        };
        self.tags.labels.iter().any(|l| l.eq_ignore_ascii_case(tag))
            || matches(&self.tags.stig_id)
            || matches(&self.tags.gid)
            || self.tags.cci.iter().any(|c| c.eq_ignore_ascii_case(tag))
    }
}

/// Context passed to controls during evaluation
#[derive(Clone)]
pub struct ControlContext {
    pub target: Target,
    pub inputs: Arc<InputStore>,
    pub probes: Probes,
}

impl ControlContext {
    pub fn new(target: Target, inputs: Arc<InputStore>, probes: Probes) -> Self {
        Self {
            target,
            inputs,
            probes,
        }
    }

    /// Database used for cluster-wide queries (`pg_db` input, else the target's)
    pub fn maintenance_db(&self) -> String {
        match self.inputs.string("pg_db") {
            Ok(db) if !db.is_empty() => db,
            _ => self.target.database.clone(),
        }
    }

    /// Query a database, passing through the unavailable-database outcome
    pub async fn query_in(
        &self,
        database: &str,
        statement: &str,
        params: &[&str],
    ) -> Result<QueryOutcome> {
        self.probes.sql.query(database, statement, params).await
    }

    /// Query the maintenance database; it must accept connections
    pub async fn query(&self, statement: &str, params: &[&str]) -> Result<QueryRows> {
        let database = self.maintenance_db();
        match self.query_in(&database, statement, params).await? {
            QueryOutcome::Rows(rows) => Ok(rows),
            QueryOutcome::Unavailable { message, .. } => Err(Error::ProbeConnection {
                target: format!("{}/{}", self.target.host, database),
                message,
            }),
        }
    }

    /// Current value of a server setting; empty when the setting is unknown
    pub async fn setting(&self, name: &str) -> Result<String> {
        let rows = self.query(SETTING_SQL, &[name]).await?;
        Ok(rows.first_value().unwrap_or_default().to_string())
    }

    /// Parse pg_hba.conf at the `pg_hba_conf_file` input path
    pub async fn hba(&self) -> Result<HbaFile> {
        let path = self.inputs.string("pg_hba_conf_file")?;
        self.probes.hba.parse(&path).await
    }
}

impl std::fmt::Debug for ControlContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlContext")
            .field("target", &self.target)
            .field("inputs", &self.inputs.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgstig_probes::fake::{FakeCommands, FakeFiles, FakeSql};

    fn context(sql: FakeSql) -> ControlContext {
        let mut inputs = InputStore::new();
        inputs.set_override("pg_db", "app");
        ControlContext::new(
            Target::default(),
            Arc::new(inputs),
            Probes::new(
                Arc::new(sql),
                Arc::new(FakeFiles::new()),
                Arc::new(FakeCommands::new()),
            ),
        )
    }

    #[test]
    fn test_metadata_builder() {
        let meta = ControlMetadata::new("SV-261858", "Integrated authentication", 0.7)
            .with_gtitle("SRG-APP-000023-DB-000001")
            .with_stig_id("CD16-00-000200")
            .with_cci(&["CCI-000015"])
            .with_label("authentication");

        assert_eq!(meta.severity, Severity::High);
        assert_eq!(meta.tags.gid.as_deref(), Some("V-261858"));
        assert!(meta.has_tag("authentication"));
        assert!(meta.has_tag("cd16-00-000200"));
        assert!(meta.has_tag("V-261858"));
        assert!(!meta.has_tag("auditing"));
    }

    #[tokio::test]
    async fn test_setting_reads_maintenance_db() {
        let sql = FakeSql::new().with_rows_in(
            "app",
            SETTING_SQL,
            QueryRows::scalar("current_setting", "on"),
        );
        let ctx = context(sql);
        assert_eq!(ctx.maintenance_db(), "app");
        assert_eq!(ctx.setting("ssl").await.unwrap(), "on");
    }

    #[tokio::test]
    async fn test_unknown_setting_is_empty() {
        let sql = FakeSql::new().with_rows(
            SETTING_SQL,
            QueryRows::new(vec!["current_setting".into()], vec![vec![String::new()]]),
        );
        assert_eq!(context(sql).setting("pgaudit.log").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_unavailable_maintenance_db_is_connection_error() {
        let ctx = context(FakeSql::new().with_unavailable("app"));
        let err = ctx.query("SELECT 1", &[]).await.unwrap_err();
        assert!(err.is_connection());
    }
}
