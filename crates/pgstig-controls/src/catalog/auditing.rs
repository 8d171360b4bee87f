//! Auditing controls
//!
//! Logging settings, protection of the log files, and controls that provoke an
//! auditable event and then look for its record in the pgaudit output.

use super::{audit_log_dir, grep_logs, ROLES_SQL};
use crate::control::{Control, ControlContext, ControlMetadata};
use crate::evaluation::Evaluation;
use crate::matcher::Expectation;
use crate::transient::TransientScope;
use async_trait::async_trait;
use pgstig_core::Result;
use pgstig_probes::ScriptOutcome;
use std::sync::Arc;

pub fn controls() -> Vec<Arc<dyn Control>> {
    vec![
        Arc::new(PrivilegeRetrievalAuditing::new()),
        Arc::new(PrivilegeRetrievalFailureAuditing::new()),
        Arc::new(SessionAuditingAtStartup::new()),
        Arc::new(AuditEventTypes::new()),
        Arc::new(AuditTimestamps::new()),
        Arc::new(AuditEventLocations::new()),
        Arc::new(AuditEventSources::new()),
        Arc::new(AuditReadProtection::new()),
        Arc::new(AuditModificationProtection::new()),
        Arc::new(UtcTimestamps::new()),
        Arc::new(SecurityObjectFailureAuditing::new()),
        Arc::new(LogonAuditing::new()),
        Arc::new(ObjectAccessFailureAuditing::new()),
        Arc::new(ObjectAccessAuditing::new()),
    ]
}

/// Metadata shared by every audit record control
fn audit_metadata(
    id: &str,
    title: &str,
    gtitle: &str,
    rule: &str,
    stig_id: &str,
    fix: &str,
) -> ControlMetadata {
    ControlMetadata::new(id, title, 0.5)
        .with_gtitle(gtitle)
        .with_rule(rule)
        .with_stig_id(stig_id)
        .with_fix_id(fix)
        .with_label("auditing")
}

fn fooaudit_scope() -> TransientScope {
    TransientScope::new().role("fooaudit")
}

fn permdenied_scope() -> TransientScope {
    TransientScope::new()
        .role("permdeniedtest")
        .schema("permdeniedschema")
        .cleanup("DROP TABLE IF EXISTS permdeniedschema.usertable")
}

fn object_access_scope() -> TransientScope {
    TransientScope::new()
        .schema("test_schema")
        .table("test_schema.test_table", "id INT")
        .statement("INSERT INTO test_schema.test_table(id) VALUES (0)")
        .role("bob")
}

/// Create `scope`, run `statements` in the maintenance database, drop `scope`
async fn provoke(
    ctx: &ControlContext,
    scope: &TransientScope,
    statements: &[&str],
) -> Result<ScriptOutcome> {
    let database = ctx.maintenance_db();
    let sql = ctx.probes.sql.clone();
    scope
        .run(sql.as_ref(), &database, async {
            sql.script(&database, statements).await
        })
        .await
}

/// log_line_prefix escapes every audit record needs: time, user, database, session start
const PREFIX_ESCAPES: [&str; 4] = ["%m", "%u", "%d", "%s"];

async fn check_prefix_escapes(ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
    let prefix = ctx.setting("log_line_prefix").await?;
    for escape in PREFIX_ESCAPES {
        eval.check(
            format!("log_line_prefix contains {}", escape),
            prefix.as_str(),
            Expectation::includes(escape),
        );
    }
    Ok(())
}

async fn check_pgaudit_loaded(ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
    eval.check(
        "shared_preload_libraries loads pgaudit",
        ctx.setting("shared_preload_libraries").await?,
        Expectation::includes("pgaudit"),
    );
    Ok(())
}

/// Regular files under `dir` must grant nothing beyond owner read/write
async fn check_log_file_modes(
    ctx: &ControlContext,
    eval: &mut Evaluation,
    dir: &str,
) -> Result<()> {
    for path in ctx.probes.files.list_files(dir).await? {
        let stat = ctx.probes.files.stat(&path).await?;
        eval.check(
            format!("{} is readable only by its owner", path),
            stat.mode_octal(),
            Expectation::ModeAtMost(0o600),
        );
    }
    Ok(())
}

pub struct PrivilegeRetrievalAuditing {
    metadata: ControlMetadata,
}

impl PrivilegeRetrievalAuditing {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261863",
                "PostgreSQL must be able to generate audit records when privileges/permissions \
                 are retrieved.",
                "SRG-APP-000091-DB-000066",
                "SV-261863r1000954_rule",
                "CD16-00-000700",
                "F-65625r1000954_fix",
            )
            .with_description(
                "Under some circumstances, it may be useful to monitor who/what is reading \
                 privilege/permission/role information. PostgreSQL must be able to generate \
                 audit records when this occurs.",
            )
            .with_check(
                "pgaudit must be loaded through shared_preload_libraries. List the roles as a \
                 superuser and verify the audit log records the query.",
            )
            .with_fix("Install pgaudit and add it to shared_preload_libraries.")
            .with_cci(&["CCI-000172"])
            .with_nist(&["AU-12 c"]),
        }
    }
}

#[async_trait]
impl Control for PrivilegeRetrievalAuditing {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        check_pgaudit_loaded(ctx, eval).await?;

        let Some(dir) = audit_log_dir(ctx, eval).await? else {
            return Ok(());
        };
        ctx.query(ROLES_SQL, &[]).await?;
        eval.check(
            "audit log records the role listing",
            grep_logs(ctx, &dir, "AUDIT").await?,
            Expectation::pattern(r"pg_catalog\.pg_roles")?,
        );
        Ok(())
    }
}

pub struct PrivilegeRetrievalFailureAuditing {
    metadata: ControlMetadata,
}

impl PrivilegeRetrievalFailureAuditing {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261864",
                "PostgreSQL must be able to generate audit records when unsuccessful attempts to \
                 retrieve privileges/permissions occur.",
                "SRG-APP-000091-DB-000325",
                "SV-261864r1000597_rule",
                "CD16-00-000800",
                "F-65626r1000596_fix",
            )
            .with_description(
                "Unsuccessful attempts to read privilege information may indicate an attacker \
                 probing the system. PostgreSQL must record them.",
            )
            .with_check(
                "As an unprivileged role, select from pg_authid and verify the audit log \
                 records the permission denied error.",
            )
            .with_fix("Configure pgaudit and log_line_prefix so denied reads are logged.")
            .with_cci(&["CCI-000172"])
            .with_nist(&["AU-12 c"]),
        }
    }
}

#[async_trait]
impl Control for PrivilegeRetrievalFailureAuditing {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    fn mutates_target(&self) -> bool {
        true
    }

    fn transient_objects(&self) -> Option<TransientScope> {
        Some(fooaudit_scope())
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let Some(dir) = audit_log_dir(ctx, eval).await? else {
            return Ok(());
        };

        let outcome = provoke(
            ctx,
            &fooaudit_scope(),
            &["SET ROLE fooaudit", "SELECT * FROM pg_authid", "RESET ROLE"],
        )
        .await?;
        eval.check(
            "reading pg_authid as an unprivileged role is denied",
            outcome.error_text(),
            Expectation::includes("permission denied"),
        );

        eval.check(
            "audit log records the denied pg_authid read",
            grep_logs(ctx, &dir, "permission denied for table").await?,
            Expectation::includes("pg_authid"),
        );
        Ok(())
    }
}

pub struct SessionAuditingAtStartup {
    metadata: ControlMetadata,
}

impl SessionAuditingAtStartup {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261865",
                "PostgreSQL must initiate session auditing upon startup.",
                "SRG-APP-000092-DB-000208",
                "SV-261865r1000600_rule",
                "CD16-00-000900",
                "F-65627r1000599_fix",
            )
            .with_description(
                "Session auditing is for use when a user's activities are under investigation. \
                 To be sure of capturing all activity during those periods, it needs to be in \
                 operation for the whole time PostgreSQL is running.",
            )
            .with_check(
                "shared_preload_libraries must contain pgaudit and log_destination must \
                 contain stderr or syslog.",
            )
            .with_fix("Load pgaudit at startup and log to stderr or syslog.")
            .with_cci(&["CCI-001464"])
            .with_nist(&["AU-14 (1)"]),
        }
    }
}

#[async_trait]
impl Control for SessionAuditingAtStartup {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        check_pgaudit_loaded(ctx, eval).await?;
        eval.check(
            "log_destination includes stderr or syslog",
            ctx.setting("log_destination").await?,
            Expectation::pattern("(?i)stderr|syslog")?,
        );
        Ok(())
    }
}

pub struct AuditEventTypes {
    metadata: ControlMetadata,
}

impl AuditEventTypes {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261866",
                "PostgreSQL must produce audit records containing sufficient information to \
                 establish what type of events occurred.",
                "SRG-APP-000095-DB-000039",
                "SV-261866r1000603_rule",
                "CD16-00-001000",
                "F-65628r1000602_fix",
            )
            .with_check(
                "log_line_prefix must contain %m %u %d %s, and log_connections and \
                 log_disconnections must be on.",
            )
            .with_fix(
                "Set log_connections and log_disconnections on, extend log_line_prefix, and \
                 reload the server.",
            )
            .with_cci(&["CCI-000130"])
            .with_nist(&["AU-3", "AU-3 a"]),
        }
    }
}

#[async_trait]
impl Control for AuditEventTypes {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        check_prefix_escapes(ctx, eval).await?;
        for setting in ["log_connections", "log_disconnections"] {
            eval.check(
                format!("{} is on", setting),
                ctx.setting(setting).await?,
                Expectation::BooleanTruthy(true),
            );
        }
        Ok(())
    }
}

pub struct AuditTimestamps {
    metadata: ControlMetadata,
}

impl AuditTimestamps {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261867",
                "PostgreSQL must produce audit records containing time stamps to establish when \
                 the events occurred.",
                "SRG-APP-000096-DB-000040",
                "SV-261867r1000955_rule",
                "CD16-00-001100",
                "F-65629r1000605_fix",
            )
            .with_check("log_line_prefix must contain %m.")
            .with_fix("Add %m to log_line_prefix and reload the server.")
            .with_cci(&["CCI-000131"])
            .with_nist(&["AU-3", "AU-3 b"]),
        }
    }
}

#[async_trait]
impl Control for AuditTimestamps {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        eval.check(
            "log_line_prefix records a millisecond time stamp",
            ctx.setting("log_line_prefix").await?,
            Expectation::includes("%m"),
        );
        Ok(())
    }
}

pub struct AuditEventLocations {
    metadata: ControlMetadata,
}

impl AuditEventLocations {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261868",
                "PostgreSQL must produce audit records containing sufficient information to \
                 establish where the events occurred.",
                "SRG-APP-000097-DB-000041",
                "SV-261868r1000609_rule",
                "CD16-00-001200",
                "F-65630r1000608_fix",
            )
            .with_description(
                "Associating information about where the event occurred within the \
                 application provides a means of investigating an attack.",
            )
            .with_check("log_line_prefix must contain %m %u %d %s.")
            .with_fix("Extend log_line_prefix and reload the server.")
            .with_cci(&["CCI-000132"])
            .with_nist(&["AU-3", "AU-3 c"]),
        }
    }
}

#[async_trait]
impl Control for AuditEventLocations {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        check_prefix_escapes(ctx, eval).await
    }
}

pub struct AuditEventSources {
    metadata: ControlMetadata,
}

impl AuditEventSources {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261869",
                "PostgreSQL must produce audit records containing sufficient information to \
                 establish the sources (origins) of the events.",
                "SRG-APP-000098-DB-000042",
                "SV-261869r1000956_rule",
                "CD16-00-001300",
                "F-65631r1000611_fix",
            )
            .with_check("log_line_prefix must contain %m %u %d %s and log_hostname must be on.")
            .with_fix("Extend log_line_prefix, set log_hostname on, and reload the server.")
            .with_cci(&["CCI-000133"])
            .with_nist(&["AU-3", "AU-3 d"]),
        }
    }
}

#[async_trait]
impl Control for AuditEventSources {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        check_prefix_escapes(ctx, eval).await?;
        eval.check(
            "log_hostname is on",
            ctx.setting("log_hostname").await?,
            Expectation::BooleanTruthy(true),
        );
        Ok(())
    }
}

pub struct ObjectAccessAuditing {
    metadata: ControlMetadata,
}

impl ObjectAccessAuditing {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261962",
                "PostgreSQL must be able to generate audit records when successful accesses \
                 to objects occur.",
                "SRG-APP-000507-DB-000356",
                "SV-261962r1000891_rule",
                "CD16-00-011800",
                "F-65724r1000890_fix",
            )
            .with_check(
                "shared_preload_libraries must contain pgaudit and pgaudit.log must include \
                 read and write.",
            )
            .with_fix("Set pgaudit.log = 'read, write' and reload the server.")
            .with_cci(&["CCI-000172"])
            .with_nist(&["AU-12 c"]),
        }
    }
}

#[async_trait]
impl Control for ObjectAccessAuditing {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        check_pgaudit_loaded(ctx, eval).await?;
        let classes = ctx.setting("pgaudit.log").await?;
        for class in ["read", "write"] {
            eval.check(
                format!("pgaudit.log includes {}", class),
                classes.as_str(),
                Expectation::includes(class),
            );
        }
        Ok(())
    }
}

pub struct AuditReadProtection {
    metadata: ControlMetadata,
}

impl AuditReadProtection {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261875",
                "The audit information produced by PostgreSQL must be protected from \
                 unauthorized read access.",
                "SRG-APP-000118-DB-000059",
                "SV-261875r1000630_rule",
                "CD16-00-002000",
                "F-65637r1000629_fix",
            )
            .with_description(
                "If audit data were to become compromised, then competent forensic analysis \
                 and discovery of the true source of potentially malicious system activity is \
                 difficult, if not impossible, to achieve.",
            )
            .with_check(
                "log_file_mode must be 0600 and audit log files must not be readable by others.",
            )
            .with_fix("Set log_file_mode = 0600 and correct the mode of existing log files.")
            .with_cci(&["CCI-000162"])
            .with_nist(&["AU-9", "AU-9 a"]),
        }
    }
}

#[async_trait]
impl Control for AuditReadProtection {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        eval.check(
            "log_file_mode is 0600",
            ctx.setting("log_file_mode").await?,
            Expectation::equals("0600"),
        );
        if let Some(dir) = audit_log_dir(ctx, eval).await? {
            check_log_file_modes(ctx, eval, &dir).await?;
        }
        Ok(())
    }
}

pub struct AuditModificationProtection {
    metadata: ControlMetadata,
}

impl AuditModificationProtection {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261876",
                "The audit information produced by PostgreSQL must be protected from \
                 unauthorized modification.",
                "SRG-APP-000119-DB-000060",
                "SV-261876r1000978_rule",
                "CD16-00-002100",
                "F-65638r1000632_fix",
            )
            .with_check(
                "log_file_mode must be 0600 with the logging collector on. The log directory \
                 must be owned by the installation owner with mode 0700.",
            )
            .with_fix("Correct log_file_mode, logging_collector and the log directory modes.")
            .with_cci(&["CCI-000163"])
            .with_nist(&["AU-9", "AU-9 a"]),
        }
    }
}

#[async_trait]
impl Control for AuditModificationProtection {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let owner = ctx.inputs.string("pg_owner")?;
        let group = ctx.inputs.string("pg_group")?;
        let log_dir = ctx.inputs.string("pg_log_dir")?;

        eval.check(
            "log_file_mode is 0600",
            ctx.setting("log_file_mode").await?,
            Expectation::equals("0600"),
        );
        eval.check(
            "logging_collector is on",
            ctx.setting("logging_collector").await?,
            Expectation::BooleanTruthy(true),
        );

        let stat = ctx.probes.files.stat(&log_dir).await?;
        eval.check(
            format!("{} is a directory", log_dir),
            stat.is_directory(),
            Expectation::equals(true),
        );
        if !stat.is_directory() {
            return Ok(());
        }
        eval.check(
            format!("{} is owned by {}", log_dir, owner),
            stat.owner.as_str(),
            Expectation::equals(owner.as_str()),
        );
        eval.check(
            format!("{} is grouped into {}", log_dir, group),
            stat.group.as_str(),
            Expectation::equals(group.as_str()),
        );
        eval.check(
            format!("{} is accessible only by its owner", log_dir),
            stat.mode_octal(),
            Expectation::ModeAtMost(0o700),
        );
        check_log_file_modes(ctx, eval, &log_dir).await
    }
}

pub struct UtcTimestamps {
    metadata: ControlMetadata,
}

impl UtcTimestamps {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261921",
                "PostgreSQL must record time stamps in audit records and application data that \
                 can be mapped to Coordinated Universal Time (UTC), formerly Greenwich Mean \
                 Time (GMT).",
                "SRG-APP-000374-DB-000322",
                "SV-261921r1000994_rule",
                "CD16-00-007500",
                "F-65683r1000767_fix",
            )
            .with_check("log_timezone must be the organization's time zone (pg_timezone).")
            .with_fix("Set log_timezone in postgresql.conf and reload the server.")
            .with_cci(&["CCI-001890"])
            .with_nist(&["AU-8 b"]),
        }
    }
}

#[async_trait]
impl Control for UtcTimestamps {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let timezone = ctx.inputs.string("pg_timezone")?;
        eval.check(
            format!("log_timezone is {}", timezone),
            ctx.setting("log_timezone").await?,
            Expectation::equals(timezone),
        );
        Ok(())
    }
}

pub struct SecurityObjectFailureAuditing {
    metadata: ControlMetadata,
}

impl SecurityObjectFailureAuditing {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261939",
                "PostgreSQL must generate audit records when unsuccessful attempts to access \
                 security objects occur.",
                "SRG-APP-000492-DB-000333",
                "SV-261939r1000822_rule",
                "CD16-00-009500",
                "F-65701r1000821_fix",
            )
            .with_check(
                "As an unprivileged role, create a table in a schema the role cannot use and \
                 verify the audit log records the permission denied error.",
            )
            .with_fix("Configure pgaudit so denied statements are logged.")
            .with_cci(&["CCI-000172"])
            .with_nist(&["AU-12 c"]),
        }
    }
}

#[async_trait]
impl Control for SecurityObjectFailureAuditing {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    fn mutates_target(&self) -> bool {
        true
    }

    fn transient_objects(&self) -> Option<TransientScope> {
        Some(permdenied_scope())
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let Some(dir) = audit_log_dir(ctx, eval).await? else {
            return Ok(());
        };

        let outcome = provoke(
            ctx,
            &permdenied_scope(),
            &[
                "SET ROLE permdeniedtest",
                "CREATE TABLE permdeniedschema.usertable(index int)",
                "RESET ROLE",
            ],
        )
        .await?;
        eval.check(
            "creating a table in permdeniedschema as permdeniedtest is denied",
            outcome.error_text(),
            Expectation::includes("permission denied for schema permdeniedschema"),
        );

        eval.check(
            "audit log records the denied table creation",
            grep_logs(ctx, &dir, "permission denied for schema").await?,
            Expectation::includes("permission denied for schema permdeniedschema"),
        );
        Ok(())
    }
}

pub struct LogonAuditing {
    metadata: ControlMetadata,
}

impl LogonAuditing {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261956",
                "PostgreSQL must generate audit records when successful logons or connections \
                 occur.",
                "SRG-APP-000503-DB-000350",
                "SV-261956r1000975_rule",
                "CD16-00-011200",
                "F-65718r1000872_fix",
            )
            .with_check(
                "log_connections must be on and the log must show connection authorized \
                 entries for the connecting user.",
            )
            .with_fix("Set log_connections = on and reload the server.")
            .with_cci(&["CCI-000172"])
            .with_nist(&["AU-12 c"]),
        }
    }
}

#[async_trait]
impl Control for LogonAuditing {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let Some(dir) = audit_log_dir(ctx, eval).await? else {
            return Ok(());
        };
        eval.check(
            "log_connections is on",
            ctx.setting("log_connections").await?,
            Expectation::BooleanTruthy(true),
        );
        let user = &ctx.target.user;
        eval.check(
            format!("audit log records connections of {}", user),
            grep_logs(ctx, &dir, "connection authorized").await?,
            Expectation::pattern(&format!(r"user={}\b", regex::escape(user)))?,
        );
        Ok(())
    }
}

/// Statements run as `bob` against objects it holds no privilege on, with the error
/// each must raise
const OBJECT_ACCESS_PROBES: [(&str, &str); 5] = [
    (
        "SELECT * FROM test_schema.test_table",
        "permission denied for schema test_schema",
    ),
    (
        "INSERT INTO test_schema.test_table VALUES (0)",
        "permission denied for schema test_schema",
    ),
    (
        "UPDATE test_schema.test_table SET id = 1 WHERE id = 0",
        "permission denied for schema test_schema",
    ),
    (
        "DROP TABLE test_schema.test_table",
        "permission denied for schema test_schema",
    ),
    ("DROP SCHEMA test_schema", "must be owner of schema test_schema"),
];

pub struct ObjectAccessFailureAuditing {
    metadata: ControlMetadata,
}

impl ObjectAccessFailureAuditing {
    pub fn new() -> Self {
        Self {
            metadata: audit_metadata(
                "SV-261963",
                "PostgreSQL must generate audit records when unsuccessful accesses to objects \
                 occur.",
                "SRG-APP-000507-DB-000357",
                "SV-261963r1000894_rule",
                "CD16-00-011900",
                "F-65725r1000893_fix",
            )
            .with_description(
                "Without tracking all or selected types of access to all or selected objects \
                 (tables, views, procedures, functions, etc.), it would be difficult to \
                 establish, correlate, and investigate the events relating to an incident.",
            )
            .with_check(
                "As a role without privileges, select, insert, update and drop a table in a \
                 test schema, then drop the schema. Every statement must be denied and the \
                 denials must appear in the audit log.",
            )
            .with_fix("Configure pgaudit so denied statements are logged.")
            .with_cci(&["CCI-000172"])
            .with_nist(&["AU-12 c"]),
        }
    }
}

#[async_trait]
impl Control for ObjectAccessFailureAuditing {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    fn mutates_target(&self) -> bool {
        true
    }

    fn transient_objects(&self) -> Option<TransientScope> {
        Some(object_access_scope())
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let Some(dir) = audit_log_dir(ctx, eval).await? else {
            return Ok(());
        };

        let mut statements = vec!["SET ROLE bob"];
        statements.extend(OBJECT_ACCESS_PROBES.iter().map(|(stmt, _)| *stmt));
        statements.push("RESET ROLE");
        let outcome = provoke(ctx, &object_access_scope(), &statements).await?;

        // Result 0 is SET ROLE
        for (index, (stmt, denial)) in OBJECT_ACCESS_PROBES.iter().enumerate() {
            let error = outcome
                .statements
                .get(index + 1)
                .and_then(|r| r.error())
                .unwrap_or_default();
            eval.check(
                format!("{} as bob is denied", stmt),
                error,
                Expectation::includes(*denial),
            );
        }

        let schema_denials = grep_logs(ctx, &dir, "permission denied for schema test_schema").await?;
        eval.check(
            "audit log records the denied accesses",
            schema_denials,
            Expectation::includes("permission denied for schema test_schema"),
        );
        let owner_denials = grep_logs(ctx, &dir, "must be owner of schema test_schema").await?;
        eval.check(
            "audit log records the denied schema drop",
            owner_denials,
            Expectation::includes("must be owner of schema test_schema"),
        );
        Ok(())
    }
}
