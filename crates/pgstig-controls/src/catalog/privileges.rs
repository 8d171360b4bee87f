//! Privilege controls: superuser grants, ACLs, security definer functions

use super::authentication::check_hba_access;
use super::{acl_expectation, check_superusers, DATABASES_SQL};
use crate::control::{Applicability, Control, ControlContext, ControlMetadata};
use crate::evaluation::Evaluation;
use crate::matcher::Expectation;
use async_trait::async_trait;
use pgstig_core::Result;
use pgstig_probes::{QueryOutcome, QueryRows};
use std::sync::Arc;
use tracing::debug;

pub(crate) const OBJECT_ACL_SQL: &str = "SELECT pg_catalog.array_to_string(c.relacl, ','), \
     n.nspname, c.relname \
     FROM pg_catalog.pg_class c JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
     WHERE c.relkind IN ('r', 'v', 'm', 'S', 'f') AND n.nspname !~ '^pg_' \
     AND pg_catalog.pg_table_is_visible(c.oid) ORDER BY 2, 3";

pub(crate) const DATABASE_ACL_SQL: &str = "SELECT pg_catalog.array_to_string(d.datacl, ','), \
     d.datname FROM pg_catalog.pg_database d WHERE NOT d.datistemplate ORDER BY 2";

pub(crate) const SCHEMA_ACL_SQL: &str = "SELECT pg_catalog.array_to_string(n.nspacl, ','), \
     n.nspname FROM pg_catalog.pg_namespace n \
     WHERE n.nspname !~ '^pg_' AND n.nspname <> 'information_schema' ORDER BY 2";

pub(crate) const SECURITY_DEFINER_SQL: &str = "SELECT n.nspname, p.proname \
     FROM pg_catalog.pg_proc p JOIN pg_catalog.pg_namespace n ON p.pronamespace = n.oid \
     JOIN pg_catalog.pg_roles a ON a.oid = p.proowner WHERE p.prosecdef ORDER BY 1, 2";

pub fn controls() -> Vec<Arc<dyn Control>> {
    vec![
        Arc::new(ApprovedAuthorizations::new()),
        Arc::new(AuditFeatureProtection::new()),
        Arc::new(ConfigurationChangeRestriction::new()),
        Arc::new(SecurityDefinerFunctions::new()),
    ]
}

/// Run `statement` in every non-template database, skipping those that refuse connections
async fn rows_per_database(
    ctx: &ControlContext,
    statement: &str,
) -> Result<Vec<(String, QueryRows)>> {
    let databases = ctx.query(DATABASES_SQL, &[]).await?.column(0);
    let mut results = Vec::with_capacity(databases.len());

    for database in databases {
        match ctx.query_in(&database, statement, &[]).await? {
            QueryOutcome::Rows(rows) => results.push((database, rows)),
            QueryOutcome::Unavailable { message, .. } => {
                debug!(database = %database, %message, "Skipping database");
            }
        }
    }
    Ok(results)
}

/// Second column onward of an `acl|name...` line, dot-joined
fn object_name(line: &str) -> String {
    line.split('|').skip(1).collect::<Vec<_>>().join(".")
}

pub struct ApprovedAuthorizations {
    metadata: ControlMetadata,
}

impl ApprovedAuthorizations {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261859",
                "PostgreSQL must enforce approved authorizations for logical access to \
                 information and system resources in accordance with applicable access control \
                 policies.",
                0.7,
            )
            .with_description(
                "Successful authentication must not automatically give an entity access to an \
                 asset or security boundary. Authorization procedures and controls must be \
                 implemented to ensure each authenticated entity also has a validated and \
                 current authorization.",
            )
            .with_check(
                "Review role attributes, object and column privileges in every database and \
                 the records of pg_hba.conf. Unapproved privileges are a finding.",
            )
            .with_fix(
                "Revoke unapproved privileges and role attributes, and restrict pg_hba.conf to \
                 approved users, addresses and authentication methods.",
            )
            .with_gtitle("SRG-APP-000033-DB-000084")
            .with_rule("SV-261859r1000582_rule")
            .with_stig_id("CD16-00-000300")
            .with_fix_id("F-65621r1000581_fix")
            .with_cci(&["CCI-000213"])
            .with_nist(&["AC-3"])
            .with_label("privileges"),
        }
    }
}

#[async_trait]
impl Control for ApprovedAuthorizations {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    fn applicability(&self, ctx: &ControlContext) -> Result<Applicability> {
        if ctx.inputs.bool("windows_runner")? {
            return Ok(Applicability::NotApplicable(
                "Requires manual review on Windows hosts".into(),
            ));
        }
        Ok(Applicability::Applicable)
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        check_superusers(ctx, eval).await?;

        let owners = ctx.inputs.list("pg_superusers")?;
        let acl = acl_expectation(&owners, "arwdDxtU", "r")?;
        for (database, rows) in rows_per_database(ctx, OBJECT_ACL_SQL).await? {
            for line in rows.lines() {
                let name = object_name(&line);
                eval.check(
                    format!("{}.{} grants only approved privileges", database, name),
                    line,
                    acl.clone(),
                );
            }
        }

        eval.manual_review(
            "Review the access privileges and column access privileges of every object \
             against the documented authorizations",
        );

        let hba = ctx.hba().await?;
        check_hba_access(eval, &hba, &ctx.inputs)
    }
}

pub struct AuditFeatureProtection {
    metadata: ControlMetadata,
}

impl AuditFeatureProtection {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261878",
                "PostgreSQL must protect its audit features from unauthorized access.",
                0.5,
            )
            .with_description(
                "Protecting audit data also includes identifying and protecting the tools used \
                 to view and manipulate log data. Access to audit tools must be controlled and \
                 protected from unauthorized access.",
            )
            .with_check(
                "The log and data directories must belong to the installation owner and group, \
                 the pgaudit installation to root, and only approved roles may be superusers.",
            )
            .with_fix(
                "Correct the ownership of the reported directories and remove the superuser \
                 attribute from unapproved roles.",
            )
            .with_gtitle("SRG-APP-000121-DB-000202")
            .with_rule("SV-261878r1000958_rule")
            .with_stig_id("CD16-00-002300")
            .with_fix_id("F-65640r1000638_fix")
            .with_cci(&["CCI-001493"])
            .with_nist(&["AU-9", "AU-9 a"])
            .with_label("privileges")
            .with_label("auditing"),
        }
    }
}

#[async_trait]
impl Control for AuditFeatureProtection {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let owner = ctx.inputs.string("pg_owner")?;
        let group = ctx.inputs.string("pg_group")?;
        let directories = [
            (ctx.inputs.string("pg_log_dir")?, owner.as_str(), group.as_str()),
            (ctx.inputs.string("pg_data_dir")?, owner.as_str(), group.as_str()),
            (ctx.inputs.string("pgaudit_installation")?, "root", "root"),
        ];

        for (path, want_owner, want_group) in directories {
            let stat = ctx.probes.files.stat(&path).await?;
            eval.check(
                format!("{} is owned by {}", path, want_owner),
                stat.owner.clone(),
                Expectation::equals(want_owner),
            );
            eval.check(
                format!("{} is grouped into {}", path, want_group),
                stat.group,
                Expectation::equals(want_group),
            );
        }

        check_superusers(ctx, eval).await
    }
}

pub struct ConfigurationChangeRestriction {
    metadata: ControlMetadata,
}

impl ConfigurationChangeRestriction {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261924",
                "PostgreSQL must enforce access restrictions associated with changes to the \
                 configuration of the DBMS or database(s).",
                0.5,
            )
            .with_description(
                "Failure to provide logical access restrictions associated with changes to \
                 configuration may have significant effects on the overall security of the \
                 system.",
            )
            .with_check(
                "Only approved roles may be superusers, and database and schema ACLs may only \
                 grant create privileges to the approved owners.",
            )
            .with_fix(
                "Revoke the superuser attribute and create privileges from unapproved roles.",
            )
            .with_gtitle("SRG-APP-000380-DB-000360")
            .with_rule("SV-261924r1000777_rule")
            .with_stig_id("CD16-00-007800")
            .with_fix_id("F-65686r1000776_fix")
            .with_cci(&["CCI-001813"])
            .with_nist(&["CM-5 (1)", "CM-5 (1) (a)"])
            .with_label("privileges"),
        }
    }
}

#[async_trait]
impl Control for ConfigurationChangeRestriction {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        check_superusers(ctx, eval).await?;

        let owners = ctx.inputs.list("pg_superusers")?;
        let database_acl = acl_expectation(&owners, "CTc", "Tc")?;
        let schema_acl = acl_expectation(&owners, "UC", "U")?;

        for line in ctx.query(DATABASE_ACL_SQL, &[]).await?.lines() {
            eval.check(
                format!("database {} grants only approved privileges", object_name(&line)),
                line,
                database_acl.clone(),
            );
        }

        for (database, rows) in rows_per_database(ctx, SCHEMA_ACL_SQL).await? {
            for line in rows.lines() {
                let name = object_name(&line);
                eval.check(
                    format!("schema {}.{} grants only approved privileges", database, name),
                    line,
                    schema_acl.clone(),
                );
            }
        }
        Ok(())
    }
}

pub struct SecurityDefinerFunctions {
    metadata: ControlMetadata,
}

impl SecurityDefinerFunctions {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261916",
                "PostgreSQL must only use documented SECURITY DEFINER functions for privilege \
                 elevation.",
                0.5,
            )
            .with_check(
                "List the functions created with SECURITY DEFINER. Privilege elevation that is \
                 not documented, or that can be invoked in ways other than intended, is a \
                 finding.",
            )
            .with_label("privileges"),
        }
    }
}

#[async_trait]
impl Control for SecurityDefinerFunctions {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let database = ctx.maintenance_db();
        let allowed = ctx.inputs.list("privilege_escalation_functions")?;

        let rows = match ctx.query_in(&database, SECURITY_DEFINER_SQL, &[]).await? {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Unavailable { .. } => {
                eval.skip(format!("database {} is not accepting connections", database));
                return Ok(());
            }
        };

        let functions = rows.column(1);
        if allowed.is_empty() {
            eval.check(
                format!("database {} has no SECURITY DEFINER functions", database),
                functions,
                Expectation::Empty,
            );
        } else {
            for function in functions {
                eval.check(
                    format!("function {} is an approved privilege escalation function", function),
                    function,
                    Expectation::in_set(&allowed),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::{column, Harness, DATA_DIR, HBA_FILE, LOG_DIR};
    use crate::catalog::{ROLES_SQL, ROLE_SUPERUSER_SQL};
    use pgstig_core::Outcome;
    use pgstig_probes::fake::{FakeCommands, FakeFiles, FakeSql};

    const HBA: &str = "local all postgres peer\nhost all all 10.0.0.0/8 cert\n";

    fn roles(sql: FakeSql, superusers: &[(&str, &str)]) -> FakeSql {
        let names: Vec<&str> = superusers.iter().map(|(name, _)| *name).collect();
        let mut sql = sql.with_rows(ROLES_SQL, column(&names));
        for (name, rolsuper) in superusers {
            let rows = QueryRows::scalar("rolsuper", *rolsuper);
            sql = sql.with_rows_for(ROLE_SUPERUSER_SQL, &[*name], rows);
        }
        sql
    }

    fn acl_rows(lines: &[&str]) -> QueryRows {
        QueryRows::new(
            vec!["acl".into(), "name".into()],
            lines
                .iter()
                .map(|l| l.split('|').map(String::from).collect())
                .collect(),
        )
    }

    fn files() -> FakeFiles {
        FakeFiles::new()
            .with_file(HBA_FILE, HBA, "postgres", "postgres", 0o600)
            .with_dir(DATA_DIR, "postgres", "postgres", 0o700)
            .with_dir(LOG_DIR, "postgres", "postgres", 0o700)
            .with_dir("/usr/pgsql-16/lib", "root", "root", 0o755)
    }

    #[tokio::test]
    async fn test_unapproved_superuser_fails_naming_role() {
        let sql = roles(FakeSql::new(), &[("postgres", "t"), ("alice", "t"), ("app", "f")]);
        let harness = Harness::new(sql, files(), FakeCommands::new());

        let verdict = harness.run(&AuditFeatureProtection::new()).await;
        assert_eq!(verdict.outcome, Outcome::Failed);
        assert!(verdict.message.contains("alice"), "{}", verdict.message);

        // postgres is authorized and never queried
        assert_eq!(verdict.assertions.len(), 8);
    }

    #[tokio::test]
    async fn test_audit_feature_ownership() {
        let sql = roles(FakeSql::new(), &[("postgres", "t")]);
        let files = files().with_dir("/usr/pgsql-16/lib", "postgres", "root", 0o755);
        let verdict = Harness::new(sql, files, FakeCommands::new())
            .run(&AuditFeatureProtection::new())
            .await;

        assert_eq!(verdict.outcome, Outcome::Failed);
        assert!(verdict.message.contains("/usr/pgsql-16/lib is owned by root"));
    }

    #[tokio::test]
    async fn test_object_acls_across_databases() {
        let objects = acl_rows(&[
            "|public|orders",
            "postgres=arwdDxtU/postgres,=r/postgres|public|items",
        ]);
        let sql = roles(FakeSql::new(), &[("postgres", "t")])
            .with_rows(DATABASES_SQL, column(&["app", "postgres", "closed"]))
            .with_rows_in("app", OBJECT_ACL_SQL, objects)
            .with_rows_in("postgres", OBJECT_ACL_SQL, acl_rows(&[]))
            .with_unavailable("closed");
        let harness = Harness::new(sql, files(), FakeCommands::new());

        let verdict = harness.run(&ApprovedAuthorizations::new()).await;
        assert_eq!(verdict.outcome, Outcome::Passed, "{}", verdict.message);

        // 2 objects, 7 pg_hba.conf checks and the column privilege note
        assert_eq!(verdict.assertions.len(), 10);
        assert!(verdict.assertions[0].description.starts_with("app.public.orders"));
    }

    #[tokio::test]
    async fn test_object_acl_violation() {
        let sql = roles(FakeSql::new(), &[("postgres", "t")])
            .with_rows(DATABASES_SQL, column(&["app"]))
            .with_rows_in(
                "app",
                OBJECT_ACL_SQL,
                acl_rows(&["alice=arwd/postgres|public|orders"]),
            );
        let harness = Harness::new(sql, files(), FakeCommands::new());

        let verdict = harness.run(&ApprovedAuthorizations::new()).await;
        assert_eq!(verdict.outcome, Outcome::Failed);
        assert!(verdict.message.contains("app.public.orders"), "{}", verdict.message);
        // The column privilege review is still reported
        assert!(verdict.assertions.iter().any(|a| a.message == "manual review required"));
    }

    #[tokio::test]
    async fn test_windows_runner_skips() {
        let harness = Harness::sql(FakeSql::new()).with_input("windows_runner", true);
        let verdict = harness.run(&ApprovedAuthorizations::new()).await;
        assert_eq!(verdict.outcome, Outcome::Skipped);
        assert!(harness.sql.executed().is_empty());
    }

    #[tokio::test]
    async fn test_zero_schemas_and_databases_pass() {
        let sql = roles(FakeSql::new(), &[("postgres", "t")])
            .with_rows(DATABASE_ACL_SQL, acl_rows(&[]))
            .with_rows(DATABASES_SQL, column(&[]));
        let verdict = Harness::sql(sql).run(&ConfigurationChangeRestriction::new()).await;
        assert_eq!(verdict.outcome, Outcome::Passed);
        assert!(verdict.assertions.is_empty());
    }

    #[tokio::test]
    async fn test_schema_create_grant_fails() {
        let databases = acl_rows(&["postgres=CTc/postgres,=Tc/postgres|app"]);
        let schemas = acl_rows(&["postgres=UC/postgres,=UC/postgres|public"]);
        let sql = roles(FakeSql::new(), &[("postgres", "t")])
            .with_rows(DATABASE_ACL_SQL, databases)
            .with_rows(DATABASES_SQL, column(&["app", "template_closed"]))
            .with_rows_in("app", SCHEMA_ACL_SQL, schemas)
            .with_unavailable("template_closed");
        let verdict = Harness::sql(sql).run(&ConfigurationChangeRestriction::new()).await;

        assert_eq!(verdict.outcome, Outcome::Failed);
        assert!(verdict.message.contains("schema app.public"), "{}", verdict.message);
        assert_eq!(verdict.assertions.len(), 2);
    }

    #[tokio::test]
    async fn test_security_definer_functions() {
        let rows = QueryRows::new(
            vec!["nspname".into(), "proname".into()],
            vec![vec!["public".into(), "audit_login".into()]],
        );

        let sql = FakeSql::new().with_rows(SECURITY_DEFINER_SQL, rows.clone());
        let verdict = Harness::sql(sql).run(&SecurityDefinerFunctions::new()).await;
        assert_eq!(verdict.outcome, Outcome::Failed);

        let sql = FakeSql::new().with_rows(SECURITY_DEFINER_SQL, rows);
        let verdict = Harness::sql(sql)
            .with_input("privilege_escalation_functions", vec!["audit_login"])
            .run(&SecurityDefinerFunctions::new())
            .await;
        assert_eq!(verdict.outcome, Outcome::Passed);

        let sql = FakeSql::new().with_unavailable("postgres");
        let verdict = Harness::sql(sql).run(&SecurityDefinerFunctions::new()).await;
        assert_eq!(verdict.outcome, Outcome::Skipped);
    }
}
