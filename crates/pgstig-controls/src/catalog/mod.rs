//! PostgreSQL 16 STIG control catalog
//!
//! Controls are grouped by concern:
//! - `authentication`: pg_hba.conf methods, role inventory, password storage
//! - `privileges`: superuser grants, object/database/schema ACLs, security definer functions
//! - `auditing`: logging settings, log file protection, audit record provocation
//! - `software`: extensions, packages, server version
//! - `encryption`: TLS settings and client certificates
//! - `manual`: requirements that need a human reviewer

pub mod auditing;
pub mod authentication;
pub mod encryption;
pub mod manual;
pub mod privileges;
pub mod software;

use crate::control::{Control, ControlContext};
use crate::evaluation::Evaluation;
use crate::matcher::Expectation;
use crate::registry::ControlRegistry;
use pgstig_core::{Error, InputSource, InputStore, Result};
use pgstig_probes::{HbaColumn, HbaFile};
use std::sync::Arc;

/// Default inputs shipped with the catalog
pub const DEFAULT_INPUTS: &str = include_str!("defaults.yml");

pub(crate) const ROLES_SQL: &str = "SELECT r.rolname FROM pg_catalog.pg_roles r ORDER BY 1";

pub(crate) const ROLE_SUPERUSER_SQL: &str =
    "SELECT r.rolsuper FROM pg_catalog.pg_roles r WHERE r.rolname = $1";

pub(crate) const DATABASES_SQL: &str =
    "SELECT d.datname FROM pg_catalog.pg_database d WHERE NOT d.datistemplate ORDER BY 1";

/// Every control of the catalog
pub fn controls() -> Vec<Arc<dyn Control>> {
    let mut all: Vec<Arc<dyn Control>> = Vec::new();
    all.extend(authentication::controls());
    all.extend(privileges::controls());
    all.extend(auditing::controls());
    all.extend(software::controls());
    all.extend(encryption::controls());
    all.extend(manual::controls());
    all
}

/// Registry holding the whole catalog
pub fn registry() -> Result<ControlRegistry> {
    let mut registry = ControlRegistry::new();
    for control in controls() {
        registry.register(control)?;
    }
    Ok(registry)
}

/// Input store seeded with the catalog defaults
pub fn default_inputs() -> Result<InputStore> {
    let mut inputs = InputStore::new();
    inputs.load_yaml(DEFAULT_INPUTS, InputSource::Default)?;
    Ok(inputs)
}

/// Roles outside `pg_superusers` must not hold the superuser attribute
pub(crate) async fn check_superusers(ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
    let authorized = ctx.inputs.list("pg_superusers")?;
    let roles = ctx.query(ROLES_SQL, &[]).await?.column(0);

    for role in roles.iter().filter(|r| !authorized.contains(r)) {
        let rolsuper = ctx.query(ROLE_SUPERUSER_SQL, &[role.as_str()]).await?;
        eval.check(
            format!("role {:?} must not be a superuser", role),
            rolsuper.first_value().unwrap_or_default(),
            Expectation::not_equals("t"),
        );
    }
    Ok(())
}

/// Pattern for `acl|name...` lines: every ACL item is either held by an owner with
/// `owner_privs`, or granted to PUBLIC with at most `public_privs`. A NULL ACL
/// (default privileges) is accepted.
pub(crate) fn acl_expectation(
    owners: &[String],
    owner_privs: &str,
    public_privs: &str,
) -> Result<Expectation> {
    if owners.is_empty() {
        return Err(Error::InvalidInput {
            name: "pg_superusers".into(),
            message: "at least one owner role is required".into(),
        });
    }
    let owners: Vec<String> = owners.iter().map(|o| regex::escape(o)).collect();
    Expectation::pattern(&format!(
        r"^(((({})=[{}]+|=[{}]+)/\w+,?)+|)\|",
        owners.join("|"),
        owner_privs,
        public_privs
    ))
}

/// Authentication methods of local, replication and host records must be approved
pub(crate) fn check_hba_methods(eval: &mut Evaluation, hba: &HbaFile, approved: &[String]) {
    let subsets = [
        ("local", hba.filter(|r| r.kind == "local")),
        ("replication", hba.filter(|r| r.database == "replication")),
        ("host", hba.filter(|r| r.kind == "host")),
    ];
    for (label, records) in subsets {
        eval.check(
            format!("pg_hba.conf {} records use approved authentication methods", label),
            records.distinct(HbaColumn::AuthMethod),
            Expectation::in_set(approved),
        );
    }
}

/// The audit log directory, or `None` (with a skip note) when it does not exist
pub(crate) async fn audit_log_dir(
    ctx: &ControlContext,
    eval: &mut Evaluation,
) -> Result<Option<String>> {
    let dir = ctx.inputs.string("pg_audit_log_dir")?;
    let stat = ctx.probes.files.stat(&dir).await?;
    if stat.is_directory() {
        Ok(Some(dir))
    } else {
        eval.skip(format!(
            "The {} directory was not found. Set pg_audit_log_dir to the audit log \
             location of this instance.",
            dir
        ));
        Ok(None)
    }
}

/// Lines of the log files under `dir` containing `needle`
pub(crate) async fn grep_logs(ctx: &ControlContext, dir: &str, needle: &str) -> Result<String> {
    let output = ctx.probes.commands.run(&["grep", "-r", needle, dir]).await?;
    match output.exit_code {
        // 1 means no match
        0 | 1 => Ok(output.stdout),
        code => Err(Error::probe(
            "grep",
            format!("exit status {}: {}", code, output.stderr.trim()),
        )),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::control::execute;
    use crate::evaluation::Verdict;
    use pgstig_core::{Target, Value};
    use pgstig_probes::fake::{FakeCommands, FakeFiles, FakeSql};
    use pgstig_probes::Probes;

    pub const DATA_DIR: &str = "/var/lib/pgsql/16/data";
    pub const LOG_DIR: &str = "/var/lib/pgsql/16/data/log";
    pub const HBA_FILE: &str = "/var/lib/pgsql/16/data/pg_hba.conf";

    pub struct Harness {
        pub sql: Arc<FakeSql>,
        pub files: Arc<FakeFiles>,
        pub commands: Arc<FakeCommands>,
        pub inputs: InputStore,
    }

    impl Harness {
        pub fn new(sql: FakeSql, files: FakeFiles, commands: FakeCommands) -> Self {
            Self {
                sql: Arc::new(sql),
                files: Arc::new(files),
                commands: Arc::new(commands),
                inputs: default_inputs().unwrap(),
            }
        }

        pub fn sql(sql: FakeSql) -> Self {
            Self::new(sql, FakeFiles::new(), FakeCommands::new())
        }

        pub fn with_input(mut self, name: &str, value: impl Into<Value>) -> Self {
            self.inputs.set_override(name, value);
            self
        }

        pub fn context(&self) -> ControlContext {
            ControlContext::new(
                Target::default(),
                Arc::new(self.inputs.clone()),
                Probes::new(self.sql.clone(), self.files.clone(), self.commands.clone()),
            )
        }

        pub async fn run(&self, control: &dyn Control) -> Verdict {
            let ctx = self.context();
            let mut eval = Evaluation::new(control.id());
            let result = execute(control, &ctx, &mut eval).await;
            eval.finish(result)
        }
    }

    /// Single-column rows
    pub fn column(values: &[&str]) -> pgstig_probes::QueryRows {
        pgstig_probes::QueryRows::single_column("value", values.iter().copied())
    }
}
