//! Installed software: extensions, OS packages and the server version

use crate::control::{Control, ControlContext, ControlMetadata};
use crate::evaluation::Evaluation;
use crate::matcher::Expectation;
use async_trait::async_trait;
use pgstig_core::{Error, Result};
use std::sync::Arc;
use tracing::debug;

pub(crate) const EXTENSIONS_SQL: &str =
    "SELECT e.extname FROM pg_catalog.pg_extension e WHERE e.extname <> 'plpgsql' ORDER BY 1";

/// Package listings tried in order; the first one that runs wins
const PACKAGE_LISTINGS: [&[&str]; 2] = [
    &["dpkg-query", "-W", "-f", "${Package}\\n"],
    &["rpm", "-qa", "--qf", "%{NAME}\\n"],
];

const VERSIONING_URL: &str = "https://www.postgresql.org/support/versioning/";

pub fn controls() -> Vec<Arc<dyn Control>> {
    vec![
        Arc::new(UnusedExtensions::new()),
        Arc::new(UnusedPackages::new()),
        Arc::new(ReplacedComponents::new()),
        Arc::new(SupportedVersion::new()),
    ]
}

/// Names of installed OS packages
async fn installed_packages(ctx: &ControlContext) -> Result<Vec<String>> {
    let mut failures = Vec::new();
    for argv in PACKAGE_LISTINGS {
        match ctx.probes.commands.run(argv).await {
            Ok(output) if output.is_success() => return Ok(output.lines()),
            Ok(output) => {
                failures.push(format!("{}: exit status {}", argv[0], output.exit_code));
            }
            Err(e) => failures.push(e.to_string()),
        }
        debug!(program = argv[0], "Package listing unavailable");
    }
    Err(Error::probe(
        "packages",
        format!("no package manager answered ({})", failures.join("; ")),
    ))
}

pub struct UnusedExtensions {
    metadata: ControlMetadata,
}

impl UnusedExtensions {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261886",
                "Unused database components, PostgreSQL software, and database objects must be \
                 removed.",
                0.5,
            )
            .with_description(
                "Information systems are capable of providing a wide variety of functions and \
                 services. Some of the functions and services, provided by default, may not be \
                 necessary to support essential organizational operations.",
            )
            .with_check(
                "List the installed extensions other than plpgsql. Any extension that is not \
                 approved is a finding.",
            )
            .with_fix("DROP EXTENSION every extension that is not approved.")
            .with_gtitle("SRG-APP-000141-DB-000091")
            .with_rule("SV-261886r1000951_rule")
            .with_stig_id("CD16-00-003200")
            .with_fix_id("F-65648r1000951_fix")
            .with_cci(&["CCI-000381"])
            .with_nist(&["CM-7 a"])
            .with_label("software"),
        }
    }
}

#[async_trait]
impl Control for UnusedExtensions {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let approved = ctx.inputs.list("approved_ext")?;
        let installed = ctx.query(EXTENSIONS_SQL, &[]).await?.column(0);

        if installed.is_empty() {
            eval.check("installed extensions", installed, Expectation::Empty);
            return Ok(());
        }
        for extension in installed {
            eval.check(
                format!("installed extension {}", extension),
                extension.as_str(),
                Expectation::in_set(&approved),
            );
        }
        Ok(())
    }
}

pub struct UnusedPackages {
    metadata: ControlMetadata,
}

impl UnusedPackages {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261887",
                "Unused database components that are integrated in PostgreSQL and cannot be \
                 uninstalled must be disabled.",
                0.5,
            )
            .with_description(
                "Unused, unnecessary PostgreSQL components increase the attack vector for \
                 PostgreSQL by introducing additional targets for attack.",
            )
            .with_check(
                "List the installed packages with postgres in their name. Any package that is \
                 not required is a finding.",
            )
            .with_fix("Remove the packages that are not required.")
            .with_gtitle("SRG-APP-000141-DB-000092")
            .with_rule("SV-261887r1000666_rule")
            .with_stig_id("CD16-00-003300")
            .with_fix_id("F-65649r1000665_fix")
            .with_cci(&["CCI-000381"])
            .with_nist(&["CM-7 a"])
            .with_label("software"),
        }
    }
}

#[async_trait]
impl Control for UnusedPackages {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let approved = ctx.inputs.list("approved_packages")?;
        let packages = installed_packages(ctx).await?;

        for package in packages.iter().filter(|p| p.contains("postgres")) {
            eval.check(
                format!("installed package {}", package),
                package.as_str(),
                Expectation::in_set(&approved),
            );
        }
        Ok(())
    }
}

pub struct ReplacedComponents {
    metadata: ControlMetadata,
}

impl ReplacedComponents {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261935",
                "When updates are applied to the PostgreSQL software, any software components \
                 that have been replaced or made unnecessary must be removed.",
                0.5,
            )
            .with_description(
                "Previous versions of DBMS components that are not removed from the \
                 information system after updates have been installed may be exploited by \
                 adversaries.",
            )
            .with_check(
                "List the installed packages with postgres in their name. Any package from a \
                 major version other than the one in use is a finding.",
            )
            .with_fix("Remove the packages of replaced major versions.")
            .with_gtitle("SRG-APP-000454-DB-000389")
            .with_rule("SV-261935r1000810_rule")
            .with_stig_id("CD16-00-009100")
            .with_fix_id("F-65697r1000809_fix")
            .with_cci(&["CCI-002617"])
            .with_nist(&["SI-2 (6)"])
            .with_label("software"),
        }
    }
}

#[async_trait]
impl Control for ReplacedComponents {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let version = ctx.inputs.integer("pg_version")?.to_string();
        let packages = installed_packages(ctx).await?;

        for package in packages.iter().filter(|p| p.contains("postgres")) {
            eval.check(
                format!("installed package {} belongs to PostgreSQL {}", package, version),
                package.as_str(),
                Expectation::includes(version.as_str()),
            );
        }
        Ok(())
    }
}

pub struct SupportedVersion {
    metadata: ControlMetadata,
}

impl SupportedVersion {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261937",
                "PostgreSQL products must be a version supported by the vendor.",
                0.7,
            )
            .with_description(
                "Unsupported commercial and database systems should not be used because fixes \
                 to newly identified bugs will not be implemented by the vendor.",
            )
            .with_check(
                "Compare the installed version with the supported releases listed at \
                 https://www.postgresql.org/support/versioning/.",
            )
            .with_fix("Upgrade to a supported release.")
            .with_gtitle("SRG-APP-000456-DB-000400")
            .with_rule("SV-261937r1000974_rule")
            .with_stig_id("CD16-00-009300")
            .with_fix_id("F-65699r1000815_fix")
            .with_cci(&["CCI-003376"])
            .with_nist(&["SA-22 a"])
            .with_label("software")
            .with_label("documentable"),
        }
    }
}

#[async_trait]
impl Control for SupportedVersion {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let installed = ctx.setting("server_version").await?;

        match ctx.inputs.optional("min_org_allowed_postgres_version") {
            Some(minimum) => {
                eval.check(
                    "installed PostgreSQL version",
                    installed,
                    Expectation::VersionAtLeast(minimum.render()),
                );
            }
            None => eval.manual_review(format!(
                "Installed PostgreSQL version is {}. Set min_org_allowed_postgres_version or \
                 compare it with the supported releases at {}",
                installed, VERSIONING_URL
            )),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::{column, Harness};
    use crate::control::SETTING_SQL;
    use pgstig_core::Outcome;
    use pgstig_probes::fake::{FakeCommands, FakeFiles, FakeSql};
    use pgstig_probes::CommandOutput;

    #[tokio::test]
    async fn test_no_extensions_passes() {
        let sql = FakeSql::new().with_rows(EXTENSIONS_SQL, column(&[]));
        let verdict = Harness::sql(sql).run(&UnusedExtensions::new()).await;
        assert_eq!(verdict.outcome, Outcome::Passed);
        assert_eq!(verdict.assertions.len(), 1);
    }

    #[tokio::test]
    async fn test_extension_query_error_errors() {
        let sql = FakeSql::new().with_error(EXTENSIONS_SQL, "permission denied for table pg_extension");
        let verdict = Harness::sql(sql).run(&UnusedExtensions::new()).await;
        assert_eq!(verdict.outcome, Outcome::Errored);
        assert!(verdict.message.contains("permission denied"), "{}", verdict.message);
    }

    #[tokio::test]
    async fn test_unapproved_extension_fails() {
        let sql = FakeSql::new().with_rows(EXTENSIONS_SQL, column(&["pgaudit", "dblink"]));
        let harness = Harness::sql(sql).with_input("approved_ext", vec!["pgaudit"]);

        let verdict = harness.run(&UnusedExtensions::new()).await;
        assert_eq!(verdict.outcome, Outcome::Failed);
        assert!(verdict.message.starts_with("1 of 2"));
        assert!(verdict.message.contains("installed extension dblink"));
    }

    #[tokio::test]
    async fn test_packages_fall_back_to_rpm() {
        let commands = FakeCommands::new().with_output(
            &["rpm", "-qa", "--qf", "%{NAME}\\n"],
            CommandOutput::success("bash\npostgresql16\npostgresql16-server\nopenssl\n"),
        );
        let harness = Harness::new(FakeSql::new(), FakeFiles::new(), commands)
            .with_input("approved_packages", vec!["postgresql16", "postgresql16-server"]);

        let verdict = harness.run(&UnusedPackages::new()).await;
        assert_eq!(verdict.outcome, Outcome::Passed, "{}", verdict.message);
        assert_eq!(verdict.assertions.len(), 2);
    }

    #[tokio::test]
    async fn test_unapproved_package_fails() {
        let commands = FakeCommands::new().with_output(
            &["dpkg-query", "-W", "-f", "${Package}\\n"],
            CommandOutput::success("postgresql-16\npostgresql-contrib\n"),
        );
        let harness = Harness::new(FakeSql::new(), FakeFiles::new(), commands)
            .with_input("approved_packages", vec!["postgresql-16"]);

        let verdict = harness.run(&UnusedPackages::new()).await;
        assert_eq!(verdict.outcome, Outcome::Failed);
        assert!(verdict.message.contains("postgresql-contrib"));
    }

    #[tokio::test]
    async fn test_replaced_major_version_fails() {
        let commands = FakeCommands::new().with_output(
            &["rpm", "-qa", "--qf", "%{NAME}\\n"],
            CommandOutput::success("postgresql16-server\npostgresql15-libs\nopenssl\n"),
        );
        let harness = Harness::new(FakeSql::new(), FakeFiles::new(), commands);

        let verdict = harness.run(&ReplacedComponents::new()).await;
        assert_eq!(verdict.outcome, Outcome::Failed);
        assert_eq!(verdict.assertions.len(), 2);
        assert!(verdict.message.contains("postgresql15-libs"), "{}", verdict.message);

        let verdict = harness
            .with_input("pg_version", "15")
            .run(&ReplacedComponents::new())
            .await;
        assert!(verdict.message.contains("postgresql16-server"), "{}", verdict.message);
    }

    #[tokio::test]
    async fn test_current_major_version_passes() {
        let commands = FakeCommands::new().with_output(
            &["dpkg-query", "-W", "-f", "${Package}\\n"],
            CommandOutput::success("postgresql-16\npostgresql-client-16\n"),
        );
        let verdict = Harness::new(FakeSql::new(), FakeFiles::new(), commands)
            .run(&ReplacedComponents::new())
            .await;
        assert_eq!(verdict.outcome, Outcome::Passed, "{}", verdict.message);
    }

    #[tokio::test]
    async fn test_no_package_manager_errors() {
        let verdict = Harness::sql(FakeSql::new()).run(&UnusedPackages::new()).await;
        assert_eq!(verdict.outcome, Outcome::Errored);
        assert!(verdict.message.contains("no package manager answered"));
    }

    #[tokio::test]
    async fn test_version_without_minimum_needs_review() {
        let sql = FakeSql::new().with_setting(SETTING_SQL, "server_version", "16.2");
        let verdict = Harness::sql(sql).run(&SupportedVersion::new()).await;
        assert_eq!(verdict.outcome, Outcome::ManualReview);
        assert!(verdict.message.contains("16.2"));
    }

    #[tokio::test]
    async fn test_version_against_minimum() {
        let sql = FakeSql::new().with_setting(SETTING_SQL, "server_version", "16.2 (Debian)");
        let harness = Harness::sql(sql).with_input("min_org_allowed_postgres_version", "16.4");
        assert_eq!(harness.run(&SupportedVersion::new()).await.outcome, Outcome::Failed);

        let harness = harness.with_input("min_org_allowed_postgres_version", "16.1");
        assert_eq!(harness.run(&SupportedVersion::new()).await.outcome, Outcome::Passed);
    }
}
