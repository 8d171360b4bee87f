//! Authentication controls: pg_hba.conf methods, role inventory, password storage

use super::{check_hba_methods, ROLES_SQL};
use crate::control::{Control, ControlContext, ControlMetadata};
use crate::evaluation::Evaluation;
use crate::matcher::Expectation;
use async_trait::async_trait;
use pgstig_core::{InputStore, Result};
use pgstig_probes::{HbaColumn, HbaFile};
use std::sync::Arc;

/// Roles whose stored password is not a SCRAM verifier (roles without a password are fine)
pub(crate) const WEAK_PASSWORDS_SQL: &str = "SELECT s.usename FROM pg_catalog.pg_shadow s \
     WHERE s.passwd IS NOT NULL AND s.passwd NOT LIKE 'SCRAM-SHA-256%' ORDER BY 1";

pub fn controls() -> Vec<Arc<dyn Control>> {
    vec![
        Arc::new(OrganizationAuthentication::new()),
        Arc::new(UniqueUserIdentification::new()),
        Arc::new(HashedPasswordStorage::new()),
    ]
}

/// Record checks shared by the identification and authorization controls:
/// local access is limited to the installation owner, replication access to the
/// approved replicas, and no record uses an unapproved method.
pub(crate) fn check_hba_access(
    eval: &mut Evaluation,
    hba: &HbaFile,
    inputs: &InputStore,
) -> Result<()> {
    let owner = inputs.string("pg_owner")?;
    let replicas = inputs.list("pg_replicas")?;
    let approved = inputs.list("approved_auth_methods")?;

    let local = hba.filter(|r| r.kind == "local");
    eval.check(
        "pg_hba.conf local records only admit the installation owner",
        local.distinct(HbaColumn::User),
        Expectation::empty_or(Expectation::set_equal([owner.as_str()])),
    );
    eval.check(
        "pg_hba.conf local records do not use trust",
        local.distinct(HbaColumn::AuthMethod),
        Expectation::excludes("trust"),
    );

    let replication = hba.filter(|r| r.database == "replication");
    eval.check(
        "pg_hba.conf replication records are host records",
        replication.distinct(HbaColumn::Type),
        Expectation::empty_or(Expectation::set_equal(["host"])),
    );
    eval.check(
        "pg_hba.conf replication records only admit approved replicas",
        replication.column(HbaColumn::Address),
        Expectation::set_equal(&replicas),
    );
    eval.check(
        "pg_hba.conf replication records only admit the replication role",
        replication.distinct(HbaColumn::User),
        Expectation::empty_or(Expectation::set_equal(["replication"])),
    );
    eval.check(
        "pg_hba.conf replication records use approved authentication methods",
        replication.distinct(HbaColumn::AuthMethod),
        Expectation::in_set(&approved),
    );

    let host = hba.filter(|r| r.kind == "host");
    eval.check(
        "pg_hba.conf host records use approved authentication methods",
        host.distinct(HbaColumn::AuthMethod),
        Expectation::in_set(&approved),
    );
    Ok(())
}

pub struct OrganizationAuthentication {
    metadata: ControlMetadata,
}

impl OrganizationAuthentication {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261858",
                "PostgreSQL must integrate with an organization-level authentication/access \
                 mechanism providing account management and automation for all users, groups, \
                 roles, and any other principals.",
                0.7,
            )
            .with_description(
                "Enterprise environments make account management for applications and \
                 databases challenging and complex. PostgreSQL must be configured to \
                 automatically use organization-level account management functions, and these \
                 functions must immediately enforce the organization's current account policy.",
            )
            .with_check(
                "Review pg_hba.conf. All records must use an auth-method of gss, sspi, ldap, or \
                 cert. Records with a different auth-method that are not documented and \
                 approved are a finding.",
            )
            .with_fix(
                "Edit pg_hba.conf so that every PostgreSQL-managed account is either \
                 transferred to the external mechanism or documented and approved.",
            )
            .with_gtitle("SRG-APP-000023-DB-000001")
            .with_rule("SV-261858r1000953_rule")
            .with_stig_id("CD16-00-000200")
            .with_fix_id("F-65620r1000578_fix")
            .with_cci(&["CCI-000015"])
            .with_nist(&["AC-2 (1)"])
            .with_label("authentication"),
        }
    }
}

#[async_trait]
impl Control for OrganizationAuthentication {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let approved = ctx.inputs.list("approved_auth_methods")?;
        let hba = ctx.hba().await?;
        check_hba_methods(eval, &hba, &approved);
        Ok(())
    }
}

pub struct UniqueUserIdentification {
    metadata: ControlMetadata,
}

impl UniqueUserIdentification {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261890",
                "PostgreSQL must uniquely identify and authenticate organizational users (or \
                 processes acting on behalf of organizational users).",
                0.5,
            )
            .with_description(
                "To assure accountability and prevent unauthenticated access, organizational \
                 users must be identified and authenticated to prevent potential misuse and \
                 compromise of the system.",
            )
            .with_check(
                "List all roles and confirm each is a documented, uniquely identified user. \
                 Review pg_hba.conf for shared accounts and unapproved authentication methods.",
            )
            .with_fix(
                "Remove shared accounts, create a role per organizational user and configure \
                 pg_hba.conf to authenticate every user individually.",
            )
            .with_gtitle("SRG-APP-000148-DB-000103")
            .with_rule("SV-261890r1000675_rule")
            .with_stig_id("CD16-00-003600")
            .with_fix_id("F-65652r1000674_fix")
            .with_cci(&["CCI-000764"])
            .with_nist(&["IA-2"])
            .with_label("authentication"),
        }
    }
}

#[async_trait]
impl Control for UniqueUserIdentification {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let expected = ctx.inputs.list("pg_users")?;
        let roles = ctx.query(ROLES_SQL, &[]).await?.column(0);
        eval.check(
            "cluster roles match the documented users",
            roles,
            Expectation::set_equal(&expected),
        );

        let hba = ctx.hba().await?;
        check_hba_access(eval, &hba, &ctx.inputs)
    }
}

pub struct HashedPasswordStorage {
    metadata: ControlMetadata,
}

impl HashedPasswordStorage {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261891",
                "If passwords are used for authentication, PostgreSQL must store only hashed, \
                 salted representations of passwords.",
                0.7,
            )
            .with_description(
                "Database passwords stored in clear text, using reversible encryption, or \
                 using unsalted hashes would be vulnerable to unauthorized disclosure. \
                 Database passwords must always be in the form of one-way, salted hashes.",
            )
            .with_check(
                "SHOW password_encryption must return scram-sha-256, and no row of pg_shadow \
                 may carry a password that is not a SCRAM-SHA-256 verifier.",
            )
            .with_fix(
                "Set password_encryption = 'scram-sha-256' in postgresql.conf, restart the \
                 server and reset the passwords of the reported roles.",
            )
            .with_gtitle("SRG-APP-000171-DB-000074")
            .with_rule("SV-261891r1000970_rule")
            .with_stig_id("CD16-00-003800")
            .with_fix_id("F-65653r1000970_fix")
            .with_cci(&["CCI-000196", "CCI-004062"])
            .with_nist(&["IA-5 (1) (c)", "IA-5 (1) (d)"])
            .with_label("authentication"),
        }
    }
}

#[async_trait]
impl Control for HashedPasswordStorage {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        eval.check(
            "password_encryption is scram-sha-256",
            ctx.setting("password_encryption").await?,
            Expectation::EqualsCi("scram-sha-256".into()),
        );

        let weak = ctx.query(WEAK_PASSWORDS_SQL, &[]).await?.column(0);
        eval.check(
            "no role stores a password that is not a SCRAM verifier",
            weak,
            Expectation::Empty,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::{column, Harness, HBA_FILE};
    use crate::control::SETTING_SQL;
    use pgstig_core::{MatcherKind, Outcome};
    use pgstig_probes::fake::{FakeCommands, FakeFiles, FakeSql};

    const COMPLIANT_HBA: &str = "\
local   all          postgres                  peer
host    all          all          10.0.0.0/8   cert
hostssl all          all          0.0.0.0/0    cert clientcert=verify-full
host    replication  replication  10.0.0.5/32  cert
";

    fn with_hba(sql: FakeSql, hba: &str) -> Harness {
        Harness::new(
            sql,
            FakeFiles::new().with_file(HBA_FILE, hba, "postgres", "postgres", 0o600),
            FakeCommands::new(),
        )
    }

    #[tokio::test]
    async fn test_trust_record_fails_naming_trust() {
        let hba = "local all postgres cert\nhost all all 0.0.0.0/0 trust\n";
        let harness =
            with_hba(FakeSql::new(), hba).with_input("approved_auth_methods", vec!["cert", "gss"]);

        let verdict = harness.run(&OrganizationAuthentication::new()).await;
        assert_eq!(verdict.outcome, Outcome::Failed);
        assert!(verdict.message.contains("\"trust\""), "{}", verdict.message);

        let failed: Vec<_> = verdict.assertions.iter().filter(|a| a.is_failed()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].matcher, MatcherKind::IsInSet);
        assert!(failed[0].description.contains("host records"));
    }

    #[tokio::test]
    async fn test_approved_methods_pass() {
        let hba = "local all postgres cert\nhost all all 0.0.0.0/0 gss\n";
        let harness =
            with_hba(FakeSql::new(), hba).with_input("approved_auth_methods", vec!["cert", "gss"]);
        let verdict = harness.run(&OrganizationAuthentication::new()).await;
        assert_eq!(verdict.outcome, Outcome::Passed);
        assert_eq!(verdict.assertions.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_hba_file_errors() {
        let verdict = Harness::sql(FakeSql::new())
            .run(&OrganizationAuthentication::new())
            .await;
        assert_eq!(verdict.outcome, Outcome::Errored);
        assert!(verdict.message.contains("pg_hba.conf"));
    }

    #[tokio::test]
    async fn test_unique_identification() {
        let sql = FakeSql::new().with_rows(ROLES_SQL, column(&["postgres", "replication"]));
        let harness = with_hba(sql, COMPLIANT_HBA)
            .with_input("pg_users", vec!["replication", "postgres"])
            .with_input("pg_replicas", vec!["10.0.0.5/32"]);

        let verdict = harness.run(&UniqueUserIdentification::new()).await;
        assert_eq!(verdict.outcome, Outcome::Passed, "{}", verdict.message);
    }

    #[tokio::test]
    async fn test_unexpected_role_and_replica() {
        let sql = FakeSql::new().with_rows(ROLES_SQL, column(&["postgres", "shared"]));
        let harness = with_hba(sql, COMPLIANT_HBA);

        let verdict = harness.run(&UniqueUserIdentification::new()).await;
        assert_eq!(verdict.outcome, Outcome::Failed);
        let failed: Vec<_> = verdict.assertions.iter().filter(|a| a.is_failed()).collect();
        assert_eq!(failed.len(), 2);
        assert!(failed[0].message.contains("unexpected [shared]"));
        assert!(failed[1].message.contains("unexpected [10.0.0.5/32]"));
    }

    #[tokio::test]
    async fn test_password_storage() {
        let sql = FakeSql::new()
            .with_setting(SETTING_SQL, "password_encryption", "scram-sha-256")
            .with_rows(WEAK_PASSWORDS_SQL, column(&[]));
        let verdict = Harness::sql(sql).run(&HashedPasswordStorage::new()).await;
        assert_eq!(verdict.outcome, Outcome::Passed);

        let sql = FakeSql::new()
            .with_setting(SETTING_SQL, "password_encryption", "md5")
            .with_rows(WEAK_PASSWORDS_SQL, column(&["legacy"]));
        let verdict = Harness::sql(sql).run(&HashedPasswordStorage::new()).await;
        assert_eq!(verdict.outcome, Outcome::Failed);
        assert!(verdict.message.starts_with("2 of 2"));
    }
}
