//! TLS controls

use crate::control::{Control, ControlContext, ControlMetadata};
use crate::evaluation::{Evaluation, OneOf};
use crate::matcher::Expectation;
use async_trait::async_trait;
use pgstig_core::{Result, Value};
use pgstig_probes::HbaColumn;
use std::sync::Arc;

const DEFAULT_CRL_FILE: &str = "root.crl";

pub fn controls() -> Vec<Arc<dyn Control>> {
    vec![
        Arc::new(SessionAuthenticity::new()),
        Arc::new(CertificatePathValidation::new()),
    ]
}

/// `ssl_crl_file` is relative to the data directory unless absolute
fn crl_path(data_dir: &str, setting: &str) -> String {
    let file = if setting.is_empty() { DEFAULT_CRL_FILE } else { setting };
    if file.starts_with('/') {
        file.to_string()
    } else {
        format!("{}/{}", data_dir.trim_end_matches('/'), file)
    }
}

pub struct SessionAuthenticity {
    metadata: ControlMetadata,
}

impl SessionAuthenticity {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261900",
                "PostgreSQL must maintain the authenticity of communications sessions by \
                 guarding against man-in-the-middle attacks that guess at Session ID values.",
                0.5,
            )
            .with_description(
                "One class of man-in-the-middle, or session hijacking, attack involves the \
                 adversary guessing at valid session identifiers based on patterns in \
                 identifiers already known.",
            )
            .with_check("SHOW ssl must return on.")
            .with_fix("Set ssl = on in postgresql.conf and reload the server.")
            .with_gtitle("SRG-APP-000224-DB-000384")
            .with_rule("SV-261900r1000705_rule")
            .with_stig_id("CD16-00-004900")
            .with_fix_id("F-65662r1000704_fix")
            .with_cci(&["CCI-001188"])
            .with_nist(&["SC-23 (3)"])
            .with_label("encryption"),
        }
    }
}

#[async_trait]
impl Control for SessionAuthenticity {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        eval.check(
            "ssl is on",
            ctx.setting("ssl").await?,
            Expectation::BooleanTruthy(true),
        );
        Ok(())
    }
}

pub struct CertificatePathValidation {
    metadata: ControlMetadata,
}

impl CertificatePathValidation {
    pub fn new() -> Self {
        Self {
            metadata: ControlMetadata::new(
                "SV-261893",
                "PostgreSQL, when using PKI-based authentication, must validate certificates by \
                 performing RFC 5280-compliant certification path validation.",
                0.5,
            )
            .with_description(
                "A certificate's certification path is the path from the end entity \
                 certificate to a trusted root certification authority (CA). Database \
                 Management Systems that do not validate certificates are in danger of \
                 accepting certificates that are invalid and/or counterfeit.",
            )
            .with_check(
                "ssl_crl_file must name an existing CRL file, and hostssl entries in \
                 pg_hba.conf must use cert with clientcert=verify-ca.",
            )
            .with_fix(
                "Copy the CRL into the data directory, set ssl_crl_file = 'root.crl' and add \
                 hostssl <database> <user> <address> cert clientcert=verify-ca to pg_hba.conf.",
            )
            .with_gtitle("SRG-APP-000175-DB-000067")
            .with_rule("SV-261893r1000684_rule")
            .with_stig_id("CD16-00-004000")
            .with_fix_id("F-65655r1000683_fix")
            .with_cci(&["CCI-000185"])
            .with_nist(&["IA-5 (2) (a)", "IA-5 (2) (b) (1)"])
            .with_label("encryption")
            .with_label("authentication"),
        }
    }
}

#[async_trait]
impl Control for CertificatePathValidation {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        let data_dir = ctx.inputs.string("pg_data_dir")?;
        let setting = ctx.setting("ssl_crl_file").await?;
        eval.check(
            "ssl_crl_file is set",
            setting.as_str(),
            Expectation::not_equals(""),
        );

        let path = crl_path(&data_dir, &setting);
        let stat = ctx.probes.files.stat(&path).await?;
        eval.check(
            format!("CRL file {} exists", path),
            stat.is_file(),
            Expectation::equals(true),
        );

        let hostssl = ctx.hba().await?.filter(|r| r.kind == "hostssl");
        // No hostssl records must fail both alternatives
        let params = if hostssl.is_empty() {
            Value::from("")
        } else {
            Value::from(hostssl.column(HbaColumn::AuthParams))
        };
        eval.one_of(
            OneOf::new("hostssl records validate client certificates")
                .check(
                    "hostssl records use cert authentication",
                    hostssl.distinct(HbaColumn::AuthMethod),
                    Expectation::includes("cert"),
                )
                .check(
                    "hostssl records set clientcert",
                    params,
                    Expectation::pattern(r"clientcert=(1|verify-ca|verify-full)")?,
                ),
        );
        Ok(())
    }
}
