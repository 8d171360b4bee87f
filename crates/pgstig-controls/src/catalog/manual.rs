//! Requirements that depend on organization documentation and need a human reviewer

use crate::control::{Control, ControlContext, ControlMetadata};
use crate::evaluation::Evaluation;
use async_trait::async_trait;
use pgstig_core::Result;
use std::sync::Arc;

pub fn controls() -> Vec<Arc<dyn Control>> {
    vec![
        Arc::new(ManualControl::new(
            ControlMetadata::new(
                "SV-261910",
                "PostgreSQL must automatically terminate a user session after \
                 organization-defined conditions or trigger events requiring session disconnect.",
                0.5,
            )
            .with_check(
                "Review the system documentation for the circumstances requiring automatic \
                 session termination.",
            )
            .with_gtitle("SRG-APP-000295-DB-000305")
            .with_rule("SV-261910r1000735_rule")
            .with_stig_id("CD16-00-006200")
            .with_fix_id("F-65672r1000734_fix")
            .with_cci(&["CCI-002361"])
            .with_nist(&["AC-12"])
            .with_label("manual"),
            &["If the documentation requires automatic session termination, but PostgreSQL is \
               not configured accordingly, this is a finding."],
        )),
        Arc::new(ManualControl::new(
            ControlMetadata::new(
                "SV-261915",
                "PostgreSQL must prevent nonprivileged users from executing privileged \
                 functions, to include disabling, circumventing, or altering implemented \
                 security safeguards/countermeasures.",
                0.5,
            )
            .with_check(
                "Review the system documentation to obtain the definition of the PostgreSQL \
                 functionality considered privileged in the context of the system in question.",
            )
            .with_gtitle("SRG-APP-000340-DB-000304")
            .with_rule("SV-261915r1000750_rule")
            .with_stig_id("CD16-00-006800")
            .with_fix_id("F-65677r1000749_fix")
            .with_cci(&["CCI-002235"])
            .with_nist(&["AC-6 (10)"])
            .with_label("manual"),
            &[
                "If the configuration does not protect all of the actions defined as \
                 privileged, this is a finding.",
                "If PostgreSQL instance uses procedural languages, such as pl/Python or pl/R, \
                 without AO authorization, this is a finding.",
            ],
        )),
        Arc::new(ManualControl::new(
            ControlMetadata::new(
                "SV-261926",
                "PostgreSQL must disable network functions, ports, protocols, and services \
                 deemed by the organization to be nonsecure, in accordance with the Ports, \
                 Protocols, and Services Management (PPSM) guidance.",
                0.5,
            )
            .with_check(
                "Check that all network functions, ports, protocols, and services comply with \
                 PPSM guidance.",
            )
            .with_gtitle("SRG-APP-000383-DB-000364")
            .with_rule("SV-261926r1000783_rule")
            .with_stig_id("CD16-00-008000")
            .with_fix_id("F-65688r1000782_fix")
            .with_cci(&["CCI-001762"])
            .with_nist(&["CM-7 (1) (b)"])
            .with_label("manual"),
            &["If network functions, ports, protocols, and services do not comply with PPSM \
               guidance, this is a finding."],
        )),
    ]
}

/// Control that only records review instructions
pub struct ManualControl {
    metadata: ControlMetadata,
    instructions: Vec<String>,
}

impl ManualControl {
    pub fn new(metadata: ControlMetadata, instructions: &[&str]) -> Self {
        Self {
            metadata,
            instructions: instructions.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Control for ManualControl {
    fn metadata(&self) -> &ControlMetadata {
        &self.metadata
    }

    async fn evaluate(&self, _ctx: &ControlContext, eval: &mut Evaluation) -> Result<()> {
        for instruction in &self.instructions {
            eval.manual_review(instruction.as_str());
        }
        Ok(())
    }
}
