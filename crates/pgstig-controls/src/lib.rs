//! pgstig Controls - control model, matchers, registry and the STIG catalog
//!
//! This crate provides:
//! - `Control`: Trait every STIG control implements, with its metadata
//! - `Evaluation`: Assertion recorder that derives a control's outcome
//! - `Expectation`: Matchers comparing probed facts with expected values
//! - `ControlRegistry`: Index of controls with id/tag/severity selection
//! - `TransientScope`: Create-then-drop test objects for side-effecting controls
//! - `catalog`: The PostgreSQL 16 STIG controls and their default inputs

pub mod catalog;
pub mod control;
pub mod evaluation;
pub mod matcher;
pub mod registry;
pub mod transient;

pub use control::{
    execute, Applicability, Control, ControlContext, ControlMetadata, ControlTags,
};
pub use evaluation::{Evaluation, OneOf, Verdict};
pub use matcher::{evaluate, Expectation, MatchOutcome};
pub use registry::{ControlRegistry, Selection};
pub use transient::TransientScope;
