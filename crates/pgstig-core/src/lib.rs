//! pgstig Core - Foundation types and error handling
//!
//! This crate provides the core abstractions used throughout the pgstig engine:
//! - `InputStore`: Layered, named configuration values consumed by controls
//! - `Value`: The typed value an input (or a probed fact) carries
//! - `Target`: Connection description of the PostgreSQL instance under audit
//! - `Outcome`, `AssertionStatus`, `AssertionResult`: Terminal states and evidence
//! - `Severity`: STIG severity categories

pub mod error;
pub mod input;
pub mod outcome;
pub mod severity;
pub mod target;
pub mod value;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use input::{InputSource, InputStore, ResolvedInput};
pub use outcome::{AssertionResult, AssertionStatus, MatcherKind, Outcome};
pub use severity::Severity;
pub use target::{SslMode, Target};
pub use value::Value;
