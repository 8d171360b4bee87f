//! pgstig Common - Shared utilities: logging and configuration
//!
//! This crate provides common functionality used by the pgstig binary and library crates.

pub mod config;
pub mod logging;

pub use config::{Config, ConfigBuilder};
pub use logging::init_logging;
