//! Error types for the pgstig engine

use thiserror::Error;

/// Result type alias using pgstig Error
pub type Result<T> = std::result::Result<T, Error>;

/// pgstig error types
#[derive(Error, Debug)]
pub enum Error {
    // === Input Errors ===
    #[error("Missing input: {name}")]
    MissingInput { name: String },

    #[error("Invalid input {name}: {message}")]
    InvalidInput { name: String, message: String },

    // === Probe Errors ===
    #[error("Connection to {target} failed: {message}")]
    ProbeConnection { target: String, message: String },

    #[error("Probe {probe} failed: {message}")]
    Probe { probe: String, message: String },

    #[error("Timed out after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    // === Catalog Errors ===
    #[error("Duplicate control identifier: {control_id}")]
    DuplicateControl { control_id: String },

    #[error("Control not found: {control_id}")]
    ControlNotFound { control_id: String },

    #[error("Invalid pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an unexpected probe failure
    pub fn probe(probe: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Probe {
            probe: probe.into(),
            message: message.into(),
        }
    }

    /// Whether the error means the target could not be reached at all
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::ProbeConnection { .. } | Error::Timeout { .. })
    }

    /// Get an error code for logging and reports
    pub fn code(&self) -> &'static str {
        match self {
            Error::MissingInput { .. } => "MISSING_INPUT",
            Error::InvalidInput { .. } => "INVALID_INPUT",
            Error::ProbeConnection { .. } => "PROBE_CONNECTION",
            Error::Probe { .. } => "PROBE_ERROR",
            Error::Timeout { .. } => "TIMEOUT",
            Error::DuplicateControl { .. } => "DUPLICATE_CONTROL",
            Error::ControlNotFound { .. } => "CONTROL_NOT_FOUND",
            Error::InvalidPattern { .. } => "INVALID_PATTERN",
            Error::Configuration(_) => "CONFIG_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::FileNotFound { .. } => "FILE_NOT_FOUND",
            Error::Json(_) => "JSON_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Error::MissingInput {
            name: "pg_owner".into(),
        };
        assert_eq!(err.code(), "MISSING_INPUT");
        assert_eq!(err.to_string(), "Missing input: pg_owner");
    }

    #[test]
    fn test_connection_classification() {
        let err = Error::ProbeConnection {
            target: "db.example.com:5432".into(),
            message: "connection refused".into(),
        };
        assert!(err.is_connection());
        assert!(!Error::probe("sql", "syntax error").is_connection());

        let timeout = Error::Timeout {
            operation: "control SV-261867".into(),
            millis: 50,
        };
        assert!(timeout.is_connection());
        assert_eq!(timeout.to_string(), "Timed out after 50ms: control SV-261867");
    }
}
