//! Configuration management for pgstig
//!
//! Resolution order: TOML file, then `PGSTIG_*` environment variables, then CLI flags
//! (applied by the binary).

use pgstig_core::{Error, Result, SslMode, Target, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database target settings
    #[serde(default)]
    pub target: TargetConfig,

    /// Run coordinator settings
    #[serde(default)]
    pub run: RunConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Input layers
    #[serde(default)]
    pub inputs: InputsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Create a configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Merge with environment variables (PGSTIG_ prefix, PGPASSWORD as fallback)
    pub fn merge_env(self) -> Self {
        self.merge_vars(|key| std::env::var(key).ok())
    }

    fn merge_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        // Target settings
        if let Some(val) = var("PGSTIG_HOST") {
            self.target.host = val;
        }
        if let Some(port) = var("PGSTIG_PORT").and_then(|v| v.parse().ok()) {
            self.target.port = port;
        }
        if let Some(val) = var("PGSTIG_USER") {
            self.target.user = val;
        }
        if let Some(val) = var("PGSTIG_PASSWORD").or_else(|| var("PGPASSWORD")) {
            self.target.password = Some(val);
        }
        if let Some(val) = var("PGSTIG_DATABASE") {
            self.target.database = val;
        }
        if let Some(mode) = var("PGSTIG_SSL_MODE").and_then(|v| v.parse().ok()) {
            self.target.ssl_mode = mode;
        }

        // Run settings
        if let Some(secs) = var("PGSTIG_CONTROL_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.run.control_timeout_seconds = secs;
        }
        if let Some(n) = var("PGSTIG_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.run.concurrency = n;
        }

        // Logging
        if let Some(val) = var("PGSTIG_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = var("PGSTIG_LOG_FORMAT") {
            self.logging.format = val;
        }

        self
    }

    /// Build the audit target from the target section
    pub fn to_target(&self) -> Target {
        let mut target = Target::new(&self.target.host)
            .with_port(self.target.port)
            .with_user(&self.target.user)
            .with_database(&self.target.database)
            .with_ssl_mode(self.target.ssl_mode);
        target.password = self.target.password.clone();
        target
    }
}

/// Database target configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Server host
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Administrative role used for probing
    #[serde(default = "default_user")]
    pub user: String,

    /// Password (prefer PGSTIG_PASSWORD / PGPASSWORD over storing it here)
    pub password: Option<String>,

    /// Maintenance database
    #[serde(default = "default_database")]
    pub database: String,

    /// TLS mode
    #[serde(default)]
    pub ssl_mode: SslMode,
}

fn default_host() -> String {
    String::from("localhost")
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    String::from("postgres")
}

fn default_database() -> String {
    String::from("postgres")
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: None,
            database: default_database(),
            ssl_mode: SslMode::default(),
        }
    }
}

/// Run coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Per-control timeout in seconds
    #[serde(default = "default_control_timeout")]
    pub control_timeout_seconds: u64,

    /// Whole-run timeout in seconds (0 = unbounded)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,

    /// Maximum controls evaluated at once (1 = sequential)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Connection acquire timeout for SQL probes, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_control_timeout() -> u64 {
    60
}

fn default_run_timeout() -> u64 {
    1800
}

fn default_concurrency() -> usize {
    1
}

fn default_connect_timeout() -> u64 {
    10
}

impl RunConfig {
    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_seconds.max(1))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_seconds > 0).then(|| Duration::from_secs(self.run_timeout_seconds))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds.max(1))
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            control_timeout_seconds: default_control_timeout(),
            run_timeout_seconds: default_run_timeout(),
            concurrency: default_concurrency(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    String::from("warn")
}

fn default_log_format() -> String {
    String::from("pretty")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Input layer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputsConfig {
    /// Input files layered over the built-in defaults, in order
    #[serde(default)]
    pub files: Vec<String>,

    /// Inline values, applied after the files
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

/// Builder for constructing Config
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.target.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.target.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.target.user = user.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.target.database = database.into();
        self
    }

    pub fn control_timeout(mut self, seconds: u64) -> Self {
        self.config.run.control_timeout_seconds = seconds;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.run.concurrency = n;
        self
    }

    pub fn input_file(mut self, path: impl Into<String>) -> Self {
        self.config.inputs.files.push(path.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [target]
            host = "db.example.com"
            port = 5433
            ssl_mode = "verify-full"

            [run]
            control_timeout_seconds = 30
            concurrency = 4

            [logging]
            level = "debug"
            format = "json"

            [inputs]
            files = ["/etc/pgstig/site.yml"]

            [inputs.values]
            pg_owner = "pgadmin"
            approved_auth_methods = ["cert", "gss"]
            windows_runner = false
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.target.host, "db.example.com");
        assert_eq!(config.target.port, 5433);
        assert_eq!(config.target.user, "postgres");
        assert_eq!(config.target.ssl_mode, SslMode::VerifyFull);
        assert_eq!(config.run.control_timeout(), Duration::from_secs(30));
        assert_eq!(config.run.concurrency, 4);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.inputs.files, vec!["/etc/pgstig/site.yml"]);
        assert_eq!(
            config.inputs.values.get("approved_auth_methods"),
            Some(&Value::from(vec!["cert", "gss"]))
        );
        assert_eq!(
            config.inputs.values.get("windows_runner"),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgstig.toml");
        std::fs::write(&path, "[run]\nrun_timeout_seconds = 0\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.run.run_timeout(), None);
        assert_eq!(config.target.host, "localhost");

        let err = Config::from_file(dir.path().join("missing.toml")).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml("[target\nhost=").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_merge_vars() {
        let vars: HashMap<&str, &str> = [
            ("PGSTIG_HOST", "10.0.0.5"),
            ("PGSTIG_PORT", "not-a-port"),
            ("PGPASSWORD", "s3cret"),
            ("PGSTIG_CONCURRENCY", "2"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().merge_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.target.host, "10.0.0.5");
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.password.as_deref(), Some("s3cret"));
        assert_eq!(config.run.concurrency, 2);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .host("pg.internal")
            .port(6543)
            .database("app")
            .control_timeout(5)
            .input_file("/etc/pgstig/site.yml")
            .log_level("info")
            .build();

        let target = config.to_target();
        assert_eq!(target.display(), "postgres@pg.internal:6543/app");
        assert_eq!(config.run.control_timeout(), Duration::from_secs(5));
        assert_eq!(config.run.run_timeout(), Some(Duration::from_secs(1800)));
        assert_eq!(config.inputs.files, vec!["/etc/pgstig/site.yml"]);
    }
}
