//! Audit target definition

use serde::{Deserialize, Serialize};

/// The PostgreSQL instance (and its host) under audit
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Database server hostname or socket directory
    pub host: String,
    /// Server port
    pub port: u16,
    /// Administrative role used for probing (the DBA)
    pub user: String,
    /// Password for the administrative role
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    /// Maintenance database used for cluster-wide queries
    pub database: String,
    /// TLS mode for the probe connection
    #[serde(default)]
    pub ssl_mode: SslMode,
}

impl Target {
    /// Create a target with default port, user and database
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 5432,
            user: String::from("postgres"),
            password: None,
            database: String::from("postgres"),
            ssl_mode: SslMode::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Get a display string for the target (never includes the password)
    pub fn display(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// TLS mode for the probe connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" | "verifyca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verifyfull" => Ok(SslMode::VerifyFull),
            other => Err(format!("unknown ssl mode: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_hides_password() {
        let target = Target::new("db.example.com")
            .with_port(5433)
            .with_password("hunter2");
        assert_eq!(target.display(), "postgres@db.example.com:5433/postgres");
        assert!(!format!("{:?}", target).contains("hunter2"));
    }

    #[test]
    fn test_password_not_serialized() {
        let target = Target::default().with_password("hunter2");
        let json = serde_json::to_string(&target).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_parse_ssl_mode() {
        assert_eq!("verify-full".parse::<SslMode>(), Ok(SslMode::VerifyFull));
        assert!("sometimes".parse::<SslMode>().is_err());
    }
}
