//! PostgreSQL session backed by sqlx
//!
//! One small pool per database, created on first use. Connection failures that a
//! control can reasonably expect (template databases that refuse connections, a
//! database dropped mid-run, a server still starting) surface as
//! [`QueryOutcome::Unavailable`] rather than errors.

use crate::sql::{QueryOutcome, QueryRows, ScriptOutcome, SqlSession, StatementResult};
use async_trait::async_trait;
use pgstig_core::{Error, Result, SslMode, Target};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Column, PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// SQLSTATE codes for connection refusals controls treat as a valid outcome
const ANTICIPATED_CODES: &[&str] = &[
    "3D000", // invalid_catalog_name: database does not exist
    "57P03", // cannot_connect_now: starting up or shutting down
];

/// How a connection attempt failed
#[derive(Debug, PartialEq, Eq)]
enum ConnectFailure {
    Unavailable(String),
    Connection(String),
    Unexpected(String),
}

fn ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

fn is_anticipated(code: Option<&str>, message: &str) -> bool {
    if let Some(code) = code {
        if ANTICIPATED_CODES.contains(&code) {
            return true;
        }
    }
    message.contains("is not currently accepting connections")
}

fn classify_connect(err: &sqlx::Error) -> ConnectFailure {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code();
            let message = db.message().to_string();
            if is_anticipated(code.as_deref(), &message) {
                ConnectFailure::Unavailable(message)
            } else {
                ConnectFailure::Connection(message)
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Protocol(_) => ConnectFailure::Connection(err.to_string()),
        other => ConnectFailure::Unexpected(other.to_string()),
    }
}

/// Render one cell as psql would in unaligned mode
fn cell_text(row: &PgRow, index: usize) -> std::result::Result<String, sqlx::Error> {
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return Ok(v.unwrap_or_default());
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return Ok(v.map(|b| if b { "t" } else { "f" }).unwrap_or_default().into());
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return Ok(v.map(|n| n.to_string()).unwrap_or_default());
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return Ok(v.map(|n| n.to_string()).unwrap_or_default());
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(index) {
        return Ok(v.map(|n| n.to_string()).unwrap_or_default());
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return Ok(v.map(|n| n.to_string()).unwrap_or_default());
    }
    // Report the text decode error; the statement should cast the column to text
    row.try_get::<Option<String>, _>(index)
        .map(|v| v.unwrap_or_default())
}

fn project(rows: &[PgRow]) -> std::result::Result<QueryRows, sqlx::Error> {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut projected = Vec::with_capacity(rows.len());
    for row in rows {
        let mut cells = Vec::with_capacity(row.len());
        for index in 0..row.len() {
            cells.push(cell_text(row, index)?);
        }
        projected.push(cells);
    }

    Ok(QueryRows::new(columns, projected))
}

/// Live SQL session against the audit target
pub struct PgSession {
    target: Target,
    connect_timeout: Duration,
    pools: Mutex<HashMap<String, Arc<OnceCell<PgPool>>>>,
}

impl PgSession {
    pub fn new(target: Target, connect_timeout: Duration) -> Self {
        Self {
            target,
            connect_timeout,
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn connect_options(&self, database: &str) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.target.host)
            .port(self.target.port)
            .username(&self.target.user)
            .database(database)
            .ssl_mode(ssl_mode(self.target.ssl_mode))
            .application_name("pgstig");

        if let Some(ref password) = self.target.password {
            options = options.password(password);
        }

        options
    }

    /// Get or create the pool for a database. The map lock is only held to find the
    /// database's cell; a failed connect leaves the cell empty for the next caller.
    async fn pool(&self, database: &str) -> std::result::Result<PgPool, ConnectFailure> {
        let cell = {
            let mut pools = self.pools.lock().await;
            pools.entry(database.to_string()).or_default().clone()
        };

        let pool = cell
            .get_or_try_init(|| async {
                debug!(database, host = %self.target.host, "Opening connection pool");
                PgPoolOptions::new()
                    .max_connections(2)
                    .acquire_timeout(self.connect_timeout)
                    .connect_with(self.connect_options(database))
                    .await
                    .map_err(|e| classify_connect(&e))
            })
            .await?;
        Ok(pool.clone())
    }

    fn connection_error(&self, database: &str, message: String) -> Error {
        Error::ProbeConnection {
            target: format!(
                "{}@{}:{}/{}",
                self.target.user, self.target.host, self.target.port, database
            ),
            message,
        }
    }

    /// Close every pool
    pub async fn close(&self) {
        let cells: Vec<_> = self.pools.lock().await.drain().collect();
        for (database, cell) in cells {
            if let Some(pool) = cell.get() {
                debug!(database = %database, "Closing connection pool");
                pool.close().await;
            }
        }
    }

    /// Verify the maintenance database is reachable
    pub async fn ping(&self) -> Result<String> {
        let database = self.target.database.clone();
        match self.query(&database, "SELECT version()", &[]).await? {
            QueryOutcome::Rows(rows) => {
                let version = rows.first_value().unwrap_or_default().to_string();
                info!(instance = %self.target, version = %version, "Connected to target");
                Ok(version)
            }
            QueryOutcome::Unavailable { message, .. } => {
                Err(self.connection_error(&database, message))
            }
        }
    }
}

#[async_trait]
impl SqlSession for PgSession {
    async fn query(
        &self,
        database: &str,
        statement: &str,
        params: &[&str],
    ) -> Result<QueryOutcome> {
        let pool = match self.pool(database).await {
            Ok(pool) => pool,
            Err(ConnectFailure::Unavailable(message)) => {
                debug!(database, message = %message, "Database unavailable");
                return Ok(QueryOutcome::Unavailable {
                    database: database.to_string(),
                    message,
                });
            }
            Err(ConnectFailure::Connection(message)) => {
                return Err(self.connection_error(database, message));
            }
            Err(ConnectFailure::Unexpected(message)) => {
                return Err(Error::probe("sql", message));
            }
        };

        debug!(database, statement, "Executing query");

        let mut query = sqlx::query(statement);
        for param in params {
            query = query.bind(*param);
        }

        let rows = query.fetch_all(&pool).await.map_err(|e| match e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                self.connection_error(database, e.to_string())
            }
            other => Error::probe("sql", other.to_string()),
        })?;

        let rows = project(&rows).map_err(|e| Error::probe("sql", e.to_string()))?;
        Ok(QueryOutcome::Rows(rows))
    }

    async fn script(&self, database: &str, statements: &[&str]) -> Result<ScriptOutcome> {
        let pool = self.pool(database).await.map_err(|failure| match failure {
            ConnectFailure::Unavailable(message) | ConnectFailure::Connection(message) => {
                self.connection_error(database, message)
            }
            ConnectFailure::Unexpected(message) => Error::probe("sql", message),
        })?;

        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| self.connection_error(database, e.to_string()))?;

        // The session may end under a different role; never hand it back to the pool
        conn.close_on_drop();

        let mut outcome = ScriptOutcome::default();
        for statement in statements {
            debug!(database, statement, "Executing script statement");

            let result = match sqlx::Executor::fetch_all(conn.as_mut(), sqlx::raw_sql(*statement)).await {
                Ok(rows) => project(&rows).map_err(|e| e.to_string()),
                Err(sqlx::Error::Database(db)) => Err(db.message().to_string()),
                Err(e @ (sqlx::Error::Io(_) | sqlx::Error::Protocol(_))) => {
                    warn!(database, error = %e, "Connection lost during script");
                    return Err(self.connection_error(database, e.to_string()));
                }
                Err(e) => Err(e.to_string()),
            };

            outcome.statements.push(StatementResult {
                statement: statement.to_string(),
                result,
            });
        }

        Ok(outcome)
    }
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession")
            .field("target", &self.target)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anticipated_failures() {
        assert!(is_anticipated(
            Some("55000"),
            "database \"template0\" is not currently accepting connections"
        ));
        assert!(is_anticipated(Some("3D000"), "database \"gone\" does not exist"));
        assert!(is_anticipated(Some("57P03"), "the database system is starting up"));
        assert!(!is_anticipated(
            Some("28P01"),
            "password authentication failed for user \"postgres\""
        ));
    }

    #[test]
    fn test_transport_errors_are_connection_failures() {
        let err = sqlx::Error::PoolTimedOut;
        assert!(matches!(classify_connect(&err), ConnectFailure::Connection(_)));

        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(matches!(classify_connect(&err), ConnectFailure::Connection(_)));
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_pool_unset() {
        let target = Target::new("127.0.0.1")
            .with_port(1)
            .with_ssl_mode(SslMode::Disable);
        let session = PgSession::new(target, Duration::from_secs(1));

        let err = session.ping().await.unwrap_err();
        assert!(err.is_connection(), "{}", err);
        {
            let pools = session.pools.lock().await;
            let cell = pools.get("postgres").unwrap();
            assert!(!cell.initialized());
        }

        // Another database is not blocked behind the failed one
        let other = session.query("app", "SELECT 1", &[]).await.unwrap_err();
        assert!(other.is_connection());
        assert_eq!(session.pools.lock().await.len(), 2);

        session.close().await;
        assert!(session.pools.lock().await.is_empty());
    }

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(ssl_mode(SslMode::VerifyFull), PgSslMode::VerifyFull));
        assert!(matches!(ssl_mode(SslMode::Prefer), PgSslMode::Prefer));
    }
}
