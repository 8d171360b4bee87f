//! In-memory probe implementations
//!
//! Used by control and coordinator tests; they answer from canned data and track the
//! roles, schemas and tables that scripts create so tests can assert cleanup.

use crate::command::{CommandOutput, CommandProbe};
use crate::file::{FileKind, FileProbe, FileStat};
use crate::sql::{QueryOutcome, QueryRows, ScriptOutcome, SqlSession, StatementResult};
use async_trait::async_trait;
use pgstig_core::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

fn normalize(statement: &str) -> String {
    statement.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
enum Canned {
    Rows(QueryRows),
    Error(String),
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResponseKey {
    database: Option<String>,
    statement: String,
    params: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
struct Denial {
    role: Option<String>,
    pattern: String,
    message: String,
}

#[derive(Debug, Default)]
struct FakeSqlState {
    responses: HashMap<ResponseKey, Canned>,
    unavailable: HashSet<String>,
    unreachable: bool,
    denials: Vec<Denial>,
    hung_scripts: Vec<String>,
    objects: BTreeSet<String>,
    executed: Vec<String>,
}

/// Scripted SQL session
#[derive(Debug, Default)]
pub struct FakeSql {
    state: Mutex<FakeSqlState>,
}

impl FakeSql {
    pub fn new() -> Self {
        Self::default()
    }

    fn respond(
        self,
        database: Option<&str>,
        statement: &str,
        params: Option<&[&str]>,
        canned: Canned,
    ) -> Self {
        let key = ResponseKey {
            database: database.map(String::from),
            statement: normalize(statement),
            params: params.map(|p| p.iter().map(|s| s.to_string()).collect()),
        };
        lock(&self.state).responses.insert(key, canned);
        self
    }

    /// Rows returned for a statement in any database
    pub fn with_rows(self, statement: &str, rows: QueryRows) -> Self {
        self.respond(None, statement, None, Canned::Rows(rows))
    }

    /// Rows returned for a statement in one database
    pub fn with_rows_in(self, database: &str, statement: &str, rows: QueryRows) -> Self {
        self.respond(Some(database), statement, None, Canned::Rows(rows))
    }

    /// Rows returned for a statement bound to specific parameters
    pub fn with_rows_for(self, statement: &str, params: &[&str], rows: QueryRows) -> Self {
        self.respond(None, statement, Some(params), Canned::Rows(rows))
    }

    /// Single-column rows
    pub fn with_values(self, statement: &str, values: &[&str]) -> Self {
        let rows = QueryRows::single_column("value", values.iter().copied());
        self.with_rows(statement, rows)
    }

    /// `current_setting($1)` style lookup of one setting
    pub fn with_setting(self, statement: &str, name: &str, value: &str) -> Self {
        self.with_rows_for(statement, &[name], QueryRows::scalar(name, value))
    }

    /// Statement fails with an unexpected server error
    pub fn with_error(self, statement: &str, message: &str) -> Self {
        self.respond(None, statement, None, Canned::Error(message.to_string()))
    }

    /// Statement never completes
    pub fn with_hang(self, statement: &str) -> Self {
        self.respond(None, statement, None, Canned::Hang)
    }

    /// Scripts with a statement containing `pattern` (case-insensitive) never complete
    pub fn with_script_hang(self, pattern: &str) -> Self {
        lock(&self.state).hung_scripts.push(pattern.to_lowercase());
        self
    }

    /// Database refuses connections (as template0 does)
    pub fn with_unavailable(self, database: &str) -> Self {
        lock(&self.state).unavailable.insert(database.to_string());
        self
    }

    /// The server cannot be reached at all
    pub fn unreachable(self) -> Self {
        lock(&self.state).unreachable = true;
        self
    }

    fn push_denial(self, role: Option<&str>, pattern: &str, message: &str) -> Self {
        lock(&self.state).denials.push(Denial {
            role: role.map(String::from),
            pattern: pattern.to_lowercase(),
            message: message.to_string(),
        });
        self
    }

    /// Script statements containing `pattern` (case-insensitive) fail with `message`
    pub fn deny(self, pattern: &str, message: &str) -> Self {
        self.push_denial(None, pattern, message)
    }

    /// Like [`FakeSql::deny`], but only after `SET ROLE role` in the same script
    pub fn deny_as(self, role: &str, pattern: &str, message: &str) -> Self {
        self.push_denial(Some(role), pattern, message)
    }

    /// Roles, schemas and tables created by scripts and not dropped yet
    pub fn residual_objects(&self) -> Vec<String> {
        lock(&self.state).objects.iter().cloned().collect()
    }

    /// Every statement executed, queries and script statements alike
    pub fn executed(&self) -> Vec<String> {
        lock(&self.state).executed.clone()
    }

    fn connection_error(database: &str) -> Error {
        Error::ProbeConnection {
            target: format!("fake/{}", database),
            message: "connection refused".into(),
        }
    }

    fn lookup(&self, database: &str, statement: &str, params: &[&str]) -> Option<Canned> {
        let state = lock(&self.state);
        let statement = normalize(statement);
        let params: Vec<String> = params.iter().map(|s| s.to_string()).collect();

        let candidates = [
            (Some(database.to_string()), Some(params.clone())),
            (None, Some(params)),
            (Some(database.to_string()), None),
            (None, None),
        ];

        candidates.into_iter().find_map(|(database, params)| {
            state
                .responses
                .get(&ResponseKey {
                    database,
                    statement: statement.clone(),
                    params,
                })
                .cloned()
        })
    }

    /// Apply DDL side effects to the tracked object set
    fn apply(objects: &mut BTreeSet<String>, statement: &str) -> std::result::Result<(), String> {
        let words: Vec<String> = statement
            .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
            .filter(|w| !w.is_empty())
            .map(|w| w.to_string())
            .collect();
        let upper: Vec<String> = words.iter().map(|w| w.to_uppercase()).collect();
        let upper: Vec<&str> = upper.iter().map(|s| s.as_str()).collect();

        match upper.as_slice() {
            ["CREATE", kind @ ("ROLE" | "USER" | "SCHEMA" | "TABLE"), ..] => {
                let kind = if *kind == "USER" { "ROLE" } else { *kind };
                let name = words.get(2).ok_or("syntax error")?;
                let key = format!("{} {}", kind.to_lowercase(), name.trim_matches('"'));
                if !objects.insert(key) {
                    return Err(format!("{} \"{}\" already exists", kind.to_lowercase(), name));
                }
                Ok(())
            }
            ["DROP", kind @ ("ROLE" | "USER" | "SCHEMA" | "TABLE"), rest @ ..] => {
                let kind = if *kind == "USER" { "ROLE" } else { *kind };
                let if_exists = rest.starts_with(&["IF", "EXISTS"]);
                let name_at = if if_exists { 4 } else { 2 };
                let name = words.get(name_at).ok_or("syntax error")?;
                let key = format!("{} {}", kind.to_lowercase(), name.trim_matches('"'));
                if !objects.remove(&key) && !if_exists {
                    return Err(format!("{} \"{}\" does not exist", kind.to_lowercase(), name));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SqlSession for FakeSql {
    async fn query(
        &self,
        database: &str,
        statement: &str,
        params: &[&str],
    ) -> Result<QueryOutcome> {
        {
            let mut state = lock(&self.state);
            state.executed.push(normalize(statement));
            if state.unreachable {
                return Err(Self::connection_error(database));
            }
            if state.unavailable.contains(database) {
                return Ok(QueryOutcome::Unavailable {
                    database: database.to_string(),
                    message: format!(
                        "FATAL:  database \"{}\" is not currently accepting connections",
                        database
                    ),
                });
            }
        }

        match self.lookup(database, statement, params) {
            Some(Canned::Rows(rows)) => Ok(QueryOutcome::Rows(rows)),
            Some(Canned::Error(message)) => Err(Error::probe("sql", message)),
            Some(Canned::Hang) => {
                futures::future::pending::<()>().await;
                Err(Error::Internal("pending future resolved".into()))
            }
            None => Err(Error::probe(
                "sql",
                format!("no canned response for: {}", normalize(statement)),
            )),
        }
    }

    async fn script(&self, database: &str, statements: &[&str]) -> Result<ScriptOutcome> {
        let hangs = {
            let state = lock(&self.state);
            statements.iter().any(|statement| {
                let lowered = statement.to_lowercase();
                state.hung_scripts.iter().any(|p| lowered.contains(p.as_str()))
            })
        };
        if hangs {
            futures::future::pending::<()>().await;
        }

        let mut state = lock(&self.state);
        if state.unreachable || state.unavailable.contains(database) {
            return Err(Self::connection_error(database));
        }

        let mut outcome = ScriptOutcome::default();
        let mut current_role: Option<String> = None;
        for statement in statements {
            let normalized = normalize(statement);
            state.executed.push(normalized.clone());

            let lowered = normalized.to_lowercase();
            if lowered == "reset role" {
                current_role = None;
            } else if let Some(role) = lowered.strip_prefix("set role ") {
                current_role = Some(role.trim_matches('"').to_string());
            }

            let denied = state
                .denials
                .iter()
                .find(|d| {
                    lowered.contains(d.pattern.as_str())
                        && (d.role.is_none() || d.role == current_role)
                })
                .map(|d| d.message.clone());

            let result = match denied {
                Some(message) => Err(message),
                None => Self::apply(&mut state.objects, &normalized).map(|_| QueryRows::default()),
            };

            outcome.statements.push(StatementResult {
                statement: normalized,
                result,
            });
        }

        Ok(outcome)
    }
}

#[derive(Debug, Clone)]
struct FakeEntry {
    stat: FileStat,
    content: Option<String>,
}

/// In-memory filesystem
#[derive(Debug, Default)]
pub struct FakeFiles {
    entries: Mutex<BTreeMap<String, FakeEntry>>,
}

impl FakeFiles {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(
        self,
        path: &str,
        kind: FileKind,
        owner: &str,
        group: &str,
        mode: u32,
        content: Option<String>,
    ) -> Self {
        let stat = FileStat {
            path: path.to_string(),
            exists: true,
            kind,
            owner: owner.to_string(),
            group: group.to_string(),
            mode,
        };
        lock(&self.entries).insert(path.to_string(), FakeEntry { stat, content });
        self
    }

    pub fn with_file(self, path: &str, content: &str, owner: &str, group: &str, mode: u32) -> Self {
        self.insert(path, FileKind::File, owner, group, mode, Some(content.to_string()))
    }

    pub fn with_dir(self, path: &str, owner: &str, group: &str, mode: u32) -> Self {
        self.insert(path, FileKind::Directory, owner, group, mode, None)
    }
}

#[async_trait]
impl FileProbe for FakeFiles {
    async fn stat(&self, path: &str) -> Result<FileStat> {
        Ok(lock(&self.entries)
            .get(path)
            .map(|e| e.stat.clone())
            .unwrap_or_else(|| FileStat::missing(path)))
    }

    async fn read(&self, path: &str) -> Result<String> {
        lock(&self.entries)
            .get(path)
            .and_then(|e| e.content.clone())
            .ok_or_else(|| Error::FileNotFound {
                path: path.to_string(),
            })
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let entries = lock(&self.entries);
        let is_dir = entries.get(dir).map(|e| e.stat.is_directory()).unwrap_or(false);
        if !is_dir {
            return Err(Error::FileNotFound {
                path: dir.to_string(),
            });
        }

        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(entries
            .iter()
            .filter(|(path, e)| path.starts_with(&prefix) && e.stat.is_file())
            .map(|(path, _)| path.clone())
            .collect())
    }
}

/// Canned command outputs keyed by the full command line
#[derive(Debug, Default)]
pub struct FakeCommands {
    outputs: Mutex<HashMap<String, CommandOutput>>,
}

impl FakeCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(self, argv: &[&str], output: CommandOutput) -> Self {
        lock(&self.outputs).insert(argv.join(" "), output);
        self
    }
}

#[async_trait]
impl CommandProbe for FakeCommands {
    async fn run(&self, argv: &[&str]) -> Result<CommandOutput> {
        let line = argv.join(" ");
        lock(&self.outputs)
            .get(&line)
            .cloned()
            .ok_or_else(|| Error::probe("command", format!("{}: not found", line)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_precedence() {
        let sql = FakeSql::new()
            .with_values("SELECT 1", &["any"])
            .with_rows_in("app", "SELECT   1", QueryRows::scalar("value", "app"));

        let rows = sql.query("app", "SELECT 1", &[]).await.unwrap().rows().unwrap();
        assert_eq!(rows.first_value(), Some("app"));
        let rows = sql.query("postgres", "SELECT 1", &[]).await.unwrap().rows().unwrap();
        assert_eq!(rows.first_value(), Some("any"));
    }

    #[tokio::test]
    async fn test_params_select_response() {
        let stmt = "SELECT current_setting($1)";
        let sql = FakeSql::new()
            .with_setting(stmt, "log_connections", "on")
            .with_setting(stmt, "ssl", "off");

        let ssl = sql.query("postgres", stmt, &["ssl"]).await.unwrap().rows().unwrap();
        assert_eq!(ssl.first_value(), Some("off"));
        assert!(sql.query("postgres", stmt, &["port"]).await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_and_unreachable() {
        let sql = FakeSql::new().with_unavailable("template0");
        let outcome = sql.query("template0", "SELECT 1", &[]).await.unwrap();
        assert!(outcome.is_unavailable());

        let sql = FakeSql::new().unreachable();
        let err = sql.query("postgres", "SELECT 1", &[]).await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_script_tracks_objects() {
        let sql = FakeSql::new().deny("create table", "permission denied for schema public");

        let outcome = sql
            .script(
                "postgres",
                &[
                    "CREATE ROLE bob",
                    "SET ROLE bob",
                    "CREATE TABLE t1(id int)",
                    "RESET ROLE",
                ],
            )
            .await
            .unwrap();
        assert_eq!(outcome.errors(), vec!["permission denied for schema public"]);
        assert_eq!(sql.residual_objects(), vec!["role bob"]);

        let outcome = sql
            .script("postgres", &["DROP TABLE IF EXISTS t1", "DROP ROLE bob", "DROP ROLE bob"])
            .await
            .unwrap();
        assert_eq!(outcome.errors(), vec!["role \"bob\" does not exist"]);
        assert!(sql.residual_objects().is_empty());
    }

    #[tokio::test]
    async fn test_role_scoped_denials() {
        let sql = FakeSql::new().deny_as(
            "bob",
            "test_schema",
            "permission denied for schema test_schema",
        );

        let outcome = sql
            .script(
                "postgres",
                &[
                    "CREATE SCHEMA test_schema",
                    "SET ROLE bob",
                    "SELECT * FROM test_schema.test_table",
                    "RESET ROLE",
                    "DROP SCHEMA test_schema",
                ],
            )
            .await
            .unwrap();
        assert_eq!(outcome.errors(), vec!["permission denied for schema test_schema"]);
        assert!(sql.residual_objects().is_empty());
    }

    #[tokio::test]
    async fn test_fake_files() {
        let files = FakeFiles::new()
            .with_dir("/var/lib/pgsql/data/log", "postgres", "postgres", 0o700)
            .with_file(
                "/var/lib/pgsql/data/log/postgresql.log",
                "AUDIT: SESSION",
                "postgres",
                "postgres",
                0o600,
            );

        let stat = files.stat("/var/lib/pgsql/data/log/postgresql.log").await.unwrap();
        assert_eq!(stat.mode_octal(), "0600");
        assert!(!files.stat("/etc/absent").await.unwrap().exists);
        assert_eq!(files.list_files("/var/lib/pgsql/data/log").await.unwrap().len(), 1);
        assert!(files.list_files("/nowhere").await.is_err());
    }
}
