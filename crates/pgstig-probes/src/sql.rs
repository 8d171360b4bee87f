//! SQL session capability
//!
//! Query results are projected to text the way `psql -A -t` prints them, since most
//! controls compare rendered values against expected strings or patterns.

use async_trait::async_trait;
use pgstig_core::Result;
use serde::{Deserialize, Serialize};

/// Rows returned by a query, every cell rendered as text (NULL is the empty string)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryRows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    /// Single-column result from plain values
    pub fn single_column<I, S>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: vec![column.to_string()],
            rows: values.into_iter().map(|v| vec![v.into()]).collect(),
        }
    }

    /// Single row, single column
    pub fn scalar(column: &str, value: impl Into<String>) -> Self {
        Self::single_column(column, [value])
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Each row with its columns joined by `|`
    pub fn lines(&self) -> Vec<String> {
        self.rows.iter().map(|row| row.join("|")).collect()
    }

    /// Whole result as psql unaligned tuples-only output
    pub fn output(&self) -> String {
        self.lines().join("\n")
    }

    /// First cell of the first row
    pub fn first_value(&self) -> Option<&str> {
        self.rows
            .first()
            .and_then(|row| row.first())
            .map(|s| s.as_str())
    }

    /// All values of one column, by position
    pub fn column(&self, index: usize) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(index).cloned())
            .collect()
    }

    /// All values of one column, by name
    pub fn column_named(&self, name: &str) -> Vec<String> {
        match self.columns.iter().position(|c| c == name) {
            Some(index) => self.column(index),
            None => Vec::new(),
        }
    }
}

/// Result of a query: rows, or a database that legitimately could not be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Rows(QueryRows),
    /// The database refused connections for an anticipated reason
    /// (not accepting connections, does not exist, starting up)
    Unavailable { database: String, message: String },
}

impl QueryOutcome {
    pub fn rows(self) -> Option<QueryRows> {
        match self {
            QueryOutcome::Rows(rows) => Some(rows),
            QueryOutcome::Unavailable { .. } => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, QueryOutcome::Unavailable { .. })
    }
}

/// Result of one statement in a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementResult {
    pub statement: String,
    /// Rows on success, server error text on failure
    pub result: std::result::Result<QueryRows, String>,
}

impl StatementResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.result.as_ref().err().map(|e| e.as_str())
    }
}

/// Results of a script, one entry per statement in submission order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutcome {
    pub statements: Vec<StatementResult>,
}

impl ScriptOutcome {
    /// Error messages of every failed statement
    pub fn errors(&self) -> Vec<&str> {
        self.statements.iter().filter_map(|s| s.error()).collect()
    }

    /// All error text, newline separated (what psql prints on stderr)
    pub fn error_text(&self) -> String {
        self.errors().join("\n")
    }

    pub fn all_ok(&self) -> bool {
        self.statements.iter().all(|s| s.is_ok())
    }
}

/// Executes SQL against the target cluster
#[async_trait]
pub trait SqlSession: Send + Sync {
    /// Run one parameterized statement against a database.
    ///
    /// Parameters bind as text to `$1`, `$2`, ... placeholders. Never retries.
    async fn query(&self, database: &str, statement: &str, params: &[&str])
        -> Result<QueryOutcome>;

    /// Run statements in order on a single connection, recording each statement's
    /// error instead of stopping. Session state (`SET ROLE`) carries between
    /// statements and is discarded afterwards.
    async fn script(&self, database: &str, statements: &[&str]) -> Result<ScriptOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles() -> QueryRows {
        QueryRows::new(
            vec!["rolname".into(), "rolsuper".into()],
            vec![
                vec!["postgres".into(), "t".into()],
                vec!["alice".into(), "f".into()],
            ],
        )
    }

    #[test]
    fn test_psql_rendering() {
        let rows = roles();
        assert_eq!(rows.lines(), vec!["postgres|t", "alice|f"]);
        assert_eq!(rows.output(), "postgres|t\nalice|f");
        assert_eq!(rows.first_value(), Some("postgres"));
        assert_eq!(rows.column_named("rolsuper"), vec!["t", "f"]);
        assert!(rows.column_named("missing").is_empty());
    }

    #[test]
    fn test_empty_rows() {
        let rows = QueryRows::default();
        assert_eq!(rows.output(), "");
        assert_eq!(rows.first_value(), None);
    }

    #[test]
    fn test_script_errors() {
        let outcome = ScriptOutcome {
            statements: vec![
                StatementResult {
                    statement: "SET ROLE bob".into(),
                    result: Ok(QueryRows::default()),
                },
                StatementResult {
                    statement: "CREATE TABLE t(id int)".into(),
                    result: Err("permission denied for schema public".into()),
                },
            ],
        };
        assert!(!outcome.all_ok());
        assert_eq!(outcome.error_text(), "permission denied for schema public");
    }
}
