//! Transient database objects for side-effecting controls
//!
//! A scope creates fixed-name roles, schemas and tables, runs the control body and
//! drops everything again, in reverse order, whatever the body returned. Drops use
//! `IF EXISTS` and also run before setup, which clears objects left behind by a run
//! that was abandoned mid-control.

use pgstig_core::{Error, Result};
use pgstig_probes::SqlSession;
use std::future::Future;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct TransientScope {
    setup: Vec<String>,
    teardown: Vec<String>,
}

impl TransientScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(self, name: &str) -> Self {
        self.object(
            format!("CREATE ROLE {}", name),
            format!("DROP ROLE IF EXISTS {}", name),
        )
    }

    pub fn schema(self, name: &str) -> Self {
        self.object(
            format!("CREATE SCHEMA {}", name),
            format!("DROP SCHEMA IF EXISTS {}", name),
        )
    }

    /// `name` is schema qualified, `columns` the column list
    pub fn table(self, name: &str, columns: &str) -> Self {
        self.object(
            format!("CREATE TABLE {}({})", name, columns),
            format!("DROP TABLE IF EXISTS {}", name),
        )
    }

    /// Extra setup statement with nothing to undo (e.g. seeding a row)
    pub fn statement(mut self, sql: impl Into<String>) -> Self {
        self.setup.push(sql.into());
        self
    }

    /// Teardown statement for an object the body may create; runs before other drops
    pub fn cleanup(mut self, sql: impl Into<String>) -> Self {
        self.teardown.insert(0, sql.into());
        self
    }

    fn object(mut self, create: String, drop: String) -> Self {
        self.setup.push(create);
        self.teardown.insert(0, drop);
        self
    }

    pub fn setup_statements(&self) -> &[String] {
        &self.setup
    }

    pub fn teardown_statements(&self) -> &[String] {
        &self.teardown
    }

    /// Create the objects, await `body`, then drop the objects.
    ///
    /// A setup failure aborts before the body runs. Teardown failures are logged and
    /// never replace the body's result.
    pub async fn run<T, F>(&self, sql: &dyn SqlSession, database: &str, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        self.drop_all(sql, database, "stale").await;

        let setup: Vec<&str> = self.setup.iter().map(|s| s.as_str()).collect();
        let created = sql.script(database, &setup).await?;
        if !created.all_ok() {
            let message = created.error_text();
            self.drop_all(sql, database, "partial").await;
            return Err(Error::probe(
                "transient",
                format!("could not create test objects: {}", message),
            ));
        }
        debug!(objects = self.teardown.len(), "Created transient objects");

        let result = body.await;

        self.drop_all(sql, database, "cleanup").await;
        result
    }

    /// Drop the objects of a body that was abandoned (timed out or panicked)
    pub async fn teardown(&self, sql: &dyn SqlSession, database: &str) {
        self.drop_all(sql, database, "abandoned").await;
    }

    async fn drop_all(&self, sql: &dyn SqlSession, database: &str, phase: &str) {
        if self.teardown.is_empty() {
            return;
        }
        let teardown: Vec<&str> = self.teardown.iter().map(|s| s.as_str()).collect();
        match sql.script(database, &teardown).await {
            Ok(outcome) if outcome.all_ok() => {}
            Ok(outcome) => {
                warn!(phase, errors = %outcome.error_text(), "Failed to drop transient objects");
            }
            Err(e) => {
                warn!(phase, error = %e, "Failed to drop transient objects");
            }
        }
    }
}
