//! pgstig Probes - capability interfaces for reading target state
//!
//! Each probe is a narrow async trait so that controls can be exercised against
//! in-memory fakes (see [`fake`]) as well as a live PostgreSQL host:
//! - `SqlSession`: parameterized queries and multi-statement scripts
//! - `FileProbe`: file/directory metadata and content
//! - `CommandProbe`: local process execution
//! - `HostAccessConfigProbe`: parsed pg_hba.conf records

pub mod command;
pub mod fake;
pub mod file;
pub mod hba;
pub mod postgres;
pub mod sql;

pub use command::{CommandOutput, CommandProbe, LocalCommandProbe};
pub use file::{FileKind, FileProbe, FileStat, LocalFileProbe};
pub use hba::{FileHbaProbe, HbaColumn, HbaFile, HbaRecord, HostAccessConfigProbe};
pub use postgres::PgSession;
pub use sql::{QueryOutcome, QueryRows, ScriptOutcome, SqlSession, StatementResult};

use std::sync::Arc;

/// The set of probes a control may use
#[derive(Clone)]
pub struct Probes {
    pub sql: Arc<dyn SqlSession>,
    pub files: Arc<dyn FileProbe>,
    pub commands: Arc<dyn CommandProbe>,
    pub hba: Arc<dyn HostAccessConfigProbe>,
}

impl Probes {
    /// Bundle probes; pg_hba.conf parsing reads through the given file probe
    pub fn new(
        sql: Arc<dyn SqlSession>,
        files: Arc<dyn FileProbe>,
        commands: Arc<dyn CommandProbe>,
    ) -> Self {
        let hba = Arc::new(FileHbaProbe::new(files.clone()));
        Self {
            sql,
            files,
            commands,
            hba,
        }
    }

    /// Replace the pg_hba.conf probe
    pub fn with_hba(mut self, hba: Arc<dyn HostAccessConfigProbe>) -> Self {
        self.hba = hba;
        self
    }
}

impl std::fmt::Debug for Probes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probes").finish_non_exhaustive()
    }
}
