//! Local command execution probe

use async_trait::async_trait;
use pgstig_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Non-empty stdout lines, trimmed
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Runs programs on the target host
#[async_trait]
pub trait CommandProbe: Send + Sync {
    /// Run `argv[0]` with the remaining arguments; no shell is involved.
    /// A non-zero exit is reported in the output, not as an error.
    async fn run(&self, argv: &[&str]) -> Result<CommandOutput>;
}

/// Probe that spawns local processes
#[derive(Debug, Clone, Default)]
pub struct LocalCommandProbe;

impl LocalCommandProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandProbe for LocalCommandProbe {
    async fn run(&self, argv: &[&str]) -> Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::probe("command", "empty command line"))?;

        debug!(command = %argv.join(" "), "Running command");

        // Abandoned (timed out) controls must not leave children behind
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::probe("command", format!("{}: {}", program, e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}
