//! pgstig - PostgreSQL STIG control evaluation
//!
//! Entry point for the `pgstig` binary. Exit status: 0 when no control failed or
//! errored, 100 when at least one did, 1 when the run itself could not complete.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pgstig_audit::{render, write_report, AuditOptions, Auditor, ReportFormat};
use pgstig_common::logging::{init_logging_with_config, LogConfig, LogFormat};
use pgstig_common::Config;
use pgstig_controls::{catalog, ControlContext, Selection};
use pgstig_core::{InputSource, InputStore, Severity, SslMode};
use pgstig_probes::{LocalCommandProbe, LocalFileProbe, PgSession, Probes};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info};

const EXIT_FINDINGS: u8 = 100;
const EXIT_ERROR: u8 = 1;

/// PostgreSQL STIG evaluation engine
#[derive(Parser, Debug)]
#[command(name = "pgstig")]
#[command(version)]
#[command(about = "Evaluate PostgreSQL STIG controls against a server", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "PGSTIG_CONFIG", default_value = "pgstig.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, json, compact)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate controls against a PostgreSQL server
    Run(RunArgs),
    /// List catalog controls
    List(SelectArgs),
}

#[derive(Args, Debug, Default)]
struct SelectArgs {
    /// Control id to evaluate (repeatable)
    #[arg(long = "control", value_name = "ID")]
    controls: Vec<String>,

    /// Only controls carrying this label or benchmark reference (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,

    /// Only controls at or above this severity (low, medium, high)
    #[arg(long)]
    min_severity: Option<Severity>,
}

impl SelectArgs {
    fn selection(&self) -> Selection {
        let mut selection = Selection::all().with_ids(self.controls.iter().cloned());
        for tag in &self.tags {
            selection = selection.with_tag(tag);
        }
        if let Some(severity) = self.min_severity {
            selection = selection.with_min_severity(severity);
        }
        selection
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Role used for probing
    #[arg(short = 'U', long)]
    user: Option<String>,

    /// Password (PGSTIG_PASSWORD or PGPASSWORD are preferred)
    #[arg(long)]
    password: Option<String>,

    /// Maintenance database
    #[arg(short = 'd', long)]
    database: Option<String>,

    /// TLS mode (disable, prefer, require, verify-ca, verify-full)
    #[arg(long)]
    ssl_mode: Option<SslMode>,

    /// YAML input file layered over the built-in defaults (repeatable)
    #[arg(long = "input-file", value_name = "PATH")]
    input_files: Vec<PathBuf>,

    /// Input override (repeatable)
    #[arg(long = "input", value_name = "NAME=VALUE")]
    inputs: Vec<String>,

    /// Report format
    #[arg(long, default_value = "text")]
    format: ReportFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Per-control timeout in seconds
    #[arg(long)]
    control_timeout: Option<u64>,

    /// Whole-run timeout in seconds (0 = unbounded)
    #[arg(long)]
    run_timeout: Option<u64>,

    /// Controls evaluated at once
    #[arg(long)]
    concurrency: Option<usize>,
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(ref host) = self.host {
            config.target.host = host.clone();
        }
        if let Some(port) = self.port {
            config.target.port = port;
        }
        if let Some(ref user) = self.user {
            config.target.user = user.clone();
        }
        if let Some(ref password) = self.password {
            config.target.password = Some(password.clone());
        }
        if let Some(ref database) = self.database {
            config.target.database = database.clone();
        }
        if let Some(mode) = self.ssl_mode {
            config.target.ssl_mode = mode;
        }
        if let Some(secs) = self.control_timeout {
            config.run.control_timeout_seconds = secs;
        }
        if let Some(secs) = self.run_timeout {
            config.run.run_timeout_seconds = secs;
        }
        if let Some(n) = self.concurrency {
            config.run.concurrency = n;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_found = cli.config.exists();
    let mut config = if config_found {
        Config::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        Config::default()
    }
    .merge_env();

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    let format = match cli.log_format {
        Some(format) => format,
        None => config.logging.format.parse().unwrap_or_default(),
    };
    init_logging_with_config(LogConfig::new().level(&config.logging.level).format(format));

    debug!(version = env!("CARGO_PKG_VERSION"), "pgstig starting");
    if !config_found {
        debug!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Command::Run(args) => run_audit(config, &args).await,
        Command::List(args) => list_controls(&args),
    }
}

async fn run_audit(mut config: Config, args: &RunArgs) -> Result<ExitCode> {
    args.apply(&mut config);
    let target = config.to_target();
    let inputs = load_inputs(&config, args)?;
    info!(target = %target.display(), inputs = inputs.len(), "Resolved run settings");

    let session = Arc::new(PgSession::new(target.clone(), config.run.connect_timeout()));
    session
        .ping()
        .await
        .with_context(|| format!("connecting to {}", target.display()))?;

    let probes = Probes::new(
        session.clone(),
        Arc::new(LocalFileProbe::new()),
        Arc::new(LocalCommandProbe::new()),
    );
    let context = ControlContext::new(target, Arc::new(inputs), probes);
    let auditor = Auditor::new(catalog::registry()?, context)
        .with_options(AuditOptions::from(&config.run));

    let report = auditor.run(&args.select.selection()).await;
    session.close().await;
    let report = report?;

    match args.output {
        Some(ref path) => write_report(&report, args.format, path)
            .with_context(|| format!("writing report to {}", path.display()))?,
        None => print!("{}", render(&report, args.format)?),
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FINDINGS)
    })
}

/// Built-in defaults, then input files (config first, then command line), then
/// inline config values, then `--input` overrides
fn load_inputs(config: &Config, args: &RunArgs) -> Result<InputStore> {
    let mut inputs = catalog::default_inputs()?;

    let files = config
        .inputs
        .files
        .iter()
        .map(PathBuf::from)
        .chain(args.input_files.iter().cloned());
    for path in files {
        load_input_file(&mut inputs, &path)?;
    }

    for (name, value) in &config.inputs.values {
        inputs.insert(name, value.clone(), InputSource::Profile);
    }

    for spec in &args.inputs {
        let (name, value) = InputStore::parse_override(spec)?;
        inputs.set_override(name, value);
    }

    Ok(inputs)
}

fn load_input_file(inputs: &mut InputStore, path: &Path) -> Result<()> {
    let count = inputs
        .load_file(path)
        .with_context(|| format!("loading input file {}", path.display()))?;
    debug!(path = %path.display(), count, "Loaded input file");
    Ok(())
}

fn list_controls(args: &SelectArgs) -> Result<ExitCode> {
    let registry = catalog::registry()?;
    let controls = registry.select(&args.selection())?;

    for control in &controls {
        let metadata = control.metadata();
        println!(
            "{:<10} {:<8} {:<24} {}",
            metadata.id,
            metadata.severity.category(),
            metadata.tags.labels.join(","),
            metadata.title
        );
    }
    println!("\n{} of {} controls", controls.len(), registry.len());

    Ok(ExitCode::SUCCESS)
}
