//! Run coordinator - evaluates the selected controls in isolation and builds the report
//!
//! Each control runs in its own task so a panic or a hung probe only costs that
//! control. Controls start in id order; with `concurrency > 1` several run at once,
//! but controls that mutate the target always take a shared lock first.

use crate::report::{ControlReport, RunReport, RunSummary};
use chrono::Utc;
use pgstig_common::config::RunConfig;
use pgstig_controls::{
    execute, Control, ControlContext, ControlMetadata, ControlRegistry, Evaluation, Selection,
};
use pgstig_core::{Error, Outcome, Result};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const NOT_STARTED: &str = "not started before the run deadline";
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Limits and parallelism of a run
#[derive(Debug, Clone)]
pub struct AuditOptions {
    /// Upper bound for a single control
    pub control_timeout: Duration,
    /// Upper bound for the whole run; `None` is unbounded
    pub run_timeout: Option<Duration>,
    /// Controls evaluated at once (1 = sequential)
    pub concurrency: usize,
}

impl AuditOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self::from(&RunConfig::default())
    }
}

impl From<&RunConfig> for AuditOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            control_timeout: config.control_timeout(),
            run_timeout: config.run_timeout(),
            concurrency: config.concurrency.max(1),
        }
    }
}

enum Pending {
    Started(Box<ControlMetadata>, JoinHandle<ControlReport>),
    NotStarted(Arc<dyn Control>),
}

/// Evaluates controls of a registry against one target
pub struct Auditor {
    registry: ControlRegistry,
    context: ControlContext,
    options: AuditOptions,
}

impl Auditor {
    pub fn new(registry: ControlRegistry, context: ControlContext) -> Self {
        Self {
            registry,
            context,
            options: AuditOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AuditOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &ControlRegistry {
        &self.registry
    }

    /// Evaluate every selected control exactly once.
    ///
    /// Only selection errors (an unknown control id) fail the run; anything that goes
    /// wrong inside a control is recorded as that control's outcome.
    pub async fn run(&self, selection: &Selection) -> Result<RunReport> {
        let controls = self.registry.select(selection)?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let deadline = self.options.run_timeout.map(|t| Instant::now() + t);

        info!(
            %run_id,
            target = %self.context.target.display(),
            controls = controls.len(),
            concurrency = self.options.concurrency,
            "Starting audit run"
        );

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mutation_lock = Arc::new(Mutex::new(()));
        let mut pending = Vec::with_capacity(controls.len());

        for control in controls {
            let permit = match deadline {
                Some(deadline) => {
                    tokio::time::timeout_at(deadline, semaphore.clone().acquire_owned())
                        .await
                        .ok()
                }
                None => Some(semaphore.clone().acquire_owned().await),
            };
            let Some(Ok(permit)) = permit else {
                pending.push(Pending::NotStarted(control));
                continue;
            };

            let metadata = Box::new(control.metadata().clone());
            let context = self.context.clone();
            let lock = mutation_lock.clone();
            let control_timeout = self.options.control_timeout;
            let span = info_span!("control", id = %metadata.id);

            let handle = tokio::spawn(
                async move {
                    let _permit = permit;
                    let _guard = if control.mutates_target() {
                        Some(lock.lock_owned().await)
                    } else {
                        None
                    };
                    run_control(control, context, control_timeout, deadline).await
                }
                .instrument(span),
            );
            pending.push(Pending::Started(metadata, handle));
        }

        let mut reports = Vec::with_capacity(pending.len());
        for slot in pending {
            let report = match slot {
                Pending::Started(metadata, handle) => match handle.await {
                    Ok(report) => report,
                    Err(e) => {
                        error!(control = %metadata.id, error = %e, "Control task failed");
                        ControlReport::errored(&metadata, format!("control task failed: {}", e))
                    }
                },
                Pending::NotStarted(control) => {
                    warn!(control = control.id(), "Control not started before the run deadline");
                    ControlReport::errored(control.metadata(), NOT_STARTED)
                }
            };
            reports.push(report);
        }

        let inputs: BTreeMap<_, _> = self
            .context
            .inputs
            .names()
            .into_iter()
            .filter_map(|name| {
                let entry = self.context.inputs.entry(name)?;
                Some((name.to_string(), entry.clone()))
            })
            .collect();

        let summary = RunSummary::from_controls(&reports);
        info!(
            %run_id,
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            errored = summary.errored,
            manual_review = summary.manual_review,
            skipped = summary.skipped,
            "Audit run finished"
        );

        Ok(RunReport {
            run_id,
            target: self.context.target.display(),
            started_at,
            finished_at: Utc::now(),
            inputs,
            controls: reports,
            summary,
        })
    }
}

/// Evaluate one control in a child task bounded by the control timeout and the
/// time left before the run deadline
async fn run_control(
    control: Arc<dyn Control>,
    context: ControlContext,
    control_timeout: Duration,
    deadline: Option<Instant>,
) -> ControlReport {
    let metadata = control.metadata().clone();
    let limit = match deadline {
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Control not started before the run deadline");
                return ControlReport::errored(&metadata, NOT_STARTED);
            }
            control_timeout.min(remaining)
        }
        None => control_timeout,
    };

    debug!(mutates_target = control.mutates_target(), "Evaluating control");
    let started = Instant::now();
    let eval = Evaluation::new(metadata.id.as_str());
    let mut body_eval = eval.clone();
    let body_control = control.clone();
    let body_context = context.clone();
    let mut task = tokio::spawn(async move {
        let result = execute(body_control.as_ref(), &body_context, &mut body_eval).await;
        body_eval.finish(result)
    });

    let joined = tokio::time::timeout(limit, &mut task).await;
    let verdict = match joined {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(e)) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!(panic = %message, "Control panicked");
            drop_transient_objects(control.as_ref(), &context).await;
            eval.conclude(Some(format!("control panicked: {}", message)))
        }
        Ok(Err(e)) => {
            drop_transient_objects(control.as_ref(), &context).await;
            eval.conclude(Some(format!("control task failed: {}", e)))
        }
        Err(_) => {
            // Wait for the abort to land so the body cannot race the teardown
            task.abort();
            let _ = task.await;
            let timeout = Error::Timeout {
                operation: format!("control {}", metadata.id),
                millis: limit.as_millis() as u64,
            };
            warn!(error = %timeout, "Control abandoned");
            drop_transient_objects(control.as_ref(), &context).await;
            eval.conclude(Some(timeout.to_string()))
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    match verdict.outcome {
        Outcome::Errored => warn!(message = %verdict.message, duration_ms, "Control errored"),
        outcome => debug!(%outcome, duration_ms, "Control finished"),
    }
    ControlReport::from_verdict(&metadata, verdict, duration_ms)
}

/// Drop the objects of a side-effecting control whose body never reached its own
/// teardown. Failures are logged and never change the control's outcome.
async fn drop_transient_objects(control: &dyn Control, context: &ControlContext) {
    let Some(scope) = control.transient_objects() else {
        return;
    };
    let database = context.maintenance_db();
    let teardown = scope.teardown(context.probes.sql.as_ref(), &database);
    if tokio::time::timeout(TEARDOWN_TIMEOUT, teardown).await.is_err() {
        warn!(database = %database, "Timed out dropping transient objects");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic payload")
    }
}
