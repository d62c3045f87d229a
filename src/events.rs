//! Structured job events.
//!
//! Every logical step of a job reports exactly one event through an
//! [`EventLogger`]. The production logger forwards to `tracing`; tests use
//! [`crate::test_support::RecordingLogger`].

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;

use crate::exec::{CommandOutput, ExecError};

/// Severity of a job event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    /// Progress information.
    Info,
    /// A step completed successfully.
    Success,
    /// A step failed.
    Failure,
}

/// Coarse job stage, consumed by the logging collaborator.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Stage {
    /// Resolution, fetching and preparation.
    #[default]
    Start,
    /// Build commands are running.
    Building,
    /// Deployment commands are running.
    Deploying,
    /// Packing and teardown.
    End,
}

impl Stage {
    /// Stable lowercase name used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Building => "building",
            Self::Deploying => "deploying",
            Self::End => "end",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key/value context attached to an event.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EventContext(BTreeMap<String, String>);

impl EventContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a context entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the value recorded for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns `true` when no entries were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{key}={value:?}")?;
        }
        Ok(())
    }
}

/// Sink for job events.
pub trait EventLogger {
    /// Records one event.
    fn event(&self, level: Level, message: &str, context: &EventContext);

    /// Records an informational event.
    fn info(&self, message: &str, context: &EventContext) {
        self.event(Level::Info, message, context);
    }

    /// Records a success event.
    fn success(&self, message: &str, context: &EventContext) {
        self.event(Level::Success, message, context);
    }

    /// Records a failure event.
    fn failure(&self, message: &str, context: &EventContext) {
        self.event(Level::Failure, message, context);
    }

    /// Moves the job to a new stage.
    fn set_stage(&self, stage: Stage);
}

/// Event logger that forwards to `tracing`, tagging every record with the
/// job ID and current stage.
#[derive(Debug)]
pub struct TracingEventLogger {
    job_id: String,
    stage: Cell<Stage>,
}

impl TracingEventLogger {
    /// Creates a logger for `job_id`.
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            stage: Cell::new(Stage::Start),
        }
    }

    /// Returns the current stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage.get()
    }
}

impl EventLogger for TracingEventLogger {
    fn event(&self, level: Level, message: &str, context: &EventContext) {
        let stage = self.stage.get().as_str();
        let job = self.job_id.as_str();
        match level {
            Level::Info => tracing::info!(job, stage, %context, "{message}"),
            Level::Success => {
                tracing::info!(job, stage, outcome = "success", %context, "{message}");
            }
            Level::Failure => {
                tracing::error!(job, stage, outcome = "failure", %context, "{message}");
            }
        }
    }

    fn set_stage(&self, stage: Stage) {
        tracing::debug!(job = %self.job_id, from = %self.stage.get(), to = %stage, "stage changed");
        self.stage.set(stage);
    }
}

/// How a single command ended, ready to be reported.
#[derive(Clone, Copy)]
pub enum CommandReport<'r> {
    /// The command ran to completion with the given output.
    Completed(&'r CommandOutput),
    /// The command was killed or cancelled after `seconds`.
    TimedOut {
        /// Timeout that was exceeded.
        seconds: u64,
    },
    /// The command could not be run at all.
    Errored(&'r dyn fmt::Display),
}

impl fmt::Debug for CommandReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(output) => f.debug_tuple("Completed").field(output).finish(),
            Self::TimedOut { seconds } => f
                .debug_struct("TimedOut")
                .field("seconds", seconds)
                .finish(),
            Self::Errored(error) => write!(f, "Errored({error})"),
        }
    }
}

impl<'r> From<&'r Result<CommandOutput, ExecError>> for CommandReport<'r> {
    fn from(result: &'r Result<CommandOutput, ExecError>) -> Self {
        match result {
            Ok(output) => Self::Completed(output),
            Err(ExecError::Timeout { seconds, .. }) => Self::TimedOut { seconds: *seconds },
            Err(err) => Self::Errored(err),
        }
    }
}

/// Logs exactly one event for a finished command and returns whether it
/// succeeded.
///
/// A timeout is reported with its own message so operators can tell it
/// apart from a non-zero exit, though both count as a failed step.
pub fn report_command(
    logger: &dyn EventLogger,
    label: &str,
    command: &str,
    report: CommandReport<'_>,
) -> bool {
    let context = EventContext::new().with("command", command);
    match report {
        CommandReport::Completed(output) if output.is_success() => {
            logger.success(label, &context.with("output", output.stdout.as_str()));
            true
        }
        CommandReport::Completed(output) => {
            logger.failure(
                label,
                &context
                    .with("output", output.stdout.as_str())
                    .with("errors", output.stderr.as_str())
                    .with("exit_code", output.status_text()),
            );
            false
        }
        CommandReport::TimedOut { seconds } => {
            logger.failure(
                &format!("{label} timed out after {seconds} seconds"),
                &context.with("timeout", seconds.to_string()),
            );
            false
        }
        CommandReport::Errored(error) => {
            logger.failure(label, &context.with("error", error.to_string()));
            false
        }
    }
}

/// Convenience wrapper over [`report_command`] for local runner results.
pub fn report_exec(
    logger: &dyn EventLogger,
    label: &str,
    command: &str,
    result: &Result<CommandOutput, ExecError>,
) -> bool {
    report_command(logger, label, command, CommandReport::from(result))
}
