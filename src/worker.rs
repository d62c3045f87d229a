//! Worker dispatch: one child process per waiting job.
//!
//! Children are started for every waiting job before any of them is waited
//! on, so jobs run concurrently while sharing no in-process state.

use std::ffi::OsString;
use std::process::{Child, Command, Stdio};

use crate::job::{JobResolver, ResolveError, WaitingJob};

/// How one child process ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobOutcome {
    /// The job the child ran.
    pub job: WaitingJob,
    /// Exit code, or `None` when the child could not be started or was
    /// killed by a signal.
    pub code: Option<i32>,
}

impl JobOutcome {
    /// Returns `true` when the child exited with code zero.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Starts `<program> <kind> <id>` for every waiting job.
pub struct Worker<'a> {
    resolver: &'a dyn JobResolver,
    program: OsString,
    leading_args: Vec<OsString>,
}

impl<'a> Worker<'a> {
    /// Creates a worker that launches `program` for each job.
    #[must_use]
    pub fn new(resolver: &'a dyn JobResolver, program: impl Into<OsString>) -> Self {
        Self {
            resolver,
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments passed to every child before the job kind and ID.
    #[must_use]
    pub fn with_leading_args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Runs every waiting job and waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when waiting jobs cannot be listed.
    pub fn run(&self) -> Result<Vec<JobOutcome>, ResolveError> {
        let jobs = self.resolver.waiting()?;
        tracing::info!(count = jobs.len(), "dispatching waiting jobs");

        let started: Vec<(WaitingJob, Option<Child>)> = jobs
            .into_iter()
            .map(|job| {
                let child = self.spawn(&job);
                (job, child)
            })
            .collect();

        Ok(started
            .into_iter()
            .map(|(job, child)| {
                let code = child.and_then(|running| wait(&job, running));
                if code == Some(0) {
                    tracing::info!(kind = %job.kind, id = %job.id, "job finished");
                } else {
                    tracing::warn!(kind = %job.kind, id = %job.id, ?code, "job failed");
                }
                JobOutcome { job, code }
            })
            .collect())
    }

    fn spawn(&self, job: &WaitingJob) -> Option<Child> {
        let spawned = Command::new(&self.program)
            .args(&self.leading_args)
            .arg(job.kind.as_str())
            .arg(&job.id)
            .stdin(Stdio::null())
            .spawn();
        match spawned {
            Ok(child) => {
                tracing::debug!(kind = %job.kind, id = %job.id, pid = child.id(), "started job");
                Some(child)
            }
            Err(err) => {
                tracing::error!(kind = %job.kind, id = %job.id, "failed to start job: {err}");
                None
            }
        }
    }
}

fn wait(job: &WaitingJob, mut child: Child) -> Option<i32> {
    match child.wait() {
        Ok(status) => status.code(),
        Err(err) => {
            tracing::error!(kind = %job.kind, id = %job.id, "failed to wait for job: {err}");
            None
        }
    }
}
