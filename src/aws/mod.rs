//! Thin wrapper over the `aws` command-line client.
//!
//! Every call goes through a [`CommandRunner`], so the same scripted runner
//! that fakes `ssh` and `rsync` in tests also fakes AWS. Calls are grouped
//! by service: [`ssm`] for remote PowerShell execution, [`s3`] for transfer
//! objects and [`ec2`] for instance discovery.

use std::ffi::OsString;
use std::time::Duration;

use thiserror::Error;

use crate::exec::{CommandOutput, CommandRunner, ExecError, Invocation};

pub mod ec2;
pub mod s3;
pub mod ssm;

pub use ssm::{CommandInvocation, InvocationStatus, RUN_POWERSHELL_DOCUMENT};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Region and credential profile applied to every call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AwsContext {
    /// AWS region, for example `us-east-1`.
    pub region: String,
    /// Named credential profile; the client default chain is used when
    /// `None`.
    pub profile: Option<String>,
}

/// `aws` CLI client bound to one region and profile.
#[derive(Clone, Debug)]
pub struct AwsCli<R: CommandRunner> {
    runner: R,
    bin: String,
    context: AwsContext,
    call_timeout: Duration,
    poll_interval: Duration,
}

impl<R: CommandRunner> AwsCli<R> {
    /// Creates a client that runs `bin` through `runner`.
    #[must_use]
    pub fn new(runner: R, bin: impl Into<String>, context: AwsContext) -> Self {
        Self {
            runner,
            bin: bin.into(),
            context,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the delay between SSM status polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Overrides the timeout of individual API calls.
    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Region and profile used by this client.
    #[must_use]
    pub const fn context(&self) -> &AwsContext {
        &self.context
    }

    fn invocation(&self, args: &[String]) -> Invocation {
        let mut argv: Vec<OsString> = args.iter().map(OsString::from).collect();
        argv.push(OsString::from("--region"));
        argv.push(OsString::from(&self.context.region));
        if let Some(profile) = &self.context.profile {
            argv.push(OsString::from("--profile"));
            argv.push(OsString::from(profile));
        }
        argv.push(OsString::from("--output"));
        argv.push(OsString::from("json"));
        Invocation::new(self.bin.clone(), argv, self.call_timeout)
    }

    /// Runs one call and returns its raw output regardless of exit status.
    fn call_raw(&self, args: &[String]) -> Result<CommandOutput, AwsError> {
        self.runner
            .run(&self.invocation(args))
            .map_err(AwsError::from)
    }

    /// Runs one call, failing on a non-zero exit status.
    fn call(&self, args: &[String]) -> Result<CommandOutput, AwsError> {
        let output = self.call_raw(args)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(self.failure(args, output))
    }

    /// Runs one call and parses its JSON output.
    fn call_json(&self, args: &[String]) -> Result<serde_json::Value, AwsError> {
        let output = self.call(args)?;
        parse_json(operation(args), &output.stdout)
    }

    fn failure(&self, args: &[String], output: CommandOutput) -> AwsError {
        AwsError::CommandFailure {
            program: format!("{} {}", self.bin, operation(args)),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr,
        }
    }
}

fn operation(args: &[String]) -> String {
    args.iter().take(2).cloned().collect::<Vec<_>>().join(" ")
}

fn parse_json(operation: String, stdout: &str) -> Result<serde_json::Value, AwsError> {
    serde_json::from_str(stdout).map_err(|err| AwsError::Parse {
        operation,
        message: err.to_string(),
    })
}

/// Errors surfaced by AWS calls.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AwsError {
    /// The `aws` process could not be run.
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// The `aws` process exited unsuccessfully.
    #[error("{program} failed with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program and operation that failed.
        program: String,
        /// Exit code, if any.
        status: Option<i32>,
        /// Human readable status.
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
    /// The response could not be understood.
    #[error("unexpected response from {operation}: {message}")]
    Parse {
        /// Operation whose response failed to parse.
        operation: String,
        /// Parser message.
        message: String,
    },
    /// A remote command outlived its deadline and was cancelled.
    #[error("remote command {command_id} timed out after {seconds}s")]
    Timeout {
        /// SSM command identifier.
        command_id: String,
        /// Timeout that was exceeded.
        seconds: u64,
    },
}

impl AwsError {
    /// Timeout in seconds when this error represents one.
    #[must_use]
    pub const fn timeout_seconds(&self) -> Option<u64> {
        match self {
            Self::Timeout { seconds, .. } | Self::Exec(ExecError::Timeout { seconds, .. }) => {
                Some(*seconds)
            }
            _ => None,
        }
    }
}
