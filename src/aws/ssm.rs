//! Remote PowerShell execution through AWS Systems Manager.

use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::exec::{CommandOutput, CommandRunner};

use super::{AwsCli, AwsError, parse_json};

/// SSM document that runs a list of PowerShell lines.
pub const RUN_POWERSHELL_DOCUMENT: &str = "AWS-RunPowerShellScript";

const INVOCATION_MISSING: &str = "InvocationDoesNotExist";

/// Lifecycle state of one SSM command invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvocationStatus {
    /// Queued, delivered or running.
    Pending,
    /// Finished with exit code zero.
    Success,
    /// Finished with a non-zero exit code or could not run.
    Failed,
    /// Cancelled before finishing.
    Cancelled,
    /// Exceeded the document's execution timeout.
    TimedOut,
}

impl InvocationStatus {
    pub(crate) fn parse(status: &str) -> Self {
        match status {
            "Success" => Self::Success,
            "Failed" | "Undeliverable" | "Terminated" => Self::Failed,
            "Cancelled" => Self::Cancelled,
            "TimedOut" | "DeliveryTimedOut" | "ExecutionTimedOut" => Self::TimedOut,
            _ => Self::Pending,
        }
    }

    /// Returns `true` once the invocation will not change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InvocationResponse {
    status: String,
    response_code: Option<i32>,
    standard_output_content: String,
    standard_error_content: String,
}

/// Snapshot of an invocation returned by `get-command-invocation`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Current status.
    pub status: InvocationStatus,
    /// Output captured so far.
    pub output: CommandOutput,
}

impl<R: CommandRunner> AwsCli<R> {
    /// Sends `lines` to `instance_id` as one PowerShell script and returns
    /// the command ID.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError`] when the call fails or returns no command ID.
    pub fn send_command(
        &self,
        instance_id: &str,
        lines: &[String],
        timeout: Duration,
    ) -> Result<String, AwsError> {
        let parameters = serde_json::json!({
            "commands": lines,
            "executionTimeout": [timeout.as_secs().max(1).to_string()],
        });
        let args = vec![
            String::from("ssm"),
            String::from("send-command"),
            String::from("--instance-ids"),
            instance_id.to_owned(),
            String::from("--document-name"),
            String::from(RUN_POWERSHELL_DOCUMENT),
            String::from("--parameters"),
            parameters.to_string(),
        ];
        let response = self.call_json(&args)?;
        response
            .pointer("/Command/CommandId")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| AwsError::Parse {
                operation: String::from("ssm send-command"),
                message: String::from("response has no Command.CommandId"),
            })
    }

    /// Fetches the state of a command. `Ok(None)` means SSM has not
    /// registered the invocation yet.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError`] when the call fails for any other reason.
    pub fn command_invocation(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<Option<CommandInvocation>, AwsError> {
        let args = vec![
            String::from("ssm"),
            String::from("get-command-invocation"),
            String::from("--command-id"),
            command_id.to_owned(),
            String::from("--instance-id"),
            instance_id.to_owned(),
        ];
        let output = self.call_raw(&args)?;
        if !output.is_success() {
            if output.stderr.contains(INVOCATION_MISSING) {
                return Ok(None);
            }
            return Err(self.failure(&args, output));
        }

        let value = parse_json(String::from("ssm get-command-invocation"), &output.stdout)?;
        let response: InvocationResponse =
            serde_json::from_value(value).map_err(|err| AwsError::Parse {
                operation: String::from("ssm get-command-invocation"),
                message: err.to_string(),
            })?;
        Ok(Some(CommandInvocation {
            status: InvocationStatus::parse(&response.status),
            output: CommandOutput {
                code: response.response_code,
                stdout: response.standard_output_content,
                stderr: response.standard_error_content,
            },
        }))
    }

    /// Cancels a running command.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError`] when the call fails.
    pub fn cancel_command(&self, command_id: &str, instance_id: &str) -> Result<(), AwsError> {
        let args = vec![
            String::from("ssm"),
            String::from("cancel-command"),
            String::from("--command-id"),
            command_id.to_owned(),
            String::from("--instance-ids"),
            instance_id.to_owned(),
        ];
        self.call(&args).map(drop)
    }

    /// Runs `lines` on `instance_id` and blocks until the script finishes or
    /// `timeout` passes, cancelling it in the latter case.
    ///
    /// A script that runs to completion yields its output even when it
    /// failed; callers inspect the exit code.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError::Timeout`] when the deadline passes or SSM reports
    /// a timeout, and other [`AwsError`] variants when an API call fails.
    pub fn run_script(
        &self,
        instance_id: &str,
        lines: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, AwsError> {
        let command_id = self.send_command(instance_id, lines, timeout)?;
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if let Some(invocation) = self.command_invocation(&command_id, instance_id)?
                && invocation.status.is_terminal()
            {
                if invocation.status == InvocationStatus::TimedOut {
                    return Err(AwsError::Timeout {
                        command_id,
                        seconds: timeout.as_secs(),
                    });
                }
                return Ok(invocation.output);
            }

            if deadline.is_some_and(|limit| Instant::now() >= limit) {
                if let Err(err) = self.cancel_command(&command_id, instance_id) {
                    tracing::warn!(%command_id, instance_id, "failed to cancel command: {err}");
                }
                return Err(AwsError::Timeout {
                    command_id,
                    seconds: timeout.as_secs(),
                });
            }

            thread::sleep(self.poll_interval);
        }
    }
}
