//! Remote command execution over SSH or AWS Systems Manager.
//!
//! [`RemoteCommandRunner::run`] executes one command against a
//! [`RemoteTarget`], enforces its timeout, and logs exactly one event
//! describing the outcome. Commands marked quiet log at `debug` only.

use std::time::Duration;

use crate::aws::{AwsCli, AwsContext};
use crate::config::AgentConfig;
use crate::events::{CommandReport, EventLogger, report_command};
use crate::exec::{CommandOutput, CommandRunner, Env, Invocation};

mod ssh;

pub use ssh::{SshHost, SshSettings, escape_command, expand_tilde, render_script};

/// An instance reachable through SSM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SsmInstance {
    /// EC2 instance ID.
    pub instance_id: String,
    /// Region and profile used to reach it.
    pub context: AwsContext,
}

/// Where a remote command runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RemoteTarget {
    /// A POSIX host reached with `ssh`.
    Ssh(SshHost),
    /// A Windows instance reached with `aws ssm send-command`.
    Ssm(SsmInstance),
}

/// Command lines executed as one remote script.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteCommand {
    /// Script lines, in order.
    pub lines: Vec<String>,
    /// Log at `debug` instead of emitting a job event.
    pub quiet: bool,
    /// Text logged in place of the script lines.
    pub summary: Option<String>,
}

impl RemoteCommand {
    /// A single-line command.
    #[must_use]
    pub fn line(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            quiet: false,
            summary: None,
        }
    }

    /// A multi-line script.
    #[must_use]
    pub const fn script(lines: Vec<String>) -> Self {
        Self {
            lines,
            quiet: false,
            summary: None,
        }
    }

    /// Suppresses the job event for this command.
    #[must_use]
    pub const fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Logs `summary` instead of the script, for scripts that embed
    /// secrets or bulky payloads.
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Command text as shown in logs. Environment values are never
    /// included.
    #[must_use]
    pub fn display(&self) -> String {
        self.summary
            .clone()
            .unwrap_or_else(|| self.lines.join("\n"))
    }
}

/// How a remote command ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RemoteOutcome {
    /// The command ran to completion.
    Completed(CommandOutput),
    /// The command was killed or cancelled after `seconds`.
    TimedOut {
        /// Timeout that was exceeded.
        seconds: u64,
    },
    /// The transport failed before the command could finish.
    Errored(String),
}

impl RemoteOutcome {
    /// Returns `true` when the command completed with exit code zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed(output) if output.is_success())
    }

    /// Standard output of a successful command.
    #[must_use]
    pub const fn success_stdout(&self) -> Option<&str> {
        match self {
            Self::Completed(output) if output.is_success() => Some(output.stdout.as_str()),
            _ => None,
        }
    }

    fn report(&self) -> CommandReport<'_> {
        match self {
            Self::Completed(output) => CommandReport::Completed(output),
            Self::TimedOut { seconds } => CommandReport::TimedOut { seconds: *seconds },
            Self::Errored(message) => CommandReport::Errored(message),
        }
    }
}

/// Executes commands on remote targets through a [`CommandRunner`].
pub struct RemoteCommandRunner<'a, R: CommandRunner> {
    runner: R,
    logger: &'a dyn EventLogger,
    ssh: SshSettings,
    aws_bin: String,
    call_timeout: Duration,
    poll_interval: Duration,
}

impl<'a, R: CommandRunner> RemoteCommandRunner<'a, R> {
    /// Creates a runner using the SSH and AWS settings in `config`.
    #[must_use]
    pub fn new(runner: R, logger: &'a dyn EventLogger, config: &AgentConfig) -> Self {
        Self {
            runner,
            logger,
            ssh: SshSettings::from_config(config),
            aws_bin: config.aws_bin.clone(),
            call_timeout: config.timeouts().internal,
            poll_interval: config.ssm_poll_interval(),
        }
    }

    /// Runs `command` on `target` and logs one event. Returns `true` only on
    /// exit code zero.
    #[must_use]
    pub fn run(
        &self,
        target: &RemoteTarget,
        command: &RemoteCommand,
        env: &Env,
        timeout: Duration,
        label: &str,
    ) -> bool {
        let outcome = self.execute(target, command, env, timeout);
        self.log(command, &outcome, label)
    }

    /// Runs `command` and returns its standard output on success, logging
    /// one event either way.
    #[must_use]
    pub fn capture(
        &self,
        target: &RemoteTarget,
        command: &RemoteCommand,
        env: &Env,
        timeout: Duration,
        label: &str,
    ) -> Option<String> {
        let outcome = self.execute(target, command, env, timeout);
        if !self.log(command, &outcome, label) {
            return None;
        }
        outcome.success_stdout().map(|stdout| stdout.trim().to_owned())
    }

    /// Runs `command` without logging.
    #[must_use]
    pub fn execute(
        &self,
        target: &RemoteTarget,
        command: &RemoteCommand,
        env: &Env,
        timeout: Duration,
    ) -> RemoteOutcome {
        match target {
            RemoteTarget::Ssh(host) => self.execute_ssh(host, command, env, timeout),
            RemoteTarget::Ssm(instance) => self.execute_ssm(instance, command, env, timeout),
        }
    }

    fn log(&self, command: &RemoteCommand, outcome: &RemoteOutcome, label: &str) -> bool {
        if command.quiet {
            tracing::debug!(label, command = %command.display(), ?outcome, "remote command finished");
            return outcome.is_success();
        }
        report_command(self.logger, label, &command.display(), outcome.report())
    }

    fn execute_ssh(
        &self,
        host: &SshHost,
        command: &RemoteCommand,
        env: &Env,
        timeout: Duration,
    ) -> RemoteOutcome {
        let script = render_script(&command.lines, env);
        let invocation = Invocation::new(
            self.ssh.ssh_bin.clone(),
            self.ssh.command_args(host, &script),
            timeout,
        );
        match self.runner.run(&invocation) {
            Ok(output) => RemoteOutcome::Completed(output),
            Err(err) if err.is_timeout() => RemoteOutcome::TimedOut {
                seconds: timeout.as_secs(),
            },
            Err(err) => RemoteOutcome::Errored(err.to_string()),
        }
    }

    fn execute_ssm(
        &self,
        instance: &SsmInstance,
        command: &RemoteCommand,
        env: &Env,
        timeout: Duration,
    ) -> RemoteOutcome {
        let aws = AwsCli::new(&self.runner, self.aws_bin.clone(), instance.context.clone())
            .with_call_timeout(self.call_timeout)
            .with_poll_interval(self.poll_interval);
        let mut lines = powershell_env_lines(env);
        lines.extend(command.lines.iter().cloned());
        match aws.run_script(&instance.instance_id, &lines, timeout) {
            Ok(output) => RemoteOutcome::Completed(output),
            Err(err) => err.timeout_seconds().map_or_else(
                || RemoteOutcome::Errored(err.to_string()),
                |seconds| RemoteOutcome::TimedOut { seconds },
            ),
        }
    }
}

/// Renders `$env:NAME = 'value'` assignments with PowerShell single-quote
/// escaping.
#[must_use]
pub fn powershell_env_lines(env: &Env) -> Vec<String> {
    env.iter()
        .map(|(key, value)| format!("$env:{key} = {}", powershell_quote(value)))
        .collect()
}

/// Wraps `value` in single quotes, doubling embedded quotes.
#[must_use]
pub fn powershell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests;
