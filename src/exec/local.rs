//! Logged execution of commands on the agent host itself.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8Path;

use crate::events::{EventContext, EventLogger, report_exec};

use super::sanitize::{sanitize_command, validate_tokens};
use super::types::{CommandRunner, Env, Invocation};

/// Runs local subprocesses for build, pack and unpack stages, emitting one
/// event per command.
pub struct LocalRunner<'a, R: CommandRunner> {
    runner: R,
    logger: &'a dyn EventLogger,
}

impl<'a, R: CommandRunner> LocalRunner<'a, R> {
    /// Creates a runner that reports through `logger`.
    #[must_use]
    pub const fn new(runner: R, logger: &'a dyn EventLogger) -> Self {
        Self { runner, logger }
    }

    /// Sanitises a configured command string and runs it without a shell.
    ///
    /// Returns `true` only when the command exits with status zero. Tokens
    /// carrying control characters are refused without spawning anything.
    #[must_use]
    pub fn run(
        &self,
        command: &str,
        cwd: &Utf8Path,
        env: &Env,
        timeout: Duration,
        label: &str,
    ) -> bool {
        let tokens = sanitize_command(command);
        if let Err(err) = validate_tokens(&tokens) {
            self.logger.failure(
                label,
                &EventContext::new()
                    .with("command", command)
                    .with("error", err.to_string()),
            );
            return false;
        }
        self.run_tokens(&tokens, Some(cwd), env, timeout, label)
    }

    /// Runs an already tokenised command.
    ///
    /// Returns `true` only when the command exits with status zero.
    #[must_use]
    pub fn run_tokens(
        &self,
        tokens: &[String],
        cwd: Option<&Utf8Path>,
        env: &Env,
        timeout: Duration,
        label: &str,
    ) -> bool {
        let Some((program, args)) = tokens.split_first() else {
            self.logger.failure(
                label,
                &EventContext::new().with("error", "command is empty"),
            );
            return false;
        };

        let mut invocation = Invocation::new(
            program.clone(),
            args.iter().map(OsString::from).collect(),
            timeout,
        )
        .with_env(env.clone());
        if let Some(dir) = cwd {
            invocation = invocation.in_dir(dir);
        }

        let result = self.runner.run(&invocation);
        report_exec(self.logger, label, &invocation.command_line(), &result)
    }
}
