//! Core execution types and the command runner abstraction.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Environment variables injected into a command, ordered by name.
pub type Env = BTreeMap<String, String>;

/// A fully described process launch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Invocation {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables layered over the inherited environment.
    pub env: Env,
    /// Working directory; inherits the agent's when `None`.
    pub cwd: Option<Utf8PathBuf>,
    /// Upper bound on the runtime of the process.
    pub timeout: Duration,
}

impl Invocation {
    /// Creates an invocation with no extra environment and no working
    /// directory override.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<OsString>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            env: Env::new(),
            cwd: None,
            timeout,
        }
    }

    /// Sets the working directory.
    #[must_use]
    pub fn in_dir(mut self, cwd: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets the injected environment.
    #[must_use]
    pub fn with_env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    /// Returns a shell-like rendering of the command for logs and assertions.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

/// Result of running an external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status, `unknown` when the process was signalled.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised while launching or supervising a process.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command exceeds its allotted runtime and is killed.
    #[error("{program} timed out after {seconds}s")]
    Timeout {
        /// Command that was terminated.
        program: String,
        /// Timeout that was exceeded, in seconds.
        seconds: u64,
    },
    /// Raised when supervising a running command fails.
    #[error("failed while waiting for {program}: {message}")]
    Io {
        /// Command being supervised.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

impl ExecError {
    /// Returns `true` for timeouts, which are logged distinctly from other
    /// failures.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs the invocation to completion, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] if the command cannot be started and
    /// [`ExecError::Timeout`] if it outlives `invocation.timeout`.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        (**self).run(invocation)
    }
}
