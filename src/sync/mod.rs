//! rsync transfers between the agent workspace and remote hosts.
//!
//! Transfers copy the *contents* of the source directory (a trailing `/` is
//! always appended) and delete stale files on the receiving side. Remote
//! endpoints are reached through `--rsh` with the same SSH options used for
//! remote commands.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;

use crate::config::AgentConfig;
use crate::events::{EventLogger, report_exec};
use crate::exec::{CommandRunner, Invocation};
use crate::remote::{SshHost, SshSettings};

/// One side of a transfer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncEndpoint {
    /// A directory on the agent host.
    Local(Utf8PathBuf),
    /// A directory on a host reached over SSH.
    Remote {
        /// Host to connect to.
        host: SshHost,
        /// Directory on the host.
        path: String,
    },
}

impl SyncEndpoint {
    fn render(&self, trailing_slash: bool) -> String {
        let slash = if trailing_slash { "/" } else { "" };
        match self {
            Self::Local(path) => format!("{path}{slash}"),
            Self::Remote { host, path } => format!("{}:{path}{slash}", host.destination()),
        }
    }

    const fn port(&self) -> Option<u16> {
        match self {
            Self::Local(_) => None,
            Self::Remote { host, .. } => Some(host.port),
        }
    }
}

/// Which files a transfer considers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncMode {
    /// Every file.
    Mirror,
    /// Applies `.gitignore` rules and skips `.git/`.
    GitAware,
}

/// Runs rsync through a [`CommandRunner`], logging one event per transfer.
pub struct Syncer<'a, R: CommandRunner> {
    runner: R,
    logger: &'a dyn EventLogger,
    rsync_bin: String,
    ssh: SshSettings,
}

impl<'a, R: CommandRunner> Syncer<'a, R> {
    /// Creates a syncer using the rsync and SSH settings in `config`.
    #[must_use]
    pub fn new(runner: R, logger: &'a dyn EventLogger, config: &AgentConfig) -> Self {
        Self {
            runner,
            logger,
            rsync_bin: config.rsync_bin.clone(),
            ssh: SshSettings::from_config(config),
        }
    }

    /// Copies the contents of `from` into `to`. Returns `true` when rsync
    /// exits with status zero.
    #[must_use]
    pub fn transfer(
        &self,
        from: &SyncEndpoint,
        to: &SyncEndpoint,
        mode: SyncMode,
        timeout: Duration,
        label: &str,
    ) -> bool {
        let invocation = Invocation::new(
            self.rsync_bin.clone(),
            self.rsync_args(from, to, mode),
            timeout,
        );
        let result = self.runner.run(&invocation);
        report_exec(self.logger, label, &invocation.command_line(), &result)
    }

    /// Builds the rsync argument vector.
    #[must_use]
    pub fn rsync_args(&self, from: &SyncEndpoint, to: &SyncEndpoint, mode: SyncMode) -> Vec<OsString> {
        let mut args = vec![OsString::from("-az"), OsString::from("--delete")];

        if mode == SyncMode::GitAware {
            args.push(OsString::from("--filter=:- .gitignore"));
            args.push(OsString::from("--exclude"));
            args.push(OsString::from(".git/"));
        }

        if let Some(port) = from.port().or_else(|| to.port()) {
            args.push(OsString::from("--rsh"));
            args.push(OsString::from(self.ssh.remote_shell(port)));
        }

        args.push(OsString::from(from.render(true)));
        args.push(OsString::from(to.render(false)));
        args
    }
}

#[cfg(test)]
mod tests;
