//! Native builds over SSH.

use shell_escape::unix::escape;

use crate::exec::Env;
use crate::platform::{Toolkit, run_steps};
use crate::remote::{RemoteCommand, RemoteTarget, SshHost, escape_command};

/// Runs each command in the remote workspace through the login shell,
/// with every token escaped.
pub struct NativeBuilder<'t, 'a> {
    toolkit: Toolkit<'t, 'a>,
    target: RemoteTarget,
}

impl<'t, 'a> NativeBuilder<'t, 'a> {
    /// Creates a builder for `host`.
    #[must_use]
    pub const fn new(toolkit: Toolkit<'t, 'a>, host: SshHost) -> Self {
        Self {
            toolkit,
            target: RemoteTarget::Ssh(host),
        }
    }

    /// Runs `commands` inside `remote_dir`. Returns `true` when every
    /// command succeeded.
    #[must_use]
    pub fn build(&self, remote_dir: &str, commands: &[String], env: &Env) -> bool {
        let remote = self.toolkit.remote();
        let timeout = self.toolkit.timeouts().build;
        let escaped_dir = escape(remote_dir.into());
        run_steps(self.toolkit.logger, commands, |_, command| {
            let line = format!("cd {escaped_dir} && {}", escape_command(command));
            remote.run(&self.target, &RemoteCommand::line(line), env, timeout, "Run build command")
        })
    }
}
