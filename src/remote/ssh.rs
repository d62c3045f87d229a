//! SSH argument and script construction.

use std::borrow::Cow;
use std::ffi::OsString;

use shell_escape::unix::escape;

use crate::config::AgentConfig;
use crate::exec::{Env, sanitize_command};

/// A host reachable over SSH.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshHost {
    /// Login user.
    pub user: String,
    /// Hostname or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
}

impl SshHost {
    /// Returns `user@host`.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Client-side SSH options shared by `ssh` and `rsync --rsh`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Private key passed with `-i`.
    pub identity_file: Option<String>,
    /// Adds `BatchMode=yes`.
    pub batch_mode: bool,
    /// Leaves host key checking enabled when `true`.
    pub strict_host_key_checking: bool,
    /// Known hosts file override.
    pub known_hosts_file: String,
}

impl SshSettings {
    /// Extracts SSH options from the agent configuration.
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            ssh_bin: config.ssh_bin.clone(),
            identity_file: config.ssh_identity_file.clone(),
            batch_mode: config.ssh_batch_mode,
            strict_host_key_checking: config.ssh_strict_host_key_checking,
            known_hosts_file: config.ssh_known_hosts_file.clone(),
        }
    }

    /// Options placed before the destination for every connection.
    #[must_use]
    pub fn common_options(&self, port: u16) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(port.to_string())];

        if let Some(ref identity_file) = self.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.known_hosts_file
            )));
        }

        args
    }

    /// Full argument vector for running `script` on `host`.
    #[must_use]
    pub fn command_args(&self, host: &SshHost, script: &str) -> Vec<OsString> {
        let mut args = self.common_options(host.port);
        args.push(OsString::from(host.destination()));
        args.push(OsString::from(script));
        args
    }

    /// Value for `rsync --rsh`.
    #[must_use]
    pub fn remote_shell(&self, port: u16) -> String {
        let mut parts = vec![self.ssh_bin.clone()];
        parts.extend(
            self.common_options(port)
                .into_iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

/// Sanitises `command` and shell-escapes each token.
///
/// Shell operators lose their meaning: `a && b` runs `a` with the literal
/// arguments `&&` and `b`.
#[must_use]
pub fn escape_command(command: &str) -> String {
    sanitize_command(command)
        .into_iter()
        .map(|token| escape(Cow::Owned(token)).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Renders a POSIX shell script: one `export` per environment entry, then
/// the command lines chained with `&&` so the first failure stops the rest.
#[must_use]
pub fn render_script(lines: &[String], env: &Env) -> String {
    let mut script = String::new();
    for (key, value) in env {
        script.push_str("export ");
        script.push_str(key);
        script.push('=');
        script.push_str(&escape(Cow::Borrowed(value.as_str())));
        script.push_str("; ");
    }
    script.push_str(&lines.join(" && "));
    script
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// The input is returned unchanged when `HOME` is unset.
///
/// # Examples
///
/// ```
/// # use hal_agent::remote::expand_tilde;
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}
