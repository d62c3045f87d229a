//! Job records, resolution and secret decryption.
//!
//! A job record is written by the job system as `<jobs_dir>/<id>.json`. The
//! agent only reads it; status transitions belong to the event logger's
//! collaborator.

use std::collections::BTreeMap;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::exec::Env;

mod resolver;
mod secrets;

pub use resolver::{FileJobResolver, JobResolver, ResolveError, WaitingJob};
pub use secrets::{
    DecryptError, EncryptedPropertyResolver, EnvSecretResolver, SECRET_ENV_PREFIX, decrypt_all,
};

/// Whether a job builds or deploys.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Builds source into an archive.
    Build,
    /// Deploys a previously built archive.
    Push,
}

impl JobKind {
    /// Subcommand name used to run a job of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Push => "push",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered command lists per lifecycle phase.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct JobCommands {
    /// Build commands.
    pub build: Vec<String>,
    /// Commands run after the build, before packing.
    pub build_transform: Vec<String>,
    /// Commands run on the deployment target before transfer.
    pub pre_push: Vec<String>,
    /// Commands run on the deployment target after transfer.
    pub post_push: Vec<String>,
}

/// Where a push deploys to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Deployment {
    /// Deploy platform name, for example `rsync`.
    pub platform: String,
    /// Target hostname.
    pub server: String,
    /// Login user on the target.
    pub user: String,
    /// Destination directory on the target.
    pub path: String,
    /// SSH port on the target.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

const fn default_ssh_port() -> u16 {
    22
}

/// A job as stored by the job system.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct JobRecord {
    /// Job identifier.
    pub id: String,
    /// Build or push.
    pub kind: JobKind,
    /// Lifecycle status; only `waiting` jobs may run.
    pub status: String,
    /// Build platform name. Push jobs use the deployment's platform.
    #[serde(default)]
    pub platform: String,
    /// Build image, for example `docker:node:18` or a native label.
    #[serde(default)]
    pub image: Option<String>,
    /// Source directory for builds.
    #[serde(default)]
    pub source: Option<Utf8PathBuf>,
    /// Build whose archive a push deploys.
    #[serde(default)]
    pub build_id: Option<String>,
    /// Plain environment variables.
    #[serde(default)]
    pub env: Env,
    /// Encrypted environment variables, by name.
    #[serde(default)]
    pub encrypted: BTreeMap<String, String>,
    /// Commands per phase.
    #[serde(default)]
    pub commands: JobCommands,
    /// Platform-specific settings.
    #[serde(default)]
    pub platform_config: BTreeMap<String, String>,
    /// Deployment target for pushes.
    #[serde(default)]
    pub deployment: Option<Deployment>,
}

/// The view of a job handed to platforms.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobProperties {
    /// Job identifier.
    pub id: String,
    /// Build image, if any.
    pub image: Option<String>,
    /// Plain and decrypted environment variables.
    pub env: Env,
    /// Platform-specific settings.
    pub platform_config: BTreeMap<String, String>,
    /// Deployment target for pushes.
    pub deployment: Option<Deployment>,
    /// Commands run on the deployment target after transfer.
    pub post_push: Vec<String>,
    /// Local workspace holding the job's files.
    pub workspace: Utf8PathBuf,
}

impl JobProperties {
    /// Builds properties from `record`, merging `decrypted` over its plain
    /// environment.
    #[must_use]
    pub fn new(record: &JobRecord, decrypted: Env, workspace: &Utf8Path) -> Self {
        let mut env = record.env.clone();
        env.extend(decrypted);
        Self {
            id: record.id.clone(),
            image: record.image.clone(),
            env,
            platform_config: record.platform_config.clone(),
            deployment: record.deployment.clone(),
            post_push: record.commands.post_push.clone(),
            workspace: workspace.to_path_buf(),
        }
    }

    /// Returns a platform setting, treating blank values as missing.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.platform_config
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Returns `true` for names usable as shell and PowerShell environment
/// variables.
#[must_use]
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Returns `true` for identifiers safe to embed in file names and remote
/// paths.
#[must_use]
pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// Returns `true` for syntactically valid hostnames and IPv4 addresses.
#[must_use]
pub fn is_valid_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        })
}
