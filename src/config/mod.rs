//! Agent configuration loaded via `ortho-config`.
//!
//! Values merge defaults, `hal-agent.toml` discovery, and `HAL_*`
//! environment variables. Per-job platform settings do not live here; they
//! travel with the job record.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Longest accepted command timeout, matching the SSM `executionTimeout`
/// ceiling of 48 hours.
pub const MAX_TIMEOUT_SECS: u64 = 172_800;

/// Settings shared by every job the agent runs.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HAL",
    discovery(
        app_name = "hal-agent",
        env_var = "HAL_CONFIG_PATH",
        config_file_name = "hal-agent.toml",
        dotfile_name = ".hal-agent.toml",
        project_file_name = "hal-agent.toml"
    )
)]
pub struct AgentConfig {
    /// Directory holding `<job id>.json` job records.
    #[ortho_config(default = "/var/lib/hal-agent/jobs".to_owned())]
    pub jobs_dir: String,
    /// Directory under which per-job temporary workspaces are created.
    #[ortho_config(default = "/tmp/hal-agent".to_owned())]
    pub workspace_root: String,
    /// Directory receiving finished build archives.
    #[ortho_config(default = "/var/lib/hal-agent/archives".to_owned())]
    pub archive_root: String,
    /// Filename prefix of build archives (`<prefix>-<job id>.tar.gz`).
    #[ortho_config(default = "hal9000".to_owned())]
    pub archive_prefix: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `rsync` executable.
    #[ortho_config(default = "rsync".to_owned())]
    pub rsync_bin: String,
    /// Path to the `aws` executable.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
    /// Path to the `tar` executable.
    #[ortho_config(default = "tar".to_owned())]
    pub tar_bin: String,
    /// Remote user for SSH and rsync connections.
    #[ortho_config(default = "hal".to_owned())]
    pub ssh_user: String,
    /// Private key for SSH authentication. Supports `~/` expansion; SSH
    /// falls back to its default keys when unset.
    pub ssh_identity_file: Option<String>,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Unix build host. Unix builds are unavailable when unset.
    pub unix_build_host: Option<String>,
    /// SSH port of the Unix build host.
    #[ortho_config(default = 22)]
    pub unix_build_port: u16,
    /// Directory on the Unix build host receiving job workspaces.
    #[ortho_config(default = "/home/hal/workspaces".to_owned())]
    pub unix_remote_root: String,
    /// Directory on the Unix build host holding one Docker build context
    /// per image name.
    #[ortho_config(default = "/home/hal/docker-images".to_owned())]
    pub unix_docker_source: String,
    /// Local staging directory for Windows workspace archives.
    #[ortho_config(default = "/tmp/hal-agent/transfer".to_owned())]
    pub windows_transfer_path: String,
    /// Timeout for each user build or deploy command, in seconds.
    #[ortho_config(default = 1800)]
    pub build_timeout_secs: u64,
    /// Timeout for internal setup and teardown commands, in seconds.
    #[ortho_config(default = 120)]
    pub internal_timeout_secs: u64,
    /// Timeout for batched instance preparation and image builds, in
    /// seconds.
    #[ortho_config(default = 600)]
    pub prepare_timeout_secs: u64,
    /// Delay between SSM status polls, in milliseconds.
    #[ortho_config(default = 2000)]
    pub ssm_poll_interval_ms: u64,
}

/// Timeouts applied to the different classes of command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// User build and deploy commands.
    pub build: Duration,
    /// Internal setup and teardown commands.
    pub internal: Duration,
    /// Instance preparation and image builds.
    pub prepare: Duration,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to hal-agent.toml",
            self.env_var, self.toml_key
        )
    }
}

const REQUIRED_FIELDS: [FieldMetadata; 9] = [
    FieldMetadata::new("jobs directory", "HAL_JOBS_DIR", "jobs_dir"),
    FieldMetadata::new("workspace root", "HAL_WORKSPACE_ROOT", "workspace_root"),
    FieldMetadata::new("archive root", "HAL_ARCHIVE_ROOT", "archive_root"),
    FieldMetadata::new("archive prefix", "HAL_ARCHIVE_PREFIX", "archive_prefix"),
    FieldMetadata::new("ssh executable", "HAL_SSH_BIN", "ssh_bin"),
    FieldMetadata::new("rsync executable", "HAL_RSYNC_BIN", "rsync_bin"),
    FieldMetadata::new("aws executable", "HAL_AWS_BIN", "aws_bin"),
    FieldMetadata::new("tar executable", "HAL_TAR_BIN", "tar_bin"),
    FieldMetadata::new("SSH user", "HAL_SSH_USER", "ssh_user"),
];

impl AgentConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("hal-agent")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is blank
    /// and [`ConfigError::InvalidValue`] when a duration is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            &self.jobs_dir,
            &self.workspace_root,
            &self.archive_root,
            &self.archive_prefix,
            &self.ssh_bin,
            &self.rsync_bin,
            &self.aws_bin,
            &self.tar_bin,
            &self.ssh_user,
        ];
        for (value, metadata) in values.into_iter().zip(REQUIRED_FIELDS.iter()) {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "missing {}: {}",
                    metadata.description,
                    metadata.hint()
                )));
            }
        }

        if self
            .ssh_identity_file
            .as_deref()
            .is_some_and(|value| value.trim().is_empty())
        {
            return Err(ConfigError::MissingField(format!(
                "blank SSH identity file: {}",
                FieldMetadata::new("SSH identity file", "HAL_SSH_IDENTITY_FILE", "ssh_identity_file")
                    .hint()
            )));
        }

        let durations = [
            (self.build_timeout_secs, "HAL_BUILD_TIMEOUT_SECS", "build_timeout_secs"),
            (
                self.internal_timeout_secs,
                "HAL_INTERNAL_TIMEOUT_SECS",
                "internal_timeout_secs",
            ),
            (
                self.prepare_timeout_secs,
                "HAL_PREPARE_TIMEOUT_SECS",
                "prepare_timeout_secs",
            ),
            (self.ssm_poll_interval_ms, "HAL_SSM_POLL_INTERVAL_MS", "ssm_poll_interval_ms"),
        ];
        for (value, env_var, toml_key) in durations {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "{toml_key} must be greater than zero: {}",
                    FieldMetadata::new(toml_key, env_var, toml_key).hint()
                )));
            }
        }

        let timeouts = [
            (self.build_timeout_secs, "HAL_BUILD_TIMEOUT_SECS", "build_timeout_secs"),
            (
                self.internal_timeout_secs,
                "HAL_INTERNAL_TIMEOUT_SECS",
                "internal_timeout_secs",
            ),
            (
                self.prepare_timeout_secs,
                "HAL_PREPARE_TIMEOUT_SECS",
                "prepare_timeout_secs",
            ),
        ];
        for (value, env_var, toml_key) in timeouts {
            if value > MAX_TIMEOUT_SECS {
                return Err(ConfigError::InvalidValue(format!(
                    "{toml_key} must be at most {MAX_TIMEOUT_SECS} seconds: {}",
                    FieldMetadata::new(toml_key, env_var, toml_key).hint()
                )));
            }
        }
        Ok(())
    }

    /// Returns the command timeouts.
    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        Timeouts {
            build: Duration::from_secs(self.build_timeout_secs),
            internal: Duration::from_secs(self.internal_timeout_secs),
            prepare: Duration::from_secs(self.prepare_timeout_secs),
        }
    }

    /// Returns the SSM polling interval.
    #[must_use]
    pub const fn ssm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ssm_poll_interval_ms)
    }

    /// Directory of job records.
    #[must_use]
    pub fn jobs_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.jobs_dir)
    }

    /// Final location of the build archive for `job_id`.
    #[must_use]
    pub fn archive_path(&self, job_id: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.archive_root)
            .join(format!("{}-{job_id}.tar.gz", self.archive_prefix))
    }

    /// Local staging path of the Windows workspace archive for `job_id`.
    #[must_use]
    pub fn windows_transfer_file(&self, job_id: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.windows_transfer_path).join(format!("{job_id}.tar.gz"))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value is out of range.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
