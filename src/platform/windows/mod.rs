//! Builds on a Windows EC2 instance driven through AWS Systems Manager.
//!
//! The workspace travels through an S3 bucket: it is packed locally,
//! uploaded, and unpacked into the instance's input directory. The build
//! runs either in a sequence of Docker containers or directly on the
//! instance, and its output directory is packed and downloaded back into
//! the local workspace. Transfer objects, instance directories and local
//! archives are removed on every exit path.

use camino::{Utf8Path, Utf8PathBuf};

use crate::aws::AwsError;
use crate::cleanup::CleanupGuard;
use crate::config::AgentConfig;
use crate::events::EventContext;
use crate::exec::Env;
use crate::exit::ExitReason;
use crate::job::JobProperties;
use crate::remote::{RemoteCommand, RemoteTarget};
use crate::workspace;

use super::image::{BuildImage, is_valid_image_reference};
use super::{Platform, Toolkit};

mod cleaner;
mod config;
mod docker;
mod native;
mod powershell;
mod scripts;

pub use cleaner::AwsResourceCleaner;
pub use config::{DEFAULT_BASE_PATH, WindowsAwsConfig, WindowsConfigurator};
pub use docker::DockerBuilder;
pub use native::NativeBuilder;
pub use scripts::{
    CONTAINER_SCRIPTS, CONTAINER_WORKSPACE, ContainerJob, ENV_FILE_NAME, GeneratedFile,
    GeneratedScript, InstanceLayout, Materialized, PlannedJob, ScriptError, ScriptTarget,
    ScriptTemplate, materialize, plan_jobs, render_env_file,
};

/// Local and S3 names of one job's transfer archives.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferFiles {
    /// Local archive of the workspace sent to the instance.
    pub local_input: Utf8PathBuf,
    /// Local archive of the workspace received from the instance.
    pub local_output: Utf8PathBuf,
    /// S3 key of the input archive.
    pub input_key: String,
    /// S3 key of the output archive.
    pub output_key: String,
}

impl TransferFiles {
    /// Names the archives for `job_id` under the configured transfer
    /// directory.
    #[must_use]
    pub fn new(config: &AgentConfig, job_id: &str) -> Self {
        Self {
            local_input: config.windows_transfer_file(job_id),
            local_output: Utf8PathBuf::from(&config.windows_transfer_path)
                .join(format!("{job_id}-output.tar.gz")),
            input_key: format!("{job_id}-input.tar.gz"),
            output_key: format!("{job_id}-output.tar.gz"),
        }
    }

    /// S3 keys created for the job.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        vec![self.input_key.clone(), self.output_key.clone()]
    }
}

/// Windows instance platform.
#[derive(Clone, Copy)]
pub struct WindowsPlatform<'t, 'a> {
    toolkit: Toolkit<'t, 'a>,
}

impl<'t, 'a> WindowsPlatform<'t, 'a> {
    /// Creates the platform.
    #[must_use]
    pub const fn new(toolkit: Toolkit<'t, 'a>) -> Self {
        Self { toolkit }
    }

    fn config_failure(&self, context: &EventContext) -> ExitReason {
        self.toolkit
            .logger
            .failure(ExitReason::WindowsConfig.message(), context);
        ExitReason::WindowsConfig
    }

    fn validate_image(&self, image: BuildImage<'_>, commands: &[String]) -> Result<(), ExitReason> {
        let BuildImage::Docker(reference) = image else {
            return Ok(());
        };
        if !is_valid_image_reference(reference) {
            return Err(self.config_failure(
                &EventContext::new()
                    .with("reason", "invalid Docker image reference")
                    .with("image", reference),
            ));
        }
        plan_jobs(reference, commands).map(drop).map_err(|err| {
            self.config_failure(&EventContext::new().with("reason", err.to_string()))
        })
    }

    fn aws_step(&self, label: &str, command: String, result: Result<(), AwsError>) -> bool {
        let context = EventContext::new().with("command", command);
        match result {
            Ok(()) => {
                self.toolkit.logger.success(label, &context);
                true
            }
            Err(err) => {
                self.toolkit
                    .logger
                    .failure(label, &context.with("error", err.to_string()));
                false
            }
        }
    }

    fn local_tar(&self, args: &[&str], label: &str) -> bool {
        let mut tokens = vec![self.toolkit.config.tar_bin.clone()];
        tokens.extend(args.iter().map(|arg| (*arg).to_owned()));
        self.toolkit.local().run_tokens(
            &tokens,
            None,
            &Env::new(),
            self.toolkit.timeouts().prepare,
            label,
        )
    }

    fn workspace_failure(&self, message: &str, err: &workspace::WorkspaceError) {
        self.toolkit
            .logger
            .failure(message, &EventContext::new().with("error", err.to_string()));
    }

    fn export(
        &self,
        settings: &WindowsAwsConfig,
        layout: &InstanceLayout,
        files: &TransferFiles,
        local_workspace: &Utf8Path,
    ) -> bool {
        if let Some(parent) = files.local_input.parent()
            && let Err(err) = workspace::ensure_dir(parent)
        {
            self.workspace_failure("Failed to prepare transfer directory", &err);
            return false;
        }
        if !self.local_tar(
            &["-czf", files.local_input.as_str(), "-C", local_workspace.as_str(), "."],
            "Pack workspace for transfer",
        ) {
            return false;
        }

        let aws = self.toolkit.aws(settings.instance.context.clone());
        let uploaded = self.aws_step(
            "Upload workspace to S3",
            format!("upload {} to {}", files.local_input, files.input_key),
            aws.upload(&files.local_input, &settings.bucket, &files.input_key),
        );
        if !uploaded {
            return false;
        }

        self.toolkit.remote().run(
            &RemoteTarget::Ssm(settings.instance.clone()),
            &RemoteCommand::script(powershell::fetch_input(
                layout,
                &settings.bucket,
                &files.input_key,
                &settings.instance.context.region,
            )),
            &Env::new(),
            self.toolkit.timeouts().prepare,
            "Unpack workspace on instance",
        )
    }

    fn import(
        &self,
        settings: &WindowsAwsConfig,
        layout: &InstanceLayout,
        files: &TransferFiles,
        local_workspace: &Utf8Path,
    ) -> bool {
        let packed = self.toolkit.remote().run(
            &RemoteTarget::Ssm(settings.instance.clone()),
            &RemoteCommand::script(powershell::publish_output(
                layout,
                &settings.bucket,
                &files.output_key,
                &settings.instance.context.region,
            )),
            &Env::new(),
            self.toolkit.timeouts().prepare,
            "Pack workspace on instance",
        );
        if !packed {
            return false;
        }

        let aws = self.toolkit.aws(settings.instance.context.clone());
        let downloaded = self.aws_step(
            "Download workspace from S3",
            format!("download {} to {}", files.output_key, files.local_output),
            aws.download(&settings.bucket, &files.output_key, &files.local_output),
        );
        if !downloaded {
            return false;
        }

        if let Err(err) = workspace::clear_dir(local_workspace) {
            self.workspace_failure("Failed to reset local workspace", &err);
            return false;
        }
        self.local_tar(
            &["-xzf", files.local_output.as_str(), "-C", local_workspace.as_str()],
            "Unpack workspace from instance",
        )
    }

    fn clean_up(&self, settings: &WindowsAwsConfig, layout: &InstanceLayout, files: &TransferFiles) {
        let cleaned = AwsResourceCleaner::new(self.toolkit).clean(
            &settings.instance,
            &settings.bucket,
            &files.keys(),
            layout,
        );
        if !cleaned {
            tracing::warn!(job_dir = layout.job_dir(), "Windows build resources left behind");
        }
        for path in [&files.local_input, &files.local_output] {
            if let Err(err) = workspace::remove_file_if_exists(path) {
                tracing::warn!(error = %err, "transfer archive left behind");
            }
        }
    }
}

impl Platform for WindowsPlatform<'_, '_> {
    fn run(&self, commands: &[String], job: &JobProperties) -> Result<(), ExitReason> {
        let image = BuildImage::parse(job.image.as_deref());
        self.validate_image(image, commands)?;
        let Some(settings) = WindowsConfigurator::new(self.toolkit).configure(job) else {
            return Err(ExitReason::WindowsConfig);
        };

        let layout = InstanceLayout::new(&settings.base_path, &job.id);
        let files = TransferFiles::new(self.toolkit.config, &job.id);
        let _clean_up = CleanupGuard::new(|| self.clean_up(&settings, &layout, &files));

        if !self.export(&settings, &layout, &files, &job.workspace) {
            return Err(ExitReason::WindowsExport);
        }

        let built = match image {
            BuildImage::Docker(reference) => {
                DockerBuilder::new(self.toolkit, settings.instance.clone(), layout.clone())
                    .build(&job.id, reference, commands, &job.env)
            }
            BuildImage::Native => {
                NativeBuilder::new(self.toolkit, settings.instance.clone(), layout.clone())
                    .build(commands, &job.env)
            }
        };
        if !built {
            return Err(ExitReason::WindowsBuild);
        }

        if !self.import(&settings, &layout, &files, &job.workspace) {
            return Err(ExitReason::WindowsImport);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
