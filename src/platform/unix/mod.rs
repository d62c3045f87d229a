//! Builds on a Unix host reached over SSH.
//!
//! The workspace is exported to `<unix_remote_root>/<job id>` with rsync,
//! built there natively or inside a Docker container, and imported back.
//! The remote directory is removed on every exit path.

use std::time::Duration;

use shell_escape::unix::escape;

use crate::cleanup::CleanupGuard;
use crate::events::EventContext;
use crate::exec::{CommandRunner, Env};
use crate::exit::ExitReason;
use crate::job::JobProperties;
use crate::remote::{RemoteCommand, RemoteCommandRunner, RemoteTarget, SshHost};
use crate::sync::{SyncEndpoint, SyncMode};

use super::image::{BuildImage, is_valid_component};
use super::{Platform, Toolkit};

mod docker;
mod native;

pub use docker::DockerBuilder;
pub use native::NativeBuilder;

/// SSH build host platform.
#[derive(Clone, Copy)]
pub struct UnixPlatform<'t, 'a> {
    toolkit: Toolkit<'t, 'a>,
}

impl<'t, 'a> UnixPlatform<'t, 'a> {
    /// Creates the platform.
    #[must_use]
    pub const fn new(toolkit: Toolkit<'t, 'a>) -> Self {
        Self { toolkit }
    }

    fn build_host(&self) -> Option<SshHost> {
        let config = self.toolkit.config;
        config
            .unix_build_host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(|host| SshHost {
                user: config.ssh_user.clone(),
                host: host.to_owned(),
                port: config.unix_build_port,
            })
    }

    fn config_failure(&self, reason: &str) -> ExitReason {
        self.toolkit.logger.failure(
            ExitReason::UnixConfig.message(),
            &EventContext::new().with("reason", reason),
        );
        ExitReason::UnixConfig
    }

    fn transfer(&self, from: &SyncEndpoint, to: &SyncEndpoint, label: &str) -> bool {
        self.toolkit.syncer().transfer(
            from,
            to,
            SyncMode::Mirror,
            self.toolkit.timeouts().prepare,
            label,
        )
    }
}

impl Platform for UnixPlatform<'_, '_> {
    fn run(&self, commands: &[String], job: &JobProperties) -> Result<(), ExitReason> {
        let Some(host) = self.build_host() else {
            return Err(self.config_failure("no Unix build host is configured"));
        };
        let image = BuildImage::parse(job.image.as_deref());
        if let BuildImage::Docker(name) = image
            && !is_valid_component(name)
        {
            return Err(self.config_failure(&format!("invalid Docker image name {name:?}")));
        }

        let remote_dir = format!(
            "{}/{}",
            self.toolkit.config.unix_remote_root.trim_end_matches('/'),
            job.id
        );
        let target = RemoteTarget::Ssh(host.clone());
        let timeouts = self.toolkit.timeouts();
        let remote = self.toolkit.remote();

        let created = remote.run(
            &target,
            &RemoteCommand::line(format!("mkdir -p {}", escape(remote_dir.as_str().into()))),
            &Env::new(),
            timeouts.internal,
            "Create remote workspace",
        );
        if !created {
            return Err(ExitReason::UnixExport);
        }
        let _remove_remote_dir = CleanupGuard::new(|| {
            remove_remote_dir(&remote, &target, &remote_dir, timeouts.internal);
        });

        let remote_endpoint = SyncEndpoint::Remote {
            host: host.clone(),
            path: remote_dir.clone(),
        };
        let local_endpoint = SyncEndpoint::Local(job.workspace.clone());
        if !self.transfer(&local_endpoint, &remote_endpoint, "Export workspace to build host") {
            return Err(ExitReason::UnixExport);
        }

        let built = match image {
            BuildImage::Docker(name) => DockerBuilder::new(self.toolkit, host).build(
                name,
                &remote_dir,
                commands,
                &job.env,
            ),
            BuildImage::Native => {
                NativeBuilder::new(self.toolkit, host).build(&remote_dir, commands, &job.env)
            }
        };
        if !built {
            return Err(ExitReason::UnixBuild);
        }

        if !self.transfer(&remote_endpoint, &local_endpoint, "Import workspace from build host") {
            return Err(ExitReason::UnixImport);
        }
        Ok(())
    }
}

fn remove_remote_dir<R: CommandRunner>(
    remote: &RemoteCommandRunner<'_, R>,
    target: &RemoteTarget,
    remote_dir: &str,
    timeout: Duration,
) {
    let removed = remote.run(
        target,
        &RemoteCommand::line(format!("rm -rf {}", escape(remote_dir.into()))),
        &Env::new(),
        timeout,
        "Remove remote workspace",
    );
    if !removed {
        tracing::warn!(remote_dir, "remote workspace left behind");
    }
}
