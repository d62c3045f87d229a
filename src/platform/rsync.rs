//! Deployment by rsync over SSH.
//!
//! The dispatched commands are the job's pre-push commands; post-push
//! commands are read from the job's deployment phase after the transfer.

use shell_escape::unix::escape;

use crate::events::EventContext;
use crate::exit::ExitReason;
use crate::job::{JobProperties, is_valid_hostname};
use crate::remote::{RemoteCommand, RemoteTarget, SshHost, escape_command};
use crate::sync::{SyncEndpoint, SyncMode};

use super::{Platform, Toolkit, run_steps};

/// Runs pre-push commands, transfers the workspace, then runs post-push
/// commands on the deployment server.
#[derive(Clone, Copy)]
pub struct RsyncPlatform<'t, 'a> {
    toolkit: Toolkit<'t, 'a>,
}

impl<'t, 'a> RsyncPlatform<'t, 'a> {
    /// Creates the platform.
    #[must_use]
    pub const fn new(toolkit: Toolkit<'t, 'a>) -> Self {
        Self { toolkit }
    }

    fn run_remote_phase(
        &self,
        target: &RemoteTarget,
        path: &str,
        commands: &[String],
        job: &JobProperties,
        label: &str,
    ) -> bool {
        let remote = self.toolkit.remote();
        let timeout = self.toolkit.timeouts().build;
        let escaped_path = escape(path.into());
        run_steps(self.toolkit.logger, commands, |_, command| {
            let line = format!(
                "mkdir -p {escaped_path} && cd {escaped_path} && {}",
                escape_command(command)
            );
            remote.run(target, &RemoteCommand::line(line), &job.env, timeout, label)
        })
    }
}

impl Platform for RsyncPlatform<'_, '_> {
    fn run(&self, commands: &[String], job: &JobProperties) -> Result<(), ExitReason> {
        let logger = self.toolkit.logger;
        let Some(deployment) = job.deployment.as_ref() else {
            logger.failure(
                ExitReason::RsyncConfig.message(),
                &EventContext::new().with("reason", "job has no deployment target"),
            );
            return Err(ExitReason::RsyncConfig);
        };
        if !is_valid_hostname(&deployment.server) || deployment.path.trim().is_empty() {
            logger.failure(
                ExitReason::RsyncConfig.message(),
                &EventContext::new()
                    .with("server", deployment.server.as_str())
                    .with("path", deployment.path.as_str()),
            );
            return Err(ExitReason::RsyncConfig);
        }

        let host = SshHost {
            user: deployment.user.clone(),
            host: deployment.server.clone(),
            port: deployment.port,
        };
        let target = RemoteTarget::Ssh(host.clone());

        if !self.run_remote_phase(&target, &deployment.path, commands, job, "Run pre-push command") {
            return Err(ExitReason::RsyncPrePush);
        }

        let transferred = self.toolkit.syncer().transfer(
            &SyncEndpoint::Local(job.workspace.clone()),
            &SyncEndpoint::Remote {
                host,
                path: deployment.path.clone(),
            },
            SyncMode::Mirror,
            self.toolkit.timeouts().build,
            "Transfer files to deployment target",
        );
        if !transferred {
            return Err(ExitReason::RsyncTransfer);
        }

        if !self.run_remote_phase(
            &target,
            &deployment.path,
            &job.post_push,
            job,
            "Run post-push command",
        ) {
            return Err(ExitReason::RsyncPostPush);
        }
        Ok(())
    }
}
