//! Push jobs.

use crate::cleanup::EmergencyCleanup;
use crate::events::{EventContext, Stage};
use crate::exec::{Env, LocalRunner};
use crate::exit::ExitReason;
use crate::job::{JobKind, JobProperties};
use crate::platform::{Dispatcher, Toolkit, default_registry};
use crate::workspace::{self, Workspace};

use super::FlowContext;

/// Unpacks a build archive and deploys it with the job's deployment
/// platform.
pub struct PushFlow<'a> {
    context: FlowContext<'a>,
}

impl<'a> PushFlow<'a> {
    /// Creates the flow.
    #[must_use]
    pub const fn new(context: FlowContext<'a>) -> Self {
        Self { context }
    }

    /// Runs push job `id` to completion.
    #[must_use]
    pub fn run(&self, id: &str) -> ExitReason {
        let cleanup = EmergencyCleanup::new();
        let reason = self.execute(id, &cleanup).err().unwrap_or(ExitReason::Success);
        tracing::info!(job = id, code = reason.code(), "push finished: {reason}");
        reason
    }

    fn execute(&self, id: &str, cleanup: &EmergencyCleanup<'a>) -> Result<(), ExitReason> {
        let context = self.context;
        let logger = context.logger;
        let record = context.resolve(id, JobKind::Push)?;
        let (Some(build_id), Some(deployment)) = (record.build_id.as_deref(), record.deployment.as_ref())
        else {
            logger.failure(
                ExitReason::ResolveFailed.message(),
                &EventContext::new().with("reason", "push has no build or deployment"),
            );
            return Err(ExitReason::ResolveFailed);
        };
        logger.info(
            "Starting push",
            &EventContext::new()
                .with("build", build_id)
                .with("platform", deployment.platform.as_str())
                .with("server", deployment.server.as_str()),
        );

        let workspace = context.create_workspace(id, ExitReason::UnpackFailed)?;
        self.unpack(build_id, &workspace)?;

        let decrypted = context.decrypt(&record)?;
        let properties = JobProperties::new(&record, decrypted, workspace.path());

        let toolkit = Toolkit {
            runner: context.runner,
            logger,
            config: context.config,
            cleanup,
        };
        let registry = default_registry(toolkit);
        let dispatcher = Dispatcher::new(&registry, logger, Stage::Deploying);
        let reason = dispatcher.dispatch(
            &deployment.platform,
            &record.commands.pre_push,
            &properties,
        );
        logger.set_stage(Stage::End);
        match reason {
            ExitReason::Success => {
                logger.success(
                    "Push completed",
                    &EventContext::new().with("server", deployment.server.as_str()),
                );
                Ok(())
            }
            ExitReason::BuildFailed => Err(ExitReason::DeployFailed),
            other => Err(other),
        }
    }

    fn unpack(&self, build_id: &str, workspace: &Workspace) -> Result<(), ExitReason> {
        let context = self.context;
        let archive = context.config.archive_path(build_id);
        match workspace::file_exists(&archive) {
            Ok(true) => {}
            Ok(false) => {
                context.logger.failure(
                    ExitReason::UnpackFailed.message(),
                    &EventContext::new()
                        .with("reason", "build archive not found")
                        .with("archive", archive.as_str()),
                );
                return Err(ExitReason::UnpackFailed);
            }
            Err(err) => return Err(context.fail(ExitReason::UnpackFailed, &err)),
        }

        let tokens = [
            context.config.tar_bin.clone(),
            String::from("-xzf"),
            archive.to_string(),
            String::from("-C"),
            workspace.path().to_string(),
        ];
        let unpacked = LocalRunner::new(context.runner, context.logger).run_tokens(
            &tokens,
            None,
            &Env::new(),
            context.config.timeouts().prepare,
            "Unpack build archive",
        );
        if unpacked {
            Ok(())
        } else {
            Err(ExitReason::UnpackFailed)
        }
    }
}
