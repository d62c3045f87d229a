//! Build jobs.

use camino::{Utf8Path, Utf8PathBuf};

use crate::cleanup::EmergencyCleanup;
use crate::events::{EventContext, Stage};
use crate::exec::{Env, LocalRunner};
use crate::exit::ExitReason;
use crate::job::{JobKind, JobProperties};
use crate::platform::{Dispatcher, Toolkit, default_registry};
use crate::sync::{SyncEndpoint, SyncMode, Syncer};
use crate::workspace::{self, Workspace};

use super::FlowContext;

/// Fetches a job's source, builds it on its platform, and archives the
/// result under the configured archive root.
pub struct BuildFlow<'a> {
    context: FlowContext<'a>,
}

impl<'a> BuildFlow<'a> {
    /// Creates the flow.
    #[must_use]
    pub const fn new(context: FlowContext<'a>) -> Self {
        Self { context }
    }

    /// Runs build job `id` to completion.
    #[must_use]
    pub fn run(&self, id: &str) -> ExitReason {
        let cleanup = EmergencyCleanup::new();
        let reason = self.execute(id, &cleanup).err().unwrap_or(ExitReason::Success);
        tracing::info!(job = id, code = reason.code(), "build finished: {reason}");
        reason
    }

    fn execute(&self, id: &str, cleanup: &EmergencyCleanup<'a>) -> Result<(), ExitReason> {
        let context = self.context;
        let logger = context.logger;
        let record = context.resolve(id, JobKind::Build)?;
        logger.info(
            "Starting build",
            &EventContext::new()
                .with("platform", record.platform.as_str())
                .with("image", record.image.as_deref().unwrap_or("native")),
        );

        let workspace = context.create_workspace(id, ExitReason::DownloadFailed)?;
        self.fetch_source(record.source.as_deref(), &workspace)?;
        match workspace::has_entries(workspace.path()) {
            Ok(true) => {}
            Ok(false) => {
                logger.failure(
                    ExitReason::UnpackFailed.message(),
                    &EventContext::new().with("reason", "source directory is empty"),
                );
                return Err(ExitReason::UnpackFailed);
            }
            Err(err) => return Err(context.fail(ExitReason::UnpackFailed, &err)),
        }

        let decrypted = context.decrypt(&record)?;
        let properties = JobProperties::new(&record, decrypted, workspace.path());
        let commands: Vec<String> = record
            .commands
            .build
            .iter()
            .chain(&record.commands.build_transform)
            .cloned()
            .collect();

        let toolkit = Toolkit {
            runner: context.runner,
            logger,
            config: context.config,
            cleanup,
        };
        let registry = default_registry(toolkit);
        let dispatcher = Dispatcher::new(&registry, logger, Stage::Building);
        let reason = dispatcher.dispatch(&record.platform, &commands, &properties);
        logger.set_stage(Stage::End);
        if !reason.is_success() {
            return Err(reason);
        }

        let archive = self.pack(id, workspace.path())?;
        logger.success(
            "Build archived",
            &EventContext::new().with("archive", archive.as_str()),
        );
        Ok(())
    }

    fn fetch_source(&self, source: Option<&Utf8Path>, workspace: &Workspace) -> Result<(), ExitReason> {
        let context = self.context;
        let Some(source_dir) = source else {
            context.logger.failure(
                ExitReason::DownloadFailed.message(),
                &EventContext::new().with("reason", "job has no source directory"),
            );
            return Err(ExitReason::DownloadFailed);
        };
        let syncer = Syncer::new(context.runner, context.logger, context.config);
        let fetched = syncer.transfer(
            &SyncEndpoint::Local(source_dir.to_path_buf()),
            &SyncEndpoint::Local(workspace.path().to_path_buf()),
            SyncMode::GitAware,
            context.config.timeouts().prepare,
            "Fetch source",
        );
        if fetched {
            Ok(())
        } else {
            Err(ExitReason::DownloadFailed)
        }
    }

    fn pack(&self, id: &str, workspace_dir: &Utf8Path) -> Result<Utf8PathBuf, ExitReason> {
        let context = self.context;
        let config = context.config;
        let staging = tempfile::Builder::new()
            .prefix(&format!("hal-{id}-"))
            .suffix(".tar.gz")
            .tempfile_in(&config.workspace_root)
            .map(tempfile::NamedTempFile::into_temp_path)
            .map_err(|err| {
                context.logger.failure(
                    ExitReason::PackFailed.message(),
                    &EventContext::new().with("error", err.to_string()),
                );
                ExitReason::PackFailed
            })?;
        let staging_path = Utf8Path::from_path(&staging).ok_or_else(|| {
            context.logger.failure(
                ExitReason::PackFailed.message(),
                &EventContext::new().with("error", "staging path is not UTF-8"),
            );
            ExitReason::PackFailed
        })?;

        let tokens = [
            config.tar_bin.clone(),
            String::from("-czf"),
            staging_path.to_string(),
            String::from("-C"),
            workspace_dir.to_string(),
            String::from("."),
        ];
        let packed = LocalRunner::new(context.runner, context.logger).run_tokens(
            &tokens,
            None,
            &Env::new(),
            config.timeouts().prepare,
            "Pack build output",
        );
        if !packed {
            return Err(ExitReason::PackFailed);
        }

        let archive = config.archive_path(id);
        workspace::move_file(staging_path, &archive)
            .map_err(|err| context.fail(ExitReason::MoveFailed, &err))?;
        Ok(archive)
    }
}
