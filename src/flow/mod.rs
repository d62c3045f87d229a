//! Outermost job execution.
//!
//! A flow resolves one job, prepares its local workspace, hands the job to
//! a platform through the [`Dispatcher`](crate::platform::Dispatcher), and
//! maps every failure to a single [`ExitReason`]. The flow owns the job's
//! [`EmergencyCleanup`](crate::cleanup::EmergencyCleanup) slot, so any
//! cleanup still pending when it returns is run on the way out.

use camino::Utf8Path;

use crate::config::AgentConfig;
use crate::events::{EventContext, EventLogger};
use crate::exec::{CommandRunner, Env};
use crate::exit::ExitReason;
use crate::job::{EncryptedPropertyResolver, JobKind, JobRecord, JobResolver, decrypt_all};
use crate::workspace::{Workspace, WorkspaceError};

mod build;
mod push;

pub use build::BuildFlow;
pub use push::PushFlow;

/// Services shared by the build and push flows.
#[derive(Clone, Copy)]
pub struct FlowContext<'a> {
    /// Process runner for every command.
    pub runner: &'a dyn CommandRunner,
    /// Job event sink.
    pub logger: &'a dyn EventLogger,
    /// Agent configuration.
    pub config: &'a AgentConfig,
    /// Job store.
    pub resolver: &'a dyn JobResolver,
    /// Secret decryption.
    pub secrets: &'a dyn EncryptedPropertyResolver,
}

impl FlowContext<'_> {
    fn resolve(&self, id: &str, kind: JobKind) -> Result<JobRecord, ExitReason> {
        self.resolver.resolve(id, kind).map_err(|err| {
            self.logger.failure(
                ExitReason::ResolveFailed.message(),
                &EventContext::new()
                    .with("job", id)
                    .with("error", err.to_string()),
            );
            ExitReason::ResolveFailed
        })
    }

    fn create_workspace(&self, id: &str, failure: ExitReason) -> Result<Workspace, ExitReason> {
        Workspace::create(Utf8Path::new(&self.config.workspace_root), id)
            .map_err(|err| self.fail(failure, &err))
    }

    fn decrypt(&self, record: &JobRecord) -> Result<Env, ExitReason> {
        decrypt_all(self.secrets, &record.encrypted).map_err(|err| {
            self.logger.failure(
                ExitReason::ConfigFailed.message(),
                &EventContext::new().with("error", err.to_string()),
            );
            ExitReason::ConfigFailed
        })
    }

    fn fail(&self, reason: ExitReason, err: &WorkspaceError) -> ExitReason {
        self.logger.failure(
            reason.message(),
            &EventContext::new().with("error", err.to_string()),
        );
        reason
    }
}
