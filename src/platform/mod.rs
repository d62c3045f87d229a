//! Build and deploy platforms.
//!
//! A [`Platform`] runs an ordered list of commands against one execution
//! environment. Platforms are looked up by name in a [`PlatformRegistry`]
//! and invoked through a [`Dispatcher`], which turns lookup misses into
//! [`ExitReason::InvalidPlatform`] before any remote work happens.

use crate::aws::{AwsCli, AwsContext};
use crate::cleanup::EmergencyCleanup;
use crate::config::{AgentConfig, Timeouts};
use crate::events::{EventContext, EventLogger};
use crate::exec::{CommandRunner, LocalRunner};
use crate::exit::ExitReason;
use crate::job::JobProperties;
use crate::remote::RemoteCommandRunner;
use crate::sync::Syncer;

mod dispatcher;
pub mod image;
mod local;
mod registry;
mod rsync;
pub mod unix;
pub mod windows;

pub use dispatcher::Dispatcher;
pub use local::LocalPlatform;
pub use registry::{PlatformFactory, PlatformRegistry};
pub use rsync::RsyncPlatform;
pub use unix::UnixPlatform;
pub use windows::WindowsPlatform;

/// Something that can run a job's commands.
pub trait Platform {
    /// Runs `commands` in order for `job`.
    ///
    /// # Errors
    ///
    /// Returns the [`ExitReason`] describing the first failed phase.
    fn run(&self, commands: &[String], job: &JobProperties) -> Result<(), ExitReason>;
}

/// Collaborators shared by every platform of one job.
///
/// `'a` is the lifetime of the long-lived services; `'t` the lifetime of the
/// borrow of the job's cleanup slot.
#[derive(Clone, Copy)]
pub struct Toolkit<'t, 'a> {
    /// Process runner used for every local and remote command.
    pub runner: &'a dyn CommandRunner,
    /// Job event sink.
    pub logger: &'a dyn EventLogger,
    /// Agent configuration.
    pub config: &'a AgentConfig,
    /// The job's emergency cleanup slot.
    pub cleanup: &'t EmergencyCleanup<'a>,
}

impl<'a> Toolkit<'_, 'a> {
    /// Runner for commands on the agent host.
    #[must_use]
    pub fn local(&self) -> LocalRunner<'a, &'a dyn CommandRunner> {
        LocalRunner::new(self.runner, self.logger)
    }

    /// Runner for commands on remote hosts.
    #[must_use]
    pub fn remote(&self) -> RemoteCommandRunner<'a, &'a dyn CommandRunner> {
        RemoteCommandRunner::new(self.runner, self.logger, self.config)
    }

    /// rsync wrapper.
    #[must_use]
    pub fn syncer(&self) -> Syncer<'a, &'a dyn CommandRunner> {
        Syncer::new(self.runner, self.logger, self.config)
    }

    /// AWS client for `context`.
    #[must_use]
    pub fn aws(&self, context: AwsContext) -> AwsCli<&'a dyn CommandRunner> {
        AwsCli::new(self.runner, self.config.aws_bin.clone(), context)
            .with_call_timeout(self.config.timeouts().internal)
            .with_poll_interval(self.config.ssm_poll_interval())
    }

    /// Command timeouts.
    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        self.config.timeouts()
    }
}

/// Runs `step` for each command in order, stopping at the first failure.
///
/// When a step fails with commands still queued, one event reports how many
/// were skipped. Returns `true` only when every step succeeded.
pub fn run_steps<T>(
    logger: &dyn EventLogger,
    commands: &[T],
    step: impl FnMut(usize, &T) -> bool,
) -> bool {
    run_steps_within(logger, commands, 0, commands.len(), step)
}

/// [`run_steps`] over one slice of a longer job.
///
/// `offset` steps of the job ran before `commands`, and the job has `total`
/// steps in all. A failure reports every step left in the job as skipped,
/// including those queued after this slice.
pub fn run_steps_within<T>(
    logger: &dyn EventLogger,
    commands: &[T],
    offset: usize,
    total: usize,
    mut step: impl FnMut(usize, &T) -> bool,
) -> bool {
    for (index, command) in commands.iter().enumerate() {
        if step(index, command) {
            continue;
        }
        let failed_step = offset + index + 1;
        let remaining = total.saturating_sub(failed_step);
        if remaining > 0 {
            logger.info(
                &format!("Skipping {remaining} remaining steps"),
                &EventContext::new()
                    .with("failed_step", failed_step.to_string())
                    .with("total_steps", total.to_string()),
            );
        }
        return false;
    }
    true
}

/// Registry with every built-in platform.
///
/// `unix` and `linux` name the same SSH build host platform.
#[must_use]
pub fn default_registry<'t, 'a: 't>(toolkit: Toolkit<'t, 'a>) -> PlatformRegistry<'t> {
    PlatformRegistry::new()
        .with("local", move || Some(Box::new(LocalPlatform::new(toolkit))))
        .with("unix", move || Some(Box::new(UnixPlatform::new(toolkit))))
        .with("linux", move || Some(Box::new(UnixPlatform::new(toolkit))))
        .with("windows", move || Some(Box::new(WindowsPlatform::new(toolkit))))
        .with("rsync", move || Some(Box::new(RsyncPlatform::new(toolkit))))
}

#[cfg(test)]
mod tests;
