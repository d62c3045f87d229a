//! Builds on the agent host itself.

use crate::exit::ExitReason;
use crate::job::JobProperties;

use super::{Platform, Toolkit, run_steps};

/// Runs each command directly in the job workspace, without a shell.
#[derive(Clone, Copy)]
pub struct LocalPlatform<'t, 'a> {
    toolkit: Toolkit<'t, 'a>,
}

impl<'t, 'a> LocalPlatform<'t, 'a> {
    /// Creates the platform.
    #[must_use]
    pub const fn new(toolkit: Toolkit<'t, 'a>) -> Self {
        Self { toolkit }
    }
}

impl Platform for LocalPlatform<'_, '_> {
    fn run(&self, commands: &[String], job: &JobProperties) -> Result<(), ExitReason> {
        let local = self.toolkit.local();
        let timeout = self.toolkit.timeouts().build;
        let succeeded = run_steps(self.toolkit.logger, commands, |_, command| {
            local.run(command, &job.workspace, &job.env, timeout, "Run build command")
        });
        if succeeded {
            Ok(())
        } else {
            Err(ExitReason::BuildFailed)
        }
    }
}
