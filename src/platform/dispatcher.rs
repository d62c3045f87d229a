//! Uniform invocation of platforms by name.

use std::cell::Cell;

use crate::events::{EventContext, EventLogger, Stage};
use crate::exit::ExitReason;
use crate::job::JobProperties;

use super::PlatformRegistry;

/// Looks up a platform by name and runs it, recording the exit reason.
pub struct Dispatcher<'r, 't> {
    registry: &'r PlatformRegistry<'t>,
    logger: &'r dyn EventLogger,
    stage: Stage,
    exit: Cell<Option<ExitReason>>,
}

impl<'r, 't> Dispatcher<'r, 't> {
    /// Creates a dispatcher that moves the job to `stage` before running a
    /// platform.
    #[must_use]
    pub const fn new(
        registry: &'r PlatformRegistry<'t>,
        logger: &'r dyn EventLogger,
        stage: Stage,
    ) -> Self {
        Self {
            registry,
            logger,
            stage,
            exit: Cell::new(None),
        }
    }

    /// Runs `commands` on the platform named `platform`.
    ///
    /// Unknown or unusable platforms yield [`ExitReason::InvalidPlatform`]
    /// with one failure event and no platform work.
    pub fn dispatch(&self, platform: &str, commands: &[String], job: &JobProperties) -> ExitReason {
        self.exit.set(None);

        let Some(implementation) = self.registry.get(platform) else {
            self.logger.failure(
                ExitReason::InvalidPlatform.message(),
                &EventContext::new()
                    .with("platform", platform)
                    .with("available", self.registry.names().join(", ")),
            );
            self.exit.set(Some(ExitReason::InvalidPlatform));
            return ExitReason::InvalidPlatform;
        };

        self.logger.set_stage(self.stage);
        let reason = implementation
            .run(commands, job)
            .err()
            .unwrap_or(ExitReason::Success);
        self.exit.set(Some(reason));
        reason
    }

    /// Exit reason of the most recent dispatch, if any.
    #[must_use]
    pub const fn exit_reason(&self) -> Option<ExitReason> {
        self.exit.get()
    }

    /// Exit code of the most recent dispatch, if any.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit.get().map(ExitReason::code)
    }
}
