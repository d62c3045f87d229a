//! Builder running scripts directly on a Windows instance.

use crate::events::EventContext;
use crate::exec::Env;
use crate::platform::{Toolkit, run_steps};
use crate::remote::{RemoteCommand, RemoteTarget, SsmInstance, powershell_quote};

use super::powershell::{checked, copy_input_to_output, prepare_instance};
use super::scripts::{InstanceLayout, PlannedJob, ScriptTarget, materialize};

/// Runs each command as its own SSM call inside the instance's input
/// directory, then copies the input directory to the output directory.
pub struct NativeBuilder<'t, 'a> {
    toolkit: Toolkit<'t, 'a>,
    target: RemoteTarget,
    layout: InstanceLayout,
}

impl<'t, 'a> NativeBuilder<'t, 'a> {
    /// Creates a builder for `instance` using the directories in `layout`.
    #[must_use]
    pub const fn new(toolkit: Toolkit<'t, 'a>, instance: SsmInstance, layout: InstanceLayout) -> Self {
        Self {
            toolkit,
            target: RemoteTarget::Ssm(instance),
            layout,
        }
    }

    /// Runs `commands` in order. Returns `true` when every step succeeded
    /// and the workspace was copied to the output directory.
    #[must_use]
    pub fn build(&self, commands: &[String], env: &Env) -> bool {
        let plan = [PlannedJob {
            image: String::new(),
            commands: commands.to_vec(),
        }];
        let materialized = match materialize(&plan, env, &self.layout, ScriptTarget::Instance) {
            Ok(materialized) => materialized,
            Err(err) => {
                self.toolkit.logger.failure(
                    "Build scripts could not be generated",
                    &EventContext::new().with("error", err.to_string()),
                );
                return false;
            }
        };

        let remote = self.toolkit.remote();
        let timeouts = self.toolkit.timeouts();
        let no_env = Env::new();

        let prepared = remote.run(
            &self.target,
            &RemoteCommand::script(prepare_instance(&self.layout, &materialized.files(), false))
                .with_summary(format!(
                    "write {} build scripts to {}",
                    materialized.step_count(),
                    self.layout.scripts_dir()
                )),
            &no_env,
            timeouts.prepare,
            "Prepare build instance",
        );
        if !prepared {
            return false;
        }

        let scripts = materialized
            .jobs
            .first()
            .map(|job| job.scripts.as_slice())
            .unwrap_or_default();
        let succeeded = run_steps(self.toolkit.logger, scripts, |_, script| {
            remote.run(
                &self.target,
                &RemoteCommand::script(checked(format!(
                    "powershell -NoProfile -ExecutionPolicy Bypass -File {}",
                    powershell_quote(&script.run_path)
                )))
                .with_summary(script.command.clone()),
                &no_env,
                timeouts.build,
                "Run build step",
            )
        });
        if !succeeded {
            return false;
        }

        remote.run(
            &self.target,
            &RemoteCommand::script(copy_input_to_output(&self.layout)),
            &no_env,
            timeouts.internal,
            "Copy workspace to output",
        )
    }
}
