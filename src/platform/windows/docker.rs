//! Multi-container builder on a Windows instance.

use crate::events::EventContext;
use crate::exec::{CommandRunner, Env};
use crate::platform::{Toolkit, run_steps_within};
use crate::remote::{
    RemoteCommand, RemoteCommandRunner, RemoteTarget, SsmInstance, powershell_quote,
};

use super::powershell::{
    checked, copy_input_to_output, ensure_dir, prepare_instance, remove_dir, shift_workspace,
};
use super::scripts::{
    CONTAINER_SCRIPTS, CONTAINER_WORKSPACE, GeneratedScript, InstanceLayout, Materialized,
    ScriptTarget, materialize, plan_jobs,
};

/// Runs commands in one Windows container per run of steps sharing an
/// image. The output workspace of each container becomes the input of the
/// next.
pub struct DockerBuilder<'t, 'a> {
    toolkit: Toolkit<'t, 'a>,
    target: RemoteTarget,
    layout: InstanceLayout,
}

impl<'t, 'a> DockerBuilder<'t, 'a> {
    /// Creates a builder for `instance` using the directories in `layout`.
    #[must_use]
    pub const fn new(toolkit: Toolkit<'t, 'a>, instance: SsmInstance, layout: InstanceLayout) -> Self {
        Self {
            toolkit,
            target: RemoteTarget::Ssm(instance),
            layout,
        }
    }

    /// Runs `commands` for job `job_id`, starting from `image`.
    ///
    /// Returns `true` only when every step in every container succeeded.
    /// Any failure aborts the remaining containers after running the
    /// current container's cleanup.
    #[must_use]
    pub fn build(&self, job_id: &str, image: &str, commands: &[String], env: &Env) -> bool {
        let materialized = match plan_jobs(image, commands).and_then(|plan| {
            materialize(&plan, env, &self.layout, ScriptTarget::Container)
        }) {
            Ok(materialized) => materialized,
            Err(err) => {
                self.toolkit.logger.failure(
                    "Build scripts could not be generated",
                    &EventContext::new().with("error", err.to_string()),
                );
                return false;
            }
        };

        if !self.prepare(&materialized) {
            return false;
        }
        if materialized.jobs.is_empty() {
            return self.call(copy_input_to_output(&self.layout), "Copy workspace to output");
        }

        let last = materialized.jobs.len().saturating_sub(1);
        let total = materialized.step_count();
        let mut offset = 0;
        for (index, job) in materialized.jobs.iter().enumerate() {
            let container = format!("hal-{job_id}-{index}");
            let steps = StepWindow { offset, total };
            if !self.run_container(&container, &job.image, &job.scripts, steps) {
                return false;
            }
            offset += job.scripts.len();
            if index < last && !self.shift() {
                return false;
            }
        }
        true
    }

    fn remote(&self) -> RemoteCommandRunner<'a, &'a dyn CommandRunner> {
        self.toolkit.remote()
    }

    fn prepare(&self, materialized: &Materialized) -> bool {
        let lines = prepare_instance(&self.layout, &materialized.files(), true);
        let command = RemoteCommand::script(lines).with_summary(format!(
            "write {} build scripts to {}",
            materialized.step_count(),
            self.layout.scripts_dir()
        ));
        self.remote().run(
            &self.target,
            &command,
            &Env::new(),
            self.toolkit.timeouts().prepare,
            "Prepare build instance",
        )
    }

    fn call(&self, lines: Vec<String>, label: &str) -> bool {
        self.remote().run(
            &self.target,
            &RemoteCommand::script(lines),
            &Env::new(),
            self.toolkit.timeouts().internal,
            label,
        )
    }

    fn run_container(
        &self,
        container: &str,
        image: &str,
        scripts: &[GeneratedScript],
        steps: StepWindow,
    ) -> bool {
        let cleanup = self.toolkit.cleanup;
        let created = self.call(
            checked(format!(
                "docker create --name {container} --workdir {CONTAINER_WORKSPACE} {image} \
                 powershell -NoProfile -Command Start-Sleep -Seconds 2147483"
            )),
            "Create build container",
        );
        if !created {
            return cleanup.bombout(false);
        }
        self.register_cleanup(container);

        let mut copy_in = checked(format!(
            "docker cp {} {container}:{CONTAINER_WORKSPACE}",
            powershell_quote(&format!("{}\\.", self.layout.input_dir()))
        ));
        copy_in.extend(checked(format!(
            "docker cp {} {container}:{CONTAINER_SCRIPTS}",
            powershell_quote(&format!("{}\\.", self.layout.scripts_dir()))
        )));
        if !self.call(copy_in, "Copy workspace into container") {
            return cleanup.bombout(false);
        }

        if !self.call(checked(format!("docker start {container}")), "Start build container") {
            return cleanup.bombout(false);
        }

        let remote = self.remote();
        let build_timeout = self.toolkit.timeouts().build;
        let logger = self.toolkit.logger;
        let succeeded = run_steps_within(logger, scripts, steps.offset, steps.total, |_, script| {
            remote.run(
                &self.target,
                &RemoteCommand::script(checked(format!(
                    "docker exec {container} powershell -NoProfile -ExecutionPolicy Bypass -File {}",
                    script.run_path
                )))
                .with_summary(script.command.clone()),
                &Env::new(),
                build_timeout,
                "Run build step",
            )
        });
        if !succeeded {
            return cleanup.bombout(false);
        }

        let output = self.layout.output_dir();
        let mut copy_out = checked(format!("docker stop {container}"));
        copy_out.push(remove_dir(&output));
        copy_out.push(ensure_dir(&output));
        copy_out.extend(checked(format!(
            "docker cp {container}:{CONTAINER_WORKSPACE}\\. {}",
            powershell_quote(&output)
        )));
        if !self.call(copy_out, "Copy workspace out of container") {
            return cleanup.bombout(false);
        }

        cleanup.invoke();
        true
    }

    fn shift(&self) -> bool {
        self.call(shift_workspace(&self.layout), "Shift workspace to next container")
    }

    fn register_cleanup(&self, container: &str) {
        let toolkit = self.toolkit;
        let (runner, logger, config) = (toolkit.runner, toolkit.logger, toolkit.config);
        let target = self.target.clone();
        let line = format!("docker rm --force {container}");
        toolkit.cleanup.arm(move || {
            let remote = RemoteCommandRunner::new(runner, logger, config);
            let removed = remote.run(
                &target,
                &RemoteCommand::line(line),
                &Env::new(),
                config.timeouts().internal,
                "Remove build container",
            );
            if !removed {
                tracing::warn!("build container left behind");
            }
        });
    }
}

/// Position of one container's scripts within the whole job.
#[derive(Clone, Copy)]
struct StepWindow {
    offset: usize,
    total: usize,
}
