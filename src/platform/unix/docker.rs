//! Docker-over-SSH builder.

use shell_escape::unix::escape;

use crate::events::EventContext;
use crate::exec::Env;
use crate::platform::{Toolkit, run_steps};
use crate::remote::{RemoteCommand, RemoteCommandRunner, RemoteTarget, SshHost};

const CONTAINER_WORKDIR: &str = "/build";
const IMAGE_TAG_PREFIX: &str = "hal-agent";

/// Builds an image from the host's Docker source directory and runs each
/// command inside one container with the remote workspace mounted.
pub struct DockerBuilder<'t, 'a> {
    toolkit: Toolkit<'t, 'a>,
    target: RemoteTarget,
}

impl<'t, 'a> DockerBuilder<'t, 'a> {
    /// Creates a builder for `host`.
    #[must_use]
    pub const fn new(toolkit: Toolkit<'t, 'a>, host: SshHost) -> Self {
        Self {
            toolkit,
            target: RemoteTarget::Ssh(host),
        }
    }

    /// Runs `commands` in a container built from image `name`, with
    /// `remote_dir` mounted at `/build`. Returns `true` when every command
    /// succeeded.
    #[must_use]
    pub fn build(&self, name: &str, remote_dir: &str, commands: &[String], env: &Env) -> bool {
        let remote = self.toolkit.remote();
        let timeouts = self.toolkit.timeouts();
        let no_env = Env::new();
        let source = format!(
            "{}/{name}",
            self.toolkit.config.unix_docker_source.trim_end_matches('/')
        );
        let tag = format!("{IMAGE_TAG_PREFIX}/{name}");
        let escaped_dir = escape(remote_dir.into());

        let source_exists = remote.run(
            &self.target,
            &RemoteCommand::line(format!("test -d {}", escape(source.as_str().into()))),
            &no_env,
            timeouts.internal,
            "Validate Docker image source",
        );
        if !source_exists {
            return false;
        }

        let image_built = remote.run(
            &self.target,
            &RemoteCommand::line(format!(
                "docker build --tag {} {}",
                escape(tag.as_str().into()),
                escape(source.as_str().into())
            )),
            &no_env,
            timeouts.prepare,
            "Build Docker image",
        );
        if !image_built {
            return false;
        }

        let Some(owner) = remote.capture(
            &self.target,
            &RemoteCommand::line(format!("ls -ldn {escaped_dir} | awk '{{print $3}}'")),
            &no_env,
            timeouts.internal,
            "Read workspace owner",
        ) else {
            return false;
        };
        let Some(group) = remote.capture(
            &self.target,
            &RemoteCommand::line(format!("ls -ldn {escaped_dir} | awk '{{print $4}}'")),
            &no_env,
            timeouts.internal,
            "Read workspace group",
        ) else {
            return false;
        };
        if !is_numeric_id(&owner) || !is_numeric_id(&group) {
            self.toolkit.logger.failure(
                "Workspace ownership could not be determined",
                &EventContext::new()
                    .with("owner", owner.as_str())
                    .with("group", group.as_str()),
            );
            return false;
        }

        let mut run = format!(
            "docker run --detach --tty --interactive \
             --volume {escaped_dir}:{CONTAINER_WORKDIR} --workdir {CONTAINER_WORKDIR}"
        );
        for key in env.keys() {
            run.push_str(" --env ");
            run.push_str(key);
        }
        run.push(' ');
        run.push_str(&escape(tag.as_str().into()));
        run.push_str(" sh");

        let Some(container) = remote.capture(
            &self.target,
            &RemoteCommand::line(run),
            env,
            timeouts.internal,
            "Start Docker container",
        ) else {
            return false;
        };
        if container.is_empty() || !container.chars().all(|ch| ch.is_ascii_hexdigit()) {
            self.toolkit.logger.failure(
                "Docker did not return a container ID",
                &EventContext::new().with("output", container.as_str()),
            );
            return false;
        }

        self.register_cleanup(&container, &owner, &group);

        let succeeded = run_steps(self.toolkit.logger, commands, |_, command| {
            let line = format!(
                "docker exec {container} sh -c {}",
                escape(command.as_str().into())
            );
            remote.run(
                &self.target,
                &RemoteCommand::line(line),
                &no_env,
                timeouts.build,
                "Run build command",
            )
        });

        self.toolkit.cleanup.invoke();
        succeeded
    }

    fn register_cleanup(&self, container: &str, owner: &str, group: &str) {
        let toolkit = self.toolkit;
        let (runner, logger, config) = (toolkit.runner, toolkit.logger, toolkit.config);
        let target = self.target.clone();
        let commands = [
            (
                format!("docker exec {container} chown -R {owner}:{group} {CONTAINER_WORKDIR}"),
                "Restore workspace ownership",
            ),
            (format!("docker kill {container}"), "Stop Docker container"),
            (format!("docker rm {container}"), "Remove Docker container"),
        ];
        toolkit.cleanup.arm(move || {
            let remote = RemoteCommandRunner::new(runner, logger, config);
            let timeout = config.timeouts().internal;
            for (line, label) in commands {
                let done = remote.run(&target, &RemoteCommand::line(line), &Env::new(), timeout, label);
                if !done {
                    tracing::warn!(label, "container cleanup step failed");
                }
            }
        });
    }
}

fn is_numeric_id(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ch.is_ascii_digit())
}
