//! Test support utilities shared across unit and integration tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::cleanup::EmergencyCleanup;
use crate::config::AgentConfig;
use crate::events::{EventContext, EventLogger, Level, Stage};
use crate::exec::{CommandOutput, CommandRunner, ExecError, Invocation};
use crate::platform::Toolkit;

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Clones share the same queue and invocation log.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<Result<CommandOutput, ExecError>>>>,
    invocations: Rc<RefCell<Vec<Invocation>>>,
    ssm_commands: Rc<Cell<u32>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    /// Returns every invocation rendered as a command line.
    #[must_use]
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(Invocation::command_line)
            .collect()
    }

    /// Number of queued responses not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with stdout text.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(Ok(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }));
    }

    /// Pushes a timeout for `program`.
    pub fn push_timeout(&self, program: &str, seconds: u64) {
        self.responses
            .borrow_mut()
            .push_back(Err(ExecError::Timeout {
                program: program.to_owned(),
                seconds,
            }));
    }

    /// Pushes a spawn failure for `program`.
    pub fn push_spawn_error(&self, program: &str) {
        self.responses.borrow_mut().push_back(Err(ExecError::Spawn {
            program: program.to_owned(),
            message: String::from("simulated spawn failure"),
        }));
    }

    /// Pushes the `send-command` response of an SSM call.
    pub fn push_ssm_sent(&self) {
        let id = self.ssm_commands.get() + 1;
        self.ssm_commands.set(id);
        self.push_stdout(format!(r#"{{"Command":{{"CommandId":"cmd-{id}"}}}}"#));
    }

    /// Pushes a `get-command-invocation` response.
    pub fn push_ssm_status(&self, status: &str, code: i32, stdout: &str, stderr: &str) {
        let body = serde_json::json!({
            "Status": status,
            "ResponseCode": code,
            "StandardOutputContent": stdout,
            "StandardErrorContent": stderr,
        });
        self.push_stdout(body.to_string());
    }

    /// Pushes a complete SSM call that succeeds with `stdout`.
    pub fn push_ssm_success(&self, stdout: &str) {
        self.push_ssm_sent();
        self.push_ssm_status("Success", 0, stdout, "");
    }

    /// Pushes a complete SSM call that fails with `code`.
    pub fn push_ssm_failure(&self, code: i32, stderr: &str) {
        self.push_ssm_sent();
        self.push_ssm_status("Failed", code, "", stderr);
    }

    /// Returns the script lines of every SSM `send-command` call, in order.
    #[must_use]
    pub fn ssm_scripts(&self) -> Vec<Vec<String>> {
        self.invocations
            .borrow()
            .iter()
            .filter_map(ssm_script)
            .collect()
    }
}

fn ssm_script(invocation: &Invocation) -> Option<Vec<String>> {
    let args: Vec<String> = invocation
        .args
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    if !args.iter().any(|arg| arg == "send-command") {
        return None;
    }
    let position = args.iter().position(|arg| arg == "--parameters")?;
    let parameters: serde_json::Value = serde_json::from_str(args.get(position + 1)?).ok()?;
    serde_json::from_value(parameters.get("commands")?.clone()).ok()
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        self.invocations.borrow_mut().push(invocation.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ExecError::Spawn {
                    program: invocation.program.clone(),
                    message: String::from("no scripted response available"),
                })
            })
    }
}

/// One event captured by [`RecordingLogger`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedEvent {
    /// Event severity.
    pub level: Level,
    /// Event message.
    pub message: String,
    /// Event context.
    pub context: EventContext,
}

/// Event logger that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    events: RefCell<Vec<RecordedEvent>>,
    stages: RefCell<Vec<Stage>>,
}

impl RecordingLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.borrow().clone()
    }

    /// Returns the events recorded at `level`.
    #[must_use]
    pub fn at_level(&self, level: Level) -> Vec<RecordedEvent> {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.level == level)
            .cloned()
            .collect()
    }

    /// Returns the messages of all failure events.
    #[must_use]
    pub fn failure_messages(&self) -> Vec<String> {
        self.at_level(Level::Failure)
            .into_iter()
            .map(|event| event.message)
            .collect()
    }

    /// Returns `true` when any event message contains `needle`.
    #[must_use]
    pub fn mentions(&self, needle: &str) -> bool {
        self.events
            .borrow()
            .iter()
            .any(|event| event.message.contains(needle))
    }

    /// Returns the stages set so far, in order.
    #[must_use]
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.borrow().clone()
    }
}

impl EventLogger for RecordingLogger {
    fn event(&self, level: Level, message: &str, context: &EventContext) {
        self.events.borrow_mut().push(RecordedEvent {
            level,
            message: message.to_owned(),
            context: context.clone(),
        });
    }

    fn set_stage(&self, stage: Stage) {
        self.stages.borrow_mut().push(stage);
    }
}

/// Returns a valid configuration rooted at `root` with short timeouts and a
/// configured Unix build host.
#[must_use]
pub fn sample_config(root: &str) -> AgentConfig {
    AgentConfig {
        jobs_dir: format!("{root}/jobs"),
        workspace_root: format!("{root}/work"),
        archive_root: format!("{root}/archives"),
        archive_prefix: String::from("hal9000"),
        ssh_bin: String::from("ssh"),
        rsync_bin: String::from("rsync"),
        aws_bin: String::from("aws"),
        tar_bin: String::from("tar"),
        ssh_user: String::from("hal"),
        ssh_identity_file: None,
        ssh_batch_mode: true,
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        unix_build_host: Some(String::from("build.example.com")),
        unix_build_port: 22,
        unix_remote_root: String::from("/home/hal/workspaces"),
        unix_docker_source: String::from("/home/hal/docker-images"),
        windows_transfer_path: format!("{root}/transfer"),
        build_timeout_secs: 60,
        internal_timeout_secs: 10,
        prepare_timeout_secs: 30,
        ssm_poll_interval_ms: 1,
    }
}

/// Bundles test collaborators into a platform [`Toolkit`].
#[must_use]
pub fn toolkit<'t, 'a>(
    runner: &'a ScriptedRunner,
    logger: &'a RecordingLogger,
    config: &'a AgentConfig,
    cleanup: &'t EmergencyCleanup<'a>,
) -> Toolkit<'t, 'a> {
    Toolkit {
        runner,
        logger,
        config,
        cleanup,
    }
}
