//! Unit tests for remote command execution.

use std::time::Duration;

use rstest::{fixture, rstest};

use super::{
    RemoteCommand, RemoteCommandRunner, RemoteTarget, SshHost, SsmInstance, escape_command,
    powershell_env_lines, render_script,
};
use crate::aws::AwsContext;
use crate::config::AgentConfig;
use crate::events::Level;
use crate::exec::Env;
use crate::test_support::{RecordingLogger, ScriptedRunner, sample_config};

#[fixture]
fn config() -> AgentConfig {
    sample_config("/tmp/hal-test")
}

fn ssh_target() -> RemoteTarget {
    RemoteTarget::Ssh(SshHost {
        user: String::from("hal"),
        host: String::from("build.example.com"),
        port: 2222,
    })
}

fn ssm_target() -> RemoteTarget {
    RemoteTarget::Ssm(SsmInstance {
        instance_id: String::from("i-0abc"),
        context: AwsContext {
            region: String::from("us-east-1"),
            profile: None,
        },
    })
}

#[test]
fn escape_command_quotes_each_token() {
    assert_eq!(
        escape_command("rm -rf /tmp/x && echo $HOME"),
        "rm -rf /tmp/x '&&' echo '$HOME'"
    );
}

#[test]
fn render_script_exports_env_before_commands() {
    let mut env = Env::new();
    env.insert(String::from("TOKEN"), String::from("a b"));
    let script = render_script(&[String::from("cd /x"), String::from("make")], &env);
    assert_eq!(script, "export TOKEN='a b'; cd /x && make");
}

#[test]
fn powershell_env_lines_double_single_quotes() {
    let mut env = Env::new();
    env.insert(String::from("NAME"), String::from("it's"));
    assert_eq!(powershell_env_lines(&env), vec![String::from("$env:NAME = 'it''s'")]);
}

#[rstest]
fn ssh_invocation_uses_configured_options(config: AgentConfig) {
    let runner = ScriptedRunner::new();
    runner.push_stdout("ok");
    let logger = RecordingLogger::new();
    let remote = RemoteCommandRunner::new(runner.clone(), &logger, &config);

    assert!(remote.run(
        &ssh_target(),
        &RemoteCommand::line("uname -a"),
        &Env::new(),
        Duration::from_secs(5),
        "Inspect host"
    ));

    let lines = runner.command_lines();
    assert_eq!(
        lines,
        vec![String::from(
            "ssh -p 2222 -o BatchMode=yes -o StrictHostKeyChecking=no \
             -o UserKnownHostsFile=/dev/null hal@build.example.com uname -a"
        )]
    );
    let events = logger.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events.first().map(|event| event.level), Some(Level::Success));
}

#[rstest]
fn quiet_commands_emit_no_event(config: AgentConfig) {
    let runner = ScriptedRunner::new();
    runner.push_failure(1);
    let logger = RecordingLogger::new();
    let remote = RemoteCommandRunner::new(runner, &logger, &config);

    assert!(!remote.run(
        &ssh_target(),
        &RemoteCommand::line("true").quiet(),
        &Env::new(),
        Duration::from_secs(5),
        "Poll"
    ));
    assert!(logger.events().is_empty());
}

#[rstest]
fn ssh_timeout_has_distinct_message(config: AgentConfig) {
    let runner = ScriptedRunner::new();
    runner.push_timeout("ssh", 7);
    runner.push_failure(1);
    let logger = RecordingLogger::new();
    let remote = RemoteCommandRunner::new(runner, &logger, &config);
    let command = RemoteCommand::line("make");

    let timeout = Duration::from_secs(7);
    assert!(!remote.run(&ssh_target(), &command, &Env::new(), timeout, "Build"));
    assert!(!remote.run(&ssh_target(), &command, &Env::new(), timeout, "Build"));

    assert_eq!(
        logger.failure_messages(),
        vec![
            String::from("Build timed out after 7 seconds"),
            String::from("Build")
        ]
    );
}

#[rstest]
fn capture_returns_trimmed_stdout(config: AgentConfig) {
    let runner = ScriptedRunner::new();
    runner.push_stdout("1000\n");
    let logger = RecordingLogger::new();
    let remote = RemoteCommandRunner::new(runner, &logger, &config);

    let uid = remote.capture(
        &ssh_target(),
        &RemoteCommand::line("ls -ldn /x | awk '{print $3}'"),
        &Env::new(),
        Duration::from_secs(5),
        "Owner",
    );
    assert_eq!(uid.as_deref(), Some("1000"));
}

#[rstest]
fn ssm_run_prepends_env_and_reports_exit_code(config: AgentConfig) {
    let runner = ScriptedRunner::new();
    runner.push_ssm_failure(4, "boom");
    let logger = RecordingLogger::new();
    let remote = RemoteCommandRunner::new(runner.clone(), &logger, &config);
    let mut env = Env::new();
    env.insert(String::from("STAGE"), String::from("prod"));

    assert!(!remote.run(
        &ssm_target(),
        &RemoteCommand::line("Write-Output hi"),
        &env,
        Duration::from_secs(30),
        "Windows step"
    ));

    assert_eq!(
        runner.ssm_scripts(),
        vec![vec![
            String::from("$env:STAGE = 'prod'"),
            String::from("Write-Output hi")
        ]]
    );
    let failures = logger.at_level(Level::Failure);
    let failure = failures.first().expect("one failure");
    assert_eq!(failure.context.get("exit_code"), Some("4"));
    assert_eq!(failure.context.get("errors"), Some("boom"));
    assert!(
        failure.context.get("command").is_some_and(|cmd| !cmd.contains("prod")),
        "environment values must not be logged"
    );
}

#[rstest]
fn ssm_deadline_cancels_and_reports_timeout(config: AgentConfig) {
    let runner = ScriptedRunner::new();
    runner.push_ssm_sent();
    runner.push_ssm_status("InProgress", -1, "", "");
    runner.push_success();
    let logger = RecordingLogger::new();
    let remote = RemoteCommandRunner::new(runner.clone(), &logger, &config);

    assert!(!remote.run(
        &ssm_target(),
        &RemoteCommand::line("Start-Sleep 600"),
        &Env::new(),
        Duration::ZERO,
        "Slow step"
    ));

    assert!(
        runner
            .command_lines()
            .last()
            .is_some_and(|line| line.contains("cancel-command")),
        "expected cancel call: {:?}",
        runner.command_lines()
    );
    assert_eq!(
        logger.failure_messages(),
        vec![String::from("Slow step timed out after 0 seconds")]
    );
}

#[rstest]
fn ssm_api_calls_use_the_internal_timeout(config: AgentConfig) {
    let runner = ScriptedRunner::new();
    runner.push_ssm_success("ok");
    let logger = RecordingLogger::new();
    let remote = RemoteCommandRunner::new(runner.clone(), &logger, &config);

    assert!(remote.run(
        &ssm_target(),
        &RemoteCommand::line("Write-Output ok"),
        &Env::new(),
        Duration::from_secs(3600),
        "Windows step"
    ));

    let timeouts: Vec<Duration> = runner
        .invocations()
        .iter()
        .map(|invocation| invocation.timeout)
        .collect();
    assert_eq!(timeouts.len(), 2);
    assert!(
        timeouts
            .iter()
            .all(|timeout| *timeout == config.timeouts().internal),
        "unexpected call timeouts: {timeouts:?}"
    );
}
