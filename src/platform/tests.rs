//! Unit tests for platform dispatch and the SSH-based platforms.

use std::cell::{OnceCell, RefCell};

use camino::Utf8PathBuf;
use rstest::rstest;

use super::{
    Dispatcher, LocalPlatform, Platform, PlatformRegistry, RsyncPlatform, UnixPlatform,
    default_registry, run_steps,
};
use crate::cleanup::EmergencyCleanup;
use crate::events::{EventContext, EventLogger, Level, Stage};
use crate::exec::Env;
use crate::exit::ExitReason;
use crate::job::{Deployment, JobProperties};
use crate::test_support::{RecordingLogger, ScriptedRunner, sample_config, toolkit};

fn commands(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}

fn job(image: Option<&str>) -> JobProperties {
    JobProperties {
        id: String::from("b42"),
        image: image.map(str::to_owned),
        env: Env::new(),
        platform_config: Default::default(),
        deployment: None,
        post_push: Vec::new(),
        workspace: Utf8PathBuf::from("/tmp/hal-test/work/b42"),
    }
}

fn push_job() -> JobProperties {
    let mut properties = job(None);
    properties.deployment = Some(Deployment {
        platform: String::from("rsync"),
        server: String::from("web1.example.com"),
        user: String::from("deploy"),
        path: String::from("/srv/app"),
        port: 22,
    });
    properties.post_push = commands(&["systemctl restart app"]);
    properties
}

fn position(lines: &[String], needle: &str) -> usize {
    lines
        .iter()
        .position(|line| line.contains(needle))
        .unwrap_or_else(|| panic!("no command contains {needle:?}: {lines:#?}"))
}

#[test]
fn unknown_platform_fails_without_running_anything() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    let registry = default_registry(toolkit(&runner, &logger, &config, &cleanup));
    let dispatcher = Dispatcher::new(&registry, &logger, Stage::Building);

    let reason = dispatcher.dispatch("bogus", &commands(&["make"]), &job(None));

    assert_eq!(reason, ExitReason::InvalidPlatform);
    assert_eq!(dispatcher.exit_code(), Some(5));
    assert!(runner.invocations().is_empty());
    assert!(logger.stages().is_empty());
    let failures = logger.at_level(Level::Failure);
    assert_eq!(failures.len(), 1);
    let failure = failures.first().expect("failure event");
    assert_eq!(failure.message, "Invalid platform specified");
    assert_eq!(failure.context.get("platform"), Some("bogus"));
    assert_eq!(
        failure.context.get("available"),
        Some("linux, local, rsync, unix, windows")
    );
}

#[test]
fn unavailable_platform_is_treated_as_unknown() {
    let logger = RecordingLogger::new();
    let registry = PlatformRegistry::new().with("broken", || None);
    let dispatcher = Dispatcher::new(&registry, &logger, Stage::Building);

    assert_eq!(
        dispatcher.dispatch("broken", &[], &job(None)),
        ExitReason::InvalidPlatform
    );
    assert_eq!(dispatcher.exit_reason(), Some(ExitReason::InvalidPlatform));
}

struct FixedOutcome(Result<(), ExitReason>);

impl Platform for FixedOutcome {
    fn run(&self, _commands: &[String], _job: &JobProperties) -> Result<(), ExitReason> {
        self.0
    }
}

/// Records the dispatcher's exit reason each time a platform is about to run.
struct DispatchWatcher<'d, 't> {
    dispatcher: OnceCell<&'d Dispatcher<'d, 't>>,
    seen: RefCell<Vec<Option<ExitReason>>>,
}

impl EventLogger for DispatchWatcher<'_, '_> {
    fn event(&self, _level: Level, _message: &str, _context: &EventContext) {}

    fn set_stage(&self, _stage: Stage) {
        if let Some(dispatcher) = self.dispatcher.get() {
            self.seen.borrow_mut().push(dispatcher.exit_reason());
        }
    }
}

#[test]
fn each_dispatch_starts_without_an_exit_reason() {
    let registry = PlatformRegistry::new()
        .with("failing", || {
            Some(Box::new(FixedOutcome(Err(ExitReason::BuildFailed))))
        })
        .with("passing", || Some(Box::new(FixedOutcome(Ok(())))));
    let watcher = DispatchWatcher {
        dispatcher: OnceCell::new(),
        seen: RefCell::new(Vec::new()),
    };
    let dispatcher = Dispatcher::new(&registry, &watcher, Stage::Building);
    assert!(watcher.dispatcher.set(&dispatcher).is_ok());

    assert_eq!(
        dispatcher.dispatch("failing", &[], &job(None)),
        ExitReason::BuildFailed
    );
    assert_eq!(dispatcher.exit_reason(), Some(ExitReason::BuildFailed));

    assert_eq!(
        dispatcher.dispatch("passing", &[], &job(None)),
        ExitReason::Success
    );
    assert_eq!(dispatcher.exit_reason(), Some(ExitReason::Success));
    assert_eq!(dispatcher.exit_code(), Some(0));
    assert_eq!(*watcher.seen.borrow(), vec![None, None]);
}

#[test]
fn unknown_platform_replaces_an_earlier_exit_reason() {
    let logger = RecordingLogger::new();
    let registry =
        PlatformRegistry::new().with("passing", || Some(Box::new(FixedOutcome(Ok(())))));
    let dispatcher = Dispatcher::new(&registry, &logger, Stage::Building);

    assert_eq!(
        dispatcher.dispatch("passing", &[], &job(None)),
        ExitReason::Success
    );
    assert_eq!(
        dispatcher.dispatch("missing", &[], &job(None)),
        ExitReason::InvalidPlatform
    );
    assert_eq!(dispatcher.exit_reason(), Some(ExitReason::InvalidPlatform));
}

#[test]
fn dispatch_sets_stage_and_records_success() {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_success();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    let registry = default_registry(toolkit(&runner, &logger, &config, &cleanup));
    let dispatcher = Dispatcher::new(&registry, &logger, Stage::Building);
    assert_eq!(dispatcher.exit_code(), None);

    let reason = dispatcher.dispatch("local", &commands(&["make", "make test"]), &job(None));

    assert_eq!(reason, ExitReason::Success);
    assert_eq!(dispatcher.exit_code(), Some(0));
    assert_eq!(logger.stages(), vec![Stage::Building]);
    assert_eq!(runner.command_lines(), vec!["make", "make test"]);
}

#[rstest]
#[case(4, 0, "Skipping 3 remaining steps")]
#[case(4, 2, "Skipping 1 remaining steps")]
fn first_failure_stops_the_sequence(
    #[case] total: usize,
    #[case] failing: usize,
    #[case] message: &str,
) {
    let logger = RecordingLogger::new();
    let steps: Vec<usize> = (0..total).collect();
    let mut attempted = Vec::new();

    let succeeded = run_steps(&logger, &steps, |index, _| {
        attempted.push(index);
        index != failing
    });

    assert!(!succeeded);
    assert_eq!(attempted, (0..=failing).collect::<Vec<_>>());
    assert!(logger.mentions(message));
}

#[test]
fn failing_last_step_reports_nothing_skipped() {
    let logger = RecordingLogger::new();
    assert!(!run_steps(&logger, &[1, 2], |_, step| *step != 2));
    assert!(logger.events().is_empty());
}

#[test]
fn all_steps_succeeding_returns_true() {
    let logger = RecordingLogger::new();
    assert!(run_steps(&logger, &["a", "b"], |_, _| true));
    assert!(run_steps::<&str>(&logger, &[], |_, _| false));
}

#[test]
fn local_failure_maps_to_build_failed() {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_failure(2);
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    let platform = LocalPlatform::new(toolkit(&runner, &logger, &config, &cleanup));

    let result = platform.run(&commands(&["make", "make test", "make dist"]), &job(None));

    assert_eq!(result, Err(ExitReason::BuildFailed));
    assert_eq!(runner.invocations().len(), 2);
    assert!(logger.mentions("Skipping 1 remaining steps"));
    let invocation = runner.invocations().into_iter().next().expect("invocation");
    assert_eq!(
        invocation.cwd.as_deref().map(camino::Utf8Path::as_str),
        Some("/tmp/hal-test/work/b42")
    );
}

#[test]
fn rsync_runs_pre_push_transfer_then_post_push() {
    let runner = ScriptedRunner::new();
    for _ in 0..3 {
        runner.push_success();
    }
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    let platform = RsyncPlatform::new(toolkit(&runner, &logger, &config, &cleanup));

    assert_eq!(platform.run(&commands(&["make deploy"]), &push_job()), Ok(()));

    let lines = runner.command_lines();
    assert_eq!(lines.len(), 3);
    assert!(lines.first().is_some_and(|line| line.starts_with("ssh -p 22")
        && line.ends_with("deploy@web1.example.com mkdir -p /srv/app && cd /srv/app && make deploy")));
    assert!(lines.get(1).is_some_and(|line| line.starts_with("rsync -az --delete")
        && line.ends_with("/tmp/hal-test/work/b42/ deploy@web1.example.com:/srv/app")));
    assert!(lines.get(2).is_some_and(|line| line.ends_with("systemctl restart app")));
}

#[rstest]
#[case(None)]
#[case(Some("not a host"))]
fn rsync_without_valid_target_is_a_config_error(#[case] server: Option<&str>) {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    let platform = RsyncPlatform::new(toolkit(&runner, &logger, &config, &cleanup));
    let mut properties = push_job();
    match server {
        Some(server) => {
            if let Some(deployment) = properties.deployment.as_mut() {
                deployment.server = server.to_owned();
            }
        }
        None => properties.deployment = None,
    }

    assert_eq!(
        platform.run(&commands(&["make deploy"]), &properties),
        Err(ExitReason::RsyncConfig)
    );
    assert!(runner.invocations().is_empty());
}

#[rstest]
#[case(&[Some(1)], ExitReason::RsyncPrePush)]
#[case(&[Some(0), Some(23)], ExitReason::RsyncTransfer)]
#[case(&[Some(0), Some(0), Some(1)], ExitReason::RsyncPostPush)]
fn rsync_failures_map_to_their_phase(#[case] codes: &[Option<i32>], #[case] expected: ExitReason) {
    let runner = ScriptedRunner::new();
    for code in codes {
        runner.push_output(*code, "", "");
    }
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    let platform = RsyncPlatform::new(toolkit(&runner, &logger, &config, &cleanup));

    assert_eq!(
        platform.run(&commands(&["make deploy"]), &push_job()),
        Err(expected)
    );
    assert_eq!(runner.remaining(), 0);
}

fn push_docker_setup(runner: &ScriptedRunner) {
    runner.push_success();
    runner.push_success();
    runner.push_success();
    runner.push_success();
    runner.push_stdout("1000\n");
    runner.push_stdout("1001\n");
    runner.push_stdout("4f2a9c\n");
}

#[test]
fn unix_docker_build_registers_cleanup_before_commands() {
    let runner = ScriptedRunner::new();
    push_docker_setup(&runner);
    for _ in 0..7 {
        runner.push_success();
    }
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    let platform = UnixPlatform::new(toolkit(&runner, &logger, &config, &cleanup));

    let result = platform.run(&commands(&["make", "make test"]), &job(Some("docker:builder")));

    assert_eq!(result, Ok(()));
    assert_eq!(runner.remaining(), 0);
    let lines = runner.command_lines();
    let order = [
        "mkdir -p /home/hal/workspaces/b42",
        "/tmp/hal-test/work/b42/ hal@build.example.com:/home/hal/workspaces/b42",
        "test -d /home/hal/docker-images/builder",
        "docker build --tag hal-agent/builder /home/hal/docker-images/builder",
        "print $3",
        "print $4",
        "docker run --detach --tty --interactive --volume /home/hal/workspaces/b42:/build",
        "docker exec 4f2a9c sh -c make",
        "docker exec 4f2a9c sh -c 'make test'",
        "chown -R 1000:1001 /build",
        "docker kill 4f2a9c",
        "docker rm 4f2a9c",
        "hal@build.example.com:/home/hal/workspaces/b42/ /tmp/hal-test/work/b42",
        "rm -rf /home/hal/workspaces/b42",
    ];
    let positions: Vec<usize> = order.iter().map(|needle| position(&lines, needle)).collect();
    assert_eq!(positions, (0..order.len()).collect::<Vec<_>>());
    assert!(!cleanup.is_armed());
}

#[test]
fn unix_docker_failure_still_removes_container_and_workspace() {
    let runner = ScriptedRunner::new();
    push_docker_setup(&runner);
    runner.push_failure(2);
    for _ in 0..4 {
        runner.push_success();
    }
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    let platform = UnixPlatform::new(toolkit(&runner, &logger, &config, &cleanup));

    let result = platform.run(&commands(&["make", "make test"]), &job(Some("docker:builder")));

    assert_eq!(result, Err(ExitReason::UnixBuild));
    assert_eq!(runner.remaining(), 0);
    let lines = runner.command_lines();
    assert!(!lines.iter().any(|line| line.contains("'make test'")));
    assert!(lines.last().is_some_and(|line| line.contains("rm -rf /home/hal/workspaces/b42")));
    assert!(logger.mentions("Skipping 1 remaining steps"));
}

#[test]
fn unix_native_build_runs_in_remote_directory() {
    let runner = ScriptedRunner::new();
    for _ in 0..5 {
        runner.push_success();
    }
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    let platform = UnixPlatform::new(toolkit(&runner, &logger, &config, &cleanup));

    assert_eq!(platform.run(&commands(&["./build.sh --release"]), &job(None)), Ok(()));
    let lines = runner.command_lines();
    assert!(lines.iter().any(|line| line.ends_with("cd /home/hal/workspaces/b42 && ./build.sh --release")));
}

#[rstest]
#[case(None, Some("docker:builder"))]
#[case(Some("build.example.com"), Some("docker:Bad/Name"))]
fn unix_configuration_problems_stop_before_remote_work(
    #[case] host: Option<&str>,
    #[case] image: Option<&str>,
) {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let mut config = sample_config("/tmp/hal-test");
    config.unix_build_host = host.map(str::to_owned);
    let cleanup = EmergencyCleanup::without_exit_guard();
    let platform = UnixPlatform::new(toolkit(&runner, &logger, &config, &cleanup));

    assert_eq!(
        platform.run(&commands(&["make"]), &job(image)),
        Err(ExitReason::UnixConfig)
    );
    assert!(runner.invocations().is_empty());
}
