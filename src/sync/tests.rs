//! Unit tests for rsync transfers.

use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::rstest;

use super::{SyncEndpoint, SyncMode, Syncer};
use crate::events::Level;
use crate::remote::SshHost;
use crate::test_support::{RecordingLogger, ScriptedRunner, sample_config};

fn remote(path: &str) -> SyncEndpoint {
    SyncEndpoint::Remote {
        host: SshHost {
            user: String::from("hal"),
            host: String::from("build.example.com"),
            port: 2222,
        },
        path: path.to_owned(),
    }
}

fn local(path: &str) -> SyncEndpoint {
    SyncEndpoint::Local(Utf8PathBuf::from(path))
}

#[rstest]
#[case(
    local("/work/b1"),
    remote("/remote/b1"),
    SyncMode::Mirror,
    "rsync -az --delete --rsh ssh -p 2222 -o BatchMode=yes -o StrictHostKeyChecking=no \
     -o UserKnownHostsFile=/dev/null /work/b1/ hal@build.example.com:/remote/b1"
)]
#[case(
    remote("/remote/b1"),
    local("/work/b1"),
    SyncMode::Mirror,
    "rsync -az --delete --rsh ssh -p 2222 -o BatchMode=yes -o StrictHostKeyChecking=no \
     -o UserKnownHostsFile=/dev/null hal@build.example.com:/remote/b1/ /work/b1"
)]
#[case(
    local("/src/app"),
    local("/work/b1"),
    SyncMode::GitAware,
    "rsync -az --delete --filter=:- .gitignore --exclude .git/ /src/app/ /work/b1"
)]
fn transfer_builds_expected_command(
    #[case] from: SyncEndpoint,
    #[case] to: SyncEndpoint,
    #[case] mode: SyncMode,
    #[case] expected: &str,
) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let syncer = Syncer::new(runner.clone(), &logger, &config);

    assert!(syncer.transfer(&from, &to, mode, Duration::from_secs(5), "Transfer"));
    assert_eq!(runner.command_lines(), vec![expected.to_owned()]);
    assert_eq!(logger.at_level(Level::Success).len(), 1);
}

#[test]
fn failed_transfer_logs_failure() {
    let runner = ScriptedRunner::new();
    runner.push_failure(23);
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let syncer = Syncer::new(runner, &logger, &config);

    assert!(!syncer.transfer(
        &local("/a"),
        &local("/b"),
        SyncMode::Mirror,
        Duration::from_secs(5),
        "Copy"
    ));
    let failures = logger.at_level(Level::Failure);
    assert_eq!(
        failures.first().and_then(|event| event.context.get("exit_code")),
        Some("23")
    );
}
