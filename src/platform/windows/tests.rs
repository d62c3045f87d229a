//! Unit tests for the Windows platform.

use camino::Utf8PathBuf;
use rstest::rstest;

use super::{
    AwsResourceCleaner, DEFAULT_BASE_PATH, DockerBuilder, InstanceLayout, NativeBuilder,
    PlannedJob, ScriptError, ScriptTarget, ScriptTemplate, WindowsPlatform, materialize,
    plan_jobs, render_env_file,
};
use crate::aws::AwsContext;
use crate::cleanup::EmergencyCleanup;
use crate::events::Level;
use crate::exec::Env;
use crate::exit::ExitReason;
use crate::job::JobProperties;
use crate::platform::Platform;
use crate::remote::SsmInstance;
use crate::test_support::{RecordingLogger, ScriptedRunner, sample_config, toolkit};

const NOT_FOUND: &str = "An error occurred (404) when calling the HeadObject operation: Not Found";

fn commands(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}

fn instance() -> SsmInstance {
    SsmInstance {
        instance_id: String::from("i-0abc"),
        context: AwsContext {
            region: String::from("us-east-1"),
            profile: None,
        },
    }
}

fn layout() -> InstanceLayout {
    InstanceLayout::new(DEFAULT_BASE_PATH, "job-1")
}

fn job(workspace: Utf8PathBuf, image: Option<&str>) -> JobProperties {
    let platform_config = [
        ("region", "us-east-1"),
        ("bucket", "builds"),
        ("instance_id", "i-0abc"),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_owned(), value.to_owned()))
    .collect();
    JobProperties {
        id: String::from("job-1"),
        image: image.map(str::to_owned),
        env: Env::from([(String::from("API_TOKEN"), String::from("s3cr3t"))]),
        platform_config,
        deployment: None,
        post_push: Vec::new(),
        workspace,
    }
}

fn assert_scripts_in_order(runner: &ScriptedRunner, expected: &[&str]) {
    let scripts = runner.ssm_scripts();
    assert_eq!(scripts.len(), expected.len(), "scripts: {scripts:#?}");
    for (index, (script, needle)) in scripts.iter().zip(expected).enumerate() {
        let joined = script.join("\n");
        assert!(joined.contains(needle), "script {index} lacks {needle:?}:\n{joined}");
    }
}

#[test]
fn layout_nests_job_directories_under_base_path() {
    let layout = InstanceLayout::new(r"D:\builds\", "job-7");
    assert_eq!(layout.job_dir(), r"D:\builds\job-7");
    assert_eq!(layout.input_dir(), r"D:\builds\job-7\input");
    assert_eq!(layout.output_dir(), r"D:\builds\job-7\output");
    assert_eq!(layout.scripts_dir(), r"D:\builds\job-7\scripts");
}

#[test]
fn template_renders_header_env_command_and_exit_check() {
    let body = ScriptTemplate {
        command: "dotnet build",
        env_file_path: Some(r"C:\build-scripts\hal-env.ps1"),
        script_path: r"C:\build-scripts\hal-0-0.ps1",
        working_dir: r"C:\workspace",
    }
    .render();
    let expected = [
        r"# hal-agent build step C:\build-scripts\hal-0-0.ps1",
        "$ErrorActionPreference = 'Stop'",
        "trap { Write-Error $_; exit 1 }",
        r"Set-Location -LiteralPath 'C:\workspace'",
        r"if (Test-Path -LiteralPath 'C:\build-scripts\hal-env.ps1') { . 'C:\build-scripts\hal-env.ps1' }",
        "dotnet build",
        "if ($LASTEXITCODE) { exit $LASTEXITCODE }",
        "exit 0",
        "",
    ]
    .join("\r\n");
    assert_eq!(body, expected);
}

#[test]
fn template_without_env_file_skips_sourcing() {
    let body = ScriptTemplate {
        command: "dir",
        env_file_path: None,
        script_path: "s.ps1",
        working_dir: r"C:\w",
    }
    .render();
    assert!(!body.contains("Test-Path"));
}

#[test]
fn consecutive_steps_with_same_image_share_a_container() {
    let plan = plan_jobs(
        "mcr.microsoft.com/dotnet/sdk:8.0",
        &commands(&["restore", "build", "docker:node:20 npm ci", "docker:node:20 npm test", "pack"]),
    )
    .expect("plan");
    assert_eq!(
        plan,
        vec![
            PlannedJob {
                image: String::from("mcr.microsoft.com/dotnet/sdk:8.0"),
                commands: commands(&["restore", "build"]),
            },
            PlannedJob {
                image: String::from("node:20"),
                commands: commands(&["npm ci", "npm test"]),
            },
            PlannedJob {
                image: String::from("mcr.microsoft.com/dotnet/sdk:8.0"),
                commands: commands(&["pack"]),
            },
        ]
    );
}

#[rstest]
#[case(&["docker:Bad Image build"], ScriptError::InvalidImage { reference: String::from("Bad") })]
#[case(&["build", "docker:node:20"], ScriptError::EmptyCommand { step: 2 })]
fn planning_rejects_unusable_steps(#[case] steps: &[&str], #[case] expected: ScriptError) {
    assert_eq!(plan_jobs("node:20", &commands(steps)), Err(expected));
}

#[test]
fn materialized_files_are_deterministic() {
    let plan = plan_jobs("a", &commands(&["one", "two", "docker:b three"])).expect("plan");
    let env = Env::from([
        (String::from("B"), String::from("it's")),
        (String::from("A"), String::from("1")),
    ]);

    let first = materialize(&plan, &env, &layout(), ScriptTarget::Container).expect("render");
    let second = materialize(&plan, &env, &layout(), ScriptTarget::Container).expect("render");
    assert_eq!(first, second);

    let names: Vec<&str> = first
        .jobs
        .iter()
        .flat_map(|job| job.scripts.iter().map(|script| script.file_name.as_str()))
        .collect();
    assert_eq!(names, ["hal-0-0.ps1", "hal-0-1.ps1", "hal-1-0.ps1"]);
    assert_eq!(first.step_count(), 3);
    assert_eq!(
        first.env_file.body,
        "# hal-agent environment\r\n$env:A = '1'\r\n$env:B = 'it''s'\r\n"
    );
    assert_eq!(
        first.env_file.instance_path,
        r"C:\hal-agent\job-1\scripts\hal-env.ps1"
    );
    let script = first.jobs.first().and_then(|job| job.scripts.first()).expect("script");
    assert_eq!(script.run_path, r"C:\build-scripts\hal-0-0.ps1");
    assert_eq!(script.instance_path, r"C:\hal-agent\job-1\scripts\hal-0-0.ps1");
    assert!(script.body.contains(r"Set-Location -LiteralPath 'C:\workspace'"));
}

#[test]
fn instance_scripts_run_in_the_input_directory() {
    let plan = [PlannedJob {
        image: String::new(),
        commands: commands(&["msbuild"]),
    }];
    let rendered = materialize(&plan, &Env::new(), &layout(), ScriptTarget::Instance).expect("render");
    let script = rendered.jobs.first().and_then(|job| job.scripts.first()).expect("script");
    assert_eq!(script.run_path, script.instance_path);
    assert!(script.body.contains(r"Set-Location -LiteralPath 'C:\hal-agent\job-1\input'"));
}

#[test]
fn env_file_rejects_invalid_names() {
    let env = Env::from([(String::from("BAD-NAME"), String::from("x"))]);
    assert_eq!(
        render_env_file(&env),
        Err(ScriptError::InvalidEnvName {
            name: String::from("BAD-NAME")
        })
    );
}

#[test]
fn docker_builder_runs_containers_in_order_and_shifts_between_them() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    for _ in 0..15 {
        runner.push_ssm_success("");
    }

    let builder = DockerBuilder::new(toolkit(&runner, &logger, &config, &cleanup), instance(), layout());
    assert!(builder.build("job-1", "a", &commands(&["c1", "c2", "docker:b c3"]), &Env::new()));

    assert_scripts_in_order(
        &runner,
        &[
            "Get-Command docker",
            "docker create --name hal-job-1-0 --workdir C:\\workspace a ",
            "docker cp 'C:\\hal-agent\\job-1\\input\\.' hal-job-1-0:C:\\workspace",
            "docker start hal-job-1-0",
            "hal-0-0.ps1",
            "hal-0-1.ps1",
            "docker stop hal-job-1-0",
            "docker rm --force hal-job-1-0",
            "Copy-Item -Path 'C:\\hal-agent\\job-1\\output\\*'",
            "docker create --name hal-job-1-1 --workdir C:\\workspace b ",
            "hal-job-1-1:C:\\workspace",
            "docker start hal-job-1-1",
            "hal-1-0.ps1",
            "docker stop hal-job-1-1",
            "docker rm --force hal-job-1-1",
        ],
    );
    assert!(!cleanup.is_armed());
    assert!(logger.failure_messages().is_empty());
}

#[test]
fn docker_copy_paths_are_single_quoted_for_powershell() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    for _ in 0..8 {
        runner.push_ssm_success("");
    }

    let layout = InstanceLayout::new(r"D:\it's $env:TEMP", "job-1");
    let builder = DockerBuilder::new(toolkit(&runner, &logger, &config, &cleanup), instance(), layout);
    assert!(builder.build("job-1", "a", &commands(&["c1"]), &Env::new()));

    let joined = runner
        .ssm_scripts()
        .iter()
        .map(|script| script.join("\n"))
        .collect::<Vec<_>>()
        .join("\n");
    for expected in [
        r"docker cp 'D:\it''s $env:TEMP\job-1\input\.' hal-job-1-0:C:\workspace",
        r"docker cp 'D:\it''s $env:TEMP\job-1\scripts\.' hal-job-1-0:",
        r"docker cp hal-job-1-0:C:\workspace\. 'D:\it''s $env:TEMP\job-1\output'",
    ] {
        assert!(joined.contains(expected), "missing {expected:?}:\n{joined}");
    }
    assert!(!joined.contains("docker cp \""), "double-quoted copy path:\n{joined}");
}

#[test]
fn failing_step_stops_the_job_and_removes_the_container() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    for _ in 0..4 {
        runner.push_ssm_success("");
    }
    runner.push_ssm_failure(3, "tests failed");
    runner.push_ssm_success("");

    let builder = DockerBuilder::new(toolkit(&runner, &logger, &config, &cleanup), instance(), layout());
    let built = builder.build(
        "job-1",
        "a",
        &commands(&["c1", "c2", "c3", "docker:b c4"]),
        &Env::new(),
    );

    assert!(!built);
    assert!(logger.mentions("Skipping 3 remaining steps"));
    assert_scripts_in_order(
        &runner,
        &[
            "Get-Command docker",
            "docker create --name hal-job-1-0",
            "docker cp",
            "docker start hal-job-1-0",
            "hal-0-0.ps1",
            "docker rm --force hal-job-1-0",
        ],
    );
    assert!(!cleanup.is_armed());
}

#[test]
fn failure_at_the_end_of_a_container_counts_later_containers_as_skipped() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    for _ in 0..4 {
        runner.push_ssm_success("");
    }
    runner.push_ssm_failure(1, "compile error");
    runner.push_ssm_success("");

    let builder = DockerBuilder::new(toolkit(&runner, &logger, &config, &cleanup), instance(), layout());
    let built = builder.build(
        "job-1",
        "a",
        &commands(&["c1", "docker:b c2", "docker:c c3"]),
        &Env::new(),
    );

    assert!(!built);
    assert!(logger.mentions("Skipping 2 remaining steps"));
    assert_eq!(runner.ssm_scripts().len(), 6);
    assert!(!cleanup.is_armed());
}

#[test]
fn failure_in_a_later_container_counts_from_the_whole_job() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    // prepare, create, copy in, start, step, copy out, remove, shift,
    // create, copy in, start
    for _ in 0..11 {
        runner.push_ssm_success("");
    }
    runner.push_ssm_failure(1, "link error");
    runner.push_ssm_success("");

    let builder = DockerBuilder::new(toolkit(&runner, &logger, &config, &cleanup), instance(), layout());
    let built = builder.build(
        "job-1",
        "a",
        &commands(&["c1", "docker:b c2", "c3", "c4"]),
        &Env::new(),
    );

    assert!(!built);
    let skipped: Vec<_> = logger
        .events()
        .into_iter()
        .filter(|event| event.message.starts_with("Skipping"))
        .collect();
    assert_eq!(skipped.len(), 1);
    let event = skipped.first().expect("skip event");
    assert_eq!(event.message, "Skipping 2 remaining steps");
    assert_eq!(event.context.get("failed_step"), Some("2"));
    assert_eq!(event.context.get("total_steps"), Some("4"));
}

#[test]
fn failed_container_creation_does_not_start_steps() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    runner.push_ssm_success("");
    runner.push_ssm_failure(1, "image not found");

    let builder = DockerBuilder::new(toolkit(&runner, &logger, &config, &cleanup), instance(), layout());
    assert!(!builder.build("job-1", "a", &commands(&["c1"]), &Env::new()));
    assert_eq!(runner.ssm_scripts().len(), 2);
    assert_eq!(runner.remaining(), 0);
}

#[test]
fn native_builder_runs_each_step_then_copies_the_workspace() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    for _ in 0..4 {
        runner.push_ssm_success("");
    }

    let builder = NativeBuilder::new(toolkit(&runner, &logger, &config, &cleanup), instance(), layout());
    assert!(builder.build(&commands(&["nuget restore", "msbuild"]), &Env::new()));

    assert_scripts_in_order(
        &runner,
        &[
            "[IO.File]::WriteAllText",
            r"-File 'C:\hal-agent\job-1\scripts\hal-0-0.ps1'",
            r"-File 'C:\hal-agent\job-1\scripts\hal-0-1.ps1'",
            r"Copy-Item -Path 'C:\hal-agent\job-1\input\*'",
        ],
    );
    let prepare = runner.ssm_scripts().into_iter().next().unwrap_or_default().join("\n");
    assert!(!prepare.contains("Get-Command docker"));
}

#[test]
fn native_step_failure_skips_the_output_copy() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    runner.push_ssm_success("");
    runner.push_ssm_failure(1, "restore failed");

    let builder = NativeBuilder::new(toolkit(&runner, &logger, &config, &cleanup), instance(), layout());
    assert!(!builder.build(&commands(&["nuget restore", "msbuild"]), &Env::new()));
    assert_eq!(runner.ssm_scripts().len(), 2);
    assert!(logger.mentions("Skipping 1 remaining steps"));
}

#[test]
fn cleaner_deletes_existing_objects_and_instance_files() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    runner.push_success();
    runner.push_success();
    runner.push_output(Some(254), "", NOT_FOUND);
    runner.push_ssm_success("");

    let cleaner = AwsResourceCleaner::new(toolkit(&runner, &logger, &config, &cleanup));
    let keys = commands(&["job-1-input.tar.gz", "job-1-output.tar.gz"]);
    assert!(cleaner.clean(&instance(), "builds", &keys, &layout()));

    let lines = runner.command_lines();
    assert!(lines.contains(&String::from(
        "aws s3api delete-object --bucket builds --key job-1-input.tar.gz --region us-east-1 --output json"
    )));
    assert!(!lines.iter().any(|line| line.contains("delete-object") && line.contains("output.tar.gz")));
    let removal = runner.ssm_scripts().concat().join("\n");
    assert!(removal.contains(r"Remove-Item -LiteralPath 'C:\hal-agent\job-1' -Recurse -Force"));
}

#[test]
fn cleaner_reports_s3_errors_once_and_still_cleans_instance() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    runner.push_output(Some(254), "", "An error occurred (403) when calling the HeadObject operation: Forbidden");
    runner.push_ssm_success("");

    let cleaner = AwsResourceCleaner::new(toolkit(&runner, &logger, &config, &cleanup));
    let keys = commands(&["job-1-input.tar.gz", "job-1-output.tar.gz"]);
    assert!(!cleaner.clean(&instance(), "builds", &keys, &layout()));

    let failures = logger.at_level(Level::Failure);
    assert_eq!(failures.len(), 1);
    let failure = failures.first().expect("failure event");
    assert_eq!(failure.context.get("bucket"), Some("builds"));
    assert_eq!(
        failure.context.get("artifacts"),
        Some("job-1-input.tar.gz, job-1-output.tar.gz")
    );
    assert_eq!(runner.ssm_scripts().len(), 1);
    assert_eq!(runner.remaining(), 0);
}

#[rstest]
#[case(Some("docker:Not Valid"))]
#[case(Some("docker:"))]
fn invalid_image_fails_before_any_remote_call(#[case] image: Option<&str>) {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    let platform = WindowsPlatform::new(toolkit(&runner, &logger, &config, &cleanup));

    let result = platform.run(&commands(&["build"]), &job(Utf8PathBuf::from("/tmp/ws"), image));

    assert_eq!(result, Err(ExitReason::WindowsConfig));
    assert!(runner.invocations().is_empty());
}

#[test]
fn missing_settings_fail_without_remote_work() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    let platform = WindowsPlatform::new(toolkit(&runner, &logger, &config, &cleanup));
    let mut properties = job(Utf8PathBuf::from("/tmp/ws"), None);
    properties.platform_config.remove("bucket");
    properties.platform_config.remove("instance_id");

    let result = platform.run(&commands(&["build"]), &properties);

    assert_eq!(result, Err(ExitReason::WindowsConfig));
    assert!(runner.invocations().is_empty());
    let failures = logger.at_level(Level::Failure);
    let failure = failures.first().expect("failure event");
    assert_eq!(failure.context.get("missing"), Some("bucket, instance_filter"));
}

#[test]
fn instance_filter_is_resolved_through_ec2() {
    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config("/tmp/hal-test");
    let cleanup = EmergencyCleanup::without_exit_guard();
    runner.push_stdout("[]");
    let platform = WindowsPlatform::new(toolkit(&runner, &logger, &config, &cleanup));
    let mut properties = job(Utf8PathBuf::from("/tmp/ws"), None);
    properties.platform_config.remove("instance_id");
    properties
        .platform_config
        .insert(String::from("instance_filter"), String::from("hal-builder-*"));

    assert_eq!(
        platform.run(&commands(&["build"]), &properties),
        Err(ExitReason::WindowsConfig)
    );
    assert!(runner.command_lines().iter().any(|line| line.contains("Values=hal-builder-*")));
}

#[test]
fn native_build_round_trips_the_workspace_and_cleans_up() {
    let root = tempfile::tempdir().expect("temp root");
    let root_path = Utf8PathBuf::from_path_buf(root.path().to_path_buf()).expect("utf-8");
    let workspace = root_path.join("ws");
    std::fs::create_dir_all(&workspace).expect("workspace");
    std::fs::write(workspace.join("stale.txt"), "old").expect("file");

    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config(root_path.as_str());
    let cleanup = EmergencyCleanup::without_exit_guard();
    runner.push_success();
    runner.push_success();
    for _ in 0..5 {
        runner.push_ssm_success("");
    }
    runner.push_success();
    runner.push_success();
    runner.push_output(Some(254), "", NOT_FOUND);
    runner.push_output(Some(254), "", NOT_FOUND);
    runner.push_ssm_success("");

    let platform = WindowsPlatform::new(toolkit(&runner, &logger, &config, &cleanup));
    let result = platform.run(&commands(&["msbuild"]), &job(workspace.clone(), None));

    assert_eq!(result, Ok(()));
    assert_eq!(runner.remaining(), 0);
    assert!(!workspace.join("stale.txt").exists());
    let lines = runner.command_lines();
    let transfer = root_path.join("transfer");
    assert_eq!(
        lines.first(),
        Some(&format!("tar -czf {transfer}/job-1.tar.gz -C {workspace} ."))
    );
    assert!(lines.contains(&format!(
        "aws s3 cp {transfer}/job-1.tar.gz s3://builds/job-1-input.tar.gz --region us-east-1 --output json"
    )));
    assert!(lines.contains(&format!("tar -xzf {transfer}/job-1-output.tar.gz -C {workspace}")));
    let secret_logged = logger
        .events()
        .iter()
        .any(|event| event.message.contains("s3cr3t") || event.context.to_string().contains("s3cr3t"));
    assert!(!secret_logged);
}

#[test]
fn failed_upload_still_removes_transfer_resources() {
    let root = tempfile::tempdir().expect("temp root");
    let root_path = Utf8PathBuf::from_path_buf(root.path().to_path_buf()).expect("utf-8");
    let workspace = root_path.join("ws");
    std::fs::create_dir_all(&workspace).expect("workspace");

    let runner = ScriptedRunner::new();
    let logger = RecordingLogger::new();
    let config = sample_config(root_path.as_str());
    let cleanup = EmergencyCleanup::without_exit_guard();
    runner.push_success();
    runner.push_failure(1);
    runner.push_output(Some(254), "", NOT_FOUND);
    runner.push_output(Some(254), "", NOT_FOUND);
    runner.push_ssm_success("");

    let platform = WindowsPlatform::new(toolkit(&runner, &logger, &config, &cleanup));
    let result = platform.run(&commands(&["msbuild"]), &job(workspace, None));

    assert_eq!(result, Err(ExitReason::WindowsExport));
    assert_eq!(runner.remaining(), 0);
    assert!(logger.failure_messages().contains(&String::from("Upload workspace to S3")));
}
