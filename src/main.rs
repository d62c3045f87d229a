//! Binary entry point for the `hal-agent` CLI.

use std::env;
use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use hal_agent::{
    AgentConfig, BuildFlow, EnvSecretResolver, ExitReason, FileJobResolver, FlowContext,
    ProcessCommandRunner, PushFlow, TracingEventLogger, Worker,
};

mod cli;

use cli::{Cli, Command};

/// Exit status for failures that happen before any job runs.
const SETUP_FAILURE: i32 = 1;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] hal_agent::ConfigError),
    #[error("failed to locate the agent executable: {0}")]
    CurrentExe(io::Error),
    #[error("failed to list waiting jobs: {0}")]
    Worker(#[from] hal_agent::ResolveError),
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let exit_code = match dispatch(&cli) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            SETUP_FAILURE
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

const fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

fn dispatch(cli: &Cli) -> Result<i32, CliError> {
    let config = AgentConfig::load_without_cli_args()?;
    config.validate()?;

    match &cli.command {
        Command::Build(args) => Ok(run_job(&config, &args.job_id, JobFlow::Build)),
        Command::Push(args) => Ok(run_job(&config, &args.job_id, JobFlow::Push)),
        Command::Worker => run_worker(&config, cli.verbose),
    }
}

#[derive(Clone, Copy)]
enum JobFlow {
    Build,
    Push,
}

fn run_job(config: &AgentConfig, job_id: &str, flow: JobFlow) -> i32 {
    let runner = ProcessCommandRunner;
    let logger = TracingEventLogger::new(job_id);
    let resolver = FileJobResolver::new(config.jobs_dir());
    let secrets = EnvSecretResolver::from_process_env();
    let ctx = FlowContext {
        runner: &runner,
        logger: &logger,
        config,
        resolver: &resolver,
        secrets: &secrets,
    };

    let reason = match flow {
        JobFlow::Build => BuildFlow::new(ctx).run(job_id),
        JobFlow::Push => PushFlow::new(ctx).run(job_id),
    };
    report_reason(reason);
    reason.code()
}

fn run_worker(config: &AgentConfig, verbose: bool) -> Result<i32, CliError> {
    let resolver = FileJobResolver::new(config.jobs_dir());
    let program = env::current_exe().map_err(CliError::CurrentExe)?;
    let leading: &[&str] = if verbose { &["--verbose"] } else { &[] };
    let outcomes = Worker::new(&resolver, program)
        .with_leading_args(leading.iter().copied())
        .run()?;

    let failed = outcomes.iter().filter(|outcome| !outcome.is_success()).count();
    writeln!(io::stdout(), "{} jobs run, {failed} failed", outcomes.len()).ok();
    Ok(if failed == 0 { 0 } else { SETUP_FAILURE })
}

fn report_reason(reason: ExitReason) {
    if reason.is_success() {
        writeln!(io::stdout(), "{}", reason.message()).ok();
    } else {
        writeln!(io::stderr(), "{}", reason.message()).ok();
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
