//! Command-line interface definitions for the `hal-agent` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `hal-agent` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hal-agent",
    about = "Run waiting build and push jobs on local, Unix and Windows platforms",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log at debug level, including suppressed commands. `RUST_LOG`
    /// overrides this.
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands understood by `hal-agent`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Build a waiting job and archive its output.
    #[command(name = "build", about = "Build a waiting job and archive its output")]
    Build(JobArgs),
    /// Deploy the archive of a finished build.
    #[command(name = "push", about = "Deploy the archive of a finished build")]
    Push(JobArgs),
    /// Start one child process per waiting job and wait for all of them.
    #[command(name = "worker", about = "Run every waiting job in its own process")]
    Worker,
}

/// Arguments shared by `build` and `push`.
#[derive(Debug, Parser)]
pub(crate) struct JobArgs {
    /// Identifier of the job record in the jobs directory.
    #[arg(value_name = "JOB_ID")]
    pub(crate) job_id: String,
}
