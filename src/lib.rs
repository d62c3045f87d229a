//! Core library for the `hal-agent` build and deploy agent.
//!
//! A job is resolved from the jobs directory, copied into a private
//! workspace, and handed to a platform (local, Unix over SSH, Windows over
//! AWS SSM, or an rsync deployment target) through a name-keyed registry.
//! Every command reports one structured event, every failure maps to a
//! single [`ExitReason`], and pending remote cleanup runs on every exit path.

pub mod aws;
pub mod cleanup;
pub mod config;
pub mod events;
pub mod exec;
pub mod exit;
pub mod flow;
pub mod job;
pub mod platform;
pub mod remote;
pub mod sync;
pub mod test_support;
pub mod worker;
pub mod workspace;

pub use cleanup::{CleanupGuard, EmergencyCleanup};
pub use config::{AgentConfig, ConfigError, Timeouts};
pub use events::{EventContext, EventLogger, Level, Stage, TracingEventLogger};
pub use exec::{CommandOutput, CommandRunner, ExecError, Invocation, ProcessCommandRunner};
pub use exit::ExitReason;
pub use flow::{BuildFlow, FlowContext, PushFlow};
pub use job::{
    EncryptedPropertyResolver, EnvSecretResolver, FileJobResolver, JobKind, JobRecord,
    JobResolver, ResolveError,
};
pub use platform::{Dispatcher, Platform, PlatformRegistry, Toolkit, default_registry};
pub use worker::{JobOutcome, Worker};
pub use workspace::{Workspace, WorkspaceError};
