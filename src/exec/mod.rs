//! Local process execution: the runner abstraction, the real
//! `std::process` implementation with timeouts, command sanitisation, and a
//! logged runner used by the stages that execute on the agent host.

mod local;
mod process;
mod sanitize;
mod types;

pub use local::LocalRunner;
pub use process::ProcessCommandRunner;
pub use sanitize::{ControlCharacterError, sanitize_command, validate_tokens};
pub use types::{CommandOutput, CommandRunner, Env, ExecError, Invocation};
