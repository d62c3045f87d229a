//! Real command runner backed by `std::process`.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use wait_timeout::ChildExt;

use super::types::{CommandOutput, CommandRunner, ExecError, Invocation};

/// Real command runner that shells out to the host operating system.
///
/// Output pipes are drained on helper threads so a chatty child cannot block
/// on a full pipe while the runner waits for it. When the timeout expires the
/// child is killed and reaped, and the readers are left to finish on their
/// own; grandchildren that inherited the pipes must not stall the agent.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|err| ExecError::Spawn {
            program: invocation.program.clone(),
            message: err.to_string(),
        })?;
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = wait_for_exit(&mut child, invocation)?;

        Ok(CommandOutput {
            code: status.code(),
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
        })
    }
}

fn wait_for_exit(child: &mut Child, invocation: &Invocation) -> Result<ExitStatus, ExecError> {
    let io_error = |err: io::Error| ExecError::Io {
        program: invocation.program.clone(),
        message: err.to_string(),
    };

    if let Some(status) = child.wait_timeout(invocation.timeout).map_err(io_error)? {
        return Ok(status);
    }

    if let Err(err) = child.kill()
        && err.kind() != io::ErrorKind::InvalidInput
    {
        return Err(io_error(err));
    }
    if let Err(err) = child.wait() {
        tracing::warn!(program = %invocation.program, "failed to reap timed-out command: {err}");
    }

    Err(ExecError::Timeout {
        program: invocation.program.clone(),
        seconds: invocation.timeout.as_secs(),
    })
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Err(err) = reader.read_to_end(&mut buf) {
                tracing::debug!("stopped reading command output: {err}");
            }
            buf
        })
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|reader| reader.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
