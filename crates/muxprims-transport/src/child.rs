use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// A spawned process whose stdin/stdout carry an [`IpcStream`].
///
/// The child's stderr is inherited so its logs stay visible. Dropping a
/// `ChildProcess` that is still running kills and reaps it.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    program: String,
}

impl ChildProcess {
    /// Spawn `command` with piped stdin/stdout and return the stream over them.
    ///
    /// Writes to the stream land on the child's stdin; reads come from its
    /// stdout.
    pub fn spawn(command: &mut Command) -> Result<(IpcStream, Self)> {
        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(TransportError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TransportError::MissingPipe("stdout"))?;

        info!(%program, pid = child.id(), "spawned stream process");

        let stream = IpcStream::pipes("child", Box::new(stdout), Box::new(stdin));
        Ok((stream, Self { child, program }))
    }

    /// OS process id of the child.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Program name the child was spawned from.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Wait for the child to exit.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait()?)
    }

    /// Check for exit without blocking.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Forcibly terminate the child.
    pub fn kill(&mut self) -> Result<()> {
        Ok(self.child.kill()?)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            debug!(program = %self.program, pid = self.child.id(), "killing stream process");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
