use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use muxprims_mux::Channel;
use tracing::debug;

use crate::error::{ProxyError, Result};
use crate::wire::WireRead;

#[derive(Debug, Clone)]
enum ExitState {
    Running,
    Exited(i32),
    Lost(String),
}

/// Exit status shared with the thread reading channel C.
#[derive(Debug)]
struct ExitSlot {
    state: Mutex<ExitState>,
    done: Condvar,
}

impl ExitSlot {
    fn lock(&self) -> MutexGuard<'_, ExitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: ExitState) {
        *self.lock() = state;
        self.done.notify_all();
    }
}

/// Client handle for a process started with EXEC.
///
/// The process's stdin and stdout share channel A, stderr uses channel B and
/// channel C carries the cancel request and the exit code. A background
/// thread reads the exit code as soon as the server sends it. Dropping the
/// handle closes all three channels; it does not kill the process.
pub struct RemoteProcess {
    stdio: Channel,
    stderr: Channel,
    control: Channel,
    exit: Arc<ExitSlot>,
}

impl RemoteProcess {
    pub(crate) fn new(stdio: Channel, stderr: Channel, control: Channel) -> Result<Self> {
        let exit = Arc::new(ExitSlot {
            state: Mutex::new(ExitState::Running),
            done: Condvar::new(),
        });

        let slot = Arc::clone(&exit);
        let input = control.clone();
        thread::Builder::new()
            .name(format!("exit-reader-{}", control.id()))
            .spawn(move || {
                let state = match (&input).read_i32() {
                    Ok(code) => ExitState::Exited(code),
                    Err(err) if err.is_eof() => {
                        ExitState::Lost("connection lost before the exit code arrived".into())
                    }
                    Err(err) => ExitState::Lost(err.to_string()),
                };
                debug!(channel = input.id(), state = ?state, "exit reader finished");
                slot.set(state);
            })?;

        Ok(Self {
            stdio,
            stderr,
            control,
            exit,
        })
    }

    /// Writable end connected to the process's stdin.
    pub fn stdin(&self) -> &Channel {
        &self.stdio
    }

    /// Readable end connected to the process's stdout (and stderr when
    /// merged).
    pub fn stdout(&self) -> &Channel {
        &self.stdio
    }

    /// Readable end connected to the process's stderr. Reaches end of stream
    /// immediately when stderr is merged into stdout.
    pub fn stderr(&self) -> &Channel {
        &self.stderr
    }

    /// Flush pending input and signal end of input to the process.
    pub fn close_stdin(&self) -> io::Result<()> {
        self.stdio.shutdown_write()
    }

    /// Ask the server to kill the process.
    pub fn destroy(&self) -> Result<()> {
        let mut control = &self.control;
        control.write_all(&[0])?;
        control.flush()?;
        debug!(channel = self.control.id(), "cancel requested");
        Ok(())
    }

    /// Block until the process exits and return its exit code.
    ///
    /// A process killed by a signal reports `128 + signal`.
    pub fn wait(&self) -> Result<i32> {
        let mut state = self.exit.lock();
        loop {
            match &*state {
                ExitState::Running => {
                    state = self
                        .exit
                        .done
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                ExitState::Exited(code) => return Ok(*code),
                ExitState::Lost(reason) => return Err(ProxyError::Protocol(reason.clone())),
            }
        }
    }

    /// The exit code if the process has already finished, without blocking.
    pub fn exit_code(&self) -> Option<i32> {
        match *self.exit.lock() {
            ExitState::Exited(code) => Some(code),
            _ => None,
        }
    }

    /// Close all three channels.
    pub fn close(&self) {
        self.stdio.close();
        self.stderr.close();
        self.control.close();
    }
}

impl Drop for RemoteProcess {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RemoteProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProcess")
            .field("stdio", &self.stdio.id())
            .field("stderr", &self.stderr.id())
            .field("control", &self.control.id())
            .finish()
    }
}
