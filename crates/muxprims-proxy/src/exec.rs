use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use muxprims_mux::Channel;
use tracing::{debug, info, warn};

use crate::command::ExecArgs;
use crate::error::{ProxyError, Result};

const CHUNK_SIZE: usize = 8192;

/// Channels serving one process: A (stdio), B (stderr), C (control).
pub(crate) struct ExecChannels {
    pub stdio: Channel,
    pub stderr: Channel,
    pub control: Channel,
}

/// Start the process described by `args` and wire it to its channels.
///
/// Returns once the process is running; forwarding and waiting continue on
/// background threads.
pub(crate) fn spawn(args: &ExecArgs, channels: ExecChannels, poll: Duration) -> Result<()> {
    let Some((program, rest)) = args.argv.split_first() else {
        return Err(ProxyError::InvalidArgument("empty command line".into()));
    };

    let mut command = std::process::Command::new(program);
    command.args(rest);
    if !args.append_env {
        command.env_clear();
    }
    command.envs(&args.env);
    if !args.dir.is_empty() {
        let dir = Path::new(&args.dir);
        if dir.is_absolute() && dir.is_dir() {
            command.current_dir(dir);
        } else {
            debug!(dir = %args.dir, "ignoring working directory");
        }
    }
    command.stdin(Stdio::piped());

    let merged = if args.redirect {
        let (reader, out, err) = merged_output()?;
        command.stdout(out).stderr(err);
        Some(reader)
    } else {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        None
    };

    let spawn_err = |source: io::Error| ProxyError::Spawn {
        program: program.clone(),
        source,
    };
    let mut child = command.spawn().map_err(spawn_err)?;
    // Release the parent's copies of the merged pipe's write end.
    drop(command);

    let pid = child.id();
    info!(pid, program = %program, redirect = args.redirect, "process started");

    let ExecChannels {
        stdio,
        stderr,
        control,
    } = channels;

    if let Some(stdin) = child.stdin.take() {
        let input = stdio.clone();
        forward_thread(pid, "stdin", move || feed_stdin(&input, stdin))?;
    }

    match merged {
        Some(reader) => {
            let output = stdio.clone();
            forward_thread(pid, "stdout", move || drain(reader, &output))?;
            if let Err(err) = stderr.shutdown_write() {
                debug!(pid, error = %err, "stderr channel already gone");
            }
        }
        None => {
            if let Some(out) = child.stdout.take() {
                let output = stdio.clone();
                forward_thread(pid, "stdout", move || drain(out, &output))?;
            }
            if let Some(err) = child.stderr.take() {
                let output = stderr.clone();
                forward_thread(pid, "stderr", move || drain(err, &output))?;
            }
        }
    }

    let (cancel_tx, cancel_rx) = mpsc::channel();
    let cancel_channel = control.clone();
    forward_thread(pid, "cancel", move || {
        let mut byte = [0u8; 1];
        if matches!((&cancel_channel).read(&mut byte), Ok(1)) {
            let _ = cancel_tx.send(());
        }
    })?;
    forward_thread(pid, "wait", move || {
        let code = wait_for_exit(&mut child, &cancel_rx, poll);
        report_exit(&control, pid, code);
    })?;
    Ok(())
}

fn forward_thread(pid: u32, role: &str, body: impl FnOnce() + Send + 'static) -> Result<()> {
    thread::Builder::new()
        .name(format!("exec-{pid}-{role}"))
        .spawn(body)?;
    Ok(())
}

/// Copy channel input into the process's stdin until either side ends.
fn feed_stdin(channel: &Channel, mut stdin: ChildStdin) {
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match (&*channel).read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if stdin.write_all(&buf[..n]).and_then(|()| stdin.flush()).is_err() {
            break;
        }
    }
    debug!(channel = channel.id(), "stdin closed");
}

/// Copy process output to a channel, then end the channel's stream.
fn drain(mut source: impl Read, channel: &Channel) {
    let mut out = channel;
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if out.write_all(&buf[..n]).and_then(|()| out.flush()).is_err() {
            return;
        }
    }
    if let Err(err) = channel.shutdown_write() {
        debug!(channel = channel.id(), error = %err, "output channel already gone");
    }
}

/// Poll for exit, killing the process when a cancel byte arrives.
fn wait_for_exit(child: &mut Child, cancel: &Receiver<()>, poll: Duration) -> i32 {
    let mut cancel_open = true;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return exit_code(status),
            Ok(None) => {}
            Err(err) => {
                warn!(pid = child.id(), error = %err, "failed to poll process");
                return -1;
            }
        }

        let cancelled = if cancel_open {
            match cancel.recv_timeout(poll) {
                Ok(()) => true,
                Err(RecvTimeoutError::Timeout) => false,
                Err(RecvTimeoutError::Disconnected) => {
                    cancel_open = false;
                    false
                }
            }
        } else {
            thread::sleep(poll);
            false
        };

        if cancelled {
            info!(pid = child.id(), "killing process on request");
            if let Err(err) = child.kill() {
                debug!(pid = child.id(), error = %err, "kill failed");
            }
            return match child.wait() {
                Ok(status) => exit_code(status),
                Err(err) => {
                    warn!(pid = child.id(), error = %err, "failed to reap process");
                    -1
                }
            };
        }
    }
}

fn report_exit(control: &Channel, pid: u32, code: i32) {
    info!(pid, code, "process exited");
    let mut out = control;
    let sent = out
        .write_all(&code.to_be_bytes())
        .and_then(|()| control.shutdown_write());
    if let Err(err) = sent {
        debug!(pid, error = %err, "exit code not delivered");
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// One pipe shared by stdout and stderr. Returns the read end and the two
/// write ends for the child.
#[cfg(unix)]
fn merged_output() -> io::Result<(std::fs::File, Stdio, Stdio)> {
    use std::os::fd::{FromRawFd, OwnedFd};

    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` is a writable array of two descriptors as pipe(2) expects.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe(2) succeeded, so both descriptors are open and owned by
    // nothing else in this process.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(&read)?;
    set_cloexec(&write)?;

    let write_err = write.try_clone()?;
    Ok((
        std::fs::File::from(read),
        Stdio::from(write),
        Stdio::from(write_err),
    ))
}

#[cfg(unix)]
fn set_cloexec(fd: &std::os::fd::OwnedFd) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: `fd` is an open descriptor for the duration of both calls.
    let rc = unsafe {
        let flags = libc::fcntl(fd.as_raw_fd(), libc::F_GETFD);
        if flags < 0 {
            flags
        } else {
            libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC)
        }
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn merged_output() -> io::Result<(std::fs::File, Stdio, Stdio)> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "merging stderr into stdout is only supported on unix",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn merged_pipe_carries_both_streams() {
        let (mut reader, out, err) = merged_output().unwrap();
        let mut child = std::process::Command::new("sh")
            .args(["-c", "echo out; echo err 1>&2"])
            .stdout(out)
            .stderr(err)
            .spawn()
            .unwrap();
        child.wait().unwrap();

        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert!(text.contains("out\n"));
        assert!(text.contains("err\n"));
    }

    #[test]
    fn signal_exit_is_offset_by_128() {
        let mut child = std::process::Command::new("sh")
            .args(["-c", "kill -9 $$"])
            .spawn()
            .unwrap();
        let status = child.wait().unwrap();
        assert_eq!(exit_code(status), 128 + 9);
    }

    #[test]
    fn cancel_kills_a_running_process() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let (tx, rx) = mpsc::channel();
        tx.send(()).unwrap();
        let code = wait_for_exit(&mut child, &rx, Duration::from_millis(10));
        assert_ne!(code, 0);
    }

    #[test]
    fn natural_exit_ignores_closed_cancel_signal() {
        let mut child = std::process::Command::new("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .unwrap();
        let (tx, rx) = mpsc::channel::<()>();
        drop(tx);
        assert_eq!(wait_for_exit(&mut child, &rx, Duration::from_millis(10)), 3);
    }
}
