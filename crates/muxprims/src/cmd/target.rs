use std::process::Command;
use std::time::{Duration, Instant};

use muxprims_mux::MuxConfig;
use muxprims_proxy::ProxyClient;
use muxprims_transport::{ChildProcess, UnixDomainSocket};
use tracing::{debug, warn};

use crate::cmd::TargetArgs;
use crate::exit::{io_error, proxy_error, transport_error, CliResult};
use crate::logging::LogLevel;

/// How long a spawned server gets to exit after the session shuts down.
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(2);

/// A connected client, plus the server process when this side spawned it.
pub struct Session {
    pub client: ProxyClient,
    child: Option<ChildProcess>,
}

impl Session {
    pub fn connect(target: &TargetArgs, log_level: LogLevel) -> CliResult<Self> {
        let (stream, child) = match &target.socket {
            Some(path) => {
                let stream = UnixDomainSocket::connect(path)
                    .map_err(|err| transport_error("connect failed", err))?;
                (stream, None)
            }
            None => {
                let mut command = server_command(target, log_level)?;
                let (stream, child) = ChildProcess::spawn(&mut command)
                    .map_err(|err| transport_error("server spawn failed", err))?;
                (stream, Some(child))
            }
        };
        let client = ProxyClient::connect(stream, MuxConfig::named("client"))
            .map_err(|err| proxy_error("connect failed", err))?;
        Ok(Self { client, child })
    }

    /// Shut the session down and reap a spawned server.
    pub fn close(mut self) {
        if let Err(err) = self.client.shutdown() {
            debug!(error = %err, "shutdown not delivered");
        }
        let Some(mut child) = self.child.take() else {
            return;
        };
        let deadline = Instant::now() + CHILD_EXIT_GRACE;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid = child.id(), %status, "server exited");
                    return;
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(20)),
                Err(err) => {
                    warn!(error = %err, "failed to poll server process");
                    break;
                }
            }
        }
        // Dropping the handle kills a server that is still running.
    }
}

fn server_command(target: &TargetArgs, log_level: LogLevel) -> CliResult<Command> {
    let program = match &target.server {
        Some(program) => program.clone(),
        None => std::env::current_exe()
            .map_err(|err| io_error("cannot locate this executable", err))?,
    };
    let mut command = Command::new(program);
    if target.server_args.is_empty() {
        command.args(["--log-level", log_level.as_arg(), "serve"]);
    } else {
        command.args(&target.server_args);
    }
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server_is_this_executable_serving() {
        let command = server_command(&TargetArgs::default(), LogLevel::Warn).unwrap();
        assert_eq!(command.get_program(), std::env::current_exe().unwrap());
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(args, ["--log-level", "warn", "serve"]);
    }

    #[test]
    fn explicit_server_arguments_replace_the_default() {
        let target = TargetArgs {
            socket: None,
            server: Some("ssh".into()),
            server_args: vec!["host".into(), "muxprims".into(), "serve".into()],
        };
        let command = server_command(&target, LogLevel::Info).unwrap();
        assert_eq!(command.get_program(), "ssh");
        assert_eq!(command.get_args().count(), 3);
    }
}
