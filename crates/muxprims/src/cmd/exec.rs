use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;

use muxprims_mux::Channel;
use muxprims_proxy::{ExecRequest, RemoteProcess};
use tracing::{debug, info};

use crate::cmd::target::Session;
use crate::cmd::ExecArgs;
use crate::exit::{io_error, proxy_error, CliError, CliResult, INTERNAL, USAGE};
use crate::logging::LogLevel;

pub fn run(args: ExecArgs, log_level: LogLevel) -> CliResult<i32> {
    let request = build_request(&args)?;
    let session = Session::connect(&args.target, log_level)?;
    let process = Arc::new(
        session
            .client
            .exec(&request)
            .map_err(|err| proxy_error("exec failed", err))?,
    );

    let cancel = Arc::clone(&process);
    ctrlc::set_handler(move || {
        info!("interrupted; cancelling remote process");
        let _ = cancel.destroy();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;

    if args.no_stdin {
        process
            .close_stdin()
            .map_err(|err| io_error("closing remote stdin failed", err))?;
    } else {
        let input = Arc::clone(&process);
        thread::Builder::new()
            .name("stdin".into())
            .spawn(move || forward_stdin(&input))
            .map_err(|err| io_error("thread spawn failed", err))?;
    }

    let errors = Arc::clone(&process);
    let stderr_thread = thread::Builder::new()
        .name("stderr".into())
        .spawn(move || relay(errors.stderr(), io::stderr()))
        .map_err(|err| io_error("thread spawn failed", err))?;

    relay(process.stdout(), io::stdout());
    let _ = stderr_thread.join();

    let code = process
        .wait()
        .map_err(|err| proxy_error("waiting for exit code failed", err))?;
    debug!(code, "remote process finished");
    process.close();
    session.close();
    Ok(code)
}

fn build_request(args: &ExecArgs) -> CliResult<ExecRequest> {
    let mut request = ExecRequest::new(args.argv.iter().cloned())
        .redirect_stderr(args.merge_stderr)
        .append_env(!args.clear_env);
    if let Some(dir) = &args.cwd {
        request = request.dir(dir.clone());
    }
    for pair in &args.env {
        let (key, value) = pair
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| CliError::new(USAGE, format!("--env expects KEY=VALUE, got {pair:?}")))?;
        request = request.env(key, value);
    }
    Ok(request)
}

fn forward_stdin(process: &RemoteProcess) {
    let mut stdin = io::stdin().lock();
    let mut remote = process.stdin();
    let mut buf = [0u8; 8192];
    loop {
        let n = match stdin.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if remote.write_all(&buf[..n]).and_then(|()| remote.flush()).is_err() {
            return;
        }
    }
    let _ = process.close_stdin();
}

fn relay(mut channel: &Channel, mut out: impl Write) {
    let mut buf = [0u8; 8192];
    loop {
        let n = match channel.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if out.write_all(&buf[..n]).and_then(|()| out.flush()).is_err() {
            break;
        }
    }
}
