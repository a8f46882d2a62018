use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use muxprims_mux::MuxConfig;
use muxprims_proxy::{serve, ServerConfig};
use muxprims_transport::{IpcStream, UnixDomainSocket};
use tracing::{info, warn};

use crate::cmd::ServeArgs;
use crate::exit::{proxy_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    if args.poll_ms == 0 {
        return Err(CliError::new(USAGE, "--poll-ms must be greater than zero"));
    }
    let poll = Duration::from_millis(args.poll_ms);

    match &args.socket {
        None => {
            let config = server_config("stdio", poll);
            serve(IpcStream::stdio(), config).map_err(|err| proxy_error("serve failed", err))?;
            Ok(SUCCESS)
        }
        Some(path) => serve_socket(path, poll),
    }
}

fn server_config(name: &str, poll: Duration) -> ServerConfig {
    ServerConfig {
        mux: MuxConfig::named(name),
        exec_poll_interval: poll,
    }
}

fn serve_socket(path: &Path, poll: Duration) -> CliResult<i32> {
    let listener = UnixDomainSocket::bind(path).map_err(|err| transport_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone(), path)?;

    let mut accepted = 0u64;
    while running.load(Ordering::SeqCst) {
        let stream = listener
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        if !running.load(Ordering::SeqCst) {
            break;
        }

        accepted += 1;
        let name = format!("conn-{accepted}");
        let config = server_config(&name, poll);
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || match serve(stream, config) {
                Ok(()) => info!(connection = %name, "connection finished"),
                Err(err) => warn!(connection = %name, error = %err, "connection failed"),
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to start connection thread");
        }
    }

    info!("server stopped");
    Ok(SUCCESS)
}

/// Ctrl-C clears `running` and wakes the blocked accept with a throwaway
/// connection.
fn install_ctrlc_handler(running: Arc<AtomicBool>, path: &Path) -> CliResult<()> {
    let path = path.to_path_buf();
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        let _ = UnixDomainSocket::connect(&path);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
