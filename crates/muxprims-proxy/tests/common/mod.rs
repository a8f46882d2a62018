#![allow(dead_code)]

use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use muxprims_mux::MuxConfig;
use muxprims_proxy::{serve, ProxyClient, ServerConfig};
use muxprims_transport::IpcStream;

/// A client connected to a server running on its own thread.
pub struct Session {
    pub client: ProxyClient,
    pub server: JoinHandle<muxprims_proxy::Result<()>>,
}

impl Session {
    pub fn start() -> Self {
        let (left, right) = UnixStream::pair().unwrap();
        let server = thread::spawn(move || {
            serve(IpcStream::from_unix(right), ServerConfig::default())
        });
        let client =
            ProxyClient::connect(IpcStream::from_unix(left), MuxConfig::named("client")).unwrap();
        Self { client, server }
    }

    /// Shut down from the client side and check the server stopped cleanly.
    pub fn finish(self) {
        self.client.shutdown().unwrap();
        self.server.join().unwrap().unwrap();
    }
}

pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "muxp-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
