#![allow(dead_code)]

use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use muxprims_mux::{Channel, ChannelListener, Multiplexer, MuxConfig};
use muxprims_transport::IpcStream;

/// Forwards every channel the peer opens to a receiver.
pub struct Collector {
    opened: Mutex<Sender<Channel>>,
    closed: Mutex<Vec<u8>>,
}

impl Collector {
    pub fn new() -> (Arc<Self>, Receiver<Channel>) {
        let (tx, rx) = mpsc::channel();
        let collector = Arc::new(Self {
            opened: Mutex::new(tx),
            closed: Mutex::new(Vec::new()),
        });
        (collector, rx)
    }

    pub fn closed(&self) -> Vec<u8> {
        self.closed.lock().unwrap().clone()
    }
}

impl ChannelListener for Collector {
    fn new_channel(&self, channel: &Channel) {
        let _ = self.opened.lock().unwrap().send(channel.clone());
    }

    fn close_channel(&self, channel: &Channel) {
        self.closed.lock().unwrap().push(channel.id());
    }
}

pub struct Pair {
    pub client: Multiplexer,
    pub server: Multiplexer,
    pub accepted: Receiver<Channel>,
    pub server_events: Arc<Collector>,
}

impl Pair {
    pub fn accept(&self) -> Channel {
        self.accepted
            .recv_timeout(Duration::from_secs(5))
            .expect("server should see the channel open")
    }
}

pub fn started_pair() -> Pair {
    let (left, right) = UnixStream::pair().unwrap();
    let client =
        Multiplexer::from_stream(IpcStream::from_unix(left), MuxConfig::named("client")).unwrap();
    let server =
        Multiplexer::from_stream(IpcStream::from_unix(right), MuxConfig::named("server")).unwrap();

    let (collector, accepted) = Collector::new();
    server.add_listener(collector.clone());
    client.start().unwrap();
    server.start().unwrap();

    Pair {
        client,
        server,
        accepted,
        server_events: collector,
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
