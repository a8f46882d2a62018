use std::io::Write;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use muxprims_mux::{Channel, ChannelListener, Multiplexer, MuxConfig};
use muxprims_transport::IpcStream;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::error::Result;
use crate::handlers;
use crate::protocol::{Opcode, PROTO_COMMAND, PROTO_ERROR, PROTO_OK, PROTO_SHUTDOWN};
use crate::wire::{WireRead, WireWrite};

/// Longest error message sent back in a `PROTO_ERROR` reply.
const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mux: MuxConfig,
    /// How often a running process is polled for exit. Default: 50 ms.
    pub exec_poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mux: MuxConfig::named("server"),
            exec_poll_interval: Duration::from_millis(50),
        }
    }
}

/// Reads commands from the command channel and executes them one at a time.
pub struct CommandServer {
    mux: Multiplexer,
    channel: Channel,
    config: ServerConfig,
}

impl CommandServer {
    pub fn new(mux: Multiplexer, channel: Channel, config: ServerConfig) -> Self {
        Self {
            mux,
            channel,
            config,
        }
    }

    /// Serve until `PROTO_SHUTDOWN` or end of stream on the command channel.
    ///
    /// A failing command is answered with `PROTO_ERROR` and the loop
    /// continues. Malformed arguments end it, since the position of the next
    /// request is then unknown.
    pub fn run(&self) -> Result<()> {
        let mut input = &self.channel;
        info!(mux = %self.mux.name(), channel = self.channel.id(), "command server started");
        loop {
            let marker = match input.read_u8() {
                Ok(marker) => marker,
                Err(err) if err.is_eof() => {
                    info!(mux = %self.mux.name(), "command channel closed");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };

            match marker {
                PROTO_COMMAND => {
                    let raw = input.read_i16()?;
                    let outcome = match Opcode::try_from(raw) {
                        Ok(opcode) => {
                            let command = Command::decode(opcode, &mut input)?;
                            debug!(opcode = opcode.name(), "command received");
                            handlers::handle(&self.mux, command, self.config.exec_poll_interval)
                        }
                        Err(err) => Err(err),
                    };
                    if let Err(err) = &outcome {
                        warn!(opcode = raw, error = %err, "command failed");
                    }
                    self.reply(outcome)?;
                }
                PROTO_SHUTDOWN => {
                    info!(mux = %self.mux.name(), "shutdown requested");
                    return Ok(());
                }
                other => warn!(marker = other, "ignoring unknown marker"),
            }
        }
    }

    fn reply(&self, outcome: Result<()>) -> Result<()> {
        let mut buf = BytesMut::new();
        match outcome {
            Ok(()) => buf.put_u8(PROTO_OK),
            Err(err) => {
                buf.put_u8(PROTO_ERROR);
                buf.put_string(truncate(&err.to_string(), MAX_MESSAGE_LEN))?;
            }
        }
        let mut out = &self.channel;
        out.write_all(&buf)?;
        out.flush()?;
        Ok(())
    }
}

fn truncate(message: &str, max: usize) -> &str {
    if message.len() <= max {
        return message;
    }
    let mut end = max;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

/// Hands the command channel to the dispatcher when the peer opens it.
struct CommandHandoff {
    tx: Sender<Channel>,
}

impl ChannelListener for CommandHandoff {
    fn new_channel(&self, channel: &Channel) {
        if channel.is_command() {
            let _ = self.tx.send(channel.clone());
        }
    }
}

/// A multiplexer serving the command protocol on one connection.
pub struct Server {
    mux: Multiplexer,
    commands: Receiver<Channel>,
    config: ServerConfig,
}

impl Server {
    pub fn new(stream: IpcStream, config: ServerConfig) -> Result<Self> {
        let mux = Multiplexer::from_stream(stream, config.mux.clone())?;
        let (tx, commands) = mpsc::channel();
        mux.add_listener(Arc::new(CommandHandoff { tx }));
        Ok(Self {
            mux,
            commands,
            config,
        })
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    /// Start the multiplexer, wait for the client's command channel and
    /// serve it. The multiplexer is shut down on return.
    pub fn run(self) -> Result<()> {
        self.mux.start()?;
        let result = match self.wait_for_command_channel() {
            Some(channel) => {
                CommandServer::new(self.mux.clone(), channel, self.config.clone()).run()
            }
            None => {
                debug!(mux = %self.mux.name(), "connection ended before a command channel opened");
                Ok(())
            }
        };
        self.mux.shutdown();
        info!(mux = %self.mux.name(), "server stopped");
        result
    }

    fn wait_for_command_channel(&self) -> Option<Channel> {
        loop {
            match self.commands.recv_timeout(Duration::from_millis(100)) {
                Ok(channel) => return Some(channel),
                Err(RecvTimeoutError::Timeout) if self.mux.is_running() => {}
                Err(_) => return None,
            }
        }
    }
}

/// Serve the command protocol on `stream` until the client shuts it down or
/// disconnects.
pub fn serve(stream: IpcStream, config: ServerConfig) -> Result<()> {
    Server::new(stream, config)?.run()
}
