use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use muxprims_frame::{Frame, FrameError, FrameReader, FrameWriter, MAX_CHANNELS};
use muxprims_transport::{IpcStream, ReadHalf, WriteHalf};
use tracing::{debug, info, trace, warn};

use crate::alloc::IdAllocator;
use crate::channel::{Channel, ChannelState};
use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::listener::ChannelListener;
use crate::lock;

/// Runs up to 256 [`Channel`]s over one duplex byte stream.
///
/// `Multiplexer` is a handle; clones share the same state. After
/// [`Multiplexer::start`] one thread reads frames from the stream and
/// dispatches them, and one thread writes queued frames in order. Any
/// malformed frame, protocol violation or stream error shuts the whole
/// multiplexer down.
#[derive(Clone)]
pub struct Multiplexer {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    config: MuxConfig,
    state: Mutex<MuxState>,
    listeners: Mutex<Vec<Arc<dyn ChannelListener>>>,
    io: Mutex<Option<(ReadHalf, WriteHalf)>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

struct MuxState {
    phase: Phase,
    channels: HashMap<u8, Channel>,
    ids: IdAllocator,
    command_assigned: bool,
    queue: Option<Sender<Frame>>,
}

impl MuxState {
    fn enqueue(&self, frame: Frame) -> Result<()> {
        match &self.queue {
            Some(queue) => queue.send(frame).map_err(|_| MuxError::NotRunning),
            None => Err(MuxError::NotRunning),
        }
    }
}

impl Multiplexer {
    /// Multiplex over a read half and a write half with default configuration.
    pub fn new(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> Self {
        Self::with_config(reader, writer, MuxConfig::default())
    }

    pub fn with_config(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        config: MuxConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(MuxState {
                    phase: Phase::Idle,
                    channels: HashMap::new(),
                    ids: IdAllocator::new(),
                    command_assigned: false,
                    queue: None,
                }),
                listeners: Mutex::new(Vec::new()),
                io: Mutex::new(Some((Box::new(reader), Box::new(writer)))),
                reader: Mutex::new(None),
            }),
        }
    }

    /// Multiplex over a connected transport stream.
    pub fn from_stream(stream: IpcStream, config: MuxConfig) -> Result<Self> {
        let (reader, writer) = stream.into_split()?;
        Ok(Self::with_config(reader, writer, config))
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn config(&self) -> &MuxConfig {
        &self.shared.config
    }

    /// Spawn the reader and writer threads.
    ///
    /// Fails with [`MuxError::AlreadyStarted`] on a second call and with
    /// [`MuxError::NotRunning`] after [`Multiplexer::shutdown`].
    pub fn start(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let (reader, writer) = {
            let mut state = lock(&self.shared.state);
            match state.phase {
                Phase::Running => return Err(MuxError::AlreadyStarted),
                Phase::Stopped => return Err(MuxError::NotRunning),
                Phase::Idle => {}
            }
            let halves = lock(&self.shared.io)
                .take()
                .ok_or(MuxError::AlreadyStarted)?;
            state.phase = Phase::Running;
            state.queue = Some(tx);
            halves
        };

        let name = self.shared.name().to_string();
        let frames_out = FrameWriter::new(writer);
        let weak = Arc::downgrade(&self.shared);
        let writer_name = name.clone();
        if let Err(err) = thread::Builder::new()
            .name(format!("{name}-writer"))
            .spawn(move || write_loop(&writer_name, frames_out, rx, weak))
        {
            self.shutdown();
            return Err(err.into());
        }

        let frames_in = FrameReader::with_config(reader, self.shared.config.frame_config());
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name(format!("{name}-reader"))
            .spawn(move || shared.read_loop(frames_in))
        {
            Ok(handle) => *lock(&self.shared.reader) = Some(handle),
            Err(err) => {
                self.shutdown();
                return Err(err.into());
            }
        }

        info!(mux = %name, "multiplexer started");
        Ok(())
    }

    /// Open a new channel with the lowest free id.
    ///
    /// Returns immediately after queueing OPEN; the peer learns about the
    /// channel when the frame arrives. The first channel registered after
    /// start, by either side, is the command channel.
    pub fn open_channel(&self) -> Result<Channel> {
        let channel = {
            let mut state = lock(&self.shared.state);
            if state.phase != Phase::Running {
                return Err(MuxError::NotRunning);
            }
            let id = state
                .ids
                .allocate()
                .ok_or(MuxError::TooManyChannels { max: MAX_CHANNELS })?;
            let command = !state.command_assigned;
            state.command_assigned = true;
            let channel = Channel::new(
                id,
                command,
                self.shared.config.effective_capacity(),
                Arc::downgrade(&self.shared),
            );
            state.channels.insert(id, channel.clone());
            state.enqueue(Frame::Open { channel: id })?;
            channel
        };
        debug!(
            mux = %self.shared.name(),
            channel = channel.id(),
            command = channel.is_command(),
            "opened channel"
        );
        Ok(channel)
    }

    /// Stop the multiplexer. Every channel is disconnected, the table is
    /// cleared and the writer exits after sending what is already queued.
    /// Calling it again does nothing.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
        lock(&self.shared.listeners).push(listener);
    }

    /// Remove a listener previously added. Returns whether it was found.
    pub fn remove_listener(&self, listener: &Arc<dyn ChannelListener>) -> bool {
        let mut listeners = lock(&self.shared.listeners);
        let before = listeners.len();
        listeners.retain(|existing| !Arc::ptr_eq(existing, listener));
        listeners.len() != before
    }

    /// Look up a registered channel by id.
    pub fn channel(&self, id: u8) -> Option<Channel> {
        lock(&self.shared.state).channels.get(&id).cloned()
    }

    /// The command channel, while it is registered.
    pub fn command_channel(&self) -> Option<Channel> {
        lock(&self.shared.state)
            .channels
            .values()
            .find(|channel| channel.is_command())
            .cloned()
    }

    /// Number of registered channels, including those waiting for CLOSEACK.
    pub fn channel_count(&self) -> usize {
        lock(&self.shared.state).channels.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Block until the reader thread exits (peer EOF or a fatal error).
    pub fn wait(&self) {
        let handle = lock(&self.shared.reader).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(mux = %self.shared.name(), "reader thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("Multiplexer")
            .field("name", &self.shared.config.name)
            .field("phase", &state.phase)
            .field("channels", &state.channels.len())
            .finish()
    }
}

impl Shared {
    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    fn is_running(&self) -> bool {
        lock(&self.state).phase == Phase::Running
    }

    /// Queue a data-path frame (REQUEST / TRANSMIT) for `channel`.
    pub(crate) fn send_for(&self, channel: &Channel, frame: Frame) -> Result<()> {
        let state = lock(&self.state);
        if state.phase != Phase::Running {
            return Err(MuxError::NotRunning);
        }
        if channel.state() != ChannelState::Open {
            return Err(MuxError::ChannelClosed(channel.id()));
        }
        state.enqueue(frame)
    }

    /// Move `channel` from open to closing and queue CLOSE. Returns `false`
    /// if the channel was not open.
    pub(crate) fn begin_close(&self, channel: &Channel) -> bool {
        let state = lock(&self.state);
        if channel.state() != ChannelState::Open {
            return false;
        }
        if state.phase == Phase::Running {
            channel.set_state(ChannelState::Closing);
            let _ = state.enqueue(Frame::Close {
                channel: channel.id(),
            });
        } else {
            channel.set_state(ChannelState::Closed);
        }
        true
    }

    fn shutdown(&self) {
        let channels: Vec<Channel> = {
            let mut state = lock(&self.state);
            if state.phase == Phase::Stopped {
                return;
            }
            state.phase = Phase::Stopped;
            state.queue = None;
            state.ids = IdAllocator::new();
            state
                .channels
                .drain()
                .map(|(_, channel)| {
                    channel.set_state(ChannelState::Closed);
                    channel
                })
                .collect()
        };
        lock(&self.io).take();

        for channel in &channels {
            channel.disconnect();
        }
        info!(
            mux = %self.name(),
            channels = channels.len(),
            "multiplexer shut down"
        );
    }

    fn read_loop(self: Arc<Self>, mut frames: FrameReader<ReadHalf>) {
        loop {
            let frame = match frames.read_frame() {
                Ok(frame) => frame,
                Err(FrameError::ConnectionClosed) => {
                    debug!(mux = %self.name(), "peer closed the stream");
                    break;
                }
                Err(err) => {
                    if self.is_running() {
                        warn!(mux = %self.name(), error = %err, "frame read failed");
                    }
                    break;
                }
            };
            if !self.is_running() {
                break;
            }
            if let Err(err) = self.dispatch(frame) {
                warn!(mux = %self.name(), error = %err, "fatal protocol error");
                break;
            }
        }
        self.shutdown();
    }

    fn dispatch(self: &Arc<Self>, frame: Frame) -> Result<()> {
        match frame {
            Frame::Open { channel: id } => {
                let channel = {
                    let mut state = lock(&self.state);
                    if state.channels.contains_key(&id) || !state.ids.claim(id) {
                        return Err(MuxError::Protocol {
                            channel: id,
                            reason: "OPEN for a channel id already in use",
                        });
                    }
                    let command = !state.command_assigned;
                    state.command_assigned = true;
                    let channel = Channel::new(
                        id,
                        command,
                        self.config.effective_capacity(),
                        Arc::downgrade(self),
                    );
                    state.channels.insert(id, channel.clone());
                    channel
                };
                debug!(
                    mux = %self.name(),
                    channel = id,
                    command = channel.is_command(),
                    "peer opened channel"
                );
                self.notify(|listener| listener.new_channel(&channel));
            }
            Frame::Close { channel: id } => {
                let channel = {
                    let mut state = lock(&self.state);
                    let channel = state.channels.remove(&id).ok_or(MuxError::Protocol {
                        channel: id,
                        reason: "CLOSE for an unknown channel",
                    })?;
                    state.ids.release(id);
                    let was_open = channel.state() == ChannelState::Open;
                    channel.set_state(ChannelState::Closed);
                    if was_open {
                        state.enqueue(Frame::CloseAck { channel: id })?;
                    }
                    channel
                };
                channel.disconnect();
                debug!(mux = %self.name(), channel = id, "peer closed channel");
                self.notify(|listener| listener.close_channel(&channel));
            }
            Frame::CloseAck { channel: id } => {
                let channel = {
                    let mut state = lock(&self.state);
                    let channel = state.channels.get(&id).cloned().ok_or(MuxError::Protocol {
                        channel: id,
                        reason: "CLOSEACK for an unknown channel",
                    })?;
                    if channel.state() == ChannelState::Open {
                        return Err(MuxError::Protocol {
                            channel: id,
                            reason: "CLOSEACK for a channel that is still open",
                        });
                    }
                    state.channels.remove(&id);
                    state.ids.release(id);
                    channel.set_state(ChannelState::Closed);
                    channel
                };
                debug!(mux = %self.name(), channel = id, "channel close acknowledged");
                self.notify(|listener| listener.close_channel(&channel));
            }
            Frame::Request { channel: id, credit } => {
                trace!(mux = %self.name(), channel = id, credit, "credit granted");
                self.lookup(id, "REQUEST for an unknown channel")?
                    .grant(credit);
            }
            Frame::Transmit {
                channel: id,
                payload,
            } => {
                trace!(mux = %self.name(), channel = id, len = payload.len(), "data received");
                self.lookup(id, "TRANSMIT for an unknown channel")?
                    .deliver(payload)?;
            }
        }
        Ok(())
    }

    fn lookup(&self, id: u8, reason: &'static str) -> Result<Channel> {
        lock(&self.state)
            .channels
            .get(&id)
            .cloned()
            .ok_or(MuxError::Protocol { channel: id, reason })
    }

    fn notify(&self, event: impl Fn(&dyn ChannelListener)) {
        let listeners = lock(&self.listeners).clone();
        for listener in &listeners {
            event(listener.as_ref());
        }
    }
}

fn write_loop(
    name: &str,
    mut frames: FrameWriter<WriteHalf>,
    queue: Receiver<Frame>,
    shared: Weak<Shared>,
) {
    while let Ok(first) = queue.recv() {
        let mut next = Some(first);
        let mut result = Ok(());
        while let Some(frame) = next.take() {
            if let Err(err) = frames.write_frame(&frame) {
                result = Err(err);
                break;
            }
            next = queue.try_recv().ok();
        }

        if let Err(err) = result.and_then(|()| frames.flush()) {
            warn!(mux = %name, error = %err, "frame write failed");
            if let Some(shared) = shared.upgrade() {
                shared.shutdown();
            }
            return;
        }
    }
    debug!(mux = %name, "writer stopped");
}
