use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use bytes::{Buf, Bytes, BytesMut};
use muxprims_frame::Frame;
use tracing::{debug, trace};

use crate::error::{MuxError, Result};
use crate::lock;
use crate::multiplexer::Shared;

/// Lifecycle state of a channel as seen by the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Usable in both directions.
    Open,
    /// CLOSE sent, waiting for the peer's CLOSEACK.
    Closing,
    /// Handshake finished (or the multiplexer shut down).
    Closed,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Open,
            1 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ChannelState::Open => 0,
            ChannelState::Closing => 1,
            ChannelState::Closed => 2,
        }
    }
}

/// One bidirectional byte stream carried by a [`crate::Multiplexer`].
///
/// `Channel` is a cheap handle; clones refer to the same channel. Reads and
/// writes go through [`std::io::Read`] and [`std::io::Write`], implemented
/// for both `Channel` and `&Channel` so one thread can read while another
/// writes.
///
/// Reading grants the peer credit for the free space in the inbound buffer
/// and blocks until data arrives. Writing buffers up to the channel capacity
/// and then sends TRANSMIT frames no larger than the credit the peer has
/// granted, blocking while no credit is available.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

struct Inner {
    id: u8,
    command: bool,
    capacity: usize,
    mux: Weak<Shared>,
    // Transitions happen only under the multiplexer lock.
    state: AtomicU8,
    inbound: Mutex<Inbound>,
    readable: Condvar,
    outbound: Mutex<Outbound>,
    writable: Condvar,
}

struct Inbound {
    buf: BytesMut,
    outstanding: usize,
    eof: bool,
    disconnected: bool,
}

struct Outbound {
    buf: BytesMut,
    credit: usize,
    write_closed: bool,
    disconnected: bool,
}

fn wait<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

fn broken_pipe(id: u8) -> io::Error {
    io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("channel {id} is disconnected"),
    )
}

impl Channel {
    pub(crate) fn new(id: u8, command: bool, capacity: usize, mux: Weak<Shared>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                command,
                capacity,
                mux,
                state: AtomicU8::new(ChannelState::Open.as_u8()),
                inbound: Mutex::new(Inbound {
                    buf: BytesMut::with_capacity(capacity),
                    outstanding: 0,
                    eof: false,
                    disconnected: false,
                }),
                readable: Condvar::new(),
                outbound: Mutex::new(Outbound {
                    buf: BytesMut::with_capacity(capacity),
                    credit: 0,
                    write_closed: false,
                    disconnected: false,
                }),
                writable: Condvar::new(),
            }),
        }
    }

    /// Channel id on the wire.
    pub fn id(&self) -> u8 {
        self.inner.id
    }

    /// Whether this is the multiplexer's command channel.
    pub fn is_command(&self) -> bool {
        self.inner.command
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Buffer capacity of each direction.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Bytes that can be read without blocking.
    pub fn available(&self) -> usize {
        lock(&self.inner.inbound).buf.len()
    }

    /// Whether two handles refer to the same channel.
    pub fn same_channel(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Flush buffered output and end the outbound byte stream.
    ///
    /// The peer's reads drain what was sent and then return end-of-stream.
    /// The inbound direction is unaffected.
    pub fn shutdown_write(&self) -> io::Result<()> {
        let mut out = lock(&self.inner.outbound);
        if out.write_closed {
            return Ok(());
        }
        out = self.push(out)?;
        out.write_closed = true;
        self.send(Frame::end_of_stream(self.inner.id))
            .map_err(io::Error::from)?;
        trace!(channel = self.inner.id, "write side closed");
        drop(out);
        Ok(())
    }

    /// Close the channel.
    ///
    /// Buffered output is sent as far as the current credit allows; the rest
    /// is discarded. Blocked readers and writers are released immediately.
    /// The id is reclaimed once the peer acknowledges. Calling `close` again
    /// does nothing.
    pub fn close(&self) {
        if !self.is_open() {
            return;
        }
        self.flush_available();
        match self.inner.mux.upgrade() {
            Some(mux) => {
                if mux.begin_close(self) {
                    debug!(mux = %mux.name(), channel = self.inner.id, "closing channel");
                }
            }
            None => self.set_state(ChannelState::Closed),
        }
        self.disconnect();
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        self.inner.state.store(state.as_u8(), Ordering::Release);
    }

    /// Wake every blocked reader and writer and drop buffered data.
    /// Reads then report end-of-stream; writes fail with `BrokenPipe`.
    pub(crate) fn disconnect(&self) {
        {
            let mut inbound = lock(&self.inner.inbound);
            inbound.disconnected = true;
            inbound.buf.clear();
            self.inner.readable.notify_all();
        }
        let mut out = lock(&self.inner.outbound);
        out.disconnected = true;
        out.buf.clear();
        self.inner.writable.notify_all();
    }

    /// Store a TRANSMIT payload arriving from the peer.
    pub(crate) fn deliver(&self, payload: Bytes) -> Result<()> {
        let mut inbound = lock(&self.inner.inbound);
        if inbound.disconnected {
            trace!(
                channel = self.inner.id,
                len = payload.len(),
                "discarding data for closed channel"
            );
            return Ok(());
        }
        if payload.is_empty() {
            inbound.eof = true;
            self.inner.readable.notify_all();
            return Ok(());
        }

        let free = self.inner.capacity - inbound.buf.len();
        if payload.len() > free {
            return Err(MuxError::Overflow {
                channel: self.inner.id,
                len: payload.len(),
                free,
            });
        }
        inbound.outstanding = inbound.outstanding.saturating_sub(payload.len());
        inbound.buf.extend_from_slice(&payload);
        self.inner.readable.notify_all();
        Ok(())
    }

    /// Add credit granted by a REQUEST from the peer.
    pub(crate) fn grant(&self, credit: u32) {
        let mut out = lock(&self.inner.outbound);
        if out.disconnected {
            return;
        }
        out.credit = out.credit.saturating_add(credit as usize);
        self.inner.writable.notify_all();
    }

    fn send(&self, frame: Frame) -> Result<()> {
        let mux = self.inner.mux.upgrade().ok_or(MuxError::NotRunning)?;
        mux.send_for(self, frame)
    }

    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut inbound = lock(&self.inner.inbound);
        loop {
            if !inbound.buf.is_empty() {
                let n = buf.len().min(inbound.buf.len());
                buf[..n].copy_from_slice(&inbound.buf[..n]);
                inbound.buf.advance(n);
                return Ok(n);
            }
            if inbound.eof || inbound.disconnected {
                return Ok(0);
            }

            let free = self.inner.capacity - inbound.buf.len();
            let want = free.saturating_sub(inbound.outstanding);
            if want > 0 {
                inbound.outstanding += want;
                let frame = Frame::Request {
                    channel: self.inner.id,
                    credit: want as u32,
                };
                if self.send(frame).is_err() {
                    return Ok(0);
                }
            }
            inbound = wait(&self.inner.readable, inbound);
        }
    }

    fn write_some(&self, data: &[u8]) -> io::Result<usize> {
        let mut out = lock(&self.inner.outbound);
        let mut written = 0;
        while written < data.len() {
            if out.disconnected || out.write_closed {
                return Err(broken_pipe(self.inner.id));
            }
            let space = self.inner.capacity - out.buf.len();
            if space == 0 {
                out = self.push(out)?;
                continue;
            }
            let n = space.min(data.len() - written);
            out.buf.extend_from_slice(&data[written..written + n]);
            written += n;
        }
        Ok(written)
    }

    fn flush_buffered(&self) -> io::Result<()> {
        let out = lock(&self.inner.outbound);
        if out.buf.is_empty() {
            return Ok(());
        }
        drop(self.push(out)?);
        Ok(())
    }

    /// Send every buffered byte, waiting for credit as needed.
    fn push<'a>(&self, mut out: MutexGuard<'a, Outbound>) -> io::Result<MutexGuard<'a, Outbound>> {
        while !out.buf.is_empty() {
            if out.disconnected {
                return Err(broken_pipe(self.inner.id));
            }
            if out.credit == 0 {
                out = wait(&self.inner.writable, out);
                continue;
            }
            let n = out.buf.len().min(out.credit);
            let payload = out.buf.split_to(n).freeze();
            out.credit -= n;
            self.send(Frame::transmit(self.inner.id, payload))
                .map_err(io::Error::from)?;
        }
        Ok(out)
    }

    /// Send what the current credit covers without waiting; drop the rest.
    fn flush_available(&self) {
        let mut out = lock(&self.inner.outbound);
        while !out.buf.is_empty() && out.credit > 0 && !out.disconnected {
            let n = out.buf.len().min(out.credit);
            let payload = out.buf.split_to(n).freeze();
            out.credit -= n;
            if self.send(Frame::transmit(self.inner.id, payload)).is_err() {
                break;
            }
        }
        if !out.buf.is_empty() {
            debug!(
                channel = self.inner.id,
                len = out.buf.len(),
                "discarding unsent data on close"
            );
            out.buf.clear();
        }
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_some(buf)
    }
}

impl Read for &Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_some(buf)
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_some(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffered()
    }
}

impl Write for &Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_some(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffered()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("command", &self.inner.command)
            .finish()
    }
}
