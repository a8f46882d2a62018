/// Errors surfaced by the multiplexer.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] muxprims_frame::FrameError),

    /// Transport error while preparing the stream.
    #[error("transport error: {0}")]
    Transport(#[from] muxprims_transport::TransportError),

    /// I/O error, e.g. while spawning the reader or writer thread.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `start()` was called more than once.
    #[error("multiplexer already started")]
    AlreadyStarted,

    /// The multiplexer has not been started or has been shut down.
    #[error("multiplexer is not running")]
    NotRunning,

    /// All 256 channel ids are in use.
    #[error("too many open channels (max {max})")]
    TooManyChannels { max: usize },

    /// The peer sent a frame that is invalid for the current channel state.
    #[error("protocol violation on channel {channel}: {reason}")]
    Protocol { channel: u8, reason: &'static str },

    /// The peer sent more bytes than the channel buffer can hold.
    #[error("channel {channel} overflow: {len} bytes received with {free} bytes free")]
    Overflow { channel: u8, len: usize, free: usize },

    /// The channel is no longer open.
    #[error("channel {0} is closed")]
    ChannelClosed(u8),
}

pub type Result<T> = std::result::Result<T, MuxError>;

impl From<MuxError> for std::io::Error {
    fn from(err: MuxError) -> Self {
        match err {
            MuxError::Io(io) => io,
            MuxError::NotRunning | MuxError::ChannelClosed(_) => {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, err)
            }
            other => std::io::Error::other(other),
        }
    }
}
