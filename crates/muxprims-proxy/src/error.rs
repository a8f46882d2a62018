/// Errors from the command layer.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Multiplexer failure.
    #[error("multiplexer error: {0}")]
    Mux(#[from] muxprims_mux::MuxError),

    /// Transport failure while connecting.
    #[error("transport error: {0}")]
    Transport(#[from] muxprims_transport::TransportError),

    /// Channel or filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered `PROTO_ERROR` with this message.
    #[error("remote error: {0}")]
    Remote(String),

    /// The peer sent something that does not follow the command protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A command argument is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Strings are limited to 65535 encoded bytes.
    #[error("string too long for the wire ({len} bytes, max 65535)")]
    StringTooLong { len: usize },

    /// An auxiliary channel named in a command is not registered.
    #[error("unable to locate channel {0}")]
    ChannelNotFound(u8),

    /// The command opcode is not recognized.
    #[error("invalid command opcode {0}")]
    UnknownOpcode(i16),

    /// The process could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// Whether the command channel itself reached end of stream.
    pub fn is_eof(&self) -> bool {
        matches!(self, ProxyError::Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

impl From<ProxyError> for std::io::Error {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Io(err) => err,
            other => std::io::Error::other(other),
        }
    }
}
