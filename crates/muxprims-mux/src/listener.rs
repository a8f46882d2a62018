use crate::channel::Channel;

/// Observer for channel lifecycle events on a [`crate::Multiplexer`].
///
/// Callbacks run on the multiplexer's reader thread and must not block on
/// channel I/O; hand the channel to another thread instead.
pub trait ChannelListener: Send + Sync {
    /// The peer opened `channel`.
    fn new_channel(&self, channel: &Channel);

    /// `channel` finished its close handshake.
    fn close_channel(&self, _channel: &Channel) {}
}
