use muxprims_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};

/// Default per-direction channel buffer capacity in bytes.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8192;

/// Multiplexer configuration.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Name used for thread names and the `mux` log field.
    pub name: String,
    /// Capacity C of each channel's inbound and outbound buffer.
    /// Inbound credit requests never exceed this. Default: 8192.
    pub channel_capacity: usize,
    /// Largest TRANSMIT payload accepted from the peer. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            name: "mux".to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl MuxConfig {
    /// Default configuration with a different name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
        }
    }

    /// Capacity actually used for channel buffers (at least one byte).
    pub(crate) fn effective_capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }
}
