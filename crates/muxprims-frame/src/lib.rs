//! Control frames for carrying many channels over one duplex byte stream.
//!
//! Every frame starts with a 1-byte opcode and a 1-byte channel id:
//! - OPEN / CLOSE / CLOSEACK carry nothing else
//! - REQUEST carries a 4-byte big-endian credit grant
//! - TRANSMIT carries a 4-byte big-endian length and that many payload bytes
//!
//! Frames are strictly self-delimiting; the codec never splits or merges them.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::MuxCodec;
pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, Opcode, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    MAX_CHANNELS,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
