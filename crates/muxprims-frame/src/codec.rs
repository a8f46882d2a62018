use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Common frame header: opcode (1) + channel id (1).
pub const HEADER_SIZE: usize = 2;

/// Size of the 4-byte big-endian field carried by REQUEST and TRANSMIT.
const LENGTH_SIZE: usize = 4;

/// Channel ids are one byte, so at most 256 channels can be open at once.
pub const MAX_CHANNELS: usize = 256;

/// Default maximum TRANSMIT payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame opcodes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Open = 0xE1,
    Close = 0xE2,
    CloseAck = 0xE3,
    Request = 0xE4,
    Transmit = 0xE5,
}

impl Opcode {
    /// Upper-case name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Open => "OPEN",
            Opcode::Close => "CLOSE",
            Opcode::CloseAck => "CLOSEACK",
            Opcode::Request => "REQUEST",
            Opcode::Transmit => "TRANSMIT",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0xE1 => Ok(Opcode::Open),
            0xE2 => Ok(Opcode::Close),
            0xE3 => Ok(Opcode::CloseAck),
            0xE4 => Ok(Opcode::Request),
            0xE5 => Ok(Opcode::Transmit),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

/// One control frame addressed to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The sender registered a new channel under this id.
    Open { channel: u8 },
    /// The sender is closing the channel.
    Close { channel: u8 },
    /// The sender acknowledges a CLOSE; the id may be reused afterwards.
    CloseAck { channel: u8 },
    /// The sender grants `credit` more bytes of TRANSMIT on this channel.
    Request { channel: u8, credit: u32 },
    /// Channel data. An empty payload marks the end of the sender's stream.
    Transmit { channel: u8, payload: Bytes },
}

impl Frame {
    /// Build a TRANSMIT frame.
    pub fn transmit(channel: u8, payload: impl Into<Bytes>) -> Self {
        Frame::Transmit {
            channel,
            payload: payload.into(),
        }
    }

    /// The zero-length TRANSMIT that half-closes a channel.
    pub fn end_of_stream(channel: u8) -> Self {
        Frame::Transmit {
            channel,
            payload: Bytes::new(),
        }
    }

    /// Channel id this frame is addressed to.
    pub fn channel(&self) -> u8 {
        match self {
            Frame::Open { channel }
            | Frame::Close { channel }
            | Frame::CloseAck { channel }
            | Frame::Request { channel, .. }
            | Frame::Transmit { channel, .. } => *channel,
        }
    }

    /// Opcode of this frame.
    pub fn opcode(&self) -> Opcode {
        match self {
            Frame::Open { .. } => Opcode::Open,
            Frame::Close { .. } => Opcode::Close,
            Frame::CloseAck { .. } => Opcode::CloseAck,
            Frame::Request { .. } => Opcode::Request,
            Frame::Transmit { .. } => Opcode::Transmit,
        }
    }

    /// Total number of bytes this frame occupies on the wire.
    pub fn wire_size(&self) -> usize {
        match self {
            Frame::Open { .. } | Frame::Close { .. } | Frame::CloseAck { .. } => HEADER_SIZE,
            Frame::Request { .. } => HEADER_SIZE + LENGTH_SIZE,
            Frame::Transmit { payload, .. } => HEADER_SIZE + LENGTH_SIZE + payload.len(),
        }
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────┬───────────────────────────────────────┐
/// │ Opcode   │ Channel  │ Body                                  │
/// │ (1B)     │ (1B)     │ REQUEST:  credit (4B BE)              │
/// │ 0xE1-E5  │ 0-255    │ TRANSMIT: length (4B BE) + payload    │
/// └──────────┴──────────┴───────────────────────────────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    if let Frame::Transmit { payload, .. } = frame {
        if payload.len() > u32::MAX as usize {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: u32::MAX as usize,
            });
        }
    }

    dst.reserve(frame.wire_size());
    dst.put_u8(frame.opcode() as u8);
    dst.put_u8(frame.channel());
    match frame {
        Frame::Open { .. } | Frame::Close { .. } | Frame::CloseAck { .. } => {}
        Frame::Request { credit, .. } => dst.put_u32(*credit),
        Frame::Transmit { payload, .. } => {
            dst.put_u32(payload.len() as u32);
            dst.put_slice(payload);
        }
    }
    Ok(())
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes exactly that frame's bytes.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let opcode = Opcode::try_from(src[0])?;
    let channel = src[1];

    let frame = match opcode {
        Opcode::Open | Opcode::Close | Opcode::CloseAck => {
            src.advance(HEADER_SIZE);
            match opcode {
                Opcode::Open => Frame::Open { channel },
                Opcode::Close => Frame::Close { channel },
                _ => Frame::CloseAck { channel },
            }
        }
        Opcode::Request => {
            let Some(credit) = peek_u32(src) else {
                return Ok(None);
            };
            src.advance(HEADER_SIZE + LENGTH_SIZE);
            Frame::Request { channel, credit }
        }
        Opcode::Transmit => {
            let Some(len) = peek_u32(src) else {
                return Ok(None);
            };
            let len = len as usize;
            if len > max_payload {
                return Err(FrameError::PayloadTooLarge {
                    size: len,
                    max: max_payload,
                });
            }
            let total = HEADER_SIZE + LENGTH_SIZE + len;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }
            src.advance(HEADER_SIZE + LENGTH_SIZE);
            Frame::Transmit {
                channel,
                payload: src.split_to(len).freeze(),
            }
        }
    };

    Ok(Some(frame))
}

fn peek_u32(src: &BytesMut) -> Option<u32> {
    let mut field = src.get(HEADER_SIZE..HEADER_SIZE + LENGTH_SIZE)?;
    Some(field.get_u32())
}

/// Configuration for frame decoding.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum TRANSMIT payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
