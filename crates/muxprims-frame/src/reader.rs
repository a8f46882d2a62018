use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Partial reads are buffered internally; callers always get whole frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` at EOF, including EOF in
    /// the middle of a frame.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                trace!(
                    opcode = frame.opcode().name(),
                    channel = frame.channel(),
                    "frame in"
                );
                return Ok(frame);
            }

            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, Opcode};

    fn wire(frames: &[Frame]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for frame in frames {
            encode_frame(frame, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn reads_mixed_frame_sequence() {
        let frames = vec![
            Frame::Open { channel: 0 },
            Frame::Request { channel: 0, credit: 8192 },
            Frame::transmit(0, Bytes::from_static(b"payload")),
            Frame::Close { channel: 0 },
            Frame::CloseAck { channel: 0 },
        ];
        let mut reader = FrameReader::new(Cursor::new(wire(&frames)));
        for expected in frames {
            assert_eq!(reader.read_frame().unwrap(), expected);
        }
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn large_transmit_spans_many_reads() {
        let payload = vec![0xAB; 64 * 1024];
        let frame = Frame::transmit(9, payload.clone());
        let mut reader = FrameReader::new(Cursor::new(wire(&[frame])));

        match reader.read_frame().unwrap() {
            Frame::Transmit { channel, payload: got } => {
                assert_eq!(channel, 9);
                assert_eq!(got.as_ref(), payload.as_slice());
            }
            other => panic!("expected TRANSMIT, got {other:?}"),
        }
    }

    #[test]
    fn byte_at_a_time_stream() {
        let bytes = wire(&[Frame::Request { channel: 4, credit: 77 }]);
        let mut reader = FrameReader::new(ByteByByte { bytes, pos: 0 });
        assert_eq!(
            reader.read_frame().unwrap(),
            Frame::Request { channel: 4, credit: 77 }
        );
    }

    #[test]
    fn eof_mid_frame_is_connection_closed() {
        let mut partial = BytesMut::new();
        partial.put_u8(Opcode::Transmit as u8);
        partial.put_u8(2);
        partial.put_u32(16);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn unknown_opcode_in_stream() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x01, 0x00]));
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::UnknownOpcode(0x01)
        ));
    }

    #[test]
    fn configured_payload_limit_applies() {
        let bytes = wire(&[Frame::transmit(1, vec![0u8; 64])]);
        let cfg = FrameConfig {
            max_payload_size: 16,
        };
        let mut reader = FrameReader::with_config(Cursor::new(bytes), cfg);
        assert_eq!(reader.config().max_payload_size, 16);
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::PayloadTooLarge { size: 64, max: 16 }
        ));
    }

    #[test]
    fn interrupted_read_retries() {
        let bytes = wire(&[Frame::Open { channel: 8 }]);
        let mut reader = FrameReader::new(InterruptedOnce {
            interrupted: false,
            inner: Cursor::new(bytes),
        });
        assert_eq!(reader.read_frame().unwrap(), Frame::Open { channel: 8 });
        let _ = reader.get_ref();
        let _ = reader.into_inner();
    }

    #[test]
    #[cfg(unix)]
    fn frames_cross_a_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        let writer_thread = std::thread::spawn(move || {
            for i in 0..64u32 {
                writer
                    .write_frame(&Frame::Request {
                        channel: (i % 5) as u8,
                        credit: i,
                    })
                    .unwrap();
            }
            writer.flush().unwrap();
        });

        for i in 0..64u32 {
            assert_eq!(
                reader.read_frame().unwrap(),
                Frame::Request {
                    channel: (i % 5) as u8,
                    credit: i
                }
            );
        }
        writer_thread.join().unwrap();
    }

    struct ByteByByte {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByte {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedOnce {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedOnce {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
