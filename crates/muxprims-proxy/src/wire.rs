//! Primitive encodings used by commands and results.
//!
//! Integers are fixed-width big-endian, booleans are one byte, strings are a
//! u16 byte length followed by UTF-8, and maps are an i32 entry count
//! followed by key/value string pairs.

use std::collections::BTreeMap;
use std::io::Read;

use bytes::BufMut;

use crate::error::{ProxyError, Result};

/// Reading side of the wire encoding, for any [`Read`].
pub trait WireRead: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_i16(&mut self) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    fn read_string(&mut self) -> Result<String> {
        let mut len = [0u8; 2];
        self.read_exact(&mut len)?;
        let mut bytes = vec![0u8; u16::from_be_bytes(len) as usize];
        self.read_exact(&mut bytes)?;
        String::from_utf8(bytes)
            .map_err(|err| ProxyError::Protocol(format!("string is not UTF-8: {err}")))
    }

    /// An i32 count, rejecting negative values.
    fn read_count(&mut self) -> Result<usize> {
        let count = self.read_i32()?;
        usize::try_from(count)
            .map_err(|_| ProxyError::Protocol(format!("negative element count {count}")))
    }

    fn read_strings(&mut self) -> Result<Vec<String>> {
        let count = self.read_count()?;
        (0..count).map(|_| self.read_string()).collect()
    }

    fn read_map(&mut self) -> Result<BTreeMap<String, String>> {
        let count = self.read_count()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = self.read_string()?;
            let value = self.read_string()?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<R: Read + ?Sized> WireRead for R {}

/// Writing side of the wire encoding, for any [`BufMut`].
pub trait WireWrite: BufMut {
    fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    fn put_string(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len())
            .map_err(|_| ProxyError::StringTooLong { len: value.len() })?;
        self.put_u16(len);
        self.put_slice(value.as_bytes());
        Ok(())
    }

    fn put_count(&mut self, count: usize) -> Result<()> {
        let count = i32::try_from(count)
            .map_err(|_| ProxyError::InvalidArgument(format!("too many elements ({count})")))?;
        self.put_i32(count);
        Ok(())
    }

    fn put_strings(&mut self, values: &[String]) -> Result<()> {
        self.put_count(values.len())?;
        for value in values {
            self.put_string(value)?;
        }
        Ok(())
    }

    fn put_map(&mut self, map: &BTreeMap<String, String>) -> Result<()> {
        self.put_count(map.len())?;
        for (key, value) in map {
            self.put_string(key)?;
            self.put_string(value)?;
        }
        Ok(())
    }
}

impl<B: BufMut + ?Sized> WireWrite for B {}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn string_layout_is_length_prefixed_utf8() {
        let mut buf = BytesMut::new();
        buf.put_string("héllo").unwrap();
        assert_eq!(&buf[..2], &[0, 6]);
        assert_eq!(&buf[2..], "héllo".as_bytes());

        let mut input = &buf[..];
        assert_eq!(input.read_string().unwrap(), "héllo");
        assert!(input.is_empty());
    }

    #[test]
    fn oversized_string_is_rejected() {
        let mut buf = BytesMut::new();
        let long = "x".repeat(70_000);
        assert!(matches!(
            buf.put_string(&long),
            Err(ProxyError::StringTooLong { len: 70_000 })
        ));
        buf.put_string(&"y".repeat(65_535)).unwrap();
    }

    #[test]
    fn map_and_list_encoding() {
        let mut map = BTreeMap::new();
        map.insert("HOME".to_string(), "/root".to_string());
        map.insert("LANG".to_string(), "C".to_string());

        let mut buf = BytesMut::new();
        buf.put_map(&map).unwrap();
        buf.put_strings(&["a".to_string(), "bc".to_string()]).unwrap();
        buf.put_bool(true);
        buf.put_i64(-2);
        assert_eq!(&buf[..4], &[0, 0, 0, 2]);

        let mut input = &buf[..];
        assert_eq!(input.read_map().unwrap(), map);
        assert_eq!(input.read_strings().unwrap(), vec!["a", "bc"]);
        assert!(input.read_bool().unwrap());
        assert_eq!(input.read_i64().unwrap(), -2);
    }

    #[test]
    fn truncated_input_is_eof() {
        let mut input: &[u8] = &[0, 5, b'a'];
        let err = input.read_string().unwrap_err();
        assert!(err.is_eof());
    }

    #[test]
    fn negative_count_and_bad_utf8_are_protocol_errors() {
        let mut input: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(input.read_map(), Err(ProxyError::Protocol(_))));

        let mut input: &[u8] = &[0, 2, 0xC3, 0x28];
        assert!(matches!(input.read_string(), Err(ProxyError::Protocol(_))));
    }
}
