//! Primitive-type serialization for SOME/IP payloads.
//!
//! All multi-byte values are big-endian on the wire. Strings are encoded
//! as a u32 length prefix, the raw bytes without a terminator, then zero
//! padding to a 4-byte boundary.

use crate::error::{Result, SomeIpError};

/// Append-only serializer backed by a growable byte buffer.
#[derive(Debug, Default)]
pub struct Serializer {
    buffer: Vec<u8>,
}

impl Serializer {
    /// Create a new serializer.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Clear the buffer for reuse.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// View the serialized bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Take the serialized bytes, leaving the serializer empty.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Write a boolean as 0x00 / 0x01.
    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    /// Write an unsigned 8-bit integer.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Write an unsigned 16-bit integer (big-endian).
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write an unsigned 32-bit integer (big-endian).
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write an unsigned 64-bit integer (big-endian).
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a signed 8-bit integer (two's complement).
    pub fn write_i8(&mut self, value: i8) {
        self.buffer.push(value as u8);
    }

    /// Write a signed 16-bit integer (big-endian).
    pub fn write_i16(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a signed 32-bit integer (big-endian).
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a signed 64-bit integer (big-endian).
    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write an IEEE-754 float (big-endian).
    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    /// Write an IEEE-754 double (big-endian).
    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    /// Write raw bytes without a length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Write a length-prefixed string, zero-padded to a 4-byte boundary.
    pub fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
        self.align_to(4);
    }

    /// Pad with zeros until the buffer length is a multiple of `alignment`.
    pub fn align_to(&mut self, alignment: usize) {
        let padding = (alignment - (self.buffer.len() % alignment)) % alignment;
        self.pad(padding);
    }

    /// Append `bytes` explicit zero padding bytes.
    pub fn pad(&mut self, bytes: usize) {
        self.buffer.resize(self.buffer.len() + bytes, 0x00);
    }
}

/// Positional deserializer over a borrowed byte slice.
#[derive(Debug)]
pub struct Deserializer<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Deserializer<'a> {
    /// Create a deserializer over `data`, positioned at the start.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Move the read position absolutely. Fails past the end of the buffer.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(SomeIpError::malformed(format!(
                "position {position} past end of {}-byte buffer",
                self.data.len()
            )));
        }
        self.position = position;
        Ok(())
    }

    /// Advance the read position, clamped to the end of the buffer.
    pub fn skip(&mut self, bytes: usize) {
        self.position = (self.position + bytes).min(self.data.len());
    }

    /// Skip padding until the position is a multiple of `alignment`.
    pub fn align_to(&mut self, alignment: usize) {
        let padding = (alignment - (self.position % alignment)) % alignment;
        self.skip(padding);
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(SomeIpError::malformed(format!(
                "need {count} bytes, {} remaining",
                self.remaining()
            )));
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    /// Read a boolean. Any non-zero byte is `true`.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.take(1)?[0] != 0x00)
    }

    /// Read an unsigned 8-bit integer.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read an unsigned 16-bit integer (big-endian).
    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read an unsigned 32-bit integer (big-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read an unsigned 64-bit integer (big-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a signed 8-bit integer.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a signed 16-bit integer (big-endian).
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    /// Read a signed 32-bit integer (big-endian).
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Read a signed 64-bit integer (big-endian).
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Read an IEEE-754 float (big-endian).
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Read an IEEE-754 double (big-endian).
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.take(count)
    }

    /// Read a length-prefixed string and skip its 4-byte-alignment padding.
    pub fn read_string(&mut self) -> Result<String> {
        let length = self.read_u32()? as usize;
        let bytes = self.take(length)?;
        let value = String::from_utf8(bytes.to_vec())
            .map_err(|_| SomeIpError::malformed("string is not valid UTF-8"))?;
        self.align_to(4);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_roundtrip() {
        let mut ser = Serializer::new();
        ser.write_u8(0xAB);
        ser.write_u16(0x1234);
        ser.write_u32(0xDEAD_BEEF);
        ser.write_u64(0x0102_0304_0506_0708);
        ser.write_i8(-5);
        ser.write_i16(-1000);
        ser.write_i32(-123456);
        ser.write_i64(-1);

        let bytes = ser.into_bytes();
        // Spot-check big-endian layout
        assert_eq!(&bytes[1..3], &[0x12, 0x34]);
        assert_eq!(&bytes[3..7], &[0xDE, 0xAD, 0xBE, 0xEF]);

        let mut de = Deserializer::new(&bytes);
        assert_eq!(de.read_u8().unwrap(), 0xAB);
        assert_eq!(de.read_u16().unwrap(), 0x1234);
        assert_eq!(de.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(de.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(de.read_i8().unwrap(), -5);
        assert_eq!(de.read_i16().unwrap(), -1000);
        assert_eq!(de.read_i32().unwrap(), -123456);
        assert_eq!(de.read_i64().unwrap(), -1);
        assert_eq!(de.remaining(), 0);
    }

    #[test]
    fn test_bool_encoding() {
        let mut ser = Serializer::new();
        ser.write_bool(true);
        ser.write_bool(false);
        assert_eq!(ser.as_bytes(), &[0x01, 0x00]);

        // Any non-zero byte decodes to true
        let mut de = Deserializer::new(&[0x00, 0x01, 0x7F]);
        assert!(!de.read_bool().unwrap());
        assert!(de.read_bool().unwrap());
        assert!(de.read_bool().unwrap());
    }

    #[test]
    fn test_float_roundtrip() {
        let mut ser = Serializer::new();
        ser.write_f32(3.5);
        ser.write_f64(-0.125);

        let bytes = ser.into_bytes();
        assert_eq!(&bytes[0..4], &3.5f32.to_bits().to_be_bytes());

        let mut de = Deserializer::new(&bytes);
        assert_eq!(de.read_f32().unwrap(), 3.5);
        assert_eq!(de.read_f64().unwrap(), -0.125);
    }

    #[test]
    fn test_string_padding() {
        let mut ser = Serializer::new();
        ser.write_string("hello");
        // 4 length bytes + 5 data bytes + 3 padding bytes
        assert_eq!(ser.len(), 12);
        assert_eq!(&ser.as_bytes()[..4], &[0, 0, 0, 5]);
        assert_eq!(&ser.as_bytes()[9..], &[0, 0, 0]);

        let bytes = ser.into_bytes();
        let mut de = Deserializer::new(&bytes);
        assert_eq!(de.read_string().unwrap(), "hello");
        assert_eq!(de.remaining(), 0);
    }

    #[test]
    fn test_string_exact_multiple_no_padding() {
        let mut ser = Serializer::new();
        ser.write_string("abcd");
        assert_eq!(ser.len(), 8);

        let bytes = ser.into_bytes();
        let mut de = Deserializer::new(&bytes);
        assert_eq!(de.read_string().unwrap(), "abcd");
    }

    #[test]
    fn test_alignment_and_padding() {
        let mut ser = Serializer::new();
        ser.write_u8(1);
        ser.align_to(4);
        assert_eq!(ser.len(), 4);
        ser.pad(2);
        assert_eq!(ser.len(), 6);

        let bytes = ser.into_bytes();
        let mut de = Deserializer::new(&bytes);
        de.skip(1);
        de.align_to(4);
        assert_eq!(de.position(), 4);
    }

    #[test]
    fn test_short_reads_fail() {
        let mut de = Deserializer::new(&[0x01, 0x02]);
        assert!(de.read_u32().is_err());
        // Position is unchanged after a failed read
        assert_eq!(de.read_u16().unwrap(), 0x0102);
        assert!(de.read_u8().is_err());
    }

    #[test]
    fn test_set_position() {
        let data = [1u8, 2, 3, 4];
        let mut de = Deserializer::new(&data);
        de.set_position(2).unwrap();
        assert_eq!(de.read_u8().unwrap(), 3);
        assert!(de.set_position(5).is_err());
        de.set_position(4).unwrap();
        assert_eq!(de.remaining(), 0);
    }

    #[test]
    fn test_skip_clamps() {
        let mut de = Deserializer::new(&[0u8; 4]);
        de.skip(100);
        assert_eq!(de.position(), 4);
        assert!(de.read_u8().is_err());
    }
}
