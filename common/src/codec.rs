//! Flat little-endian record codec for persisted module settings.
//!
//! Every field is written with an explicit width so the byte layout does not
//! depend on how the compiler lays out a struct.

use std::io::{self, Cursor};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::HiveError;

/// A settings blob that can be stored in a fixed-size storage region.
pub trait StoredConfig: Sized {
    const STORAGE_SIZE: usize;

    fn encode(&self, writer: &mut RecordWriter) -> Result<(), HiveError>;
    fn decode(reader: &mut RecordReader<'_>) -> Result<Self, HiveError>;

    fn to_bytes(&self) -> Result<Vec<u8>, HiveError> {
        let mut writer = RecordWriter::with_capacity(Self::STORAGE_SIZE);
        self.encode(&mut writer)?;
        Ok(writer.into_bytes())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, HiveError> {
        let mut reader = RecordReader::new(bytes);
        Self::decode(&mut reader)
    }
}

fn encode_error(err: io::Error) -> HiveError {
    HiveError::Encode(err.to_string())
}

fn truncated(_: io::Error) -> HiveError {
    HiveError::Truncated
}

#[derive(Debug, Default)]
pub struct RecordWriter {
    buf: Vec<u8>,
}

impl RecordWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_i8(&mut self, value: i8) -> Result<(), HiveError> {
        self.buf.write_i8(value).map_err(encode_error)
    }

    pub fn put_u8(&mut self, value: u8) -> Result<(), HiveError> {
        self.buf.write_u8(value).map_err(encode_error)
    }

    pub fn put_u16(&mut self, value: u16) -> Result<(), HiveError> {
        self.buf
            .write_u16::<LittleEndian>(value)
            .map_err(encode_error)
    }

    pub fn put_i32(&mut self, value: i32) -> Result<(), HiveError> {
        self.buf
            .write_i32::<LittleEndian>(value)
            .map_err(encode_error)
    }

    pub fn put_u32(&mut self, value: u32) -> Result<(), HiveError> {
        self.buf
            .write_u32::<LittleEndian>(value)
            .map_err(encode_error)
    }

    pub fn put_i64(&mut self, value: i64) -> Result<(), HiveError> {
        self.buf
            .write_i64::<LittleEndian>(value)
            .map_err(encode_error)
    }

    pub fn put_f32(&mut self, value: f32) -> Result<(), HiveError> {
        self.buf
            .write_f32::<LittleEndian>(value)
            .map_err(encode_error)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads fields back in the order they were put. Running out of bytes is
/// [`HiveError::Truncated`].
#[derive(Debug)]
pub struct RecordReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> RecordReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    pub fn get_i8(&mut self) -> Result<i8, HiveError> {
        self.cursor.read_i8().map_err(truncated)
    }

    pub fn get_u8(&mut self) -> Result<u8, HiveError> {
        self.cursor.read_u8().map_err(truncated)
    }

    pub fn get_u16(&mut self) -> Result<u16, HiveError> {
        self.cursor.read_u16::<LittleEndian>().map_err(truncated)
    }

    pub fn get_i32(&mut self) -> Result<i32, HiveError> {
        self.cursor.read_i32::<LittleEndian>().map_err(truncated)
    }

    pub fn get_u32(&mut self) -> Result<u32, HiveError> {
        self.cursor.read_u32::<LittleEndian>().map_err(truncated)
    }

    pub fn get_i64(&mut self) -> Result<i64, HiveError> {
        self.cursor.read_i64::<LittleEndian>().map_err(truncated)
    }

    pub fn get_f32(&mut self) -> Result<f32, HiveError> {
        self.cursor.read_f32::<LittleEndian>().map_err(truncated)
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_packed_without_padding() {
        let mut writer = RecordWriter::default();
        writer.put_i8(-1).unwrap();
        writer.put_f32(1.0).unwrap();
        writer.put_u16(0x0817).unwrap();

        assert_eq!(writer.len(), 7);
        assert_eq!(
            writer.into_bytes(),
            vec![0xFF, 0x00, 0x00, 0x80, 0x3F, 0x17, 0x08]
        );
    }

    #[test]
    fn short_buffer_reports_truncation() {
        let bytes = [0x01, 0x02, 0x03];
        let mut reader = RecordReader::new(&bytes);

        assert_eq!(reader.get_u16(), Ok(0x0201));
        assert_eq!(reader.position(), 2);
        assert_eq!(reader.get_u32(), Err(HiveError::Truncated));
    }

    #[test]
    fn signed_and_wide_fields_read_back() {
        let mut writer = RecordWriter::default();
        writer.put_i32(-40).unwrap();
        writer.put_i64(1_700_000_000).unwrap();
        let bytes = writer.into_bytes();

        let mut reader = RecordReader::new(&bytes);
        assert_eq!(reader.get_i32(), Ok(-40));
        assert_eq!(reader.get_i64(), Ok(1_700_000_000));
        assert_eq!(reader.get_u8(), Err(HiveError::Truncated));
    }
}
