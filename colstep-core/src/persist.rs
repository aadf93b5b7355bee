//! Versioned property stream and the manager descriptor
//!
//! The host persists each storage manager's own state through a generic
//! property stream. An object in the stream is framed as:
//!
//! - 4 bytes: magic `0xBEBEBEBE`
//! - 4 bytes: object length in bytes, including magic and length
//! - type name: 4 byte length + UTF-8
//! - 4 bytes: version
//! - fields, written in order (strings as 4 byte length + UTF-8, integers
//!   little-endian)
//!
//! The manager itself stores exactly two fields: its name and its type tag.

use crate::{ColStepError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Object start marker
pub const OBJECT_MAGIC: u32 = 0xBEBE_BEBE;

/// Version of the manager descriptor layout
pub const DESCRIPTOR_VERSION: u32 = 2;

/// Writer side of the property stream
#[derive(Debug, Default)]
pub struct PropertyWriter {
    buf: BytesMut,
    open: Vec<usize>,
}

impl PropertyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin an object of `type_name` at `version`
    pub fn put_start(&mut self, type_name: &str, version: u32) {
        self.open.push(self.buf.len());
        self.buf.put_u32_le(OBJECT_MAGIC);
        // length is patched by put_end
        self.buf.put_u32_le(0);
        self.put_str(type_name);
        self.buf.put_u32_le(version);
    }

    pub fn put_str(&mut self, value: &str) {
        self.buf.put_u32_le(value.len() as u32);
        self.buf.put_slice(value.as_bytes());
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    /// Close the innermost object, returning its length
    pub fn put_end(&mut self) -> Result<u32> {
        let start = self
            .open
            .pop()
            .ok_or_else(|| ColStepError::Persistence("put_end without put_start".into()))?;
        let len = (self.buf.len() - start) as u32;
        self.buf[start + 4..start + 8].copy_from_slice(&len.to_le_bytes());
        Ok(len)
    }

    /// Finished stream contents
    pub fn into_bytes(self) -> Result<Bytes> {
        if !self.open.is_empty() {
            return Err(ColStepError::Persistence(format!(
                "{} objects left open",
                self.open.len()
            )));
        }
        Ok(self.buf.freeze())
    }
}

/// Reader side of the property stream
#[derive(Debug)]
pub struct PropertyReader {
    data: Bytes,
    total: usize,
    open: Vec<usize>,
}

impl PropertyReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            total: data.len(),
            data,
            open: Vec::new(),
        }
    }

    fn position(&self) -> usize {
        self.total - self.data.remaining()
    }

    fn need(&self, bytes: usize, what: &str) -> Result<()> {
        if self.data.remaining() < bytes {
            return Err(ColStepError::Persistence(format!(
                "stream truncated reading {}",
                what
            )));
        }
        Ok(())
    }

    /// Enter an object, checking it is of `type_name`; returns its version
    pub fn get_start(&mut self, type_name: &str) -> Result<u32> {
        let start = self.position();
        self.need(8, "object header")?;
        let magic = self.data.get_u32_le();
        if magic != OBJECT_MAGIC {
            return Err(ColStepError::Persistence(format!(
                "bad object magic {:#010x}",
                magic
            )));
        }
        let len = self.data.get_u32_le() as usize;
        if len < 8 || self.total - start < len {
            return Err(ColStepError::Persistence(format!(
                "object length {} exceeds stream",
                len
            )));
        }
        let found = self.get_str()?;
        if found != type_name {
            return Err(ColStepError::Persistence(format!(
                "expected object {:?}, found {:?}",
                type_name, found
            )));
        }
        self.need(4, "object version")?;
        let version = self.data.get_u32_le();
        self.open.push(start + len);
        Ok(version)
    }

    pub fn get_str(&mut self) -> Result<String> {
        self.need(4, "string length")?;
        let len = self.data.get_u32_le() as usize;
        self.need(len, "string")?;
        let bytes = self.data.split_to(len);
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ColStepError::Persistence(format!("invalid string: {}", e)))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        self.need(4, "i32")?;
        Ok(self.data.get_i32_le())
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.need(4, "u32")?;
        Ok(self.data.get_u32_le())
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.need(8, "u64")?;
        Ok(self.data.get_u64_le())
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        self.need(1, "bool")?;
        Ok(self.data.get_u8() != 0)
    }

    /// Leave the innermost object; every byte of it must have been consumed
    pub fn get_end(&mut self) -> Result<()> {
        let end = self
            .open
            .pop()
            .ok_or_else(|| ColStepError::Persistence("get_end without get_start".into()))?;
        let position = self.position();
        if position != end {
            return Err(ColStepError::Persistence(format!(
                "object ends at byte {}, reader at {}",
                end, position
            )));
        }
        Ok(())
    }
}

/// The identity fields a manager persists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerDescriptor {
    pub name: String,
    pub type_tag: i32,
}

impl ManagerDescriptor {
    pub fn write(&self, out: &mut PropertyWriter) -> Result<()> {
        out.put_start(&self.name, DESCRIPTOR_VERSION);
        out.put_str(&self.name);
        out.put_i32(self.type_tag);
        out.put_end()?;
        Ok(())
    }

    /// Read a descriptor written by a manager named `expected_name`
    pub fn read(input: &mut PropertyReader, expected_name: &str) -> Result<Self> {
        let version = input.get_start(expected_name)?;
        if version != DESCRIPTOR_VERSION {
            return Err(ColStepError::Persistence(format!(
                "unsupported descriptor version {}",
                version
            )));
        }
        let name = input.get_str()?;
        let type_tag = input.get_i32()?;
        input.get_end()?;
        Ok(Self { name, type_tag })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ManagerDescriptor {
        ManagerDescriptor {
            name: "ColStepStMan".into(),
            type_tag: 7,
        }
    }

    #[test]
    fn test_descriptor_stream() {
        let mut out = PropertyWriter::new();
        descriptor().write(&mut out).unwrap();
        let bytes = out.into_bytes().unwrap();

        let mut input = PropertyReader::new(bytes);
        assert_eq!(
            ManagerDescriptor::read(&mut input, "ColStepStMan").unwrap(),
            descriptor()
        );
    }

    #[test]
    fn test_wrong_version() {
        let mut out = PropertyWriter::new();
        out.put_start("ColStepStMan", 1);
        out.put_str("ColStepStMan");
        out.put_i32(0);
        out.put_end().unwrap();

        let mut input = PropertyReader::new(out.into_bytes().unwrap());
        assert!(matches!(
            ManagerDescriptor::read(&mut input, "ColStepStMan"),
            Err(ColStepError::Persistence(_))
        ));
    }

    #[test]
    fn test_truncated_stream() {
        let mut out = PropertyWriter::new();
        descriptor().write(&mut out).unwrap();
        let bytes = out.into_bytes().unwrap();

        for cut in [0, 3, 9, bytes.len() - 1] {
            let mut input = PropertyReader::new(bytes.slice(..cut));
            assert!(ManagerDescriptor::read(&mut input, "ColStepStMan").is_err());
        }
    }

    #[test]
    fn test_wrong_type_and_trailing_fields() {
        let mut out = PropertyWriter::new();
        descriptor().write(&mut out).unwrap();
        let mut input = PropertyReader::new(out.into_bytes().unwrap());
        assert!(ManagerDescriptor::read(&mut input, "OtherStMan").is_err());

        let mut out = PropertyWriter::new();
        out.put_start("ColStepStMan", DESCRIPTOR_VERSION);
        out.put_str("ColStepStMan");
        out.put_i32(0);
        out.put_u64(99);
        out.put_end().unwrap();
        let mut input = PropertyReader::new(out.into_bytes().unwrap());
        assert!(ManagerDescriptor::read(&mut input, "ColStepStMan").is_err());
    }

    #[test]
    fn test_unbalanced_objects() {
        let mut out = PropertyWriter::new();
        out.put_start("a", 1);
        assert!(out.into_bytes().is_err());
        assert!(PropertyWriter::new().put_end().is_err());
    }
}
