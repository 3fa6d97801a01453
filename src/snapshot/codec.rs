//! Big-endian field codec for snapshot chunk payloads
//!
//! Every component serializes itself as a flat sequence of fixed-width
//! fields. The writer appends, the reader consumes and refuses to read past
//! the end; `finish` rejects unread trailing bytes.

use crate::{Error, Result};

/// Appends fixed-width big-endian fields to a chunk payload
#[derive(Debug, Default, Clone)]
pub struct ChunkWriter {
    data: Vec<u8>,
}

impl ChunkWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one byte
    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    /// Append a boolean as one byte (0 or 1)
    pub fn write_bool(&mut self, value: bool) {
        self.data.push(u8::from(value));
    }

    /// Append a 32-bit big-endian word
    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a 64-bit big-endian word
    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    /// Append raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the writer and return the payload
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Reads fixed-width big-endian fields from a chunk payload
#[derive(Debug, Clone)]
pub struct ChunkReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    /// Create a reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|&end| end <= self.data.len())
            .ok_or(Error::SnapshotTruncated)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a boolean; any nonzero byte is true
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a 32-bit big-endian word
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a 64-bit big-endian word
    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(b);
        Ok(u64::from_be_bytes(word))
    }

    /// Read `count` raw bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.take(count)
    }

    /// Everything not yet consumed
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fail if any bytes remain unread
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::TrailingData);
        }
        Ok(())
    }
}
