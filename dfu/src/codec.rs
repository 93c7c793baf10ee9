//! Bounds-checked sequential reader/writer over a byte buffer.
//!
//! Every multi-byte field of the container formats goes through these
//! types; a read or write past the declared length fails with
//! [DfuError::OutOfRange] instead of truncating.

use crate::error::DfuError;

pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn has(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    /// Unread portion of the buffer. The cursor is not advanced.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn skip(&mut self, count: usize) -> Result<(), DfuError> {
        self.take(count).map(|_| ())
    }

    /// Returns a bounded reader over the next `n` bytes and advances
    /// the cursor past them.
    pub fn sub_reader(&mut self, n: usize) -> Result<Reader<'a>, DfuError> {
        self.take(n).map(Reader::new)
    }

    pub fn read_u8(&mut self) -> Result<u8, DfuError> {
        self.take(1).map(|b| b[0])
    }

    /// Reads `count` bytes as an ASCII string, NUL bytes and all.
    pub fn read_string(&mut self, count: usize) -> Result<String, DfuError> {
        let bytes = self.take(count)?;
        Ok(bytes.iter().map(|&b| b as char).collect())
    }

    pub fn read_u16_le(&mut self) -> Result<u16, DfuError> {
        let b = self.take(2)?;
        Ok(b[0] as u16 | (b[1] as u16) << 8)
    }

    pub fn read_u24_le(&mut self) -> Result<u32, DfuError> {
        let b = self.take(3)?;
        Ok(b[0] as u32 | (b[1] as u32) << 8 | (b[2] as u32) << 16)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DfuError> {
        let b = self.take(4)?;
        Ok(b[0] as u32
            | (b[1] as u32) << 8
            | (b[2] as u32) << 16
            | (b[3] as u32) << 24)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, DfuError> {
        let b = self.take(2)?;
        Ok(b[1] as u16 | (b[0] as u16) << 8)
    }

    pub fn read_u24_be(&mut self) -> Result<u32, DfuError> {
        let b = self.take(3)?;
        Ok(b[2] as u32 | (b[1] as u32) << 8 | (b[0] as u32) << 16)
    }

    pub fn read_u32_be(&mut self) -> Result<u32, DfuError> {
        let b = self.take(4)?;
        Ok(b[3] as u32
            | (b[2] as u32) << 8
            | (b[1] as u32) << 16
            | (b[0] as u32) << 24)
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], DfuError> {
        if !self.has(count) {
            return Err(DfuError::OutOfRange);
        }
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }
}

/// Little-endian only: the DFU container formats have no big-endian
/// fields on the write path.
pub struct Writer<'a> {
    data: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Writer { data, pos: 0 }
    }

    pub fn has(&self, count: usize) -> bool {
        self.data.len() - self.pos >= count
    }

    pub fn skip(&mut self, count: usize) -> Result<(), DfuError> {
        if !self.has(count) {
            return Err(DfuError::OutOfRange);
        }
        self.pos += count;
        Ok(())
    }

    /// Returns a bounded writer over the next `n` bytes and advances
    /// the cursor past them.
    pub fn sub_writer(&mut self, n: usize) -> Result<Writer<'_>, DfuError> {
        if !self.has(n) {
            return Err(DfuError::OutOfRange);
        }
        let start = self.pos;
        self.pos += n;
        Ok(Writer::new(&mut self.data[start..start + n]))
    }

    pub fn write_u8(&mut self, x: u8) -> Result<(), DfuError> {
        if !self.has(1) {
            return Err(DfuError::OutOfRange);
        }
        self.data[self.pos] = x;
        self.pos += 1;
        Ok(())
    }

    pub fn write_u16_le(&mut self, x: u16) -> Result<(), DfuError> {
        self.write_u8(x as u8)?;
        self.write_u8((x >> 8) as u8)
    }

    pub fn write_u32_le(&mut self, x: u32) -> Result<(), DfuError> {
        for i in 0..4 {
            self.write_u8((x >> (i * 8)) as u8)?;
        }
        Ok(())
    }
}
