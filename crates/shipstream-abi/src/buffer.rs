//! Little-endian serial reader / writer used by every codec path.

use crate::error::AbiError;

/// Cursor over a serialized byte slice.
#[derive(Debug, Clone)]
pub struct SerialReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SerialReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], AbiError> {
        if self.remaining() < len {
            return Err(AbiError::UnexpectedEof {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], AbiError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, AbiError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, AbiError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, AbiError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, AbiError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_u128(&mut self) -> Result<u128, AbiError> {
        Ok(u128::from_le_bytes(self.read_array()?))
    }

    /// LEB128-encoded unsigned 32-bit integer.
    pub fn read_varuint32(&mut self) -> Result<u32, AbiError> {
        let mut value = 0u32;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 35 {
                return Err(AbiError::invalid("varuint32", "encoding exceeds 5 bytes"));
            }
            value |= ((byte & 0x7f) as u32).wrapping_shl(shift);
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    /// Zig-zag encoded signed 32-bit integer.
    pub fn read_varint32(&mut self) -> Result<i32, AbiError> {
        let v = self.read_varuint32()?;
        Ok(((v >> 1) as i32) ^ -((v & 1) as i32))
    }

    /// Length-prefixed byte string.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], AbiError> {
        let len = self.read_varuint32()? as usize;
        self.read_slice(len)
    }

    /// Length-prefixed UTF-8 string; invalid sequences are replaced.
    pub fn read_string(&mut self) -> Result<String, AbiError> {
        Ok(String::from_utf8_lossy(self.read_bytes()?).into_owned())
    }
}

/// Growable output buffer.
#[derive(Debug, Clone, Default)]
pub struct SerialWriter {
    buf: Vec<u8>,
}

impl SerialWriter {
    pub fn new() -> Self {
        Self::default()
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

    pub fn write_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_slice(&v.to_le_bytes());
    }

    pub fn write_u128(&mut self, v: u128) {
        self.write_slice(&v.to_le_bytes());
    }

    pub fn write_varuint32(&mut self, mut v: u32) {
        loop {
            if v >> 7 == 0 {
                self.write_u8(v as u8);
                return;
            }
            self.write_u8(0x80 | (v & 0x7f) as u8);
            v >>= 7;
        }
    }

    pub fn write_varint32(&mut self, v: i32) {
        self.write_varuint32(((v << 1) ^ (v >> 31)) as u32);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.write_varuint32(data.len() as u32);
        self.write_slice(data);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }
}
