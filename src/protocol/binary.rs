// src/protocol/binary.rs

//! Cursor-based little-endian readers and writers.
//!
//! Both sides run in one of two modes. Padded mode rounds every blob and
//! string up to a 4-byte boundary (zero-filled), matching the C struct layout
//! parcels use. Unpadded mode packs fields tightly and is what the envelope
//! and `TransactionData` use. Fixed-width integers are never padded.

use crate::error::BinderError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

#[inline]
pub(crate) fn pad_size(size: usize) -> usize {
  (size + 3) & !3
}

/// Sequential reader over an immutable byte buffer.
#[derive(Debug, Clone)]
pub struct BinaryReader {
  buf: Bytes,
  pos: usize,
  padding: bool,
}

impl BinaryReader {
  /// Unpadded reader.
  pub fn new(buf: Bytes) -> Self {
    Self { buf, pos: 0, padding: false }
  }

  pub fn with_padding(buf: Bytes) -> Self {
    Self { buf, pos: 0, padding: true }
  }

  pub fn set_padding(&mut self, enable: bool) {
    self.padding = enable;
  }

  pub fn position(&self) -> usize {
    self.pos
  }

  pub fn remaining(&self) -> usize {
    self.buf.len() - self.pos
  }

  pub fn is_empty(&self) -> bool {
    self.remaining() == 0
  }

  fn ensure(&self, wanted: usize) -> Result<(), BinderError> {
    let remaining = self.remaining();
    if wanted > remaining {
      return Err(BinderError::OutOfRange { wanted, remaining });
    }
    Ok(())
  }

  fn take(&mut self, size: usize) -> Result<&[u8], BinderError> {
    self.ensure(size)?;
    let start = self.pos;
    self.pos += size;
    Ok(&self.buf[start..start + size])
  }

  pub fn read_u16(&mut self) -> Result<u16, BinderError> {
    Ok(self.take(2)?.get_u16_le())
  }

  pub fn read_i16(&mut self) -> Result<i16, BinderError> {
    Ok(self.take(2)?.get_i16_le())
  }

  pub fn read_u32(&mut self) -> Result<u32, BinderError> {
    Ok(self.take(4)?.get_u32_le())
  }

  pub fn read_i32(&mut self) -> Result<i32, BinderError> {
    Ok(self.take(4)?.get_i32_le())
  }

  pub fn read_u64(&mut self) -> Result<u64, BinderError> {
    Ok(self.take(8)?.get_u64_le())
  }

  pub fn read_i64(&mut self) -> Result<i64, BinderError> {
    Ok(self.take(8)?.get_i64_le())
  }

  /// Reads `size` raw bytes, skipping any trailing pad in padded mode.
  /// The returned `Bytes` shares the reader's backing storage.
  pub fn read_data(&mut self, size: usize) -> Result<Bytes, BinderError> {
    if size == 0 {
      return Ok(Bytes::new());
    }
    let advance = if self.padding { pad_size(size) } else { size };
    self.ensure(advance)?;
    let data = self.buf.slice(self.pos..self.pos + size);
    self.pos += advance;
    Ok(data)
  }

  /// Reads a `u32` length followed by that many bytes.
  pub fn read_sized_data(&mut self) -> Result<Bytes, BinderError> {
    let size = self.read_u32()? as usize;
    self.read_data(size)
  }

  /// Reads a UTF-16 string: `i32` char count, then `count + 1` code units
  /// including a terminating NUL. A negative count denotes a null string.
  pub fn read_string16(&mut self) -> Result<String, BinderError> {
    let len = self.read_i32()?;
    if len < 0 {
      return Ok(String::new());
    }
    let units = len as usize;
    let raw = self.read_data((units + 1) * 2)?;
    let code_units: Vec<u16> = raw.chunks_exact(2).take(units).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    String::from_utf16(&code_units).map_err(|e| BinderError::MalformedMessage(format!("invalid UTF-16 string: {}", e)))
  }
}

/// Sequential writer appending to a growable buffer.
#[derive(Debug, Default)]
pub struct BinaryWriter {
  buf: BytesMut,
  padding: bool,
}

impl BinaryWriter {
  /// Unpadded writer.
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_padding() -> Self {
    Self { buf: BytesMut::new(), padding: true }
  }

  /// Continues writing after existing contents.
  pub fn from_buf(buf: BytesMut, padding: bool) -> Self {
    Self { buf, padding }
  }

  pub fn set_padding(&mut self, enable: bool) {
    self.padding = enable;
  }

  pub fn bytes_written(&self) -> usize {
    self.buf.len()
  }

  pub fn write_u16(&mut self, value: u16) {
    self.buf.put_u16_le(value);
  }

  pub fn write_i16(&mut self, value: i16) {
    self.buf.put_i16_le(value);
  }

  pub fn write_u32(&mut self, value: u32) {
    self.buf.put_u32_le(value);
  }

  pub fn write_i32(&mut self, value: i32) {
    self.buf.put_i32_le(value);
  }

  pub fn write_u64(&mut self, value: u64) {
    self.buf.put_u64_le(value);
  }

  pub fn write_i64(&mut self, value: i64) {
    self.buf.put_i64_le(value);
  }

  pub fn write_data(&mut self, data: &[u8]) {
    let padded = if self.padding { pad_size(data.len()) } else { data.len() };
    self.buf.reserve(padded);
    self.buf.put_slice(data);
    self.buf.put_bytes(0, padded - data.len());
  }

  /// Writes a `u32` length followed by the bytes.
  pub fn write_sized_data(&mut self, data: &[u8]) -> Result<(), BinderError> {
    let len = u32::try_from(data.len())
      .map_err(|_| BinderError::InvalidArgument(format!("blob of {} bytes is too large", data.len())))?;
    self.write_u32(len);
    self.write_data(data);
    Ok(())
  }

  /// Writes `value` as UTF-16 with its char count and a terminating NUL.
  pub fn write_string16(&mut self, value: &str) -> Result<(), BinderError> {
    let mut units: Vec<u16> = value.encode_utf16().collect();
    let len = i32::try_from(units.len())
      .map_err(|_| BinderError::InvalidArgument(format!("string of {} code units is too long", units.len())))?;
    units.push(0);
    self.write_i32(len);
    let mut raw = Vec::with_capacity(units.len() * 2);
    for unit in units {
      raw.extend_from_slice(&unit.to_le_bytes());
    }
    self.write_data(&raw);
    Ok(())
  }

  pub fn finish(self) -> BytesMut {
    self.buf
  }

  pub fn freeze(self) -> Bytes {
    self.buf.freeze()
  }
}
