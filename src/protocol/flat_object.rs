// src/protocol/flat_object.rs

//! Object descriptors embedded inside transaction payloads.

use crate::constants::pack_object_type;
use crate::error::BinderError;

pub const TYPE_BINDER: u32 = pack_object_type(b's', b'b');
pub const TYPE_WEAK_BINDER: u32 = pack_object_type(b'w', b'b');
pub const TYPE_HANDLE: u32 = pack_object_type(b's', b'h');
pub const TYPE_WEAK_HANDLE: u32 = pack_object_type(b'w', b'h');
pub const TYPE_FD: u32 = pack_object_type(b'f', b'd');

/// Lowest bits carry the minimum scheduling priority of a binder.
pub const FLAG_PRIORITY_MASK: u32 = 0xff;
pub const FLAG_ACCEPTS_FDS: u32 = 0x100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
  Binder,
  WeakBinder,
  Handle,
  WeakHandle,
  Fd,
  Unknown(u32),
}

impl ObjectKind {
  pub fn from_u32(value: u32) -> Self {
    match value {
      TYPE_BINDER => ObjectKind::Binder,
      TYPE_WEAK_BINDER => ObjectKind::WeakBinder,
      TYPE_HANDLE => ObjectKind::Handle,
      TYPE_WEAK_HANDLE => ObjectKind::WeakHandle,
      TYPE_FD => ObjectKind::Fd,
      other => ObjectKind::Unknown(other),
    }
  }

  pub fn as_u32(self) -> u32 {
    match self {
      ObjectKind::Binder => TYPE_BINDER,
      ObjectKind::WeakBinder => TYPE_WEAK_BINDER,
      ObjectKind::Handle => TYPE_HANDLE,
      ObjectKind::WeakHandle => TYPE_WEAK_HANDLE,
      ObjectKind::Fd => TYPE_FD,
      ObjectKind::Unknown(other) => other,
    }
  }
}

/// In-memory form of a `flat_binder_object`:
/// `type:u32 flags:u32 binder|handle:u64 cookie:u64`, 24 bytes, little-endian.
///
/// For `Binder`/`WeakBinder` the union slot holds the binder value and
/// `cookie` identifies the object at its owner. For `Handle`/`WeakHandle`
/// the slot holds the broker handle and `cookie` is unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatObject {
  pub kind: ObjectKind,
  pub flags: u32,
  pub binder: u64,
  pub cookie: u64,
}

impl FlatObject {
  pub const SIZE: usize = 24;

  pub fn binder(binder: u64, cookie: u64) -> Self {
    Self {
      kind: ObjectKind::Binder,
      flags: 0x7f | FLAG_ACCEPTS_FDS,
      binder,
      cookie,
    }
  }

  pub fn weak_binder(binder: u64, cookie: u64) -> Self {
    Self {
      kind: ObjectKind::WeakBinder,
      ..Self::binder(binder, cookie)
    }
  }

  pub fn handle(handle: u64) -> Self {
    Self {
      kind: ObjectKind::Handle,
      flags: 0x7f | FLAG_ACCEPTS_FDS,
      binder: handle,
      cookie: 0,
    }
  }

  #[inline]
  pub fn handle_value(&self) -> u64 {
    self.binder
  }

  pub fn read_at(data: &[u8], offset: usize) -> Result<Self, BinderError> {
    let raw = slot(data.len(), offset).map(|range| &data[range])?;
    let u32_at = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
    let u64_at = |i: usize| {
      let mut b = [0u8; 8];
      b.copy_from_slice(&raw[i..i + 8]);
      u64::from_le_bytes(b)
    };
    Ok(Self {
      kind: ObjectKind::from_u32(u32_at(0)),
      flags: u32_at(4),
      binder: u64_at(8),
      cookie: u64_at(16),
    })
  }

  pub fn write_at(&self, data: &mut [u8], offset: usize) -> Result<(), BinderError> {
    let range = slot(data.len(), offset)?;
    let raw = &mut data[range];
    raw[0..4].copy_from_slice(&self.kind.as_u32().to_le_bytes());
    raw[4..8].copy_from_slice(&self.flags.to_le_bytes());
    raw[8..16].copy_from_slice(&self.binder.to_le_bytes());
    raw[16..24].copy_from_slice(&self.cookie.to_le_bytes());
    Ok(())
  }

  pub fn to_bytes(&self) -> [u8; Self::SIZE] {
    let mut out = [0u8; Self::SIZE];
    // A fixed-size buffer always has room.
    let _ = self.write_at(&mut out, 0);
    out
  }
}

fn slot(len: usize, offset: usize) -> Result<std::ops::Range<usize>, BinderError> {
  match offset.checked_add(FlatObject::SIZE) {
    Some(end) if end <= len => Ok(offset..end),
    _ => Err(BinderError::OutOfRange {
      wanted: FlatObject::SIZE,
      remaining: len.saturating_sub(offset),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn type_codes_match_packed_chars() {
    assert_eq!(TYPE_BINDER, 0x7362_2a85);
    assert_eq!(TYPE_HANDLE, 0x7368_2a85);
    assert_eq!(ObjectKind::from_u32(TYPE_WEAK_HANDLE), ObjectKind::WeakHandle);
    assert_eq!(ObjectKind::from_u32(1), ObjectKind::Unknown(1));
  }

  #[test]
  fn descriptor_layout_is_24_bytes_le() {
    let obj = FlatObject::binder(0x11, 0x22);
    let raw = obj.to_bytes();
    assert_eq!(&raw[0..4], &TYPE_BINDER.to_le_bytes());
    assert_eq!(&raw[8..16], &0x11u64.to_le_bytes());
    assert_eq!(&raw[16..24], &0x22u64.to_le_bytes());
    assert_eq!(FlatObject::read_at(&raw, 0).unwrap(), obj);
  }

  #[test]
  fn out_of_bounds_offsets_fail() {
    let buf = [0u8; 30];
    assert!(FlatObject::read_at(&buf, 7).is_err());
    assert!(FlatObject::read_at(&buf, usize::MAX).is_err());
    let mut buf = [0u8; 24];
    assert!(FlatObject::handle(3).write_at(&mut buf, 1).is_err());
    assert!(FlatObject::handle(3).write_at(&mut buf, 0).is_ok());
  }
}
