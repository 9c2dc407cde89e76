// src/protocol/transaction.rs

use crate::error::BinderError;
use crate::protocol::binary::{BinaryReader, BinaryWriter};
use crate::protocol::flat_object::FlatObject;
use crate::protocol::message::{Message, MessageType};
use crate::status::Status;
use bitflags::bitflags;
use bytes::{Bytes, BytesMut};

bitflags! {
  /// Flags carried in the transaction header.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct TransactionFlags: u32 {
    /// The caller does not wait for a reply.
    const ONE_WAY = 0x01;
    const ROOT_OBJECT = 0x04;
    /// The payload is a single `i32` status code.
    const HAS_STATUS = 0x08;
    const ACCEPT_FDS = 0x10;
  }
}

/// Payload of a `Transaction` or `TransactionReply`.
///
/// Canonical (unpadded) encoding:
/// `binder:u64 cookie:u64 code:u32 flags:u32 sized(data) sized(offsets)`,
/// where the offsets blob is a run of `u64` byte offsets into `data`, each
/// marking an embedded [`FlatObject`].
///
/// The same value type covers a freshly built request, one decoded from a
/// received message, and a status-only reply (see [`TransactionData::from_status`]).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionData {
  binder: u64,
  cookie: u64,
  code: u32,
  flags: TransactionFlags,
  data: BytesMut,
  object_offsets: Vec<u64>,
}

impl TransactionData {
  pub fn new(code: u32) -> Self {
    Self {
      code,
      ..Default::default()
    }
  }

  /// A reply that carries nothing but `status`.
  pub fn from_status(status: Status) -> Self {
    let mut writer = BinaryWriter::new();
    writer.write_i32(status.as_i32());
    Self {
      flags: TransactionFlags::HAS_STATUS,
      data: writer.finish(),
      ..Default::default()
    }
  }

  /// Decodes the payload of a transaction-bearing message.
  pub fn from_message(msg: &Message) -> Result<Self, BinderError> {
    match msg.msg_type() {
      MessageType::Transaction | MessageType::TransactionReply => Self::unpack(msg.payload().clone()),
      other => Err(BinderError::MalformedMessage(format!(
        "{} message does not carry transaction data",
        other
      ))),
    }
  }

  pub fn unpack(payload: Bytes) -> Result<Self, BinderError> {
    let mut reader = BinaryReader::new(payload);
    let binder = reader.read_u64()?;
    let cookie = reader.read_u64()?;
    let code = reader.read_u32()?;
    let flags = TransactionFlags::from_bits_retain(reader.read_u32()?);
    let data = BytesMut::from(&reader.read_sized_data()?[..]);
    let raw_offsets = reader.read_sized_data()?;
    if raw_offsets.len() % 8 != 0 {
      return Err(BinderError::MalformedMessage(format!(
        "object offsets blob of {} bytes is not a multiple of 8",
        raw_offsets.len()
      )));
    }
    let mut offsets_reader = BinaryReader::new(raw_offsets);
    let mut object_offsets = Vec::with_capacity(offsets_reader.remaining() / 8);
    while !offsets_reader.is_empty() {
      object_offsets.push(offsets_reader.read_u64()?);
    }
    Ok(Self {
      binder,
      cookie,
      code,
      flags,
      data,
      object_offsets,
    })
  }

  pub fn pack(&self) -> Result<Bytes, BinderError> {
    let mut writer = BinaryWriter::new();
    writer.write_u64(self.binder);
    writer.write_u64(self.cookie);
    writer.write_u32(self.code);
    // Fds are never passed but peers expect the capability bit.
    writer.write_u32((self.flags | TransactionFlags::ACCEPT_FDS).bits());
    writer.write_sized_data(&self.data)?;
    let mut offsets = BinaryWriter::new();
    for offset in &self.object_offsets {
      offsets.write_u64(*offset);
    }
    writer.write_sized_data(&offsets.finish())?;
    Ok(writer.freeze())
  }

  #[inline]
  pub fn binder(&self) -> u64 {
    self.binder
  }

  pub fn set_binder(&mut self, binder: u64) {
    self.binder = binder;
  }

  #[inline]
  pub fn cookie(&self) -> u64 {
    self.cookie
  }

  pub fn set_cookie(&mut self, cookie: u64) {
    self.cookie = cookie;
  }

  #[inline]
  pub fn code(&self) -> u32 {
    self.code
  }

  pub fn set_code(&mut self, code: u32) {
    self.code = code;
  }

  #[inline]
  pub fn flags(&self) -> TransactionFlags {
    self.flags
  }

  pub fn set_flags(&mut self, flags: TransactionFlags) {
    self.flags = flags;
  }

  pub fn is_one_way(&self) -> bool {
    self.flags.contains(TransactionFlags::ONE_WAY)
  }

  pub fn set_one_way(&mut self, one_way: bool) {
    self.flags.set(TransactionFlags::ONE_WAY, one_way);
  }

  pub fn has_status(&self) -> bool {
    self.flags.contains(TransactionFlags::HAS_STATUS)
  }

  /// The carried status, if this is a status-only payload.
  pub fn status(&self) -> Option<Status> {
    if !self.has_status() {
      return None;
    }
    let mut reader = BinaryReader::new(Bytes::copy_from_slice(&self.data));
    Some(reader.read_i32().map(Status::from_i32).unwrap_or(Status::NotEnoughData))
  }

  #[inline]
  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn data_mut(&mut self) -> &mut BytesMut {
    &mut self.data
  }

  pub fn set_data(&mut self, data: impl Into<BytesMut>) {
    self.data = data.into();
  }

  #[inline]
  pub fn object_offsets(&self) -> &[u64] {
    &self.object_offsets
  }

  pub fn set_object_offsets(&mut self, offsets: Vec<u64>) {
    self.object_offsets = offsets;
  }

  /// Reads the descriptor at a byte offset into `data`.
  pub fn object_at(&self, offset: u64) -> Result<FlatObject, BinderError> {
    FlatObject::read_at(&self.data, to_index(offset)?)
  }

  pub fn set_object_at(&mut self, offset: u64, obj: &FlatObject) -> Result<(), BinderError> {
    FlatObject::write_at(obj, &mut self.data, to_index(offset)?)
  }

  /// All embedded descriptors paired with their offsets, in offset-table order.
  pub fn objects(&self) -> Result<Vec<(u64, FlatObject)>, BinderError> {
    self
      .object_offsets
      .iter()
      .map(|offset| self.object_at(*offset).map(|obj| (*offset, obj)))
      .collect()
  }
}

fn to_index(offset: u64) -> Result<usize, BinderError> {
  usize::try_from(offset).map_err(|_| BinderError::OutOfRange {
    wanted: FlatObject::SIZE,
    remaining: 0,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn with_object() -> TransactionData {
    let mut td = TransactionData::new(42);
    td.set_binder(5);
    td.set_cookie(6);
    let mut data = BytesMut::from(&[0xde, 0xad, 0xbe, 0xef][..]);
    data.extend_from_slice(&FlatObject::binder(0, 0x1000).to_bytes());
    td.set_data(data);
    td.set_object_offsets(vec![4]);
    td
  }

  #[test]
  fn canonical_layout() {
    let td = with_object();
    let packed = td.pack().unwrap();
    assert_eq!(&packed[0..8], &5u64.to_le_bytes());
    assert_eq!(&packed[8..16], &6u64.to_le_bytes());
    assert_eq!(&packed[16..20], &42u32.to_le_bytes());
    assert_eq!(&packed[20..24], &TransactionFlags::ACCEPT_FDS.bits().to_le_bytes());
    assert_eq!(&packed[24..28], &28u32.to_le_bytes());
    let offsets_at = 28 + 28;
    assert_eq!(&packed[offsets_at..offsets_at + 4], &8u32.to_le_bytes());
    assert_eq!(&packed[offsets_at + 4..], &4u64.to_le_bytes());
  }

  #[test]
  fn unpack_recovers_fields_and_objects() {
    let td = with_object();
    let decoded = TransactionData::unpack(td.pack().unwrap()).unwrap();
    assert_eq!(decoded.code(), 42);
    assert_eq!(decoded.binder(), 5);
    assert_eq!(decoded.cookie(), 6);
    assert!(decoded.flags().contains(TransactionFlags::ACCEPT_FDS));
    assert_eq!(decoded.data(), td.data());
    assert_eq!(decoded.objects().unwrap(), vec![(4, FlatObject::binder(0, 0x1000))]);
  }

  #[test]
  fn status_only_payload() {
    let td = TransactionData::from_status(Status::DeadObject);
    let decoded = TransactionData::unpack(td.pack().unwrap()).unwrap();
    assert!(decoded.has_status());
    assert_eq!(decoded.status(), Some(Status::DeadObject));
    assert_eq!(TransactionData::new(1).status(), None);
  }

  #[test]
  fn rejects_wrong_message_type_and_short_payloads() {
    let msg = Message::status(1, Status::Ok);
    assert!(TransactionData::from_message(&msg).is_err());
    let msg = Message::new(MessageType::Transaction);
    assert!(matches!(
      TransactionData::from_message(&msg),
      Err(BinderError::OutOfRange { .. })
    ));
  }

  #[test]
  fn offset_past_data_is_rejected() {
    let mut td = with_object();
    td.set_object_offsets(vec![100]);
    assert!(td.objects().is_err());
  }
}
