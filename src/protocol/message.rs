// src/protocol/message.rs

use crate::error::BinderError;
use crate::protocol::binary::{BinaryReader, BinaryWriter};
use crate::status::Status;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// `type:u32 destination:u64 cookie:u64 len:u32`
pub const HEADER_SIZE: usize = 4 + 8 + 8 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
  Unknown = 0,
  Transaction = 1,
  TransactionReply = 2,
  Acquire = 3,
  Release = 4,
  RequestDeathNotification = 5,
  ClearDeathNotification = 6,
  DeadBinder = 7,
  SetContextMgr = 8,
  SetMonitor = 9,
  Version = 10,
  LogEntry = 11,
  Status = 12,
}

impl MessageType {
  pub fn from_u32(value: u32) -> Self {
    match value {
      1 => MessageType::Transaction,
      2 => MessageType::TransactionReply,
      3 => MessageType::Acquire,
      4 => MessageType::Release,
      5 => MessageType::RequestDeathNotification,
      6 => MessageType::ClearDeathNotification,
      7 => MessageType::DeadBinder,
      8 => MessageType::SetContextMgr,
      9 => MessageType::SetMonitor,
      10 => MessageType::Version,
      11 => MessageType::LogEntry,
      12 => MessageType::Status,
      _ => MessageType::Unknown,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      MessageType::Unknown => "unknown",
      MessageType::Transaction => "transaction",
      MessageType::TransactionReply => "transaction-reply",
      MessageType::Acquire => "acquire",
      MessageType::Release => "release",
      MessageType::RequestDeathNotification => "request-death-notification",
      MessageType::ClearDeathNotification => "clear-death-notification",
      MessageType::DeadBinder => "dead-binder",
      MessageType::SetContextMgr => "set-context-mgr",
      MessageType::SetMonitor => "set-monitor",
      MessageType::Version => "version",
      MessageType::LogEntry => "log-entry",
      MessageType::Status => "status",
    }
  }
}

impl fmt::Display for MessageType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One envelope on the wire. Payload interpretation depends on `msg_type`.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
  msg_type: MessageType,
  destination: u64,
  cookie: u64,
  payload: Bytes,
}

impl Message {
  pub fn new(msg_type: MessageType) -> Self {
    Self {
      msg_type,
      destination: 0,
      cookie: 0,
      payload: Bytes::new(),
    }
  }

  /// A `Status` message answering the message that carried `cookie`.
  pub fn status(cookie: u64, status: Status) -> Self {
    let mut writer = BinaryWriter::new();
    writer.write_i32(status.as_i32());
    Message::new(MessageType::Status)
      .with_cookie(cookie)
      .with_payload(writer.freeze())
  }

  pub fn with_cookie(mut self, cookie: u64) -> Self {
    self.cookie = cookie;
    self
  }

  pub fn with_destination(mut self, destination: u64) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
    self.payload = payload.into();
    self
  }

  #[inline]
  pub fn msg_type(&self) -> MessageType {
    self.msg_type
  }

  #[inline]
  pub fn destination(&self) -> u64 {
    self.destination
  }

  #[inline]
  pub fn cookie(&self) -> u64 {
    self.cookie
  }

  pub fn set_cookie(&mut self, cookie: u64) {
    self.cookie = cookie;
  }

  pub fn set_destination(&mut self, destination: u64) {
    self.destination = destination;
  }

  #[inline]
  pub fn payload(&self) -> &Bytes {
    &self.payload
  }

  pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
    self.payload = payload.into();
  }

  /// Unpadded reader over the payload.
  pub fn reader(&self) -> BinaryReader {
    BinaryReader::new(self.payload.clone())
  }

  /// Interprets the payload of a `Status` message.
  pub fn read_status(&self) -> Result<Status, BinderError> {
    let mut reader = self.reader();
    Ok(Status::from_i32(reader.read_i32()?))
  }

  pub fn packed_size(&self) -> usize {
    HEADER_SIZE + self.payload.len()
  }

  pub fn pack_into(&self, dst: &mut BytesMut) -> Result<(), BinderError> {
    let len = u32::try_from(self.payload.len())
      .map_err(|_| BinderError::InvalidArgument(format!("payload of {} bytes is too large", self.payload.len())))?;
    dst.reserve(self.packed_size());
    dst.put_u32_le(self.msg_type as u32);
    dst.put_u64_le(self.destination);
    dst.put_u64_le(self.cookie);
    dst.put_u32_le(len);
    dst.put_slice(&self.payload);
    Ok(())
  }

  pub fn pack(&self) -> Result<Bytes, BinderError> {
    let mut dst = BytesMut::with_capacity(self.packed_size());
    self.pack_into(&mut dst)?;
    Ok(dst.freeze())
  }

  /// Parses one message starting at `offset`. Returns the message and the
  /// number of bytes it occupied. Truncated input is an `OutOfRange` error.
  pub fn unpack(buf: &Bytes, offset: usize) -> Result<(Message, usize), BinderError> {
    let mut reader = BinaryReader::new(buf.slice(offset.min(buf.len())..));
    let msg_type = MessageType::from_u32(reader.read_u32()?);
    let destination = reader.read_u64()?;
    let cookie = reader.read_u64()?;
    let payload = reader.read_sized_data()?;
    let msg = Message {
      msg_type,
      destination,
      cookie,
      payload,
    };
    Ok((msg, reader.position()))
  }
}

impl fmt::Debug for Message {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Message")
      .field("type", &self.msg_type)
      .field("destination", &self.destination)
      .field("cookie", &self.cookie)
      .field("payload_len", &self.payload.len())
      .finish()
  }
}

impl fmt::Display for Message {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[{}] destination={} cookie={} size={}",
      self.msg_type,
      self.destination,
      self.cookie,
      self.payload.len()
    )
  }
}
