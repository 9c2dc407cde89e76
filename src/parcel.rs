// src/parcel.rs

//! Typed payloads carried inside [`TransactionData`].
//!
//! Parcels use the padded binary layout: every field is aligned to four
//! bytes. Objects are embedded as flat descriptors and their offsets are
//! recorded so the translator and the broker can find them.

use crate::client::Client;
use crate::constants::STRICT_MODE_PENALTY_GATHER;
use crate::error::BinderError;
use crate::object::{Object, ObjectAddress, RemoteObject};
use crate::protocol::{BinaryReader, BinaryWriter, FlatObject, ObjectKind, TransactionData};
use bytes::Bytes;

pub struct ParcelWriter {
  code: u32,
  one_way: bool,
  data: BinaryWriter,
  object_offsets: Vec<u64>,
}

impl Default for ParcelWriter {
  fn default() -> Self {
    Self {
      code: 0,
      one_way: false,
      data: BinaryWriter::with_padding(),
      object_offsets: Vec::new(),
    }
  }
}

impl ParcelWriter {
  pub fn new(code: u32) -> Self {
    Self {
      code,
      ..Default::default()
    }
  }

  pub fn set_code(&mut self, code: u32) {
    self.code = code;
  }

  pub fn set_one_way(&mut self, one_way: bool) {
    self.one_way = one_way;
  }

  pub fn write_i32(&mut self, value: i32) {
    self.data.write_i32(value);
  }

  pub fn write_u64(&mut self, value: u64) {
    self.data.write_u64(value);
  }

  pub fn write_string16(&mut self, value: &str) -> Result<(), BinderError> {
    self.data.write_string16(value)
  }

  /// Writes the header a receiver checks with [`ParcelReader::enforce_interface`].
  pub fn write_interface_token(&mut self, name: &str, strict_mode_policy: i32) -> Result<(), BinderError> {
    self.data.write_i32(STRICT_MODE_PENALTY_GATHER | strict_mode_policy);
    self.data.write_string16(name)
  }

  /// Embeds `object`.
  ///
  /// A local object is adopted into the client's pool (with a floating count)
  /// so incoming transactions can find it; a remote object is written as its
  /// broker handle.
  pub fn write_object(&mut self, client: &Client, object: &Object) {
    let flat = match object {
      Object::Local(_) => {
        let address = object.address();
        let pool = client.object_pool();
        if !pool.contains(address) {
          // Another writer may have adopted it in between; either way it is tracked.
          let _ = pool.adopt(object.clone());
        }
        FlatObject::binder(0, address.0)
      }
      Object::Remote(remote) => FlatObject::handle(remote.handle()),
    };
    self.object_offsets.push(self.data.bytes_written() as u64);
    self.data.write_data(&flat.to_bytes());
  }

  pub fn finish(self) -> TransactionData {
    let mut data = TransactionData::new(self.code);
    data.set_one_way(self.one_way);
    data.set_data(self.data.finish());
    data.set_object_offsets(self.object_offsets);
    data
  }
}

/// Reads fields back in the order a [`ParcelWriter`] wrote them.
pub struct ParcelReader {
  reader: BinaryReader,
}

impl ParcelReader {
  pub fn new(data: &TransactionData) -> Self {
    Self {
      reader: BinaryReader::with_padding(Bytes::copy_from_slice(data.data())),
    }
  }

  /// Consumes the interface token and checks it names `name`.
  /// The strict mode policy is read but not acted on.
  pub fn enforce_interface(&mut self, name: &str) -> Result<bool, BinderError> {
    let policy = self.reader.read_i32()?;
    let provided = self.reader.read_string16()?;
    tracing::trace!(policy = policy, interface = %provided, "Checking interface token");
    Ok(provided == name)
  }

  pub fn read_i32(&mut self) -> Result<i32, BinderError> {
    self.reader.read_i32()
  }

  pub fn read_u64(&mut self) -> Result<u64, BinderError> {
    self.reader.read_u64()
  }

  pub fn read_string16(&mut self) -> Result<String, BinderError> {
    self.reader.read_string16()
  }

  /// Reads an embedded object.
  ///
  /// A handle yields a new proxy (acquiring a broker reference); a binder
  /// yields the local object it names, if the pool still holds it.
  pub async fn read_object(&mut self, client: &Client) -> Result<Option<Object>, BinderError> {
    let raw = self.reader.read_data(FlatObject::SIZE)?;
    let flat = FlatObject::read_at(&raw, 0)?;
    let object = match flat.kind {
      ObjectKind::Handle => Some(Object::Remote(RemoteObject::new(client, flat.handle_value()).await)),
      ObjectKind::Binder | ObjectKind::WeakBinder => client.object_pool().get(ObjectAddress(flat.cookie)),
      other => {
        tracing::warn!(kind = ?other, "Cannot read object of this kind");
        None
      }
    };
    Ok(object)
  }

  pub fn remaining(&self) -> usize {
    self.reader.remaining()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interface_token_and_fields_round_trip() {
    let mut writer = ParcelWriter::new(7);
    writer.write_interface_token("android.os.IServiceManager", 0).unwrap();
    writer.write_string16("media").unwrap();
    writer.write_i32(-3);
    writer.write_u64(0xdead_beef);
    let data = writer.finish();
    assert_eq!(data.code(), 7);
    assert!(data.object_offsets().is_empty());
    assert_eq!(data.data().len() % 4, 0);

    let mut reader = ParcelReader::new(&data);
    assert!(reader.enforce_interface("android.os.IServiceManager").unwrap());
    assert_eq!(reader.read_string16().unwrap(), "media");
    assert_eq!(reader.read_i32().unwrap(), -3);
    assert_eq!(reader.read_u64().unwrap(), 0xdead_beef);
    assert_eq!(reader.remaining(), 0);
  }

  #[test]
  fn wrong_interface_is_reported() {
    let mut writer = ParcelWriter::default();
    writer.write_interface_token("a.b.IFoo", 0).unwrap();
    let data = writer.finish();
    assert!(!ParcelReader::new(&data).enforce_interface("a.b.IBar").unwrap());
  }

  #[test]
  fn truncated_parcel_fails() {
    let mut writer = ParcelWriter::default();
    writer.write_i32(1);
    let data = writer.finish();
    let mut reader = ParcelReader::new(&data);
    reader.read_i32().unwrap();
    assert!(matches!(reader.read_string16(), Err(BinderError::OutOfRange { .. })));
  }

  #[test]
  fn one_way_flag_is_carried() {
    let mut writer = ParcelWriter::new(1);
    writer.set_one_way(true);
    writer.set_code(9);
    let data = writer.finish();
    assert!(data.is_one_way());
    assert_eq!(data.code(), 9);
  }
}
