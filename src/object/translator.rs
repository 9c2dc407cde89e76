// src/object/translator.rs

use crate::object::{ObjectAddress, ObjectId};
use crate::protocol::{FlatObject, ObjectKind, TransactionData};
use crate::status::Status;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  /// Received from the broker: ids become addresses.
  In,
  /// About to be sent: addresses become ids.
  Out,
}

struct Tables {
  next_id: u64,
  by_id: HashMap<ObjectId, ObjectAddress>,
  by_address: HashMap<ObjectAddress, ObjectId>,
}

/// Keeps local object addresses off the wire.
///
/// Every address leaving the process is replaced by an opaque id from a
/// per-connection table, and ids coming back are mapped to the address they
/// stand for. An id the table never issued is rejected.
pub struct ObjectTranslator {
  tables: Mutex<Tables>,
}

impl Default for ObjectTranslator {
  fn default() -> Self {
    Self {
      tables: Mutex::new(Tables {
        next_id: 1,
        by_id: HashMap::new(),
        by_address: HashMap::new(),
      }),
    }
  }
}

impl ObjectTranslator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Id for `address`, assigning a fresh one on first sight.
  pub fn translate_or_add(&self, address: ObjectAddress) -> ObjectId {
    let mut tables = self.tables.lock();
    Self::translate_or_add_locked(&mut tables, address)
  }

  fn translate_or_add_locked(tables: &mut Tables, address: ObjectAddress) -> ObjectId {
    if let Some(id) = tables.by_address.get(&address) {
      return *id;
    }
    let id = ObjectId(tables.next_id);
    tables.next_id += 1;
    tables.by_address.insert(address, id);
    tables.by_id.insert(id, address);
    id
  }

  pub fn translate(&self, address: ObjectAddress) -> Option<ObjectId> {
    self.tables.lock().by_address.get(&address).copied()
  }

  pub fn translate_cookie(&self, id: ObjectId) -> Option<ObjectAddress> {
    self.tables.lock().by_id.get(&id).copied()
  }

  /// Rewrites every binder descriptor embedded in `data`.
  ///
  /// Either all descriptors are rewritten or none are: an unknown id on the
  /// way in fails with `BadValue`, an unknown descriptor kind with
  /// `InvalidOperation`, and `data` is left untouched in both cases.
  pub fn process_transaction(&self, data: &mut TransactionData, direction: Direction) -> Result<(), Status> {
    if data.object_offsets().is_empty() {
      return Ok(());
    }
    let objects = data.objects().map_err(|e| {
      tracing::warn!(error = %e, "Transaction carries an invalid object offset");
      Status::BadValue
    })?;

    let mut tables = self.tables.lock();
    let mut rewrites: Vec<(u64, FlatObject)> = Vec::with_capacity(objects.len());
    for (offset, obj) in &objects {
      match obj.kind {
        ObjectKind::Binder | ObjectKind::WeakBinder => {
          if direction == Direction::In && !tables.by_id.contains_key(&ObjectId(obj.cookie)) {
            tracing::warn!(id = obj.cookie, "Transaction references an object id we never issued");
            return Err(Status::BadValue);
          }
          rewrites.push((*offset, *obj));
        }
        ObjectKind::Handle => {}
        ObjectKind::WeakHandle | ObjectKind::Fd => {
          tracing::warn!(kind = ?obj.kind, "Passing through an object kind without translation support");
        }
        ObjectKind::Unknown(kind) => {
          tracing::warn!(kind = kind, "Invalid object type in transaction");
          return Err(Status::InvalidOperation);
        }
      }
    }

    for (offset, mut obj) in rewrites {
      obj.cookie = match direction {
        Direction::In => tables.by_id.get(&ObjectId(obj.cookie)).map(|a| a.0).ok_or(Status::BadValue)?,
        Direction::Out => Self::translate_or_add_locked(&mut tables, ObjectAddress(obj.cookie)).0,
      };
      data.set_object_at(offset, &obj).map_err(|_| Status::BadValue)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::BytesMut;

  fn payload(objects: &[FlatObject]) -> TransactionData {
    let mut td = TransactionData::new(1);
    let mut data = BytesMut::new();
    let mut offsets = Vec::new();
    for obj in objects {
      offsets.push(data.len() as u64);
      data.extend_from_slice(&obj.to_bytes());
    }
    td.set_data(data);
    td.set_object_offsets(offsets);
    td
  }

  #[test]
  fn ids_are_stable_and_reversible() {
    let t = ObjectTranslator::new();
    let a = ObjectAddress(0xdead_b000);
    let id = t.translate_or_add(a);
    assert_eq!(id, ObjectId(1));
    assert_eq!(t.translate_or_add(a), id);
    assert_eq!(t.translate_cookie(id), Some(a));
    assert_eq!(t.translate(a), Some(id));

    let b = ObjectAddress(0xdead_c000);
    assert_eq!(t.translate(b), None);
    assert_eq!(t.translate_or_add(b), ObjectId(2));
    assert_eq!(t.translate_cookie(ObjectId(99)), None);
    assert_eq!(t.translate_cookie(ObjectId::INVALID), None);
  }

  #[test]
  fn out_then_in_restores_addresses() {
    let t = ObjectTranslator::new();
    let mut td = payload(&[FlatObject::binder(0, 0x7000), FlatObject::handle(9)]);
    t.process_transaction(&mut td, Direction::Out).unwrap();
    let objs = td.objects().unwrap();
    assert_eq!(objs[0].1.cookie, 1);
    assert_eq!(objs[1].1, FlatObject::handle(9));

    t.process_transaction(&mut td, Direction::In).unwrap();
    assert_eq!(td.objects().unwrap()[0].1.cookie, 0x7000);
  }

  #[test]
  fn unknown_id_fails_closed() {
    let t = ObjectTranslator::new();
    t.translate_or_add(ObjectAddress(0x1000));
    // First descriptor is resolvable, second is not.
    let mut td = payload(&[FlatObject::binder(0, 1), FlatObject::binder(0, 77)]);
    let before = td.clone();
    assert_eq!(t.process_transaction(&mut td, Direction::In), Err(Status::BadValue));
    assert_eq!(td, before);
  }

  #[test]
  fn unknown_kind_fails_before_assigning_ids() {
    let t = ObjectTranslator::new();
    let mut bogus = FlatObject::handle(0);
    bogus.kind = ObjectKind::Unknown(0x1234);
    let mut td = payload(&[FlatObject::binder(0, 0x5000), bogus]);
    assert_eq!(t.process_transaction(&mut td, Direction::Out), Err(Status::InvalidOperation));
    assert_eq!(t.translate(ObjectAddress(0x5000)), None);
  }

  #[test]
  fn weak_handles_and_fds_pass_through() {
    let t = ObjectTranslator::new();
    let mut weak = FlatObject::handle(4);
    weak.kind = ObjectKind::WeakHandle;
    let mut td = payload(&[weak]);
    let before = td.clone();
    t.process_transaction(&mut td, Direction::In).unwrap();
    assert_eq!(td, before);
  }
}
