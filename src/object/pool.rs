// src/object/pool.rs

use crate::object::{Object, ObjectAddress};
use crate::status::Status;
use parking_lot::Mutex;
use std::collections::HashMap;

struct Reference {
  count: usize,
  object: Object,
}

/// Anchors local objects that have been handed to other processes.
///
/// An entry lives from `adopt` until its count is released to zero. Count
/// updates and eviction happen under one lock, so no caller ever observes
/// an entry that is present with a zero count after a release.
#[derive(Default)]
pub struct ObjectPool {
  references: Mutex<HashMap<ObjectAddress, Reference>>,
}

impl ObjectPool {
  pub fn new() -> Self {
    Self::default()
  }

  /// Starts tracking `object` with a floating count of zero.
  pub fn adopt(&self, object: Object) -> Result<ObjectAddress, Status> {
    let address = object.address();
    let mut refs = self.references.lock();
    if refs.contains_key(&address) {
      return Err(Status::AlreadyExists);
    }
    refs.insert(address, Reference { count: 0, object });
    tracing::trace!(address = address.0, "Adopted object");
    Ok(address)
  }

  pub fn add_ref(&self, address: ObjectAddress) -> Result<(), Status> {
    let object = {
      let mut refs = self.references.lock();
      let entry = refs.get_mut(&address).ok_or(Status::BadValue)?;
      entry.count += 1;
      entry.object.clone()
    };
    object.on_reference_acquired();
    Ok(())
  }

  pub fn release(&self, address: ObjectAddress) -> Result<(), Status> {
    let object = {
      let mut refs = self.references.lock();
      let entry = refs.get_mut(&address).ok_or(Status::BadValue)?;
      entry.count = entry.count.saturating_sub(1);
      if entry.count == 0 {
        refs.remove(&address).map(|r| r.object).ok_or(Status::BadValue)?
      } else {
        entry.object.clone()
      }
    };
    object.on_reference_released();
    Ok(())
  }

  pub fn get(&self, address: ObjectAddress) -> Option<Object> {
    self.references.lock().get(&address).map(|r| r.object.clone())
  }

  pub fn contains(&self, address: ObjectAddress) -> bool {
    self.references.lock().contains_key(&address)
  }

  pub fn reference_count(&self, address: ObjectAddress) -> Option<usize> {
    self.references.lock().get(&address).map(|r| r.count)
  }

  pub fn len(&self) -> usize {
    self.references.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
