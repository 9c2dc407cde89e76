// src/object/mod.rs

//! Process-local objects and proxies for objects living in other processes.

pub mod local;
pub mod pool;
pub mod remote;
pub mod translator;

pub use local::{LocalObject, TransactionHandler};
pub use pool::ObjectPool;
pub use remote::{ReleaseReference, RemoteObject};
pub use translator::{Direction, ObjectTranslator};

use crate::client::Client;
use crate::protocol::TransactionData;
use crate::status::Status;
use std::fmt;
use std::sync::Arc;

/// Process-local identity of an object. Used only as a lookup key and
/// never sent to a peer; the translator swaps it for an [`ObjectId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectAddress(pub u64);

impl ObjectAddress {
  pub(crate) fn of<T>(arc: &Arc<T>) -> Self {
    ObjectAddress(Arc::as_ptr(arc) as usize as u64)
  }
}

/// Opaque per-connection id standing in for an [`ObjectAddress`] on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl ObjectId {
  pub const INVALID: ObjectId = ObjectId(0);

  pub fn is_valid(self) -> bool {
    self != Self::INVALID
  }
}

/// Notified once when the process owning a remote object goes away.
pub trait DeathRecipient: Send + Sync {
  fn on_object_died(&self, who: &Object);
}

/// Something a transaction can be addressed to.
#[derive(Clone)]
pub enum Object {
  /// Implemented in this process.
  Local(Arc<LocalObject>),
  /// Proxy for an object owned by another connection.
  Remote(Arc<RemoteObject>),
}

impl Object {
  pub fn local(handler: impl TransactionHandler + 'static) -> Self {
    Object::Local(LocalObject::new(handler))
  }

  pub fn address(&self) -> ObjectAddress {
    match self {
      Object::Local(local) => ObjectAddress::of(local),
      Object::Remote(remote) => ObjectAddress::of(remote),
    }
  }

  pub fn is_local(&self) -> bool {
    matches!(self, Object::Local(_))
  }

  pub fn as_remote(&self) -> Option<&Arc<RemoteObject>> {
    match self {
      Object::Remote(remote) => Some(remote),
      Object::Local(_) => None,
    }
  }

  /// Runs a transaction against the object. `Ok(None)` means the target
  /// answered with a bare `Ok` (or the call was one-way).
  pub async fn transact(&self, client: &Client, request: TransactionData) -> Result<Option<TransactionData>, Status> {
    match self {
      Object::Local(local) => local.transact(client, request).await,
      Object::Remote(remote) => remote.transact(client, request).await,
    }
  }

  pub async fn link_to_death(&self, client: &Client, recipient: Arc<dyn DeathRecipient>) -> Result<(), Status> {
    match self {
      Object::Local(_) => Err(Status::InvalidOperation),
      Object::Remote(remote) => remote.link_to_death(client, recipient).await,
    }
  }

  pub async fn unlink_to_death(&self, client: &Client, recipient: &Arc<dyn DeathRecipient>) -> Result<(), Status> {
    match self {
      Object::Local(_) => Err(Status::InvalidOperation),
      Object::Remote(remote) => remote.unlink_to_death(client, recipient).await,
    }
  }

  pub(crate) fn on_reference_acquired(&self) {
    if let Object::Local(local) = self {
      local.handler().on_reference_acquired();
    }
  }

  pub(crate) fn on_reference_released(&self) {
    if let Object::Local(local) = self {
      local.handler().on_reference_released();
    }
  }
}

impl fmt::Debug for Object {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Object::Local(_) => write!(f, "Object::Local({:#x})", self.address().0),
      Object::Remote(remote) => write!(f, "Object::Remote(handle={})", remote.handle()),
    }
  }
}

impl From<Arc<LocalObject>> for Object {
  fn from(local: Arc<LocalObject>) -> Self {
    Object::Local(local)
  }
}

impl From<Arc<RemoteObject>> for Object {
  fn from(remote: Arc<RemoteObject>) -> Self {
    Object::Remote(remote)
  }
}
