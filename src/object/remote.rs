// src/object/remote.rs

use crate::client::{Client, ClientInner};
use crate::object::{DeathRecipient, Object};
use crate::protocol::TransactionData;
use crate::status::Status;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

/// Releases one broker-side reference on a handle.
///
/// Holds only a weak link to the client: releasing after the client is gone
/// does nothing and reports `DeadObject`.
#[derive(Debug, Clone)]
pub struct ReleaseReference {
  client: Weak<ClientInner>,
  handle: u64,
}

impl ReleaseReference {
  pub(crate) fn new(client: Weak<ClientInner>, handle: u64) -> Self {
    Self { client, handle }
  }

  pub fn handle(&self) -> u64 {
    self.handle
  }

  pub async fn release(self) -> Result<(), Status> {
    match Client::upgrade(&self.client) {
      Some(client) => client.release_reference(self.handle).await,
      None => Err(Status::DeadObject),
    }
  }

  /// Fire-and-forget release from synchronous code such as `Drop`.
  pub(crate) fn spawn(self) {
    let Some(client) = Client::upgrade(&self.client) else {
      return;
    };
    if !client.is_connected() {
      return;
    }
    let handle = self.handle;
    client.runtime().spawn(async move {
      if let Err(status) = self.release().await {
        tracing::debug!(handle = handle, %status, "Releasing remote reference failed");
      }
    });
  }
}

#[derive(Default)]
struct DeathState {
  recipients: Vec<Arc<dyn DeathRecipient>>,
  obituaries_sent: bool,
}

/// Proxy for an object owned by another connection, addressed by broker handle.
///
/// Construction acquires a broker reference on the handle and dropping the
/// proxy releases it again.
pub struct RemoteObject {
  handle: u64,
  release: Option<ReleaseReference>,
  dead: AtomicBool,
  death: Mutex<DeathState>,
}

impl RemoteObject {
  pub async fn new(client: &Client, handle: u64) -> Arc<Self> {
    if let Err(status) = client.add_reference(handle).await {
      tracing::warn!(handle = handle, %status, "Failed to acquire reference for remote object");
    }
    Arc::new(Self {
      handle,
      release: Some(client.release_reference_closure(handle)),
      dead: AtomicBool::new(false),
      death: Mutex::new(DeathState::default()),
    })
  }

  /// A proxy that holds no broker reference.
  pub fn detached(handle: u64) -> Arc<Self> {
    Arc::new(Self {
      handle,
      release: None,
      dead: AtomicBool::new(false),
      death: Mutex::new(DeathState::default()),
    })
  }

  #[inline]
  pub fn handle(&self) -> u64 {
    self.handle
  }

  pub fn is_dead(&self) -> bool {
    self.dead.load(Ordering::Acquire)
  }

  pub async fn transact(&self, client: &Client, request: TransactionData) -> Result<Option<TransactionData>, Status> {
    if self.is_dead() {
      return Err(Status::DeadObject);
    }
    client.transact(self.handle, request).await
  }

  pub async fn link_to_death(
    self: &Arc<Self>,
    client: &Client,
    recipient: Arc<dyn DeathRecipient>,
  ) -> Result<(), Status> {
    let mut death = self.death.lock().await;
    if death.obituaries_sent {
      return Err(Status::DeadObject);
    }
    client.request_death_notification(self.handle, self).await?;
    death.recipients.push(recipient);
    Ok(())
  }

  pub async fn unlink_to_death(
    self: &Arc<Self>,
    client: &Client,
    recipient: &Arc<dyn DeathRecipient>,
  ) -> Result<(), Status> {
    let mut death = self.death.lock().await;
    if death.obituaries_sent {
      return Err(Status::DeadObject);
    }
    let Some(index) = death.recipients.iter().position(|r| Arc::ptr_eq(r, recipient)) else {
      return Err(Status::NameNotFound);
    };
    client.clear_death_notification(self.handle, self).await?;
    death.recipients.remove(index);
    Ok(())
  }

  /// Marks the proxy dead and notifies every linked recipient. Only the first
  /// call has any effect.
  pub async fn send_obituary(self: &Arc<Self>) {
    let recipients = {
      let mut death = self.death.lock().await;
      if death.obituaries_sent {
        return;
      }
      death.obituaries_sent = true;
      self.dead.store(true, Ordering::Release);
      std::mem::take(&mut death.recipients)
    };
    tracing::debug!(handle = self.handle, recipients = recipients.len(), "Sending obituaries");
    let who = Object::Remote(self.clone());
    for recipient in recipients {
      recipient.on_object_died(&who);
    }
  }
}

impl Drop for RemoteObject {
  fn drop(&mut self) {
    if let Some(release) = self.release.take() {
      release.spawn();
    }
  }
}

impl std::fmt::Debug for RemoteObject {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RemoteObject")
      .field("handle", &self.handle)
      .field("dead", &self.is_dead())
      .finish()
  }
}
