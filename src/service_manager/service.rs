// src/service_manager/service.rs

use super::{
  ADD_SERVICE_TRANSACTION, CHECK_SERVICE_TRANSACTION, GET_SERVICE_TRANSACTION, INTERFACE_NAME,
  LIST_SERVICES_TRANSACTION,
};
use crate::client::Client;
use crate::object::{DeathRecipient, Object, TransactionHandler};
use crate::parcel::{ParcelReader, ParcelWriter};
use crate::protocol::TransactionData;
use crate::status::Status;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

type Services = Mutex<BTreeMap<String, Object>>;

/// Drops a service from the directory once its owner goes away.
struct ServiceDeathRecipient {
  services: Weak<Services>,
}

impl DeathRecipient for ServiceDeathRecipient {
  fn on_object_died(&self, who: &Object) {
    let Some(services) = self.services.upgrade() else {
      return;
    };
    let address = who.address();
    services.lock().retain(|name, object| {
      let dead = object.address() == address;
      if dead {
        tracing::info!(service = %name, "Service died, removing it");
      }
      !dead
    });
  }
}

/// The directory itself. Install it as the context object of the client
/// that became context manager.
pub struct ServiceManager {
  services: Arc<Services>,
  death_recipient: Arc<dyn DeathRecipient>,
}

impl Default for ServiceManager {
  fn default() -> Self {
    let services = Arc::new(Mutex::new(BTreeMap::new()));
    let death_recipient = Arc::new(ServiceDeathRecipient {
      services: Arc::downgrade(&services),
    });
    Self {
      services,
      death_recipient,
    }
  }
}

impl ServiceManager {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registered names in sorted order.
  pub fn service_names(&self) -> Vec<String> {
    self.services.lock().keys().cloned().collect()
  }

  async fn add_service(&self, client: &Client, request: &TransactionData) -> Result<Option<TransactionData>, Status> {
    let mut reader = ParcelReader::new(request);
    check_interface(&mut reader)?;
    let name = reader.read_string16()?;
    let object = reader.read_object(client).await?.ok_or(Status::BadValue)?;
    let _allow_isolated = reader.read_i32()?;

    {
      let mut services = self.services.lock();
      if services.contains_key(&name) {
        tracing::debug!(service = %name, "Service already registered");
        return Err(Status::BadValue);
      }
      services.insert(name.clone(), object.clone());
    }
    tracing::info!(service = %name, object = ?object, "Service added");

    if let Err(status) = object.link_to_death(client, self.death_recipient.clone()).await {
      tracing::debug!(service = %name, %status, "Cannot watch service for death");
    }

    let mut reply = ParcelWriter::default();
    reply.write_i32(Status::Ok.as_i32());
    Ok(Some(reply.finish()))
  }

  fn get_service(&self, client: &Client, request: &TransactionData) -> Result<Option<TransactionData>, Status> {
    let mut reader = ParcelReader::new(request);
    check_interface(&mut reader)?;
    let name = reader.read_string16()?;
    let object = self.services.lock().get(&name).cloned().ok_or(Status::BadValue)?;

    let mut reply = ParcelWriter::default();
    reply.write_object(client, &object);
    Ok(Some(reply.finish()))
  }

  fn list_services(&self, request: &TransactionData) -> Result<Option<TransactionData>, Status> {
    let mut reader = ParcelReader::new(request);
    check_interface(&mut reader)?;
    let index = reader.read_i32()?;
    let name = usize::try_from(index)
      .ok()
      .and_then(|index| self.services.lock().keys().nth(index).cloned())
      .ok_or(Status::BadValue)?;

    let mut reply = ParcelWriter::default();
    reply.write_string16(&name)?;
    Ok(Some(reply.finish()))
  }
}

fn check_interface(reader: &mut ParcelReader) -> Result<(), Status> {
  if !reader.enforce_interface(INTERFACE_NAME)? {
    tracing::warn!("Request carries a foreign interface token");
  }
  Ok(())
}

#[async_trait]
impl TransactionHandler for ServiceManager {
  async fn on_transact(&self, client: &Client, request: TransactionData) -> Result<Option<TransactionData>, Status> {
    match request.code() {
      ADD_SERVICE_TRANSACTION => self.add_service(client, &request).await,
      GET_SERVICE_TRANSACTION | CHECK_SERVICE_TRANSACTION => self.get_service(client, &request),
      LIST_SERVICES_TRANSACTION => self.list_services(&request),
      code => {
        tracing::debug!(code = code, "Unknown service manager transaction");
        Err(Status::UnknownTransaction)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::object::RemoteObject;

  #[test]
  fn death_removes_only_the_dead_service() {
    let manager = ServiceManager::new();
    let a = Object::Remote(RemoteObject::detached(1));
    let b = Object::Remote(RemoteObject::detached(2));
    manager.services.lock().insert("a".into(), a.clone());
    manager.services.lock().insert("b".into(), b);

    manager.death_recipient.on_object_died(&a);
    assert_eq!(manager.service_names(), vec!["b".to_string()]);
  }

  #[test]
  fn recipient_outliving_the_directory_is_harmless() {
    let manager = ServiceManager::new();
    let recipient = manager.death_recipient.clone();
    drop(manager);
    recipient.on_object_died(&Object::Remote(RemoteObject::detached(3)));
  }
}
