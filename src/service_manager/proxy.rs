// src/service_manager/proxy.rs

use super::{
  ADD_SERVICE_TRANSACTION, CHECK_SERVICE_TRANSACTION, GET_SERVICE_TRANSACTION, INTERFACE_NAME,
  LIST_SERVICES_TRANSACTION,
};
use crate::client::Client;
use crate::constants::CONTEXT_MANAGER_HANDLE;
use crate::object::Object;
use crate::parcel::{ParcelReader, ParcelWriter};
use crate::status::Status;

/// Client-side view of the service manager.
#[derive(Debug, Clone)]
pub struct ServiceManagerProxy {
  client: Client,
}

impl ServiceManagerProxy {
  pub fn new(client: Client) -> Self {
    Self { client }
  }

  fn request(code: u32) -> Result<ParcelWriter, Status> {
    let mut writer = ParcelWriter::new(code);
    writer.write_interface_token(INTERFACE_NAME, 0)?;
    Ok(writer)
  }

  pub async fn add_service(&self, name: &str, object: &Object, allow_isolated: bool) -> Result<(), Status> {
    let mut writer = Self::request(ADD_SERVICE_TRANSACTION)?;
    writer.write_string16(name)?;
    writer.write_object(&self.client, object);
    writer.write_i32(i32::from(allow_isolated));
    self.client.transact(CONTEXT_MANAGER_HANDLE, writer.finish()).await?;
    Ok(())
  }

  pub async fn get_service(&self, name: &str) -> Result<Object, Status> {
    self.lookup(GET_SERVICE_TRANSACTION, name).await
  }

  pub async fn check_service(&self, name: &str) -> Result<Object, Status> {
    self.lookup(CHECK_SERVICE_TRANSACTION, name).await
  }

  async fn lookup(&self, code: u32, name: &str) -> Result<Object, Status> {
    let mut writer = Self::request(code)?;
    writer.write_string16(name)?;
    let reply = self
      .client
      .transact(CONTEXT_MANAGER_HANDLE, writer.finish())
      .await?
      .ok_or(Status::BadValue)?;
    ParcelReader::new(&reply)
      .read_object(&self.client)
      .await?
      .ok_or(Status::DeadObject)
  }

  /// Every registered name, fetched one index at a time until the service
  /// manager answers `BadValue`.
  pub async fn list_services(&self) -> Result<Vec<String>, Status> {
    let mut names = Vec::new();
    for index in 0.. {
      let mut writer = Self::request(LIST_SERVICES_TRANSACTION)?;
      writer.write_i32(index);
      match self.client.transact(CONTEXT_MANAGER_HANDLE, writer.finish()).await {
        Ok(Some(reply)) => names.push(ParcelReader::new(&reply).read_string16()?),
        Ok(None) => break,
        Err(Status::BadValue) => break,
        Err(status) => return Err(status),
      }
    }
    Ok(names)
  }
}
