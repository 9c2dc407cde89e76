// src/object/local.rs

use crate::client::Client;
use crate::constants::{
  DUMP_TRANSACTION, INTERFACE_TRANSACTION, PING_TRANSACTION, SHELL_COMMAND_TRANSACTION, SYSPROPS_TRANSACTION,
};
use crate::protocol::TransactionData;
use crate::status::Status;
use async_trait::async_trait;
use std::sync::Arc;

/// Application logic behind a [`LocalObject`].
///
/// Handlers may be invoked concurrently from several workers.
#[async_trait]
pub trait TransactionHandler: Send + Sync {
  async fn on_transact(&self, client: &Client, request: TransactionData) -> Result<Option<TransactionData>, Status>;

  fn on_reference_acquired(&self) {}

  fn on_reference_released(&self) {}
}

/// An object implemented in this process.
pub struct LocalObject {
  handler: Box<dyn TransactionHandler>,
}

impl LocalObject {
  pub fn new(handler: impl TransactionHandler + 'static) -> Arc<Self> {
    Arc::new(Self {
      handler: Box::new(handler),
    })
  }

  pub(crate) fn handler(&self) -> &dyn TransactionHandler {
    self.handler.as_ref()
  }

  pub async fn transact(&self, client: &Client, request: TransactionData) -> Result<Option<TransactionData>, Status> {
    match request.code() {
      PING_TRANSACTION => Ok(None),
      INTERFACE_TRANSACTION | DUMP_TRANSACTION | SHELL_COMMAND_TRANSACTION | SYSPROPS_TRANSACTION => {
        tracing::warn!(code = request.code(), "Base object transactions are not implemented");
        Err(Status::UnknownTransaction)
      }
      _ => self.handler.on_transact(client, request).await,
    }
  }
}
