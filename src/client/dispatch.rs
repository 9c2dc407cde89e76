// src/client/dispatch.rs

use super::{Client, ClientInner};
use crate::object::translator::Direction;
use crate::object::ObjectId;
use crate::protocol::{Message, MessageParser, MessageType, TransactionData};
use crate::status::Status;
use crate::transport::FramedStream;
use futures::stream::SplitStream;
use futures::StreamExt;
use std::sync::Weak;

/// Reads frames until the broker goes away, demultiplexing every message.
pub(super) async fn read_loop(weak: Weak<ClientInner>, mut stream: SplitStream<FramedStream>) {
  while let Some(frame) = stream.next().await {
    let frame = match frame {
      Ok(frame) => frame,
      Err(e) => {
        tracing::debug!(error = %e, "Broker connection failed");
        break;
      }
    };
    let Some(client) = Client::upgrade(&weak) else {
      return;
    };
    for msg in MessageParser::new(frame) {
      client.dispatch_inbound(msg);
    }
  }

  tracing::debug!("Broker connection closed");
  if let Some(client) = Client::upgrade(&weak) {
    client.inner.shutdown();
  }
}

impl Client {
  fn dispatch_inbound(&self, msg: Message) {
    tracing::trace!(msg = %msg, "Received message");

    if msg.msg_type() == MessageType::LogEntry {
      self.deliver_log_entry(&msg);
      return;
    }

    let msg = match self.inner.pending.resolve(msg) {
      Ok(()) => return,
      Err(msg) => msg,
    };

    if msg.msg_type() == MessageType::Transaction && self.inner.context_object.read().is_some() {
      let client = self.clone();
      self.inner.runtime.spawn(async move { client.execute_transaction(msg).await });
      return;
    }

    if self.inner.inbound_tx.try_send(msg).is_err() {
      tracing::debug!("Inbound queue closed, dropping message");
    }
  }

  fn deliver_log_entry(&self, msg: &Message) {
    let Some(handler) = self.inner.log_handler.read().clone() else {
      return;
    };
    let mut reader = msg.reader();
    let logged = reader
      .read_sized_data()
      .and_then(|packed| Message::unpack(&packed, 0).map(|(logged, _)| logged));
    match logged {
      Ok(logged) => handler.on_log_message(logged),
      Err(e) => tracing::warn!(error = %e, "Malformed log entry"),
    }
  }

  /// Runs one unsolicited message: a transaction for a local object or a
  /// death notification for one of our proxies.
  pub(crate) async fn execute_command(&self, msg: Message) {
    match msg.msg_type() {
      MessageType::Transaction => self.execute_transaction(msg).await,
      MessageType::DeadBinder => self.handle_dead_binder(msg).await,
      other => tracing::debug!(msg_type = %other, cookie = msg.cookie(), "Ignoring unsolicited message"),
    }
  }

  fn send_status(&self, cookie: u64, status: Status) {
    if let Err(e) = self.queue_message(Message::status(cookie, status)) {
      tracing::debug!(cookie = cookie, error = %e, "Failed to send status");
    }
  }

  async fn execute_transaction(&self, msg: Message) {
    let cookie = msg.cookie();
    let mut request = match TransactionData::from_message(&msg) {
      Ok(request) => request,
      Err(e) => {
        tracing::warn!(cookie = cookie, error = %e, "Malformed transaction");
        self.send_status(cookie, Status::BadValue);
        return;
      }
    };
    let one_way = request.is_one_way();

    // Objects we own come back as ids we issued; restore their addresses.
    if let Err(status) = self.inner.translator.process_transaction(&mut request, Direction::In) {
      if !one_way {
        self.send_reply(cookie, TransactionData::from_status(status));
      }
      return;
    }

    let target = match self.inner.translator.translate_cookie(ObjectId(request.cookie())) {
      Some(address) => self.inner.object_pool.get(address),
      None if request.cookie() == 0 => self.context_object(),
      None => None,
    };
    let Some(target) = target else {
      tracing::warn!(cookie = request.cookie(), "No object for transaction");
      if !one_way {
        self.send_status(cookie, Status::UnknownTransaction);
      }
      return;
    };

    let code = request.code();
    let result = target.transact(self, request).await;
    if one_way {
      if let Err(status) = result {
        tracing::debug!(code = code, %status, "One-way transaction failed");
      }
      return;
    }

    let reply = match result {
      Ok(Some(mut reply)) => match self.inner.translator.process_transaction(&mut reply, Direction::Out) {
        Ok(()) => reply,
        Err(status) => TransactionData::from_status(status),
      },
      Ok(None) => TransactionData::from_status(Status::Ok),
      Err(status) => TransactionData::from_status(status),
    };
    self.send_reply(cookie, reply);
  }

  fn send_reply(&self, cookie: u64, reply: TransactionData) {
    let payload = match reply.pack() {
      Ok(payload) => payload,
      Err(e) => {
        tracing::warn!(cookie = cookie, error = %e, "Failed to pack reply");
        self.send_status(cookie, e.to_status());
        return;
      }
    };
    let msg = Message::new(MessageType::TransactionReply)
      .with_cookie(cookie)
      .with_payload(payload);
    if let Err(e) = self.queue_message(msg) {
      tracing::warn!(cookie = cookie, error = %e, "Failed to send reply");
      if matches!(e, crate::error::BinderError::FrameTooLarge(_)) {
        self.send_reply(cookie, TransactionData::from_status(Status::NoMemory));
      }
    }
  }

  async fn handle_dead_binder(&self, msg: Message) {
    let mut reader = msg.reader();
    let parsed = reader.read_u64().and_then(|handle| reader.read_u64().map(|id| (handle, id)));
    let (handle, id) = match parsed {
      Ok(parsed) => parsed,
      Err(e) => {
        tracing::warn!(error = %e, "Malformed death notification");
        self.send_status(msg.cookie(), Status::BadValue);
        return;
      }
    };

    let status = match self.take_death_registration(id) {
      Some(proxy) => {
        tracing::debug!(handle = handle, id = id, "Remote object died");
        proxy.send_obituary().await;
        Status::Ok
      }
      None => Status::DeadObject,
    };
    self.send_status(msg.cookie(), status);
  }
}
