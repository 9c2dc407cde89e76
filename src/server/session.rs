// src/server/session.rs

use crate::constants::CONTEXT_MANAGER_HANDLE;
use crate::error::BinderError;
use crate::protocol::{BinaryWriter, FlatObject, Message, MessageType, ObjectKind, TransactionData};
use crate::server::registry::Registry;
use crate::status::Status;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Binder/cookie pair an owning client attached to an exposed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BinderObject {
  binder: u64,
  cookie: u64,
}

/// Where to route the reply to a forwarded transaction.
struct TransactionRecord {
  caller: Arc<ServerSession>,
  reply_cookie: u64,
}

#[derive(Default)]
struct SessionTables {
  /// Objects this session exposed, by the handle the registry gave them.
  objects: HashMap<u64, BinderObject>,
  /// Transactions forwarded to this session, by broker cookie.
  pending_transactions: HashMap<u64, TransactionRecord>,
  /// Handles this session wants obituaries for, with the client's object id.
  death_notifications: HashMap<u64, u64>,
}

/// Broker-side state for one client connection.
///
/// Inbound messages are fed to [`ServerSession::process_message`]; everything
/// the session sends goes to the outbound queue returned by
/// [`ServerSession::new`], which the server drains onto the socket.
pub struct ServerSession {
  id: u64,
  registry: Arc<Registry>,
  outbound: async_channel::Sender<Message>,
  next_transaction_cookie: AtomicU64,
  tables: Mutex<SessionTables>,
  terminated: AtomicBool,
}

impl ServerSession {
  pub fn new(registry: Arc<Registry>) -> (Arc<Self>, async_channel::Receiver<Message>) {
    let (outbound, outbound_rx) = async_channel::unbounded();
    let session = Arc::new(Self {
      id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
      registry,
      outbound,
      next_transaction_cookie: AtomicU64::new(1),
      tables: Mutex::new(SessionTables::default()),
      terminated: AtomicBool::new(false),
    });
    (session, outbound_rx)
  }

  #[inline]
  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn is_terminated(&self) -> bool {
    self.terminated.load(Ordering::Acquire)
  }

  /// Handles one inbound message.
  pub fn process_message(self: &Arc<Self>, msg: Message) {
    tracing::trace!(session_id = self.id, msg = %msg, "Processing message");
    self.forward_to_monitor(&msg);

    match msg.msg_type() {
      MessageType::SetContextMgr => {
        let status = Status::from_result(self.registry.set_context_manager(self));
        self.send_status(msg.cookie(), status);
      }
      MessageType::SetMonitor => {
        let status = Status::from_result(self.registry.set_monitor(self));
        self.send_status(msg.cookie(), status);
      }
      MessageType::Transaction => self.on_transaction(msg),
      MessageType::Status | MessageType::TransactionReply => self.on_reply(msg),
      MessageType::Acquire | MessageType::Release => self.on_reference(msg),
      MessageType::RequestDeathNotification | MessageType::ClearDeathNotification => self.on_death_notification(msg),
      other => {
        tracing::warn!(session_id = self.id, msg_type = %other, "Unsupported message type");
        self.send_status(msg.cookie(), Status::InvalidOperation);
      }
    }
  }

  /// Queues `msg` for this session's client and mirrors it to the monitor.
  pub fn write_message(&self, msg: Message) {
    self.forward_to_monitor(&msg);
    self.send_message(msg);
  }

  /// Queues `msg` without mirroring it.
  fn send_message(&self, msg: Message) {
    if self.outbound.try_send(msg).is_err() {
      tracing::debug!(session_id = self.id, "Outbound queue closed, dropping message");
    }
  }

  fn send_status(&self, cookie: u64, status: Status) {
    self.write_message(Message::status(cookie, status));
  }

  fn forward_to_monitor(&self, msg: &Message) {
    let Some(monitor) = self.registry.monitor() else {
      return;
    };
    let mut writer = BinaryWriter::new();
    let logged = msg.pack().and_then(|packed| writer.write_sized_data(&packed));
    match logged {
      Ok(()) => monitor.send_message(Message::new(MessageType::LogEntry).with_payload(writer.freeze())),
      Err(e) => tracing::debug!(session_id = self.id, error = %e, "Cannot mirror message to monitor"),
    }
  }

  fn on_transaction(self: &Arc<Self>, msg: Message) {
    let cookie = msg.cookie();
    let destination = msg.destination();
    let mut data = match TransactionData::from_message(&msg) {
      Ok(data) => data,
      Err(e) => {
        tracing::debug!(session_id = self.id, error = %e, "Malformed transaction");
        self.send_status(cookie, Status::BadValue);
        return;
      }
    };

    let Some(target) = self.registry.find_session_by_handle(destination) else {
      tracing::warn!(session_id = self.id, handle = destination, "Cannot find a target for handle");
      self.send_status(cookie, Status::NameNotFound);
      return;
    };

    let created = match self.translate_objects(&mut data) {
      Ok(created) => created,
      Err(status) => {
        self.send_status(cookie, status);
        return;
      }
    };

    let record = TransactionRecord {
      caller: self.clone(),
      reply_cookie: cookie,
    };
    match target.post_transaction(record, destination, data) {
      Ok(forwarded) => {
        // The caller learns the transaction was delivered before the
        // target can possibly answer it.
        self.send_status(cookie, Status::Ok);
        target.write_message(forwarded);
      }
      Err(status) => {
        self.forget_handles(&created);
        self.send_status(cookie, status);
      }
    }
  }

  /// Builds the message delivering a transaction to this session's client
  /// and records where its reply must go.
  fn post_transaction(
    self: &Arc<Self>,
    record: TransactionRecord,
    destination: u64,
    mut data: TransactionData,
  ) -> Result<Message, Status> {
    let mut created = Vec::new();
    let result = {
      let mut tables = self.tables.lock();
      self.build_delivery(&mut tables, record, destination, &mut data, &mut created)
    };
    if result.is_err() {
      self.forget_handles(&created);
    }
    result
  }

  fn build_delivery(
    self: &Arc<Self>,
    tables: &mut SessionTables,
    record: TransactionRecord,
    destination: u64,
    data: &mut TransactionData,
    created: &mut Vec<u64>,
  ) -> Result<Message, Status> {
    if self.is_terminated() {
      return Err(Status::DeadObject);
    }

    // The header always names the object being called; whatever the caller
    // put there is never trusted.
    match tables.objects.get(&destination) {
      Some(obj) => {
        data.set_binder(obj.binder);
        data.set_cookie(obj.cookie);
      }
      None if destination == CONTEXT_MANAGER_HANDLE => {
        data.set_binder(0);
        data.set_cookie(0);
      }
      None => {
        // The registry pointed us at a handle we no longer track.
        tracing::warn!(session_id = self.id, handle = destination, "Cannot find object for handle");
        return Err(Status::InvalidOperation);
      }
    }

    self.translate_objects_locked(tables, data, created)?;
    let payload = data.pack().map_err(|e| e.to_status())?;

    let cookie = self.next_transaction_cookie.fetch_add(1, Ordering::Relaxed);
    if !data.is_one_way() {
      tables.pending_transactions.insert(cookie, record);
    }
    Ok(
      Message::new(MessageType::Transaction)
        .with_destination(destination)
        .with_cookie(cookie)
        .with_payload(payload),
    )
  }

  /// Translates `data` entering the broker from this session. Returns the
  /// handles minted for it; on failure none are left behind.
  fn translate_objects(self: &Arc<Self>, data: &mut TransactionData) -> Result<Vec<u64>, Status> {
    let mut created = Vec::new();
    let result = {
      let mut tables = self.tables.lock();
      self.translate_objects_locked(&mut tables, data, &mut created)
    };
    match result {
      Ok(()) => Ok(created),
      Err(status) => {
        self.forget_handles(&created);
        Err(status)
      }
    }
  }

  /// Drops handles minted for a transaction that never got delivered.
  /// Must be called without this session's lock held.
  fn forget_handles(&self, handles: &[u64]) {
    if handles.is_empty() {
      return;
    }
    {
      let mut tables = self.tables.lock();
      for handle in handles {
        tables.objects.remove(handle);
      }
    }
    tracing::debug!(session_id = self.id, handles = handles.len(), "Discarding handles of undelivered transaction");
    for handle in handles {
      self.registry.remove_handle(*handle);
    }
  }

  /// Rewrites embedded objects as they cross this session's boundary.
  ///
  /// A binder exposed by this session's client becomes a fresh broker handle
  /// owned by this session. A handle this session owns, passed back to it,
  /// becomes a weak binder carrying the client's original binder/cookie.
  /// Other handles pass untouched. Nothing is rewritten unless every
  /// descriptor is valid.
  fn translate_objects_locked(
    self: &Arc<Self>,
    tables: &mut SessionTables,
    data: &mut TransactionData,
    created: &mut Vec<u64>,
  ) -> Result<(), Status> {
    if data.object_offsets().is_empty() {
      return Ok(());
    }
    let objects = data.objects().map_err(|e| {
      tracing::debug!(session_id = self.id, error = %e, "Invalid object offset");
      Status::BadValue
    })?;

    for (_, obj) in &objects {
      match obj.kind {
        ObjectKind::Binder | ObjectKind::Handle => {}
        ObjectKind::WeakBinder | ObjectKind::WeakHandle | ObjectKind::Fd => {
          tracing::warn!(session_id = self.id, kind = ?obj.kind, "Passing through object kind without broker support");
        }
        ObjectKind::Unknown(kind) => {
          tracing::warn!(session_id = self.id, kind = kind, "Invalid object type");
          return Err(Status::InvalidOperation);
        }
      }
    }

    for (offset, obj) in objects {
      let rewritten = match obj.kind {
        ObjectKind::Binder => {
          let handle = self.registry.new_object_handle(self)?;
          created.push(handle);
          tables.objects.insert(
            handle,
            BinderObject {
              binder: obj.binder,
              cookie: obj.cookie,
            },
          );
          FlatObject {
            kind: ObjectKind::Handle,
            binder: handle,
            cookie: 0,
            ..obj
          }
        }
        ObjectKind::Handle => match tables.objects.get(&obj.handle_value()) {
          Some(owned) => FlatObject {
            kind: ObjectKind::WeakBinder,
            binder: owned.binder,
            cookie: owned.cookie,
            ..obj
          },
          None => continue,
        },
        _ => continue,
      };
      data.set_object_at(offset, &rewritten).map_err(|_| Status::BadValue)?;
    }
    Ok(())
  }

  fn on_reply(self: &Arc<Self>, msg: Message) {
    let record = self.tables.lock().pending_transactions.remove(&msg.cookie());
    let Some(record) = record else {
      tracing::trace!(session_id = self.id, cookie = msg.cookie(), "Reply without pending transaction");
      return;
    };

    let mut msg = msg;
    if msg.msg_type() == MessageType::TransactionReply {
      match self.translate_reply(&record.caller, &msg) {
        Ok(Some(payload)) => msg.set_payload(payload),
        Ok(None) => {}
        Err(status) => match TransactionData::from_status(status).pack() {
          Ok(payload) => msg.set_payload(payload),
          Err(e) => tracing::warn!(session_id = self.id, error = %e, "Cannot build status reply"),
        },
      }
    }
    msg.set_cookie(record.reply_cookie);
    record.caller.write_message(msg);
  }

  /// Objects in a reply are translated as they leave this session and again
  /// as they enter the caller's. Unparseable payloads pass through as-is.
  fn translate_reply(self: &Arc<Self>, caller: &Arc<ServerSession>, msg: &Message) -> Result<Option<bytes::Bytes>, Status> {
    let mut data = match TransactionData::from_message(msg) {
      Ok(data) => data,
      Err(_) => return Ok(None),
    };
    if data.object_offsets().is_empty() {
      return Ok(None);
    }
    let created = self.translate_objects(&mut data)?;
    let caller_created = match caller.translate_objects(&mut data) {
      Ok(caller_created) => caller_created,
      Err(status) => {
        self.forget_handles(&created);
        return Err(status);
      }
    };
    data.pack().map(Some).map_err(|e| {
      caller.forget_handles(&caller_created);
      self.forget_handles(&created);
      e.to_status()
    })
  }

  fn on_reference(self: &Arc<Self>, msg: Message) {
    let handle = match msg.reader().read_u64() {
      Ok(handle) => handle,
      Err(_) => {
        self.send_status(msg.cookie(), Status::BadValue);
        return;
      }
    };
    let result = match msg.msg_type() {
      MessageType::Acquire => self.registry.add_reference_for_handle(self, handle),
      MessageType::Release => self.registry.remove_reference_for_handle(self, handle),
      _ => Err(Status::InvalidOperation),
    };
    self.send_status(msg.cookie(), Status::from_result(result));
  }

  fn on_death_notification(&self, msg: Message) {
    let mut reader = msg.reader();
    let parsed: Result<(u64, u64), BinderError> = reader
      .read_u64()
      .and_then(|handle| reader.read_u64().map(|object_id| (handle, object_id)));
    let Ok((handle, object_id)) = parsed else {
      self.send_status(msg.cookie(), Status::BadValue);
      return;
    };

    let status = {
      let mut tables = self.tables.lock();
      match msg.msg_type() {
        MessageType::RequestDeathNotification => {
          if tables.death_notifications.contains_key(&handle) {
            Status::AlreadyExists
          } else {
            tables.death_notifications.insert(handle, object_id);
            Status::Ok
          }
        }
        MessageType::ClearDeathNotification => match tables.death_notifications.remove(&handle) {
          Some(_) => Status::Ok,
          None => Status::BadValue,
        },
        _ => Status::InvalidOperation,
      }
    };
    self.send_status(msg.cookie(), status);
  }

  /// Tells this session's client that the object behind `handle` died, if
  /// the client asked to be told.
  pub fn send_death_notification(&self, handle: u64) {
    let object_id = self.tables.lock().death_notifications.remove(&handle);
    let Some(object_id) = object_id else {
      return;
    };
    let mut writer = BinaryWriter::new();
    writer.write_u64(handle);
    writer.write_u64(object_id);
    tracing::debug!(session_id = self.id, handle = handle, "Sending death notification");
    self.write_message(Message::new(MessageType::DeadBinder).with_payload(writer.freeze()));
  }

  /// Tears the session down: every handle it owned dies (notifying
  /// referencing sessions), callers waiting on it get `DeadObject`, and any
  /// role it held is released. Idempotent.
  pub fn terminate(&self) {
    let (handles, pending) = {
      let mut tables = self.tables.lock();
      if self.terminated.swap(true, Ordering::AcqRel) {
        return;
      }
      tables.death_notifications.clear();
      let handles: Vec<u64> = tables.objects.drain().map(|(handle, _)| handle).collect();
      let pending: Vec<TransactionRecord> = tables.pending_transactions.drain().map(|(_, r)| r).collect();
      (handles, pending)
    };
    tracing::debug!(
      session_id = self.id,
      handles = handles.len(),
      pending = pending.len(),
      "Terminating session"
    );

    for record in pending {
      let reply = TransactionData::from_status(Status::DeadObject)
        .pack()
        .map(|payload| {
          Message::new(MessageType::TransactionReply)
            .with_cookie(record.reply_cookie)
            .with_payload(payload)
        });
      match reply {
        Ok(reply) => record.caller.write_message(reply),
        Err(e) => tracing::warn!(session_id = self.id, error = %e, "Cannot fail pending transaction"),
      }
    }

    for handle in handles {
      self.registry.remove_handle(handle);
    }
    self.registry.clear_context_manager(self.id);
    self.registry.clear_monitor(self.id);
    self.registry.drop_session_references(self.id);
    self.outbound.close();
  }

  pub fn owned_handles(&self) -> Vec<u64> {
    let mut handles: Vec<u64> = self.tables.lock().objects.keys().copied().collect();
    handles.sort_unstable();
    handles
  }

  pub fn pending_transaction_count(&self) -> usize {
    self.tables.lock().pending_transactions.len()
  }
}
