// src/client/mod.rs

//! Endpoint side of the broker protocol.
//!
//! A [`Client`] owns one connection. Calls block (asynchronously) on a
//! cookie-correlated reply slot while a reader task demultiplexes inbound
//! traffic: replies go to their waiting call, incoming transactions and
//! death notifications go to a queue drained by worker tasks.

mod dispatch;
mod pending;

use crate::config::ClientConfig;
use crate::error::BinderError;
use crate::object::{Object, ObjectAddress, ObjectPool, ObjectTranslator, ReleaseReference, RemoteObject};
use crate::object::translator::Direction;
use crate::protocol::{BinaryWriter, Message, MessageType, TransactionData};
use crate::status::Status;
use crate::transport::{self, ipc};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use pending::PendingCalls;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  Disconnected,
  Connected,
}

/// Receives messages a monitor session mirrors from the broker.
pub trait LogMessageHandler: Send + Sync {
  fn on_log_message(&self, msg: Message);
}

/// A death registration held on behalf of one proxy.
struct DeathRegistration {
  id: u64,
  proxy: Weak<RemoteObject>,
  handles: Vec<u64>,
}

pub(crate) struct ClientInner {
  config: ClientConfig,
  state: RwLock<State>,
  runtime: tokio::runtime::Handle,
  next_cookie: AtomicU64,
  outbound: async_channel::Sender<Message>,
  inbound_tx: async_channel::Sender<Message>,
  inbound_rx: async_channel::Receiver<Message>,
  pending: PendingCalls,
  object_pool: Arc<ObjectPool>,
  translator: ObjectTranslator,
  context_object: RwLock<Option<Object>>,
  log_handler: RwLock<Option<Arc<dyn LogMessageHandler>>>,
  dead_recipients: Mutex<Vec<DeathRegistration>>,
  reader: Mutex<Option<JoinHandle<()>>>,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ClientInner {
  fn shutdown(&self) {
    {
      let mut state = self.state.write();
      if *state == State::Disconnected && self.outbound.is_closed() {
        return;
      }
      *state = State::Disconnected;
    }
    self.pending.fail_all();
    self.outbound.close();
    self.inbound_tx.close();
  }
}

impl Drop for ClientInner {
  fn drop(&mut self) {
    self.shutdown();
    if let Some(reader) = self.reader.get_mut().take() {
      reader.abort();
    }
  }
}

/// Cheaply cloneable handle to one broker connection.
#[derive(Clone)]
pub struct Client {
  inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Client")
      .field("state", &self.state())
      .field("socket_path", &self.inner.config.socket_path)
      .finish()
  }
}

impl Client {
  /// Connects to the broker at `config.socket_path`.
  pub async fn connect(config: ClientConfig) -> Result<Self, BinderError> {
    let stream = ipc::connect(&config.socket_path).await?;
    Self::from_stream(stream, config)
  }

  /// Runs the client protocol over an already connected stream.
  /// Must be called from within a tokio runtime.
  pub fn from_stream(stream: UnixStream, config: ClientConfig) -> Result<Self, BinderError> {
    let runtime = tokio::runtime::Handle::try_current()
      .map_err(|e| BinderError::Internal(format!("client requires a tokio runtime: {}", e)))?;
    let (outbound_tx, outbound_rx) = async_channel::unbounded();
    let (inbound_tx, inbound_rx) = async_channel::unbounded();

    let inner = Arc::new(ClientInner {
      config,
      state: RwLock::new(State::Connected),
      runtime: runtime.clone(),
      next_cookie: AtomicU64::new(1),
      outbound: outbound_tx,
      inbound_tx,
      inbound_rx,
      pending: PendingCalls::default(),
      object_pool: Arc::new(ObjectPool::new()),
      translator: ObjectTranslator::new(),
      context_object: RwLock::new(None),
      log_handler: RwLock::new(None),
      dead_recipients: Mutex::new(Vec::new()),
      reader: Mutex::new(None),
      workers: Mutex::new(Vec::new()),
    });

    let (sink, stream) = transport::framed(stream).split();
    // The writer exits on its own once the outbound queue is closed and drained.
    runtime.spawn(async move { transport::write_loop(sink, outbound_rx, "broker").await });
    let reader = runtime.spawn(dispatch::read_loop(Arc::downgrade(&inner), stream));
    *inner.reader.lock() = Some(reader);

    tracing::debug!(socket_path = ?inner.config.socket_path, "Client connected");
    Ok(Self { inner })
  }

  pub(crate) fn upgrade(inner: &Weak<ClientInner>) -> Option<Self> {
    inner.upgrade().map(|inner| Self { inner })
  }

  pub(crate) fn downgrade(&self) -> Weak<ClientInner> {
    Arc::downgrade(&self.inner)
  }

  pub(crate) fn runtime(&self) -> &tokio::runtime::Handle {
    &self.inner.runtime
  }

  pub fn config(&self) -> &ClientConfig {
    &self.inner.config
  }

  pub fn state(&self) -> State {
    *self.inner.state.read()
  }

  pub fn is_connected(&self) -> bool {
    self.state() == State::Connected
  }

  pub fn object_pool(&self) -> &Arc<ObjectPool> {
    &self.inner.object_pool
  }

  pub fn new_cookie(&self) -> u64 {
    self.inner.next_cookie.fetch_add(1, Ordering::Relaxed)
  }

  /// Hands a message to the writer without waiting for anything.
  pub fn queue_message(&self, msg: Message) -> Result<(), BinderError> {
    if !self.is_connected() {
      return Err(BinderError::NotConnected);
    }
    if msg.packed_size() > crate::constants::MAX_FRAME_SIZE {
      return Err(BinderError::FrameTooLarge(msg.packed_size()));
    }
    self.inner.outbound.try_send(msg).map_err(|_| BinderError::NotConnected)
  }

  /// Next unsolicited inbound message, or `None` once disconnected.
  pub async fn dequeue_message(&self) -> Option<Message> {
    self.inner.inbound_rx.recv().await.ok()
  }

  /// Sends `msg` under a fresh cookie and waits for the message answering it.
  ///
  /// For a two-way `Transaction` that is the `TransactionReply` (or an error
  /// `Status` from the broker); for everything else it is the first `Status`.
  pub async fn transact_message(&self, mut msg: Message, one_way: bool) -> Result<Message, BinderError> {
    if !self.is_connected() {
      return Err(BinderError::NotConnected);
    }
    let cookie = self.new_cookie();
    msg.set_cookie(cookie);
    let reply_rx = self.inner.pending.register(cookie, msg.msg_type(), one_way)?;
    if let Err(e) = self.queue_message(msg) {
      self.inner.pending.cancel(cookie);
      return Err(e);
    }

    let reply = match self.inner.config.call_timeout {
      Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
        Ok(reply) => reply,
        Err(_) => {
          self.inner.pending.cancel(cookie);
          tracing::warn!(cookie = cookie, timeout = ?limit, "Call timed out waiting for a reply");
          return Err(BinderError::Timeout);
        }
      },
      None => reply_rx.await,
    };
    reply.map_err(|_| BinderError::ConnectionClosed)
  }

  /// Sends `request` to the object behind `handle`.
  ///
  /// Returns the translated reply, `Ok(None)` for a one-way call or a bare
  /// `Ok` reply, and the carried status for any failure.
  pub async fn transact(&self, handle: u64, mut request: TransactionData) -> Result<Option<TransactionData>, Status> {
    self.inner.translator.process_transaction(&mut request, Direction::Out)?;
    let one_way = request.is_one_way();
    let payload = request.pack().map_err(|e| e.to_status())?;
    let msg = Message::new(MessageType::Transaction)
      .with_destination(handle)
      .with_payload(payload);

    let reply = self.transact_message(msg, one_way).await.map_err(call_failure)?;
    match reply.msg_type() {
      MessageType::Status => {
        let status = reply.read_status().map_err(|e| e.to_status())?;
        if one_way {
          status.into_result().map(|_| None)
        } else {
          Err(if status.is_ok() { Status::BadValue } else { status })
        }
      }
      MessageType::TransactionReply => {
        let mut data = TransactionData::from_message(&reply).map_err(|e| e.to_status())?;
        if let Some(status) = data.status() {
          return status.into_result().map(|_| None);
        }
        self.inner.translator.process_transaction(&mut data, Direction::In)?;
        Ok(Some(data))
      }
      other => {
        tracing::warn!(msg_type = %other, "Unexpected reply to transaction");
        Err(Status::BadValue)
      }
    }
  }

  async fn status_call(&self, msg: Message) -> Result<(), Status> {
    let msg_type = msg.msg_type();
    let reply = self.transact_message(msg, false).await.map_err(|e| {
      tracing::warn!(msg_type = %msg_type, error = %e, "Call received no reply");
      call_failure(e)
    })?;
    reply.read_status().map_err(|e| e.to_status())?.into_result()
  }

  fn handle_message(msg_type: MessageType, values: &[u64]) -> Message {
    let mut writer = BinaryWriter::new();
    for value in values {
      writer.write_u64(*value);
    }
    Message::new(msg_type).with_payload(writer.freeze())
  }

  pub async fn add_reference(&self, handle: u64) -> Result<(), Status> {
    self.status_call(Self::handle_message(MessageType::Acquire, &[handle])).await
  }

  pub async fn release_reference(&self, handle: u64) -> Result<(), Status> {
    self.status_call(Self::handle_message(MessageType::Release, &[handle])).await
  }

  /// A releaser that stays safe to call after this client is gone.
  pub fn release_reference_closure(&self, handle: u64) -> ReleaseReference {
    ReleaseReference::new(self.downgrade(), handle)
  }

  pub async fn become_context_manager(&self) -> Result<(), Status> {
    self.status_call(Message::new(MessageType::SetContextMgr)).await
  }

  /// Object that receives transactions addressed to no specific object,
  /// which is how the context manager is reached.
  pub fn set_context_object(&self, object: Object) {
    *self.inner.context_object.write() = Some(object);
  }

  pub fn context_object(&self) -> Option<Object> {
    self.inner.context_object.read().clone()
  }

  pub async fn become_monitor(&self) -> Result<(), Status> {
    self.status_call(Message::new(MessageType::SetMonitor)).await
  }

  pub fn set_log_message_handler(&self, handler: Arc<dyn LogMessageHandler>) {
    *self.inner.log_handler.write() = Some(handler);
  }

  pub async fn request_death_notification(&self, handle: u64, proxy: &Arc<RemoteObject>) -> Result<(), Status> {
    let id = self.inner.translator.translate_or_add(ObjectAddress::of(proxy)).0;
    {
      let mut recipients = self.inner.dead_recipients.lock();
      match recipients.iter_mut().find(|r| r.id == id) {
        Some(registration) => registration.handles.push(handle),
        None => recipients.push(DeathRegistration {
          id,
          proxy: Arc::downgrade(proxy),
          handles: vec![handle],
        }),
      }
    }

    let result = self
      .status_call(Self::handle_message(MessageType::RequestDeathNotification, &[handle, id]))
      .await;
    if result.is_err() {
      self.forget_death_registration(id, handle);
    }
    result
  }

  pub async fn clear_death_notification(&self, handle: u64, proxy: &Arc<RemoteObject>) -> Result<(), Status> {
    let id = self
      .inner
      .translator
      .translate(ObjectAddress::of(proxy))
      .ok_or(Status::DeadObject)?
      .0;
    if !self.forget_death_registration(id, handle) {
      return Err(Status::DeadObject);
    }
    self
      .status_call(Self::handle_message(MessageType::ClearDeathNotification, &[handle, id]))
      .await
  }

  fn forget_death_registration(&self, id: u64, handle: u64) -> bool {
    let mut recipients = self.inner.dead_recipients.lock();
    let Some(index) = recipients.iter().position(|r| r.id == id) else {
      return false;
    };
    let registration = &mut recipients[index];
    if let Some(pos) = registration.handles.iter().position(|h| *h == handle) {
      registration.handles.remove(pos);
    }
    if registration.handles.is_empty() {
      recipients.remove(index);
    }
    true
  }

  /// Removes and returns the proxy registered under `id`, if still alive.
  fn take_death_registration(&self, id: u64) -> Option<Arc<RemoteObject>> {
    let mut recipients = self.inner.dead_recipients.lock();
    let index = recipients.iter().position(|r| r.id == id)?;
    let registration = recipients.remove(index);
    registration.proxy.upgrade()
  }

  /// Starts `config.num_workers` tasks draining the inbound queue.
  pub fn start_thread_pool(&self) {
    let mut workers = self.inner.workers.lock();
    for n in 0..self.inner.config.num_workers {
      let weak = self.downgrade();
      let queue = self.inner.inbound_rx.clone();
      workers.push(self.inner.runtime.spawn(async move {
        while let Ok(msg) = queue.recv().await {
          let Some(client) = Client::upgrade(&weak) else {
            break;
          };
          client.execute_command(msg).await;
        }
        tracing::trace!(worker = n, "Client worker finished");
      }));
    }
    tracing::debug!(workers = workers.len(), "Client thread pool started");
  }

  /// Waits until every worker has exited, which happens on disconnect.
  pub async fn join_thread_pool(&self) {
    let workers: Vec<_> = self.inner.workers.lock().drain(..).collect();
    for worker in workers {
      if let Err(e) = worker.await {
        if e.is_panic() {
          tracing::error!(error = %e, "Client worker panicked");
        }
      }
    }
  }

  /// Dequeues one unsolicited message and executes it.
  /// Returns `false` once the connection is gone.
  pub async fn process_and_execute_command(&self) -> bool {
    match self.dequeue_message().await {
      Some(msg) => {
        self.execute_command(msg).await;
        true
      }
      None => false,
    }
  }

  /// Closes the connection, failing every pending call and stopping workers.
  pub fn terminate(&self) {
    tracing::debug!("Terminating client");
    self.inner.shutdown();
    if let Some(reader) = self.inner.reader.lock().take() {
      reader.abort();
    }
  }
}

fn call_failure(err: BinderError) -> Status {
  match err {
    BinderError::Timeout => Status::TimedOut,
    BinderError::NotConnected | BinderError::ConnectionClosed => Status::FailedTransaction,
    other => other.to_status(),
  }
}
