// src/server/mod.rs

//! The broker: accepts client connections and routes their messages.

pub mod registry;
pub mod session;

pub use registry::Registry;
pub use session::ServerSession;

use crate::config::ServerConfig;
use crate::error::BinderError;
use crate::protocol::MessageParser;
use crate::transport::{self, ipc};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::{AbortHandle, JoinHandle};

struct Connection {
  session: Arc<ServerSession>,
  reader: AbortHandle,
}

type Connections = Arc<Mutex<HashMap<u64, Connection>>>;

/// A running broker bound to a Unix socket.
///
/// Dropping the server (or calling [`Server::stop`]) stops accepting,
/// terminates every session and removes the socket file.
pub struct Server {
  socket_path: PathBuf,
  registry: Arc<Registry>,
  connections: Connections,
  acceptor: Mutex<Option<JoinHandle<()>>>,
  stopped: AtomicBool,
}

impl Server {
  /// Binds the socket and starts accepting connections on the current
  /// tokio runtime.
  pub async fn bind(config: ServerConfig) -> Result<Self, BinderError> {
    let listener = ipc::bind(&config.socket_path, config.socket_mode).await?;
    let registry = Arc::new(Registry::new());
    let connections: Connections = Arc::new(Mutex::new(HashMap::new()));

    let acceptor = tokio::spawn(accept_loop(listener, registry.clone(), connections.clone()));
    Ok(Self {
      socket_path: config.socket_path,
      registry,
      connections,
      acceptor: Mutex::new(Some(acceptor)),
      stopped: AtomicBool::new(false),
    })
  }

  pub fn socket_path(&self) -> &Path {
    &self.socket_path
  }

  pub fn registry(&self) -> &Arc<Registry> {
    &self.registry
  }

  pub fn session_count(&self) -> usize {
    self.connections.lock().len()
  }

  /// Stops the broker. Idempotent.
  pub fn stop(&self) {
    if self.stopped.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(acceptor) = self.acceptor.lock().take() {
      acceptor.abort();
    }
    let connections: Vec<Connection> = self.connections.lock().drain().map(|(_, c)| c).collect();
    tracing::info!(sessions = connections.len(), "Stopping broker");
    for connection in connections {
      connection.reader.abort();
      connection.session.terminate();
    }
    ipc::remove_socket_file(&self.socket_path);
  }
}

impl Drop for Server {
  fn drop(&mut self) {
    self.stop();
  }
}

async fn accept_loop(listener: UnixListener, registry: Arc<Registry>, connections: Connections) {
  loop {
    match listener.accept().await {
      Ok((stream, _)) => start_session(stream, &registry, &connections),
      Err(e) => {
        tracing::error!(error = %e, "Accept failed");
        tokio::time::sleep(Duration::from_millis(50)).await;
      }
    }
  }
}

fn start_session(stream: UnixStream, registry: &Arc<Registry>, connections: &Connections) {
  let (session, outbound_rx) = ServerSession::new(registry.clone());
  let session_id = session.id();
  let (sink, mut frames) = transport::framed(stream).split();

  tokio::spawn(async move {
    let peer = format!("session-{}", session_id);
    transport::write_loop(sink, outbound_rx, &peer).await;
  });

  // Held across the spawn so the reader cannot deregister before it is registered.
  let mut table = connections.lock();
  let reader_session = session.clone();
  let reader_connections = connections.clone();
  let reader = tokio::spawn(async move {
    while let Some(frame) = frames.next().await {
      match frame {
        Ok(frame) => {
          for msg in MessageParser::new(frame) {
            reader_session.process_message(msg);
          }
        }
        Err(e) => {
          tracing::debug!(session_id = session_id, error = %e, "Session read failed");
          break;
        }
      }
    }
    tracing::debug!(session_id = session_id, "Client disconnected");
    reader_session.terminate();
    reader_connections.lock().remove(&session_id);
  });
  table.insert(
    session_id,
    Connection {
      session,
      reader: reader.abort_handle(),
    },
  );
  tracing::debug!(session_id = session_id, sessions = table.len(), "Client connected");
}
