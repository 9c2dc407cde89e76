// src/config.rs

//! Runtime configuration for the broker and its clients.

use crate::constants::{DEFAULT_NUM_WORKERS, DEFAULT_SOCKET_PATH, SOCKET_PATH_ENV};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolves the socket path: `BINDER_SOCKET_PATH` if set and non-empty,
/// otherwise [`DEFAULT_SOCKET_PATH`].
pub fn default_socket_path() -> PathBuf {
  match std::env::var_os(SOCKET_PATH_ENV) {
    Some(path) if !path.is_empty() => PathBuf::from(path),
    _ => PathBuf::from(DEFAULT_SOCKET_PATH),
  }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub socket_path: PathBuf,
  /// Permission bits applied to the socket file after bind.
  pub socket_mode: u32,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      socket_path: default_socket_path(),
      socket_mode: 0o777,
    }
  }
}

impl ServerConfig {
  pub fn new(socket_path: impl AsRef<Path>) -> Self {
    Self {
      socket_path: socket_path.as_ref().to_path_buf(),
      ..Default::default()
    }
  }

  pub fn with_socket_mode(mut self, mode: u32) -> Self {
    self.socket_mode = mode;
    self
  }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
  pub socket_path: PathBuf,
  /// Workers started by `Client::start_thread_pool`.
  pub num_workers: usize,
  /// Upper bound on how long a blocking call waits for its reply.
  /// `None` waits until the reply arrives or the connection drops.
  pub call_timeout: Option<Duration>,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      socket_path: default_socket_path(),
      num_workers: DEFAULT_NUM_WORKERS,
      call_timeout: None,
    }
  }
}

impl ClientConfig {
  pub fn new(socket_path: impl AsRef<Path>) -> Self {
    Self {
      socket_path: socket_path.as_ref().to_path_buf(),
      ..Default::default()
    }
  }

  pub fn with_num_workers(mut self, num_workers: usize) -> Self {
    self.num_workers = num_workers.max(1);
    self
  }

  pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
    self.call_timeout = Some(timeout);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builders_override_defaults() {
    let cfg = ClientConfig::new("/tmp/x.sock")
      .with_num_workers(0)
      .with_call_timeout(Duration::from_millis(250));
    assert_eq!(cfg.socket_path, PathBuf::from("/tmp/x.sock"));
    assert_eq!(cfg.num_workers, 1);
    assert_eq!(cfg.call_timeout, Some(Duration::from_millis(250)));

    let server = ServerConfig::new("/tmp/y.sock").with_socket_mode(0o700);
    assert_eq!(server.socket_mode, 0o700);
  }
}
