// src/transport/ipc.rs

//! Unix domain socket endpoints for the broker and its clients.

use crate::error::BinderError;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;
use tokio::net::{UnixListener, UnixStream};

/// Binds the broker socket at `path` and applies `mode` to the socket file.
///
/// A leftover socket file that refuses connections is removed first. A live
/// socket, or anything at `path` that is not a socket, fails with `AddrInUse`.
pub async fn bind(path: &Path, mode: u32) -> Result<UnixListener, BinderError> {
  let endpoint = path.display().to_string();
  match tokio::fs::symlink_metadata(path).await {
    Ok(meta) if !meta.file_type().is_socket() => {
      tracing::warn!(path = ?path, "Socket path is taken by a file that is not a socket");
      return Err(BinderError::AddrInUse(endpoint));
    }
    Ok(_) => match UnixStream::connect(path).await {
      Ok(_) => {
        tracing::warn!(path = ?path, "Socket path is held by a live process");
        return Err(BinderError::AddrInUse(endpoint));
      }
      Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
        tracing::debug!(path = ?path, "Socket path is stale, removing it before binding");
        remove_socket_file(path);
      }
      Err(e) => return Err(BinderError::from_io_endpoint(e, &endpoint)),
    },
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => return Err(BinderError::from_io_endpoint(e, &endpoint)),
  }

  let listener = UnixListener::bind(path).map_err(|e| BinderError::from_io_endpoint(e, &endpoint))?;
  tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
    .await
    .map_err(|e| BinderError::from_io_endpoint(e, &endpoint))?;
  tracing::info!(path = ?path, mode = format_args!("{:o}", mode), "Broker socket bound");
  Ok(listener)
}

pub async fn connect(path: &Path) -> Result<UnixStream, BinderError> {
  let endpoint = path.display().to_string();
  let stream = UnixStream::connect(path)
    .await
    .map_err(|e| BinderError::from_io_endpoint(e, &endpoint))?;
  tracing::debug!(path = ?path, "Connected to broker");
  Ok(stream)
}

/// Best-effort removal of a socket file.
pub fn remove_socket_file(path: &Path) {
  match std::fs::remove_file(path) {
    Ok(_) => tracing::debug!(path = ?path, "Removed socket file"),
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to remove socket file"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn unique_path() -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("rbinder_ipc_{}_{}.sock", std::process::id(), n))
  }

  #[tokio::test]
  async fn bind_leaves_regular_files_alone() {
    let path = unique_path();
    std::fs::write(&path, b"precious data").unwrap();

    let result = bind(&path, 0o600).await;
    assert!(matches!(result, Err(BinderError::AddrInUse(_))));
    assert_eq!(std::fs::read(&path).unwrap(), b"precious data");
    std::fs::remove_file(&path).unwrap();
  }

  #[tokio::test]
  async fn bind_replaces_a_stale_socket() {
    let path = unique_path();
    let stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
    drop(stale);
    assert!(path.exists());

    let listener = bind(&path, 0o600).await.unwrap();
    let _client = connect(&path).await.unwrap();
    drop(listener);
    remove_socket_file(&path);
  }

  #[tokio::test]
  async fn bind_refuses_a_live_socket() {
    let path = unique_path();
    let _live = bind(&path, 0o600).await.unwrap();
    assert!(matches!(bind(&path, 0o600).await, Err(BinderError::AddrInUse(_))));
    remove_socket_file(&path);
  }
}
