use crate::status::Status;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BinderError {
  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  #[error("Invalid argument provided: {0}")]
  InvalidArgument(String),

  // --- Timeouts ---
  #[error("Operation timed out")]
  Timeout,

  // --- Connection/Binding Errors ---
  #[error("Address already in use: {0}")]
  AddrInUse(String),
  #[error("Connection refused by peer: {0}")]
  ConnectionRefused(String),
  #[error("Permission denied for socket path: {0}")]
  PermissionDenied(String),
  #[error("Connection closed by peer or transport")]
  ConnectionClosed,
  #[error("Client is not connected")]
  NotConnected,

  // --- Codec Errors ---
  #[error("Read of {wanted} bytes exceeds the {remaining} remaining")]
  OutOfRange { wanted: usize, remaining: usize },
  #[error("Frame of {0} bytes exceeds the 65535 byte transport limit")]
  FrameTooLarge(usize),
  #[error("Malformed message: {0}")]
  MalformedMessage(String),

  // --- Protocol status carried as an error ---
  #[error("Remote status: {0}")]
  Status(#[from] Status),

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}

impl BinderError {
  /// Maps common `std::io::Error` kinds onto path-aware variants.
  pub fn from_io_endpoint(e: io::Error, endpoint: &str) -> Self {
    match e.kind() {
      io::ErrorKind::AddrInUse => BinderError::AddrInUse(endpoint.to_string()),
      io::ErrorKind::ConnectionRefused => BinderError::ConnectionRefused(endpoint.to_string()),
      io::ErrorKind::PermissionDenied => BinderError::PermissionDenied(endpoint.to_string()),
      io::ErrorKind::TimedOut => BinderError::Timeout,
      io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => {
        BinderError::ConnectionClosed
      }
      _ => BinderError::Io(e),
    }
  }

  /// Folds a crate error into the status code reported to a peer.
  pub fn to_status(&self) -> Status {
    match self {
      BinderError::Status(status) => *status,
      BinderError::OutOfRange { .. } | BinderError::MalformedMessage(_) | BinderError::InvalidArgument(_) => {
        Status::BadValue
      }
      BinderError::FrameTooLarge(_) => Status::NoMemory,
      BinderError::Timeout => Status::TimedOut,
      BinderError::ConnectionClosed | BinderError::NotConnected => Status::DeadObject,
      BinderError::PermissionDenied(_) => Status::PermissionDenied,
      _ => Status::UnknownError,
    }
  }
}

impl From<BinderError> for Status {
  fn from(err: BinderError) -> Status {
    err.to_status()
  }
}
