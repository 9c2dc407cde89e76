// src/status.rs

//! Wire status codes carried in `Status` messages and status-only transactions.

use thiserror::Error;

/// Outcome of a broker or object operation as it travels on the wire.
///
/// The numeric values follow the errno-aliased codes used by the Binder
/// userspace stack so replies stay byte-compatible across implementations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
  #[error("ok")]
  Ok = 0,
  #[error("unknown-error")]
  UnknownError = i32::MIN,
  #[error("no-memory")]
  NoMemory = -12,
  #[error("invalid-operation")]
  InvalidOperation = -38,
  #[error("bad-value")]
  BadValue = -22,
  #[error("bad-type")]
  BadType = i32::MIN + 1,
  #[error("name-not-found")]
  NameNotFound = -2,
  #[error("permission-denied")]
  PermissionDenied = -1,
  #[error("no-init")]
  NoInit = -19,
  #[error("already-exists")]
  AlreadyExists = -17,
  #[error("dead-object")]
  DeadObject = -32,
  #[error("failed-transaction")]
  FailedTransaction = i32::MIN + 2,
  #[error("bad-index")]
  BadIndex = -75,
  #[error("not-enough-data")]
  NotEnoughData = -61,
  #[error("would-block")]
  WouldBlock = -11,
  #[error("timed-out")]
  TimedOut = -110,
  #[error("unknown-transaction")]
  UnknownTransaction = -74,
  #[error("fds-not-allowed")]
  FdsNotAllowed = i32::MIN + 7,
  #[error("unexpected-null")]
  UnexpectedNull = i32::MIN + 8,
}

impl Status {
  /// Decodes a wire value. Codes this implementation does not know map to
  /// `UnknownError` rather than failing, a peer may be newer than us.
  pub fn from_i32(value: i32) -> Self {
    match value {
      0 => Status::Ok,
      -12 => Status::NoMemory,
      -38 => Status::InvalidOperation,
      -22 => Status::BadValue,
      -2 => Status::NameNotFound,
      -1 => Status::PermissionDenied,
      -19 => Status::NoInit,
      -17 => Status::AlreadyExists,
      -32 => Status::DeadObject,
      -75 => Status::BadIndex,
      -61 => Status::NotEnoughData,
      -11 => Status::WouldBlock,
      -110 => Status::TimedOut,
      -74 => Status::UnknownTransaction,
      v if v == i32::MIN + 1 => Status::BadType,
      v if v == i32::MIN + 2 => Status::FailedTransaction,
      v if v == i32::MIN + 7 => Status::FdsNotAllowed,
      v if v == i32::MIN + 8 => Status::UnexpectedNull,
      _ => Status::UnknownError,
    }
  }

  #[inline]
  pub fn as_i32(self) -> i32 {
    self as i32
  }

  #[inline]
  pub fn is_ok(self) -> bool {
    self == Status::Ok
  }

  /// `Ok` becomes `Ok(())`, every other code becomes an error.
  pub fn into_result(self) -> Result<(), Status> {
    match self {
      Status::Ok => Ok(()),
      other => Err(other),
    }
  }

  /// Collapses a status-returning result back into a single wire code.
  pub fn from_result(result: Result<(), Status>) -> Self {
    match result {
      Ok(()) => Status::Ok,
      Err(status) => status,
    }
  }
}

impl From<Status> for i32 {
  fn from(status: Status) -> i32 {
    status.as_i32()
  }
}
