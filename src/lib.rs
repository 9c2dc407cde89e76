//! rbinder - Binder-style IPC between processes over a Unix domain socket.
//!
//! A broker ([`Server`]) routes transactions between connected [`Client`]s,
//! translating object references as they cross process boundaries.

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod object;
pub mod parcel;
pub mod protocol;
pub mod server;
pub mod service_manager;
pub mod status;
pub mod transport;

// Re-export core types for user convenience
pub use client::{Client, LogMessageHandler, State};
pub use config::{ClientConfig, ServerConfig};
pub use error::BinderError;
pub use object::{DeathRecipient, LocalObject, Object, RemoteObject, TransactionHandler};
pub use parcel::{ParcelReader, ParcelWriter};
pub use protocol::{Message, MessageType, TransactionData, TransactionFlags};
pub use server::Server;
pub use service_manager::{ServiceManager, ServiceManagerProxy};
pub use status::Status;

// --- Top-Level Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}
