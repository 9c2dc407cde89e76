// src/protocol/mod.rs

//! Wire formats: the message envelope, transaction payloads and the
//! binary primitives both are built from.

pub mod binary;
pub mod flat_object;
pub mod message;
pub mod parser;
pub mod transaction;

pub use binary::{BinaryReader, BinaryWriter};
pub use flat_object::{FlatObject, ObjectKind};
pub use message::{Message, MessageType};
pub use parser::MessageParser;
pub use transaction::{TransactionData, TransactionFlags};
