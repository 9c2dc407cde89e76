// src/protocol/parser.rs

use crate::protocol::message::Message;
use bytes::Bytes;

/// Splits a frame holding concatenated envelopes into messages.
///
/// `next` yields `None` as soon as the remaining bytes cannot form a full
/// message; it never panics on short or garbled input.
#[derive(Debug)]
pub struct MessageParser {
  buf: Bytes,
  offset: usize,
}

impl MessageParser {
  pub fn new(buf: Bytes) -> Self {
    Self { buf, offset: 0 }
  }

  /// Bytes not yet consumed by a successful `next`.
  pub fn remaining(&self) -> usize {
    self.buf.len().saturating_sub(self.offset)
  }
}

impl Iterator for MessageParser {
  type Item = Message;

  fn next(&mut self) -> Option<Message> {
    if self.remaining() == 0 {
      return None;
    }
    match Message::unpack(&self.buf, self.offset) {
      Ok((msg, consumed)) => {
        self.offset += consumed;
        Some(msg)
      }
      Err(e) => {
        tracing::trace!(offset = self.offset, remaining = self.remaining(), error = %e, "Trailing bytes do not form a message");
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::protocol::message::MessageType;
  use crate::status::Status;
  use bytes::BytesMut;

  #[test]
  fn yields_every_concatenated_message() {
    let a = Message::new(MessageType::Acquire).with_cookie(1).with_payload(Bytes::from_static(&[1, 0, 0, 0, 0, 0, 0, 0]));
    let b = Message::status(2, Status::Ok);
    let c = Message::new(MessageType::SetMonitor).with_cookie(3);
    let mut buf = BytesMut::new();
    for m in [&a, &b, &c] {
      m.pack_into(&mut buf).unwrap();
    }
    let parsed: Vec<Message> = MessageParser::new(buf.freeze()).collect();
    assert_eq!(parsed, vec![a, b, c]);
  }

  #[test]
  fn stops_at_truncated_tail() {
    let a = Message::status(1, Status::Ok);
    let mut buf = BytesMut::new();
    a.pack_into(&mut buf).unwrap();
    a.pack_into(&mut buf).unwrap();
    let full = buf.freeze();
    let mut parser = MessageParser::new(full.slice(..full.len() - 2));
    assert_eq!(parser.next(), Some(a));
    assert_eq!(parser.next(), None);
    assert_eq!(parser.next(), None);
  }

  #[test]
  fn empty_and_garbage_input_yield_nothing() {
    assert_eq!(MessageParser::new(Bytes::new()).next(), None);
    assert_eq!(MessageParser::new(Bytes::from_static(&[0xff; 5])).next(), None);
  }
}
