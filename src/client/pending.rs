// src/client/pending.rs

use crate::error::BinderError;
use crate::protocol::{Message, MessageType};
use crate::status::Status;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

struct PendingCall {
  msg_type: MessageType,
  one_way: bool,
  reply_tx: oneshot::Sender<Message>,
}

#[derive(Default)]
struct Calls {
  calls: HashMap<u64, PendingCall>,
  closed: bool,
}

/// Blocking calls waiting for their reply, keyed by the cookie they were sent with.
#[derive(Default)]
pub(crate) struct PendingCalls {
  inner: Mutex<Calls>,
}

impl PendingCalls {
  pub(crate) fn register(
    &self,
    cookie: u64,
    msg_type: MessageType,
    one_way: bool,
  ) -> Result<oneshot::Receiver<Message>, BinderError> {
    let mut inner = self.inner.lock();
    if inner.closed {
      return Err(BinderError::NotConnected);
    }
    if inner.calls.contains_key(&cookie) {
      return Err(BinderError::Internal(format!("cookie {} is already awaiting a reply", cookie)));
    }
    let (reply_tx, reply_rx) = oneshot::channel();
    inner.calls.insert(
      cookie,
      PendingCall {
        msg_type,
        one_way,
        reply_tx,
      },
    );
    Ok(reply_rx)
  }

  pub(crate) fn cancel(&self, cookie: u64) {
    self.inner.lock().calls.remove(&cookie);
  }

  /// Offers an inbound message to the waiting calls.
  ///
  /// Returns the message back if it is not a reply at all. Replies whose
  /// call is gone (it timed out) are dropped. The broker's `Ok`
  /// acknowledgement of a two-way transaction is swallowed here; the call
  /// stays pending until the `TransactionReply` arrives.
  pub(crate) fn resolve(&self, msg: Message) -> Result<(), Message> {
    match msg.msg_type() {
      MessageType::Status | MessageType::TransactionReply => {}
      _ => return Err(msg),
    }
    let mut inner = self.inner.lock();
    let cookie = msg.cookie();
    let Some(call) = inner.calls.get(&cookie) else {
      tracing::trace!(cookie = cookie, msg_type = %msg.msg_type(), "Dropping reply for a call nobody awaits");
      return Ok(());
    };

    if msg.msg_type() == MessageType::Status
      && call.msg_type == MessageType::Transaction
      && !call.one_way
      && matches!(msg.read_status(), Ok(Status::Ok))
    {
      tracing::trace!(cookie = cookie, "Transaction delivered, awaiting reply");
      return Ok(());
    }

    if let Some(call) = inner.calls.remove(&cookie) {
      // The waiter may have timed out in the meantime.
      let _ = call.reply_tx.send(msg);
    }
    Ok(())
  }

  /// Wakes every waiter with a failure and refuses further registrations.
  pub(crate) fn fail_all(&self) {
    let mut inner = self.inner.lock();
    inner.closed = true;
    let failed = inner.calls.len();
    inner.calls.clear();
    if failed > 0 {
      tracing::debug!(calls = failed, "Failed pending calls on disconnect");
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.inner.lock().calls.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::protocol::TransactionData;

  fn reply(cookie: u64) -> Message {
    Message::new(MessageType::TransactionReply)
      .with_cookie(cookie)
      .with_payload(TransactionData::from_status(Status::Ok).pack().unwrap())
  }

  #[test]
  fn two_way_transaction_waits_past_ok_ack() {
    let pending = PendingCalls::default();
    let mut rx = pending.register(1, MessageType::Transaction, false).unwrap();
    assert!(pending.resolve(Message::status(1, Status::Ok)).is_ok());
    assert!(rx.try_recv().is_err());
    assert_eq!(pending.len(), 1);

    pending.resolve(reply(1)).unwrap();
    assert_eq!(rx.try_recv().unwrap().msg_type(), MessageType::TransactionReply);
    assert_eq!(pending.len(), 0);
  }

  #[test]
  fn failing_ack_resolves_two_way_transaction() {
    let pending = PendingCalls::default();
    let mut rx = pending.register(2, MessageType::Transaction, false).unwrap();
    pending.resolve(Message::status(2, Status::NameNotFound)).unwrap();
    assert_eq!(rx.try_recv().unwrap().read_status().unwrap(), Status::NameNotFound);
  }

  #[test]
  fn one_way_and_plain_calls_resolve_on_ack() {
    let pending = PendingCalls::default();
    let mut one_way = pending.register(3, MessageType::Transaction, true).unwrap();
    let mut acquire = pending.register(4, MessageType::Acquire, false).unwrap();
    pending.resolve(Message::status(3, Status::Ok)).unwrap();
    pending.resolve(Message::status(4, Status::Ok)).unwrap();
    assert!(one_way.try_recv().is_ok());
    assert!(acquire.try_recv().is_ok());
  }

  #[test]
  fn non_replies_are_handed_back() {
    let pending = PendingCalls::default();
    let _rx = pending.register(5, MessageType::Acquire, false).unwrap();
    let incoming = Message::new(MessageType::Transaction).with_cookie(5);
    assert!(pending.resolve(incoming).is_err());
    assert_eq!(pending.len(), 1);
  }

  #[test]
  fn late_replies_for_cancelled_calls_are_dropped() {
    let pending = PendingCalls::default();
    let _rx = pending.register(6, MessageType::Transaction, false).unwrap();
    pending.cancel(6);
    assert!(pending.resolve(Message::status(6, Status::Ok)).is_ok());
    assert!(pending.resolve(reply(6)).is_ok());
    assert!(pending.resolve(reply(60)).is_ok());
    assert_eq!(pending.len(), 0);
  }

  #[test]
  fn fail_all_wakes_waiters_and_closes() {
    let pending = PendingCalls::default();
    let mut rx = pending.register(7, MessageType::Acquire, false).unwrap();
    pending.fail_all();
    assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
    assert!(matches!(
      pending.register(8, MessageType::Acquire, false),
      Err(BinderError::NotConnected)
    ));
  }
}
