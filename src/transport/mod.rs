// src/transport/mod.rs

//! The framed socket transport ("messenger") under every connection.

pub mod codec;
pub mod ipc;

pub use codec::MessengerCodec;

use crate::error::BinderError;
use crate::protocol::Message;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

pub type FramedStream = Framed<UnixStream, MessengerCodec>;
pub type FrameSink = SplitSink<FramedStream, Bytes>;

pub fn framed(stream: UnixStream) -> FramedStream {
  Framed::new(stream, MessengerCodec::new())
}

/// Drains `outbound` onto the socket, one message per frame, until the
/// queue closes or the socket fails. Oversized messages are dropped with a
/// warning; any other write error ends the loop.
pub(crate) async fn write_loop(mut sink: FrameSink, outbound: async_channel::Receiver<Message>, peer: &str) {
  while let Ok(msg) = outbound.recv().await {
    let frame = match msg.pack() {
      Ok(frame) => frame,
      Err(e) => {
        tracing::warn!(peer = peer, msg = %msg, error = %e, "Dropping message that cannot be packed");
        continue;
      }
    };
    tracing::trace!(peer = peer, msg = %msg, "Writing message");
    match sink.send(frame).await {
      Ok(()) => {}
      Err(BinderError::FrameTooLarge(size)) => {
        tracing::warn!(peer = peer, msg = %msg, size = size, "Dropping message larger than a frame");
      }
      Err(e) => {
        tracing::debug!(peer = peer, error = %e, "Write failed, closing writer");
        break;
      }
    }
  }
  let _ = sink.close().await;
  tracing::trace!(peer = peer, "Writer finished");
}
