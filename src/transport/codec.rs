// src/transport/codec.rs

use crate::constants::MAX_FRAME_SIZE;
use crate::error::BinderError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const LENGTH_PREFIX: usize = 2;

/// Length-prefixed framing used on every broker connection:
/// a big-endian `u16` length followed by exactly that many bytes.
///
/// A frame holds one or more packed envelopes; splitting them is the
/// job of `MessageParser`, not the codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessengerCodec {
  // Length of the frame whose body we are waiting for.
  pending_len: Option<usize>,
}

impl MessengerCodec {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Decoder for MessengerCodec {
  type Item = Bytes;
  type Error = BinderError;

  fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
    let len = match self.pending_len {
      Some(len) => len,
      None => {
        if src.len() < LENGTH_PREFIX {
          return Ok(None);
        }
        let len = src.get_u16() as usize;
        self.pending_len = Some(len);
        len
      }
    };

    if src.len() < len {
      src.reserve(len - src.len());
      return Ok(None);
    }

    self.pending_len = None;
    Ok(Some(src.split_to(len).freeze()))
  }
}

impl Encoder<Bytes> for MessengerCodec {
  type Error = BinderError;

  fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
    if item.len() > MAX_FRAME_SIZE {
      return Err(BinderError::FrameTooLarge(item.len()));
    }
    dst.reserve(LENGTH_PREFIX + item.len());
    dst.put_u16(item.len() as u16);
    dst.extend_from_slice(&item);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frames_are_be_length_prefixed() {
    let mut codec = MessengerCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(Bytes::from_static(b"hello"), &mut buf).unwrap();
    assert_eq!(&buf[..2], &[0x00, 0x05]);
    assert_eq!(&buf[2..], b"hello");
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Bytes::from_static(b"hello")));
    assert!(buf.is_empty());
  }

  #[test]
  fn decode_waits_for_the_whole_frame() {
    let mut codec = MessengerCodec::new();
    let mut buf = BytesMut::from(&[0x00][..]);
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    buf.extend_from_slice(&[0x03, b'a']);
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    buf.extend_from_slice(b"bc");
    buf.extend_from_slice(&[0x00, 0x00]);
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Bytes::from_static(b"abc")));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Bytes::new()));
  }

  #[test]
  fn oversized_frames_are_rejected_without_writing() {
    let mut codec = MessengerCodec::new();
    let mut buf = BytesMut::new();
    let big = Bytes::from(vec![0u8; MAX_FRAME_SIZE + 1]);
    assert!(matches!(codec.encode(big, &mut buf), Err(BinderError::FrameTooLarge(_))));
    assert!(buf.is_empty());
    codec.encode(Bytes::from(vec![1u8; MAX_FRAME_SIZE]), &mut buf).unwrap();
    assert_eq!(buf.len(), MAX_FRAME_SIZE + 2);
  }
}
