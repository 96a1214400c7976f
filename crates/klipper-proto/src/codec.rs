//! `tokio_util::codec` framing for the Klipper wire format.
//!
//! This module only available with the `std` feature. It frames/deframes
//! raw `(seq, msgid, payload)` triples; turning those into typed
//! [`crate::params::Params`] is the registry's job, kept separate so the
//! codec has no dependency on which formats happen to be registered.

#![cfg(feature = "std")]

use crate::parser::{encode_frame, Parser};
use crate::Error;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// An owned, decoded frame — the `Decoder` output can't borrow from the
/// codec's internal buffer, so this copies the payload out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage {
    pub seq: u8,
    pub msgid: u8,
    pub payload: Vec<u8>,
}

/// A frame ready to be written to the transport: message id plus an
/// already wire-encoded payload, typically produced by
/// [`crate::registry::CommandFormat::encode`] or `::encode_text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFrame {
    pub seq: u8,
    pub msgid: u8,
    pub payload: Vec<u8>,
}

/// A codec for encoding and decoding Klipper protocol frames.
#[derive(Debug, Default)]
pub struct KlipperCodec {
    parser: Parser,
}

impl KlipperCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Encoder<OutgoingFrame> for KlipperCodec {
    type Error = Error;

    fn encode(&mut self, item: OutgoingFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = encode_frame(item.seq, item.msgid, &item.payload);
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

impl Decoder for KlipperCodec {
    type Item = OwnedMessage;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.parser.parse(src) {
                Ok(Some((msg, consumed))) => {
                    let owned = OwnedMessage {
                        seq: msg.seq,
                        msgid: msg.msgid,
                        payload: msg.payload.to_vec(),
                    };
                    src.advance(consumed);
                    return Ok(Some(owned));
                }
                Ok(None) => return Ok(None),
                Err((_, skip)) => {
                    // Recoverable framing error (bad CRC, truncated
                    // header): drop the offending prefix and try again
                    // against what remains.
                    src.advance(skip);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_codec() {
        let mut codec = KlipperCodec::new();
        let mut buf = BytesMut::new();
        let frame = OutgoingFrame { seq: 4, msgid: 7, payload: vec![1, 2, 3] };
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.seq, 4);
        assert_eq!(decoded.msgid, 7);
        assert_eq!(decoded.payload, vec![1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_more_data_on_partial_frame() {
        let mut codec = KlipperCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(OutgoingFrame { seq: 0, msgid: 1, payload: vec![9, 9] }, &mut buf)
            .unwrap();
        let mut partial = buf.split_to(buf.len() - 1);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
    }

    #[test]
    fn decode_skips_bad_crc_and_recovers() {
        let mut codec = KlipperCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(OutgoingFrame { seq: 0, msgid: 1, payload: vec![1] }, &mut buf)
            .unwrap();
        let len = buf.len();
        buf[len - 1] ^= 0xff; // corrupt CRC low byte
        codec
            .encode(OutgoingFrame { seq: 1, msgid: 2, payload: vec![2] }, &mut buf)
            .unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.msgid, 2);
    }
}
