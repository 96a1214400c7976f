#![deny(clippy::all)]
#![deny(warnings)]

//! A zero-copy, streaming Klipper frame parser.
//!
//! A frame is `[len][seq][msgid][payload...][crc16_be]`, prefixed by a sync
//! byte. `len` counts every byte from `seq` through the CRC, inclusive.
//! Unlike the full protocol parser, this layer doesn't know what any
//! message id *means* — it only finds frame boundaries and validates the
//! checksum. [`crate::registry::CommandRegistry`] turns the resulting
//! `(msgid, payload)` pair into a typed [`crate::params::Params`] map.

#[cfg(feature = "alloc")]
use alloc::vec::Vec;
#[cfg(feature = "std")]
use std::vec::Vec;

use crate::{crc::crc16_ccitt, Error};

/// The sync byte that marks the beginning of every Klipper frame.
pub const SYNC_BYTE: u8 = 0x1d;

/// A raw, decoded frame: a message id and its (still VLQ-encoded) payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage<'a> {
    pub seq: u8,
    pub msgid: u8,
    pub payload: &'a [u8],
}

/// A parser for Klipper's binary frame format.
///
/// Designed to be zero-copy and suitable for `no_std` environments: it
/// processes a byte slice and, if a complete and valid frame is found,
/// returns a [`RawMessage`] borrowing from the input and the number of
/// bytes consumed.
#[derive(Debug, Default)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to parse a single frame from the start of `input`.
    ///
    /// - `Ok(Some((msg, consumed)))` — a valid frame was parsed.
    /// - `Ok(None)` — `input` doesn't yet contain a complete frame; wait for
    ///   more bytes.
    /// - `Err((err, skip))` — a recoverable framing error; the caller
    ///   should advance its buffer by `skip` bytes and retry.
    pub fn parse<'a>(&self, input: &'a [u8]) -> Result<Option<(RawMessage<'a>, usize)>, (Error, usize)> {
        let Some(sync_pos) = input.iter().position(|&b| b == SYNC_BYTE) else {
            return Err((Error::InvalidSync, input.len()));
        };
        let buffer = &input[sync_pos..];
        if buffer.len() < 2 {
            return Ok(None); // not even a length byte + one content byte
        }

        let msg_len = buffer[0] as usize;
        if msg_len < 4 {
            // Too short to hold seq + msgid + crc16.
            return Err((Error::IncompleteFrame, sync_pos + 1));
        }
        if buffer.len() < 1 + msg_len {
            return Ok(None); // incomplete payload
        }

        let frame = &buffer[1..1 + msg_len];
        let (body, crc_bytes) = frame.split_at(msg_len - 2);
        let received_crc = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);
        let calculated_crc = crc16_ccitt(frame, frame.len() - 2);
        if received_crc != calculated_crc {
            return Err((Error::InvalidCrc, sync_pos + 1));
        }

        let seq = body[0];
        let msgid = body[1];
        let payload = &body[2..];
        let consumed = sync_pos + 1 + msg_len;
        Ok(Some((RawMessage { seq, msgid, payload }, consumed)))
    }
}

/// Builds a complete wire frame for `msgid`/`payload`, for use by the send
/// path (the inverse of [`Parser::parse`]).
pub fn encode_frame(seq: u8, msgid: u8, payload: &[u8]) -> Vec<u8> {
    let msg_len = 2 + payload.len() + 2;
    let mut frame = Vec::with_capacity(1 + msg_len);
    frame.push(SYNC_BYTE);
    frame.push(msg_len as u8);
    frame.push(seq);
    frame.push(msgid);
    frame.extend_from_slice(payload);
    let crc = crc16_ccitt(&frame[1..], msg_len - 2);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}
