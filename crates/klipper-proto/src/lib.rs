#![deny(clippy::all)]
#![deny(warnings)]
#![cfg_attr(not(feature = "std"), no_std)]

//! # Klipper MCU Protocol
//!
//! A zero-copy implementation of the Klipper MCU binary protocol: a
//! length-prefixed, CRC16-checked frame carrying a message id and a
//! variable-length-quantity-encoded payload, plus the dynamic command
//! registry the host and MCU use to agree on message ids at connect time.
//!
//! ## Key Components
//!
//! - **[`parser`]**: A zero-copy `Parser` that finds frame boundaries in a
//!   continuous byte stream and validates the CRC16 checksum.
//! - **[`wire`]**: Signed VLQ integer encoding, the wire format for every
//!   numeric command/response parameter.
//! - **[`registry`]**: `CommandFormat`/`CommandRegistry` — parses printf-style
//!   format strings (e.g. `"queue_step oid=%c interval=%u count=%hu add=%hi"`)
//!   into a message id and a typed parameter list, and encodes/decodes
//!   against it.
//! - **[`commands`]**: The fixed catalog of MCU command/response format
//!   strings this workspace speaks, plus the constant dictionary normally
//!   read back from the MCU at connect time.
//! - **[`crc`]**: `const fn` CRC16-CCITT (frame integrity) and CRC32 (config
//!   negotiation) implementations.
//! - **[`codec`]** (std only): a `tokio_util::codec` `Encoder`/`Decoder` for
//!   framing pre-encoded command bytes over an async transport.
//!
//! ## Design
//!
//! - **Zero-copy parsing**: `parser::Parser` operates on `&[u8]` and never
//!   allocates.
//! - **Streaming**: partial frames return `Ok(None)`; the caller retries once
//!   more bytes arrive.
//! - **Dynamic ids**: message ids are not fixed at compile time — they are
//!   assigned by registration order in a `CommandRegistry`, mirroring the
//!   dictionary handshake real Klipper firmware performs.

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod codec;
pub mod commands;
pub mod crc;
pub mod params;
pub mod parser;
pub mod registry;
pub mod wire;

/// Common error type for the protocol crate.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// A frame was received that was not long enough to be valid.
    IncompleteFrame,
    /// An invalid frame sync byte (0x1d) was expected but not found.
    InvalidSync,
    /// The CRC-16 checksum of a received frame was invalid.
    InvalidCrc,
    /// The message payload could not be deserialized against its format.
    InvalidPayload,
    /// A buffer was too small for the requested operation.
    BufferTooSmall,
    /// `encode_text` was given a command name that doesn't match the format.
    NameMismatch,
    /// `encode_text` was missing a parameter the format requires.
    MissingParam,
    /// No command is registered under the requested name or message id.
    UnknownCommand,
}

#[cfg(feature = "std")]
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
