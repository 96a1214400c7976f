//! Error taxonomy for the host/MCU coordination layer (spec §7).
//!
//! Structural/configuration problems are synchronous: they return an
//! `Err` at the call site (`build_config`, `connect`). Runtime transport
//! problems (comm timeout, MCU-initiated shutdown) instead flow through
//! the reactor as notifications — see [`crate::mcu::McuController::poll_comm_timeout`]
//! and the `note_mcu_error`/`note_shutdown` callbacks a host application
//! would otherwise wire up to its printer object.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum McuError {
    /// Pin-name translation failed while resolving a config command.
    #[error("Unable to translate pin name in command: {0}")]
    Configuration(String),

    /// The MCU echoed back a different CRC than the one the host computed
    /// over its resolved config command list.
    #[error("Printer CRC does not match config (expected {expected:#010x}, got {actual:#010x})")]
    CrcMismatch { expected: u32, actual: u32 },

    /// No clock update was observed for longer than `COMM_TIMEOUT`.
    #[error("Lost communication with firmware")]
    CommTimeout,

    /// The endstop did not trigger before `home_timeout_clock`.
    #[error("Timeout during endstop homing")]
    HomingTimeout,

    /// The MCU is shut down (remote or local); further scheduling is
    /// suppressed. Carries the MCU-supplied (or locally synthesized)
    /// reason string.
    #[error("MCU is shutdown: {0}")]
    Shutdown(String),

    /// A transport-level failure (serial open/write/parse failure) not
    /// covered by the above, more specific variants.
    #[error("Transport error: {0}")]
    Transport(String),
}
