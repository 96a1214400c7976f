//! Host-side coordination layer for a Klipper-style MCU: config
//! negotiation, print-time/MCU-clock translation, the object-oriented
//! command types (`Stepper`, `Endstop`, `DigitalOut`, `Pwm`, `Adc`,
//! `PrinterFan`), and the homing/shutdown/comm-timeout protocols that
//! tie them together.
//!
//! Wire framing, step compression and multi-queue flush scheduling live
//! in the sibling [`klipper_proto`] and [`klipper_stepcompress`] crates;
//! this crate is the layer that drives them on behalf of a higher-level
//! application (G-code dispatch, kinematics, a web API) that isn't part
//! of this workspace.

pub mod adc;
pub mod config;
pub mod digital_out;
pub mod endstop;
pub mod error;
pub mod fan;
pub mod mcu;
pub mod pins;
pub mod pwm;
pub mod reactor;
pub mod serial;
pub mod stepper;

pub use error::McuError;
pub use mcu::McuController;
