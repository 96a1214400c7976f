//! The decoded parameter map for a received response.
//!
//! Klipper responses are untyped name/value bags at the host layer — the
//! same `params` dict shape the Python implementation passes to every
//! message callback. `#`-prefixed keys (`#sent_time`, `#name`, `#msg`) are
//! injected by the transport layer rather than carried in the wire payload.

#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;
#[cfg(feature = "alloc")]
use alloc::string::String;
#[cfg(feature = "std")]
use std::collections::BTreeMap;

/// A decoded response's fields, keyed by parameter name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Params {
    ints: BTreeMap<String, i64>,
    strs: BTreeMap<String, String>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_int(&mut self, name: impl Into<String>, value: i64) {
        self.ints.insert(name.into(), value);
    }

    pub fn set_str(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.strs.insert(name.into(), value.into());
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.ints.get(name).copied()
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get_i64(name).map(|v| v as u32)
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        self.get_i64(name).map(|v| v as i32)
    }

    /// Like `get_i64`, but returns `default` rather than `None` for a
    /// missing key — mirrors Python's `params.get(name, default)`.
    pub fn get_i64_or(&self, name: &str, default: i64) -> i64 {
        self.get_i64(name).unwrap_or(default)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.strs.get(name).map(|s| s.as_str())
    }
}
