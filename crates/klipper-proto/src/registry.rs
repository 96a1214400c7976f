//! Dynamic mapping of command/response names to message ids.
//!
//! Klipper does not use fixed ids for its commands: the host and MCU agree
//! on a numeric id per named, printf-style format string at connect time.
//! `CommandRegistry` owns that mapping; `CommandFormat` is the symbolic
//! handle component 2 of the coordination layer hands out (`lookup_command`
//! in the original), carrying both the assigned message id and enough of
//! the parsed format to encode arguments or decode a payload against it.

#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;
#[cfg(feature = "alloc")]
use alloc::string::{String, ToString};
#[cfg(feature = "alloc")]
use alloc::vec::Vec;
#[cfg(feature = "std")]
use std::collections::BTreeMap;
#[cfg(feature = "std")]
use std::string::{String, ToString};
#[cfg(feature = "std")]
use std::vec::Vec;

use crate::params::Params;
use crate::wire::{decode_vlq, encode_vlq};
use crate::Error;

/// The wire type of one parameter in a command/response format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// `%c` / `%u` / `%hu` — encoded as an unsigned VLQ.
    Unsigned,
    /// `%hi` — encoded as a signed VLQ.
    Signed,
    /// `%s` appearing in a *command* format — a pin name. By the time the
    /// command is binary-encoded the name has already been resolved to a
    /// numeric pin id by pin-table substitution, so on the wire it is an
    /// unsigned VLQ like any other integer field.
    PinName,
    /// `%s` appearing in a *response* format — a short text field such as
    /// a shutdown reason, encoded as a VLQ length followed by UTF-8 bytes.
    Str,
}

fn param_type_for_marker(marker: &str) -> Option<ParamType> {
    match marker {
        "%c" | "%u" | "%hu" => Some(ParamType::Unsigned),
        "%hi" | "%i" => Some(ParamType::Signed),
        "%s" => Some(ParamType::PinName),
        _ => None,
    }
}

/// A parsed command or response format, bound to an assigned message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFormat {
    pub msgid: u8,
    pub name: String,
    pub params: Vec<(String, ParamType)>,
}

impl CommandFormat {
    /// Parses a format string such as
    /// `"queue_step oid=%c interval=%u count=%hu add=%hi"`.
    pub fn parse(msgid: u8, format: &str) -> Self {
        let mut tokens = format.split_whitespace();
        let name = tokens.next().unwrap_or_default().to_string();
        let mut params = Vec::new();
        for tok in tokens {
            if let Some((key, marker)) = tok.split_once('=') {
                if let Some(ty) = param_type_for_marker(marker) {
                    params.push((key.to_string(), ty));
                }
            }
        }
        CommandFormat { msgid, name, params }
    }

    /// A response format's `%s` fields are genuine text, not pin names —
    /// used for `shutdown`/`is_shutdown`'s `#msg` equivalent parameter.
    pub fn as_response(mut self) -> Self {
        for (_, ty) in self.params.iter_mut() {
            if *ty == ParamType::PinName {
                *ty = ParamType::Str;
            }
        }
        self
    }

    /// Encodes this format's message id followed by `values` in order.
    /// Every declared parameter must have a corresponding value, regardless
    /// of its type — `Str` values are passed as their UTF-8 bytes.
    pub fn encode(&self, values: &[ParamValue]) -> Result<Vec<u8>, Error> {
        if values.len() != self.params.len() {
            return Err(Error::MissingParam);
        }
        let mut out = Vec::with_capacity(1 + values.len() * 2);
        out.push(self.msgid);
        for (value, (_, ty)) in values.iter().zip(self.params.iter()) {
            match (value, ty) {
                (ParamValue::Int(v), ParamType::Unsigned | ParamType::Signed | ParamType::PinName) => {
                    encode_vlq(*v, &mut out);
                }
                (ParamValue::Str(s), ParamType::Str) => {
                    encode_vlq(s.len() as i64, &mut out);
                    out.extend_from_slice(s.as_bytes());
                }
                _ => return Err(Error::InvalidPayload),
            }
        }
        Ok(out)
    }

    /// Parses a resolved config-command text line (`"name key=val ..."`)
    /// and encodes it against this format. The command name in `text` must
    /// match; parameters may appear in any order.
    pub fn encode_text(&self, text: &str) -> Result<Vec<u8>, Error> {
        let mut tokens = text.split_whitespace();
        let name = tokens.next().ok_or(Error::InvalidPayload)?;
        if name != self.name {
            return Err(Error::NameMismatch);
        }
        let mut kv = BTreeMap::new();
        for tok in tokens {
            let (k, v) = tok.split_once('=').ok_or(Error::InvalidPayload)?;
            kv.insert(k, v);
        }
        let mut values = Vec::with_capacity(self.params.len());
        for (pname, ty) in &self.params {
            let raw = kv.get(pname.as_str()).ok_or(Error::MissingParam)?;
            let value = match ty {
                ParamType::Str => ParamValue::Str((*raw).to_string()),
                _ => ParamValue::Int(raw.parse::<i64>().map_err(|_| Error::InvalidPayload)?),
            };
            values.push(value);
        }
        self.encode(&values)
    }

    /// Decodes a response payload (message id already stripped) into a
    /// [`Params`] map.
    pub fn decode(&self, payload: &[u8]) -> Result<Params, Error> {
        let mut data = payload;
        let mut params = Params::new();
        for (name, ty) in &self.params {
            match ty {
                ParamType::Str => {
                    let (len, consumed) = decode_vlq(data).ok_or(Error::IncompleteFrame)?;
                    data = &data[consumed..];
                    let len = len as usize;
                    if data.len() < len {
                        return Err(Error::IncompleteFrame);
                    }
                    let s = core::str::from_utf8(&data[..len]).map_err(|_| Error::InvalidPayload)?;
                    params.set_str(name.clone(), s);
                    data = &data[len..];
                }
                _ => {
                    let (v, consumed) = decode_vlq(data).ok_or(Error::IncompleteFrame)?;
                    params.set_int(name.clone(), v);
                    data = &data[consumed..];
                }
            }
        }
        Ok(params)
    }
}

/// A value to encode against a [`CommandFormat`] parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Int(i64),
    Str(String),
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

/// Owns the name→id and id→format mapping negotiated (or, here, statically
/// seeded) for a connection.
#[derive(Debug, Default, Clone)]
pub struct CommandRegistry {
    by_name: BTreeMap<String, CommandFormat>,
    by_id: BTreeMap<u8, CommandFormat>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a command format, assigning it the next sequential id.
    /// Registration order is what fixes message ids, so callers that need
    /// deterministic ids across runs must register in a stable order.
    pub fn register_command(&mut self, format: &str) -> CommandFormat {
        let msgid = self.by_id.len() as u8;
        let parsed = CommandFormat::parse(msgid, format);
        self.insert(parsed.clone());
        parsed
    }

    /// As [`register_command`](Self::register_command), but marks `%s`
    /// fields as real text rather than pin names — use for response
    /// formats (`shutdown`, `end_stop_state`, ...).
    pub fn register_response(&mut self, format: &str) -> CommandFormat {
        let msgid = self.by_id.len() as u8;
        let parsed = CommandFormat::parse(msgid, format).as_response();
        self.insert(parsed.clone());
        parsed
    }

    fn insert(&mut self, format: CommandFormat) {
        self.by_name.insert(format.name.clone(), format.clone());
        self.by_id.insert(format.msgid, format);
    }

    pub fn lookup_command(&self, name: &str) -> Option<&CommandFormat> {
        self.by_name.get(name)
    }

    pub fn lookup_by_id(&self, msgid: u8) -> Option<&CommandFormat> {
        self.by_id.get(&msgid)
    }

    /// Compiles a resolved config-command text line into its binary
    /// encoding by looking up the format named by the line's first token.
    pub fn create_command(&self, text: &str) -> Result<Vec<u8>, Error> {
        let name = text.split_whitespace().next().ok_or(Error::InvalidPayload)?;
        let format = self.lookup_command(name).ok_or(Error::UnknownCommand)?;
        format.encode_text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_params_in_order() {
        let fmt = CommandFormat::parse(5, "queue_step oid=%c interval=%u count=%hu add=%hi");
        assert_eq!(fmt.name, "queue_step");
        assert_eq!(
            fmt.params,
            vec![
                ("oid".to_string(), ParamType::Unsigned),
                ("interval".to_string(), ParamType::Unsigned),
                ("count".to_string(), ParamType::Unsigned),
                ("add".to_string(), ParamType::Signed),
            ]
        );
    }

    #[test]
    fn encode_text_is_order_independent() {
        let fmt = CommandFormat::parse(
            3,
            "config_stepper oid=%c step_pin=%s dir_pin=%s min_stop_interval=%u invert_step=%c",
        );
        let a = fmt
            .encode_text("config_stepper oid=0 step_pin=5 dir_pin=6 min_stop_interval=200 invert_step=0")
            .unwrap();
        let b = fmt
            .encode_text("config_stepper invert_step=0 dir_pin=6 min_stop_interval=200 step_pin=5 oid=0")
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decode_roundtrips_encode() {
        let fmt = CommandFormat::parse(7, "end_stop_query oid=%c");
        let encoded = fmt.encode(&[ParamValue::Int(3)]).unwrap();
        let params = fmt.decode(&encoded[1..]).unwrap();
        assert_eq!(params.get_i64("oid"), Some(3));
    }

    #[test]
    fn registry_assigns_sequential_ids() {
        let mut reg = CommandRegistry::new();
        let a = reg.register_command("allocate_oids count=%u");
        let b = reg.register_command("finalize_config crc=%u");
        assert_eq!(a.msgid, 0);
        assert_eq!(b.msgid, 1);
        assert_eq!(reg.lookup_command("finalize_config").unwrap().msgid, 1);
        assert_eq!(reg.lookup_by_id(0).unwrap().name, "allocate_oids");
    }

    #[test]
    fn unknown_command_name_is_an_error() {
        let reg = CommandRegistry::new();
        assert_eq!(reg.create_command("nope oid=1"), Err(Error::UnknownCommand));
    }

    #[test]
    fn response_str_field_round_trips() {
        let fmt = CommandFormat::parse(9, "shutdown reason=%s").as_response();
        let encoded = fmt
            .encode(&[ParamValue::Str("endstop triggered early".to_string())])
            .unwrap();
        let params = fmt.decode(&encoded[1..]).unwrap();
        assert_eq!(params.get_str("reason"), Some("endstop triggered early"));
    }
}
