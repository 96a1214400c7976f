//! Pin-name syntax and the default/user pin tables config commands are
//! resolved against at `build_config` time (spec §4.1, §4.2 step 3).

use std::collections::HashMap;

/// Strips `^` (pullup, only honored when `can_pullup`) then `!` (invert)
/// prefixes from a pin name, trimming whitespace left behind by each
/// strip. Unknown prefixes are left in place — they are not this layer's
/// problem, they simply fail later at pin-table lookup.
pub fn parse_pin_extras(pin: &str, can_pullup: bool) -> (String, bool, bool) {
    let mut rest = pin;
    let mut pullup = false;
    if can_pullup {
        if let Some(stripped) = rest.strip_prefix('^') {
            pullup = true;
            rest = stripped.trim_start();
        }
    }
    let mut invert = false;
    if let Some(stripped) = rest.strip_prefix('!') {
        invert = true;
        rest = stripped.trim_start();
    }
    (rest.trim().to_string(), pullup, invert)
}

/// Maps symbolic pin names to the numeric ids the MCU's config commands
/// actually carry on the wire (`%s` fields in [`klipper_proto::registry`]
/// are resolved to plain integers before encoding).
#[derive(Debug, Clone, Default)]
pub struct PinTable {
    by_name: HashMap<String, u32>,
}

impl PinTable {
    pub fn new() -> Self {
        PinTable { by_name: HashMap::new() }
    }

    pub fn insert(&mut self, name: impl Into<String>, id: u32) {
        self.by_name.insert(name.into(), id);
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// A plausible default table for the `simulavr` MCU identifier used
    /// by [`klipper_proto::commands::Dictionary::simulated`]: four 8-pin
    /// ports, `PA0..PD7`, numbered `port*8 + pin`.
    pub fn default_for(mcu_name: &str) -> Self {
        let mut table = PinTable::new();
        if mcu_name == "simulavr" {
            for (port_idx, port) in ['A', 'B', 'C', 'D'].iter().enumerate() {
                for pin in 0..8u32 {
                    table.insert(format!("P{port}{pin}"), port_idx as u32 * 8 + pin);
                }
            }
        }
        table
    }
}

/// A user-supplied override table (`[mcu] pin_map`), consulted instead of
/// [`PinTable::default_for`] when present.
pub type PinMap = PinTable;

/// Resolves every bare pin name occurring after a `pin=`/`_pin=` key in
/// `command` against `table`, returning the rewritten command text.
/// Returns the offending command unchanged (the caller turns this into a
/// `McuError::Configuration` citing the command text) if any referenced
/// pin name is missing from `table`.
pub fn resolve_pins(command: &str, table: &PinTable) -> Result<String, ()> {
    let mut tokens = command.split_whitespace();
    let mut out = Vec::new();
    if let Some(name) = tokens.next() {
        out.push(name.to_string());
    }
    for tok in tokens {
        match tok.split_once('=') {
            Some((key, value)) if key.ends_with("pin") => {
                let id = table.lookup(value).ok_or(())?;
                out.push(format!("{key}={id}"));
            }
            _ => out.push(tok.to_string()),
        }
    }
    Ok(out.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_pullup_then_invert_when_both_allowed() {
        assert_eq!(
            parse_pin_extras("^! PA3", true),
            ("PA3".to_string(), true, true)
        );
    }

    #[test]
    fn strips_invert_only() {
        assert_eq!(parse_pin_extras("!PA3", false), ("PA3".to_string(), false, true));
    }

    #[test]
    fn pullup_marker_is_left_untouched_when_not_allowed() {
        assert_eq!(parse_pin_extras("^PA3", false), ("^PA3".to_string(), false, false));
    }

    #[test]
    fn resolve_pins_substitutes_step_and_dir_pins() {
        let table = PinTable::default_for("simulavr");
        let resolved =
            resolve_pins("config_stepper oid=0 step_pin=PA0 dir_pin=PA1 min_stop_interval=10 invert_step=0", &table)
                .unwrap();
        assert_eq!(resolved, "config_stepper oid=0 step_pin=0 dir_pin=1 min_stop_interval=10 invert_step=0");
    }

    #[test]
    fn resolve_pins_fails_on_unknown_pin() {
        let table = PinTable::default_for("simulavr");
        assert!(resolve_pins("config_digital_out oid=0 pin=ZZ9 default_value=0 max_duration=0", &table).is_err());
    }
}
