//! Parses the MCU-relevant slice of `printer.cfg` (spec §3): the
//! `[mcu]` section only. Kinematics, heater, and stepper-geometry
//! sections belong to a host application layered on top of this crate
//! and are intentionally not modeled here.

use anyhow::{Context, Result};
use configparser::ini::Ini;
use std::path::Path;

/// The `[mcu]` section: connection parameters plus the two free-form
/// fields klippy passes through unmodified (`custom` g-code fragments
/// sent verbatim at connect time, and an optional `pin_map` override for
/// boards whose pin names don't match the MCU's built-in table).
#[derive(Debug, Clone, Default)]
pub struct McuConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub custom: Option<String>,
    pub pin_map: Option<String>,
}

impl McuConfig {
    /// Loads just the `[mcu]` section from a `printer.cfg`-style INI
    /// file. `serial`/`baud` are required; `custom`/`pin_map` are
    /// optional.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Ini::new();
        config
            .load(path)
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("failed to load configuration file: {path:?}"))?;
        Self::from_ini(&config)
    }

    fn from_ini(config: &Ini) -> Result<Self> {
        Ok(McuConfig {
            serial_port: config.get("mcu", "serial").context("[mcu] serial not found")?,
            baud_rate: config.getuint("mcu", "baud").map_err(|e| anyhow::anyhow!(e))?.unwrap_or(250_000) as u32,
            custom: config.get("mcu", "custom"),
            pin_map: config.get("mcu", "pin_map"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<McuConfig> {
        let mut config = Ini::new();
        config.read(text.to_string()).map_err(|e| anyhow::anyhow!(e))?;
        McuConfig::from_ini(&config)
    }

    #[test]
    fn loads_required_and_optional_fields() {
        let config = parse("[mcu]\nserial: /dev/ttyUSB0\nbaud: 250000\npin_map: arduino\n").unwrap();
        assert_eq!(config.serial_port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 250_000);
        assert_eq!(config.pin_map.as_deref(), Some("arduino"));
        assert!(config.custom.is_none());
    }

    #[test]
    fn missing_serial_is_an_error() {
        assert!(parse("[mcu]\nbaud: 250000\n").is_err());
    }

    #[test]
    fn baud_defaults_when_absent() {
        let config = parse("[mcu]\nserial: /dev/ttyUSB0\n").unwrap();
        assert_eq!(config.baud_rate, 250_000);
    }
}
