//! The fixed catalog of MCU command/response format strings.
//!
//! Real Klipper firmware ships its own dictionary (command formats plus a
//! handful of named constants) that the host reads back at connect time.
//! This workspace doesn't link a C firmware image, so it ships the
//! equivalent dictionary as data: [`CORE_COMMANDS`]/[`CORE_RESPONSES`] are
//! registered onto a [`crate::registry::CommandRegistry`] in a fixed order
//! (giving deterministic message ids), and [`Dictionary`] carries the
//! constant values (`CLOCK_FREQ`, `STATS_SUMSQ_BASE`, `ADC_MAX`, `MCU`)
//! normally queried from the same source.

#[cfg(feature = "alloc")]
use alloc::string::String;
#[cfg(feature = "std")]
use std::string::String;

use crate::registry::CommandRegistry;

/// Command formats sent host→MCU, registered in this exact order.
pub const CORE_COMMANDS: &[&str] = &[
    "allocate_oids count=%u",
    "config_stepper oid=%c step_pin=%s dir_pin=%s min_stop_interval=%u invert_step=%c",
    "config_end_stop oid=%c pin=%s pull_up=%c stepper_oid=%c",
    "config_digital_out oid=%c pin=%s default_value=%c max_duration=%u",
    "config_pwm_out oid=%c pin=%s cycle_ticks=%u default_value=%c max_duration=%u",
    "config_soft_pwm_out oid=%c pin=%s cycle_ticks=%u default_value=%c max_duration=%u",
    "config_analog_in oid=%c pin=%s",
    "finalize_config crc=%u",
    "queue_step oid=%c interval=%u count=%hu add=%hi",
    "set_next_step_dir oid=%c dir=%c",
    "reset_step_clock oid=%c clock=%u",
    "end_stop_home oid=%c clock=%u rest_ticks=%u pin_value=%c",
    "end_stop_query oid=%c",
    "schedule_digital_out oid=%c clock=%u value=%c",
    "schedule_pwm_out oid=%c clock=%u value=%c",
    "schedule_soft_pwm_out oid=%c clock=%u value=%c",
    "query_analog_in oid=%c clock=%u sample_ticks=%u sample_count=%c rest_ticks=%u min_value=%hu max_value=%hu",
    "get_config",
    "emergency_stop",
    "clear_shutdown",
    "stats",
];

/// Response formats sent MCU→host, registered immediately after
/// `CORE_COMMANDS` so ids stay stable and non-overlapping.
pub const CORE_RESPONSES: &[&str] = &[
    "config is_config=%c move_count=%hu crc=%u",
    "end_stop_state oid=%c homing=%c pin=%c pos=%i",
    "analog_in_state oid=%c value=%hu next_clock=%u",
    "shutdown reason=%s",
    "is_shutdown reason=%s",
    "stats_state count=%u sum=%u sumsq=%u",
];

/// Registers [`CORE_COMMANDS`] then [`CORE_RESPONSES`] onto a fresh
/// registry, mirroring the order the real MCU's dictionary would be
/// walked in at connect time.
pub fn build_core_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    for fmt in CORE_COMMANDS {
        registry.register_command(fmt);
    }
    for fmt in CORE_RESPONSES {
        registry.register_response(fmt);
    }
    registry
}

/// Constants normally read from the MCU's identify dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct Dictionary {
    /// MCU clock rate, in Hz. `clock = round(mcu_time * clock_freq)`.
    pub clock_freq: f64,
    /// Scale factor `stats` response `sumsq` fields are pre-multiplied by.
    pub stats_sumsq_base: f64,
    /// Full-scale ADC reading used by `Adc::set_minmax`.
    pub adc_max: f64,
    /// The MCU identifier used to select a pin table.
    pub mcu_name: String,
}

impl Dictionary {
    /// A plausible dictionary for dry runs and tests, standing in for the
    /// real MCU identify response (`connect_file`'s simulated MCU).
    pub fn simulated() -> Self {
        Dictionary {
            clock_freq: 16_000_000.0,
            stats_sumsq_base: 256.0,
            adc_max: 4095.0,
            mcu_name: "simulavr".into(),
        }
    }
}
