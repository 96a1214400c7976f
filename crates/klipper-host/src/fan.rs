//! `PrinterFan` (spec §2, §8 fan kick-start scenario): wraps a
//! [`Pwm`] created in soft-pwm mode and adds the two behaviors a bare
//! `Pwm` doesn't have — a minimum time between scheduled changes, and a
//! brief full-power kick pulse when starting the fan from a stop so it
//! reliably spins up.

use crate::error::McuError;
use crate::mcu::McuController;
use crate::pwm::Pwm;

/// Minimum spacing between two scheduled fan speed changes.
pub const FAN_MIN_TIME: f64 = 0.1;

pub struct PrinterFan {
    pwm: Pwm,
    kick_start_time: f64,
    last_print_time: f64,
    last_value: f64,
}

impl PrinterFan {
    /// `create_pwm(pin, hard_pwm=0)`: a fan is always software-pulsed.
    pub fn new(mcu: &McuController, pin: &str, kick_start_time: f64) -> Self {
        let pwm = mcu.create_pwm(pin, 0, 1000, 0, 0);
        PrinterFan { pwm, kick_start_time, last_print_time: 0.0, last_value: 0.0 }
    }

    pub fn last_value(&self) -> f64 {
        self.last_value
    }

    /// `set_speed`: quantizes `value` to an 8-bit duty cycle, is a no-op
    /// if unchanged, enforces [`FAN_MIN_TIME`] spacing from the previous
    /// change, and when transitioning from stopped to a partial speed,
    /// schedules a brief full-power pulse first so the fan actually
    /// starts turning before settling to the requested speed.
    pub fn set_speed(&mut self, mcu: &McuController, print_time: f64, value: f64) -> Result<(), McuError> {
        let value = value.clamp(0.0, 1.0);
        let byte_value = (value * 255.0).round() as u8;
        let quantized = byte_value as f64 / 255.0;
        if quantized == self.last_value {
            return Ok(());
        }
        let mut mcu_time = mcu.print_to_mcu_time(print_time).max(self.last_print_time + FAN_MIN_TIME);
        if self.last_value == 0.0 && quantized > 0.0 && quantized < 1.0 && self.kick_start_time > 0.0 {
            let clock = mcu.clock_for_mcu_time(mcu_time);
            self.pwm.set_pwm(clock, 255)?;
            mcu_time += self.kick_start_time;
        }
        let clock = mcu.clock_for_mcu_time(mcu_time);
        self.pwm.set_pwm(clock, byte_value)?;
        self.last_print_time = mcu_time;
        self.last_value = quantized;
        Ok(())
    }
}
