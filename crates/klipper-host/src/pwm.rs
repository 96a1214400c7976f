//! `MCU_pwm` (spec §2 Pwm): a scheduled duty-cycle output, either
//! hardware-timer-driven (`schedule_pwm_out`) or software-bitbanged
//! (`schedule_soft_pwm_out`) depending on how
//! [`crate::mcu::McuController::create_pwm`] configured it.

use crate::error::McuError;
use crate::mcu::McuInner;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

struct PwmInner {
    oid: u32,
    hard_pwm: bool,
    mcu: Weak<RefCell<McuInner>>,
    last_clock: u64,
    last_value: u8,
}

#[derive(Clone)]
pub struct Pwm {
    inner: Rc<RefCell<PwmInner>>,
}

impl Pwm {
    pub(crate) fn new(oid: u32, hard_pwm: bool, mcu: Weak<RefCell<McuInner>>) -> Self {
        Pwm {
            inner: Rc::new(RefCell::new(PwmInner { oid, hard_pwm, mcu, last_clock: 0, last_value: 0 })),
        }
    }

    pub fn oid(&self) -> u32 {
        self.inner.borrow().oid
    }

    pub fn is_hard_pwm(&self) -> bool {
        self.inner.borrow().hard_pwm
    }

    fn upgrade(&self) -> Result<Rc<RefCell<McuInner>>, McuError> {
        self.inner.borrow().mcu.upgrade().ok_or(McuError::Transport("mcu dropped".into()))
    }

    /// `set_pwm`: schedules `value` (0-255 duty cycle) to take effect at
    /// `clock`, via whichever wire command [`Self::is_hard_pwm`]
    /// selected at config time, with `minclock = last_clock`.
    pub fn set_pwm(&self, clock: u64, value: u8) -> Result<(), McuError> {
        let mcu = self.upgrade()?;
        let oid = self.oid();
        let hard = self.is_hard_pwm();
        let minclock = self.inner.borrow().last_clock;
        let mut mcu = mcu.borrow_mut();
        if mcu.is_shutdown() {
            return Err(mcu.shutdown_error());
        }
        let command_name = if hard { "schedule_pwm_out" } else { "schedule_soft_pwm_out" };
        if let Some(fmt) = mcu.transport.msgparser().lookup_command(command_name).cloned() {
            if let Ok(payload) = fmt.encode(&[(oid as i64).into(), (clock as i64).into(), (value as i64).into()]) {
                mcu.transport.send(payload, minclock, clock, None);
            }
        }
        drop(mcu);
        let mut inner = self.inner.borrow_mut();
        inner.last_clock = clock;
        inner.last_value = value;
        Ok(())
    }

    pub fn get_last_setting(&self) -> (u64, u8) {
        let inner = self.inner.borrow();
        (inner.last_clock, inner.last_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcu::McuController;
    use klipper_proto::commands::Dictionary;

    #[test]
    fn nonzero_hard_cycle_ticks_selects_hard_pwm() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let pwm = mcu.create_pwm("PA0", 100, 0, 0, 0);
        assert!(pwm.is_hard_pwm());
    }

    /// The known dead branch (spec Open Question): a negative
    /// `hard_cycle_ticks` is still caught by the `!= 0` check first, so
    /// it is dispatched as hard pwm rather than falling back to a plain
    /// digital out.
    #[test]
    fn negative_hard_cycle_ticks_also_selects_hard_pwm() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let pwm = mcu.create_pwm("PA0", -1, 0, 0, 0);
        assert!(pwm.is_hard_pwm());
    }

    #[test]
    fn zero_hard_cycle_ticks_selects_soft_pwm() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let pwm = mcu.create_pwm("PA0", 0, 1000, 0, 0);
        assert!(!pwm.is_hard_pwm());
    }

    #[test]
    fn set_pwm_updates_last_setting() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let pwm = mcu.create_pwm("PA0", 100, 0, 0, 0);
        mcu.build_config().unwrap();
        pwm.set_pwm(2000, 128).unwrap();
        assert_eq!(pwm.get_last_setting(), (2000, 128));
    }
}
