//! `MCU_digital_out` (spec §2 DigitalOut): a scheduled on/off pin.

use crate::error::McuError;
use crate::mcu::McuInner;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

struct DigitalOutInner {
    oid: u32,
    mcu: Weak<RefCell<McuInner>>,
    invert: bool,
    last_clock: u64,
    last_value: bool,
}

#[derive(Clone)]
pub struct DigitalOut {
    inner: Rc<RefCell<DigitalOutInner>>,
}

impl DigitalOut {
    pub(crate) fn new(oid: u32, mcu: Weak<RefCell<McuInner>>, invert: bool) -> Self {
        DigitalOut {
            inner: Rc::new(RefCell::new(DigitalOutInner { oid, mcu, invert, last_clock: 0, last_value: false })),
        }
    }

    pub fn oid(&self) -> u32 {
        self.inner.borrow().oid
    }

    fn upgrade(&self) -> Result<Rc<RefCell<McuInner>>, McuError> {
        self.inner.borrow().mcu.upgrade().ok_or(McuError::Transport("mcu dropped".into()))
    }

    /// `set_digital`: schedules the pin to take `value XOR invert` at
    /// `clock`, with `minclock = last_clock` so the serial layer can't
    /// let this send overtake the previously scheduled one (spec §3's
    /// monotone scheduling invariant).
    pub fn set_digital(&self, clock: u64, value: bool) -> Result<(), McuError> {
        let mcu = self.upgrade()?;
        let oid = self.oid();
        let (minclock, invert) = {
            let inner = self.inner.borrow();
            (inner.last_clock, inner.invert)
        };
        let wire_value = value ^ invert;
        let mut mcu = mcu.borrow_mut();
        if mcu.is_shutdown() {
            return Err(mcu.shutdown_error());
        }
        if let Some(fmt) = mcu.transport.msgparser().lookup_command("schedule_digital_out").cloned() {
            if let Ok(payload) =
                fmt.encode(&[(oid as i64).into(), (clock as i64).into(), (wire_value as i64).into()])
            {
                mcu.transport.send(payload, minclock, clock, None);
            }
        }
        drop(mcu);
        let mut inner = self.inner.borrow_mut();
        inner.last_clock = clock;
        inner.last_value = value;
        Ok(())
    }

    /// `set_pwm(mcu_time, value)`: a `DigitalOut` degraded from a `Pwm`
    /// request (spec §4.5) only understands on/off, so it quantizes the
    /// 0-255 duty cycle the same way klippy's shim does: anything above
    /// the midpoint is "on".
    pub fn set_pwm(&self, clock: u64, value: u8) -> Result<(), McuError> {
        self.set_digital(clock, value > 127)
    }

    /// `get_last_setting`: the most recently scheduled `(clock, value)`,
    /// in the logical (pre-invert) sense `set_digital`/`set_pwm` were
    /// called with — used by callers (e.g. [`crate::fan::PrinterFan`])
    /// that need to know the current output without re-querying the MCU.
    pub fn get_last_setting(&self) -> (u64, bool) {
        let inner = self.inner.borrow();
        (inner.last_clock, inner.last_value)
    }
}
